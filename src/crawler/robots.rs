use regex::Regex;
use tracing::debug;

/// Parsed robots.txt, grouped by user agent
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    groups: Vec<RobotsGroup>,

    /// `Sitemap:` directives in file order
    sitemaps: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct RobotsGroup {
    /// Lowercased user-agent tokens this group applies to
    agents: Vec<String>,
    rules: Vec<RobotsRule>,
}

#[derive(Debug, Clone)]
struct RobotsRule {
    allow: bool,

    /// Raw path pattern as written
    pattern: String,

    /// Compiled matcher honouring `*` and a trailing `$`
    matcher: Regex,
}

impl RobotsRule {
    fn new(allow: bool, pattern: &str) -> Option<Self> {
        let anchored = pattern.ends_with('$');
        let body = pattern.trim_end_matches('$');

        let mut expr = String::from("^");
        for (i, part) in body.split('*').enumerate() {
            if i > 0 {
                expr.push_str(".*");
            }
            expr.push_str(&regex::escape(part));
        }
        if anchored {
            expr.push('$');
        }

        match Regex::new(&expr) {
            Ok(matcher) => Some(Self {
                allow,
                pattern: pattern.to_string(),
                matcher,
            }),
            Err(e) => {
                debug!("Skipping robots.txt pattern '{}': {}", pattern, e);
                None
            }
        }
    }

    /// Specificity used for longest-match resolution
    fn specificity(&self) -> usize {
        self.pattern.len()
    }
}

impl RobotsRules {
    /// Parse robots.txt content. Unknown directives and malformed lines are ignored.
    pub fn parse(content: &str) -> Self {
        let mut rules = RobotsRules::default();
        let mut current: Option<RobotsGroup> = None;

        for raw_line in content.lines() {
            // Strip comments
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    // A user-agent line after rules starts a new group
                    let starts_new = current.as_ref().map_or(true, |g| !g.rules.is_empty());
                    if starts_new {
                        if let Some(group) = current.take() {
                            rules.groups.push(group);
                        }
                        current = Some(RobotsGroup::default());
                    }
                    if let Some(group) = current.as_mut() {
                        group.agents.push(value.to_lowercase());
                    }
                }
                "allow" | "disallow" => {
                    // An empty Disallow means "allow everything"
                    if value.is_empty() {
                        continue;
                    }
                    if let Some(group) = current.as_mut() {
                        if let Some(rule) = RobotsRule::new(key == "allow", value) {
                            group.rules.push(rule);
                        }
                    }
                }
                "sitemap" => {
                    if !value.is_empty() {
                        rules.sitemaps.push(value.to_string());
                    }
                }
                _ => {}
            }
        }

        if let Some(group) = current.take() {
            rules.groups.push(group);
        }

        rules
    }

    /// Sitemap URLs declared in the file
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// Check whether `path` (path plus optional query) may be fetched by `user_agent`
    pub fn is_allowed(&self, path: &str, user_agent: &str) -> bool {
        let rules = self.rules_for(user_agent);

        let mut best: Option<&RobotsRule> = None;
        for rule in rules.into_iter().filter(|r| r.matcher.is_match(path)) {
            best = match best {
                None => Some(rule),
                Some(current) if rule.specificity() > current.specificity() => Some(rule),
                // Allow wins ties
                Some(current) if rule.specificity() == current.specificity() && rule.allow => {
                    Some(rule)
                }
                keep => keep,
            };
        }

        best.map_or(true, |rule| rule.allow)
    }

    /// Check whether `path` matches a Disallow rule of the wildcard group.
    /// Allow rules are not consulted; this is a conflict check, not an access decision.
    pub fn wildcard_disallows_path(&self, path: &str) -> bool {
        self.groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a == "*"))
            .flat_map(|g| g.rules.iter())
            .any(|r| !r.allow && r.matcher.is_match(path))
    }

    /// Whether a group naming exactly `bot` disallows the whole site
    pub fn blocks_entire_site(&self, bot: &str) -> bool {
        let bot = bot.to_lowercase();
        self.groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| *a == bot))
            .flat_map(|g| g.rules.iter())
            .any(|r| !r.allow && (r.pattern == "/" || r.pattern == "/*"))
    }

    /// Rules of the most specific group matching the agent, falling back to `*`
    fn rules_for(&self, user_agent: &str) -> Vec<&RobotsRule> {
        let ua = user_agent.to_lowercase();
        let product = ua.split('/').next().unwrap_or(&ua).trim();

        let best_agent = self
            .groups
            .iter()
            .flat_map(|g| g.agents.iter())
            .filter(|a| a.as_str() != "*" && !a.is_empty() && product.contains(a.as_str()))
            .max_by_key(|a| a.len())
            .cloned();

        let wanted = best_agent.unwrap_or_else(|| "*".to_string());

        self.groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| *a == wanted))
            .flat_map(|g| g.rules.iter())
            .collect()
    }
}
