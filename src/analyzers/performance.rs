use crate::analyzers::{dedup_urls, AnalyzerInput, Issue, Severity};
use crate::pagespeed::PageSpeedResult;

/// One severity band of a metric check
struct Band {
    severity: Severity,
    title: &'static str,
    description: &'static str,
    recommendation: &'static str,
}

/// A Core Web Vitals metric with a severe and a mild band
struct MetricCheck {
    value: fn(&PageSpeedResult) -> Option<f64>,
    /// Whether low values are the bad ones
    lower_is_worse: bool,
    severe_limit: f64,
    mild_limit: f64,
    severe: Band,
    mild: Band,
    format: fn(f64) -> String,
}

const CHECKS: &[MetricCheck] = &[
    MetricCheck {
        value: |r| r.lcp,
        lower_is_worse: false,
        severe_limit: 4000.0,
        mild_limit: 2500.0,
        severe: Band {
            severity: Severity::Critical,
            title: "LCP > 4.0s - velmi pomalé načítání hlavního obsahu",
            description: "měření vykazuje Largest Contentful Paint nad 4 sekundy. Uživatelé pravděpodobně stránku opustí.",
            recommendation: "Optimalizujte hlavní obrázek (lazy load, WebP), minimalizujte render-blocking CSS/JS, použijte preload pro LCP element.",
        },
        mild: Band {
            severity: Severity::Warning,
            title: "LCP > 2.5s - pomalé načítání hlavního obsahu",
            description: "měření má LCP mezi 2.5 a 4.0s. Google doporučuje LCP pod 2.5s.",
            recommendation: "Komprimujte obrázky, implementujte preload pro LCP element, optimalizujte server response time.",
        },
        format: |ms| format!("{:.1}s", ms / 1000.0),
    },
    MetricCheck {
        value: |r| r.inp,
        lower_is_worse: false,
        severe_limit: 500.0,
        mild_limit: 200.0,
        severe: Band {
            severity: Severity::Critical,
            title: "INP > 500ms - velmi špatná interaktivita",
            description: "měření vykazuje Interaction to Next Paint nad 500ms. Stránky reagují velmi pomalu na uživatelské akce.",
            recommendation: "Rozdělte dlouhé úlohy (long tasks) na menší, odložte nepotřebný JavaScript a výpočetně náročné operace přesuňte do web workers.",
        },
        mild: Band {
            severity: Severity::Warning,
            title: "INP > 200ms - pomalá interaktivita",
            description: "měření má INP mezi 200 a 500ms. Google doporučuje INP pod 200ms.",
            recommendation: "Minimalizujte JavaScript na stránce a optimalizujte event handlery.",
        },
        format: |ms| format!("{}ms", ms.round()),
    },
    MetricCheck {
        value: |r| r.cls,
        lower_is_worse: false,
        severe_limit: 0.25,
        mild_limit: 0.1,
        severe: Band {
            severity: Severity::Critical,
            title: "CLS > 0.25 - silný layout shift",
            description: "měření vykazuje Cumulative Layout Shift nad 0.25. Obsah stránky se výrazně posouvá při načítání.",
            recommendation: "Nastavte explicitní rozměry (width/height) na obrázky a videa, nevkládejte dynamicky prvky nad existující obsah.",
        },
        mild: Band {
            severity: Severity::Warning,
            title: "CLS > 0.1 - mírný layout shift",
            description: "měření má CLS mezi 0.1 a 0.25. Google doporučuje CLS pod 0.1.",
            recommendation: "Rezervujte prostor pro obrázky, reklamy a embedded prvky. Používejte transform animace místo layout-triggering vlastností.",
        },
        format: |cls| format!("{:.3}", cls),
    },
    MetricCheck {
        value: |r| r.ttfb,
        lower_is_worse: false,
        severe_limit: 600.0,
        mild_limit: 200.0,
        severe: Band {
            severity: Severity::Warning,
            title: "TTFB > 600ms - pomalá odezva serveru",
            description: "měření má Time to First Byte nad 600ms. Pomalý server zpožďuje celé načítání stránky.",
            recommendation: "Optimalizujte serverové zpracování, implementujte CDN, zvažte server-side caching a databázovou optimalizaci.",
        },
        mild: Band {
            severity: Severity::Info,
            title: "TTFB > 200ms - odezva serveru nad ideálem",
            description: "měření má TTFB mezi 200 a 600ms. Ideální TTFB je pod 200ms.",
            recommendation: "Zvažte CDN, edge caching nebo optimalizaci databázových dotazů pro rychlejší server response.",
        },
        format: |ms| format!("{}ms", ms.round()),
    },
    MetricCheck {
        value: |r| r.performance_score.map(f64::from),
        lower_is_worse: true,
        severe_limit: 50.0,
        mild_limit: 90.0,
        severe: Band {
            severity: Severity::Critical,
            title: "Performance score < 50",
            description: "měření má performance score pod 50. Stránky mají vážné problémy s výkonem.",
            recommendation: "Proveďte kompletní performance audit a optimalizujte obrázky, JavaScript, CSS a server response time.",
        },
        mild: Band {
            severity: Severity::Warning,
            title: "Performance score < 90",
            description: "měření má performance score mezi 50 a 89. Stránky mají prostor pro zlepšení výkonu.",
            recommendation: "Identifikujte a optimalizujte největší bottlenecky pomocí Lighthouse, zaměřte se na LCP, INP a CLS.",
        },
        format: |score| format!("{}/100", score),
    },
];

impl MetricCheck {
    fn exceeds(&self, value: f64, limit: f64) -> bool {
        if self.lower_is_worse {
            value < limit
        } else {
            value > limit
        }
    }
}

/// Core Web Vitals thresholds over the PageSpeed measurements
pub fn analyze(input: &AnalyzerInput) -> Vec<Issue> {
    let mut issues = Vec::new();
    if input.pagespeed.is_empty() {
        return issues;
    }

    for check in CHECKS {
        let mut severe = Vec::new();
        let mut mild = Vec::new();

        for result in &input.pagespeed {
            let Some(value) = (check.value)(result) else {
                continue;
            };
            let measured = (result, value);
            if check.exceeds(value, check.severe_limit) {
                severe.push(measured);
            } else if check.exceeds(value, check.mild_limit) {
                mild.push(measured);
            }
        }

        for (band, measured) in [(&check.severe, severe), (&check.mild, mild)] {
            if measured.is_empty() {
                continue;
            }
            let details: Vec<String> = measured
                .iter()
                .map(|(r, value)| format!("{} ({}: {})", r.url, r.strategy, (check.format)(*value)))
                .collect();
            let urls = dedup_urls(measured.iter().map(|(r, _)| r.url.clone()).collect());

            issues.push(Issue::new(
                band.severity,
                band.title,
                format!("{} {} Naměřeno: {}", measured.len(), band.description, details.join(", ")),
                urls,
                band.recommendation,
            ));
        }
    }

    issues
}
