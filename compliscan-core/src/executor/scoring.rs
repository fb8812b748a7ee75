use std::collections::BTreeMap;

use crate::types::{
    Grade, Priority, RawData, Recommendation, ScanJob, ScanOutcome,
};

/// Everything a scorer may look at: the accumulated results of one run.
#[derive(Clone, Copy, Debug)]
pub struct ScoringInput<'a> {
    pub domain: &'a str,
    pub findings: &'a [String],
    pub breach_alerts: &'a [String],
    pub scanned_urls: &'a [String],
}

impl<'a> ScoringInput<'a> {
    pub fn from_job(job: &'a ScanJob) -> Self {
        Self {
            domain: &job.domain,
            findings: &job.findings,
            breach_alerts: &job.breach_alerts,
            scanned_urls: &job.scanned_urls,
        }
    }
}

/// Turns accumulated findings into the result fields written at finalize.
pub trait Scorer: Send + Sync {
    fn score(&self, input: &ScoringInput<'_>) -> ScanOutcome;
}

/// Deterministic default policy.
///
/// Grade follows the finding count (0 → A, 1–2 → B, 3–4 → C, more → D). Risk
/// grows with findings and, more steeply, with breach alerts. Recommendations
/// come from the categories the findings mention.
#[derive(Clone, Copy, Debug, Default)]
pub struct FindingsScorer;

struct Category {
    keyword: &'static str,
    title: &'static str,
    description: &'static str,
    priority: Priority,
}

const CATEGORIES: &[Category] = &[
    Category {
        keyword: "cookie",
        title: "Implement Cookie Consent",
        description: "Add GDPR-compliant banner",
        priority: Priority::High,
    },
    Category {
        keyword: "privacy policy",
        title: "Update Privacy Policy",
        description: "Add CCPA disclosure clause",
        priority: Priority::High,
    },
    Category {
        keyword: "tls",
        title: "Enable HSTS",
        description: "Add Strict-Transport-Security header",
        priority: Priority::Medium,
    },
    Category {
        keyword: "email",
        title: "Harden Email Authentication",
        description: "Publish SPF, DKIM and DMARC records",
        priority: Priority::Medium,
    },
    Category {
        keyword: "third-party",
        title: "Review Third-Party Scripts",
        description: "Load trackers only after consent",
        priority: Priority::Medium,
    },
    Category {
        keyword: "form",
        title: "Secure Data Collection Forms",
        description: "Collect explicit consent and minimize fields",
        priority: Priority::Low,
    },
    Category {
        keyword: "dns",
        title: "Review DNS Configuration",
        description: "Enable DNSSEC and add CAA records",
        priority: Priority::Low,
    },
];

fn mentions(findings: &[String], keyword: &str) -> bool {
    findings
        .iter()
        .any(|finding| finding.to_lowercase().contains(keyword))
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl FindingsScorer {
    pub fn grade_for(findings: usize) -> Grade {
        match findings {
            0 => Grade::A,
            1..=2 => Grade::B,
            3..=4 => Grade::C,
            _ => Grade::D,
        }
    }
}

impl Scorer for FindingsScorer {
    fn score(&self, input: &ScoringInput<'_>) -> ScanOutcome {
        let findings = input.findings.len();
        let breaches = input.breach_alerts.len();
        let grade = Self::grade_for(findings);

        let risk_score =
            round1((5.0 + 6.0 * findings as f64 + 10.0 * breaches as f64).min(100.0));
        let anomaly_score =
            round1((2.5 * breaches as f64 + 0.5 * findings as f64).min(10.0));

        let mut checklist = BTreeMap::new();
        checklist.insert("gdpr".to_string(), matches!(grade, Grade::A | Grade::B));
        checklist.insert(
            "ccpa".to_string(),
            matches!(grade, Grade::A | Grade::B | Grade::C),
        );
        checklist.insert("https".to_string(), !mentions(input.findings, "tls"));
        checklist.insert(
            "cookie_banner".to_string(),
            !mentions(input.findings, "cookie"),
        );

        let mut recommendations = Vec::new();
        if breaches > 0 {
            recommendations.push(Recommendation::new(
                "Investigate Breach Alerts",
                format!("{breaches} high-risk signal(s) detected on {}", input.domain),
                Priority::High,
            ));
        }
        recommendations.extend(
            CATEGORIES
                .iter()
                .filter(|category| mentions(input.findings, category.keyword))
                .map(|category| {
                    Recommendation::new(
                        category.title,
                        category.description,
                        category.priority,
                    )
                }),
        );

        ScanOutcome {
            grade,
            risk_score,
            anomaly_score,
            checklist,
            recommendations,
            raw_data: RawData {
                scanned_urls: input.scanned_urls.to_vec(),
                issues_found: findings,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(findings: &[&str], breaches: &[&str]) -> ScanOutcome {
        let findings: Vec<String> = findings.iter().map(|s| s.to_string()).collect();
        let breaches: Vec<String> = breaches.iter().map(|s| s.to_string()).collect();
        FindingsScorer.score(&ScoringInput {
            domain: "example.com",
            findings: &findings,
            breach_alerts: &breaches,
            scanned_urls: &[],
        })
    }

    #[test]
    fn clean_scan_gets_top_grade_and_passes_checklist() {
        let outcome = score(&[], &[]);
        assert_eq!(outcome.grade, Grade::A);
        assert_eq!(outcome.risk_score, 5.0);
        assert_eq!(outcome.anomaly_score, 0.0);
        assert!(outcome.checklist.values().all(|passed| *passed));
        assert!(outcome.recommendations.is_empty());
    }

    #[test]
    fn grade_bands_follow_finding_count() {
        assert_eq!(FindingsScorer::grade_for(2), Grade::B);
        assert_eq!(FindingsScorer::grade_for(3), Grade::C);
        assert_eq!(FindingsScorer::grade_for(5), Grade::D);
    }

    #[test]
    fn categories_drive_checklist_and_recommendations() {
        let outcome = score(
            &[
                "Non-compliant analyzing cookies & consent banners",
                "Non-compliant testing tls/ssl configuration",
            ],
            &["High-risk in Checking DNS records"],
        );

        assert_eq!(outcome.grade, Grade::B);
        assert!(outcome.checklist["gdpr"]);
        assert!(!outcome.checklist["https"]);
        assert!(!outcome.checklist["cookie_banner"]);
        assert_eq!(outcome.raw_data.issues_found, 2);

        let titles: Vec<&str> = outcome
            .recommendations
            .iter()
            .map(|rec| rec.title.as_str())
            .collect();
        assert_eq!(
            titles,
            vec![
                "Investigate Breach Alerts",
                "Implement Cookie Consent",
                "Enable HSTS"
            ]
        );
        assert!(outcome.risk_score.is_finite() && outcome.risk_score >= 0.0);
    }
}
