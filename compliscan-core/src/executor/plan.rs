use crate::error::{Result, ScanError};

/// One named unit of scan work and the cumulative progress reached once it
/// finishes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanStep {
    pub name: String,
    pub target: u8,
}

impl ScanStep {
    pub fn new(name: impl Into<String>, target: u8) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }

    pub fn log_line(&self) -> String {
        format!("[{}%] {}", self.target, self.name)
    }
}

/// Ordered, validated list of steps.
///
/// Targets strictly increase and stay within `1..=99`; 100 belongs to the
/// finalize transition alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanPlan {
    steps: Vec<ScanStep>,
}

impl ScanPlan {
    pub fn new(steps: Vec<ScanStep>) -> Result<Self> {
        if steps.is_empty() {
            return Err(ScanError::validation("scan plan has no steps"));
        }

        let mut previous = 0u8;
        for step in &steps {
            if step.target == 0 || step.target >= 100 {
                return Err(ScanError::validation(format!(
                    "step `{}` targets {}%, expected 1..=99",
                    step.name, step.target
                )));
            }
            if step.target <= previous {
                return Err(ScanError::validation(format!(
                    "step `{}` does not advance progress past {}%",
                    step.name, previous
                )));
            }
            previous = step.target;
        }

        Ok(Self { steps })
    }

    /// The compliance sweep run for every submitted domain.
    pub fn standard() -> Self {
        let steps = [
            ("Initializing scanner", 1),
            ("Connecting to scanner", 2),
            ("Authenticating credentials", 3),
            ("Fetching domain info", 5),
            ("Crawling domain and sitemap", 15),
            ("Checking DNS records", 20),
            ("Analyzing cookies & consent banners", 25),
            ("Scanning privacy policy for GDPR/CCPA", 45),
            ("Testing TLS/SSL configuration", 65),
            ("Analyzing email security", 70),
            ("Checking data collection forms", 75),
            ("Evaluating third-party scripts", 85),
            ("Generating compliance report", 90),
            ("Generating risk report", 95),
        ]
        .into_iter()
        .map(|(name, target)| ScanStep::new(name, target))
        .collect();

        Self { steps }
    }

    pub fn steps(&self) -> &[ScanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Default for ScanPlan {
    fn default() -> Self {
        Self::standard()
    }
}
