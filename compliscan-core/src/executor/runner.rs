use std::{fmt, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::plan::ScanStep;
use crate::error::Result;
use crate::types::ScanJob;

/// What one step contributes to the job. Everything here is appended; nothing
/// a step returns can replace earlier results.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StepOutput {
    pub findings: Vec<String>,
    pub breach_alerts: Vec<String>,
    pub scanned_urls: Vec<String>,
}

/// The work behind a [`ScanStep`].
///
/// Returning an error fails the whole job. Implementations should not touch
/// the store themselves; the executor persists the output.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, job: &ScanJob, step: &ScanStep) -> Result<StepOutput>;
}

/// Stand-in scanner: waits, then rolls for findings.
///
/// Each step yields a finding with probability `finding_rate` and a breach
/// alert with probability `breach_rate`. The crawl step also reports the
/// handful of well-known pages it "visited".
pub struct SimulatedStepRunner {
    delay: Duration,
    finding_rate: f64,
    breach_rate: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedStepRunner {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            finding_rate: 0.3,
            breach_rate: 0.1,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic variant for tests and demos.
    pub fn seeded(delay: Duration, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..Self::new(delay)
        }
    }

    pub fn with_rates(mut self, finding_rate: f64, breach_rate: f64) -> Self {
        self.finding_rate = finding_rate.clamp(0.0, 1.0);
        self.breach_rate = breach_rate.clamp(0.0, 1.0);
        self
    }
}

impl fmt::Debug for SimulatedStepRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedStepRunner")
            .field("delay", &self.delay)
            .field("finding_rate", &self.finding_rate)
            .field("breach_rate", &self.breach_rate)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StepRunner for SimulatedStepRunner {
    async fn run(&self, job: &ScanJob, step: &ScanStep) -> Result<StepOutput> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let (finding, breach) = {
            let mut rng = self.rng.lock();
            (
                rng.random_bool(self.finding_rate),
                rng.random_bool(self.breach_rate),
            )
        };

        let mut output = StepOutput::default();
        if finding {
            output
                .findings
                .push(format!("Non-compliant {}", step.name.to_lowercase()));
        }
        if breach {
            output.breach_alerts.push(format!("High-risk in {}", step.name));
        }
        if step.name.starts_with("Crawling") {
            output.scanned_urls = ["", "/privacy", "/cookies", "/terms", "/contact"]
                .iter()
                .map(|path| format!("https://{}{}", job.domain, path))
                .collect();
        }
        Ok(output)
    }
}
