use serde::{Deserialize, Serialize};

use super::types::Severity;

/// One rung of the ladder: fire `severity` once `observed / threshold > multiplier`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityStep {
    pub multiplier: f64,
    pub severity: Severity,
}

/// Maps "how far past the threshold" to a severity.
///
/// Invariant: multipliers strictly increase and severities never decrease along the
/// ladder, so a larger overshoot can never map to a milder alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeverityLadder {
    steps: Vec<SeverityStep>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LadderError {
    #[error("severity ladder is empty")]
    Empty,
    #[error("multiplier {0} must be finite and at least 1.0")]
    InvalidMultiplier(f64),
    #[error("severity ladder is not monotonic at multiplier {0}")]
    NotMonotonic(f64),
}

impl SeverityLadder {
    pub fn new(steps: Vec<SeverityStep>) -> Result<Self, LadderError> {
        let ladder = Self { steps };
        ladder.validate()?;
        Ok(ladder)
    }

    pub fn validate(&self) -> Result<(), LadderError> {
        if self.steps.is_empty() {
            return Err(LadderError::Empty);
        }
        for step in &self.steps {
            if !step.multiplier.is_finite() || step.multiplier < 1.0 {
                return Err(LadderError::InvalidMultiplier(step.multiplier));
            }
        }
        for pair in self.steps.windows(2) {
            if pair[1].multiplier <= pair[0].multiplier || pair[1].severity < pair[0].severity {
                return Err(LadderError::NotMonotonic(pair[1].multiplier));
            }
        }
        Ok(())
    }

    /// Severity for an observed/threshold ratio, or `None` if no rung is exceeded.
    pub fn classify(&self, ratio: f64) -> Option<Severity> {
        if ratio.is_nan() {
            return None;
        }
        self.steps
            .iter()
            .rev()
            .find(|step| ratio > step.multiplier)
            .map(|step| step.severity)
    }

    pub fn steps(&self) -> &[SeverityStep] {
        &self.steps
    }
}

impl Default for SeverityLadder {
    /// >1x low, >2x medium, >4x high, >8x critical.
    fn default() -> Self {
        Self {
            steps: vec![
                SeverityStep { multiplier: 1.0, severity: Severity::Low },
                SeverityStep { multiplier: 2.0, severity: Severity::Medium },
                SeverityStep { multiplier: 4.0, severity: Severity::High },
                SeverityStep { multiplier: 8.0, severity: Severity::Critical },
            ],
        }
    }
}
