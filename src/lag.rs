//! Replica lag checks against externally measured lag.

use crate::callbacks::{CallbackChain, LagContext, LagReading};
use crate::core::LagStatus;

/// Result of one lag check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagCheck {
    pub status: LagStatus,
    /// Last measured lag in seconds, `None` when unknown.
    pub lag: Option<f64>,
}

/// Turns lag readings from the lag callback chain into [`LagStatus`] verdicts.
#[derive(Clone, Default)]
pub struct LagMonitor {
    chain: CallbackChain<LagContext, LagReading>,
}

impl LagMonitor {
    pub fn new(chain: CallbackChain<LagContext, LagReading>) -> Self {
        Self { chain }
    }

    /// Checks a replica against `threshold` seconds.
    ///
    /// A disabled threshold (`None`) is always OK. A missing or unknown reading
    /// is UNKNOWN.
    pub fn check(&self, context: &LagContext, threshold: Option<f64>) -> LagCheck {
        let Some(threshold) = threshold else {
            return LagCheck {
                status: LagStatus::Ok,
                lag: None,
            };
        };

        match self.chain.run(context) {
            Some(LagReading::Seconds(lag)) if lag > threshold => LagCheck {
                status: LagStatus::Behind,
                lag: Some(lag),
            },
            Some(LagReading::Seconds(lag)) => LagCheck {
                status: LagStatus::Ok,
                lag: Some(lag),
            },
            Some(LagReading::Unknown) | None => LagCheck {
                status: LagStatus::Unknown,
                lag: None,
            },
        }
    }
}

/// Picks the effective threshold: server override, then dataset, then global.
pub fn effective_threshold(
    server: Option<f64>,
    dataset: Option<f64>,
    global: Option<f64>,
) -> Option<f64> {
    server.or(dataset).or(global)
}
