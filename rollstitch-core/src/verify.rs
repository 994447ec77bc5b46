//! Continuity verification of a finished continuous series.
//!
//! Large single-bar moves are reported, never fixed: they may be genuine
//! volatility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Large moves kept in the report; the rest are only counted.
const MAX_LISTED_MOVES: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSnapshot {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub contract: String,
}

/// Close-to-close change where the underlying contract changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractTransition {
    pub timestamp: DateTime<Utc>,
    pub from_contract: String,
    pub to_contract: String,
    pub gap: f64,
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LargeMove {
    pub timestamp: DateTime<Utc>,
    pub contract: String,
    pub previous_close: f64,
    pub close: f64,
    pub change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub threshold: f64,
    pub bars: u64,
    pub first: Option<BarSnapshot>,
    pub last: Option<BarSnapshot>,
    pub transitions: Vec<ContractTransition>,
    pub large_moves: Vec<LargeMove>,
    pub large_move_count: u64,
}

impl VerificationReport {
    pub fn flagged_transitions(&self) -> usize {
        self.transitions.iter().filter(|t| t.flagged).count()
    }

    /// Total warnings: flagged transitions plus large moves.
    pub fn warning_count(&self) -> u64 {
        self.flagged_transitions() as u64 + self.large_move_count
    }

    pub fn is_clean(&self) -> bool {
        self.warning_count() == 0
    }
}

/// Single-pass verifier over continuous bars in output order.
#[derive(Debug)]
pub struct ContinuityVerifier {
    threshold: f64,
    bars: u64,
    first: Option<BarSnapshot>,
    previous: Option<BarSnapshot>,
    transitions: Vec<ContractTransition>,
    large_moves: Vec<LargeMove>,
    large_move_count: u64,
}

impl ContinuityVerifier {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            bars: 0,
            first: None,
            previous: None,
            transitions: Vec::new(),
            large_moves: Vec::new(),
            large_move_count: 0,
        }
    }

    pub fn observe(&mut self, timestamp: DateTime<Utc>, close: f64, contract: &str) {
        self.bars += 1;
        let current = BarSnapshot {
            timestamp,
            close,
            contract: contract.to_string(),
        };

        if let Some(prev) = &self.previous {
            let change = close - prev.close;
            if prev.contract != contract {
                let flagged = change.abs() > self.threshold;
                if flagged {
                    tracing::warn!(
                        at = %timestamp,
                        from = %prev.contract,
                        to = contract,
                        gap = change,
                        "large gap at contract transition"
                    );
                }
                self.transitions.push(ContractTransition {
                    timestamp,
                    from_contract: prev.contract.clone(),
                    to_contract: contract.to_string(),
                    gap: change,
                    flagged,
                });
            }
            if change.abs() > self.threshold {
                self.large_move_count += 1;
                if self.large_moves.len() < MAX_LISTED_MOVES {
                    self.large_moves.push(LargeMove {
                        timestamp,
                        contract: contract.to_string(),
                        previous_close: prev.close,
                        close,
                        change,
                    });
                }
            }
        } else {
            self.first = Some(current.clone());
        }
        self.previous = Some(current);
    }

    pub fn finish(self) -> VerificationReport {
        if self.large_move_count > 0 {
            tracing::warn!(
                count = self.large_move_count,
                threshold = self.threshold,
                "single-bar moves above threshold"
            );
        }
        VerificationReport {
            threshold: self.threshold,
            bars: self.bars,
            first: self.first,
            last: self.previous,
            transitions: self.transitions,
            large_moves: self.large_moves,
            large_move_count: self.large_move_count,
        }
    }
}
