use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate progress: terminal jobs over participants.
///
/// Success and error count the same, so a caller can tell the run is done
/// without waiting for the dispatcher's `complete` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub terminal: usize,
    pub total: usize,
}

impl Progress {
    pub fn new(terminal: usize, total: usize) -> Self {
        Self {
            terminal: terminal.min(total),
            total,
        }
    }

    /// Fraction in `0.0..=1.0`; an empty roster counts as done.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.terminal as f64 / self.total as f64
    }

    /// Whole-number percentage, rounded down.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.terminal * 100) / self.total) as u8
    }

    pub fn is_complete(&self) -> bool {
        self.terminal >= self.total
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({}%)", self.terminal, self.total, self.percent())
    }
}
