//! Iteration budget for one repair attempt.

/// Counts `Generate` passes against a fixed ceiling.
///
/// The counter only moves forward; once it reaches the ceiling no further
/// pass is granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationCounter {
    used: u32,
    max: u32,
}

impl IterationCounter {
    pub fn new(max: u32) -> Self {
        Self { used: 0, max }
    }

    /// Claim one pass. Returns `false` without incrementing when the ceiling is reached.
    pub fn try_advance(&mut self) -> bool {
        if self.used >= self.max {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}
