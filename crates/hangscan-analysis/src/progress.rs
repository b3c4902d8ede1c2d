//! Percentage progress over the candidate streams.

/// Logs "Visited N streams (P% of all active streams)" every percent.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    total: usize,
    count: usize,
    per_percent: usize,
    enabled: bool,
}

impl ProgressReporter {
    pub fn new(total: usize, enabled: bool) -> Self {
        ProgressReporter {
            total,
            count: 0,
            per_percent: (total / 100).max(1),
            enabled,
        }
    }

    /// Counts one more processed stream. Returns the message when this
    /// count crosses a percent boundary.
    pub fn increment(&mut self) -> Option<String> {
        self.count += 1;
        if self.count % self.per_percent != 0 || self.total == 0 {
            return None;
        }
        let percent = (self.count as f64 / self.total as f64 * 100.0).round() as u64;
        let message = format!(
            "Visited {} streams ({}% of all active streams)",
            self.count, percent
        );
        if self.enabled {
            tracing::info!("{}", message);
        }
        Some(message)
    }

    pub fn count(&self) -> usize {
        self.count
    }
}
