//! Per-axis moving average.

/// Circular-buffer moving average over the filled slots.
///
/// Before the buffer is full, the average covers only the samples seen so
/// far, so the first output equals the first input.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    samples: Vec<f64>,
    next: usize,
    filled: usize,
}

impl MovingAverage {
    /// `window` is raised to at least one sample.
    pub fn new(window: usize) -> Self {
        Self {
            samples: vec![0.0; window.max(1)],
            next: 0,
            filled: 0,
        }
    }

    /// Add a sample and return the current average.
    pub fn push(&mut self, value: f64) -> f64 {
        self.samples[self.next] = value;
        self.next = (self.next + 1) % self.samples.len();
        self.filled = (self.filled + 1).min(self.samples.len());
        self.average()
    }

    /// Average of the filled slots, 0.0 when empty.
    pub fn average(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        let sum: f64 = if self.filled == self.samples.len() {
            self.samples.iter().sum()
        } else {
            self.samples[..self.filled].iter().sum()
        };
        sum / self.filled as f64
    }

    #[inline]
    pub fn window(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn reset(&mut self) {
        self.samples.fill(0.0);
        self.next = 0;
        self.filled = 0;
    }
}
