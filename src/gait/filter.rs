//! Moving average over the last `size` accepted periods.
//!
//! Cold start: until the window is full the average uses only what was observed.
//! A new period deviating from the average by more than `rejection_fraction` is
//! rejected. With an empty window the positive `fallback` stands in for the
//! average; a zero fallback accepts the first period unchecked. A run of rejections
//! longer than `max_consecutive_rejections` re-seeds the window with the newest
//! period, so a real change of walking speed is eventually followed.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterUpdate {
    Accepted,
    Rejected,
    /// Window cleared and re-seeded with the submitted period.
    Reset,
}

#[derive(Debug, Clone)]
pub struct PeriodFilter {
    window: VecDeque<f64>,
    size: usize,
    sum: f64,
    rejection_fraction: f64,
    max_consecutive_rejections: u32,
    consecutive_rejections: u32,
    fallback: f64,
}

impl PeriodFilter {
    /// `fallback` is reported as the average while the window is empty.
    pub fn new(size: usize, rejection_fraction: f64, max_consecutive_rejections: u32, fallback: f64) -> Self {
        let size = size.max(1);
        Self {
            window: VecDeque::with_capacity(size),
            size,
            sum: 0.0,
            rejection_fraction,
            max_consecutive_rejections,
            consecutive_rejections: 0,
            fallback,
        }
    }

    pub fn average(&self) -> f64 {
        if self.window.is_empty() { self.fallback } else { self.sum / self.window.len() as f64 }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn is_outlier(&self, period: f64) -> bool {
        let avg = self.average();
        if !(avg > 0.0) {
            return false;
        }
        (period - avg).abs() > self.rejection_fraction * avg
    }

    fn push(&mut self, period: f64) {
        if self.window.len() == self.size {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
        self.window.push_back(period);
        self.sum += period;
    }

    pub fn submit(&mut self, period: f64) -> FilterUpdate {
        if !period.is_finite() || period <= 0.0 {
            return FilterUpdate::Rejected;
        }
        if !self.is_outlier(period) {
            self.consecutive_rejections = 0;
            self.push(period);
            return FilterUpdate::Accepted;
        }

        self.consecutive_rejections += 1;
        if self.max_consecutive_rejections > 0 && self.consecutive_rejections > self.max_consecutive_rejections {
            self.window.clear();
            self.sum = 0.0;
            self.consecutive_rejections = 0;
            self.push(period);
            return FilterUpdate::Reset;
        }
        FilterUpdate::Rejected
    }
}
