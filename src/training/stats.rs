//! Running statistics for telemetry and tuning.
//!
//! All types serialize to JSON for the learner log.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Count, min, max, mean and standard deviation of a stream of samples.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicStats {
    num: u64,
    min: f64,
    max: f64,
    sum: f64,
    sum_sq: f64,
}

impl BasicStats {
    /// Create new empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        if self.num == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.num += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    /// Fold another set of samples into this one.
    pub fn merge(&mut self, other: &Self) {
        if other.num == 0 {
            return;
        }
        if self.num == 0 {
            *self = other.clone();
            return;
        }
        self.num += other.num;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
    }

    /// Reset all statistics to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn num(&self) -> u64 {
        self.num
    }

    #[must_use]
    pub fn min(&self) -> f64 {
        self.min
    }

    #[must_use]
    pub fn max(&self) -> f64 {
        self.max
    }

    #[must_use]
    pub fn avg(&self) -> f64 {
        if self.num == 0 {
            0.0
        } else {
            self.sum / self.num as f64
        }
    }

    /// Population standard deviation.
    #[must_use]
    pub fn std_dev(&self) -> f64 {
        if self.num == 0 {
            return 0.0;
        }
        let mean = self.avg();
        (self.sum_sq / self.num as f64 - mean * mean).max(0.0).sqrt()
    }

    /// Summary in the learner log's shape.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "num": self.num,
            "min": self.min,
            "max": self.max,
            "avg": self.avg(),
            "std_dev": self.std_dev(),
        })
    }
}

/// Histogram over `0..bins`; larger samples land in the last bin.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramNumbered {
    counts: Vec<u64>,
}

impl HistogramNumbered {
    pub fn new(bins: usize) -> Self {
        Self {
            counts: vec![0; bins.max(1)],
        }
    }

    pub fn add(&mut self, bin: usize) {
        let last = self.counts.len() - 1;
        self.counts[bin.min(last)] += 1;
    }

    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    #[must_use]
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!(self.counts)
    }
}

/// Histogram over a fixed set of named classes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramNamed {
    names: Vec<String>,
    counts: Vec<u64>,
}

impl HistogramNamed {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let counts = vec![0; names.len()];
        Self { names, counts }
    }

    /// Count one sample of class `index`.
    ///
    /// # Panics
    /// Panics if `index` is not a class of this histogram.
    pub fn add(&mut self, index: usize) {
        self.counts[index] += 1;
    }

    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    #[must_use]
    pub fn count(&self, index: usize) -> u64 {
        self.counts[index]
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// `{"names": [...], "counts": [...]}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({ "names": self.names, "counts": self.counts })
    }
}

/// Fixed-size window over the most recent values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircularBuffer<T> {
    data: VecDeque<T>,
    capacity: usize,
    total_added: u64,
}

impl<T: Clone> CircularBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
            total_added: 0,
        }
    }

    /// Append, dropping the oldest value when full.
    pub fn push(&mut self, value: T) {
        if self.capacity == 0 {
            return;
        }
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(value);
        self.total_added += 1;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.data.len() == self.capacity
    }

    #[must_use]
    pub fn total_added(&self) -> u64 {
        self.total_added
    }

    /// Contents, oldest first.
    pub fn values(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }
}

impl CircularBuffer<f64> {
    /// Mean of the window, 0 when empty.
    #[must_use]
    pub fn avg(&self) -> f64 {
        if self.data.is_empty() {
            0.0
        } else {
            self.data.iter().sum::<f64>() / self.data.len() as f64
        }
    }
}
