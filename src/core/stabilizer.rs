//! Temporal smoothing of per-window classifications.
//!
//! Two policies, selected by [`PolicyKind`]:
//!
//! - **Threshold**: keep the last S target-class probabilities, smooth them
//!   (median or mean), compare against a threshold, and keep the last K
//!   booleans. The decision is TARGET only while all K are TARGET.
//! - **Majority**: keep the last K argmax class indices and report the most
//!   frequent one. Ties go to the value seen first in the history.
//!
//! The only state is the bounded histories; the decision is recomputed from
//! them on every call.

use crate::config::{PolicyKind, Smoothing, StabilizerConfig};
use crate::core::classify::ClassProbabilities;
use statrs::statistics::{Data, Median, Statistics};
use std::collections::VecDeque;
use std::fmt;

/// Bounded FIFO that drops the oldest entry when full.
#[derive(Debug, Clone)]
pub struct History<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> History<T> {
    /// Capacity is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(value);
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Output of the stabilizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilizedDecision {
    /// No history yet
    Idle,
    /// Threshold policy: TARGET (`true`) or NON-TARGET
    Binary(bool),
    /// Majority policy: the winning class index
    Class(usize),
}

impl fmt::Display for StabilizedDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StabilizedDecision::Idle => write!(f, "idle"),
            StabilizedDecision::Binary(true) => write!(f, "TARGET"),
            StabilizedDecision::Binary(false) => write!(f, "NON-TARGET"),
            StabilizedDecision::Class(c) => write!(f, "class {c}"),
        }
    }
}

/// Threshold + run-length policy.
#[derive(Debug, Clone)]
pub struct ThresholdStabilizer {
    probabilities: History<f64>,
    decisions: History<bool>,
    smoothing: Smoothing,
    threshold: f64,
    target_class: usize,
}

impl ThresholdStabilizer {
    pub fn new(config: &StabilizerConfig, target_class: usize) -> Self {
        Self {
            probabilities: History::new(config.smoothing_depth),
            decisions: History::new(config.stability_depth),
            smoothing: config.smoothing,
            threshold: config.threshold,
            target_class,
        }
    }

    /// Add one target-class probability and return the new decision.
    pub fn push_probability(&mut self, p: f64) -> StabilizedDecision {
        self.probabilities.push(p);
        let is_target = self.smoothed().is_some_and(|s| s >= self.threshold);
        self.decisions.push(is_target);
        self.decision()
    }

    /// Smoothed value of the probability history.
    pub fn smoothed(&self) -> Option<f64> {
        if self.probabilities.is_empty() {
            return None;
        }
        let values: Vec<f64> = self.probabilities.iter().copied().collect();
        Some(match self.smoothing {
            Smoothing::Median => Data::new(values).median(),
            Smoothing::Mean => values.iter().mean(),
        })
    }

    pub fn decision(&self) -> StabilizedDecision {
        let all_target = !self.decisions.is_empty() && self.decisions.iter().all(|&d| d);
        StabilizedDecision::Binary(all_target)
    }

    pub fn history_string(&self) -> String {
        self.decisions
            .iter()
            .map(|&d| if d { 'T' } else { 'N' })
            .collect()
    }
}

/// Majority vote policy.
#[derive(Debug, Clone)]
pub struct MajorityStabilizer {
    classes: History<usize>,
}

impl MajorityStabilizer {
    pub fn new(config: &StabilizerConfig) -> Self {
        Self {
            classes: History::new(config.class_history_depth),
        }
    }

    pub fn push_class(&mut self, class: usize) -> StabilizedDecision {
        self.classes.push(class);
        self.decision()
    }

    pub fn decision(&self) -> StabilizedDecision {
        majority(self.classes.iter().copied())
            .map(StabilizedDecision::Class)
            .unwrap_or(StabilizedDecision::Idle)
    }

    pub fn history_string(&self) -> String {
        self.classes.iter().map(|c| c.to_string()).collect()
    }
}

/// Most frequent value; ties go to the value seen first.
pub fn majority<I: IntoIterator<Item = usize>>(values: I) -> Option<usize> {
    let mut counts: Vec<(usize, usize)> = Vec::new();
    for v in values {
        match counts.iter_mut().find(|(value, _)| *value == v) {
            Some((_, n)) => *n += 1,
            None => counts.push((v, 1)),
        }
    }
    let mut best: Option<(usize, usize)> = None;
    for (value, n) in counts {
        match best {
            Some((_, top)) if n <= top => {}
            _ => best = Some((value, n)),
        }
    }
    best.map(|(value, _)| value)
}

/// The configured stabilizer policy.
#[derive(Debug, Clone)]
pub enum Stabilizer {
    Threshold(ThresholdStabilizer),
    Majority(MajorityStabilizer),
}

impl Stabilizer {
    pub fn new(config: &StabilizerConfig, target_class: usize) -> Self {
        match config.policy {
            PolicyKind::Threshold => {
                Stabilizer::Threshold(ThresholdStabilizer::new(config, target_class))
            }
            PolicyKind::Majority => Stabilizer::Majority(MajorityStabilizer::new(config)),
        }
    }

    /// Fold one classification into the history and return the decision.
    pub fn update(&mut self, probs: &ClassProbabilities) -> StabilizedDecision {
        match self {
            Stabilizer::Threshold(s) => {
                let p = probs.target_probability(s.target_class);
                s.push_probability(p)
            }
            Stabilizer::Majority(s) => match probs.argmax() {
                Some(class) => s.push_class(class),
                None => s.decision(),
            },
        }
    }

    /// Decision from the current history without changing it.
    pub fn decision(&self) -> StabilizedDecision {
        match self {
            Stabilizer::Threshold(s) => s.decision(),
            Stabilizer::Majority(s) => s.decision(),
        }
    }

    /// Compact history for status output: `T`/`N` per decision, or one digit
    /// per class.
    pub fn history_string(&self) -> String {
        match self {
            Stabilizer::Threshold(s) => s.history_string(),
            Stabilizer::Majority(s) => s.history_string(),
        }
    }
}
