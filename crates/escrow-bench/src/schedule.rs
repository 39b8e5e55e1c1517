use std::str::FromStr;

use crate::error::{BenchError, Result};

/// Population sizes `from, from + step, …` below `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearRange {
    pub from: usize,
    pub to: usize,
    pub step: usize,
}

impl LinearRange {
    pub const fn new(from: usize, to: usize, step: usize) -> Self {
        Self { from, to, step }
    }

    /// `floor((to - from) / step)` sizes; empty when `to <= from`.
    pub fn sizes(&self) -> impl Iterator<Item = usize> + '_ {
        let count = self.to.saturating_sub(self.from) / self.step.max(1);
        (0..count).map(move |i| self.from + self.step * i)
    }
}

impl FromStr for LinearRange {
    type Err = BenchError;

    /// Parses `from:to` or `from:to:step`.
    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim()
                .parse::<usize>()
                .map_err(|e| BenchError::Config(format!("invalid range `{s}`: {e}")))
        };

        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [from, to] => Ok(Self::new(parse(*from)?, parse(*to)?, 1)),
            [from, to, step] => Ok(Self::new(parse(*from)?, parse(*to)?, parse(*step)?)),
            _ => Err(BenchError::Config(format!(
                "invalid range `{s}`: expected from:to[:step]"
            ))),
        }
    }
}

/// Ordered population sizes benchmarked by a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialSchedule {
    ranges: Vec<LinearRange>,
    extras: Vec<usize>,
}

impl Default for TrialSchedule {
    /// Fine steps for small batches, coarser ones as batches grow.
    fn default() -> Self {
        Self {
            ranges: vec![
                LinearRange::new(1, 64, 1),
                LinearRange::new(64, 128, 16),
                LinearRange::new(128, 256, 32),
            ],
            extras: vec![256, 384],
        }
    }
}

impl TrialSchedule {
    /// Builds a schedule, rejecting zero steps, zero sizes and any ordering
    /// that is not strictly increasing.
    pub fn new(ranges: Vec<LinearRange>, extras: Vec<usize>) -> Result<Self> {
        if let Some(range) = ranges.iter().find(|r| r.step == 0) {
            return Err(BenchError::Config(format!(
                "range {}:{} has a zero step",
                range.from, range.to
            )));
        }

        let schedule = Self { ranges, extras };
        let sizes = schedule.sizes();
        if sizes.is_empty() {
            return Err(BenchError::Config("schedule contains no trial sizes".into()));
        }
        if sizes.contains(&0) {
            return Err(BenchError::Config("trial size 0 is not supported".into()));
        }
        if let Some(pair) = sizes.windows(2).find(|w| w[0] >= w[1]) {
            return Err(BenchError::Config(format!(
                "schedule is not strictly increasing: {} then {}",
                pair[0], pair[1]
            )));
        }

        Ok(schedule)
    }

    /// All sizes: each range in order, then the extras.
    pub fn sizes(&self) -> Vec<usize> {
        self.ranges
            .iter()
            .flat_map(|range| range.sizes())
            .chain(self.extras.iter().copied())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sizes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes().is_empty()
    }
}
