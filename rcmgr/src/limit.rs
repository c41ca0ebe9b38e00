use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;

use crate::{RcmgrError, Result};

/// Task priorities at or above this level reserve from the high-priority pool.
pub const HIGH_PRIORITY_LEVEL: u8 = 170;
/// Task priorities at or above this level (and below high) reserve from the medium pool.
pub const MEDIUM_PRIORITY_LEVEL: u8 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReserveTaskPriority {
    High,
    Medium,
    Low,
}

impl ReserveTaskPriority {
    pub fn from_level(level: u8) -> Self {
        if level >= HIGH_PRIORITY_LEVEL {
            ReserveTaskPriority::High
        } else if level >= MEDIUM_PRIORITY_LEVEL {
            ReserveTaskPriority::Medium
        } else {
            ReserveTaskPriority::Low
        }
    }
}

/// Capacity of a scope, or the remaining view of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub memory: i64,
    pub tasks_total: i64,
    pub tasks_high: i64,
    pub tasks_medium: i64,
    pub tasks_low: i64,
}

/// Resources one unit of work wants to hold while it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeStat {
    pub memory: i64,
    pub tasks_high: i64,
    pub tasks_medium: i64,
    pub tasks_low: i64,
}

impl Limit {
    pub fn new(memory: i64, tasks_total: i64, tasks_high: i64, tasks_medium: i64, tasks_low: i64) -> Self {
        Self {
            memory,
            tasks_total,
            tasks_high,
            tasks_medium,
            tasks_low,
        }
    }

    pub fn tasks_for(&self, priority: ReserveTaskPriority) -> i64 {
        match priority {
            ReserveTaskPriority::High => self.tasks_high,
            ReserveTaskPriority::Medium => self.tasks_medium,
            ReserveTaskPriority::Low => self.tasks_low,
        }
    }

    /// Whether every dimension of `self` is at least the matching one of `other`.
    pub fn not_less(&self, other: &Limit) -> bool {
        self.memory >= other.memory
            && self.tasks_total >= other.tasks_total
            && self.tasks_high >= other.tasks_high
            && self.tasks_medium >= other.tasks_medium
            && self.tasks_low >= other.tasks_low
    }

    /// Remaining capacity after `used` is taken out, never below zero.
    pub fn remaining_after(&self, used: &ScopeStat) -> Limit {
        Limit {
            memory: (self.memory - used.memory).max(0),
            tasks_total: (self.tasks_total - used.tasks()).max(0),
            tasks_high: (self.tasks_high - used.tasks_high).max(0),
            tasks_medium: (self.tasks_medium - used.tasks_medium).max(0),
            tasks_low: (self.tasks_low - used.tasks_low).max(0),
        }
    }

    /// Checks that `extra` fits on top of `used` within this limit.
    pub(crate) fn check_fits(&self, scope: &str, used: &ScopeStat, extra: &ScopeStat) -> Result<()> {
        let dimensions = [
            ("memory", self.memory, used.memory, extra.memory),
            ("tasks", self.tasks_total, used.tasks(), extra.tasks()),
            ("high priority tasks", self.tasks_high, used.tasks_high, extra.tasks_high),
            ("medium priority tasks", self.tasks_medium, used.tasks_medium, extra.tasks_medium),
            ("low priority tasks", self.tasks_low, used.tasks_low, extra.tasks_low),
        ];
        for (dimension, limit, used, requested) in dimensions {
            if requested > 0 && used + requested > limit {
                return Err(RcmgrError::ResourceExhausted {
                    scope: scope.to_string(),
                    dimension,
                    requested,
                    remaining: (limit - used).max(0),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory:[{}], tasks:[{}], high:[{}], medium:[{}], low:[{}]",
            self.memory, self.tasks_total, self.tasks_high, self.tasks_medium, self.tasks_low
        )
    }
}

impl ScopeStat {
    pub fn for_task(memory: i64, priority: ReserveTaskPriority) -> Self {
        let mut stat = ScopeStat {
            memory,
            ..Default::default()
        };
        match priority {
            ReserveTaskPriority::High => stat.tasks_high = 1,
            ReserveTaskPriority::Medium => stat.tasks_medium = 1,
            ReserveTaskPriority::Low => stat.tasks_low = 1,
        }
        stat
    }

    pub fn tasks(&self) -> i64 {
        self.tasks_high + self.tasks_medium + self.tasks_low
    }

    pub fn is_empty(&self) -> bool {
        self.memory == 0 && self.tasks() == 0
    }

    pub(crate) fn saturating_sub(&mut self, other: &ScopeStat) {
        self.memory = (self.memory - other.memory).max(0);
        self.tasks_high = (self.tasks_high - other.tasks_high).max(0);
        self.tasks_medium = (self.tasks_medium - other.tasks_medium).max(0);
        self.tasks_low = (self.tasks_low - other.tasks_low).max(0);
    }
}

impl AddAssign<&ScopeStat> for ScopeStat {
    fn add_assign(&mut self, other: &ScopeStat) {
        self.memory += other.memory;
        self.tasks_high += other.tasks_high;
        self.tasks_medium += other.tasks_medium;
        self.tasks_low += other.tasks_low;
    }
}

impl fmt::Display for ScopeStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory:[{}], high:[{}], medium:[{}], low:[{}]",
            self.memory, self.tasks_high, self.tasks_medium, self.tasks_low
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_priority_levels() {
        assert_eq!(ReserveTaskPriority::from_level(255), ReserveTaskPriority::High);
        assert_eq!(ReserveTaskPriority::from_level(170), ReserveTaskPriority::High);
        assert_eq!(ReserveTaskPriority::from_level(169), ReserveTaskPriority::Medium);
        assert_eq!(ReserveTaskPriority::from_level(85), ReserveTaskPriority::Medium);
        assert_eq!(ReserveTaskPriority::from_level(0), ReserveTaskPriority::Low);
    }

    #[test]
    fn test_check_fits_reports_dimension() {
        let limit = Limit::new(100, 1, 1, 1, 1);
        let used = ScopeStat::for_task(10, ReserveTaskPriority::Low);
        let err = limit
            .check_fits("svc", &used, &ScopeStat::for_task(10, ReserveTaskPriority::High))
            .unwrap_err();
        match err {
            RcmgrError::ResourceExhausted { dimension, remaining, .. } => {
                assert_eq!(dimension, "tasks");
                assert_eq!(remaining, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    proptest! {
        #[test]
        fn remaining_is_never_negative(memory in 0i64..1_000, used in 0i64..2_000) {
            let limit = Limit::new(memory, 4, 2, 1, 1);
            let stat = ScopeStat { memory: used, ..Default::default() };
            prop_assert!(limit.remaining_after(&stat).memory >= 0);
        }
    }
}
