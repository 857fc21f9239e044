/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! How much work a scheduler may take on right now.
//!
//! Two pressure signals shrink the worker limit: the host's load average
//! and database pool usage. The fast lane lets one extra worker past a
//! saturated limit so urgent tasks are not stuck behind a flood of
//! background work.

use std::fs;

use crate::config::CourierConfig;
use crate::database::PoolUsage;
use crate::models::Priority;

/// Source of the host load average.
pub trait LoadProbe: Send + Sync {
    /// One-minute load average, or `None` if unavailable.
    fn load_average(&self) -> Option<f64>;
}

/// Reads `/proc/loadavg`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcLoadAverage;

impl LoadProbe for ProcLoadAverage {
    fn load_average(&self) -> Option<f64> {
        let content = fs::read_to_string("/proc/loadavg").ok()?;
        parse_loadavg(&content)
    }
}

/// A fixed reading, for hosts without a load source and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticLoad(pub Option<f64>);

impl LoadProbe for StaticLoad {
    fn load_average(&self) -> Option<f64> {
        self.0
    }
}

fn parse_loadavg(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Throttle {
    max_workers: usize,
    max_load: f64,
    exponent: i32,
    max_connections_level: u32,
    fastlane: bool,
}

impl Throttle {
    pub fn from_config(config: &CourierConfig) -> Self {
        Self {
            max_workers: config.max_workers(),
            max_load: config.max_load(),
            exponent: config.load_exponent(),
            max_connections_level: config.max_connections_level(),
            fastlane: config.fastlane(),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Workers allowed at `load`:
    /// `ceil(max_workers * ((max_load - load) / max_load) ^ exponent)`.
    /// Zero once load reaches `max_load`; the full count without a reading.
    pub fn worker_limit(&self, load: Option<f64>) -> usize {
        let Some(load) = load else {
            return self.max_workers;
        };
        if load >= self.max_load {
            return 0;
        }
        let headroom = ((self.max_load - load.max(0.0)) / self.max_load).powi(self.exponent);
        let limit = (self.max_workers as f64 * headroom).ceil() as usize;
        limit.clamp(1, self.max_workers)
    }

    /// Whether claiming must pause for connection pressure. A single
    /// connection pool is always in use while we hold it, so it never
    /// counts as saturated.
    pub fn connections_saturated(&self, usage: PoolUsage) -> bool {
        usage.max_size > 1 && usage.percent() >= self.max_connections_level
    }

    /// The tier a fast-lane worker should drain, if one is warranted: every
    /// allowed worker is busy, work is waiting, and nothing at the most
    /// urgent waiting tier is running.
    pub fn fast_lane(
        &self,
        busy: usize,
        limit: usize,
        highest_pending: Option<Priority>,
        running_at_tier: i64,
    ) -> Option<Priority> {
        if !self.fastlane || busy < limit {
            return None;
        }
        match highest_pending {
            Some(tier) if running_at_tier == 0 => Some(tier),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle(max_workers: usize) -> Throttle {
        let config = CourierConfig::builder()
            .max_workers(max_workers)
            .max_load(20.0)
            .load_exponent(3)
            .build()
            .unwrap();
        Throttle::from_config(&config)
    }

    #[test]
    fn test_worker_limit_follows_load_curve() {
        let t = throttle(10);
        assert_eq!(t.worker_limit(None), 10);
        assert_eq!(t.worker_limit(Some(0.0)), 10);
        // (10/20)^3 = 0.125 -> ceil(1.25) = 2
        assert_eq!(t.worker_limit(Some(10.0)), 2);
        // tiny headroom still leaves one worker
        assert_eq!(t.worker_limit(Some(19.9)), 1);
        assert_eq!(t.worker_limit(Some(20.0)), 0);
        assert_eq!(t.worker_limit(Some(35.0)), 0);
    }

    #[test]
    fn test_connection_pressure_pauses_at_level() {
        let t = throttle(10);
        assert!(!t.connections_saturated(PoolUsage { in_use: 7, max_size: 10 }));
        assert!(t.connections_saturated(PoolUsage { in_use: 8, max_size: 10 }));
        assert!(!t.connections_saturated(PoolUsage { in_use: 1, max_size: 1 }));
    }

    #[test]
    fn test_fast_lane_only_when_saturated_and_tier_idle() {
        let t = throttle(4);
        assert_eq!(t.fast_lane(2, 4, Some(Priority::HIGH), 0), None);
        assert_eq!(t.fast_lane(4, 4, Some(Priority::HIGH), 0), Some(Priority::HIGH));
        assert_eq!(t.fast_lane(4, 4, Some(Priority::HIGH), 1), None);
        assert_eq!(t.fast_lane(4, 4, None, 0), None);

        let config = CourierConfig::builder().fastlane(false).build().unwrap();
        let off = Throttle::from_config(&config);
        assert_eq!(off.fast_lane(10, 10, Some(Priority::CRITICAL), 0), None);
    }

    #[test]
    fn test_parse_loadavg() {
        assert_eq!(parse_loadavg("0.52 0.58 0.59 1/467 12345\n"), Some(0.52));
        assert_eq!(parse_loadavg(""), None);
    }
}
