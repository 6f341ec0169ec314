//! Concurrency planning module for the conversion service
//!
//! Derives the worker-pool size from CPU core count and configuration.

use crate::config::Config;
use serde::Serialize;

/// Upper bound on derived concurrency. Explicit configuration may exceed it.
const MAX_DERIVED_JOBS: u32 = 8;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Maximum number of conversions running at once
    pub max_concurrent_jobs: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// Uses the following rules:
    /// - Detects CPU cores via num_cpus if not specified in config
    /// - An explicit non-zero `max_concurrent_jobs` is used unchanged
    /// - Otherwise half the cores, at least 1 and at most 8
    pub fn derive(cfg: &Config) -> Self {
        let total_cores = cfg
            .workers
            .logical_cores
            .filter(|&cores| cores > 0)
            .unwrap_or_else(|| num_cpus::get() as u32);

        let max_concurrent_jobs = if cfg.workers.max_concurrent_jobs > 0 {
            cfg.workers.max_concurrent_jobs
        } else {
            derive_max_jobs(total_cores)
        };

        Self {
            total_cores,
            max_concurrent_jobs,
        }
    }

    /// Plan with a fixed job limit, independent of the host.
    pub fn fixed(max_concurrent_jobs: u32) -> Self {
        Self {
            total_cores: max_concurrent_jobs.max(1),
            max_concurrent_jobs: max_concurrent_jobs.max(1),
        }
    }
}

fn derive_max_jobs(cores: u32) -> u32 {
    (cores / 2).clamp(1, MAX_DERIVED_JOBS)
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkersConfig;
    use proptest::prelude::*;

    fn config_with(workers: WorkersConfig) -> Config {
        Config {
            workers,
            ..Config::default()
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_derived_jobs_bounded(cores in 1u32..512) {
            let plan = derive_plan(&config_with(WorkersConfig {
                logical_cores: Some(cores),
                max_concurrent_jobs: 0,
            }));

            prop_assert_eq!(plan.total_cores, cores);
            prop_assert!(plan.max_concurrent_jobs >= 1);
            prop_assert!(plan.max_concurrent_jobs <= MAX_DERIVED_JOBS);
            prop_assert_eq!(plan.max_concurrent_jobs, (cores / 2).clamp(1, 8));
        }

        #[test]
        fn prop_explicit_jobs_override(cores in 1u32..256, explicit in 1u32..64) {
            let plan = derive_plan(&config_with(WorkersConfig {
                logical_cores: Some(cores),
                max_concurrent_jobs: explicit,
            }));
            prop_assert_eq!(plan.max_concurrent_jobs, explicit);
        }
    }

    #[test]
    fn test_single_core_gets_one_worker() {
        let plan = derive_plan(&config_with(WorkersConfig {
            logical_cores: Some(1),
            max_concurrent_jobs: 0,
        }));
        assert_eq!(plan.max_concurrent_jobs, 1);
    }

    #[test]
    fn test_detected_cores_when_unset() {
        let plan = derive_plan(&Config::default());
        assert!(plan.total_cores >= 1);
        assert!(plan.max_concurrent_jobs >= 1);
    }

    #[test]
    fn test_fixed_plan_never_zero() {
        assert_eq!(ConcurrencyPlan::fixed(0).max_concurrent_jobs, 1);
        assert_eq!(ConcurrencyPlan::fixed(3).max_concurrent_jobs, 3);
    }
}
