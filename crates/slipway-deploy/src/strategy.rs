//! Capacity ramp strategy.
//!
//! All capacity math lives here. The strategy is a value object built
//! from the service's autoscaling config and the prior ASG's desired
//! capacity; it performs no I/O. Within one deploy the computed values
//! are monotonic: capacity never decreases, and any non-trivial set of
//! terminating instances on the new group is fatal.

use slipway_core::AutoScalingConfig;

use crate::service::InstanceCensus;

/// Pure capacity calculator for one service's deploy.
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    config: AutoScalingConfig,
    previous_desired_capacity: Option<u32>,
}

impl Strategy {
    pub fn new(config: AutoScalingConfig, previous_desired_capacity: Option<u32>) -> Self {
        Self {
            config,
            previous_desired_capacity,
        }
    }

    /// Build from a service's config and captured prior capacity.
    pub fn for_service(service: &slipway_core::Service) -> Self {
        Self::new(
            service.autoscaling.clone(),
            service.previous_desired_capacity,
        )
    }

    /// How many instances the deploy tries to launch: the prior group's
    /// desired capacity when one exists, floored at `min_size`. Without
    /// a prior group the ramp base is `min_size`, or `max_size` when
    /// the config asks to spread.
    pub fn target_capacity(&self) -> u32 {
        let base = self.previous_desired_capacity.unwrap_or(if self.config.spread {
            self.config.max_size
        } else {
            self.config.min_size
        });
        base.max(self.config.min_size)
    }

    /// The poll exits once this many instances are healthy.
    pub fn target_healthy(&self) -> u32 {
        self.target_capacity()
    }

    /// `min_size` the new group is created with.
    pub fn initial_min_size(&self) -> u32 {
        self.config.min_size
    }

    /// `desired_capacity` the new group is created with.
    pub fn initial_desired_capacity(&self) -> u32 {
        self.target_capacity()
    }

    /// Final desired capacity applied at success cleanup.
    pub fn desired_capacity(&self) -> u32 {
        self.target_capacity()
    }

    /// `(min_size, desired_capacity)` for the next poll update. The
    /// caller clamps against the live group so values never regress.
    pub fn calculate_min_desired(&self) -> (u32, u32) {
        let desired = self.target_capacity();
        (self.config.min_size.min(desired), desired)
    }

    /// Whether the census shows enough terminating instances to abort
    /// the deploy: more than a quarter of the target capacity.
    pub fn reached_max_terminations(&self, census: &InstanceCensus) -> bool {
        census.terminating_ids().len() as u32 > max_terminations(self.target_capacity())
    }
}

/// The terminating-instance budget: `ceil(target / 4)`.
fn max_terminations(target_capacity: u32) -> u32 {
    target_capacity.div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slipway_cloud::{AsgInstance, InstanceLifecycle};

    fn config(min: u32, max: u32) -> AutoScalingConfig {
        AutoScalingConfig {
            min_size: min,
            max_size: max,
            ..AutoScalingConfig::default()
        }
    }

    fn census(in_service: u32, terminating: u32) -> InstanceCensus {
        let mut instances = Vec::new();
        for i in 0..terminating {
            instances.push(AsgInstance {
                id: format!("i-term-{i}"),
                lifecycle_state: InstanceLifecycle::Terminating,
            });
        }
        for i in 0..in_service {
            instances.push(AsgInstance {
                id: format!("i-ok-{i}"),
                lifecycle_state: InstanceLifecycle::InService,
            });
        }
        InstanceCensus::from_instances(&instances)
    }

    #[test]
    fn target_without_prior_is_min_size() {
        let strategy = Strategy::new(config(2, 10), None);
        assert_eq!(strategy.target_capacity(), 2);
        assert_eq!(strategy.initial_desired_capacity(), 2);
        assert_eq!(strategy.initial_min_size(), 2);
    }

    #[test]
    fn target_ramps_from_prior_capacity() {
        let strategy = Strategy::new(config(2, 10), Some(7));
        assert_eq!(strategy.target_capacity(), 7);
        assert_eq!(strategy.target_healthy(), 7);
    }

    #[test]
    fn target_never_below_min_size() {
        let strategy = Strategy::new(config(4, 10), Some(1));
        assert_eq!(strategy.target_capacity(), 4);
    }

    #[test]
    fn spread_ramps_from_max_without_prior() {
        let mut cfg = config(2, 10);
        cfg.spread = true;
        let strategy = Strategy::new(cfg, None);
        assert_eq!(strategy.target_capacity(), 10);
    }

    #[test]
    fn spread_still_prefers_prior_capacity() {
        let mut cfg = config(2, 10);
        cfg.spread = true;
        let strategy = Strategy::new(cfg, Some(5));
        assert_eq!(strategy.target_capacity(), 5);
    }

    #[test]
    fn min_desired_keeps_min_at_or_below_desired() {
        let strategy = Strategy::new(config(5, 10), Some(3));
        let (min, desired) = strategy.calculate_min_desired();
        assert_eq!(desired, 5);
        assert!(min <= desired);
    }

    #[test]
    fn termination_budget_is_a_quarter_rounded_up() {
        assert_eq!(max_terminations(8), 2);
        assert_eq!(max_terminations(2), 1);
        assert_eq!(max_terminations(1), 1);
        assert_eq!(max_terminations(0), 0);
    }

    #[test]
    fn termination_storm_trips_the_halt_predicate() {
        // Target 8: budget is 2, so 3 terminating instances halt.
        let strategy = Strategy::new(config(2, 10), Some(8));
        assert!(!strategy.reached_max_terminations(&census(5, 2)));
        assert!(strategy.reached_max_terminations(&census(5, 3)));
    }

    #[test]
    fn single_termination_tolerated_on_small_target() {
        let strategy = Strategy::new(config(2, 10), None);
        assert!(!strategy.reached_max_terminations(&census(2, 1)));
        assert!(strategy.reached_max_terminations(&census(2, 2)));
    }
}
