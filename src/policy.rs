//! When to rebalance.

/// Decides once per step whether the rebalance pipeline runs.
///
/// The policy fires at most once every `interval` steps. Between those
/// points it fires when the latest observed imbalance (maximum per-rank
/// workload minus the mean) exceeds the threshold. Without any observation
/// it fires only if no rebalance has happened yet, since the initial
/// partition ignores the workload entirely.
#[derive(Clone, Debug)]
pub struct RebalancePolicy {
    threshold: u64,
    interval: u64,
    last_rebalance: Option<u64>,
    observed_imbalance: Option<u64>,
}

impl RebalancePolicy {
    /// Create a policy. An interval of zero behaves like an interval of one.
    pub fn new(threshold: u64, interval: u64) -> Self {
        Self {
            threshold,
            interval: interval.max(1),
            last_rebalance: None,
            observed_imbalance: None,
        }
    }

    /// Workload imbalance above which a rebalance is required.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Minimum number of steps between two rebalances.
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Step of the last rebalance, if any.
    pub fn last_rebalance(&self) -> Option<u64> {
        self.last_rebalance
    }

    /// The latest observed imbalance that has not been acted on.
    pub fn observed_imbalance(&self) -> Option<u64> {
        self.observed_imbalance
    }

    /// Record the current imbalance, replacing any earlier observation.
    pub fn observe(&mut self, imbalance: u64) {
        self.observed_imbalance = Some(imbalance);
    }

    /// Decide whether to rebalance at `step`.
    ///
    /// A positive answer is recorded as a rebalance at `step` and consumes the
    /// current observation, which described the partition being replaced.
    pub fn should_rebalance(&mut self, step: u64) -> bool {
        if let Some(last) = self.last_rebalance {
            if step < last.saturating_add(self.interval) {
                return false;
            }
        }

        let fire = match self.observed_imbalance {
            Some(imbalance) => imbalance > self.threshold,
            None => self.last_rebalance.is_none(),
        };

        if fire {
            log::info!(
                "rebalancing at step {} (imbalance {:?}, threshold {})",
                step,
                self.observed_imbalance,
                self.threshold
            );
            self.last_rebalance = Some(step);
            self.observed_imbalance = None;
        }

        fire
    }
}

#[cfg(test)]
mod test {
    use super::RebalancePolicy;

    #[test]
    fn test_first_step_fires_without_observation() {
        let mut policy = RebalancePolicy::new(10, 5);
        assert!(policy.should_rebalance(0));
        assert_eq!(policy.last_rebalance(), Some(0));

        // No observation after the first rebalance: stay put.
        assert!(!policy.should_rebalance(7));
    }

    #[test]
    fn test_interval_is_respected() {
        let mut policy = RebalancePolicy::new(10, 5);
        assert!(policy.should_rebalance(3));

        for step in 4..8 {
            policy.observe(100);
            assert!(!policy.should_rebalance(step));
        }

        assert!(policy.should_rebalance(8));
        assert_eq!(policy.observed_imbalance(), None);
    }

    #[test]
    fn test_threshold() {
        let mut policy = RebalancePolicy::new(10, 1);
        assert!(policy.should_rebalance(0));

        policy.observe(10);
        assert!(!policy.should_rebalance(1));
        // The observation is kept until it is acted on or replaced.
        assert_eq!(policy.observed_imbalance(), Some(10));

        policy.observe(11);
        assert!(policy.should_rebalance(2));
    }

    #[test]
    fn test_never_fires_twice_per_interval() {
        let mut policy = RebalancePolicy::new(0, 3);
        let mut fired = Vec::new();
        for step in 0..20 {
            policy.observe(1);
            if policy.should_rebalance(step) {
                fired.push(step);
            }
        }
        assert_eq!(fired, vec![0, 3, 6, 9, 12, 15, 18]);

        let mut policy = RebalancePolicy::new(0, 0);
        assert_eq!(policy.interval(), 1);
        assert!(policy.should_rebalance(4));
        assert!(!policy.should_rebalance(4));
    }
}
