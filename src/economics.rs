/// Economics module: the miner payout schedule
use crate::amount::Amount;

/// Default base reward paid for a block.
pub const DEFAULT_BASE_REWARD: u32 = 50;

/// Seconds a block is expected to take per unit of difficulty.
const EXPECTED_SECS_PER_DIFFICULTY: f64 = 10.0;

const MIN_EFFICIENCY: f64 = 0.5;
const MAX_EFFICIENCY: f64 = 1.5;

/// Computes mining rewards from the search difficulty and elapsed time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardPolicy {
    base: Amount,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self::new(Amount::from_num(DEFAULT_BASE_REWARD))
    }
}

impl RewardPolicy {
    pub fn new(base: Amount) -> Self {
        Self { base }
    }

    pub fn base(&self) -> Amount {
        self.base
    }

    /// Search time a block at `difficulty` is expected to take.
    pub fn expected_secs(difficulty: u32) -> f64 {
        difficulty as f64 * EXPECTED_SECS_PER_DIFFICULTY
    }

    /// Reward scales with difficulty and pays up to 1.5x for a faster than
    /// expected search, down to 0.5x for a slow one. Never below the base.
    pub fn reward(&self, difficulty: u32, elapsed_secs: f64) -> Amount {
        let base = self.base.to_num::<f64>();
        let expected = Self::expected_secs(difficulty);
        let elapsed = if elapsed_secs.is_finite() { elapsed_secs.max(1.0) } else { 1.0 };
        let efficiency = (expected / elapsed).clamp(MIN_EFFICIENCY, MAX_EFFICIENCY);
        let reward = Amount::saturating_from_num((base * difficulty as f64 * efficiency).round());
        reward.max(self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RewardPolicy {
        RewardPolicy::default()
    }

    #[test]
    fn test_fast_search_gets_bonus() {
        // expected = 40s, elapsed clamps to 1s -> efficiency 1.5
        assert_eq!(policy().reward(4, 0.2), Amount::from_num(300));
    }

    #[test]
    fn test_slow_search_is_penalised() {
        // expected = 20s, elapsed 100s -> efficiency 0.5 -> 50
        assert_eq!(policy().reward(2, 100.0), Amount::from_num(50));
        // expected = 40s, elapsed 40s -> efficiency 1.0 -> 200
        assert_eq!(policy().reward(4, 40.0), Amount::from_num(200));
    }

    #[test]
    fn test_never_below_base() {
        for difficulty in 0..10 {
            for elapsed in [0.0, 0.5, 1.0, 10.0, 1e6, f64::NAN] {
                assert!(policy().reward(difficulty, elapsed) >= policy().base());
            }
        }
    }

    #[test]
    fn test_monotonic_in_difficulty() {
        for elapsed in [0.0, 3.0, 25.0, 90.0, 5000.0] {
            let mut previous = policy().reward(0, elapsed);
            for difficulty in 1..=64 {
                let current = policy().reward(difficulty, elapsed);
                assert!(current >= previous, "d={} elapsed={}", difficulty, elapsed);
                previous = current;
            }
        }
    }
}
