//! Claiming strategies
//!
//! A strategy is a pure ordering policy over Queued tasks. Every strategy
//! yields a total order (ties end on the task id), so the same task set and
//! strategy always produce the same claim. The ordering is expressed twice
//! from one definition: as an [`OrderingKey`] for in-memory comparison and
//! as a fixed `ORDER BY` clause for the Postgres claim query.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::str::FromStr;

use crate::error::IngestError;
use crate::task::{Task, TaskId};

/// Default sample window for weighted claiming
pub const DEFAULT_TOP_N: usize = 10;

/// Order in which eligible Queued tasks are claimed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClaimingStrategy {
    /// Oldest first, then highest priority
    Fifo,
    /// Newest first, then highest priority
    Lifo,
    /// Highest priority first, then oldest
    #[default]
    Priority,
    /// Sample among the `top_n` highest-priority tasks, weighted by priority
    WeightedRandom { top_n: usize, seed: Option<u64> },
}

/// Comparable ranking key. The smallest key is claimed first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderingKey {
    primary: i64,
    secondary: i64,
    id: TaskId,
}

impl ClaimingStrategy {
    /// Ranking key for a task under this strategy
    pub fn ordering_key(&self, task: &Task) -> OrderingKey {
        let created = task.created_at.timestamp_micros();
        let priority = i64::from(task.priority);
        let (primary, secondary) = match self {
            ClaimingStrategy::Fifo => (created, -priority),
            ClaimingStrategy::Lifo => (-created, -priority),
            ClaimingStrategy::Priority | ClaimingStrategy::WeightedRandom { .. } => {
                (-priority, created)
            }
        };
        OrderingKey {
            primary,
            secondary,
            id: task.id.clone(),
        }
    }

    /// Sort tasks best-first
    pub fn rank(&self, tasks: &mut [Task]) {
        tasks.sort_by_cached_key(|t| self.ordering_key(t));
    }

    /// `ORDER BY` clause equivalent to [`ordering_key`](Self::ordering_key).
    /// The id tie-break uses the C collation so Postgres compares bytes the
    /// way `String` does.
    pub fn order_by_sql(&self) -> &'static str {
        match self {
            ClaimingStrategy::Fifo => r#"created_at ASC, priority DESC, id COLLATE "C" ASC"#,
            ClaimingStrategy::Lifo => r#"created_at DESC, priority DESC, id COLLATE "C" ASC"#,
            ClaimingStrategy::Priority | ClaimingStrategy::WeightedRandom { .. } => {
                r#"priority DESC, created_at ASC, id COLLATE "C" ASC"#
            }
        }
    }

    /// How many ranked candidates the claim must look at
    pub fn candidate_limit(&self) -> usize {
        match self {
            ClaimingStrategy::WeightedRandom { top_n, .. } => (*top_n).max(1),
            _ => 1,
        }
    }

    pub fn seed(&self) -> Option<u64> {
        match self {
            ClaimingStrategy::WeightedRandom { seed, .. } => *seed,
            _ => None,
        }
    }

    /// Pick one of `ranked` (already sorted best-first, at most
    /// `candidate_limit` long). Deterministic strategies take the head.
    pub fn pick(&self, ranked: &[Task], sampler: &mut WeightedSampler) -> Option<usize> {
        if ranked.is_empty() {
            return None;
        }
        match self {
            ClaimingStrategy::WeightedRandom { .. } => {
                let weights: Vec<i64> = ranked.iter().map(|t| i64::from(t.priority)).collect();
                sampler.choose(&weights)
            }
            _ => Some(0),
        }
    }
}

impl fmt::Display for ClaimingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimingStrategy::Fifo => f.write_str("fifo"),
            ClaimingStrategy::Lifo => f.write_str("lifo"),
            ClaimingStrategy::Priority => f.write_str("priority"),
            ClaimingStrategy::WeightedRandom { top_n, seed } => match seed {
                Some(seed) => write!(f, "weighted(top_n={top_n}, seed={seed})"),
                None => write!(f, "weighted(top_n={top_n})"),
            },
        }
    }
}

impl FromStr for ClaimingStrategy {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(ClaimingStrategy::Fifo),
            "lifo" => Ok(ClaimingStrategy::Lifo),
            "priority" => Ok(ClaimingStrategy::Priority),
            "weighted" | "weighted_random" | "weighted-random" => {
                Ok(ClaimingStrategy::WeightedRandom {
                    top_n: DEFAULT_TOP_N,
                    seed: None,
                })
            }
            other => Err(IngestError::ConfigError(format!(
                "unknown claiming strategy: {other} (expected fifo, lifo, priority or weighted)"
            ))),
        }
    }
}

/// Random source for weighted claiming. Seeded samplers replay the same
/// sequence of picks.
pub struct WeightedSampler {
    seed: Option<u64>,
    rng: StdRng,
}

impl WeightedSampler {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { seed, rng }
    }

    /// Reseed when a strategy asks for a seed this sampler was not built with
    pub fn align(&mut self, seed: Option<u64>) {
        if seed.is_some() && seed != self.seed {
            *self = Self::new(seed);
        }
    }

    /// Index drawn with probability proportional to `weights`. Negative
    /// weights count as zero; if every weight is zero the draw is uniform.
    pub fn choose(&mut self, weights: &[i64]) -> Option<usize> {
        if weights.is_empty() {
            return None;
        }
        let clamped: Vec<u64> = weights.iter().map(|w| (*w).max(0) as u64).collect();
        match WeightedIndex::new(&clamped) {
            Ok(dist) => Some(dist.sample(&mut self.rng)),
            Err(_) => Some(self.rng.gen_range(0..weights.len())),
        }
    }
}

impl Default for WeightedSampler {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use chrono::{Duration, TimeZone, Utc};

    fn task(id: &str, priority: i32, offset_secs: i64) -> Task {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        Task {
            id: TaskId::from(id),
            task_type: "text".to_string(),
            parameters: serde_json::Value::Null,
            priority,
            status: TaskStatus::Queued,
            created_at: base + Duration::seconds(offset_secs),
            started_at: None,
            completed_at: None,
            worker_id: None,
            error_message: None,
            retry_count: 0,
        }
    }

    fn ranked_ids(strategy: ClaimingStrategy, mut tasks: Vec<Task>) -> Vec<String> {
        strategy.rank(&mut tasks);
        tasks.into_iter().map(|t| t.id.0).collect()
    }

    #[test]
    fn test_fifo_orders_by_age_then_priority() {
        let tasks = vec![task("c", 1, 2), task("a", 1, 0), task("b", 9, 0)];
        assert_eq!(ranked_ids(ClaimingStrategy::Fifo, tasks), ["b", "a", "c"]);
    }

    #[test]
    fn test_lifo_orders_newest_first() {
        let tasks = vec![task("t1", 0, 0), task("t2", 0, 1), task("t3", 0, 2)];
        assert_eq!(ranked_ids(ClaimingStrategy::Lifo, tasks), ["t3", "t2", "t1"]);
    }

    #[test]
    fn test_priority_orders_by_priority_then_age() {
        let tasks = vec![task("A", 5, 0), task("B", 5, 1), task("C", 9, 2)];
        assert_eq!(
            ranked_ids(ClaimingStrategy::Priority, tasks),
            ["C", "A", "B"]
        );
    }

    #[test]
    fn test_ties_break_on_id() {
        let tasks = vec![task("b", 3, 0), task("a", 3, 0), task("c", 3, 0)];
        for strategy in [
            ClaimingStrategy::Fifo,
            ClaimingStrategy::Lifo,
            ClaimingStrategy::Priority,
        ] {
            assert_eq!(ranked_ids(strategy, tasks.clone()), ["a", "b", "c"]);
        }
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("FIFO".parse::<ClaimingStrategy>().unwrap(), ClaimingStrategy::Fifo);
        assert_eq!(
            "weighted".parse::<ClaimingStrategy>().unwrap(),
            ClaimingStrategy::WeightedRandom {
                top_n: DEFAULT_TOP_N,
                seed: None
            }
        );
        assert!("random".parse::<ClaimingStrategy>().is_err());
    }

    #[test]
    fn test_seeded_sampler_is_reproducible() {
        let weights = [1, 5, 10, 0, 3];
        let mut first = WeightedSampler::new(Some(42));
        let mut second = WeightedSampler::new(Some(42));
        let a: Vec<_> = (0..20).map(|_| first.choose(&weights)).collect();
        let b: Vec<_> = (0..20).map(|_| second.choose(&weights)).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_weight_never_chosen() {
        let mut sampler = WeightedSampler::new(Some(7));
        for _ in 0..200 {
            assert_ne!(sampler.choose(&[4, 0, 2]), Some(1));
        }
    }

    #[test]
    fn test_all_zero_weights_fall_back_to_uniform() {
        let mut sampler = WeightedSampler::new(Some(7));
        let pick = sampler.choose(&[0, 0, 0]).unwrap();
        assert!(pick < 3);
        assert_eq!(sampler.choose(&[]), None);
    }

    #[test]
    fn test_weighted_pick_stays_in_window() {
        let strategy = ClaimingStrategy::WeightedRandom {
            top_n: 2,
            seed: Some(1),
        };
        let mut tasks = vec![task("a", 1, 0), task("b", 8, 0), task("c", 4, 0)];
        strategy.rank(&mut tasks);
        let window = &tasks[..strategy.candidate_limit()];
        let mut sampler = WeightedSampler::new(strategy.seed());
        for _ in 0..50 {
            let idx = strategy.pick(window, &mut sampler).unwrap();
            assert!(window[idx].id.0 == "b" || window[idx].id.0 == "c");
        }
    }
}
