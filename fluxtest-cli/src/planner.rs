//! Test Planner
//!
//! Builds the execution plan for one run from the ids a worker discovered.
//!
//! - Filtering: optional regex on the test id
//! - Ordering: ids are sorted and deduplicated so every run sees the same order
//! - Partitioning: round-robin by position across ready workers
//! - Seeds: each test gets a seed derived from the run's base seed, the fuzz
//!   iteration count and its own id, so it does not depend on which worker
//!   runs it or how many workers there are

use fluxtest_ipc::TestAssignment;
use regex::Regex;

/// Execution plan for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Ordered test ids to run
    pub tests: Vec<String>,
}

/// Build execution plan from discovered test ids
pub fn build_plan(
    discovered: impl IntoIterator<Item = String>,
    filter: Option<&Regex>,
) -> ExecutionPlan {
    let mut tests: Vec<String> = discovered
        .into_iter()
        .filter(|id| filter.is_none_or(|re| re.is_match(id)))
        .collect();

    tests.sort();
    tests.dedup();

    ExecutionPlan { tests }
}

impl ExecutionPlan {
    /// Number of tests in the plan
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Whether the plan selects no tests
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Split the plan across `worker_count` workers and attach seeds.
    ///
    /// Always returns exactly `worker_count` shards; shards may be empty when
    /// there are fewer tests than workers.
    pub fn assign(
        &self,
        worker_count: usize,
        base_seed: u64,
        fuzz_iterations: u32,
    ) -> Vec<Vec<TestAssignment>> {
        partition(&self.tests, worker_count)
            .into_iter()
            .map(|shard| {
                shard
                    .into_iter()
                    .map(|test_id| TestAssignment {
                        seed: derive_seed(base_seed, fuzz_iterations, &test_id),
                        test_id,
                    })
                    .collect()
            })
            .collect()
    }
}

/// Round-robin partition: the test at position `i` goes to shard `i % n`.
pub fn partition(tests: &[String], worker_count: usize) -> Vec<Vec<String>> {
    let worker_count = worker_count.max(1);
    let mut shards: Vec<Vec<String>> = vec![Vec::new(); worker_count];
    for (position, id) in tests.iter().enumerate() {
        shards[position % worker_count].push(id.clone());
    }
    shards
}

/// Base seed for a run: the explicit one, or a fresh 32-bit value
pub fn effective_seed(explicit: Option<u64>) -> u64 {
    explicit.unwrap_or_else(|| u64::from(rand::random::<u32>()))
}

/// Per-test seed. Stable across platforms and releases: FNV-1a over the id,
/// then one splitmix64 round over the combination.
pub fn derive_seed(base_seed: u64, fuzz_iterations: u32, test_id: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in test_id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    let mut z = base_seed
        ^ hash.rotate_left(17)
        ^ u64::from(fuzz_iterations).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
