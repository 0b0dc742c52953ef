//! The preflight profiler.
//!
//! Before the real run, the VM can execute the program once in profiling
//! mode: output is counted instead of written, and the profiler watches for
//! loops that stop making progress, runaway recursion, and unbounded
//! allocation. It also records a
//! memory plan per allocation site so the real run can pre-size collections
//! and the allocator growth threshold.

use std::time::Instant;

use tracing::debug;

/// The plan table stops growing past this many entries.
pub const MAX_MEMORY_PLANS: usize = 8192;
/// A loop that has not made progress after this many iterations is flagged.
pub const MAX_LOOP_ITERATIONS: u64 = 10_000_000;
/// Wall-clock budget for the whole preflight run.
pub const PREFLIGHT_TIMEOUT_MS: u64 = 5000;
/// Frame-depth bound enforced during preflight.
pub const MAX_PREFLIGHT_RECURSION: usize = 256;
/// Loop progress is re-examined every this many iterations.
pub const LOOP_PROGRESS_CHECK_INTERVAL: u64 = 100_000;
/// Timeout and recursion are re-examined every this many instructions.
pub const INSTRUCTION_CHECK_INTERVAL: u64 = 10_000;

/// Per-site allocation record. The token is the allocation's identity: a
/// sequence number for fresh allocations, the owning collection's token for
/// growth events.
#[derive(Debug, Clone)]
pub struct MemoryPlan {
    pub token: u64,
    pub predicted_size: usize,
    pub max_observed_size: usize,
    pub growth_events: u32,
    pub access_count: u32,
}

/// Per-loop progress tracking. A loop's identity is the byte offset of its
/// LOOP instruction within its chunk.
#[derive(Debug)]
struct LoopProfile {
    loop_id: u64,
    iteration_count: u64,
    last_check_stack_depth: u64,
    last_check_allocations: u64,
    last_check_outputs: u64,
    potentially_infinite: bool,
}

#[derive(Debug, Default)]
pub struct Profiler {
    plans: Vec<MemoryPlan>,
    loops: Vec<LoopProfile>,

    pub total_allocations: u64,
    pub total_bytes_requested: u64,
    pub max_stack_depth: u64,
    pub max_recursion_depth: u64,
    pub output_operations: u64,

    pub profiling_mode: bool,
    pub preflight_complete: bool,
    pub infinite_loop_detected: bool,

    start: Option<Instant>,
}

impl Profiler {
    pub fn new() -> Profiler {
        Profiler::default()
    }

    /// Enter profiling mode with fresh counters and a fresh clock.
    pub fn begin(&mut self) {
        self.plans.clear();
        self.loops.clear();
        self.total_allocations = 0;
        self.total_bytes_requested = 0;
        self.max_stack_depth = 0;
        self.max_recursion_depth = 0;
        self.output_operations = 0;
        self.profiling_mode = true;
        self.preflight_complete = false;
        self.infinite_loop_detected = false;
        self.start = Some(Instant::now());
    }

    /// Record an allocation of `size` bytes under `token`. Repeat sightings
    /// of a token bump its access count and, if larger, its observed
    /// maximum; only first sightings count toward the totals.
    pub fn record_allocation(&mut self, token: u64, size: usize) {
        if !self.profiling_mode {
            return;
        }

        if let Some(plan) = self.plans.iter_mut().find(|p| p.token == token) {
            plan.access_count += 1;
            if size > plan.max_observed_size {
                plan.max_observed_size = size;
                plan.growth_events += 1;
            }
            return;
        }

        if self.plans.len() >= MAX_MEMORY_PLANS {
            return;
        }
        self.plans.push(MemoryPlan {
            token,
            predicted_size: size,
            max_observed_size: size,
            growth_events: 0,
            access_count: 1,
        });
        self.total_allocations += 1;
        self.total_bytes_requested += size as u64;
    }

    /// Record that the allocation identified by `token` grew to `new_size`.
    pub fn record_growth(&mut self, token: u64, new_size: usize) {
        if !self.profiling_mode {
            return;
        }
        if let Some(plan) = self.plans.iter_mut().find(|p| p.token == token)
            && new_size > plan.max_observed_size
        {
            plan.max_observed_size = new_size;
            plan.growth_events += 1;
        }
    }

    pub fn find_plan(&self, token: u64) -> Option<&MemoryPlan> {
        self.plans.iter().find(|p| p.token == token)
    }

    /// Count one loop back-edge and, at the progress-check interval, compare
    /// allocation, stack-depth, and output counters against the previous
    /// snapshot. Returns `false` when the loop has spun past the iteration
    /// bound without any of them moving.
    pub fn record_loop_iteration(&mut self, loop_id: u64, stack_depth: u64) -> bool {
        if !self.profiling_mode {
            return true;
        }

        let total_allocations = self.total_allocations;
        let output_operations = self.output_operations;

        let loop_profile = match self.loops.iter_mut().find(|l| l.loop_id == loop_id) {
            Some(profile) => profile,
            None => {
                self.loops.push(LoopProfile {
                    loop_id,
                    iteration_count: 0,
                    last_check_stack_depth: stack_depth,
                    last_check_allocations: total_allocations,
                    last_check_outputs: output_operations,
                    potentially_infinite: false,
                });
                self.loops.last_mut().expect("just pushed")
            }
        };

        loop_profile.iteration_count += 1;

        if loop_profile.iteration_count % LOOP_PROGRESS_CHECK_INTERVAL == 0 {
            let progress = total_allocations > loop_profile.last_check_allocations
                || stack_depth != loop_profile.last_check_stack_depth
                || output_operations > loop_profile.last_check_outputs;

            loop_profile.last_check_allocations = total_allocations;
            loop_profile.last_check_stack_depth = stack_depth;
            loop_profile.last_check_outputs = output_operations;

            if !progress && loop_profile.iteration_count > MAX_LOOP_ITERATIONS {
                loop_profile.potentially_infinite = true;
                self.infinite_loop_detected = true;
                return false;
            }
        }

        true
    }

    /// Whether the preflight wall-clock budget is exhausted.
    pub fn timed_out(&self) -> bool {
        if !self.profiling_mode {
            return false;
        }
        self.elapsed_ms() > PREFLIGHT_TIMEOUT_MS
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    /// Track the deepest call-frame depth seen; returns `false` once it
    /// exceeds the preflight recursion bound.
    pub fn check_recursion_depth(&mut self, depth: usize) -> bool {
        if !self.profiling_mode {
            return true;
        }
        if depth as u64 > self.max_recursion_depth {
            self.max_recursion_depth = depth as u64;
        }
        depth < MAX_PREFLIGHT_RECURSION
    }

    pub fn note_output(&mut self) {
        self.output_operations += 1;
    }

    pub fn note_stack_depth(&mut self, depth: usize) {
        if self.profiling_mode && depth as u64 > self.max_stack_depth {
            self.max_stack_depth = depth as u64;
        }
    }

    /// Emit the post-run profile at debug level.
    pub fn log_summary(&self) {
        debug!(
            total_allocations = self.total_allocations,
            total_bytes = self.total_bytes_requested,
            max_stack_depth = self.max_stack_depth,
            max_recursion_depth = self.max_recursion_depth,
            output_operations = self.output_operations,
            elapsed_ms = self.elapsed_ms(),
            plans = self.plans.len(),
            loops = self.loops.len(),
            infinite_loop = self.infinite_loop_detected,
            "preflight profile"
        );
        let mut top: Vec<&MemoryPlan> = self.plans.iter().collect();
        top.sort_by(|a, b| b.max_observed_size.cmp(&a.max_observed_size));
        for plan in top.iter().take(10) {
            debug!(
                token = plan.token,
                predicted = plan.predicted_size,
                max = plan.max_observed_size,
                growth = plan.growth_events,
                accesses = plan.access_count,
                "memory plan"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_only_recorded_in_profiling_mode() {
        let mut profiler = Profiler::new();
        profiler.record_allocation(1, 64);
        assert_eq!(profiler.total_allocations, 0);

        profiler.begin();
        profiler.record_allocation(1, 64);
        assert_eq!(profiler.total_allocations, 1);
        assert_eq!(profiler.total_bytes_requested, 64);
    }

    #[test]
    fn repeated_tokens_grow_the_plan_not_the_totals() {
        let mut profiler = Profiler::new();
        profiler.begin();
        profiler.record_allocation(7, 16);
        profiler.record_allocation(7, 48);
        profiler.record_allocation(7, 32);

        assert_eq!(profiler.total_allocations, 1);
        let plan = profiler.find_plan(7).unwrap();
        assert_eq!(plan.predicted_size, 16);
        assert_eq!(plan.max_observed_size, 48);
        assert_eq!(plan.growth_events, 1);
        assert_eq!(plan.access_count, 3);
    }

    #[test]
    fn growth_events_track_the_maximum() {
        let mut profiler = Profiler::new();
        profiler.begin();
        profiler.record_allocation(3, 8);
        profiler.record_growth(3, 32);
        profiler.record_growth(3, 16);
        let plan = profiler.find_plan(3).unwrap();
        assert_eq!(plan.max_observed_size, 32);
        assert_eq!(plan.growth_events, 1);
    }

    #[test]
    fn plan_table_is_capped() {
        let mut profiler = Profiler::new();
        profiler.begin();
        for token in 0..(MAX_MEMORY_PLANS as u64 + 100) {
            profiler.record_allocation(token, 1);
        }
        assert_eq!(profiler.total_allocations, MAX_MEMORY_PLANS as u64);
    }

    #[test]
    fn stagnant_loop_is_flagged_after_the_bound() {
        let mut profiler = Profiler::new();
        profiler.begin();
        let mut aborted = false;
        for _ in 0..(MAX_LOOP_ITERATIONS + LOOP_PROGRESS_CHECK_INTERVAL) {
            if !profiler.record_loop_iteration(42, 3) {
                aborted = true;
                break;
            }
        }
        assert!(aborted);
        assert!(profiler.infinite_loop_detected);
    }

    #[test]
    fn progressing_loop_is_not_flagged() {
        let mut profiler = Profiler::new();
        profiler.begin();
        let mut token = 0;
        for i in 0..(MAX_LOOP_ITERATIONS + LOOP_PROGRESS_CHECK_INTERVAL) {
            // An allocation per check interval counts as progress.
            if i % LOOP_PROGRESS_CHECK_INTERVAL == 0 {
                profiler.record_allocation(token, 8);
                token += 1;
            }
            assert!(profiler.record_loop_iteration(42, 3));
        }
        assert!(!profiler.infinite_loop_detected);
    }

    #[test]
    fn recursion_depth_bound() {
        let mut profiler = Profiler::new();
        profiler.begin();
        assert!(profiler.check_recursion_depth(10));
        assert!(profiler.check_recursion_depth(MAX_PREFLIGHT_RECURSION - 1));
        assert!(!profiler.check_recursion_depth(MAX_PREFLIGHT_RECURSION));
        assert_eq!(profiler.max_recursion_depth, MAX_PREFLIGHT_RECURSION as u64);
    }
}
