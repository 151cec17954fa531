//! Worker pool shape.
//!
//! The plan is computed once, before any worker starts, and never changes
//! during a run.

use crate::config::DEFAULT_MAX_WORKERS;

/// Number of workers pinned to one accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceleratorAssignment {
    pub accelerator: usize,
    pub workers: usize,
}

/// One worker in the pool and the accelerator it is pinned to, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSlot {
    pub worker_id: usize,
    pub accelerator: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolPlan {
    total_workers: usize,
    assignments: Vec<AcceleratorAssignment>,
}

impl WorkerPoolPlan {
    /// Computes the pool shape for `items` work items.
    ///
    /// Accelerator regime (`accelerators > 0` and enabled):
    /// `max(1, min(items, cap or items, accelerators * per_accelerator))` workers,
    /// spread over `min(accelerators, total)` accelerators with the remainder
    /// going to the lowest ids. Otherwise every worker is interchangeable and
    /// the total is `max(1, min(items, cap or DEFAULT_MAX_WORKERS))`.
    pub fn compute(
        items: usize,
        user_cap: Option<usize>,
        accelerators: usize,
        per_accelerator: usize,
        use_accelerators: bool,
    ) -> Self {
        if !use_accelerators || accelerators == 0 || per_accelerator == 0 {
            return Self::generalist(items, user_cap);
        }

        let capacity = accelerators.saturating_mul(per_accelerator);
        let total_workers = items
            .min(user_cap.unwrap_or(items))
            .min(capacity)
            .max(1);

        let used = accelerators.min(total_workers);
        let base = total_workers / used;
        let remainder = total_workers % used;

        let assignments = (0..used)
            .map(|accelerator| AcceleratorAssignment {
                accelerator,
                workers: base + usize::from(accelerator < remainder),
            })
            .collect();

        Self {
            total_workers,
            assignments,
        }
    }

    pub fn generalist(items: usize, user_cap: Option<usize>) -> Self {
        let total_workers = items
            .min(user_cap.unwrap_or(DEFAULT_MAX_WORKERS))
            .max(1);
        Self {
            total_workers,
            assignments: Vec::new(),
        }
    }

    pub fn total_workers(&self) -> usize {
        self.total_workers
    }

    pub fn is_accelerated(&self) -> bool {
        !self.assignments.is_empty()
    }

    pub fn accelerators_used(&self) -> usize {
        self.assignments.len()
    }

    pub fn assignments(&self) -> &[AcceleratorAssignment] {
        &self.assignments
    }

    /// Worker slots in id order; pinned workers are grouped by accelerator.
    pub fn slots(&self) -> Vec<WorkerSlot> {
        if !self.is_accelerated() {
            return (0..self.total_workers)
                .map(|worker_id| WorkerSlot {
                    worker_id,
                    accelerator: None,
                })
                .collect();
        }

        self.assignments
            .iter()
            .flat_map(|a| std::iter::repeat(a.accelerator).take(a.workers))
            .enumerate()
            .map(|(worker_id, accelerator)| WorkerSlot {
                worker_id,
                accelerator: Some(accelerator),
            })
            .collect()
    }

    /// Accelerator queue for the item at `index` in the work set.
    ///
    /// Items are dealt to worker slots round-robin, so each accelerator
    /// receives work in proportion to its pinned workers. Returns `None` in
    /// the generalist regime, where all workers share one queue.
    pub fn route(&self, index: usize, slots: &[WorkerSlot]) -> Option<usize> {
        if slots.is_empty() {
            return None;
        }
        slots[index % slots.len()].accelerator
    }
}
