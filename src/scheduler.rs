//! Simulated clock and ordered queue of pending tasks.

use std::collections::BTreeMap;

use crate::task::Task;

/// Handle to a scheduled task. Handles order tasks by fire time first and by
/// scheduling order second, which makes execution order deterministic for
/// tasks sharing a fire time.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct TaskId {
    fire_time: u64,
    seq: u64,
}

impl TaskId {
    /// Absolute simulated time (ms) at which the task fires.
    pub fn fire_time(&self) -> u64 {
        self.fire_time
    }
}

/// Global ordered queue of pending [Tasks](Task). Simulated time only moves
/// forward when a task is popped.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    queue: BTreeMap<TaskId, Task>,
    current_time: u64,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `task` to fire `delay` ms after the current time.
    pub fn schedule(&mut self, task: Task, delay: u64) -> TaskId {
        self.schedule_at(task, self.current_time.saturating_add(delay))
    }

    /// Schedules `task` at an absolute time. Times in the past are clamped to
    /// the current time.
    pub fn schedule_at(&mut self, task: Task, fire_time: u64) -> TaskId {
        let id = TaskId {
            fire_time: fire_time.max(self.current_time),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.queue.insert(id, task);

        id
    }

    /// Returns the earliest pending task without removing it.
    #[inline]
    pub fn peek(&self) -> Option<(TaskId, &Task)> {
        self.queue.first_key_value().map(|(&id, task)| (id, task))
    }

    /// Removes and returns the earliest pending task, advancing the clock to
    /// its fire time.
    pub fn pop(&mut self) -> Option<(TaskId, Task)> {
        let (id, task) = self.queue.pop_first()?;
        self.current_time = id.fire_time;

        Some((id, task))
    }

    /// Removes a pending task. Returns false if the task already fired or was
    /// cancelled before.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        self.queue.remove(&id).is_some()
    }

    /// Fire time of the most recently popped task.
    #[inline]
    pub fn current_time(&self) -> u64 {
        self.current_time
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::Scheduler;
    use crate::task::Task;

    fn churn(node: u64) -> Task {
        Task::Churn { node: node.into() }
    }

    #[test]
    fn pops_in_time_then_insertion_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(churn(1), 50);
        scheduler.schedule(churn(2), 10);
        scheduler.schedule(churn(3), 50);
        scheduler.schedule(churn(4), 10);

        let order: Vec<_> = std::iter::from_fn(|| scheduler.pop())
            .map(|(id, task)| (id.fire_time(), task))
            .collect();

        assert_eq!(
            order,
            vec![(10, churn(2)), (10, churn(4)), (50, churn(1)), (50, churn(3))]
        );
        assert_eq!(scheduler.current_time(), 50);
    }

    #[test]
    fn clock_moves_only_on_pop() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(churn(1), 100);

        assert_eq!(scheduler.current_time(), 0);
        assert_eq!(scheduler.peek().map(|(id, _)| id.fire_time()), Some(100));
        assert_eq!(scheduler.current_time(), 0);

        scheduler.pop();
        let id = scheduler.schedule(churn(2), 5);
        assert_eq!(id.fire_time(), 105);
    }

    #[test]
    fn cancelled_tasks_never_fire() {
        let mut scheduler = Scheduler::new();
        let first = scheduler.schedule(churn(1), 10);
        let second = scheduler.schedule(churn(2), 20);

        assert!(scheduler.cancel(second));
        assert!(!scheduler.cancel(second));

        let (popped, _) = scheduler.pop().unwrap();
        assert_eq!(popped, first);
        assert!(!scheduler.cancel(first));
        assert!(scheduler.pop().is_none());
    }
}
