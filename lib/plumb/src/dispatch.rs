use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A unit of work posted onto the host's main thread.
pub type Task = Box<dyn FnOnce() + Send>;

/// Contract for posting callbacks onto the host's main/observer thread. The
/// engine never runs observer code on its own worker; everything it wants to
/// tell the application goes through here, in posting order.
pub trait Dispatch: Send + Sync {
    fn post(&self, task: Task);
}

/// Queue-backed dispatcher for hosts (and tests) that pump tasks from their
/// own loop. Tasks run in the order they were posted.
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    signal: Condvar,
}

impl TaskQueue {
    pub fn new() -> TaskQueue {
        TaskQueue {
            tasks: Mutex::new(VecDeque::new()),
            signal: Condvar::new(),
        }
    }

    /// Runs every task currently queued and returns how many ran.
    pub fn run_pending(&self) -> usize {
        let drained: Vec<Task> = {
            let mut tasks = self.lock();
            tasks.drain(..).collect()
        };

        let count = drained.len();
        for task in drained {
            task();
        }

        count
    }

    /// Blocks until at least one task is queued or the timeout elapses.
    /// Returns true if work is available.
    pub fn wait_pending(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut tasks = self.lock();

        while tasks.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            let (guard, _) = self
                .signal
                .wait_timeout(tasks, deadline - now)
                .expect("Task queue lock poisoned");
            tasks = guard;
        }

        true
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[inline]
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Task>> {
        self.tasks.lock().expect("Task queue lock poisoned")
    }
}

impl Default for TaskQueue {
    fn default() -> TaskQueue {
        TaskQueue::new()
    }
}

impl Dispatch for TaskQueue {
    fn post(&self, task: Task) {
        self.lock().push_back(task);
        self.signal.notify_all();
    }
}
