use std::sync::{Condvar, Mutex};

use pfq_common::{PfqError, Result, TaskId};

use crate::close::Close;

type Forward<T> = Box<dyn FnOnce() -> TaskResult<T> + Send>;

enum Outcome<T: Close> {
    Value(T),
    Failure(PfqError),
    /// Ownership moved to another task; resolving blocks until it finishes.
    Deferred(Forward<T>),
}

/// Outcome of one task run: a closeable value or a failure, never both.
///
/// A deferred result forwards to another task's result. Closing it is a no-op: the
/// value it would resolve to is owned by whoever resolves it.
pub struct TaskResult<T: Close> {
    outcome: Outcome<T>,
}

impl<T: Close> std::fmt::Debug for TaskResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            Outcome::Value(_) => f.write_str("TaskResult::Value"),
            Outcome::Failure(e) => write!(f, "TaskResult::Failure({e})"),
            Outcome::Deferred(_) => f.write_str("TaskResult::Deferred"),
        }
    }
}

impl<T: Close> TaskResult<T> {
    pub fn value(value: T) -> Self {
        Self {
            outcome: Outcome::Value(value),
        }
    }

    pub fn failure(error: PfqError) -> Self {
        Self {
            outcome: Outcome::Failure(error),
        }
    }

    pub fn deferred(forward: impl FnOnce() -> TaskResult<T> + Send + 'static) -> Self {
        Self {
            outcome: Outcome::Deferred(Box::new(forward)),
        }
    }

    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(v) => Self::value(v),
            Err(e) => Self::failure(e),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failure(_))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.outcome, Outcome::Deferred(_))
    }

    /// Take the value out, blocking first if the result is deferred.
    pub fn into_result(self) -> Result<T> {
        match self.outcome {
            Outcome::Value(v) => Ok(v),
            Outcome::Failure(e) => Err(e),
            Outcome::Deferred(forward) => forward().into_result(),
        }
    }

    /// Release an unread value. Failures and deferred results own nothing.
    pub fn close(self) -> Result<()> {
        match self.outcome {
            Outcome::Value(mut v) => v.close(),
            Outcome::Failure(_) | Outcome::Deferred(_) => Ok(()),
        }
    }
}

enum SlotState<T: Close> {
    Pending,
    Ready(TaskResult<T>),
    Taken,
}

/// One-shot rendezvous between a task and its single consumer.
pub(crate) struct ResultSlot<T: Close> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T: Close> ResultSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
        }
    }

    /// Store the task's result. A second completion is refused and handed back.
    pub(crate) fn complete(&self, result: TaskResult<T>) -> std::result::Result<(), TaskResult<T>> {
        let mut state = self.state.lock().expect("result slot lock poisoned");
        if !matches!(*state, SlotState::Pending) {
            return Err(result);
        }
        *state = SlotState::Ready(result);
        self.ready.notify_all();
        Ok(())
    }

    pub(crate) fn is_complete(&self) -> bool {
        !matches!(
            *self.state.lock().expect("result slot lock poisoned"),
            SlotState::Pending
        )
    }

    /// Block until the result is stored and take it; the result is handed out once.
    pub(crate) fn wait(&self, task_id: TaskId) -> TaskResult<T> {
        let mut state = self.state.lock().expect("result slot lock poisoned");
        while matches!(*state, SlotState::Pending) {
            state = self.ready.wait(state).expect("result slot lock poisoned");
        }
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Ready(result) => result,
            _ => TaskResult::failure(PfqError::Execution(format!(
                "result of task {task_id} was already consumed"
            ))),
        }
    }
}
