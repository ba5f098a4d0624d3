use std::collections::HashMap;

use parking_lot::Mutex;

use metrad_types::status_code::ScheduleCode;
use metrad_types::{make_error_msg, Result};

use crate::task::{Task, TaskState};

/// The scheduler's table of tasks, keyed by task id.
#[derive(Default)]
pub struct TaskCollection {
    table: Mutex<HashMap<String, Task>>,
}

impl TaskCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, task: Task) -> Result<()> {
        let mut table = self.table.lock();
        if table.contains_key(task.id()) {
            return make_error_msg(ScheduleCode::TASK_ALREADY_EXISTS, task.id().to_string());
        }
        table.insert(task.id().to_string(), task);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.table.lock().get(id).cloned()
    }

    /// Remove a task; it must be stopped or disabled first.
    pub fn remove(&self, id: &str) -> Result<Task> {
        let mut table = self.table.lock();
        let Some(task) = table.get(id) else {
            return make_error_msg(ScheduleCode::TASK_NOT_FOUND, id.to_string());
        };
        match task.state() {
            TaskState::Stopped | TaskState::Disabled => {}
            state => {
                return make_error_msg(
                    ScheduleCode::TASK_NOT_STOPPED,
                    format!("task {} is {}", id, state),
                )
            }
        }
        Ok(table.remove(id).expect("checked above"))
    }

    pub fn list(&self) -> Vec<Task> {
        self.table.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}
