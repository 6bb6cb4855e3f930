//! Ordered task sequence.
//!
//! A task's position in the sequence is its render order inside its column;
//! the columns themselves are just a filter over the one combined list.

use super::columns::ColumnRegistry;
use super::models::{BoardView, ColumnView, Task};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStore {
    tasks: Vec<Task>,
}

impl TaskStore {
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    pub fn tasks_in_column<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks.iter().filter(move |t| t.column == column)
    }

    pub fn count_in_column(&self, column: &str) -> usize {
        self.tasks_in_column(column).count()
    }

    /// Index of the last task belonging to `column`, if it has any.
    pub fn last_index_in_column(&self, column: &str) -> Option<usize> {
        self.tasks.iter().rposition(|t| t.column == column)
    }

    /// Remove the task at `from` and reinsert it at `to`.
    ///
    /// Out-of-range indices leave the store untouched.
    pub fn move_to(&mut self, from: usize, to: usize) {
        if from >= self.tasks.len() || to >= self.tasks.len() || from == to {
            return;
        }
        let task = self.tasks.remove(from);
        self.tasks.insert(to, task);
    }

    /// Reassign a task's column. Returns false when the id is unknown.
    pub fn set_column(&mut self, id: &str, column: &str) -> bool {
        match self.tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.column = column.to_string();
                true
            }
            None => false,
        }
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn push(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Replace the whole sequence, e.g. with a drag-start snapshot.
    pub fn restore(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
    }

    /// Group tasks by column in registry order.
    pub fn board_view(
        &self,
        columns: &ColumnRegistry,
        active_task_id: Option<String>,
        last_updated: String,
    ) -> BoardView {
        let columns = columns
            .iter()
            .map(|col| ColumnView {
                id: col.id.clone(),
                title: col.title.clone(),
                tasks: self.tasks_in_column(&col.id).cloned().collect(),
            })
            .collect();
        BoardView {
            columns,
            active_task_id,
            last_updated,
        }
    }
}
