//! The fixed, ordered set of columns that partitions the task store.

use anyhow::{Result, bail};

use super::models::Column;

/// Columns of a board, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRegistry {
    columns: Vec<Column>,
}

impl Default for ColumnRegistry {
    fn default() -> Self {
        Self {
            columns: default_columns(),
        }
    }
}

/// The five workflow stages the board ships with.
pub fn default_columns() -> Vec<Column> {
    vec![
        Column::new("backlog", "Backlog"),
        Column::new("assigned", "Assigned"),
        Column::new("in-progress", "In Progress"),
        Column::new("review", "Review"),
        Column::new("done", "Done"),
    ]
}

impl ColumnRegistry {
    /// Build a registry, rejecting an empty set, empty ids and duplicates.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if columns.is_empty() {
            bail!("A board needs at least one column");
        }
        for (i, column) in columns.iter().enumerate() {
            if column.id.trim().is_empty() {
                bail!("Column {} has an empty id", i);
            }
            if columns[..i].iter().any(|c| c.id == column.id) {
                bail!("Duplicate column id '{}'", column.id);
            }
        }
        Ok(Self { columns })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.columns.iter().any(|c| c.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn first(&self) -> &Column {
        // `new` guarantees at least one column.
        &self.columns[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Human-readable status stored alongside a task's column.
    ///
    /// Unknown columns fall back to the first column's title.
    pub fn status_for(&self, column_id: &str) -> String {
        self.get(column_id)
            .unwrap_or_else(|| self.first())
            .title
            .clone()
    }
}
