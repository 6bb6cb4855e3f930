//! Drag-and-drop reordering and column reassignment.
//!
//! The presentation layer forwards pointer/keyboard gestures here as
//! [`DragEvent`]s. Moves are applied to the [`TaskStore`] live while the
//! pointer travels so every render sees the card where it would land.
//! Ending the drag turns the net change into a single [`MoveCommit`];
//! cancelling restores the store captured when the drag started.
//!
//! Drop-target resolution order for `over` events:
//!
//! | Target                          | Effect                                   |
//! |---------------------------------|------------------------------------------|
//! | task in another column          | take its column and its sequence index   |
//! | task in the same column         | take its sequence index                  |
//! | column (empty space)            | join it, after its last task             |
//! | anything else                   | ignored                                  |

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::columns::ColumnRegistry;
use super::models::{MoveCommit, Task};
use super::store::TaskStore;
use crate::errors::DragError;

/// What the pointer is over, resolved once per `over` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropTarget {
    Task(String),
    Column(String),
    None,
}

impl DropTarget {
    /// Classify an element id. Task ids win over column ids on a clash,
    /// since a card always sits on top of its column.
    pub fn resolve(store: &TaskStore, columns: &ColumnRegistry, over_id: Option<&str>) -> Self {
        match over_id {
            Some(id) if store.get(id).is_some() => Self::Task(id.to_string()),
            Some(id) if columns.contains(id) => Self::Column(id.to_string()),
            _ => Self::None,
        }
    }
}

/// A gesture callback from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DragEvent {
    Start {
        task_id: String,
    },
    Over {
        active_id: String,
        over_id: Option<String>,
    },
    End,
    Cancel,
}

/// Result of feeding one event to the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DragOutcome {
    Started {
        task_id: String,
    },
    Moved {
        task_id: String,
        column: String,
        index: usize,
    },
    /// A valid event that did not change anything.
    Unchanged,
    Ignored {
        #[serde(serialize_with = "serialize_display")]
        reason: DragError,
    },
    Ended {
        commit: Option<MoveCommit>,
    },
    Cancelled {
        reverted: bool,
    },
}

fn serialize_display<S: serde::Serializer>(err: &DragError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}

impl DragOutcome {
    fn ignored(reason: DragError) -> Self {
        debug!(%reason, "Drag event ignored");
        Self::Ignored { reason }
    }

    /// Whether the task store may have changed.
    pub fn mutated(&self) -> bool {
        matches!(
            self,
            Self::Moved { .. } | Self::Cancelled { reverted: true }
        )
    }
}

/// State of one in-progress gesture.
#[derive(Debug, Clone)]
pub struct DragSession {
    pub active_task_id: String,
    pub origin_column: String,
    /// Last target that was resolved, used to make repeated `over`
    /// events with the same target no-ops.
    pub current_over: Option<String>,
    snapshot: Vec<Task>,
}

#[derive(Debug, Default)]
pub struct DragController {
    session: Option<DragSession>,
}

impl DragController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&DragSession> {
        self.session.as_ref()
    }

    pub fn is_dragging(&self) -> bool {
        self.session.is_some()
    }

    /// Id of the card being dragged, for the overlay/placeholder.
    pub fn active_task_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.active_task_id.as_str())
    }

    /// Task list as it stood before the open drag's moves, with outside
    /// changes applied. `None` when no drag is open.
    pub fn baseline(&self) -> Option<&[Task]> {
        self.session.as_ref().map(|s| s.snapshot.as_slice())
    }

    /// Record a task created while a drag is open so a cancel keeps it.
    pub fn track_created(&mut self, task: &Task) {
        if let Some(session) = self.session.as_mut() {
            session.snapshot.push(task.clone());
        }
    }

    /// Record a column change made outside the gesture while a drag is open.
    ///
    /// A cancel restores the changed column, and a change to the dragged card
    /// becomes its new origin.
    pub fn track_column_change(&mut self, task_id: &str, column: &str, status: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(task) = session.snapshot.iter_mut().find(|t| t.id == task_id) {
            task.column = column.to_string();
            task.status = status.to_string();
        }
        if session.active_task_id == task_id {
            session.origin_column = column.to_string();
            session.current_over = None;
        }
    }

    /// Dispatch a queued gesture event.
    pub fn handle(
        &mut self,
        store: &mut TaskStore,
        columns: &ColumnRegistry,
        event: DragEvent,
    ) -> DragOutcome {
        match event {
            DragEvent::Start { task_id } => self.on_drag_start(store, &task_id),
            DragEvent::Over { active_id, over_id } => {
                self.on_drag_over(store, columns, &active_id, over_id.as_deref())
            }
            DragEvent::End => self.on_drag_end(store, columns),
            DragEvent::Cancel => self.on_drag_cancel(store),
        }
    }

    pub fn on_drag_start(&mut self, store: &TaskStore, dragged_id: &str) -> DragOutcome {
        if let Some(session) = &self.session {
            return DragOutcome::ignored(DragError::SessionActive {
                active: session.active_task_id.clone(),
            });
        }
        let Some(task) = store.get(dragged_id) else {
            return DragOutcome::ignored(DragError::UnknownId {
                id: dragged_id.to_string(),
            });
        };

        debug!(task_id = %dragged_id, column = %task.column, "Drag started");
        self.session = Some(DragSession {
            active_task_id: dragged_id.to_string(),
            origin_column: task.column.clone(),
            current_over: None,
            snapshot: store.tasks().to_vec(),
        });
        DragOutcome::Started {
            task_id: dragged_id.to_string(),
        }
    }

    pub fn on_drag_over(
        &mut self,
        store: &mut TaskStore,
        columns: &ColumnRegistry,
        active_id: &str,
        over_id: Option<&str>,
    ) -> DragOutcome {
        let Some(session) = self.session.as_mut() else {
            return DragOutcome::ignored(DragError::NoSession);
        };
        if session.active_task_id != active_id {
            return DragOutcome::ignored(DragError::UnknownId {
                id: active_id.to_string(),
            });
        }
        let Some(over_id) = over_id else {
            session.current_over = None;
            return DragOutcome::Unchanged;
        };
        if over_id == active_id || session.current_over.as_deref() == Some(over_id) {
            return DragOutcome::Unchanged;
        }
        let Some(active_index) = store.index_of(active_id) else {
            return DragOutcome::ignored(DragError::UnknownId {
                id: active_id.to_string(),
            });
        };

        let target = DropTarget::resolve(store, columns, Some(over_id));
        let (column, index) = match target {
            DropTarget::Task(ref over_task) => {
                let Some(over_index) = store.index_of(over_task) else {
                    return DragOutcome::ignored(DragError::UnknownId {
                        id: over_task.clone(),
                    });
                };
                let over_column = store.tasks()[over_index].column.clone();
                if store.tasks()[active_index].column != over_column {
                    store.set_column(active_id, &over_column);
                }
                store.move_to(active_index, over_index);
                (over_column, over_index)
            }
            DropTarget::Column(ref column) => {
                if store.tasks()[active_index].column == *column {
                    session.current_over = Some(over_id.to_string());
                    return DragOutcome::Unchanged;
                }
                let to = match store.last_index_in_column(column) {
                    Some(last) if last > active_index => last,
                    Some(last) => last + 1,
                    None => active_index,
                };
                store.set_column(active_id, column);
                store.move_to(active_index, to);
                (column.clone(), to)
            }
            DropTarget::None => {
                return DragOutcome::ignored(DragError::InvalidTarget {
                    target: over_id.to_string(),
                });
            }
        };

        session.current_over = Some(over_id.to_string());
        debug!(task_id = %active_id, over = %over_id, column = %column, index, "Drag moved task");
        DragOutcome::Moved {
            task_id: active_id.to_string(),
            column,
            index,
        }
    }

    /// Close the session and keep the store as the last `over` left it.
    ///
    /// Produces a commit only when the store differs from the drag-start
    /// snapshot, and then exactly one, carrying the final column.
    pub fn on_drag_end(&mut self, store: &mut TaskStore, columns: &ColumnRegistry) -> DragOutcome {
        let Some(session) = self.session.take() else {
            return DragOutcome::ignored(DragError::NoSession);
        };
        if store.tasks() == session.snapshot.as_slice() {
            debug!(task_id = %session.active_task_id, "Drag ended without changes");
            return DragOutcome::Ended { commit: None };
        }

        let status = match store.get(&session.active_task_id) {
            Some(task) => columns.status_for(&task.column),
            None => return DragOutcome::Ended { commit: None },
        };
        let Some(task) = store.get_mut(&session.active_task_id) else {
            return DragOutcome::Ended { commit: None };
        };
        task.status = status.clone();
        let column = task.column.clone();

        debug!(
            task_id = %session.active_task_id,
            from = %session.origin_column,
            to = %column,
            "Drag ended"
        );
        DragOutcome::Ended {
            commit: Some(MoveCommit {
                task_id: session.active_task_id,
                from_column: session.origin_column,
                column,
                status,
                tasks: store.tasks().to_vec(),
            }),
        }
    }

    /// Close the session and put every card back where it was at drag start.
    ///
    /// Moves are speculative until `on_drag_end`; a cancelled gesture must
    /// not leave a half-finished reorder on screen with nothing persisted.
    pub fn on_drag_cancel(&mut self, store: &mut TaskStore) -> DragOutcome {
        let Some(session) = self.session.take() else {
            return DragOutcome::ignored(DragError::NoSession);
        };
        let reverted = store.tasks() != session.snapshot.as_slice();
        if reverted {
            store.restore(session.snapshot);
        }
        debug!(task_id = %session.active_task_id, reverted, "Drag cancelled");
        DragOutcome::Cancelled { reverted }
    }
}
