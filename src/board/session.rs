//! The board session: single owner of the task store, column registry,
//! drag controller and persistence version.
//!
//! Every caller goes through a cloneable [`BoardHandle`]. Events are applied
//! one at a time under the handle's lock, so readers only ever observe fully
//! applied transitions. Writes to the repository are queued to a single
//! commit worker, which keeps them in order and off the board lock.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::columns::ColumnRegistry;
use super::drag::{DragController, DragEvent, DragOutcome};
use super::models::{BoardView, NewTask, Task, TaskData};
use super::persistence::{TaskRepository, WriteOutcome};
use super::store::TaskStore;
use super::ws::{WsMessage, broadcast_message};
use crate::errors::{BoardError, PersistenceError};

/// Capacity of the WebSocket broadcast channel.
const EVENT_CAPACITY: usize = 256;

pub struct BoardSession {
    store: TaskStore,
    columns: ColumnRegistry,
    controller: DragController,
    version: String,
    last_updated: String,
    /// Commits queued but not yet answered by the repository.
    pending_commits: usize,
    /// Bumped on every queued local change. A refresh whose read spans a
    /// bump is discarded.
    generation: u64,
}

impl BoardSession {
    fn new(columns: ColumnRegistry, data: TaskData, version: String) -> Self {
        let tasks = normalize_columns(&columns, data.tasks);
        Self {
            store: TaskStore::from_tasks(tasks),
            columns,
            controller: DragController::new(),
            version,
            last_updated: data.last_updated,
            pending_commits: 0,
            generation: 0,
        }
    }

    fn task_data(&self) -> TaskData {
        TaskData {
            tasks: self.store.tasks().to_vec(),
            last_updated: self.last_updated.clone(),
        }
    }

    fn board_updated(&self) -> WsMessage {
        WsMessage::BoardUpdated {
            tasks: self.store.tasks().to_vec(),
            active_task_id: self.controller.active_task_id().map(str::to_string),
        }
    }

    /// Task list to persist for a change made outside a gesture. An open
    /// drag's speculative moves are left out.
    fn settled_tasks(&self) -> Vec<Task> {
        self.controller
            .baseline()
            .unwrap_or(self.store.tasks())
            .to_vec()
    }

    fn is_busy(&self) -> bool {
        self.controller.is_dragging() || self.pending_commits > 0
    }

    fn touch(&mut self) -> String {
        self.last_updated = now_iso();
        self.last_updated.clone()
    }

    fn next_task_id(&self) -> String {
        let mut millis = Utc::now().timestamp_millis();
        loop {
            let id = format!("task-{}", millis);
            if self.store.get(&id).is_none() {
                return id;
            }
            millis += 1;
        }
    }
}

/// Reassign tasks that name a column the registry does not know.
fn normalize_columns(columns: &ColumnRegistry, tasks: Vec<Task>) -> Vec<Task> {
    let fallback = columns.first().id.clone();
    tasks
        .into_iter()
        .map(|mut task| {
            if !columns.contains(&task.column) {
                warn!(
                    task_id = %task.id,
                    column = %task.column,
                    fallback = %fallback,
                    "Task references unknown column, moving it to the first column"
                );
                task.column = fallback.clone();
            }
            task
        })
        .collect()
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Drag outcome plus the store as it stands afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedEvent {
    #[serde(flatten)]
    pub outcome: DragOutcome,
    pub tasks: Vec<Task>,
    pub active_task_id: Option<String>,
}

/// What [`BoardHandle::refresh`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Reloaded,
    Unchanged,
    /// A drag or a commit was in flight; the remote copy was not applied.
    Deferred,
}

type CommitReply = oneshot::Sender<Result<String, PersistenceError>>;

enum CommitJob {
    Write {
        task_id: String,
        data: TaskData,
        reply: Option<CommitReply>,
    },
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to the board session.
#[derive(Clone)]
pub struct BoardHandle {
    inner: Arc<Mutex<BoardSession>>,
    repo: Arc<dyn TaskRepository>,
    commits: mpsc::UnboundedSender<CommitJob>,
    events: broadcast::Sender<String>,
}

impl BoardHandle {
    /// Read the stored task list and start the commit worker.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn load(
        repo: Arc<dyn TaskRepository>,
        columns: ColumnRegistry,
    ) -> Result<Self, BoardError> {
        let snapshot = repo.read().await?;
        info!(
            store = %repo.describe(),
            tasks = snapshot.data.tasks.len(),
            version = %snapshot.version,
            "Loaded task list"
        );

        let inner = Arc::new(Mutex::new(BoardSession::new(
            columns,
            snapshot.data,
            snapshot.version,
        )));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (commits, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_commit_worker(
            Arc::clone(&inner),
            Arc::clone(&repo),
            events.clone(),
            rx,
        ));

        Ok(Self {
            inner,
            repo,
            commits,
            events,
        })
    }

    /// Sender the WebSocket layer subscribes to.
    pub fn events(&self) -> broadcast::Sender<String> {
        self.events.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    pub fn describe_store(&self) -> String {
        self.repo.describe()
    }

    /// Re-read the repository and replace the local list if it changed.
    ///
    /// Skipped while a drag is open or a commit is queued, since either would
    /// be clobbered by the remote copy. The read happens off the lock, so a
    /// change queued while it was in flight also discards the result.
    pub async fn refresh(&self) -> Result<RefreshOutcome, BoardError> {
        let Some(generation) = self.idle_generation().await else {
            return Ok(RefreshOutcome::Deferred);
        };

        let snapshot = self.repo.read().await?;

        let mut session = self.inner.lock().await;
        if session.is_busy() || session.generation != generation {
            debug!(
                version = %snapshot.version,
                "Local changes arrived during refresh, discarding remote copy"
            );
            return Ok(RefreshOutcome::Deferred);
        }
        if snapshot.version == session.version {
            return Ok(RefreshOutcome::Unchanged);
        }

        info!(
            from = %session.version,
            to = %snapshot.version,
            tasks = snapshot.data.tasks.len(),
            "Task list changed remotely, reloading"
        );
        let tasks = normalize_columns(&session.columns, snapshot.data.tasks);
        session.store.restore(tasks);
        session.last_updated = snapshot.data.last_updated;
        session.version = snapshot.version;
        broadcast_message(&self.events, &session.board_updated());
        Ok(RefreshOutcome::Reloaded)
    }

    /// Current change generation, or `None` while a drag or commit is open.
    async fn idle_generation(&self) -> Option<u64> {
        let session = self.inner.lock().await;
        (!session.is_busy()).then_some(session.generation)
    }

    /// Feed one gesture to the drag controller.
    ///
    /// A finished drag that changed the board is queued for commit and the
    /// call returns without waiting for the repository.
    pub async fn apply(&self, event: DragEvent) -> AppliedEvent {
        let mut session = self.inner.lock().await;
        let BoardSession {
            store,
            columns,
            controller,
            ..
        } = &mut *session;
        let outcome = controller.handle(store, columns, event);

        if let DragOutcome::Ended {
            commit: Some(commit),
        } = &outcome
        {
            let last_updated = session.touch();
            if commit.from_column != commit.column {
                broadcast_message(
                    &self.events,
                    &WsMessage::TaskMoved {
                        task_id: commit.task_id.clone(),
                        from_column: commit.from_column.clone(),
                        to_column: commit.column.clone(),
                    },
                );
            }
            broadcast_message(&self.events, &session.board_updated());
            self.enqueue(
                &mut session,
                commit.task_id.clone(),
                TaskData {
                    tasks: commit.tasks.clone(),
                    last_updated,
                },
                None,
            );
        } else if outcome.mutated() || matches!(outcome, DragOutcome::Started { .. }) {
            broadcast_message(&self.events, &session.board_updated());
        }

        AppliedEvent {
            outcome,
            tasks: session.store.tasks().to_vec(),
            active_task_id: session.controller.active_task_id().map(str::to_string),
        }
    }

    /// Append a new task and wait for it to be persisted.
    ///
    /// On a failed write the task stays on the local board.
    pub async fn create_task(&self, new: NewTask) -> Result<Task, BoardError> {
        let (task, reply) = {
            let mut session = self.inner.lock().await;
            let column = match new.column {
                Some(column) if !session.columns.contains(&column) => {
                    return Err(BoardError::UnknownColumn { column });
                }
                Some(column) => column,
                None => session.columns.first().id.clone(),
            };
            let status = new
                .status
                .unwrap_or_else(|| session.columns.status_for(&column));
            let task = Task {
                id: session.next_task_id(),
                title: new.title,
                description: new.description,
                assignee: new.assignee,
                priority: new.priority,
                status,
                created_date: now_iso(),
                column,
            };
            session.store.push(task.clone());
            session.controller.track_created(&task);
            let data = TaskData {
                tasks: session.settled_tasks(),
                last_updated: session.touch(),
            };

            broadcast_message(&self.events, &WsMessage::TaskCreated { task: task.clone() });
            broadcast_message(&self.events, &session.board_updated());
            let (tx, rx) = oneshot::channel();
            self.enqueue(&mut session, task.id.clone(), data, Some(tx));
            (task, rx)
        };

        await_commit(&task.id, reply).await?;
        Ok(task)
    }

    /// Move a task to another column in place, without reordering it.
    ///
    /// `status` defaults to the target column's title.
    pub async fn update_task_column(
        &self,
        task_id: &str,
        column: &str,
        status: Option<String>,
    ) -> Result<Task, BoardError> {
        let (task, from_column, reply) = {
            let mut session = self.inner.lock().await;
            if !session.columns.contains(column) {
                return Err(BoardError::UnknownColumn {
                    column: column.to_string(),
                });
            }
            let status = status.unwrap_or_else(|| session.columns.status_for(column));
            let Some(task) = session.store.get_mut(task_id) else {
                return Err(BoardError::TaskNotFound {
                    id: task_id.to_string(),
                });
            };
            let from_column = std::mem::replace(&mut task.column, column.to_string());
            task.status = status;
            let task = task.clone();
            session
                .controller
                .track_column_change(&task.id, column, &task.status);

            let data = TaskData {
                tasks: session.settled_tasks(),
                last_updated: session.touch(),
            };
            if from_column != column {
                broadcast_message(
                    &self.events,
                    &WsMessage::TaskMoved {
                        task_id: task.id.clone(),
                        from_column: from_column.clone(),
                        to_column: column.to_string(),
                    },
                );
            }
            broadcast_message(&self.events, &session.board_updated());
            let (tx, rx) = oneshot::channel();
            self.enqueue(&mut session, task.id.clone(), data, Some(tx));
            (task, from_column, rx)
        };

        await_commit(&task.id, reply).await?;
        debug!(task_id = %task.id, from = %from_column, to = %task.column, "Task column updated");
        Ok(task)
    }

    /// The task list as it would be stored.
    pub async fn snapshot(&self) -> TaskData {
        self.inner.lock().await.task_data()
    }

    pub async fn board_view(&self) -> BoardView {
        let session = self.inner.lock().await;
        session.store.board_view(
            &session.columns,
            session.controller.active_task_id().map(str::to_string),
            session.last_updated.clone(),
        )
    }

    pub async fn columns(&self) -> ColumnRegistry {
        self.inner.lock().await.columns.clone()
    }

    pub async fn version(&self) -> String {
        self.inner.lock().await.version.clone()
    }

    pub async fn is_dragging(&self) -> bool {
        self.inner.lock().await.controller.is_dragging()
    }

    /// Wait until every commit queued so far has been answered.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commits.send(CommitJob::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn enqueue(
        &self,
        session: &mut BoardSession,
        task_id: String,
        data: TaskData,
        reply: Option<CommitReply>,
    ) {
        let job = CommitJob::Write {
            task_id: task_id.clone(),
            data,
            reply,
        };
        session.generation += 1;
        match self.commits.send(job) {
            Ok(()) => session.pending_commits += 1,
            Err(_) => {
                warn!(task_id = %task_id, "Commit worker stopped, change kept locally only");
            }
        }
    }
}

async fn await_commit(
    task_id: &str,
    reply: oneshot::Receiver<Result<String, PersistenceError>>,
) -> Result<(), BoardError> {
    match reply.await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(source)) => Err(BoardError::CommitFailure {
            task_id: task_id.to_string(),
            source,
        }),
        Err(_) => Err(BoardError::Other(anyhow::anyhow!(
            "Commit worker stopped before answering"
        ))),
    }
}

/// Drain queued commits one at a time, in the order they were made.
async fn run_commit_worker(
    session: Arc<Mutex<BoardSession>>,
    repo: Arc<dyn TaskRepository>,
    events: broadcast::Sender<String>,
    mut rx: mpsc::UnboundedReceiver<CommitJob>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            CommitJob::Flush(done) => {
                let _ = done.send(());
            }
            CommitJob::Write {
                task_id,
                data,
                reply,
            } => {
                let result = commit_once(&session, repo.as_ref(), &task_id, &data).await;
                if let Err(e) = &result {
                    broadcast_message(
                        &events,
                        &WsMessage::CommitFailed {
                            task_id: task_id.clone(),
                            message: e.to_string(),
                        },
                    );
                }
                session.lock().await.pending_commits -= 1;
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
        }
    }
    debug!("Commit worker stopped");
}

async fn commit_once(
    session: &Mutex<BoardSession>,
    repo: &dyn TaskRepository,
    task_id: &str,
    data: &TaskData,
) -> Result<String, PersistenceError> {
    let expected = session.lock().await.version.clone();
    match repo.write(data, &expected).await {
        Ok(WriteOutcome::Written { version }) => {
            info!(task_id = %task_id, version = %version, "Committed task list");
            session.lock().await.version = version.clone();
            Ok(version)
        }
        Ok(WriteOutcome::Conflict) => {
            warn!(
                task_id = %task_id,
                expected = %expected,
                "Commit rejected, task list was modified elsewhere"
            );
            Err(PersistenceError::Conflict { expected })
        }
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Commit failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::models::{Column, Priority};
    use super::super::persistence::{MemoryRepository, Snapshot};
    use super::super::store::test_support::task;
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    fn columns() -> ColumnRegistry {
        ColumnRegistry::new(vec![
            Column::new("backlog", "Backlog"),
            Column::new("todo", "In Progress"),
            Column::new("done", "Done"),
        ])
        .unwrap()
    }

    fn data() -> TaskData {
        TaskData {
            tasks: vec![task("1", "backlog"), task("2", "backlog"), task("3", "todo")],
            last_updated: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    async fn board() -> (BoardHandle, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::new(data()));
        let handle = BoardHandle::load(repo.clone(), columns()).await.unwrap();
        (handle, repo)
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    fn drain(rx: &mut broadcast::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_load_reassigns_unknown_columns() {
        let repo = Arc::new(MemoryRepository::new(TaskData {
            tasks: vec![task("1", "archived"), task("2", "todo")],
            last_updated: String::new(),
        }));
        let handle = BoardHandle::load(repo, columns()).await.unwrap();
        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.tasks[0].column, "backlog");
        assert_eq!(snapshot.tasks[1].column, "todo");
    }

    #[tokio::test]
    async fn test_drag_end_commits_once_and_updates_version() {
        let (handle, repo) = board().await;
        let mut rx = handle.subscribe();

        handle
            .apply(DragEvent::Start {
                task_id: "1".into(),
            })
            .await;
        handle
            .apply(DragEvent::Over {
                active_id: "1".into(),
                over_id: Some("3".into()),
            })
            .await;
        let applied = handle.apply(DragEvent::End).await;
        assert!(matches!(
            applied.outcome,
            DragOutcome::Ended { commit: Some(_) }
        ));
        assert!(applied.active_task_id.is_none());

        handle.flush().await;
        let stored = repo.read().await.unwrap();
        assert_eq!(stored.version, "2");
        assert_eq!(handle.version().await, "2");
        let moved = stored.data.tasks.iter().find(|t| t.id == "1").unwrap();
        assert_eq!(moved.column, "todo");
        assert_eq!(moved.status, "In Progress");

        let messages = drain(&mut rx);
        assert_eq!(
            messages
                .iter()
                .filter(|m| m.contains("\"type\":\"TaskMoved\""))
                .count(),
            1
        );
        assert!(!messages.iter().any(|m| m.contains("CommitFailed")));
    }

    #[tokio::test]
    async fn test_drag_end_without_change_writes_nothing() {
        let (handle, repo) = board().await;
        handle
            .apply(DragEvent::Start {
                task_id: "2".into(),
            })
            .await;
        let applied = handle.apply(DragEvent::End).await;
        assert_eq!(applied.outcome, DragOutcome::Ended { commit: None });
        handle.flush().await;
        assert_eq!(repo.read().await.unwrap().version, "1");
    }

    #[tokio::test]
    async fn test_cancel_reverts_and_writes_nothing() {
        let (handle, repo) = board().await;
        handle
            .apply(DragEvent::Start {
                task_id: "1".into(),
            })
            .await;
        handle
            .apply(DragEvent::Over {
                active_id: "1".into(),
                over_id: Some("done".into()),
            })
            .await;
        let applied = handle.apply(DragEvent::Cancel).await;
        assert_eq!(applied.outcome, DragOutcome::Cancelled { reverted: true });
        assert_eq!(ids(&applied.tasks), vec!["1", "2", "3"]);
        assert_eq!(applied.tasks[0].column, "backlog");
        handle.flush().await;
        assert_eq!(repo.read().await.unwrap().version, "1");
    }

    #[tokio::test]
    async fn test_conflict_is_broadcast_and_local_order_kept() {
        let (handle, repo) = board().await;
        let mut rx = handle.subscribe();
        repo.replace_externally(data()).unwrap();

        handle
            .apply(DragEvent::Start {
                task_id: "1".into(),
            })
            .await;
        handle
            .apply(DragEvent::Over {
                active_id: "1".into(),
                over_id: Some("done".into()),
            })
            .await;
        handle.apply(DragEvent::End).await;
        handle.flush().await;

        let messages = drain(&mut rx);
        assert!(messages.iter().any(|m| m.contains("\"type\":\"CommitFailed\"")));
        let local = handle.snapshot().await;
        assert_eq!(
            local.tasks.iter().find(|t| t.id == "1").unwrap().column,
            "done"
        );
        assert_eq!(repo.read().await.unwrap().data, data());
    }

    #[tokio::test]
    async fn test_unknown_start_is_reported_not_fatal() {
        let (handle, _repo) = board().await;
        let applied = handle
            .apply(DragEvent::Start {
                task_id: "99".into(),
            })
            .await;
        assert!(matches!(applied.outcome, DragOutcome::Ignored { .. }));
        assert_eq!(ids(&applied.tasks), vec!["1", "2", "3"]);
        assert!(!handle.is_dragging().await);
    }

    #[tokio::test]
    async fn test_create_task_persists_with_defaults() {
        let (handle, repo) = board().await;
        let task = handle
            .create_task(NewTask {
                title: "Fix the reactor".into(),
                description: String::new(),
                assignee: "Homer".into(),
                priority: Priority::High,
                status: None,
                column: Some("todo".into()),
            })
            .await
            .unwrap();

        assert!(task.id.starts_with("task-"));
        assert_eq!(task.status, "In Progress");
        assert!(!task.created_date.is_empty());
        let stored = repo.read().await.unwrap().data;
        assert_eq!(stored.tasks.len(), 4);
        assert_eq!(stored.tasks[3].id, task.id);
    }

    #[tokio::test]
    async fn test_create_task_defaults_to_first_column() {
        let (handle, _repo) = board().await;
        let task = handle
            .create_task(NewTask {
                title: "Untriaged".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(task.column, "backlog");
        assert_eq!(task.status, "Backlog");
    }

    #[tokio::test]
    async fn test_create_task_rejects_unknown_column() {
        let (handle, _repo) = board().await;
        let err = handle
            .create_task(NewTask {
                title: "Lost".into(),
                column: Some("nowhere".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::UnknownColumn { .. }));
    }

    #[tokio::test]
    async fn test_update_task_column_keeps_position() {
        let (handle, repo) = board().await;
        let task = handle.update_task_column("1", "done", None).await.unwrap();
        assert_eq!(task.column, "done");
        assert_eq!(task.status, "Done");

        let stored = repo.read().await.unwrap().data;
        assert_eq!(ids(&stored.tasks), vec!["1", "2", "3"]);
        assert_ne!(stored.last_updated, "2024-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn test_update_task_column_errors() {
        let (handle, _repo) = board().await;
        assert!(matches!(
            handle.update_task_column("99", "done", None).await,
            Err(BoardError::TaskNotFound { .. })
        ));
        assert!(matches!(
            handle.update_task_column("1", "nowhere", None).await,
            Err(BoardError::UnknownColumn { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_task_column_conflict_is_commit_failure() {
        let (handle, repo) = board().await;
        repo.replace_externally(data()).unwrap();
        let err = handle
            .update_task_column("1", "done", Some("Shipped".into()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BoardError::CommitFailure {
                source: PersistenceError::Conflict { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_refresh_reloads_remote_changes() {
        let (handle, repo) = board().await;
        assert_eq!(handle.refresh().await.unwrap(), RefreshOutcome::Unchanged);

        repo.replace_externally(TaskData {
            tasks: vec![task("7", "done")],
            last_updated: "2024-02-01T00:00:00Z".to_string(),
        })
        .unwrap();
        assert_eq!(handle.refresh().await.unwrap(), RefreshOutcome::Reloaded);
        assert_eq!(ids(&handle.snapshot().await.tasks), vec!["7"]);
        assert_eq!(handle.version().await, "2");
    }

    #[tokio::test]
    async fn test_refresh_deferred_while_dragging() {
        let (handle, repo) = board().await;
        handle
            .apply(DragEvent::Start {
                task_id: "1".into(),
            })
            .await;
        repo.replace_externally(TaskData::default()).unwrap();
        assert_eq!(handle.refresh().await.unwrap(), RefreshOutcome::Deferred);
        assert_eq!(handle.snapshot().await.tasks.len(), 3);
    }

    #[tokio::test]
    async fn test_board_view_marks_active_task() {
        let (handle, _repo) = board().await;
        handle
            .apply(DragEvent::Start {
                task_id: "3".into(),
            })
            .await;
        let view = handle.board_view().await;
        assert_eq!(view.active_task_id.as_deref(), Some("3"));
        assert_eq!(view.columns.len(), 3);
        assert_eq!(view.columns[0].tasks.len(), 2);
    }

    /// Memory repository whose armed reads capture the state at call time
    /// and then wait for `release` before returning it.
    struct GatedReadRepository {
        inner: Arc<MemoryRepository>,
        armed: AtomicBool,
        read_started: Notify,
        release: Notify,
    }

    impl GatedReadRepository {
        fn new(inner: Arc<MemoryRepository>) -> Self {
            Self {
                inner,
                armed: AtomicBool::new(false),
                read_started: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl TaskRepository for GatedReadRepository {
        async fn read(&self) -> Result<Snapshot, PersistenceError> {
            let snapshot = self.inner.read().await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.read_started.notify_one();
                self.release.notified().await;
            }
            Ok(snapshot)
        }

        async fn write(
            &self,
            data: &TaskData,
            previous_version: &str,
        ) -> Result<WriteOutcome, PersistenceError> {
            self.inner.write(data, previous_version).await
        }

        fn describe(&self) -> String {
            "gated memory".to_string()
        }
    }

    async fn drag_to(handle: &BoardHandle, task_id: &str, over_id: &str) -> AppliedEvent {
        handle
            .apply(DragEvent::Start {
                task_id: task_id.into(),
            })
            .await;
        handle
            .apply(DragEvent::Over {
                active_id: task_id.into(),
                over_id: Some(over_id.into()),
            })
            .await;
        handle.apply(DragEvent::End).await
    }

    #[tokio::test]
    async fn test_task_created_during_drag_survives_cancel_and_next_commit() {
        let (handle, repo) = board().await;
        handle
            .apply(DragEvent::Start {
                task_id: "1".into(),
            })
            .await;
        let created = handle
            .create_task(NewTask {
                title: "new".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(repo.read().await.unwrap().data.tasks.len(), 4);

        let applied = handle.apply(DragEvent::Cancel).await;
        assert!(applied.tasks.iter().any(|t| t.id == created.id));

        drag_to(&handle, "2", "done").await;
        handle.flush().await;

        let stored = repo.read().await.unwrap().data;
        assert_eq!(stored.tasks.len(), 4);
        assert!(stored.tasks.iter().any(|t| t.id == created.id));
        assert_eq!(
            stored.tasks.iter().find(|t| t.id == "2").unwrap().column,
            "done"
        );
    }

    #[tokio::test]
    async fn test_column_update_during_drag_survives_cancel() {
        let (handle, repo) = board().await;
        handle
            .apply(DragEvent::Start {
                task_id: "1".into(),
            })
            .await;
        handle
            .apply(DragEvent::Over {
                active_id: "1".into(),
                over_id: Some("3".into()),
            })
            .await;
        handle.update_task_column("2", "done", None).await.unwrap();
        let stored = repo.read().await.unwrap().data;
        assert_eq!(ids(&stored.tasks), vec!["1", "2", "3"]);
        assert_eq!(stored.tasks[0].column, "backlog");

        let applied = handle.apply(DragEvent::Cancel).await;
        assert_eq!(ids(&applied.tasks), vec!["1", "2", "3"]);
        assert_eq!(applied.tasks[0].column, "backlog");
        assert_eq!(applied.tasks[1].column, "done");
        assert_eq!(applied.tasks[1].status, "Done");

        handle.flush().await;
        assert_eq!(repo.read().await.unwrap().data.tasks[1].column, "done");
    }

    #[tokio::test]
    async fn test_column_update_of_dragged_task_is_kept_on_end() {
        let (handle, repo) = board().await;
        handle
            .apply(DragEvent::Start {
                task_id: "1".into(),
            })
            .await;
        handle.update_task_column("1", "done", None).await.unwrap();

        let applied = handle.apply(DragEvent::End).await;
        assert_eq!(applied.outcome, DragOutcome::Ended { commit: None });
        assert_eq!(applied.tasks[0].column, "done");
        handle.flush().await;
        assert_eq!(repo.read().await.unwrap().version, "2");
    }

    #[tokio::test]
    async fn test_create_behind_queued_drag_commit_keeps_both() {
        let (handle, repo) = board().await;
        drag_to(&handle, "1", "done").await;
        let created = handle
            .create_task(NewTask {
                title: "queued".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        handle.flush().await;

        let stored = repo.read().await.unwrap();
        assert_eq!(stored.version, "3");
        assert_eq!(stored.data.tasks.len(), 4);
        assert_eq!(stored.data.tasks[0].column, "done");
        assert_eq!(stored.data.tasks[3].id, created.id);
        assert_eq!(handle.version().await, "3");
    }

    #[tokio::test]
    async fn test_refresh_discards_read_that_spans_a_commit() {
        let memory = Arc::new(MemoryRepository::new(data()));
        let repo = Arc::new(GatedReadRepository::new(memory.clone()));
        let handle = BoardHandle::load(repo.clone(), columns()).await.unwrap();
        repo.armed.store(true, Ordering::SeqCst);

        let refreshing = tokio::spawn({
            let handle = handle.clone();
            async move { handle.refresh().await }
        });
        repo.read_started.notified().await;

        drag_to(&handle, "1", "done").await;
        handle.flush().await;
        repo.release.notify_one();

        assert_eq!(
            refreshing.await.unwrap().unwrap(),
            RefreshOutcome::Deferred
        );
        let local = handle.snapshot().await;
        assert_eq!(local.tasks[0].column, "done");
        assert_eq!(handle.version().await, "2");
        assert_eq!(handle.refresh().await.unwrap(), RefreshOutcome::Unchanged);
    }
}
