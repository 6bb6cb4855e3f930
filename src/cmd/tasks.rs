//! Terminal task commands (`taskboard tasks`).

use std::path::Path;

use anyhow::{Context, Result, bail};

use super::super::TasksCommands;
use taskboard::board::drag::{DragEvent, DragOutcome};
use taskboard::board::models::{NewTask, Priority};
use taskboard::board::session::BoardHandle;
use taskboard::board::ws::WsMessage;
use taskboard::config::BoardConfig;

async fn open_board(config_path: &Path) -> Result<BoardHandle> {
    let config = BoardConfig::resolve(config_path)?;
    let repo = config.build_repository()?;
    BoardHandle::load(repo, config.column_registry()?)
        .await
        .context("Failed to load task list")
}

pub async fn cmd_tasks(config_path: &Path, command: TasksCommands) -> Result<()> {
    let board = open_board(config_path).await?;

    match command {
        TasksCommands::List { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&board.snapshot().await)?);
                return Ok(());
            }
            let view = board.board_view().await;
            for column in &view.columns {
                println!("{} ({})", column.title, column.tasks.len());
                for task in &column.tasks {
                    let mut meta = vec![task.priority.to_string()];
                    if !task.assignee.is_empty() {
                        meta.push(task.assignee.clone());
                    }
                    println!("  [{}] {} ({})", task.id, task.title, meta.join(", "));
                }
            }
        }
        TasksCommands::Add {
            title,
            description,
            assignee,
            priority,
            column,
        } => {
            if title.trim().is_empty() {
                bail!("Title must not be empty");
            }
            let priority: Priority = priority.parse().map_err(anyhow::Error::msg)?;
            let task = board
                .create_task(NewTask {
                    title,
                    description,
                    assignee,
                    priority,
                    status: None,
                    column,
                })
                .await?;
            println!("Created {} in {}", task.id, task.column);
        }
        TasksCommands::Move {
            task_id,
            column,
            before,
        } => move_task(&board, task_id, column, before).await?,
    }

    Ok(())
}

/// Replay a drag: start, hover the target column (then the `before` card,
/// if given), end. Waits for the resulting commit.
async fn move_task(
    board: &BoardHandle,
    task_id: String,
    column: String,
    before: Option<String>,
) -> Result<()> {
    if !board.columns().await.contains(&column) {
        bail!("Unknown column '{}'", column);
    }
    let mut events = board.subscribe();

    let mut gestures = vec![
        DragEvent::Start {
            task_id: task_id.clone(),
        },
        DragEvent::Over {
            active_id: task_id.clone(),
            over_id: Some(column.clone()),
        },
    ];
    if let Some(before) = before {
        gestures.push(DragEvent::Over {
            active_id: task_id.clone(),
            over_id: Some(before),
        });
    }
    gestures.push(DragEvent::End);

    let mut commit = None;
    for gesture in gestures {
        match board.apply(gesture).await.outcome {
            DragOutcome::Ignored { reason } => {
                board.apply(DragEvent::Cancel).await;
                bail!("{}", reason);
            }
            DragOutcome::Ended { commit: c } => commit = c,
            _ => {}
        }
    }

    let Some(commit) = commit else {
        println!("{} is already there; nothing to commit", task_id);
        return Ok(());
    };

    board.flush().await;
    while let Ok(message) = events.try_recv() {
        if let Ok(WsMessage::CommitFailed { message, .. }) = serde_json::from_str(&message) {
            bail!("Move was not saved: {}", message);
        }
    }
    println!(
        "Moved {} from {} to {} ({})",
        commit.task_id, commit.from_column, commit.column, commit.status
    );
    Ok(())
}
