//! Task board: a single-board Kanban back-end.
//!
//! ## Overview
//!
//! Tasks live in one JSON document stored in a GitHub repository (or a local
//! file). The server loads it into a [`session::BoardSession`], lets the
//! browser drag cards between columns through the drag controller, and
//! writes the result back with optimistic concurrency on the store's
//! version token. Every change is pushed to connected clients over a
//! WebSocket.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │  (React) │ <─────── │    ├─ auth.rs  (password login, token guard)     │
//! └──────────┘ WebSocket│    └─ api.rs   (route handlers, AppState)        │
//!                       │         │                                        │
//!                       │         │ BoardHandle::apply(DragEvent)          │
//!                       │         v                                        │
//!                       │  session.rs  (BoardHandle, commit worker)        │
//!                       │         │                    │                   │
//!                       │         │ DragController     │ TaskRepository    │
//!                       │         v                    v                   │
//!                       │  drag.rs + store.rs   persistence.rs / github.rs │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module        | Responsibility                                          |
//! |---------------|---------------------------------------------------------|
//! | `models`      | Shared types: `Task`, `TaskData`, `Column`, `MoveCommit`|
//! | `columns`     | `ColumnRegistry`, the ordered column set                |
//! | `store`       | `TaskStore`, the ordered task sequence                  |
//! | `ws`          | `WsMessage` enum + `broadcast_message()` helper         |
//!
//! ## Typical Request Flow (drag a card to another column)
//!
//! 1. `POST /api/drag/start` opens a drag session and snapshots the store.
//! 2. Each `POST /api/drag/over` resolves the element under the pointer to a
//!    task or a column and moves the card there immediately.
//! 3. `POST /api/drag/end` closes the session. If anything changed, the
//!    session stamps the final status, broadcasts `TaskMoved`, and queues a
//!    single commit; the response does not wait for it.
//! 4. The commit worker writes the full list against the last known version.
//!    A conflict or transport error is broadcast as `CommitFailed`; the local
//!    order stays as the user left it.

pub mod api;
pub mod auth;
pub mod columns;
pub mod drag;
pub mod github;
pub mod models;
pub mod persistence;
pub mod server;
pub mod session;
pub mod store;
pub mod ws;
