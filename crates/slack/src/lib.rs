//! Slack integration - Socket Mode bot that files Jira issues from modals
//!
//! This crate provides the Slack side of jirabot:
//! - **Socket Mode** (`socket`, `websocket`) - receive loop, acknowledgements, reconnects
//! - **Dispatch** (`dispatch`) - what each envelope kind acknowledges with and what runs after
//! - **Handlers** (`handler`) - partial handlers and the first-to-claim chain
//! - **Events** (`events`) - events API payloads and the mention handler
//! - **Interactions** (`interactions`) - shortcut and view callbacks, form values
//! - **Modals** (`modals`) - flow registry, interaction router, issue filer, the bug form
//! - **Block Kit** (`blocks`) - modal builders and view submission responses
//! - **Web API** (`web`) - views, thread replies and Socket Mode connection URLs
//!
//! # Architecture
//!
//! ```text
//! Socket Mode → SocketModeRunner → EnvelopeDispatcher ─┬→ EventRouter → MentionHandler
//!                    ↑ ack (+ payload)                 └→ InteractionRouter → FlowRegistry
//!                                                                  ↓
//!                                           validate → IssueFiler → TrackerClient
//!                                                                  ↓
//!                                                       ViewUpdater (views.update)
//! ```

pub mod blocks;
pub mod dispatch;
pub mod events;
pub mod handler;
pub mod interactions;
pub mod modals;
pub mod socket;
pub mod tasks;
pub mod web;
pub mod websocket;
