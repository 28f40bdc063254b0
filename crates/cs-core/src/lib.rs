//! cs-core: Render state for the chat packet stream.
//!
//! This crate folds transport records into groups, projects them for display,
//! and drives the `chatstream` command-line front end.
//! Exposed as a library for integration testing.

pub mod cache;
pub mod config;
pub mod output;
pub mod projection;
pub mod reducer;
pub mod run;
pub mod status;

pub use projection::{answer_text, project, sources, GroupKind, GroupView, Projection, ToolDisplayLatch};
pub use reducer::{Citation, Flags, Group, Phase, ReducerSnapshot, StreamReducer};
pub use status::{widget_status, WidgetStatus};
