//! Mindora core library — message model, conversation reconciliation, history grouping,
//! and the backend API client, shared by the CLI.

pub mod api;
pub mod config;
pub mod history;
pub mod init;
pub mod message;
pub mod reconcile;
pub mod session;
