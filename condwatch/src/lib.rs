//! # condwatch
//!
//! Block until a condition in a relational database becomes true, without
//! writing a polling loop for every use case.
//!
//! A condition is a [`ConditionQuery`]: a prepared statement plus a test
//! over the single row it returns. A [`Watcher`] owns one condition,
//! attempts it on a fixed interval from a background task, and reports
//! through two channels: the satisfying row (at most once) and any errors
//! seen along the way. The caller can stop it at any time with
//! [`Watcher::close`].
//!
//! ## Quick start
//!
//! ```no_run
//! use std::time::Duration;
//! use condwatch::{Watcher, once};
//! use sqlx::Row;
//!
//! async fn wait_for_user(pool: &sqlx::AnyPool) -> anyhow::Result<String> {
//!     let mut watcher =
//!         Watcher::new(pool, once("users", ["name"], "id = ?", [1]));
//!
//!     let row = tokio::time::timeout(Duration::from_secs(5), &mut watcher.result)
//!         .await??;
//!     Ok(row.try_get("name")?)
//! }
//! ```
//!
//! The store is any database reachable through `sqlx::AnyPool`; call
//! `sqlx::any::install_default_drivers()` before connecting.

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Watcher configuration and environment overrides.
pub mod config;
/// Error types.
pub mod error;
pub mod query;
/// Background polling loop and its handles.
pub mod watcher;

pub use config::WatcherConfig;
pub use error::{ConfigError, Result, WatchError};
pub use query::{
    Attempt, ConditionQuery, RowPredicate, RowQuery, SqlParam, exists, once,
};
pub use watcher::{WatchControl, Watcher};
