//! # stager-models
//!
//! Data models shared by the stager, the bulletin board, and executors.
//!
//! ## Design Principles
//!
//! - A staging request is immutable once submitted
//! - A task is created once by the stager and never mutated after publish
//! - Executor actions form a closed set so executors can match exhaustively
//! - The JSON encoding of a task is the record format stored in the queue
//!
//! ## Task Record
//!
//! A published task carries:
//! - Identity (`guid`, derived as `{app_id}-{task_id}`)
//! - Routing for the result (`reply_to`)
//! - Resource reservation (`memory_mb`, `disk_mb`) and target `stack`
//! - Log stream descriptor (`log`)
//! - The ordered action plan (`actions`)

mod error;
mod staging;
mod task;

pub use error::ModelError;
pub use staging::*;
pub use task::*;
