//! Refactory core library: the recommendation pipeline behind the Refactory
//! review bot.
//!
//! For every open change request of a watched project the pipeline computes
//! code metrics of the touched classes and methods, scores them with trained
//! classifiers, and posts the most confident refactoring recommendations as
//! review comments. Every scored unit is stored for later auditing.
//!
//! The source-control host, working-copy management, static analysis and the
//! inference runtime are collaborators behind the traits in
//! [`collaborators`] and [`inference::predictor`]; this crate owns the logic
//! between them and the SQLite store.

pub mod audit;
pub mod collaborators;
pub mod config;
pub mod errors;
pub mod inference;
pub mod message;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod selection;
pub mod store;
pub mod tracker;

pub use config::PipelineConfig;
pub use errors::{RefactoryError, RefactoryResult};
pub use pipeline::{Orchestrator, Poller};
pub use store::Database;
