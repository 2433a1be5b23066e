//! Supervisor for local translation and speech models.
//!
//! Each model family (translation, TTS) is owned by a [`models::ModelManager`]
//! that downloads artifacts into a marker-guarded cache and runs inference in
//! at most one isolated worker process. [`commands::Commands`] is the async
//! surface a UI calls; [`server`] exposes it as JSON lines over stdio.

pub mod commands;
pub mod config;
pub mod error;
pub mod languages;
pub mod log;
pub mod models;
pub mod server;
pub mod setup;
pub mod speech;
pub mod translation;
pub mod worker;

pub use error::{CommandError, Error};
