//! Caddis Lifecycle Engine
//!
//! This crate drives single workflow actions through their lifecycle
//! against pluggable executors: start → running → completion/failure, with
//! classified retries, crash recovery, and at-least-once progress.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Engine                          │
//! │  ┌──────────────────────────────────────────────┐    │
//! │  │        CommandScheduler (worker pool)        │    │
//! │  │   Start | Check | End | Suspend | Resume |   │    │
//! │  │   Update | Signal | KillJob | Task           │    │
//! │  └──────────────────────────────────────────────┘    │
//! │            ▲                   │                     │
//! │  ┌─────────┴────────┐         ▼                     │
//! │  │   DelayQueue     │  ┌───────────────────────┐    │
//! │  │  retry backoff,  │  │   ActionExecutor      │    │
//! │  │  poll re-arming  │  │   start/check/end/kill│    │
//! │  └──────────────────┘  └───────────────────────┘    │
//! │                                │                     │
//! │                                ▼                     │
//! │  ┌──────────────────────────────────────────────┐    │
//! │  │   JobStateStore (bulk transactional update)  │    │
//! │  └──────────────────────────────────────────────┘    │
//! │                                │                     │
//! │                                ▼                     │
//! │  ┌──────────────────────────────────────────────┐    │
//! │  │    EngineEvent stream   |   SlaRecorder      │    │
//! │  └──────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use caddis_engine::{Engine, EngineConfig, MemoryStateStore, Command};
//! use std::sync::Arc;
//!
//! let engine = Arc::new(Engine::new(store, executors, errors, EngineConfig::default()));
//! engine.start().await?;
//! engine.queue(Command::start(&action_id))?;
//! ```

pub mod command;
pub mod config;
pub mod delay;
pub mod engine;
pub mod error;
pub mod events;
mod lifecycle;
pub mod scheduler;
pub mod sla;
pub mod store;

pub use command::*;
pub use config::*;
pub use delay::*;
pub use engine::*;
pub use error::*;
pub use events::*;
pub use scheduler::*;
pub use sla::*;
pub use store::*;
