//! Caddis Action Executors
//!
//! This crate provides the pluggable executor surface of the caddis
//! workflow engine. The engine core never knows what a "shell" or "query"
//! action actually does; it only invokes the lifecycle hooks defined here
//! and classifies the failures they report.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          ExecutorRegistry               │
//! │  ┌─────────────────────────────────┐    │
//! │  │  shell | control | query | ...  │    │
//! │  └─────────────────────────────────┘    │
//! │                  │                       │
//! │                  ▼                       │
//! │  ┌─────────────────────────────────┐    │
//! │  │     ActionExecutor hooks        │    │
//! │  │  start / check / end / kill     │    │
//! │  └─────────────────────────────────┘    │
//! │                  │                       │
//! │                  ▼                       │
//! │  ┌─────────────────────────────────┐    │
//! │  │       ErrorRegistry             │    │
//! │  │  classify failures into         │    │
//! │  │  TRANSIENT | NON_TRANSIENT |    │    │
//! │  │  ERROR | FAILED                 │    │
//! │  └─────────────────────────────────┘    │
//! └─────────────────────────────────────────┘
//! ```

pub mod classifier;
pub mod context;
pub mod control;
pub mod error;
pub mod shell;
pub mod traits;

pub use classifier::*;
pub use context::*;
pub use control::*;
pub use error::*;
pub use shell::*;
pub use traits::*;
