//! Caddis Query Bridge
//!
//! A `query` action decomposes into an ordered sequence of statements, each
//! of which may spawn asynchronous stage jobs inside the external query
//! service. This crate layers that multi-step execution on top of the
//! lifecycle engine:
//!
//! - each statement runs as its own unit of work on the engine's command
//!   scheduler; completing one schedules the next
//! - stage polling retries itself through the engine's delay queue on
//!   transient client failures instead of failing the statement
//! - a dependency-inversion map built from the service's stage graph lets a
//!   late completion notification retroactively mark upstream stages
//! - kill cancels a per-session token checked cooperatively by statements
//!   and polls; completed statement records are preserved for audit
//!
//! Sessions are process-local and never persisted: after a restart the
//! engine forces running query actions to manual instead of trusting a
//! stale session map.

pub mod client;
pub mod executor;
pub mod session;

pub use client::*;
pub use executor::*;
pub use session::*;
