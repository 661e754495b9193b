//! trustpipe - Trust pipeline for untrusted generative workers
//!
//! Wraps opaque producer/reviewer workers in a pipeline that decides
//! whether their output can be applied autonomously or needs a human.
//!
//! # Architecture
//!
//! Every run moves through fixed stages, each recorded as an event:
//! - Input checks reject malformed context before any work is done
//! - Worker calls are retried with bounded exponential backoff
//! - A validation gate checks the artifact before anyone reviews it
//! - Arbitration merges the self assessment and an independent review
//! - Low-confidence verdicts wait in a durable escalation queue
//! - Accepted artifacts are applied unit by unit
//!
//! # Modules
//!
//! - `adapters`: Worker and side-effect contracts (subprocess, filesystem)
//! - `core`: Pipeline logic (RetryingInvoker, ValidationGate, EscalationQueue, ...)
//! - `domain`: Data structures (Event, Run, Verdict, Decision)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run one step
//! trustpipe run --producer ./worker.sh --context ctx.json \
//!     --workflow docs --step write-readme --out ./build
//!
//! # Answer an escalation from another terminal
//! trustpipe escalations resolve <id> yes
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{Capability, SideEffectApplier};
pub use self::core::{EscalationQueue, PipelineError, PipelineOrchestrator, RunReport, RunRequest};
pub use domain::{Decision, Event, EventType, Run, RunState, Stage, Verdict};
