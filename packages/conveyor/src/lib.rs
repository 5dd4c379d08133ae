//! # Conveyor
//!
//! Orchestration primitives for driving multi-step work against unreliable,
//! rate-limited external systems.
//!
//! Conveyor owns primitives only. Policy decisions (polling cadence, per-kind
//! concurrency limits, which errors are transient) belong in the application
//! that wires these pieces together.
//!
//! ## Pieces
//!
//! - [`retry`] / [`retry_if`] — re-invoke a fallible async operation with a
//!   configurable [`RetryPolicy`], returning the last error unchanged.
//! - [`RateLimiter`] — a token bucket that suspends callers (never rejects)
//!   until the next refill window grants a token.
//! - [`Pipeline`] — a strictly-ordered list of named [`Step`]s over one
//!   shared mutable state value, with per-step retry and an unconditional
//!   cleanup block.
//!
//! ## Architecture
//!
//! ```text
//! Pipeline.run(&mut state)
//!     │
//!     ├─► Step "crawl"    ──(retry policy)──► run(&mut state)
//!     ├─► Step "keywords" ──────────────────► run(&mut state)
//!     ├─► Step "publish"  ──(retry policy)──► run(&mut state)
//!     │        │
//!     │        └─ unrecoverable ─► abort, later steps never run
//!     │
//!     └─► cleanup(&mut state)   (always, success or abort)
//! ```
//!
//! ## Guarantees
//!
//! 1. **Strict order** — steps execute in list order; no branching.
//! 2. **Failure isolation** — the first unrecoverable step failure aborts
//!    the run; the failing step's name travels with the error.
//! 3. **Original errors** — retry exhaustion re-raises the last error
//!    unchanged so callers can inspect the failure kind.
//! 4. **No compensation** — aborted runs are not rolled back; the unit of
//!    retry is the whole job, not a mid-pipeline resume.

mod error;
mod pipeline;
mod rate_limit;
mod retry;

pub use error::{ErrorClass, PipelineError};
pub use pipeline::{Pipeline, Step};
pub use rate_limit::RateLimiter;
pub use retry::{retry, retry_if, Backoff, RetryPolicy};
