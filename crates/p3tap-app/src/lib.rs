//! Orchestration layer over the p3tap core.
//!
//! The [`Orchestrator`] owns the live bus, the connection registry, the
//! session store, and at most one running proxy, and exposes the status
//! snapshot that HTTP or GUI adapters render. The `p3tap` binary in this
//! crate is the command-line driver for both the offline and the live path.

mod driver;
mod error;

pub use driver::{Orchestrator, StatusSnapshot};
pub use error::AppError;
