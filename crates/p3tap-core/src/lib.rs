//! Analyzer services shared by the offline and live paths.
//!
//! - [`bus`]: in-process publish/subscribe of summary JSONL lines.
//! - [`registry`]: live and recently-closed connection tracking.
//! - [`sink`]: summary writers (plain, GZIP, caller-owned streams) and the
//!   content-addressed full-frame store.
//! - [`session`]: named on-disk capture journals with batched durable
//!   appends, replay, and crash recovery.

pub mod bus;
pub mod registry;
pub mod session;
pub mod sink;

pub use bus::{BusSubscription, LiveBus};
pub use registry::{ConnectionInfo, ConnectionRegistry};
pub use session::{SessionError, SessionInfo, SessionManager};
pub use sink::{FileSink, FullFrameStore, StreamingSink, SummaryWriter};
