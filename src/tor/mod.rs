//! Controller connectivity and directory ring tracking.

pub mod control;
pub mod hsdir;
pub mod mock;

pub use control::{ControlClient, ControlEvent, Controller, EventKind};
pub use hsdir::{DirectoryRing, HsDirTracker, N_CONSECUTIVE_REPLICAS};
