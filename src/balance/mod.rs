//! The per-master balancing orchestrator.

pub mod master;

pub use master::{Master, StopHandle, MAX_INTRO_POINTS, REPLICA_SET_SIZE};
