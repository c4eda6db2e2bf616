//! onionmux library crate
//!
//! A load-balancing frontend for v2 onion services: one public master
//! address whose descriptors multiplex the introduction points advertised
//! by many backend instances.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration loading and validation
//! - [`crypto`] - RSA key handling and identifier derivation
//! - [`descriptor`] - v2 descriptor and router status codecs
//! - [`tor`] - Controller client and directory ring tracking
//! - [`balance`] - The per-master balancing orchestrator
//! - [`util`] - Encoding, stop signalling, time

pub mod balance;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod descriptor;
pub mod logging;
pub mod tor;
pub mod util;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
