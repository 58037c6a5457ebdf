//! CNanoLog: an ultra-low-latency structured logging engine. Producers pack a
//! format-string-and-arguments pair into a per-thread staging buffer in a
//! handful of nanoseconds; a single background thread drains, compresses, and
//! writes every entry to a compact binary file that is rehydrated offline.
//!
//! `cnanolog-macros` is the call-site layer most callers actually reach for
//! (`log_info!`, `log_warn!`, `log_error!`, `log_debug!`); this crate also
//! exposes [`facade::register`] and [`facade::pack_and_commit`] directly for
//! callers who want to build their own call-site wrapper.

pub mod binary_writer;
pub mod buffer_registry;
pub mod compressor;
pub mod config;
pub mod diag;
pub mod error;
pub mod facade;
pub mod format;
pub mod packer;
pub mod registry;
pub mod stats;
pub mod staging;
pub mod timestamp;
pub mod writer;

pub use config::{FacadeConfig, FacadeConfigBuilder, RotationPolicy, WireFormat};
pub use error::InitError;
pub use facade::{
  get_stats, init, init_ex, is_enabled, pack_and_commit, preallocate, register, register_level,
  reset_stats, set_level, set_writer_affinity, shutdown,
};
pub use format::{ArgType, LogLevel};
pub use packer::{ArgValue, IntoArgValue};
pub use stats::StatsSnapshot;

pub extern crate cnanolog_macros;
