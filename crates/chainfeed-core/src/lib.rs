//! chainfeed-core — foundation types for the ordered block ingestion pipeline.
//!
//! # Overview
//!
//! - [`Hex`] — canonical byte value with the node's hex wire format
//! - [`types`] — blocks, receipts, normalized traces, [`BlockUnit`], [`Genesis`]
//! - [`SharedCursor`] — last emitted `(height, hash)` behind a read/write lock
//! - [`ReceiverConfig`] — pipeline configuration

pub mod config;
pub mod cursor;
pub mod error;
pub mod hex;
pub mod types;

pub use config::{RateLimiterConfig, ReceiverConfig, RetryConfig, TraceFormat};
pub use cursor::{Cursor, SharedCursor};
pub use error::ConfigError;
pub use hex::{Hex, HexError};
pub use types::{
    Block, BlockUnit, CallKind, Genesis, Receipt, Trace, TraceAction, TraceKind, TraceResult,
    Transaction,
};
