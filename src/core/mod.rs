//! Directory engine internals
//!
//! - [`hash`] - salted CRC-64 name hash
//! - [`block`] - micro block layout and byte-order conversion
//! - [`index`] - ordered in-memory index of micro entries
//! - [`micro`] - micro directory operations
//! - [`extended`] - extended directory format
//! - [`handle`] - cached directory handles, locking, growth and promotion
//! - [`cursor`] - serializable iteration positions
//! - [`dirs`] - public directory operations
//! - [`store`] - object store seam and the in-memory store

pub mod block;
pub mod config;
pub mod cursor;
pub mod dirs;
pub mod error;
pub mod extended;
pub mod handle;
pub mod hash;
pub mod index;
pub mod micro;
pub mod store;
