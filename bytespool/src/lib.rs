//! Recycle variable-length byte buffers through power-of-two size classes.
//!
//! A [SizedPool] serves requests of any length from a fixed set of classes
//! (1 KiB to 128 MiB by default), returning an [Origin] whose view is exactly
//! the requested length. Freeing the origin makes its storage available to the
//! next request of the same class. Requests larger than the largest class are
//! allocated outside the pool.
//!
//! [ScopedBuffer] wraps an origin for read-once consumption and frees it when
//! closed (or dropped).
//!
//! # Example
//!
//! ```rust
//! use commonware_bytespool::{default_pool, Freed, ScopedBuffer};
//! use std::io::Read;
//!
//! let pool = default_pool();
//!
//! // Allocate, fill, and free directly
//! let mut origin = pool.alloc(3000);
//! assert_eq!(origin.view().len(), 3000);
//! assert_eq!(origin.capacity(), 4096);
//! origin.view_mut().fill(1);
//! assert_eq!(pool.free(origin), Freed::Pooled(2));
//!
//! // Or hand release to a scoped reader
//! let mut origin = pool.alloc(5);
//! origin.view_mut().copy_from_slice(b"hello");
//! let mut scoped = ScopedBuffer::from_origin(pool.clone(), origin);
//! let mut out = String::new();
//! scoped.read_to_string(&mut out).unwrap();
//! assert_eq!(out, "hello");
//! scoped.close();
//! ```
//!
//! # Status
//!
//! `commonware-bytespool` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

#![doc(
    html_logo_url = "https://commonware.xyz/imgs/rustdoc_logo.svg",
    html_favicon_url = "https://commonware.xyz/favicon.ico"
)]

use std::sync::OnceLock;
use thiserror::Error;

pub mod class;
mod pool;
pub use pool::{Config, Freed, Origin, SizedPool};
pub mod recycler;
mod scoped;
pub use scoped::ScopedBuffer;

/// Errors that can occur when allocating from a [SizedPool].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("requested {requested} bytes exceeds largest size class ({max} bytes)")]
    Oversized { requested: usize, max: usize },
}

/// Process-wide pool with the default [Config].
static DEFAULT_POOL: OnceLock<SizedPool> = OnceLock::new();

/// Returns the process-wide pool, creating it on first use.
///
/// The pool lives until the process exits. Buffers hold no resources besides
/// memory, so it is never torn down.
pub fn default_pool() -> &'static SizedPool {
    DEFAULT_POOL.get_or_init(SizedPool::default)
}
