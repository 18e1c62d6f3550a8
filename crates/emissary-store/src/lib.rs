//! Emissary Store — local persistence primitives.
//!
//! Everything the relay shares between negotiation processes lives in small
//! single-host files: cascade markers, session allow-lists, and lock tokens.
//! This crate provides the two primitives they are built on:
//!
//! - [`KvStore`] — a table + key → bytes mapping with a file backend
//!   ([`FileKvStore`]) and an in-memory backend for tests
//!   ([`MemoryKvStore`]). Validity windows are the callers' concern; the
//!   store itself is dumb.
//! - [`FileMutex`] — exclusive-create token files with staleness
//!   force-clear, the advisory mutual-exclusion primitive behind the
//!   per-operator user lock.
//!
//! All of this state is advisory, not authoritative: a store failure must
//! degrade toward re-prompting the operator, never toward silent approval,
//! so read paths swallow errors into misses and log them.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod kv;
pub mod mutex;

pub use error::{StoreError, StoreResult};
pub use kv::{FileKvStore, KvStore, MemoryKvStore, sanitize_key};
pub use mutex::{FileMutex, FileMutexGuard};
