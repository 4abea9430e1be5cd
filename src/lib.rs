//! Append to a file that other processes may rotate away at any time.
//!
//! [`RotatableWriter`] checks, before every write, that the file it holds open is still the one
//! at its path, and reopens the path if it was renamed, deleted, or replaced. This keeps a log
//! file usable across `logrotate` (or anything like it) without `copytruncate`.

pub mod clock;
pub mod identity;
pub mod retry;

pub mod writer;

pub mod impls;

pub use identity::{DefaultIdentity, FileIdentity};
pub use retry::{RetriesExhausted, RetryPolicy};
pub use writer::{options::WriterOptions, RotatableWriter};
