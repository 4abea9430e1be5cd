use std::sync::Arc;

use crate::{
	clock::{Clock, SystemClock},
	retry::RetryPolicy,
};

/// Options used when opening a [`RotatableWriter`](super::RotatableWriter).
///
/// Everything has a default; the defaults suit a process that owns its log file and expects a
/// rotation tool to move it away from time to time.
#[derive(Debug, Clone)]
pub struct WriterOptions {
	/// Permission bits for the file, if this writer creates it.
	///
	/// Only used on unix, where the process umask still applies.
	///
	/// Defaults to `0o666`.
	pub mode: u32,

	/// Whether this writer may create the file when nothing is at the path.
	///
	/// When false, some other actor (typically the rotation tool) is expected to have created the
	/// next file, and opening a missing path is an error.
	///
	/// Defaults to true.
	pub self_create: bool,

	/// How to retry opening when the new file is not accessible yet.
	pub retry: RetryPolicy,

	/// Time source for retry backoff.
	///
	/// Defaults to [`SystemClock`].
	pub clock: Arc<dyn Clock>,
}

impl Default for WriterOptions {
	fn default() -> Self {
		Self {
			mode: 0o666,
			self_create: true,
			retry: RetryPolicy::default(),
			clock: Arc::new(SystemClock),
		}
	}
}

impl WriterOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_mode(mut self, mode: u32) -> Self {
		self.mode = mode;
		self
	}

	pub fn with_self_create(mut self, self_create: bool) -> Self {
		self.self_create = self_create;
		self
	}

	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}

	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	/// The [`std::fs::OpenOptions`] one open attempt uses.
	pub(crate) fn open_options(&self) -> std::fs::OpenOptions {
		let mut options = std::fs::OpenOptions::new();
		options.append(true).create(self.self_create);

		#[cfg(unix)]
		{
			use std::os::unix::fs::OpenOptionsExt as _;
			options.mode(self.mode);
		}

		options
	}
}

#[cfg(test)]
#[test]
fn builders_override_defaults() {
	let options = WriterOptions::new()
		.with_mode(0o600)
		.with_self_create(false)
		.with_retry(RetryPolicy::none());

	assert_eq!(options.mode, 0o600);
	assert!(!options.self_create);
	assert_eq!(options.retry.max_retries, 0);

	let defaults = WriterOptions::default();
	assert_eq!(defaults.mode, 0o666);
	assert!(defaults.self_create);
	assert_eq!(defaults.retry.max_retries, 3);
}
