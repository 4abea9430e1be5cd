//! Bounded retries for (re)opening the target file.
//!
//! A log rotation tool typically creates the new file and only then fixes up its ownership and
//! mode. A writer that notices the rotation in between sees a permission error that will resolve
//! itself a moment later, so opening is retried with backoff while errors look transient.
//!
//! The loop is modelled as an explicit [`OpenState`] machine driven by [`Attempts`], with time
//! supplied by a [`Clock`], so the bound and backoff can be tested without touching the disk.

use std::{
	error::Error,
	fmt, io,
	time::{Duration, Instant},
};

use crate::clock::Clock;

/// Classifies open errors as transient (worth retrying) or not.
pub type TransientClassifier = fn(&io::Error) -> bool;

/// The default classifier: only [`PermissionDenied`](io::ErrorKind::PermissionDenied) is transient.
pub fn permission_denied_is_transient(err: &io::Error) -> bool {
	err.kind() == io::ErrorKind::PermissionDenied
}

/// How hard to try when opening fails with a transient error.
///
/// Retries stop at whichever comes first: `max_retries` retries, or the point where the next
/// backoff would take the total time spent past `max_window`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	/// Retries after the first attempt.
	///
	/// Defaults to 3.
	pub max_retries: u32,

	/// Delay before the first retry.
	///
	/// Defaults to 10ms.
	pub initial_backoff: Duration,

	/// Upper bound on any single delay.
	///
	/// Defaults to 1s.
	pub max_backoff: Duration,

	/// Factor applied to the delay after each retry.
	///
	/// Defaults to 2.
	pub multiplier: u32,

	/// Total time budget for one open, measured from the first attempt.
	///
	/// Defaults to 5s.
	pub max_window: Duration,

	/// Which errors are worth retrying.
	///
	/// Defaults to [`permission_denied_is_transient`].
	pub transient: TransientClassifier,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 3,
			initial_backoff: Duration::from_millis(10),
			max_backoff: Duration::from_secs(1),
			multiplier: 2,
			max_window: Duration::from_secs(5),
			transient: permission_denied_is_transient,
		}
	}
}

impl RetryPolicy {
	pub fn new() -> Self {
		Self::default()
	}

	/// A policy that never retries.
	pub fn none() -> Self {
		Self::default().with_max_retries(0)
	}

	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;
		self
	}

	pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
		self.initial_backoff = initial_backoff;
		self
	}

	pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
		self.max_backoff = max_backoff;
		self
	}

	pub fn with_multiplier(mut self, multiplier: u32) -> Self {
		self.multiplier = multiplier;
		self
	}

	pub fn with_max_window(mut self, max_window: Duration) -> Self {
		self.max_window = max_window;
		self
	}

	pub fn with_transient(mut self, transient: TransientClassifier) -> Self {
		self.transient = transient;
		self
	}

	/// Delay before the `retry`th retry (1-based).
	pub fn backoff(&self, retry: u32) -> Duration {
		let factor = self.multiplier.saturating_pow(retry.saturating_sub(1));
		self.initial_backoff
			.saturating_mul(factor)
			.min(self.max_backoff)
	}
}

/// Where one open sequence stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
	/// Nothing attempted yet.
	Closed,

	/// Attempt number `attempt` (1-based) is in flight.
	Opening { attempt: u32 },

	/// Attempt `attempt` failed transiently; the next one follows after `delay`.
	Retrying { attempt: u32, delay: Duration },

	/// Opened after `attempts` attempts.
	Open { attempts: u32 },

	/// Gave up after `attempts` attempts.
	Failed { attempts: u32 },
}

/// Drives an [`OpenState`] through one open sequence.
#[derive(Debug)]
pub struct Attempts<'p> {
	policy: &'p RetryPolicy,
	started: Instant,
	state: OpenState,
}

impl<'p> Attempts<'p> {
	pub fn new(policy: &'p RetryPolicy, started: Instant) -> Self {
		Self {
			policy,
			started,
			state: OpenState::Closed,
		}
	}

	pub fn state(&self) -> OpenState {
		self.state
	}

	/// Begin the next attempt, returning its number.
	///
	/// Starting from `Open` or `Failed` is a no-op: the sequence is over.
	pub fn begin(&mut self) -> u32 {
		let attempt = match self.state {
			OpenState::Closed => 1,
			OpenState::Retrying { attempt, .. } => attempt + 1,
			OpenState::Opening { attempt } => attempt,
			OpenState::Open { attempts } | OpenState::Failed { attempts } => return attempts,
		};
		self.state = OpenState::Opening { attempt };
		attempt
	}

	/// The in-flight attempt succeeded.
	pub fn succeeded(&mut self) {
		if let OpenState::Opening { attempt } = self.state {
			self.state = OpenState::Open { attempts: attempt };
		}
	}

	/// The in-flight attempt failed with `err` at `now`.
	///
	/// Returns the delay to wait before the next attempt, or `None` once the sequence has failed.
	pub fn failed(&mut self, err: &io::Error, now: Instant) -> Option<Duration> {
		let OpenState::Opening { attempt } = self.state else {
			return None;
		};

		let delay = self.policy.backoff(attempt);
		let within_window = now
			.saturating_duration_since(self.started)
			.saturating_add(delay)
			<= self.policy.max_window;

		if (self.policy.transient)(err) && attempt <= self.policy.max_retries && within_window {
			self.state = OpenState::Retrying { attempt, delay };
			Some(delay)
		} else {
			self.state = OpenState::Failed { attempts: attempt };
			None
		}
	}
}

/// Run `open` until it succeeds or the policy gives up.
///
/// A non-transient error is returned as is. A transient error that outlasted the retries keeps
/// its kind but carries a [`RetriesExhausted`] payload.
pub fn retry_open<T>(
	policy: &RetryPolicy,
	clock: &dyn Clock,
	mut open: impl FnMut() -> io::Result<T>,
) -> io::Result<T> {
	let mut attempts = Attempts::new(policy, clock.now());
	loop {
		let attempt = attempts.begin();
		match open() {
			Ok(value) => {
				attempts.succeeded();
				return Ok(value);
			}
			Err(err) => match attempts.failed(&err, clock.now()) {
				Some(delay) => clock.sleep(delay),
				None if attempt > 1 && (policy.transient)(&err) => {
					return Err(io::Error::new(
						err.kind(),
						RetriesExhausted {
							attempts: attempt,
							source: err,
						},
					));
				}
				None => return Err(err),
			},
		}
	}
}

/// Payload of the error returned when a transient open failure outlasted its retries.
#[derive(Debug)]
pub struct RetriesExhausted {
	/// How many times opening was attempted.
	pub attempts: u32,

	/// The error from the last attempt.
	pub source: io::Error,
}

impl RetriesExhausted {
	/// Find this payload inside an [`io::Error`], if it is there.
	pub fn from_io(err: &io::Error) -> Option<&Self> {
		err.get_ref().and_then(|inner| inner.downcast_ref())
	}
}

impl fmt::Display for RetriesExhausted {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"gave up opening after {} attempts: {}",
			self.attempts, self.source
		)
	}
}

impl Error for RetriesExhausted {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		Some(&self.source)
	}
}
