use std::{
	fmt,
	time::{Duration, Instant},
};

/// Source of time for the reopen retry loop.
///
/// The writer only ever asks what time it is and to wait; swapping this out lets the retry bound
/// and backoff be exercised without real delays.
pub trait Clock: fmt::Debug + Send + Sync {
	/// The current instant.
	fn now(&self) -> Instant;

	/// Block the calling thread for `duration`.
	fn sleep(&self, duration: Duration);
}

/// The real monotonic clock, sleeping the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> Instant {
		Instant::now()
	}

	fn sleep(&self, duration: Duration) {
		std::thread::sleep(duration);
	}
}


#[cfg(test)]
#[test]
fn system_clock_sleeps_at_least_requested() {
	let clock = SystemClock;
	let start = clock.now();
	clock.sleep(Duration::from_millis(5));
	assert!(clock.now() - start >= Duration::from_millis(5));
}
