use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::Mutex, time::Instant};

use crate::clock::Clock;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1_500);

/// Enforces a minimum spacing between the starts of successive calls.
///
/// Callers queue on the internal lock, so concurrent callers are spaced out one after another.
/// The wrapped call itself runs outside the lock and may overlap with the next caller's wait.
pub struct RateLimiter {
	min_interval: Duration,
	clock: Arc<dyn Clock>,
	last_start: Mutex<Option<Instant>>,
}
impl RateLimiter {
	pub fn new(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
		Self { min_interval, clock, last_start: Mutex::new(None) }
	}

	pub fn min_interval(&self) -> Duration {
		self.min_interval
	}

	pub async fn run<F, Fut, T>(&self, call: F) -> T
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = T>,
	{
		{
			let mut last_start = self.last_start.lock().await;

			if let Some(previous) = *last_start {
				let ready_at = previous + self.min_interval;
				let now = self.clock.now();

				if ready_at > now {
					let wait = ready_at - now;

					tracing::debug!(wait_ms = wait.as_millis() as u64, "Pacing rate-limited call.");

					self.clock.sleep(wait).await;
				}
			}

			*last_start = Some(self.clock.now());
		}

		call().await
	}
}
