use std::{future::Future, sync::Arc, time::Duration};

use rand::Rng;

use crate::{clock::Clock, progress::ProgressReporter};

/// Upper bound (exclusive) of the random jitter added to every backoff delay.
pub const MAX_JITTER: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Retries after the first attempt, so an operation runs at most `max_retries + 1` times.
	pub max_retries: u32,
	pub initial_delay: Duration,
}
impl RetryPolicy {
	pub fn from_config(cfg: &tgs_config::SyncConfig) -> Self {
		Self { max_retries: cfg.max_retries, initial_delay: Duration::from_millis(cfg.initial_delay_ms) }
	}

	/// Delay before retry `attempt` (zero-based), without jitter.
	pub fn base_delay(&self, attempt: u32) -> Duration {
		let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);

		self.initial_delay.saturating_mul(factor)
	}

	pub fn delay_for(&self, attempt: u32, jitter: Duration) -> Duration {
		self.base_delay(attempt).saturating_add(jitter)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self { max_retries: 3, initial_delay: Duration::from_millis(2_000) }
	}
}

pub fn jitter() -> Duration {
	let max = MAX_JITTER.as_millis() as u64;

	Duration::from_millis(rand::thread_rng().gen_range(0..max))
}

/// Re-runs a fallible async operation with exponential backoff.
#[derive(Clone)]
pub struct RetryExecutor {
	policy: RetryPolicy,
	clock: Arc<dyn Clock>,
	progress: ProgressReporter,
}
impl RetryExecutor {
	pub fn new(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
		Self { policy, clock, progress: ProgressReporter::disabled() }
	}

	/// Announces every backoff on `progress` as a waiting report before sleeping.
	pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
		self.progress = progress;

		self
	}

	pub fn policy(&self) -> RetryPolicy {
		self.policy
	}

	/// Returns the first success, or the last error once retries are exhausted.
	pub async fn run<F, Fut, T>(&self, operation: &'static str, mut op: F) -> color_eyre::Result<T>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = color_eyre::Result<T>>,
	{
		let mut attempt = 0;

		loop {
			match op().await {
				Ok(value) => return Ok(value),
				Err(err) if attempt >= self.policy.max_retries => {
					tracing::error!(
						operation,
						attempts = attempt + 1,
						error = %err,
						"Operation failed after exhausting retries."
					);

					return Err(err);
				},
				Err(err) => {
					let delay = self.policy.delay_for(attempt, jitter());

					tracing::warn!(
						operation,
						attempt = attempt + 1,
						delay_ms = delay.as_millis() as u64,
						error = %err,
						"Operation failed. Retrying."
					);

					self.progress.waiting(format!("Retrying {operation} after a failure."), delay);
				self.clock.sleep(delay).await;

					attempt += 1;
				},
			}
		}
	}
}
