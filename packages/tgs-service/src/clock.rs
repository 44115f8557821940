use std::time::Duration;

use tokio::time::Instant;

use crate::BoxFuture;

/// Time source for backoff and pacing.
pub trait Clock
where
	Self: Send + Sync,
{
	fn now(&self) -> Instant;

	fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;
impl Clock for TokioClock {
	fn now(&self) -> Instant {
		Instant::now()
	}

	fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
		Box::pin(tokio::time::sleep(duration))
	}
}
