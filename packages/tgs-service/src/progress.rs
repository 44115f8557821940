use std::{
	sync::{
		Arc,
		atomic::{AtomicU8, Ordering},
	},
	time::Duration,
};

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use tgs_storage::time_serde;

/// `type` tag of progress metadata announcing a pause before work resumes.
pub const WAITING: &str = "waiting";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
	pub percent: u8,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub metadata: Option<Value>,
}
impl Progress {
	/// Seconds until work resumes, when this report announces a pause.
	pub fn wait_seconds(&self) -> Option<u64> {
		let metadata = self.metadata.as_ref()?;

		if metadata.get("type")?.as_str()? != WAITING {
			return None;
		}

		metadata.get("waitSeconds")?.as_u64()
	}
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WaitingMetadata {
	#[serde(rename = "type")]
	kind: &'static str,
	wait_seconds: u64,
	#[serde(with = "time_serde")]
	resume_time: OffsetDateTime,
}

/// Best-effort progress sink. Reports are dropped when nobody listens.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
	tx: Option<UnboundedSender<Progress>>,
	/// Last percent sent by any clone, reused by pause announcements.
	last_percent: Arc<AtomicU8>,
}
impl ProgressReporter {
	pub fn new(tx: UnboundedSender<Progress>) -> Self {
		Self { tx: Some(tx), last_percent: Arc::default() }
	}

	pub fn disabled() -> Self {
		Self::default()
	}

	pub fn channel() -> (Self, UnboundedReceiver<Progress>) {
		let (tx, rx) = mpsc::unbounded_channel();

		(Self::new(tx), rx)
	}

	pub fn report(&self, percent: u8, message: impl Into<String>) {
		self.send(Progress { percent: percent.min(100), message: message.into(), metadata: None });
	}

	pub fn report_with(&self, percent: u8, message: impl Into<String>, metadata: Value) {
		self.send(Progress {
			percent: percent.min(100),
			message: message.into(),
			metadata: Some(metadata),
		});
	}

	/// Announces that work pauses for `wait`, at the last reported percent.
	pub fn waiting(&self, message: impl Into<String>, wait: Duration) {
		let wait_seconds = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
		let metadata = WaitingMetadata {
			kind: WAITING,
			wait_seconds,
			resume_time: OffsetDateTime::now_utc() + wait,
		};

		self.send(Progress {
			percent: self.last_percent.load(Ordering::Relaxed),
			message: message.into(),
			metadata: serde_json::to_value(metadata).ok(),
		});
	}

	fn send(&self, progress: Progress) {
		self.last_percent.store(progress.percent, Ordering::Relaxed);

		if let Some(tx) = &self.tx {
			let _ = tx.send(progress);
		}
	}
}

/// `floor(base + done / total * span)`, clamped to 100.
pub fn admission_percent(base: u8, span: u8, done: usize, total: usize) -> u8 {
	if total == 0 {
		return base.saturating_add(span).min(100);
	}

	let done = done.min(total) as u64;
	let value = u64::from(base) + done * u64::from(span) / total as u64;

	value.min(100) as u8
}
