pub type Result<T, E = Error> = std::result::Result<T, E>;

const MAX_ERROR_CHARS: usize = 1_024;
const REDACTED: &str = "[REDACTED]";
/// Key fragments of platform and provider credentials that may appear in remote error text.
const CREDENTIAL_KEYS: &[&str] = &[
	"access_hash",
	"api_hash",
	"api_key",
	"auth_key",
	"password",
	"phone_code_hash",
	"session",
	"token",
];

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Chats not found: {}", join_ids(.chat_ids))]
	ChatsNotFound { chat_ids: Vec<i64> },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Remote error: {message}")]
	Remote { message: String },
	#[error("Fetch failed: {message}")]
	Fetch { message: String },
	#[error("Sync worker failed: {message}")]
	Worker { message: String },
	#[error("Sync cancelled.")]
	Cancelled,
}
impl Error {
	pub(crate) fn invalid(message: impl Into<String>) -> Self {
		Self::InvalidRequest { message: message.into() }
	}

	pub(crate) fn storage(err: color_eyre::Report) -> Self {
		Self::Storage { message: root_message(&err) }
	}

	pub(crate) fn provider(err: color_eyre::Report) -> Self {
		Self::Provider { message: root_message(&err) }
	}

	pub(crate) fn remote(err: color_eyre::Report) -> Self {
		Self::Remote { message: root_message(&err) }
	}
}

/// Text of the innermost error, so persisted or client-visible failures do not carry wrapper
/// context or debug formatting.
pub fn root_message(err: &color_eyre::Report) -> String {
	err.root_cause().to_string()
}

/// Redacts bearer tokens and credential pairs such as `api_hash=...` and bounds the length of an
/// error before it is persisted.
pub fn sanitize_error(text: &str) -> String {
	let mut after_bearer = false;
	let words: Vec<String> = text
		.split_whitespace()
		.map(|word| {
			let cleaned = if after_bearer {
				REDACTED.to_string()
			} else {
				redact_credential(word).unwrap_or_else(|| word.to_string())
			};

			after_bearer = word.eq_ignore_ascii_case("bearer");

			cleaned
		})
		.collect();
	let joined = words.join(" ");

	if joined.chars().count() <= MAX_ERROR_CHARS {
		return joined;
	}

	let mut truncated: String = joined.chars().take(MAX_ERROR_CHARS).collect();

	truncated.push_str("...");

	truncated
}

fn redact_credential(word: &str) -> Option<String> {
	let split = word.find(|c: char| c == '=' || c == ':')?;
	let key = word[..split].to_ascii_lowercase();

	CREDENTIAL_KEYS
		.iter()
		.any(|credential| key.contains(credential))
		.then(|| format!("{}{REDACTED}", &word[..=split]))
}

fn join_ids(ids: &[i64]) -> String {
	ids.iter().map(i64::to_string).collect::<Vec<_>>().join(", ")
}
