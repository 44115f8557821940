pub mod chats;
pub mod db;
pub mod messages;
pub mod models;
pub mod schema;
pub mod sync_configs;
pub mod time_serde;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
