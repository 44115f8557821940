//! Store traits backed by Postgres, and the provider trait backed by the HTTP embedder.

use tgs_providers::embedding::HttpEmbedder;
use tgs_storage::{
	chats,
	db::Db,
	messages,
	models::{
		ChatRecord, EmbeddingUpdate, MessageToEmbed, NewMessage, SimilarMessage, SyncConfigItem,
		SyncConfigUpsert, SyncKind, SyncStatusUpdate, TextMatch,
	},
	sync_configs,
};

use crate::{BoxFuture, ChatStore, EmbeddingProvider, MessageStore, SearchStore, SyncStore};

impl SyncStore for Db {
	fn upsert_sync_config<'a>(
		&'a self,
		chat_id: i64,
		upsert: &'a SyncConfigUpsert,
	) -> BoxFuture<'a, color_eyre::Result<SyncConfigItem>> {
		Box::pin(async move { Ok(sync_configs::upsert_sync_config(self, chat_id, upsert).await?) })
	}

	fn update_sync_status<'a>(
		&'a self,
		chat_id: i64,
		kind: SyncKind,
		update: &'a SyncStatusUpdate,
	) -> BoxFuture<'a, color_eyre::Result<u64>> {
		Box::pin(async move { Ok(sync_configs::update_sync_status(self, chat_id, kind, update).await?) })
	}

	fn get_sync_config_by_chat_id(
		&self,
		chat_id: i64,
	) -> BoxFuture<'_, color_eyre::Result<Vec<SyncConfigItem>>> {
		Box::pin(async move { Ok(sync_configs::get_sync_config_by_chat_id(self, chat_id).await?) })
	}

	fn get_sync_config_by_chat_id_and_type(
		&self,
		chat_id: i64,
		kind: SyncKind,
	) -> BoxFuture<'_, color_eyre::Result<Option<SyncConfigItem>>> {
		Box::pin(async move {
			Ok(sync_configs::get_sync_config_by_chat_id_and_type(self, chat_id, kind).await?)
		})
	}

	fn cancel_sync_config(
		&self,
		chat_id: i64,
		kind: Option<SyncKind>,
		purge: bool,
	) -> BoxFuture<'_, color_eyre::Result<u64>> {
		Box::pin(async move { Ok(sync_configs::cancel_sync_config(self, chat_id, kind, purge).await?) })
	}

	fn reset_interrupted(&self) -> BoxFuture<'_, color_eyre::Result<u64>> {
		Box::pin(async move { Ok(sync_configs::reset_interrupted(self).await?) })
	}
}

impl ChatStore for Db {
	fn get_chat(&self, chat_id: i64) -> BoxFuture<'_, color_eyre::Result<Option<ChatRecord>>> {
		Box::pin(async move { Ok(chats::get_chat(self, chat_id).await?) })
	}

	fn upsert_chat<'a>(
		&'a self,
		chat_id: i64,
		title: &'a str,
		chat_type: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move { Ok(chats::upsert_chat(self, chat_id, title, chat_type).await?) })
	}
}

impl MessageStore for Db {
	fn upsert_message<'a>(&'a self, message: &'a NewMessage) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move { Ok(messages::upsert_message(self, message).await?) })
	}

	fn find_messages_to_embed(
		&self,
		chat_id: i64,
	) -> BoxFuture<'_, color_eyre::Result<Vec<MessageToEmbed>>> {
		Box::pin(async move { Ok(messages::find_messages_to_embed(self, chat_id).await?) })
	}

	fn update_message_embeddings<'a>(
		&'a self,
		chat_id: i64,
		updates: &'a [EmbeddingUpdate],
	) -> BoxFuture<'a, color_eyre::Result<u64>> {
		Box::pin(async move { Ok(messages::update_message_embeddings(self, chat_id, updates).await?) })
	}
}

impl SearchStore for Db {
	fn find_similar_messages<'a>(
		&'a self,
		embedding: &'a [f32],
		chat_id: Option<i64>,
		limit: i64,
		offset: i64,
	) -> BoxFuture<'a, color_eyre::Result<Vec<SimilarMessage>>> {
		Box::pin(async move {
			Ok(messages::find_similar_messages(self, embedding, chat_id, limit, offset).await?)
		})
	}

	fn find_messages_by_text<'a>(
		&'a self,
		query: &'a str,
		chat_id: Option<i64>,
		limit: i64,
		offset: i64,
	) -> BoxFuture<'a, color_eyre::Result<Vec<TextMatch>>> {
		Box::pin(async move {
			Ok(messages::find_messages_by_text(self, query, chat_id, limit, offset).await?)
		})
	}
}

impl EmbeddingProvider for HttpEmbedder {
	fn embed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(HttpEmbedder::embed(self, texts).await?) })
	}
}
