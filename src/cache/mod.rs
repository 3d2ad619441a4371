//! Response cache for read paths
//!
//! Holds the last good response per route. Never authoritative: every entry
//! is rebuildable from the durable store or the network, and the write path
//! never reads from here.

use crate::infrastructure::database::entities::cache_entry;
use crate::infrastructure::database::Database;
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use std::sync::Arc;

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
	/// Straight from the network
	Fresh,
	/// Last cached or locally-stored snapshot; the caller should disclose
	/// that the data may be behind the server
	StaleCached,
}

/// A cached response body.
#[derive(Debug, Clone)]
pub struct CachedResponse {
	pub body: serde_json::Value,
	pub fetched_at: DateTime<Utc>,
}

/// Durable per-route response cache.
#[derive(Clone)]
pub struct ResponseCache {
	db: Arc<Database>,
}

impl ResponseCache {
	pub fn new(db: Arc<Database>) -> Self {
		Self { db }
	}

	pub async fn get(&self, route_key: &str) -> Result<Option<CachedResponse>, StoreError> {
		let row = cache_entry::Entity::find()
			.filter(cache_entry::Column::RouteKey.eq(route_key))
			.one(self.db.conn())
			.await?;
		Ok(row.map(|r| CachedResponse {
			body: r.body,
			fetched_at: r.fetched_at,
		}))
	}

	pub async fn put(&self, route_key: &str, body: serde_json::Value) -> Result<(), StoreError> {
		let existing = cache_entry::Entity::find()
			.filter(cache_entry::Column::RouteKey.eq(route_key))
			.one(self.db.conn())
			.await?;

		match existing {
			Some(row) => {
				let mut active: cache_entry::ActiveModel = row.into();
				active.body = Set(body);
				active.fetched_at = Set(Utc::now());
				active.update(self.db.conn()).await?;
			}
			None => {
				cache_entry::ActiveModel {
					route_key: Set(route_key.to_string()),
					body: Set(body),
					fetched_at: Set(Utc::now()),
					..Default::default()
				}
				.insert(self.db.conn())
				.await?;
			}
		}
		Ok(())
	}
}
