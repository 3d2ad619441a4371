//! Durable local store
//!
//! The single source of truth for entity state on this client. Every
//! operation is scoped to an owner; success from `put`/`delete` means the
//! write is durable. Failures here are fatal: the engine's core guarantee
//! cannot be met if local persistence is broken.

pub mod error;

pub use error::StoreError;

use crate::domain::{Collection, Entity, EntityRef};
use crate::infrastructure::database::entities::{entity, mutation};
use crate::infrastructure::database::Database;
use crate::infrastructure::remote::RemoteEntity;
use crate::shared::utils::rewrite_id_references;
use sea_orm::{
	ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Owner-scoped durable store over the SQLite database.
#[derive(Clone)]
pub struct LocalStore {
	db: Arc<Database>,
}

impl LocalStore {
	pub fn new(db: Arc<Database>) -> Self {
		Self { db }
	}

	/// Fetch one entity.
	pub async fn get(&self, owner: &str, id: &EntityRef) -> Result<Option<Entity>, StoreError> {
		let row = entity::Entity::find()
			.filter(entity::Column::OwnerId.eq(owner))
			.filter(entity::Column::EntityId.eq(id.as_str()))
			.one(self.db.conn())
			.await?;
		Ok(row.and_then(|r| r.to_entity()))
	}

	/// Fetch every entity of a collection for one owner.
	pub async fn get_all(
		&self,
		owner: &str,
		collection: Collection,
	) -> Result<Vec<Entity>, StoreError> {
		let rows = entity::Entity::find()
			.filter(entity::Column::OwnerId.eq(owner))
			.filter(entity::Column::Collection.eq(collection.as_str()))
			.order_by_asc(entity::Column::UpdatedAt)
			.all(self.db.conn())
			.await?;
		Ok(rows.iter().filter_map(|r| r.to_entity()).collect())
	}

	/// Insert or overwrite an entity. Durable before returning.
	pub async fn put(&self, record: &Entity) -> Result<(), StoreError> {
		let existing = entity::Entity::find()
			.filter(entity::Column::OwnerId.eq(&record.owner_id))
			.filter(entity::Column::EntityId.eq(record.id.as_str()))
			.one(self.db.conn())
			.await?;

		match existing {
			Some(row) => {
				let mut active: entity::ActiveModel = row.into();
				active.payload = Set(record.payload.clone());
				active.updated_at = Set(record.updated_at);
				active.is_local = Set(record.id.is_local());
				active.update(self.db.conn()).await?;
			}
			None => {
				entity::ActiveModel {
					owner_id: Set(record.owner_id.clone()),
					entity_id: Set(record.id.as_str().to_string()),
					collection: Set(record.collection.as_str().to_string()),
					payload: Set(record.payload.clone()),
					updated_at: Set(record.updated_at),
					is_local: Set(record.id.is_local()),
					..Default::default()
				}
				.insert(self.db.conn())
				.await?;
			}
		}
		Ok(())
	}

	/// Delete an entity. Deleting an absent entity is not an error.
	pub async fn delete(&self, owner: &str, id: &EntityRef) -> Result<(), StoreError> {
		entity::Entity::delete_many()
			.filter(entity::Column::OwnerId.eq(owner))
			.filter(entity::Column::EntityId.eq(id.as_str()))
			.exec(self.db.conn())
			.await?;
		Ok(())
	}

	/// Replace a local placeholder id with the server's canonical id, in one
	/// transaction: the entity row itself, references inside every other
	/// payload of the owner, and references inside queued mutation payloads.
	/// Nothing resolvable by the old id survives.
	pub async fn remap_entity_id(
		&self,
		owner: &str,
		local: &EntityRef,
		canonical: &EntityRef,
		server: &RemoteEntity,
	) -> Result<(), StoreError> {
		debug!(%local, %canonical, "remapping local id to canonical");
		let txn = self.db.conn().begin().await?;

		// The remapped row takes the server's view wholesale
		if let Some(row) = entity::Entity::find()
			.filter(entity::Column::OwnerId.eq(owner))
			.filter(entity::Column::EntityId.eq(local.as_str()))
			.one(&txn)
			.await?
		{
			let mut active: entity::ActiveModel = row.into();
			active.entity_id = Set(canonical.as_str().to_string());
			active.payload = Set(server.payload.clone());
			active.updated_at = Set(server.updated_at);
			active.is_local = Set(false);
			active.update(&txn).await?;
		}

		// References from sibling entities
		let rows = entity::Entity::find()
			.filter(entity::Column::OwnerId.eq(owner))
			.all(&txn)
			.await?;
		for row in rows {
			let mut payload = row.payload.clone();
			if rewrite_id_references(&mut payload, local.as_str(), canonical.as_str()) {
				let mut active: entity::ActiveModel = row.into();
				active.payload = Set(payload);
				active.update(&txn).await?;
			}
		}

		// References from still-queued mutations
		let queued = mutation::Entity::find()
			.filter(mutation::Column::OwnerId.eq(owner))
			.all(&txn)
			.await?;
		for row in queued {
			let mut records = row.records.clone();
			let mut changed =
				rewrite_id_references(&mut records, local.as_str(), canonical.as_str());
			let mut active: mutation::ActiveModel = row.clone().into();
			if row.entity_ref == local.as_str() {
				active.entity_ref = Set(canonical.as_str().to_string());
				changed = true;
			}
			if changed {
				active.records = Set(records);
				active.update(&txn).await?;
			}
		}

		txn.commit().await?;
		Ok(())
	}

	/// Overwrite an owner's cached view of a collection with the server's
	/// list, leaving rows with pending local mutations untouched so an
	/// optimistic write cannot be clobbered by a refresh racing the
	/// reconciler.
	pub async fn replace_collection(
		&self,
		owner: &str,
		collection: Collection,
		remote: &[RemoteEntity],
		preserve: &HashSet<String>,
	) -> Result<(), StoreError> {
		let txn = self.db.conn().begin().await?;

		let existing = entity::Entity::find()
			.filter(entity::Column::OwnerId.eq(owner))
			.filter(entity::Column::Collection.eq(collection.as_str()))
			.all(&txn)
			.await?;

		let remote_ids: HashSet<&str> = remote.iter().map(|r| r.id.as_str()).collect();

		// Drop rows the server no longer has, unless they carry pending work
		for row in &existing {
			if !remote_ids.contains(row.entity_id.as_str()) && !preserve.contains(&row.entity_id) {
				entity::Entity::delete_by_id(row.id).exec(&txn).await?;
			}
		}

		for item in remote {
			if preserve.contains(&item.id) {
				continue;
			}
			match existing.iter().find(|r| r.entity_id == item.id) {
				Some(row) => {
					let mut active: entity::ActiveModel = row.clone().into();
					active.payload = Set(item.payload.clone());
					active.updated_at = Set(item.updated_at);
					active.is_local = Set(false);
					active.update(&txn).await?;
				}
				None => {
					entity::ActiveModel {
						owner_id: Set(owner.to_string()),
						entity_id: Set(item.id.clone()),
						collection: Set(collection.as_str().to_string()),
						payload: Set(item.payload.clone()),
						updated_at: Set(item.updated_at),
						is_local: Set(false),
						..Default::default()
					}
					.insert(&txn)
					.await?;
				}
			}
		}

		txn.commit().await?;
		Ok(())
	}
}
