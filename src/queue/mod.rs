//! Mutation queue
//!
//! Append-only log of pending writes, keyed by `(owner, entity_ref)` and
//! conflated per entity: consecutive updates collapse into the latest
//! payload, and a delete of a never-synced entity erases its sub-log
//! entirely. The remote service only ever observes the conflated sequence,
//! never the intermediate history.

use crate::domain::{Collection, EntityRef, MutationKind, MutationRecord};
use crate::infrastructure::database::entities::{mutation, sync_cursor};
use crate::infrastructure::database::Database;
use crate::store::StoreError;
use sea_orm::{
	ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter,
	QueryOrder, Set, TransactionTrait,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// One drainable unit: an entity's conflated sub-log.
#[derive(Debug, Clone)]
pub struct QueuedSubLog {
	pub owner_id: String,
	pub collection: Collection,
	pub entity_ref: EntityRef,
	pub records: Vec<MutationRecord>,
	pub attempts: u32,
}

/// Persistent, per-entity-conflating mutation queue.
#[derive(Clone)]
pub struct MutationQueue {
	db: Arc<Database>,
}

impl MutationQueue {
	pub fn new(db: Arc<Database>) -> Self {
		Self { db }
	}

	/// Record a pending write. Never fails visibly to the UI beyond a fatal
	/// storage error; conflation happens here.
	pub async fn enqueue(
		&self,
		owner: &str,
		collection: Collection,
		entity_ref: &EntityRef,
		kind: MutationKind,
		payload: Option<serde_json::Value>,
	) -> Result<(), StoreError> {
		let txn = self.db.conn().begin().await?;

		let existing = mutation::Entity::find()
			.filter(mutation::Column::OwnerId.eq(owner))
			.filter(mutation::Column::EntityRef.eq(entity_ref.as_str()))
			.one(&txn)
			.await?;

		match (kind, existing) {
			(MutationKind::Create, None) => {
				let sequence = Self::allocate_sequence(&txn, owner).await?;
				let record = MutationRecord::new(
					sequence,
					entity_ref.clone(),
					collection,
					MutationKind::Create,
					payload,
				);
				Self::insert_sub_log(&txn, owner, collection, entity_ref, vec![record], sequence)
					.await?;
			}
			(MutationKind::Create, Some(row)) => {
				// Shouldn't happen for a fresh local id; conflate defensively
				warn!(%entity_ref, "create enqueued for an entity with a pending sub-log");
				Self::conflate_into(&txn, row, payload).await?;
			}
			(MutationKind::Update, Some(row)) => {
				let records: Vec<MutationRecord> = serde_json::from_value(row.records.clone())?;
				match records.last().map(|r| r.kind) {
					Some(MutationKind::Create) | Some(MutationKind::Update) => {
						// Conflation: replace the last record's payload in
						// place; sequence (and so FIFO position) is untouched
						Self::conflate_into(&txn, row, payload).await?;
					}
					Some(MutationKind::Delete) => {
						// The entity is already gone locally; nothing newer
						// to send
						warn!(%entity_ref, "update enqueued after a pending delete; dropped");
					}
					None => {
						Self::conflate_into(&txn, row, payload).await?;
					}
				}
			}
			(MutationKind::Update, None) => {
				// Already-synced entity with no pending sub-log
				let sequence = Self::allocate_sequence(&txn, owner).await?;
				let record = MutationRecord::new(
					sequence,
					entity_ref.clone(),
					collection,
					MutationKind::Update,
					payload,
				);
				Self::insert_sub_log(&txn, owner, collection, entity_ref, vec![record], sequence)
					.await?;
			}
			(MutationKind::Delete, Some(row)) => {
				let records: Vec<MutationRecord> = serde_json::from_value(row.records.clone())?;
				if records.first().map(|r| r.kind) == Some(MutationKind::Create) {
					// Never synced: the entity never existed server-side, so
					// there is nothing to send at all
					debug!(%entity_ref, "delete erased an unsynced create");
					mutation::Entity::delete_by_id(row.id).exec(&txn).await?;
				} else {
					// Collapse any pending update into a single delete,
					// keeping the sub-log's queue position
					let sequence = row.first_sequence as u64;
					let record = MutationRecord::new(
						sequence,
						entity_ref.clone(),
						collection,
						MutationKind::Delete,
						None,
					);
					let mut active: mutation::ActiveModel = row.into();
					active.records = Set(serde_json::to_value(vec![record])?);
					active.attempts = Set(0);
					active.failed = Set(false);
					active.update(&txn).await?;
				}
			}
			(MutationKind::Delete, None) => {
				let sequence = Self::allocate_sequence(&txn, owner).await?;
				let record = MutationRecord::new(
					sequence,
					entity_ref.clone(),
					collection,
					MutationKind::Delete,
					None,
				);
				Self::insert_sub_log(&txn, owner, collection, entity_ref, vec![record], sequence)
					.await?;
			}
		}

		txn.commit().await?;
		Ok(())
	}

	/// Snapshot of every drainable sub-log, ordered by each sub-log's
	/// earliest surviving sequence. Sub-logs whose retries are exhausted are
	/// excluded until manually re-armed.
	pub async fn drain_order(&self) -> Result<Vec<QueuedSubLog>, StoreError> {
		let rows = mutation::Entity::find()
			.filter(mutation::Column::Failed.eq(false))
			.order_by_asc(mutation::Column::FirstSequence)
			.all(self.db.conn())
			.await?;

		let mut out = Vec::with_capacity(rows.len());
		for row in rows {
			let Some(collection) = Collection::from_str(&row.collection) else {
				warn!(collection = %row.collection, "skipping sub-log with unknown collection");
				continue;
			};
			out.push(QueuedSubLog {
				owner_id: row.owner_id,
				collection,
				entity_ref: EntityRef::new(row.entity_ref),
				records: serde_json::from_value(row.records)?,
				attempts: row.attempts as u32,
			});
		}
		Ok(out)
	}

	/// Remove a fully-applied sub-log.
	pub async fn ack(&self, owner: &str, entity_ref: &EntityRef) -> Result<(), StoreError> {
		mutation::Entity::delete_many()
			.filter(mutation::Column::OwnerId.eq(owner))
			.filter(mutation::Column::EntityRef.eq(entity_ref.as_str()))
			.exec(self.db.conn())
			.await?;
		Ok(())
	}

	/// Leave a sub-log queued at its position after a failed attempt.
	/// Returns the attempt count so far; at `max_attempts` the sub-log is
	/// marked failed and excluded from future drains.
	pub async fn requeue(
		&self,
		owner: &str,
		entity_ref: &EntityRef,
		max_attempts: u32,
	) -> Result<u32, StoreError> {
		let row = mutation::Entity::find()
			.filter(mutation::Column::OwnerId.eq(owner))
			.filter(mutation::Column::EntityRef.eq(entity_ref.as_str()))
			.one(self.db.conn())
			.await?;

		let Some(row) = row else { return Ok(0) };
		let attempts = row.attempts as u32 + 1;
		let mut active: mutation::ActiveModel = row.into();
		active.attempts = Set(attempts as i32);
		if attempts >= max_attempts {
			active.failed = Set(true);
		}
		active.update(self.db.conn()).await?;
		Ok(attempts)
	}

	/// Re-arm every failed sub-log for an owner (manual retry).
	pub async fn retry_failed(&self, owner: &str) -> Result<u64, StoreError> {
		let rows = mutation::Entity::find()
			.filter(mutation::Column::OwnerId.eq(owner))
			.filter(mutation::Column::Failed.eq(true))
			.all(self.db.conn())
			.await?;

		let count = rows.len() as u64;
		for row in rows {
			let mut active: mutation::ActiveModel = row.into();
			active.failed = Set(false);
			active.attempts = Set(0);
			active.update(self.db.conn()).await?;
		}
		Ok(count)
	}

	/// Number of pending sub-logs for the owner, failed ones included; feeds
	/// the "offline, N changes pending" indicator.
	pub async fn pending_count(&self, owner: &str) -> Result<u64, StoreError> {
		let count = mutation::Entity::find()
			.filter(mutation::Column::OwnerId.eq(owner))
			.count(self.db.conn())
			.await?;
		Ok(count)
	}

	/// Pending sub-logs across every owner, for engine-wide state events.
	pub async fn total_pending(&self) -> Result<u64, StoreError> {
		let count = mutation::Entity::find().count(self.db.conn()).await?;
		Ok(count)
	}

	/// Entity refs with pending work in one collection; list refreshes must
	/// not clobber these rows.
	pub async fn pending_refs(
		&self,
		owner: &str,
		collection: Collection,
	) -> Result<HashSet<String>, StoreError> {
		let rows = mutation::Entity::find()
			.filter(mutation::Column::OwnerId.eq(owner))
			.filter(mutation::Column::Collection.eq(collection.as_str()))
			.all(self.db.conn())
			.await?;
		Ok(rows.into_iter().map(|r| r.entity_ref).collect())
	}

	async fn allocate_sequence(txn: &DatabaseTransaction, owner: &str) -> Result<u64, StoreError> {
		let cursor = sync_cursor::Entity::find_by_id(owner.to_string())
			.one(txn)
			.await?;

		match cursor {
			Some(row) => {
				let sequence = row.next_sequence;
				let mut active: sync_cursor::ActiveModel = row.into();
				active.next_sequence = Set(sequence + 1);
				active.update(txn).await?;
				Ok(sequence as u64)
			}
			None => {
				sync_cursor::ActiveModel {
					owner_id: Set(owner.to_string()),
					next_sequence: Set(2),
				}
				.insert(txn)
				.await?;
				Ok(1)
			}
		}
	}

	async fn insert_sub_log(
		txn: &DatabaseTransaction,
		owner: &str,
		collection: Collection,
		entity_ref: &EntityRef,
		records: Vec<MutationRecord>,
		first_sequence: u64,
	) -> Result<(), StoreError> {
		mutation::ActiveModel {
			owner_id: Set(owner.to_string()),
			collection: Set(collection.as_str().to_string()),
			entity_ref: Set(entity_ref.as_str().to_string()),
			records: Set(serde_json::to_value(records)?),
			first_sequence: Set(first_sequence as i64),
			attempts: Set(0),
			failed: Set(false),
			..Default::default()
		}
		.insert(txn)
		.await?;
		Ok(())
	}

	/// Merge a new partial payload into the sub-log's last record without
	/// advancing its sequence. For a pending create the record keeps its full
	/// payload with the patch folded in; for a pending update the patches
	/// accumulate into one.
	async fn conflate_into(
		txn: &DatabaseTransaction,
		row: mutation::Model,
		payload: Option<serde_json::Value>,
	) -> Result<(), StoreError> {
		let mut records: Vec<MutationRecord> = serde_json::from_value(row.records.clone())?;
		if let Some(last) = records.last_mut() {
			let merged = match (last.payload.take(), payload) {
				(Some(mut base), Some(patch)) => {
					if let (Some(base_map), Some(patch_map)) =
						(base.as_object_mut(), patch.as_object())
					{
						for (key, value) in patch_map {
							base_map.insert(key.clone(), value.clone());
						}
						Some(base)
					} else {
						Some(patch)
					}
				}
				(None, patch) => patch,
				(base, None) => base,
			};
			last.conflate_payload(merged.unwrap_or(serde_json::Value::Null));
		}

		let mut active: mutation::ActiveModel = row.into();
		active.records = Set(serde_json::to_value(records)?);
		// A fresh edit re-arms a sub-log that had exhausted its retries
		active.attempts = Set(0);
		active.failed = Set(false);
		active.update(txn).await?;
		Ok(())
	}
}
