//! Pending-write records
//!
//! A mutation record is one conflated write waiting to be replayed against
//! the remote service. Records for the same entity form a sub-log ordered by
//! `sequence`; the queue keeps that sub-log minimal (see `queue`).

use super::entity::{Collection, EntityRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of write a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
	Create,
	Update,
	Delete,
}

/// One pending write against one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
	/// Position in the queue's total order. Conflation replaces a record's
	/// payload without advancing its sequence, so FIFO position relative to
	/// other entities stays stable.
	pub sequence: u64,

	/// The entity this record targets; may still be a local placeholder.
	pub entity_ref: EntityRef,

	pub collection: Collection,

	pub kind: MutationKind,

	/// Full payload for `Create`, partial payload for `Update`, absent for
	/// `Delete`.
	pub payload: Option<serde_json::Value>,

	pub enqueued_at: DateTime<Utc>,

	/// Stable identity for retries. A retry of the same record carries the
	/// same key so a dropped response cannot double-apply; conflation mints a
	/// new key because the replacement is a different logical write.
	pub idempotency_key: Uuid,
}

impl MutationRecord {
	pub fn new(
		sequence: u64,
		entity_ref: EntityRef,
		collection: Collection,
		kind: MutationKind,
		payload: Option<serde_json::Value>,
	) -> Self {
		Self {
			sequence,
			entity_ref,
			collection,
			kind,
			payload,
			enqueued_at: Utc::now(),
			idempotency_key: Uuid::new_v4(),
		}
	}

	/// Replace this record's payload in place, keeping its queue position but
	/// minting a fresh idempotency key for the new logical write.
	pub fn conflate_payload(&mut self, payload: serde_json::Value) {
		self.payload = Some(payload);
		self.enqueued_at = Utc::now();
		self.idempotency_key = Uuid::new_v4();
	}
}
