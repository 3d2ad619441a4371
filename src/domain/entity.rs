//! Unified entity model - tasks, board columns and flashcard decks all move
//! through the sync engine as the same shape: an id, an owner, a JSON payload
//! and a last-write timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix carried by every client-generated placeholder id.
pub const LOCAL_ID_PREFIX: &str = "temp-";

/// An entity identifier. Either canonical (assigned by the server) or a
/// client-generated placeholder for an entity created while offline.
///
/// A local ref is never reused once superseded by a canonical id; the
/// reconciler rewrites every reference in one transaction when the remap
/// happens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRef(String);

impl EntityRef {
	/// Wrap an id string, canonical or local.
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	/// Generate a fresh placeholder id for an entity the server has not
	/// acknowledged yet.
	pub fn generate_local() -> Self {
		let millis = Utc::now().timestamp_millis();
		let nonce: u32 = rand::random();
		Self(format!("{LOCAL_ID_PREFIX}{millis}-{nonce:08x}"))
	}

	/// Whether this ref is a client-generated placeholder.
	pub fn is_local(&self) -> bool {
		self.0.starts_with(LOCAL_ID_PREFIX)
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for EntityRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for EntityRef {
	fn from(s: &str) -> Self {
		Self(s.to_string())
	}
}

/// The entity collections the client syncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
	Tasks,
	Columns,
	Decks,
}

impl Collection {
	/// Path segment used by the remote REST API.
	pub fn as_str(&self) -> &'static str {
		match self {
			Collection::Tasks => "tasks",
			Collection::Columns => "columns",
			Collection::Decks => "decks",
		}
	}

	pub fn from_str(s: &str) -> Option<Self> {
		match s {
			"tasks" => Some(Collection::Tasks),
			"columns" => Some(Collection::Columns),
			"decks" => Some(Collection::Decks),
			_ => None,
		}
	}
}

impl fmt::Display for Collection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A domain record as the client currently believes it to exist.
///
/// Exactly one copy of an entity's current state lives in the durable store
/// per owner; every read goes back to the store rather than holding a second
/// mutable copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
	/// Canonical once assigned by the server, local before that.
	pub id: EntityRef,

	/// Partition key. All store access is scoped to one owner.
	pub owner_id: String,

	/// Which collection this entity belongs to.
	pub collection: Collection,

	/// Arbitrary versioned payload fields.
	pub payload: serde_json::Value,

	/// Wall-clock timestamp set by whichever side last wrote the entity.
	pub updated_at: DateTime<Utc>,
}

impl Entity {
	/// Create a new local entity that the server has not seen yet.
	pub fn new_local(
		owner_id: impl Into<String>,
		collection: Collection,
		payload: serde_json::Value,
	) -> Self {
		Self {
			id: EntityRef::generate_local(),
			owner_id: owner_id.into(),
			collection,
			payload,
			updated_at: Utc::now(),
		}
	}

	/// Merge a partial payload into this entity, bumping `updated_at`.
	///
	/// Top-level keys of the patch replace the corresponding keys of the
	/// payload, matching the remote service's PATCH semantics.
	pub fn apply_patch(&mut self, patch: &serde_json::Value) {
		if let (Some(base), Some(fields)) = (self.payload.as_object_mut(), patch.as_object()) {
			for (key, value) in fields {
				base.insert(key.clone(), value.clone());
			}
		}
		self.updated_at = Utc::now();
	}
}
