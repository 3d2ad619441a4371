//! Read and write interception
//!
//! Every UI-facing call goes through here: reads pick a per-route policy and
//! fall back to the local snapshot when the network is out; writes go to the
//! network when it is up and to the mutation queue when it is not.

pub mod read;
pub mod seed;
pub mod write;

use crate::cache::Freshness;
use crate::domain::{Collection, Entity, EntityRef};
use crate::store::StoreError;
use thiserror::Error;

/// A served read plus where it came from.
#[derive(Debug, Clone)]
pub struct ReadOutcome<T> {
	pub data: T,
	pub freshness: Freshness,
}

/// A write request from the UI.
#[derive(Debug, Clone)]
pub enum WriteRequest {
	Create {
		collection: Collection,
		payload: serde_json::Value,
	},
	Update {
		collection: Collection,
		id: EntityRef,
		patch: serde_json::Value,
	},
	Delete {
		collection: Collection,
		id: EntityRef,
	},
}

/// How a write was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
	/// Confirmed by the server in-line
	AppliedImmediately,
	/// Applied optimistically to the local store and queued for replay
	Queued,
}

/// Result of a write: its status and the entity as the store now holds it
/// (absent for deletes).
#[derive(Debug, Clone)]
pub struct WriteOutcome {
	pub status: WriteStatus,
	pub entity: Option<Entity>,
}

/// Read-path errors. Network trouble never surfaces here while a fallback
/// snapshot exists.
#[derive(Error, Debug)]
pub enum ReadError {
	#[error(transparent)]
	Storage(#[from] StoreError),

	/// The server rejected the read (an application error, not transport)
	#[error("read rejected ({status}): {message}")]
	Rejected { status: u16, message: String },

	/// Nothing cached and the network is unavailable
	#[error("route unavailable offline: {0}")]
	Unavailable(String),
}

/// Write-path errors. A network failure is not an error here: the write gets
/// queued instead.
#[derive(Error, Debug)]
pub enum WriteError {
	#[error(transparent)]
	Storage(#[from] StoreError),

	/// 4xx from the server; retrying can never succeed, so this is surfaced
	/// immediately and never queued
	#[error("validation error ({status}): {message}")]
	Validation { status: u16, message: String },
}
