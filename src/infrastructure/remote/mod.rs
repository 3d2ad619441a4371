//! Remote API client seam
//!
//! The engine talks to the remote CRUD service through the [`RemoteClient`]
//! trait; production uses the HTTP implementation in [`http`], tests plug in
//! a scriptable in-memory one.

use crate::domain::Collection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod http;

pub use http::HttpRemoteClient;

/// An entity as the server returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntity {
	pub id: String,
	pub payload: serde_json::Value,
	pub updated_at: DateTime<Utc>,
}

/// Errors from remote calls.
///
/// `Network` is the only transport-level class: it drives queuing, backoff
/// and the connectivity monitor. Everything else means the server was
/// reached.
#[derive(Error, Debug)]
pub enum RemoteError {
	/// Transport failure or per-call timeout; transient and retryable
	#[error("network error: {0}")]
	Network(String),

	/// 4xx-class rejection; permanent, never retried, never queued
	#[error("validation error ({status}): {message}")]
	Validation { status: u16, message: String },

	/// 409: the server holds a version written more recently than ours.
	/// Carries the server's current version for last-writer-wins resolution.
	#[error("conflict: server has a newer version of the entity")]
	Conflict { current: RemoteEntity },

	/// Malformed response body
	#[error("unexpected response: {0}")]
	UnexpectedResponse(String),
}

impl RemoteError {
	/// Whether this error means the remote side was unreachable.
	pub fn is_network(&self) -> bool {
		matches!(self, RemoteError::Network(_))
	}
}

/// The remote REST service, reduced to what the sync engine needs.
///
/// All writes carry the mutation record's stable idempotency key so a retried
/// request after a dropped response does not double-apply.
#[async_trait]
pub trait RemoteClient: Send + Sync {
	/// `POST /{collection}`; returns the canonical entity.
	async fn create(
		&self,
		collection: Collection,
		payload: &serde_json::Value,
		idempotency_key: Uuid,
	) -> Result<RemoteEntity, RemoteError>;

	/// `PATCH /{collection}/{id}`; `force` overrides the server's conflict
	/// check once last-writer-wins has decided in our favor.
	async fn update(
		&self,
		collection: Collection,
		id: &str,
		patch: &serde_json::Value,
		idempotency_key: Uuid,
		force: bool,
	) -> Result<RemoteEntity, RemoteError>;

	/// `DELETE /{collection}/{id}`; idempotent, 404 counts as success.
	async fn delete(
		&self,
		collection: Collection,
		id: &str,
		idempotency_key: Uuid,
	) -> Result<(), RemoteError>;

	/// `GET /{collection}`.
	async fn fetch_all(&self, collection: Collection) -> Result<Vec<RemoteEntity>, RemoteError>;

	/// `GET /{collection}/{id}`.
	async fn fetch_one(
		&self,
		collection: Collection,
		id: &str,
	) -> Result<RemoteEntity, RemoteError>;

	/// `GET` on an arbitrary path, used for static/reference routes.
	async fn fetch_raw(&self, path: &str) -> Result<serde_json::Value, RemoteError>;
}
