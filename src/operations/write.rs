//! Write interception: network-then-queue-on-failure
//!
//! A write goes straight to the server while the network is up. Only a
//! transport-level failure (or an already-unreachable monitor) redirects it
//! to the mutation queue with an optimistic local apply; a 4xx is surfaced
//! to the caller immediately and never queued.

use super::{WriteError, WriteOutcome, WriteRequest, WriteStatus};
use crate::domain::{Collection, Entity, EntityRef, MutationKind};
use crate::infrastructure::remote::{RemoteEntity, RemoteError};
use crate::store::StoreError;
use crate::EngineContext;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

enum DirectError {
	Remote(RemoteError),
	Storage(StoreError),
}

impl From<RemoteError> for DirectError {
	fn from(e: RemoteError) -> Self {
		DirectError::Remote(e)
	}
}

impl From<StoreError> for DirectError {
	fn from(e: StoreError) -> Self {
		DirectError::Storage(e)
	}
}

pub(crate) async fn write(
	ctx: &Arc<EngineContext>,
	owner: &str,
	request: WriteRequest,
) -> Result<WriteOutcome, WriteError> {
	if ctx.monitor.is_reachable() {
		match try_direct(ctx, owner, &request).await {
			Ok(outcome) => return Ok(outcome),
			Err(DirectError::Storage(e)) => return Err(WriteError::Storage(e)),
			Err(DirectError::Remote(RemoteError::Validation { status, message })) => {
				return Err(WriteError::Validation { status, message });
			}
			Err(DirectError::Remote(e)) => {
				// Transport failure, timeout, 5xx or a garbled response:
				// correct the monitor and fall back to queuing
				debug!(error = %e, "direct write failed, queuing");
				if e.is_network() {
					ctx.monitor.report_network_error();
				}
			}
		}
	}

	enqueue_optimistic(ctx, owner, request).await
}

/// Attempt the write against the server in-line.
async fn try_direct(
	ctx: &Arc<EngineContext>,
	owner: &str,
	request: &WriteRequest,
) -> Result<WriteOutcome, DirectError> {
	match request {
		WriteRequest::Create {
			collection,
			payload,
		} => {
			let remote = ctx
				.remote
				.create(*collection, payload, Uuid::new_v4())
				.await?;
			ctx.monitor.report_success();
			let entity = store_remote(ctx, owner, *collection, &remote).await?;
			Ok(WriteOutcome {
				status: WriteStatus::AppliedImmediately,
				entity: Some(entity),
			})
		}
		WriteRequest::Update {
			collection,
			id,
			patch,
		} => {
			let remote = match ctx
				.remote
				.update(*collection, id.as_str(), patch, Uuid::new_v4(), false)
				.await
			{
				Ok(remote) => remote,
				Err(RemoteError::Conflict { .. }) => {
					// The user just made this edit, so it is the newest write
					// by definition; last-writer-wins says force it through
					warn!(%id, "conflict on a live edit; forcing latest write");
					ctx.remote
						.update(*collection, id.as_str(), patch, Uuid::new_v4(), true)
						.await?
				}
				Err(e) => return Err(e.into()),
			};
			ctx.monitor.report_success();
			let entity = store_remote(ctx, owner, *collection, &remote).await?;
			Ok(WriteOutcome {
				status: WriteStatus::AppliedImmediately,
				entity: Some(entity),
			})
		}
		WriteRequest::Delete { collection, id } => {
			ctx.remote
				.delete(*collection, id.as_str(), Uuid::new_v4())
				.await?;
			ctx.monitor.report_success();
			ctx.store.delete(owner, id).await?;
			Ok(WriteOutcome {
				status: WriteStatus::AppliedImmediately,
				entity: None,
			})
		}
	}
}

/// Apply the write to the local store and queue it for replay.
async fn enqueue_optimistic(
	ctx: &Arc<EngineContext>,
	owner: &str,
	request: WriteRequest,
) -> Result<WriteOutcome, WriteError> {
	let outcome = match request {
		WriteRequest::Create {
			collection,
			payload,
		} => {
			let entity = Entity::new_local(owner, collection, payload);
			ctx.store.put(&entity).await?;
			ctx.queue
				.enqueue(
					owner,
					collection,
					&entity.id,
					MutationKind::Create,
					Some(entity.payload.clone()),
				)
				.await?;
			WriteOutcome {
				status: WriteStatus::Queued,
				entity: Some(entity),
			}
		}
		WriteRequest::Update {
			collection,
			id,
			patch,
		} => {
			let entity = match ctx.store.get(owner, &id).await? {
				Some(mut entity) => {
					entity.apply_patch(&patch);
					ctx.store.put(&entity).await?;
					Some(entity)
				}
				// Nothing local to patch; the queued record still replays
				None => None,
			};
			ctx.queue
				.enqueue(owner, collection, &id, MutationKind::Update, Some(patch))
				.await?;
			WriteOutcome {
				status: WriteStatus::Queued,
				entity,
			}
		}
		WriteRequest::Delete { collection, id } => {
			ctx.store.delete(owner, &id).await?;
			ctx.queue
				.enqueue(owner, collection, &id, MutationKind::Delete, None)
				.await?;
			WriteOutcome {
				status: WriteStatus::Queued,
				entity: None,
			}
		}
	};

	ctx.emit_sync_state().await;
	Ok(outcome)
}

/// Persist the server's view of an entity after a confirmed write.
async fn store_remote(
	ctx: &Arc<EngineContext>,
	owner: &str,
	collection: Collection,
	remote: &RemoteEntity,
) -> Result<Entity, StoreError> {
	let entity = Entity {
		id: EntityRef::new(remote.id.clone()),
		owner_id: owner.to_string(),
		collection,
		payload: remote.payload.clone(),
		updated_at: remote.updated_at,
	};
	ctx.store.put(&entity).await?;
	Ok(entity)
}
