//! Read interception
//!
//! Entity reads are network-first with a bounded timeout and a stale local
//! fallback; static/reference routes are cache-first with a background
//! refresh. Every served entity read comes out of the durable store, so the
//! caller always sees its own optimistic writes.

use super::{ReadError, ReadOutcome};
use crate::cache::Freshness;
use crate::domain::{Collection, Entity, EntityRef};
use crate::infrastructure::remote::RemoteError;
use crate::EngineContext;
use std::sync::Arc;
use tracing::{debug, warn};

fn list_route_key(owner: &str, collection: Collection) -> String {
	format!("{owner}:{collection}:list")
}

/// List every entity of a collection: network-first-with-fallback.
pub(crate) async fn read_collection(
	ctx: &Arc<EngineContext>,
	owner: &str,
	collection: Collection,
) -> Result<ReadOutcome<Vec<Entity>>, ReadError> {
	if ctx.monitor.is_reachable() {
		match ctx.remote.fetch_all(collection).await {
			Ok(remote) => {
				ctx.monitor.report_success();

				// Rows with pending local mutations keep the optimistic
				// version; everything else takes the server's view
				let preserve = ctx.queue.pending_refs(owner, collection).await?;
				ctx.store
					.replace_collection(owner, collection, &remote, &preserve)
					.await?;
				ctx.cache
					.put(
						&list_route_key(owner, collection),
						serde_json::to_value(&remote).map_err(crate::store::StoreError::from)?,
					)
					.await?;

				let entities = ctx.store.get_all(owner, collection).await?;
				return Ok(ReadOutcome {
					data: entities,
					freshness: Freshness::Fresh,
				});
			}
			Err(e) if e.is_network() => {
				debug!(%collection, "list fetch failed, serving local snapshot");
				ctx.monitor.report_network_error();
			}
			Err(RemoteError::Validation { status, message }) => {
				return Err(ReadError::Rejected { status, message });
			}
			Err(e) => {
				// Garbled response: the local snapshot is still the safest
				// thing to serve
				warn!(%collection, error = %e, "unusable list response, serving local snapshot");
			}
		}
	}

	let entities = ctx.store.get_all(owner, collection).await?;
	Ok(ReadOutcome {
		data: entities,
		freshness: Freshness::StaleCached,
	})
}

/// Detail read of one entity: network-first-with-fallback.
pub(crate) async fn read_entity(
	ctx: &Arc<EngineContext>,
	owner: &str,
	collection: Collection,
	id: &EntityRef,
) -> Result<ReadOutcome<Option<Entity>>, ReadError> {
	// A local placeholder is unknown to the server by definition
	if ctx.monitor.is_reachable() && !id.is_local() {
		match ctx.remote.fetch_one(collection, id.as_str()).await {
			Ok(remote) => {
				ctx.monitor.report_success();
				let entity = Entity {
					id: EntityRef::new(remote.id.clone()),
					owner_id: owner.to_string(),
					collection,
					payload: remote.payload,
					updated_at: remote.updated_at,
				};
				ctx.store.put(&entity).await?;
				return Ok(ReadOutcome {
					data: Some(entity),
					freshness: Freshness::Fresh,
				});
			}
			Err(RemoteError::Validation { status: 404, .. }) => {
				ctx.monitor.report_success();
				// Gone server-side; drop the local copy unless it still has
				// pending work
				let preserve = ctx.queue.pending_refs(owner, collection).await?;
				if !preserve.contains(id.as_str()) {
					ctx.store.delete(owner, id).await?;
				}
				return Ok(ReadOutcome {
					data: None,
					freshness: Freshness::Fresh,
				});
			}
			Err(e) if e.is_network() => {
				debug!(%id, "detail fetch failed, serving local snapshot");
				ctx.monitor.report_network_error();
			}
			Err(RemoteError::Validation { status, message }) => {
				return Err(ReadError::Rejected { status, message });
			}
			Err(e) => {
				warn!(%id, error = %e, "unusable detail response, serving local snapshot");
			}
		}
	}

	let entity = ctx.store.get(owner, id).await?;
	Ok(ReadOutcome {
		data: entity,
		freshness: Freshness::StaleCached,
	})
}

/// Static/reference route: cache-first with background refresh.
pub(crate) async fn read_reference(
	ctx: &Arc<EngineContext>,
	route_key: &str,
	path: &str,
) -> Result<ReadOutcome<serde_json::Value>, ReadError> {
	if let Some(cached) = ctx.cache.get(route_key).await? {
		// Serve the cached body and refresh behind the caller's back; the
		// refresh must never fail the read
		if ctx.monitor.is_reachable() {
			let ctx = ctx.clone();
			let route_key = route_key.to_string();
			let path = path.to_string();
			tokio::spawn(async move {
				match ctx.remote.fetch_raw(&path).await {
					Ok(body) => {
						if let Err(e) = ctx.cache.put(&route_key, body).await {
							warn!(route_key, error = %e, "background refresh could not cache");
						}
					}
					Err(e) => {
						if e.is_network() {
							ctx.monitor.report_network_error();
						}
						debug!(route_key, error = %e, "background refresh failed");
					}
				}
			});
		}
		return Ok(ReadOutcome {
			data: cached.body,
			freshness: Freshness::StaleCached,
		});
	}

	// Cache miss: the network is the only source
	match ctx.remote.fetch_raw(path).await {
		Ok(body) => {
			ctx.monitor.report_success();
			ctx.cache.put(route_key, body.clone()).await?;
			Ok(ReadOutcome {
				data: body,
				freshness: Freshness::Fresh,
			})
		}
		Err(RemoteError::Validation { status, message }) => {
			Err(ReadError::Rejected { status, message })
		}
		Err(e) => {
			if e.is_network() {
				ctx.monitor.report_network_error();
			}
			Err(ReadError::Unavailable(e.to_string()))
		}
	}
}
