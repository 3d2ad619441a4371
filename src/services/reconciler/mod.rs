//! Reconciler
//!
//! Drains the mutation queue against the remote service whenever the network
//! becomes reachable. Single-flight: a trigger that arrives while a drain is
//! running re-arms one more pass instead of starting a second drain. Within
//! one entity's sub-log replay is strictly sequential; independent entities
//! just proceed in queue order. Local placeholder ids are remapped to the
//! canonical ids the server assigns, atomically across the store and the
//! queue.

use crate::domain::{Entity, EntityRef, MutationKind, MutationRecord};
use crate::infrastructure::events::Event;
use crate::infrastructure::remote::{RemoteEntity, RemoteError};
use crate::queue::QueuedSubLog;
use crate::shared::utils::rewrite_id_references;
use crate::store::StoreError;
use crate::EngineContext;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of one sub-log replay.
enum SubLogOutcome {
	/// Fully applied and acked
	Applied,
	/// Left queued for a later attempt
	Requeued { attempts: u32 },
	/// Retries exhausted; parked until manually re-armed
	Exhausted,
	/// Server rejected it outright; dropped from the queue
	Dropped,
	/// Connectivity was lost while this item was active
	Aborted,
}

/// Outcome of one whole drain pass.
enum PassResult {
	/// Every drainable sub-log was visited; some may want a retry
	Completed { retry_attempts: Option<u32> },
	/// Connectivity was lost mid-drain; the rest stays queued
	Aborted,
}

/// A failure while sending one record. Storage failures are fatal and bubble
/// out of the drain; remote failures feed retry/conflict/drop policy.
enum SendError {
	Remote(RemoteError),
	Storage(StoreError),
}

impl From<RemoteError> for SendError {
	fn from(e: RemoteError) -> Self {
		SendError::Remote(e)
	}
}

impl From<StoreError> for SendError {
	fn from(e: StoreError) -> Self {
		SendError::Storage(e)
	}
}

/// Queue drainer, `Idle → Draining → Idle`.
pub struct Reconciler {
	ctx: Arc<EngineContext>,
	drain_lock: tokio::sync::Mutex<()>,
	rearm: AtomicBool,
}

impl Reconciler {
	pub(crate) fn new(ctx: Arc<EngineContext>) -> Arc<Self> {
		Arc::new(Self {
			ctx,
			drain_lock: tokio::sync::Mutex::new(()),
			rearm: AtomicBool::new(false),
		})
	}

	/// Listen for reachability transitions on the event bus and drain on
	/// every `BecameReachable`.
	pub(crate) fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
		let this = self.clone();
		let mut rx = this.ctx.events.subscribe();
		tokio::spawn(async move {
			loop {
				match rx.recv().await {
					Ok(Event::BecameReachable) => this.trigger().await,
					Ok(_) => {}
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						warn!(skipped, "reconciler lagged behind the event bus");
					}
					Err(broadcast::error::RecvError::Closed) => break,
				}
			}
		})
	}

	/// Fire-and-forget trigger, used after a write gets queued while the
	/// monitor still reports reachable.
	pub(crate) fn schedule_trigger(self: &Arc<Self>) {
		let this = self.clone();
		tokio::spawn(async move { this.trigger().await });
	}

	/// Run a drain now unless one is already running, in which case one more
	/// pass is re-armed (triggers coalesce, they don't stack).
	pub(crate) async fn trigger(self: &Arc<Self>) {
		loop {
			if !self.ctx.monitor.is_reachable() {
				return;
			}

			let result = {
				let Ok(_guard) = self.drain_lock.try_lock() else {
					self.rearm.store(true, Ordering::SeqCst);
					return;
				};

				self.ctx.draining.store(true, Ordering::SeqCst);
				self.ctx.emit_sync_state().await;
				let result = self.drain_pass().await;
				self.ctx.draining.store(false, Ordering::SeqCst);
				self.ctx.emit_sync_state().await;
				result
			};

			match result {
				Err(e) => {
					// Local persistence is broken; nothing sane to do but
					// surface it
					error!(error = %e, "drain aborted on storage failure");
					self.ctx.events.emit(Event::SyncErrorRaised {
						entity_ref: None,
						message: format!("local storage failure during sync: {e}"),
						retryable: false,
					});
					return;
				}
				Ok(PassResult::Aborted) => {
					debug!("drain aborted, connectivity lost");
					return;
				}
				Ok(PassResult::Completed {
					retry_attempts: Some(attempts),
				}) => {
					self.schedule_retry(attempts);
				}
				Ok(PassResult::Completed {
					retry_attempts: None,
				}) => {}
			}

			if !self.rearm.swap(false, Ordering::SeqCst) {
				return;
			}
		}
	}

	/// One pass over a snapshot of the queue's drain order.
	async fn drain_pass(&self) -> Result<PassResult, StoreError> {
		let items = self.ctx.queue.drain_order().await?;
		if items.is_empty() {
			return Ok(PassResult::Completed {
				retry_attempts: None,
			});
		}
		info!(sub_logs = items.len(), "draining mutation queue");

		// LocalId -> canonical id mappings established during this pass;
		// later items may reference entities created by earlier ones
		let mut remap: HashMap<String, String> = HashMap::new();
		let mut retry_attempts: Option<u32> = None;

		for item in &items {
			if !self.ctx.monitor.is_reachable() {
				return Ok(PassResult::Aborted);
			}

			match self.apply_sub_log(&mut remap, item).await? {
				SubLogOutcome::Applied | SubLogOutcome::Dropped | SubLogOutcome::Exhausted => {}
				SubLogOutcome::Requeued { attempts } => {
					retry_attempts =
						Some(retry_attempts.map_or(attempts, |prev| prev.min(attempts)));
				}
				SubLogOutcome::Aborted => return Ok(PassResult::Aborted),
			}
		}

		Ok(PassResult::Completed { retry_attempts })
	}

	/// Replay one entity's conflated sub-log, in order.
	async fn apply_sub_log(
		&self,
		remap: &mut HashMap<String, String>,
		item: &QueuedSubLog,
	) -> Result<SubLogOutcome, StoreError> {
		// The snapshot may predate a remap done earlier in this pass
		let mut current_ref = match remap.get(item.entity_ref.as_str()) {
			Some(canonical) => EntityRef::new(canonical.clone()),
			None => item.entity_ref.clone(),
		};

		for record in &item.records {
			match self
				.send_record(remap, &item.owner_id, &current_ref, record)
				.await
			{
				Ok(Some(canonical)) if current_ref.is_local() => {
					// A create came back with the server's id; rewrite every
					// reference to the placeholder atomically
					remap.insert(current_ref.as_str().to_string(), canonical.id.clone());
					let canonical_ref = EntityRef::new(canonical.id.clone());
					self.ctx
						.store
						.remap_entity_id(&item.owner_id, &current_ref, &canonical_ref, &canonical)
						.await?;
					self.ctx.events.emit(Event::EntityRemapped {
						local: current_ref.clone(),
						canonical: canonical_ref.clone(),
					});
					current_ref = canonical_ref;
				}
				Ok(_) => {}
				Err(SendError::Storage(e)) => return Err(e),
				Err(SendError::Remote(e)) if e.is_network() => {
					self.ctx.monitor.report_network_error();
					let attempts = self
						.ctx
						.queue
						.requeue(
							&item.owner_id,
							&current_ref,
							self.ctx.config.max_sync_attempts,
						)
						.await?;

					// The sub-log is already parked at this point, so the user
					// hears about it even if the monitor flipped mid-failure
					if attempts >= self.ctx.config.max_sync_attempts {
						warn!(entity_ref = %current_ref, attempts, "sync retries exhausted");
						self.ctx.events.emit(Event::SyncErrorRaised {
							entity_ref: Some(current_ref.clone()),
							message: format!(
								"change could not be synced after {attempts} attempts"
							),
							retryable: true,
						});
						return Ok(SubLogOutcome::Exhausted);
					}
					if !self.ctx.monitor.is_reachable() {
						return Ok(SubLogOutcome::Aborted);
					}
					return Ok(SubLogOutcome::Requeued { attempts });
				}
				Err(SendError::Remote(RemoteError::Validation { status, message })) => {
					// Replaying can never succeed; drop the sub-log but keep
					// the local state so nothing the user wrote is destroyed
					warn!(entity_ref = %current_ref, status, "server rejected queued change");
					self.ctx.queue.ack(&item.owner_id, &current_ref).await?;
					self.ctx.events.emit(Event::SyncErrorRaised {
						entity_ref: Some(current_ref.clone()),
						message: format!("server rejected queued change ({status}): {message}"),
						retryable: false,
					});
					self.ctx.emit_sync_state().await;
					return Ok(SubLogOutcome::Dropped);
				}
				Err(SendError::Remote(RemoteError::Conflict { current })) => {
					return self
						.resolve_conflict(item, &current_ref, record, current)
						.await;
				}
				Err(SendError::Remote(e)) => {
					// Garbled response; retry like a transport failure
					warn!(entity_ref = %current_ref, error = %e, "unusable response, will retry");
					let attempts = self
						.ctx
						.queue
						.requeue(
							&item.owner_id,
							&current_ref,
							self.ctx.config.max_sync_attempts,
						)
						.await?;
					return Ok(SubLogOutcome::Requeued { attempts });
				}
			}
		}

		self.ctx.queue.ack(&item.owner_id, &current_ref).await?;
		self.ctx.emit_sync_state().await;
		Ok(SubLogOutcome::Applied)
	}

	/// Send one record. Returns the server's entity for a create so the
	/// caller can remap the placeholder id.
	async fn send_record(
		&self,
		remap: &HashMap<String, String>,
		owner: &str,
		current_ref: &EntityRef,
		record: &MutationRecord,
	) -> Result<Option<RemoteEntity>, SendError> {
		// Payloads may reference entities whose placeholder ids were
		// remapped earlier in this pass
		let payload = record.payload.as_ref().map(|p| {
			let mut p = p.clone();
			for (local, canonical) in remap {
				rewrite_id_references(&mut p, local, canonical);
			}
			p
		});

		match record.kind {
			MutationKind::Create => {
				let body = payload.unwrap_or(serde_json::Value::Null);
				let remote = self
					.ctx
					.remote
					.create(record.collection, &body, record.idempotency_key)
					.await?;
				self.ctx.monitor.report_success();
				Ok(Some(remote))
			}
			MutationKind::Update => {
				let body = payload.unwrap_or(serde_json::Value::Null);
				let remote = self
					.ctx
					.remote
					.update(
						record.collection,
						current_ref.as_str(),
						&body,
						record.idempotency_key,
						false,
					)
					.await?;
				self.ctx.monitor.report_success();
				// Refresh the store with the server's authoritative view
				self.put_remote(owner, record, &remote).await?;
				Ok(None)
			}
			MutationKind::Delete => {
				self.ctx
					.remote
					.delete(record.collection, current_ref.as_str(), record.idempotency_key)
					.await?;
				self.ctx.monitor.report_success();
				self.ctx.store.delete(owner, current_ref).await?;
				Ok(None)
			}
		}
	}

	/// Last-writer-wins: the mutation with the newer timestamp is kept, the
	/// other discarded.
	async fn resolve_conflict(
		&self,
		item: &QueuedSubLog,
		current_ref: &EntityRef,
		record: &MutationRecord,
		server: RemoteEntity,
	) -> Result<SubLogOutcome, StoreError> {
		let local_updated_at = self
			.ctx
			.store
			.get(&item.owner_id, current_ref)
			.await?
			.map(|e| e.updated_at)
			.unwrap_or(record.enqueued_at);

		if server.updated_at > local_updated_at {
			// Server wins: drop the pending mutation, take the server's
			// version, tell the user their change was superseded
			info!(entity_ref = %current_ref, "conflict: newer server change wins");
			let entity = Entity {
				id: EntityRef::new(server.id.clone()),
				owner_id: item.owner_id.clone(),
				collection: item.collection,
				payload: server.payload.clone(),
				updated_at: server.updated_at,
			};
			self.ctx.store.put(&entity).await?;
			self.ctx.queue.ack(&item.owner_id, current_ref).await?;
			self.ctx.events.emit(Event::ConflictOverwritten {
				entity_ref: current_ref.clone(),
			});
			self.ctx.emit_sync_state().await;
			return Ok(SubLogOutcome::Dropped);
		}

		// Local wins: force the write through
		info!(entity_ref = %current_ref, "conflict: local change is newer, forcing");
		let body = record.payload.clone().unwrap_or(serde_json::Value::Null);
		match self
			.ctx
			.remote
			.update(
				record.collection,
				current_ref.as_str(),
				&body,
				record.idempotency_key,
				true,
			)
			.await
		{
			Ok(remote) => {
				self.put_remote(&item.owner_id, record, &remote).await?;
				self.ctx.queue.ack(&item.owner_id, current_ref).await?;
				self.ctx.emit_sync_state().await;
				Ok(SubLogOutcome::Applied)
			}
			Err(e) if e.is_network() => {
				self.ctx.monitor.report_network_error();
				let attempts = self
					.ctx
					.queue
					.requeue(
						&item.owner_id,
						current_ref,
						self.ctx.config.max_sync_attempts,
					)
					.await?;
				Ok(SubLogOutcome::Requeued { attempts })
			}
			Err(e) => {
				warn!(entity_ref = %current_ref, error = %e, "forced write rejected; dropping");
				self.ctx.queue.ack(&item.owner_id, current_ref).await?;
				self.ctx.events.emit(Event::SyncErrorRaised {
					entity_ref: Some(current_ref.clone()),
					message: format!("forced write rejected: {e}"),
					retryable: false,
				});
				self.ctx.emit_sync_state().await;
				Ok(SubLogOutcome::Dropped)
			}
		}
	}

	async fn put_remote(
		&self,
		owner: &str,
		record: &MutationRecord,
		remote: &RemoteEntity,
	) -> Result<(), StoreError> {
		let entity = Entity {
			id: EntityRef::new(remote.id.clone()),
			owner_id: owner.to_string(),
			collection: record.collection,
			payload: remote.payload.clone(),
			updated_at: remote.updated_at,
		};
		self.ctx.store.put(&entity).await
	}

	/// Exponential backoff with jitter, capped.
	fn schedule_retry(self: &Arc<Self>, attempts: u32) {
		let base = self.ctx.config.backoff_base_ms;
		let cap = self.ctx.config.backoff_cap_ms;
		let exp = base.saturating_mul(1u64 << attempts.saturating_sub(1).min(16));
		let capped = exp.min(cap);
		let jitter = rand::thread_rng().gen_range(0..=capped / 2);
		let delay = Duration::from_millis(capped + jitter);

		debug!(?delay, attempts, "scheduling drain retry");
		let this = self.clone();
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			if this.ctx.monitor.is_reachable() {
				this.trigger().await;
			}
		});
	}
}
