//! Shared harness for the integration tests: a scriptable in-memory remote
//! and an engine builder tuned for fast, deterministic drains.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskdeck_core::{
	Collection, Connectivity, Event, RemoteClient, RemoteEntity, RemoteError, SyncConfig,
	SyncEngine,
};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Every call the engine made, in order.
#[derive(Debug, Clone)]
pub enum Call {
	Create {
		collection: Collection,
		payload: Value,
		key: Uuid,
	},
	Update {
		id: String,
		patch: Value,
		key: Uuid,
		force: bool,
	},
	Delete {
		id: String,
		key: Uuid,
	},
	FetchAll(Collection),
	FetchOne(String),
	FetchRaw(String),
}

#[derive(Default)]
struct MockState {
	entities: HashMap<String, (Collection, RemoteEntity)>,
	insertion_order: Vec<String>,
	next_id: u64,
	calls: Vec<Call>,
	// Idempotency: a retried key returns the original result without
	// re-applying
	applied_keys: HashMap<Uuid, RemoteEntity>,
	fail_all: bool,
	fail_writes: bool,
	fail_creates_containing: Option<(String, u32)>,
	// The write applies server-side but the response is "lost"
	drop_next_write_response: bool,
	reject_next_write: Option<(u16, String)>,
	conflicts: HashMap<String, RemoteEntity>,
	raw_routes: HashMap<String, Value>,
}

/// In-memory stand-in for the remote REST service. Behavior is scripted per
/// test; every call is logged.
pub struct MockRemote {
	state: Mutex<MockState>,
}

impl MockRemote {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			state: Mutex::new(MockState::default()),
		})
	}

	/// Seed a server-side entity with a fixed id.
	pub fn seed(&self, collection: Collection, id: &str, payload: Value) {
		self.seed_at(collection, id, payload, Utc::now());
	}

	pub fn seed_at(
		&self,
		collection: Collection,
		id: &str,
		payload: Value,
		updated_at: DateTime<Utc>,
	) {
		let mut state = self.state.lock().unwrap();
		let entity = RemoteEntity {
			id: id.to_string(),
			payload,
			updated_at,
		};
		if state.entities.insert(id.to_string(), (collection, entity)).is_none() {
			state.insertion_order.push(id.to_string());
		}
	}

	pub fn remove(&self, id: &str) {
		let mut state = self.state.lock().unwrap();
		state.entities.remove(id);
		state.insertion_order.retain(|existing| existing != id);
	}

	pub fn set_raw_route(&self, path: &str, body: Value) {
		self.state
			.lock()
			.unwrap()
			.raw_routes
			.insert(path.to_string(), body);
	}

	/// Every call fails at the transport level, reads included.
	pub fn set_fail_all(&self, fail: bool) {
		self.state.lock().unwrap().fail_all = fail;
	}

	/// Writes fail at the transport level; reads still work.
	pub fn set_fail_writes(&self, fail: bool) {
		self.state.lock().unwrap().fail_writes = fail;
	}

	/// The next `times` creates whose payload contains `marker` fail with a
	/// network error, without applying.
	pub fn fail_creates_containing(&self, marker: &str, times: u32) {
		self.state.lock().unwrap().fail_creates_containing = Some((marker.to_string(), times));
	}

	/// The next write applies server-side but returns a network error, as if
	/// the response was lost in transit.
	pub fn drop_next_write_response(&self) {
		self.state.lock().unwrap().drop_next_write_response = true;
	}

	/// The next write is rejected with the given status.
	pub fn reject_next_write(&self, status: u16, message: &str) {
		self.state.lock().unwrap().reject_next_write = Some((status, message.to_string()));
	}

	/// The next non-forced update of `id` returns 409 carrying `current` as
	/// the server's version.
	pub fn conflict_on(&self, id: &str, current: RemoteEntity) {
		let mut state = self.state.lock().unwrap();
		if let Some((_, entity)) = state.entities.get_mut(id) {
			*entity = current.clone();
		}
		state.conflicts.insert(id.to_string(), current);
	}

	pub fn calls(&self) -> Vec<Call> {
		self.state.lock().unwrap().calls.clone()
	}

	pub fn creates(&self) -> Vec<(Collection, Value, Uuid)> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				Call::Create {
					collection,
					payload,
					key,
				} => Some((collection, payload, key)),
				_ => None,
			})
			.collect()
	}

	pub fn updates(&self) -> Vec<(String, Value, Uuid, bool)> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				Call::Update {
					id,
					patch,
					key,
					force,
				} => Some((id, patch, key, force)),
				_ => None,
			})
			.collect()
	}

	pub fn deletes(&self) -> Vec<String> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				Call::Delete { id, .. } => Some(id),
				_ => None,
			})
			.collect()
	}

	pub fn entity(&self, id: &str) -> Option<RemoteEntity> {
		self.state
			.lock()
			.unwrap()
			.entities
			.get(id)
			.map(|(_, entity)| entity.clone())
	}

	pub fn entity_count(&self) -> usize {
		self.state.lock().unwrap().entities.len()
	}
}

#[async_trait]
impl RemoteClient for MockRemote {
	async fn create(
		&self,
		collection: Collection,
		payload: &Value,
		idempotency_key: Uuid,
	) -> Result<RemoteEntity, RemoteError> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(Call::Create {
			collection,
			payload: payload.clone(),
			key: idempotency_key,
		});

		if state.fail_all || state.fail_writes {
			return Err(RemoteError::Network("scripted transport failure".into()));
		}
		if let Some((marker, times)) = state.fail_creates_containing.as_mut() {
			if *times > 0 && payload.to_string().contains(marker.as_str()) {
				*times -= 1;
				return Err(RemoteError::Network("scripted transport failure".into()));
			}
		}
		if let Some((status, message)) = state.reject_next_write.take() {
			return Err(RemoteError::Validation { status, message });
		}
		if let Some(previous) = state.applied_keys.get(&idempotency_key) {
			return Ok(previous.clone());
		}

		state.next_id += 1;
		let id = format!("srv-{}", state.next_id);
		let entity = RemoteEntity {
			id: id.clone(),
			payload: payload.clone(),
			updated_at: Utc::now(),
		};
		state.entities.insert(id.clone(), (collection, entity.clone()));
		state.insertion_order.push(id);
		state.applied_keys.insert(idempotency_key, entity.clone());

		if state.drop_next_write_response {
			state.drop_next_write_response = false;
			return Err(RemoteError::Network("scripted dropped response".into()));
		}
		Ok(entity)
	}

	async fn update(
		&self,
		_collection: Collection,
		id: &str,
		patch: &Value,
		idempotency_key: Uuid,
		force: bool,
	) -> Result<RemoteEntity, RemoteError> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(Call::Update {
			id: id.to_string(),
			patch: patch.clone(),
			key: idempotency_key,
			force,
		});

		if state.fail_all || state.fail_writes {
			return Err(RemoteError::Network("scripted transport failure".into()));
		}
		if let Some((status, message)) = state.reject_next_write.take() {
			return Err(RemoteError::Validation { status, message });
		}
		if !force {
			if let Some(current) = state.conflicts.remove(id) {
				return Err(RemoteError::Conflict { current });
			}
		}
		if let Some(previous) = state.applied_keys.get(&idempotency_key) {
			return Ok(previous.clone());
		}

		let Some((_, entity)) = state.entities.get_mut(id) else {
			return Err(RemoteError::Validation {
				status: 404,
				message: format!("no such entity: {id}"),
			});
		};
		if let (Some(base), Some(fields)) = (entity.payload.as_object_mut(), patch.as_object()) {
			for (key, value) in fields {
				base.insert(key.clone(), value.clone());
			}
		}
		entity.updated_at = Utc::now();
		let result = entity.clone();
		state.applied_keys.insert(idempotency_key, result.clone());

		if state.drop_next_write_response {
			state.drop_next_write_response = false;
			return Err(RemoteError::Network("scripted dropped response".into()));
		}
		Ok(result)
	}

	async fn delete(
		&self,
		_collection: Collection,
		id: &str,
		idempotency_key: Uuid,
	) -> Result<(), RemoteError> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(Call::Delete {
			id: id.to_string(),
			key: idempotency_key,
		});

		if state.fail_all || state.fail_writes {
			return Err(RemoteError::Network("scripted transport failure".into()));
		}
		if let Some((status, message)) = state.reject_next_write.take() {
			return Err(RemoteError::Validation { status, message });
		}

		// Deleting an absent entity is a success, like the real API
		state.entities.remove(id);
		state.insertion_order.retain(|existing| existing != id);

		if state.drop_next_write_response {
			state.drop_next_write_response = false;
			return Err(RemoteError::Network("scripted dropped response".into()));
		}
		Ok(())
	}

	async fn fetch_all(&self, collection: Collection) -> Result<Vec<RemoteEntity>, RemoteError> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(Call::FetchAll(collection));

		if state.fail_all {
			return Err(RemoteError::Network("scripted transport failure".into()));
		}
		let order = state.insertion_order.clone();
		Ok(order
			.iter()
			.filter_map(|id| state.entities.get(id))
			.filter(|(c, _)| *c == collection)
			.map(|(_, entity)| entity.clone())
			.collect())
	}

	async fn fetch_one(
		&self,
		_collection: Collection,
		id: &str,
	) -> Result<RemoteEntity, RemoteError> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(Call::FetchOne(id.to_string()));

		if state.fail_all {
			return Err(RemoteError::Network("scripted transport failure".into()));
		}
		match state.entities.get(id) {
			Some((_, entity)) => Ok(entity.clone()),
			None => Err(RemoteError::Validation {
				status: 404,
				message: format!("no such entity: {id}"),
			}),
		}
	}

	async fn fetch_raw(&self, path: &str) -> Result<Value, RemoteError> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(Call::FetchRaw(path.to_string()));

		if state.fail_all {
			return Err(RemoteError::Network("scripted transport failure".into()));
		}
		match state.raw_routes.get(path) {
			Some(body) => Ok(body.clone()),
			None => Err(RemoteError::Validation {
				status: 404,
				message: format!("no such route: {path}"),
			}),
		}
	}
}

/// Fast backoff, a dwell window long enough that one scripted transport
/// failure does not flip the monitor mid-test.
pub fn test_config() -> SyncConfig {
	SyncConfig {
		data_dir: std::env::temp_dir(),
		connectivity_dwell_ms: 60_000,
		backoff_base_ms: 1,
		backoff_cap_ms: 5,
		max_sync_attempts: 3,
		..Default::default()
	}
}

pub async fn engine(remote: Arc<MockRemote>, connectivity: Connectivity) -> SyncEngine {
	SyncEngine::new_in_memory(test_config(), remote, connectivity)
		.await
		.unwrap()
}

/// Engine with a custom dwell window, for tests where a transport failure
/// must flip the monitor immediately.
pub async fn engine_with_dwell(
	remote: Arc<MockRemote>,
	connectivity: Connectivity,
	dwell_ms: u64,
) -> SyncEngine {
	let config = SyncConfig {
		connectivity_dwell_ms: dwell_ms,
		..test_config()
	};
	SyncEngine::new_in_memory(config, remote, connectivity)
		.await
		.unwrap()
}

/// Wait until the owner's pending count reaches `expected`; the reconciler
/// drains on its own once connectivity allows.
pub async fn wait_for_pending(engine: &SyncEngine, owner: &str, expected: u64) {
	for _ in 0..1_000 {
		if engine.pending_count(owner).await.unwrap() == expected {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("pending count never reached {expected}");
}

/// Wait for the first event matching `pred`.
pub async fn wait_for_event(
	rx: &mut broadcast::Receiver<Event>,
	pred: impl Fn(&Event) -> bool,
) -> Event {
	tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			match rx.recv().await {
				Ok(event) if pred(&event) => return event,
				Ok(_) => {}
				Err(broadcast::error::RecvError::Lagged(_)) => {}
				Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
			}
		}
	})
	.await
	.expect("timed out waiting for event")
}
