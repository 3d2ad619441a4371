//! Taskdeck Core
//!
//! The offline-first synchronization engine behind the Taskdeck client. The
//! UI reads and writes through [`SyncEngine`]; the engine decides per route
//! whether to serve from the network, the cache, or the durable local store,
//! queues writes made while offline, and reconciles the queue against the
//! remote service once connectivity returns.

pub mod cache;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod operations;
pub mod queue;
pub mod services;
pub mod shared;
pub mod store;

pub use cache::Freshness;
pub use config::SyncConfig;
pub use domain::{Collection, Entity, EntityRef, MutationKind, MutationRecord};
pub use infrastructure::connectivity::Connectivity;
pub use infrastructure::events::{Event, SyncState};
pub use infrastructure::remote::{HttpRemoteClient, RemoteClient, RemoteEntity, RemoteError};
pub use operations::{ReadError, ReadOutcome, WriteError, WriteOutcome, WriteRequest, WriteStatus};
pub use store::StoreError;

use crate::cache::ResponseCache;
use crate::infrastructure::connectivity::ConnectivityMonitor;
use crate::infrastructure::database::Database;
use crate::infrastructure::events::EventBus;
use crate::queue::MutationQueue;
use crate::services::reconciler::Reconciler;
use crate::store::LocalStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// Everything the read/write paths and the reconciler share.
pub(crate) struct EngineContext {
	pub(crate) config: SyncConfig,
	pub(crate) store: LocalStore,
	pub(crate) queue: MutationQueue,
	pub(crate) cache: ResponseCache,
	pub(crate) monitor: ConnectivityMonitor,
	pub(crate) events: Arc<EventBus>,
	pub(crate) remote: Arc<dyn RemoteClient>,
	/// True while the reconciler is mid-drain; the only lock the engine needs
	pub(crate) draining: AtomicBool,
}

impl EngineContext {
	pub(crate) fn sync_state(&self) -> SyncState {
		if self.draining.load(Ordering::SeqCst) {
			SyncState::Draining
		} else {
			SyncState::Idle
		}
	}

	/// Broadcast the current sync state and pending count.
	pub(crate) async fn emit_sync_state(&self) {
		let pending = self.queue.total_pending().await.unwrap_or(0);
		self.events.emit(Event::SyncStateChanged {
			state: self.sync_state(),
			pending,
		});
	}
}

/// The sync engine. One instance per running client.
pub struct SyncEngine {
	ctx: Arc<EngineContext>,
	reconciler: Arc<Reconciler>,
	listener: JoinHandle<()>,
}

impl SyncEngine {
	/// Open the engine with an HTTP remote client built from the config:
	/// `api_base_url` and the per-call timeout come straight from it.
	pub async fn connect(
		config: SyncConfig,
		auth_token: Option<String>,
		initial_connectivity: Connectivity,
	) -> anyhow::Result<Self> {
		let remote = Arc::new(HttpRemoteClient::new(
			config.api_base_url.clone(),
			Duration::from_secs(config.request_timeout_secs),
			auth_token,
		)?);
		Self::new(config, remote, initial_connectivity).await
	}

	/// Open the engine against the configured data directory and remote
	/// client, run migrations, and start listening for connectivity events.
	pub async fn new(
		config: SyncConfig,
		remote: Arc<dyn RemoteClient>,
		initial_connectivity: Connectivity,
	) -> anyhow::Result<Self> {
		let db = Arc::new(Database::open(&config.database_path()).await?);
		db.migrate().await?;
		Self::assemble(config, db, remote, initial_connectivity).await
	}

	/// Open the engine on an in-memory database; used by tests.
	pub async fn new_in_memory(
		config: SyncConfig,
		remote: Arc<dyn RemoteClient>,
		initial_connectivity: Connectivity,
	) -> anyhow::Result<Self> {
		let db = Arc::new(Database::open_in_memory().await?);
		db.migrate().await?;
		Self::assemble(config, db, remote, initial_connectivity).await
	}

	async fn assemble(
		config: SyncConfig,
		db: Arc<Database>,
		remote: Arc<dyn RemoteClient>,
		initial_connectivity: Connectivity,
	) -> anyhow::Result<Self> {
		let events = Arc::new(EventBus::default());
		let monitor = ConnectivityMonitor::new(
			initial_connectivity,
			Duration::from_millis(config.connectivity_dwell_ms),
			events.clone(),
		);

		let ctx = Arc::new(EngineContext {
			store: LocalStore::new(db.clone()),
			queue: MutationQueue::new(db.clone()),
			cache: ResponseCache::new(db),
			monitor,
			events: events.clone(),
			remote,
			draining: AtomicBool::new(false),
			config,
		});

		let reconciler = Reconciler::new(ctx.clone());
		let listener = reconciler.spawn_listener();

		events.emit(Event::EngineStarted);
		info!("sync engine started");

		// Anything left queued from a previous run drains as soon as the
		// network allows
		if ctx.monitor.is_reachable() {
			reconciler.schedule_trigger();
		}

		Ok(Self {
			ctx,
			reconciler,
			listener,
		})
	}

	/// Subscribe to engine events (connectivity, sync state, sync errors,
	/// id remaps).
	pub fn subscribe(&self) -> broadcast::Receiver<Event> {
		self.ctx.events.subscribe()
	}

	/// Current connectivity as the monitor believes it.
	pub fn connectivity(&self) -> Connectivity {
		self.ctx.monitor.current()
	}

	/// Feed the platform's own connectivity signal into the monitor.
	pub fn set_connectivity_hint(&self, hint: Connectivity) {
		self.ctx.monitor.set_hint(hint);
	}

	/// Current reconciler state.
	pub fn sync_state(&self) -> SyncState {
		self.ctx.sync_state()
	}

	/// Pending mutations for an owner; feeds the offline indicator.
	pub async fn pending_count(&self, owner: &str) -> Result<u64, StoreError> {
		self.ctx.queue.pending_count(owner).await
	}

	/// List every entity of a collection, network-first with a stale local
	/// fallback.
	pub async fn read_collection(
		&self,
		owner: &str,
		collection: Collection,
	) -> Result<ReadOutcome<Vec<Entity>>, ReadError> {
		operations::read::read_collection(&self.ctx, owner, collection).await
	}

	/// Detail read of one entity.
	pub async fn read_entity(
		&self,
		owner: &str,
		collection: Collection,
		id: &EntityRef,
	) -> Result<ReadOutcome<Option<Entity>>, ReadError> {
		operations::read::read_entity(&self.ctx, owner, collection, id).await
	}

	/// Read a static/reference route, cache-first with background refresh.
	pub async fn read_reference(
		&self,
		route_key: &str,
		path: &str,
	) -> Result<ReadOutcome<serde_json::Value>, ReadError> {
		operations::read::read_reference(&self.ctx, route_key, path).await
	}

	/// Apply a write: straight to the server while reachable, queued with an
	/// optimistic local apply otherwise.
	pub async fn write(
		&self,
		owner: &str,
		request: WriteRequest,
	) -> Result<WriteOutcome, WriteError> {
		let outcome = operations::write::write(&self.ctx, owner, request).await?;

		// A write that got queued while the monitor still says reachable
		// (the dwell window swallowed the flip) should not wait for the next
		// reachability event
		if outcome.status == WriteStatus::Queued && self.ctx.monitor.is_reachable() {
			self.reconciler.schedule_trigger();
		}
		Ok(outcome)
	}

	/// Re-arm sub-logs whose retries were exhausted and drain again (the
	/// user-facing "retry" button).
	pub async fn retry_failed(&self, owner: &str) -> Result<u64, StoreError> {
		let rearmed = self.ctx.queue.retry_failed(owner).await?;
		if rearmed > 0 {
			self.ctx.emit_sync_state().await;
			self.reconciler.schedule_trigger();
		}
		Ok(rearmed)
	}

	/// Seed default content for a first-run owner.
	pub async fn seed_if_needed(&self, owner: &str) -> Result<bool, WriteError> {
		operations::seed::seed_if_needed(&self.ctx, owner).await
	}

	/// Drain the queue now if reachable; mainly for tests and manual sync.
	pub async fn sync_now(&self) {
		self.reconciler.trigger().await;
	}
}

impl Drop for SyncEngine {
	fn drop(&mut self) {
		self.listener.abort();
	}
}

/// Install the global tracing subscriber at the configured level. `RUST_LOG`
/// overrides it; calling this more than once is a no-op.
pub fn init_logging(config: &SyncConfig) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
	let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
