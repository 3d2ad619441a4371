//! Event bus for decoupled communication

use crate::domain::EntityRef;
use tokio::sync::broadcast;

/// Sync engine events
#[derive(Debug, Clone)]
pub enum Event {
	/// The engine has started
	EngineStarted,

	/// The network became reachable
	BecameReachable,

	/// The network became unreachable
	BecameUnreachable,

	/// The reconciler moved between idle and draining, or the number of
	/// pending mutations changed
	SyncStateChanged {
		state: SyncState,
		pending: u64,
	},

	/// A local placeholder id was replaced by the server's canonical id
	EntityRemapped {
		local: EntityRef,
		canonical: EntityRef,
	},

	/// A pending local mutation lost last-writer-wins against a newer server
	/// version; informational, not a failure
	ConflictOverwritten {
		entity_ref: EntityRef,
	},

	/// A surfaced sync error: either retries exhausted or the server rejected
	/// a queued write outright
	SyncErrorRaised {
		entity_ref: Option<EntityRef>,
		message: String,
		retryable: bool,
	},
}

/// Reconciler state as seen by subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
	Idle,
	Draining,
}

/// Event bus for broadcasting events
pub struct EventBus {
	sender: broadcast::Sender<Event>,
}

impl EventBus {
	/// Create a new event bus with specified capacity
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Emit an event
	pub fn emit(&self, event: Event) {
		// Ignore send errors (no receivers)
		let _ = self.sender.send(event);
	}

	/// Subscribe to events
	pub fn subscribe(&self) -> broadcast::Receiver<Event> {
		self.sender.subscribe()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1024)
	}
}
