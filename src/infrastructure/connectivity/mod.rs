//! Connectivity monitor
//!
//! A two-state machine (`Reachable` ⇄ `Unreachable`). The initial state is a
//! provisional hint from the platform, corrected by the outcome of actual
//! network calls: any call failing at the transport level forces a transition
//! to `Unreachable`, any call that completes forces `Reachable`. Transitions
//! are debounced with a minimum dwell time so a flaky link does not make the
//! engine oscillate; a flip arriving inside the window is deferred and applied
//! once the window expires, so a one-shot signal is never lost. Consumers
//! subscribe to the event bus rather than poll.

use crate::infrastructure::events::{Event, EventBus};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// The two connectivity states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
	Reachable,
	Unreachable,
}

struct MonitorState {
	current: Connectivity,
	last_transition: Instant,
	/// A flip that arrived inside the dwell window, waiting for it to expire
	pending: Option<Connectivity>,
}

/// Observes reachability transitions and emits them on the event bus.
pub struct ConnectivityMonitor {
	state: Mutex<MonitorState>,
	dwell: Duration,
	events: Arc<EventBus>,
}

impl ConnectivityMonitor {
	pub fn new(initial_hint: Connectivity, dwell: Duration, events: Arc<EventBus>) -> Self {
		Self {
			state: Mutex::new(MonitorState {
				current: initial_hint,
				// Allow an immediate correction of the provisional hint
				last_transition: Instant::now()
					.checked_sub(dwell)
					.unwrap_or_else(Instant::now),
				pending: None,
			}),
			dwell,
			events,
		}
	}

	/// Current state, applying any deferred flip whose dwell window has
	/// expired.
	pub fn current(&self) -> Connectivity {
		let (current, settled) = {
			let mut state = self.state.lock().unwrap();
			let settled = Self::settle(&mut state, self.dwell);
			(state.current, settled)
		};
		if let Some(target) = settled {
			self.announce(target);
		}
		current
	}

	pub fn is_reachable(&self) -> bool {
		self.current() == Connectivity::Reachable
	}

	/// A network call failed at the transport level (not an application
	/// error).
	pub fn report_network_error(&self) {
		self.transition(Connectivity::Unreachable);
	}

	/// A network call completed, successfully or with an application error.
	/// Either way the remote side was reached.
	pub fn report_success(&self) {
		self.transition(Connectivity::Reachable);
	}

	/// The platform's own connectivity signal changed.
	pub fn set_hint(&self, hint: Connectivity) {
		self.transition(hint);
	}

	fn transition(&self, target: Connectivity) {
		let (settled, applied) = {
			let mut state = self.state.lock().unwrap();
			let settled = Self::settle(&mut state, self.dwell);

			let applied = if state.last_transition.elapsed() < self.dwell {
				// Debounce: defer flips inside the dwell window. The most
				// recent signal wins once the window expires; a report
				// confirming the current state cancels a stale deferred flip.
				let deferred = (target != state.current).then_some(target);
				if deferred.is_some() {
					debug!(?target, "connectivity flip deferred inside dwell window");
				}
				state.pending = deferred;
				None
			} else if target != state.current {
				state.current = target;
				state.last_transition = Instant::now();
				state.pending = None;
				Some(target)
			} else {
				state.pending = None;
				None
			};
			(settled, applied)
		};

		if let Some(target) = settled {
			self.announce(target);
		}
		if let Some(target) = applied {
			self.announce(target);
		}
	}

	/// Apply a deferred flip whose dwell window has expired. Returns the new
	/// state if one was applied, for announcement outside the lock.
	fn settle(state: &mut MonitorState, dwell: Duration) -> Option<Connectivity> {
		let target = state.pending?;
		if state.last_transition.elapsed() < dwell {
			return None;
		}
		state.pending = None;
		if target == state.current {
			return None;
		}
		state.current = target;
		state.last_transition = Instant::now();
		Some(target)
	}

	fn announce(&self, target: Connectivity) {
		debug!(?target, "connectivity transition");
		self.events.emit(match target {
			Connectivity::Reachable => Event::BecameReachable,
			Connectivity::Unreachable => Event::BecameUnreachable,
		});
	}
}
