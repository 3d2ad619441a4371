//! Draining the mutation queue: id remapping, retry isolation, idempotent
//! replay, exhaustion and last-writer-wins conflicts.

mod support;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use support::MockRemote;
use taskdeck_core::{
	Collection, Connectivity, EntityRef, Event, RemoteEntity, WriteRequest,
};

#[tokio::test]
async fn placeholder_ids_are_remapped_everywhere_after_drain() {
	let remote = MockRemote::new();
	let engine = support::engine(remote.clone(), Connectivity::Unreachable).await;
	let mut events = engine.subscribe();

	let column = engine
		.write(
			"u1",
			WriteRequest::Create {
				collection: Collection::Columns,
				payload: json!({"title": "To Do", "order": 0}),
			},
		)
		.await
		.unwrap()
		.entity
		.unwrap();
	assert!(column.id.is_local());

	// A second entity created offline, referencing the first by its
	// placeholder id
	let task = engine
		.write(
			"u1",
			WriteRequest::Create {
				collection: Collection::Tasks,
				payload: json!({"title": "Write report", "columnId": column.id.as_str()}),
			},
		)
		.await
		.unwrap()
		.entity
		.unwrap();

	engine.set_connectivity_hint(Connectivity::Reachable);
	support::wait_for_pending(&engine, "u1", 0).await;

	support::wait_for_event(&mut events, |e| {
		matches!(e, Event::EntityRemapped { local, .. } if *local == column.id)
	})
	.await;
	support::wait_for_event(&mut events, |e| {
		matches!(e, Event::EntityRemapped { local, .. } if *local == task.id)
	})
	.await;

	// The server only ever saw canonical references
	let creates = remote.creates();
	assert_eq!(creates.len(), 2);
	let (_, task_payload, _) = creates
		.iter()
		.find(|(collection, _, _)| *collection == Collection::Tasks)
		.unwrap();
	let sent_column_id = task_payload["columnId"].as_str().unwrap();
	assert!(!sent_column_id.starts_with("temp-"));
	assert!(remote.entity(sent_column_id).is_some());

	// And nothing local resolves by a placeholder id anymore
	for collection in [Collection::Columns, Collection::Tasks] {
		for entity in engine.read_collection("u1", collection).await.unwrap().data {
			assert!(!entity.id.is_local());
			assert!(!entity.payload.to_string().contains("temp-"));
		}
	}
	assert!(engine
		.read_entity("u1", Collection::Columns, &column.id)
		.await
		.unwrap()
		.data
		.is_none());
}

#[tokio::test]
async fn one_failing_entity_does_not_block_or_resend_the_others() {
	let remote = MockRemote::new();
	remote.fail_creates_containing("flaky-marker", 1);
	let engine = support::engine(remote.clone(), Connectivity::Unreachable).await;

	engine
		.write(
			"u1",
			WriteRequest::Create {
				collection: Collection::Tasks,
				payload: json!({"title": "steady"}),
			},
		)
		.await
		.unwrap();
	engine
		.write(
			"u1",
			WriteRequest::Create {
				collection: Collection::Tasks,
				payload: json!({"title": "flaky-marker"}),
			},
		)
		.await
		.unwrap();

	engine.set_connectivity_hint(Connectivity::Reachable);
	support::wait_for_pending(&engine, "u1", 0).await;

	// The healthy entity was sent exactly once; only the failing one retried
	let creates = remote.creates();
	let steady: Vec<_> = creates
		.iter()
		.filter(|(_, payload, _)| payload["title"] == "steady")
		.collect();
	let flaky: Vec<_> = creates
		.iter()
		.filter(|(_, payload, _)| payload["title"] == "flaky-marker")
		.collect();
	assert_eq!(steady.len(), 1);
	assert_eq!(flaky.len(), 2);
	assert_eq!(remote.entity_count(), 2);
}

#[tokio::test]
async fn a_dropped_response_is_replayed_without_duplicating_the_entity() {
	let remote = MockRemote::new();
	remote.drop_next_write_response();
	let engine = support::engine(remote.clone(), Connectivity::Unreachable).await;

	engine
		.write(
			"u1",
			WriteRequest::Create {
				collection: Collection::Tasks,
				payload: json!({"title": "exactly once"}),
			},
		)
		.await
		.unwrap();

	engine.set_connectivity_hint(Connectivity::Reachable);
	support::wait_for_pending(&engine, "u1", 0).await;

	// Two sends, same idempotency key, one entity
	let creates = remote.creates();
	assert_eq!(creates.len(), 2);
	assert_eq!(creates[0].2, creates[1].2);
	assert_eq!(remote.entity_count(), 1);

	let listed = engine.read_collection("u1", Collection::Tasks).await.unwrap();
	assert_eq!(listed.data.len(), 1);
	assert!(!listed.data[0].id.is_local());
}

#[tokio::test]
async fn exhausted_retries_park_the_change_until_manual_retry() {
	let remote = MockRemote::new();
	let engine = support::engine(remote.clone(), Connectivity::Unreachable).await;
	let mut events = engine.subscribe();

	engine
		.write(
			"u1",
			WriteRequest::Create {
				collection: Collection::Tasks,
				payload: json!({"title": "stubborn"}),
			},
		)
		.await
		.unwrap();

	remote.set_fail_writes(true);
	engine.set_connectivity_hint(Connectivity::Reachable);

	// Backoff runs on its own until the attempt budget is spent; the
	// transport failures stay inside the dwell window, so the monitor keeps
	// reporting reachable throughout
	let exhausted = support::wait_for_event(&mut events, |e| {
		matches!(
			e,
			Event::SyncErrorRaised {
				retryable: true,
				..
			}
		)
	})
	.await;
	match exhausted {
		Event::SyncErrorRaised { entity_ref, .. } => assert!(entity_ref.is_some()),
		_ => unreachable!(),
	}

	// Parked, still pending, still visible locally
	assert_eq!(engine.pending_count("u1").await.unwrap(), 1);
	let listed = engine.read_collection("u1", Collection::Tasks).await.unwrap();
	assert_eq!(listed.data.len(), 1);

	remote.set_fail_writes(false);
	assert_eq!(engine.retry_failed("u1").await.unwrap(), 1);
	support::wait_for_pending(&engine, "u1", 0).await;

	// Three failed attempts plus the successful replay, all one logical write
	let creates = remote.creates();
	assert_eq!(creates.len(), 4);
	assert!(creates.iter().all(|(_, _, key)| *key == creates[0].2));
	assert_eq!(remote.entity_count(), 1);
}

#[tokio::test]
async fn conflict_with_a_newer_server_version_takes_the_server_copy() {
	let remote = MockRemote::new();
	remote.seed(
		Collection::Tasks,
		"srv-1",
		json!({"title": "Write report", "priority": "low"}),
	);
	let engine = support::engine(remote.clone(), Connectivity::Unreachable).await;
	let mut events = engine.subscribe();

	engine
		.write(
			"u1",
			WriteRequest::Update {
				collection: Collection::Tasks,
				id: EntityRef::new("srv-1"),
				patch: json!({"priority": "high"}),
			},
		)
		.await
		.unwrap();

	// Someone else edited the task after our queued change was made
	remote.conflict_on(
		"srv-1",
		RemoteEntity {
			id: "srv-1".to_string(),
			payload: json!({"title": "Write report v2", "priority": "urgent"}),
			updated_at: Utc::now() + ChronoDuration::hours(1),
		},
	);

	engine.set_connectivity_hint(Connectivity::Reachable);
	support::wait_for_pending(&engine, "u1", 0).await;

	support::wait_for_event(&mut events, |e| {
		matches!(e, Event::ConflictOverwritten { entity_ref } if entity_ref.as_str() == "srv-1")
	})
	.await;

	// Our change was discarded and the store holds the winner
	let local = engine
		.read_entity("u1", Collection::Tasks, &EntityRef::new("srv-1"))
		.await
		.unwrap()
		.data
		.unwrap();
	assert_eq!(local.payload["title"], "Write report v2");
	assert_eq!(local.payload["priority"], "urgent");

	// No force-write ever went out
	assert!(remote.updates().iter().all(|(_, _, _, force)| !force));
}

#[tokio::test]
async fn conflict_with_an_older_server_version_forces_the_local_change() {
	let remote = MockRemote::new();
	remote.seed(
		Collection::Tasks,
		"srv-1",
		json!({"title": "Write report", "priority": "low"}),
	);
	let engine = support::engine(remote.clone(), Connectivity::Unreachable).await;

	engine
		.write(
			"u1",
			WriteRequest::Update {
				collection: Collection::Tasks,
				id: EntityRef::new("srv-1"),
				patch: json!({"priority": "high"}),
			},
		)
		.await
		.unwrap();

	// The server's "conflicting" version predates our queued change
	remote.conflict_on(
		"srv-1",
		RemoteEntity {
			id: "srv-1".to_string(),
			payload: json!({"title": "Write report", "priority": "low"}),
			updated_at: Utc::now() - ChronoDuration::days(1),
		},
	);

	engine.set_connectivity_hint(Connectivity::Reachable);
	support::wait_for_pending(&engine, "u1", 0).await;

	// One ordinary attempt, one forced retry carrying the same patch
	let updates = remote.updates();
	assert_eq!(updates.len(), 2);
	assert!(!updates[0].3);
	assert!(updates[1].3);
	assert_eq!(updates[1].1["priority"], "high");

	let server = remote.entity("srv-1").unwrap();
	assert_eq!(server.payload["priority"], "high");
}

#[tokio::test]
async fn losing_connectivity_mid_drain_leaves_the_rest_queued() {
	let remote = MockRemote::new();
	remote.fail_creates_containing("second", 1);
	// Zero dwell so the transport failure flips the monitor mid-drain
	let engine = support::engine_with_dwell(remote.clone(), Connectivity::Unreachable, 0).await;

	engine
		.write(
			"u1",
			WriteRequest::Create {
				collection: Collection::Tasks,
				payload: json!({"title": "first"}),
			},
		)
		.await
		.unwrap();
	engine
		.write(
			"u1",
			WriteRequest::Create {
				collection: Collection::Tasks,
				payload: json!({"title": "second"}),
			},
		)
		.await
		.unwrap();

	engine.set_connectivity_hint(Connectivity::Reachable);

	// The failure on the second entity flips the monitor back down and the
	// pass aborts; nothing retries until the next reachability signal
	for _ in 0..1_000 {
		if engine.connectivity() == Connectivity::Unreachable {
			break;
		}
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
	}
	assert_eq!(engine.connectivity(), Connectivity::Unreachable);

	// The first entity landed and was acked; the second stays queued, unacked
	assert_eq!(remote.entity_count(), 1);
	assert_eq!(engine.pending_count("u1").await.unwrap(), 1);

	engine.set_connectivity_hint(Connectivity::Reachable);
	support::wait_for_pending(&engine, "u1", 0).await;

	let creates = remote.creates();
	let first: Vec<_> = creates
		.iter()
		.filter(|(_, payload, _)| payload["title"] == "first")
		.collect();
	let second: Vec<_> = creates
		.iter()
		.filter(|(_, payload, _)| payload["title"] == "second")
		.collect();
	assert_eq!(first.len(), 1);
	assert_eq!(second.len(), 2);
	assert_eq!(remote.entity_count(), 2);
}

#[tokio::test]
async fn queued_deletes_reach_the_server_after_reconnect() {
	let remote = MockRemote::new();
	remote.seed(Collection::Tasks, "srv-1", json!({"title": "obsolete"}));
	let engine = support::engine(remote.clone(), Connectivity::Unreachable).await;

	engine
		.write(
			"u1",
			WriteRequest::Delete {
				collection: Collection::Tasks,
				id: EntityRef::new("srv-1"),
			},
		)
		.await
		.unwrap();
	assert_eq!(engine.pending_count("u1").await.unwrap(), 1);

	engine.set_connectivity_hint(Connectivity::Reachable);
	support::wait_for_pending(&engine, "u1", 0).await;

	assert_eq!(remote.deletes(), vec!["srv-1".to_string()]);
	assert!(remote.entity("srv-1").is_none());
}
