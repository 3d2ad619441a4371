//! First-run seeding
//!
//! A brand-new owner gets a default board layout and a starter deck so the
//! app is not empty on first launch. Seeded entities go through the normal
//! write path, so they sync like anything the user created.

use super::{write, WriteError, WriteRequest};
use crate::domain::Collection;
use crate::EngineContext;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Seed default content for an owner whose store is empty. Returns whether
/// anything was created.
pub(crate) async fn seed_if_needed(
	ctx: &Arc<EngineContext>,
	owner: &str,
) -> Result<bool, WriteError> {
	let columns = ctx.store.get_all(owner, Collection::Columns).await?;
	if !columns.is_empty() {
		return Ok(false);
	}

	info!(owner, "seeding default board and starter deck");

	let mut todo_column_id = None;
	for (order, title) in ["To Do", "In Progress", "Done"].iter().enumerate() {
		let outcome = write::write(
			ctx,
			owner,
			WriteRequest::Create {
				collection: Collection::Columns,
				payload: json!({"title": title, "order": order}),
			},
		)
		.await?;
		if order == 0 {
			todo_column_id = outcome.entity.map(|e| e.id);
		}
	}

	if ctx.store.get_all(owner, Collection::Tasks).await?.is_empty() {
		let column_id = todo_column_id
			.as_ref()
			.map(|id| id.as_str().to_string())
			.unwrap_or_default();
		write::write(
			ctx,
			owner,
			WriteRequest::Create {
				collection: Collection::Tasks,
				payload: json!({
					"title": "Plan your week",
					"description": "Drag this card across the board to get a feel for it.",
					"columnId": column_id,
					"priority": "medium",
					"tags": ["welcome"],
				}),
			},
		)
		.await?;
	}

	if ctx.store.get_all(owner, Collection::Decks).await?.is_empty() {
		write::write(
			ctx,
			owner,
			WriteRequest::Create {
				collection: Collection::Decks,
				payload: json!({
					"title": "Getting started",
					"subject": "Taskdeck",
					"cards": [
						{
							"question": "Where do offline edits go?",
							"answer": "Into the local store right away, and into the sync queue until the server confirms them.",
							"difficulty": "easy",
						}
					],
				}),
			},
		)
		.await?;
	}

	Ok(true)
}
