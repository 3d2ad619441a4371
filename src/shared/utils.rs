//! Small helpers shared across the engine

use serde_json::Value;

/// Replace every string value equal to `from` with `to`, anywhere in the JSON
/// tree. Returns true if anything changed.
///
/// Used when a local placeholder id is remapped to its canonical id: payloads
/// may reference other entities (a task carries its column id), and those
/// references must not survive the remap.
pub fn rewrite_id_references(value: &mut Value, from: &str, to: &str) -> bool {
	match value {
		Value::String(s) if s == from => {
			*s = to.to_string();
			true
		}
		Value::Array(items) => {
			let mut changed = false;
			for item in items {
				changed |= rewrite_id_references(item, from, to);
			}
			changed
		}
		Value::Object(map) => {
			let mut changed = false;
			for (_, item) in map.iter_mut() {
				changed |= rewrite_id_references(item, from, to);
			}
			changed
		}
		_ => false,
	}
}
