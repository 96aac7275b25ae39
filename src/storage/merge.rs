//! Deep merge for nested JSON trees.
//!
//! The persistent store holds one nested mapping per (device, wallet)
//! partition. Saves carry partial trees, so merging must preserve sibling
//! keys the partial tree does not mention, at every depth.

use serde_json::Value;

/// Merge `new` into `old`, recursively.
///
/// Two nested mappings merge key by key; any other pairing overwrites the
/// old value with a clone of the new one. Arrays count as leaves: an
/// incoming address list replaces the stored one wholesale.
pub fn deep_merge(old: &mut Value, new: &Value) {
	match (old, new) {
		(Value::Object(old_map), Value::Object(new_map)) => {
			for (key, new_value) in new_map {
				match old_map.get_mut(key) {
					Some(old_value) => deep_merge(old_value, new_value),
					None => {
						old_map.insert(key.clone(), new_value.clone());
					}
				}
			}
		}
		(old_slot, new_value) => {
			*old_slot = new_value.clone();
		}
	}
}
