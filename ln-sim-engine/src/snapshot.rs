// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Deserialization of channel-graph snapshots.
//!
//! Snapshots follow the shape of an LND `describegraph` dump: a `nodes` list
//! and an `edges` list with one routing policy per direction. Numeric fields
//! arrive either as JSON numbers or as decimal strings depending on the tool
//! that produced the dump, so the amount fields accept both.

use serde::{Deserialize, Deserializer};

/// A channel-graph snapshot as read from disk.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Snapshot {
	#[serde(default)]
	pub nodes: Vec<SnapshotNode>,
	#[serde(default)]
	pub edges: Vec<SnapshotEdge>,
}

/// A node entry. Everything but the pub key is optional in the wild.
#[derive(Clone, Debug, Deserialize)]
pub struct SnapshotNode {
	pub pub_key: String,
	#[serde(default, deserialize_with = "u64_from_str_or_number")]
	pub last_update: u64,
	pub alias: Option<String>,
	#[serde(default)]
	pub addresses: Vec<serde_json::Value>,
	pub color: Option<String>,
	#[serde(default)]
	pub features: serde_json::Map<String, serde_json::Value>,
}

/// A channel entry linking two nodes.
///
/// The policy fields are doubly optional: a policy key can be absent from the
/// document, or present with a `null` value. Channels missing either policy
/// key carry no per-direction state and are excluded from the directed view.
#[derive(Clone, Debug, Deserialize)]
pub struct SnapshotEdge {
	pub channel_id: String,
	#[serde(default)]
	pub chan_point: String,
	#[serde(default, deserialize_with = "u64_from_str_or_number")]
	pub last_update: u64,
	pub node1_pub: String,
	pub node2_pub: String,
	#[serde(deserialize_with = "u64_from_str_or_number")]
	pub capacity: u64,
	#[serde(default, deserialize_with = "policy_field")]
	pub node1_policy: Option<Option<SnapshotPolicy>>,
	#[serde(default, deserialize_with = "policy_field")]
	pub node2_policy: Option<Option<SnapshotPolicy>>,
}

impl SnapshotEdge {
	/// Whether both policy keys are present in the document (values may still
	/// be null).
	pub fn has_directed_state(&self) -> bool {
		self.node1_policy.is_some() && self.node2_policy.is_some()
	}
}

/// A per-direction routing policy as published by one endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct SnapshotPolicy {
	#[serde(default)]
	pub time_lock_delta: u32,
	#[serde(default, deserialize_with = "u64_from_str_or_number")]
	pub min_htlc: u64,
	#[serde(default, deserialize_with = "u64_from_str_or_number")]
	pub fee_base_msat: u64,
	#[serde(default, deserialize_with = "u64_from_str_or_number")]
	pub fee_rate_milli_msat: u64,
	/// Absent in some dumps; normalized to `true` (conservative) at load.
	pub disabled: Option<bool>,
	#[serde(default, deserialize_with = "u64_from_str_or_number")]
	pub max_htlc_msat: u64,
	#[serde(default, deserialize_with = "u64_from_str_or_number")]
	pub last_update: u64,
}

/// The fallback alias for nodes announcing none: the first and last four
/// characters of the pub key joined by `..`.
pub fn default_alias(pub_key: &str) -> String {
	if pub_key.len() <= 8 {
		return pub_key.to_string();
	}
	format!("{}..{}", &pub_key[..4], &pub_key[pub_key.len() - 4..])
}

fn u64_from_str_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Raw {
		Number(u64),
		Text(String),
	}

	match Raw::deserialize(deserializer)? {
		Raw::Number(n) => Ok(n),
		Raw::Text(s) => s.parse::<u64>().map_err(serde::de::Error::custom),
	}
}

/// Maps a present policy field to `Some(value)` so that an absent key
/// (`serde(default)` → `None`) stays distinguishable from an explicit null
/// (`Some(None)`).
fn policy_field<'de, D>(deserializer: D) -> Result<Option<Option<SnapshotPolicy>>, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(Some(Option::<SnapshotPolicy>::deserialize(deserializer)?))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_amounts_accept_strings_and_numbers() {
		let json = r#"{
			"nodes": [{"pub_key": "02aa"}],
			"edges": [{
				"channel_id": "123", "chan_point": "ab:0",
				"node1_pub": "02aa", "node2_pub": "03bb",
				"capacity": "1000000",
				"node1_policy": {
					"time_lock_delta": 40, "min_htlc": "1000",
					"fee_base_msat": 1000, "fee_rate_milli_msat": "1",
					"disabled": false, "max_htlc_msat": "990000000",
					"last_update": 1609762013
				},
				"node2_policy": null
			}]
		}"#;
		let snapshot: Snapshot = serde_json::from_str(json).unwrap();
		let edge = &snapshot.edges[0];
		assert_eq!(edge.capacity, 1_000_000);

		let policy = edge.node1_policy.as_ref().unwrap().as_ref().unwrap();
		assert_eq!(policy.min_htlc, 1_000);
		assert_eq!(policy.fee_base_msat, 1_000);
		assert_eq!(policy.fee_rate_milli_msat, 1);
		assert_eq!(policy.max_htlc_msat, 990_000_000);
		assert_eq!(policy.disabled, Some(false));

		assert!(edge.has_directed_state());
		assert!(edge.node2_policy.as_ref().unwrap().is_none());
	}

	#[test]
	fn test_absent_policy_key_differs_from_null() {
		let json = r#"{
			"nodes": [],
			"edges": [{
				"channel_id": "9", "node1_pub": "02aa", "node2_pub": "03bb",
				"capacity": 5000
			}]
		}"#;
		let snapshot: Snapshot = serde_json::from_str(json).unwrap();
		let edge = &snapshot.edges[0];
		assert!(edge.node1_policy.is_none());
		assert!(!edge.has_directed_state());
	}

	#[test]
	fn test_node_defaults() {
		let json = r#"{"nodes": [{"pub_key": "02deadbeef00112233"}], "edges": []}"#;
		let snapshot: Snapshot = serde_json::from_str(json).unwrap();
		let node = &snapshot.nodes[0];
		assert_eq!(node.last_update, 0);
		assert!(node.alias.is_none());
		assert!(node.addresses.is_empty());
		assert!(node.features.is_empty());
	}

	#[test]
	fn test_default_alias_shape() {
		assert_eq!(default_alias("02deadbeef00112233"), "02de..2233");
		assert_eq!(default_alias("short"), "short");
	}
}
