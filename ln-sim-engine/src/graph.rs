// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The dual channel-graph model.
//!
//! One [`NetworkGraph`] owns two views of the same network. The undirected
//! view maps a channel id to its topology and the two published routing
//! policies. The directed view splits every channel into two edges keyed
//! `"{channel_id}-{src_pub}"`, each carrying the spendable balance, the
//! per-side capacity ledger and the ordered pending-HTLC state the simulator
//! mutates.
//!
//! For every channel between `node1` and `node2`:
//! `balance(node1→node2) + Σ pending(node1→node2) + balance(node2→node1) +
//! Σ pending(node2→node1) = capacity`. [`NetworkGraph::verify_invariants`]
//! asserts this conservation plus the structural counts and index coherence.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::payment::{Htlc, PendingAmount, PendingHtlc, MSAT_PER_SAT};
use crate::snapshot::{default_alias, Snapshot, SnapshotPolicy};

#[derive(Debug, Error)]
pub enum GraphError {
	#[error("node {node} referenced by channel {channel_id} is not in the snapshot")]
	MissingEndpoint { node: String, channel_id: String },
	#[error("duplicate channel id {0}")]
	DuplicateChannel(String),
	#[error("channel {channel_id} violates capacity conservation: directed sides sum to {actual_msat} msat, capacity is {expected_msat} msat")]
	CapacityMismatch { channel_id: String, expected_msat: i64, actual_msat: i64 },
	#[error("directed edge count {directed} does not match 2x{channels} stateful channels")]
	EdgeCountMismatch { channels: usize, directed: usize },
	#[error("directed edge {key} has inconsistent HTLC indices")]
	HtlcIndexMismatch { key: String },
}

/// A node of the topology view. Immutable after load.
#[derive(Clone, Debug)]
pub struct Node {
	pub pub_key: String,
	pub alias: String,
	pub last_update: u64,
	pub addresses: Vec<serde_json::Value>,
	pub color: String,
	pub features: serde_json::Map<String, serde_json::Value>,
}

/// A per-direction routing policy, normalized from the snapshot: a missing
/// `disabled` flag becomes `true`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingPolicy {
	pub time_lock_delta: u32,
	pub min_htlc_msat: u64,
	pub fee_base_msat: u64,
	pub fee_rate_milli_msat: u64,
	pub disabled: bool,
	pub max_htlc_msat: u64,
	pub last_update: u64,
}

impl From<&SnapshotPolicy> for RoutingPolicy {
	fn from(p: &SnapshotPolicy) -> Self {
		RoutingPolicy {
			time_lock_delta: p.time_lock_delta,
			min_htlc_msat: p.min_htlc,
			fee_base_msat: p.fee_base_msat,
			fee_rate_milli_msat: p.fee_rate_milli_msat,
			disabled: p.disabled.unwrap_or(true),
			max_htlc_msat: p.max_htlc_msat,
			last_update: p.last_update,
		}
	}
}

/// An undirected channel of the topology view. `policy_source` is the policy
/// published by `node1_pub`, `policy_dest` the one published by `node2_pub`.
#[derive(Clone, Debug)]
pub struct Channel {
	pub channel_id: String,
	pub chan_point: String,
	pub last_update: u64,
	pub node1_pub: String,
	pub node2_pub: String,
	pub capacity_sat: u64,
	pub policy_source: Option<RoutingPolicy>,
	pub policy_dest: Option<RoutingPolicy>,
	/// Whether the channel contributes a pair of directed edges. Channels
	/// missing a policy key in the snapshot are topology-only.
	pub has_state: bool,
}

/// One direction of a channel, keyed `"{channel_id}-{src}"`.
///
/// `capacity_msat` is a per-side ledger seeded from the channel capacity and
/// adjusted by every reservation and settlement so the bookkeeping of a run
/// can be audited; the channel-level capacity of the topology view never
/// changes.
#[derive(Clone, Debug)]
pub struct DirectedChannel {
	pub channel_id: String,
	pub src: String,
	pub dst: String,
	pub last_update: u64,
	pub policy_source: Option<RoutingPolicy>,
	pub policy_dest: Option<RoutingPolicy>,
	pub capacity_msat: i64,
	pub balance_msat: i64,
	/// Ordered pending-amount ledger; the slot position is the HTLC index.
	pub pending: Vec<PendingAmount>,
	/// Full HTLC records, present for indices created by blocking a payment.
	pub htlcs: BTreeMap<usize, Htlc>,
	/// Pending-HTLC summaries, same keys as `htlcs`.
	pub val_pending: BTreeMap<usize, PendingHtlc>,
}

impl DirectedChannel {
	/// The key of this edge in the directed view.
	pub fn key(&self) -> String {
		format!("{}-{}", self.channel_id, self.src)
	}

	/// The key of the opposite direction of the same channel.
	pub fn opposite_key(&self) -> String {
		format!("{}-{}", self.channel_id, self.dst)
	}

	/// The next free HTLC index. Indices are monotone and never reused.
	pub fn next_htlc_index(&self) -> usize {
		self.pending.len()
	}

	/// The sum of all pending amounts on this side.
	pub fn pending_total_msat(&self) -> i64 {
		self.pending.iter().map(|p| p.amount_msat).sum()
	}
}

/// The dual graph: undirected topology plus directed balance/HTLC state.
#[derive(Clone, Debug, Default)]
pub struct NetworkGraph {
	nodes: BTreeMap<String, Node>,
	channels: BTreeMap<String, Channel>,
	directed: BTreeMap<String, DirectedChannel>,
	outgoing: BTreeMap<String, Vec<String>>,
}

impl NetworkGraph {
	/// Builds both views from a snapshot, applying the load-time
	/// normalization: default aliases, conservative `disabled` flags, and an
	/// even split of each channel capacity as the initial balances.
	pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, GraphError> {
		let mut graph = NetworkGraph::default();

		for n in &snapshot.nodes {
			let alias = match &n.alias {
				Some(alias) if !alias.is_empty() => alias.clone(),
				_ => default_alias(&n.pub_key),
			};
			let node = Node {
				pub_key: n.pub_key.clone(),
				alias,
				last_update: n.last_update,
				addresses: n.addresses.clone(),
				color: n.color.clone().unwrap_or_else(|| "#000000".to_string()),
				features: n.features.clone(),
			};
			graph.outgoing.entry(n.pub_key.clone()).or_default();
			graph.nodes.insert(n.pub_key.clone(), node);
		}

		for e in &snapshot.edges {
			for endpoint in [&e.node1_pub, &e.node2_pub] {
				if !graph.nodes.contains_key(endpoint) {
					return Err(GraphError::MissingEndpoint {
						node: endpoint.clone(),
						channel_id: e.channel_id.clone(),
					});
				}
			}
			if graph.channels.contains_key(&e.channel_id) {
				return Err(GraphError::DuplicateChannel(e.channel_id.clone()));
			}

			let policy1 =
				e.node1_policy.as_ref().and_then(|p| p.as_ref()).map(RoutingPolicy::from);
			let policy2 =
				e.node2_policy.as_ref().and_then(|p| p.as_ref()).map(RoutingPolicy::from);
			let has_state = e.has_directed_state();

			let channel = Channel {
				channel_id: e.channel_id.clone(),
				chan_point: e.chan_point.clone(),
				last_update: e.last_update,
				node1_pub: e.node1_pub.clone(),
				node2_pub: e.node2_pub.clone(),
				capacity_sat: e.capacity,
				policy_source: policy1.clone(),
				policy_dest: policy2.clone(),
				has_state,
			};
			graph.channels.insert(e.channel_id.clone(), channel);

			if !has_state {
				continue;
			}

			// Until a seeding pass runs, each side holds half the capacity so
			// conservation holds from the moment of load.
			let capacity_msat = (e.capacity * MSAT_PER_SAT) as i64;
			let half_msat = capacity_msat / 2;
			let sides = [
				(&e.node1_pub, &e.node2_pub, policy1.clone(), policy2.clone(), half_msat),
				(&e.node2_pub, &e.node1_pub, policy2, policy1, capacity_msat - half_msat),
			];
			for (src, dst, policy_source, policy_dest, balance_msat) in sides {
				let edge = DirectedChannel {
					channel_id: e.channel_id.clone(),
					src: src.clone(),
					dst: dst.clone(),
					last_update: e.last_update,
					policy_source,
					policy_dest,
					capacity_msat,
					balance_msat,
					pending: Vec::new(),
					htlcs: BTreeMap::new(),
					val_pending: BTreeMap::new(),
				};
				let key = edge.key();
				graph.outgoing.entry(src.clone()).or_default().push(key.clone());
				graph.directed.insert(key, edge);
			}
		}

		Ok(graph)
	}

	pub fn number_of_nodes(&self) -> usize {
		self.nodes.len()
	}

	pub fn number_of_channels(&self) -> usize {
		self.channels.len()
	}

	pub fn number_of_directed_channels(&self) -> usize {
		self.directed.len()
	}

	/// The number of channels that carry directed balance/HTLC state.
	pub fn number_of_stateful_channels(&self) -> usize {
		self.channels.values().filter(|c| c.has_state).count()
	}

	pub fn has_node(&self, pub_key: &str) -> bool {
		self.nodes.contains_key(pub_key)
	}

	pub fn node(&self, pub_key: &str) -> Option<&Node> {
		self.nodes.get(pub_key)
	}

	pub fn nodes(&self) -> impl Iterator<Item = &Node> {
		self.nodes.values()
	}

	pub fn channel(&self, channel_id: &str) -> Option<&Channel> {
		self.channels.get(channel_id)
	}

	pub fn channels(&self) -> impl Iterator<Item = &Channel> {
		self.channels.values()
	}

	pub fn directed(&self, key: &str) -> Option<&DirectedChannel> {
		self.directed.get(key)
	}

	pub fn directed_mut(&mut self, key: &str) -> Option<&mut DirectedChannel> {
		self.directed.get_mut(key)
	}

	pub fn directed_channels(&self) -> impl Iterator<Item = &DirectedChannel> {
		self.directed.values()
	}

	pub fn directed_channels_mut(&mut self) -> impl Iterator<Item = &mut DirectedChannel> {
		self.directed.values_mut()
	}

	/// The two directed-view keys of a channel, `(node1 side, node2 side)`.
	pub fn directed_keys(&self, channel_id: &str) -> Option<(String, String)> {
		let channel = self.channels.get(channel_id)?;
		Some((
			format!("{}-{}", channel_id, channel.node1_pub),
			format!("{}-{}", channel_id, channel.node2_pub),
		))
	}

	/// The channel id a directed-view key belongs to.
	pub fn channel_id_of_directed(key: &str) -> &str {
		key.split_once('-').map(|(id, _)| id).unwrap_or(key)
	}

	/// All directed keys leaving `src`.
	pub fn outgoing_keys(&self, src: &str) -> &[String] {
		self.outgoing.get(src).map(Vec::as_slice).unwrap_or(&[])
	}

	/// Directed keys of all parallel channels running `src` → `dst`.
	pub fn parallel_keys(&self, src: &str, dst: &str) -> Vec<&str> {
		self.outgoing_keys(src)
			.iter()
			.filter(|key| self.directed.get(*key).map(|e| e.dst == dst).unwrap_or(false))
			.map(String::as_str)
			.collect()
	}

	pub fn alias_of(&self, pub_key: &str) -> Option<&str> {
		self.nodes.get(pub_key).map(|n| n.alias.as_str())
	}

	pub fn pubkey_by_alias(&self, alias: &str) -> Option<&str> {
		self.nodes.values().find(|n| n.alias == alias).map(|n| n.pub_key.as_str())
	}

	/// Total network capacity in satoshis.
	pub fn total_capacity(&self) -> u64 {
		self.channels.values().map(|c| c.capacity_sat).sum()
	}

	/// Capacity anchored at each node (a channel counts for both endpoints).
	pub fn capacity_by_node(&self) -> BTreeMap<String, u64> {
		let mut capacities: BTreeMap<String, u64> =
			self.nodes.keys().map(|k| (k.clone(), 0)).collect();
		for c in self.channels.values() {
			*capacities.entry(c.node1_pub.clone()).or_default() += c.capacity_sat;
			*capacities.entry(c.node2_pub.clone()).or_default() += c.capacity_sat;
		}
		capacities
	}

	pub fn node_capacity(&self, pub_key: &str) -> u64 {
		self.channels
			.values()
			.filter(|c| c.node1_pub == pub_key || c.node2_pub == pub_key)
			.map(|c| c.capacity_sat)
			.sum()
	}

	/// Channel count per node.
	pub fn channels_by_node(&self) -> BTreeMap<String, usize> {
		let mut counts: BTreeMap<String, usize> =
			self.nodes.keys().map(|k| (k.clone(), 0)).collect();
		for c in self.channels.values() {
			*counts.entry(c.node1_pub.clone()).or_default() += 1;
			*counts.entry(c.node2_pub.clone()).or_default() += 1;
		}
		counts
	}

	pub fn node_channel_count(&self, pub_key: &str) -> usize {
		self.channels
			.values()
			.filter(|c| c.node1_pub == pub_key || c.node2_pub == pub_key)
			.count()
	}

	/// Spendable balance per node, summed over its outgoing directed edges
	/// (millisatoshis).
	pub fn balance_by_node(&self) -> BTreeMap<String, i64> {
		let mut balances: BTreeMap<String, i64> =
			self.nodes.keys().map(|k| (k.clone(), 0)).collect();
		for e in self.directed.values() {
			*balances.entry(e.src.clone()).or_default() += e.balance_msat;
		}
		balances
	}

	pub fn node_balance(&self, pub_key: &str) -> i64 {
		self.outgoing_keys(pub_key)
			.iter()
			.filter_map(|key| self.directed.get(key))
			.map(|e| e.balance_msat)
			.sum()
	}

	/// Balance sitting on directed edges whose destination policy is missing
	/// or disabled (millisatoshis).
	pub fn disabled_capacity(&self) -> i64 {
		self.directed.values().filter(|e| Self::is_disabled(e)).map(|e| e.balance_msat).sum()
	}

	/// Disabled balance per source node (millisatoshis).
	pub fn disabled_capacity_by_node(&self) -> BTreeMap<String, i64> {
		let mut disabled: BTreeMap<String, i64> =
			self.nodes.keys().map(|k| (k.clone(), 0)).collect();
		for e in self.directed.values().filter(|e| Self::is_disabled(e)) {
			*disabled.entry(e.src.clone()).or_default() += e.balance_msat;
		}
		disabled
	}

	fn is_disabled(edge: &DirectedChannel) -> bool {
		edge.policy_dest.as_ref().map(|p| p.disabled).unwrap_or(true)
	}

	/// Checks the structural counts, per-channel capacity conservation and
	/// HTLC index coherence. Any violation is fatal to a simulation run.
	pub fn verify_invariants(&self) -> Result<(), GraphError> {
		let stateful = self.number_of_stateful_channels();
		if self.directed.len() != 2 * stateful {
			return Err(GraphError::EdgeCountMismatch {
				channels: stateful,
				directed: self.directed.len(),
			});
		}

		for channel in self.channels.values().filter(|c| c.has_state) {
			let (key1, key2) = self
				.directed_keys(&channel.channel_id)
				.expect("stateful channel has directed keys");
			let side1 = &self.directed[&key1];
			let side2 = &self.directed[&key2];

			let actual_msat = side1.balance_msat
				+ side1.pending_total_msat()
				+ side2.balance_msat
				+ side2.pending_total_msat();
			let expected_msat = (channel.capacity_sat * MSAT_PER_SAT) as i64;
			if actual_msat != expected_msat {
				return Err(GraphError::CapacityMismatch {
					channel_id: channel.channel_id.clone(),
					expected_msat,
					actual_msat,
				});
			}

			for side in [side1, side2] {
				let coherent = side.htlcs.keys().eq(side.val_pending.keys())
					&& side.htlcs.keys().all(|idx| *idx < side.pending.len());
				if !coherent {
					return Err(GraphError::HtlcIndexMismatch { key: side.key() });
				}
			}
		}

		Ok(())
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::snapshot::Snapshot;

	/// A triangle alice—bob—carol with an extra dave—alice channel, all
	/// policies enabled unless overridden in a test.
	pub(crate) fn snapshot_json() -> String {
		let policy = r#"{
			"time_lock_delta": 40, "min_htlc": "1000",
			"fee_base_msat": "1000", "fee_rate_milli_msat": "1",
			"disabled": false, "max_htlc_msat": "990000000",
			"last_update": 1609762013
		}"#;
		format!(
			r#"{{
				"nodes": [
					{{"pub_key": "02aaaaaaaaaaaaaaaa", "alias": "alice"}},
					{{"pub_key": "03bbbbbbbbbbbbbbbb", "alias": "bob"}},
					{{"pub_key": "02cccccccccccccccc", "alias": "carol"}},
					{{"pub_key": "03dddddddddddddddd"}}
				],
				"edges": [
					{{"channel_id": "100", "chan_point": "aa:0",
					  "node1_pub": "02aaaaaaaaaaaaaaaa", "node2_pub": "03bbbbbbbbbbbbbbbb",
					  "capacity": "1000000", "node1_policy": {policy}, "node2_policy": {policy}}},
					{{"channel_id": "200", "chan_point": "bb:0",
					  "node1_pub": "03bbbbbbbbbbbbbbbb", "node2_pub": "02cccccccccccccccc",
					  "capacity": "1000000", "node1_policy": {policy}, "node2_policy": {policy}}},
					{{"channel_id": "300", "chan_point": "cc:0",
					  "node1_pub": "02aaaaaaaaaaaaaaaa", "node2_pub": "02cccccccccccccccc",
					  "capacity": "500000", "node1_policy": {policy}, "node2_policy": {policy}}},
					{{"channel_id": "400", "chan_point": "dd:0",
					  "node1_pub": "03dddddddddddddddd", "node2_pub": "02aaaaaaaaaaaaaaaa",
					  "capacity": "200000", "node1_policy": {policy}, "node2_policy": {policy}}}
				]
			}}"#
		)
	}

	pub(crate) fn test_graph() -> NetworkGraph {
		let snapshot: Snapshot = serde_json::from_str(&snapshot_json()).unwrap();
		NetworkGraph::from_snapshot(&snapshot).unwrap()
	}

	#[test]
	fn test_counts_after_load() {
		let graph = test_graph();
		assert_eq!(graph.number_of_nodes(), 4);
		assert_eq!(graph.number_of_channels(), 4);
		assert_eq!(graph.number_of_directed_channels(), 8);
		assert_eq!(graph.number_of_stateful_channels(), 4);
		graph.verify_invariants().unwrap();
	}

	#[test]
	fn test_directed_key_mapping() {
		let graph = test_graph();
		let (key1, key2) = graph.directed_keys("100").unwrap();
		assert_eq!(key1, "100-02aaaaaaaaaaaaaaaa");
		assert_eq!(key2, "100-03bbbbbbbbbbbbbbbb");
		assert_eq!(NetworkGraph::channel_id_of_directed(&key1), "100");

		let edge = graph.directed(&key1).unwrap();
		assert_eq!(edge.src, "02aaaaaaaaaaaaaaaa");
		assert_eq!(edge.dst, "03bbbbbbbbbbbbbbbb");
		assert_eq!(edge.opposite_key(), key2);
	}

	#[test]
	fn test_initial_balances_split_capacity() {
		let graph = test_graph();
		let (key1, key2) = graph.directed_keys("300").unwrap();
		let side1 = graph.directed(&key1).unwrap();
		let side2 = graph.directed(&key2).unwrap();
		assert_eq!(side1.balance_msat, 250_000_000);
		assert_eq!(side1.balance_msat + side2.balance_msat, 500_000_000);
	}

	#[test]
	fn test_alias_defaults_and_lookup() {
		let graph = test_graph();
		assert_eq!(graph.alias_of("02aaaaaaaaaaaaaaaa"), Some("alice"));
		assert_eq!(graph.alias_of("03dddddddddddddddd"), Some("03dd..dddd"));
		assert_eq!(graph.pubkey_by_alias("bob"), Some("03bbbbbbbbbbbbbbbb"));
		assert_eq!(graph.pubkey_by_alias("nobody"), None);
	}

	#[test]
	fn test_capacity_aggregates() {
		let graph = test_graph();
		assert_eq!(graph.total_capacity(), 2_700_000);
		assert_eq!(graph.node_capacity("02aaaaaaaaaaaaaaaa"), 1_700_000);
		assert_eq!(graph.node_channel_count("02aaaaaaaaaaaaaaaa"), 3);
		assert_eq!(graph.channels_by_node()["03dddddddddddddddd"], 1);
		assert_eq!(graph.node_balance("03dddddddddddddddd"), 100_000_000);
	}

	#[test]
	fn test_missing_policy_key_yields_topology_only_channel() {
		let json = r#"{
			"nodes": [{"pub_key": "02aa"}, {"pub_key": "03bb"}],
			"edges": [{"channel_id": "1", "node1_pub": "02aa", "node2_pub": "03bb",
			           "capacity": 1000}]
		}"#;
		let snapshot: Snapshot = serde_json::from_str(json).unwrap();
		let graph = NetworkGraph::from_snapshot(&snapshot).unwrap();
		assert_eq!(graph.number_of_channels(), 1);
		assert_eq!(graph.number_of_directed_channels(), 0);
		assert_eq!(graph.number_of_stateful_channels(), 0);
		graph.verify_invariants().unwrap();
	}

	#[test]
	fn test_disabled_capacity_counts_missing_policy() {
		let json = r#"{
			"nodes": [{"pub_key": "02aa"}, {"pub_key": "03bb"}],
			"edges": [{"channel_id": "1", "node1_pub": "02aa", "node2_pub": "03bb",
			           "capacity": 1000,
			           "node1_policy": null,
			           "node2_policy": {"time_lock_delta": 40, "min_htlc": "1",
			                            "fee_base_msat": "0", "fee_rate_milli_msat": "0",
			                            "max_htlc_msat": "0", "last_update": 0}}]
		}"#;
		let snapshot: Snapshot = serde_json::from_str(json).unwrap();
		let graph = NetworkGraph::from_snapshot(&snapshot).unwrap();

		// Side 02aa→03bb has a destination policy with no `disabled` flag,
		// normalized to disabled; side 03bb→02aa has no destination policy at
		// all. Both count.
		assert_eq!(graph.disabled_capacity(), 1_000_000);
		let by_node = graph.disabled_capacity_by_node();
		assert_eq!(by_node["02aa"], 500_000);
		assert_eq!(by_node["03bb"], 500_000);
	}

	#[test]
	fn test_unknown_endpoint_is_rejected() {
		let json = r#"{
			"nodes": [{"pub_key": "02aa"}],
			"edges": [{"channel_id": "1", "node1_pub": "02aa", "node2_pub": "03bb",
			           "capacity": 1000}]
		}"#;
		let snapshot: Snapshot = serde_json::from_str(json).unwrap();
		assert!(matches!(
			NetworkGraph::from_snapshot(&snapshot),
			Err(GraphError::MissingEndpoint { .. })
		));
	}
}
