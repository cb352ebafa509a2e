// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Route computation: a fee-and-liquidity-aware edge weight, single-source
//! Dijkstra, and Yen's K-shortest-paths on top of it.
//!
//! Searches run against an adjacency view of the directed graph; spur-edge
//! and root-node pruning during Yen is expressed as ban sets over that view,
//! so the live graph is never mutated by a query.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

use log::debug;
use thiserror::Error;

use crate::graph::{DirectedChannel, NetworkGraph, RoutingPolicy};
use crate::payment::{Hop, Payment, Route, MSAT_PER_SAT};

#[derive(Debug, Error)]
pub enum RoutingError {
	#[error("Nodes not found - {0} is not in the graph")]
	NodeNotFound(String),
	#[error("Unable to find a path between {origin} and {destiny}")]
	NoPath { origin: String, destiny: String },
}

/// The directed edge selected for one hop of a path, with the fee its chosen
/// policy side charges and the weight it contributed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgePick {
	pub key: String,
	pub fee_base_msat: u64,
	pub cost_msat: u64,
}

/// A loop-free path found by the search, cheapest first in the result list.
#[derive(Clone, Debug)]
pub struct FoundPath {
	pub nodes: Vec<String>,
	pub picks: Vec<EdgePick>,
	pub cost_msat: u64,
}

/// Whether one policy side of an edge can forward `amount_msat`: the policy
/// must exist, be enabled, admit the amount, and the side must have the
/// liquidity for amount plus base fee.
fn side_qualifies(
	policy: Option<&RoutingPolicy>, balance_msat: i64, amount_msat: u64,
) -> bool {
	match policy {
		Some(p) => {
			!p.disabled
				&& p.min_htlc_msat < amount_msat
				&& balance_msat > (p.fee_base_msat + amount_msat) as i64
		},
		None => false,
	}
}

/// The weight of a single directed edge, with the base fee of the side that
/// produced it. Of two qualifying sides the lexicographically lower
/// `(fee_base, min_htlc)` wins, source side on ties.
fn edge_cost(edge: &DirectedChannel, amount_msat: u64) -> Option<(u64, u64)> {
	let source_ok = side_qualifies(edge.policy_source.as_ref(), edge.balance_msat, amount_msat);
	let dest_ok = side_qualifies(edge.policy_dest.as_ref(), edge.balance_msat, amount_msat);

	let policy = match (source_ok, dest_ok) {
		(true, true) => {
			let source = edge.policy_source.as_ref().expect("qualified side has policy");
			let dest = edge.policy_dest.as_ref().expect("qualified side has policy");
			if (source.fee_base_msat, source.min_htlc_msat)
				<= (dest.fee_base_msat, dest.min_htlc_msat)
			{
				source
			} else {
				dest
			}
		},
		(true, false) => edge.policy_source.as_ref().expect("qualified side has policy"),
		(false, true) => edge.policy_dest.as_ref().expect("qualified side has policy"),
		(false, false) => return None,
	};

	Some((policy.fee_base_msat + policy.min_htlc_msat, policy.fee_base_msat))
}

/// The cheapest usable parallel edge between a node pair.
fn best_edge(graph: &NetworkGraph, keys: &[&str], amount_msat: u64) -> Option<EdgePick> {
	let mut best: Option<EdgePick> = None;
	for key in keys {
		let edge = match graph.directed(key) {
			Some(edge) => edge,
			None => continue,
		};
		if let Some((cost_msat, fee_base_msat)) = edge_cost(edge, amount_msat) {
			let better = best.as_ref().map(|b| cost_msat < b.cost_msat).unwrap_or(true);
			if better {
				best = Some(EdgePick { key: key.to_string(), fee_base_msat, cost_msat });
			}
		}
	}
	best
}

/// Resolves a node sequence into per-hop edge picks and the summed weight.
/// Returns `None` when any pair has no usable edge.
pub(crate) fn path_picks(
	graph: &NetworkGraph, nodes: &[String], amount_msat: u64,
) -> Option<(Vec<EdgePick>, u64)> {
	let mut picks = Vec::with_capacity(nodes.len().saturating_sub(1));
	let mut total = 0u64;
	for pair in nodes.windows(2) {
		let keys = graph.parallel_keys(&pair[0], &pair[1]);
		let pick = best_edge(graph, &keys, amount_msat)?;
		total += pick.cost_msat;
		picks.push(pick);
	}
	Some((picks, total))
}

/// Adjacency of the directed view used by searches: src → dst → parallel
/// edge keys. Cheap to build and independent of the per-edge state.
struct SearchView {
	adj: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl SearchView {
	fn from_graph(graph: &NetworkGraph) -> Self {
		let mut adj: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
		for edge in graph.directed_channels() {
			adj.entry(edge.src.clone())
				.or_default()
				.entry(edge.dst.clone())
				.or_default()
				.push(edge.key());
		}
		SearchView { adj }
	}
}

/// Dijkstra from `src` to `dst` under the edge weight, skipping banned nodes
/// and banned `(src, dst)` pairs. Returns the node sequence of the cheapest
/// path.
fn shortest_path(
	graph: &NetworkGraph, view: &SearchView, src: &str, dst: &str, amount_msat: u64,
	banned_nodes: &HashSet<String>, banned_out: &HashMap<String, HashSet<String>>,
) -> Option<Vec<String>> {
	let mut dist: HashMap<String, u64> = HashMap::new();
	let mut prev: HashMap<String, String> = HashMap::new();
	let mut queue: BinaryHeap<Reverse<(u64, String)>> = BinaryHeap::new();

	dist.insert(src.to_string(), 0);
	queue.push(Reverse((0, src.to_string())));

	while let Some(Reverse((cost, node))) = queue.pop() {
		if cost > *dist.get(&node).unwrap_or(&u64::MAX) {
			continue;
		}
		if node == dst {
			break;
		}
		let neighbors = match view.adj.get(&node) {
			Some(neighbors) => neighbors,
			None => continue,
		};
		for (next, keys) in neighbors {
			if banned_nodes.contains(next) {
				continue;
			}
			if banned_out.get(&node).map(|d| d.contains(next)).unwrap_or(false) {
				continue;
			}
			let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
			let pick = match best_edge(graph, &keys, amount_msat) {
				Some(pick) => pick,
				None => continue,
			};
			let next_cost = cost + pick.cost_msat;
			if next_cost < *dist.get(next).unwrap_or(&u64::MAX) {
				dist.insert(next.clone(), next_cost);
				prev.insert(next.clone(), node.clone());
				queue.push(Reverse((next_cost, next.clone())));
			}
		}
	}

	if !dist.contains_key(dst) {
		return None;
	}
	let mut nodes = vec![dst.to_string()];
	while let Some(previous) = prev.get(nodes.last().unwrap()) {
		nodes.push(previous.clone());
	}
	nodes.reverse();
	if nodes.first().map(String::as_str) != Some(src) {
		return None;
	}
	Some(nodes)
}

/// Yen's algorithm: up to `num_k` loop-free paths from `origin` to
/// `destiny`, sorted by non-decreasing weight.
pub fn k_shortest_paths(
	graph: &NetworkGraph, origin: &str, destiny: &str, num_k: usize, amount_msat: u64,
) -> Result<Vec<FoundPath>, RoutingError> {
	for node in [origin, destiny] {
		if !graph.has_node(node) {
			return Err(RoutingError::NodeNotFound(node.to_string()));
		}
	}

	let view = SearchView::from_graph(graph);
	let no_nodes = HashSet::new();
	let no_pairs = HashMap::new();

	let no_path = || RoutingError::NoPath {
		origin: origin.to_string(),
		destiny: destiny.to_string(),
	};

	let first = shortest_path(graph, &view, origin, destiny, amount_msat, &no_nodes, &no_pairs)
		.ok_or_else(no_path)?;
	let (picks, cost_msat) = path_picks(graph, &first, amount_msat).ok_or_else(no_path)?;
	let mut accepted = vec![FoundPath { nodes: first, picks, cost_msat }];

	let mut candidates: BinaryHeap<Reverse<(u64, Vec<String>)>> = BinaryHeap::new();

	for _ in 1..num_k {
		let prev_nodes = accepted.last().expect("at least the seed path").nodes.clone();

		for i in 0..prev_nodes.len() - 1 {
			let spur_node = &prev_nodes[i];
			let root = &prev_nodes[..i];

			// Paths sharing this root may not reuse their next edge out of
			// the spur node, and the spur path may not re-enter the root.
			let mut banned_out: HashMap<String, HashSet<String>> = HashMap::new();
			for path in &accepted {
				if path.nodes.len() > i + 1 && path.nodes[..i] == *root {
					banned_out
						.entry(path.nodes[i].clone())
						.or_default()
						.insert(path.nodes[i + 1].clone());
				}
			}
			let banned_nodes: HashSet<String> = root.iter().cloned().collect();

			let spur = shortest_path(
				graph, &view, spur_node, destiny, amount_msat, &banned_nodes, &banned_out,
			);
			if let Some(spur_nodes) = spur {
				let mut total: Vec<String> = root.to_vec();
				total.extend(spur_nodes);
				if let Some((_, total_cost)) = path_picks(graph, &total, amount_msat) {
					candidates.push(Reverse((total_cost, total)));
				}
			}
		}

		let mut extended = false;
		while let Some(Reverse((cost_msat, nodes))) = candidates.pop() {
			if accepted.iter().any(|p| p.nodes == nodes) {
				continue;
			}
			let (picks, _) =
				path_picks(graph, &nodes, amount_msat).expect("candidate paths are resolvable");
			accepted.push(FoundPath { nodes, picks, cost_msat });
			extended = true;
			break;
		}
		if !extended {
			break;
		}
	}

	debug!(
		"found {} path(s) from {} to {} for {} msat",
		accepted.len(),
		origin,
		destiny,
		amount_msat
	);
	Ok(accepted)
}

/// Queries up to `num_k` routes and wraps them in a [`Payment`]. Failures
/// produce a payment with no routes and the error text set; the HTLC state
/// machine short-circuits on those.
pub fn query_route(
	graph: &NetworkGraph, origin: &str, destiny: &str, amount_sat: u64, num_k: usize,
) -> Payment {
	let amount_msat = amount_sat * MSAT_PER_SAT;
	match k_shortest_paths(graph, origin, destiny, num_k, amount_msat) {
		Ok(paths) => {
			let routes: Vec<Route> =
				paths.iter().map(|path| build_route(graph, path, amount_sat)).collect();
			Payment::with_routes(origin, destiny, amount_sat, routes)
		},
		Err(e) => Payment::failed(origin, destiny, amount_sat, e.to_string()),
	}
}

/// Builds the hop records and totals for one found path. The first and last
/// hops forward fee-free; interior hops charge their picked base fee with a
/// 1000 msat floor.
fn build_route(graph: &NetworkGraph, path: &FoundPath, amount_sat: u64) -> Route {
	let hop_count = path.picks.len();
	let mut fees_msat = vec![0u64; hop_count];
	for (i, fee) in fees_msat.iter_mut().enumerate() {
		if i > 0 && i + 1 < hop_count {
			*fee = path.picks[i].fee_base_msat.max(1_000);
		}
	}
	let total_fees_msat: u64 = fees_msat.iter().sum();

	// Each hop forwards the payment plus the fees still owed downstream.
	let mut forwarded_msat = vec![0u64; hop_count];
	let mut downstream_msat = 0u64;
	for i in (0..hop_count).rev() {
		forwarded_msat[i] = amount_sat * MSAT_PER_SAT + downstream_msat;
		downstream_msat += fees_msat[i];
	}

	let mut total_time_lock = 0u32;
	let mut hops = Vec::with_capacity(hop_count);
	for (i, pick) in path.picks.iter().enumerate() {
		let edge = graph.directed(&pick.key).expect("picked edges exist");
		let expiry =
			edge.policy_source.as_ref().map(|p| p.time_lock_delta).unwrap_or_default();
		total_time_lock += expiry;
		hops.push(Hop {
			channel_id: edge.channel_id.clone(),
			channel_capacity: (edge.capacity_msat / MSAT_PER_SAT as i64) as u64,
			pub_key: path.nodes[i + 1].clone(),
			amt_2_fwrd: forwarded_msat[i] / MSAT_PER_SAT,
			amt_2_fwrd_msat: forwarded_msat[i],
			fee: fees_msat[i] / MSAT_PER_SAT,
			fee_msat: fees_msat[i],
			expiry,
			tlv_pay_load: true,
		});
	}

	let total_amt_msat = amount_sat * MSAT_PER_SAT + total_fees_msat;
	Route {
		total_time_lock,
		total_fees: total_fees_msat / MSAT_PER_SAT,
		total_amt: total_amt_msat / MSAT_PER_SAT,
		total_fees_msat,
		total_amt_msat,
		success_prob: 1.0 / path.nodes.len() as f64,
		hops,
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::graph::tests::test_graph;
	use crate::snapshot::Snapshot;

	/// Builds a graph from `(channel_id, node1, node2, capacity_sat)` tuples
	/// with enabled default policies everywhere.
	pub(crate) fn line_graph(edges: &[(&str, &str, &str, u64)]) -> NetworkGraph {
		graph_with_policies(edges, &[])
	}

	/// Like [`line_graph`], but the listed `(channel_id, side)` policies are
	/// disabled; side 1 is the policy published by node1.
	pub(crate) fn graph_with_policies(
		edges: &[(&str, &str, &str, u64)], disabled: &[(&str, u8)],
	) -> NetworkGraph {
		let mut nodes = std::collections::BTreeSet::new();
		for (_, n1, n2, _) in edges {
			nodes.insert(*n1);
			nodes.insert(*n2);
		}
		let nodes_json: Vec<serde_json::Value> = nodes
			.iter()
			.map(|n| serde_json::json!({"pub_key": n, "alias": n}))
			.collect();
		let edges_json: Vec<serde_json::Value> = edges
			.iter()
			.map(|(cid, n1, n2, cap)| {
				let policy = |side: u8| {
					let is_disabled = disabled.contains(&(*cid, side));
					serde_json::json!({
						"time_lock_delta": 40, "min_htlc": "1000",
						"fee_base_msat": "1000", "fee_rate_milli_msat": "1",
						"disabled": is_disabled, "max_htlc_msat": "990000000",
						"last_update": 0
					})
				};
				serde_json::json!({
					"channel_id": cid, "chan_point": format!("{}:0", cid),
					"node1_pub": n1, "node2_pub": n2, "capacity": cap.to_string(),
					"node1_policy": policy(1), "node2_policy": policy(2)
				})
			})
			.collect();
		let snapshot: Snapshot =
			serde_json::from_value(serde_json::json!({"nodes": nodes_json, "edges": edges_json}))
				.unwrap();
		NetworkGraph::from_snapshot(&snapshot).unwrap()
	}

	#[test]
	fn test_direct_channel_single_hop() {
		let graph = line_graph(&[("10", "alice", "bob", 1_000_000)]);
		let payment = query_route(&graph, "alice", "bob", 100, 3);
		assert!(payment.error.is_none());

		let routes = payment.routes.as_ref().unwrap();
		let route = &routes[0];
		assert_eq!(route.hops.len(), 1);
		assert_eq!(route.hops[0].pub_key, "bob");
		assert_eq!(route.hops[0].fee_msat, 0);
		assert_eq!(route.hops[0].amt_2_fwrd, 100);
		assert_eq!(route.total_fees, 0);
		assert_eq!(route.total_amt, 100);
		assert_eq!(route.success_prob, 0.5);
	}

	#[test]
	fn test_two_hop_route_is_fee_free() {
		let graph = line_graph(&[
			("10", "alice", "bob", 1_000_000),
			("20", "bob", "carol", 1_000_000),
		]);
		let payment = query_route(&graph, "alice", "carol", 1_000, 3);
		let route = &payment.routes.as_ref().unwrap()[0];
		assert_eq!(route.hops.len(), 2);
		// First and last hop forward fee-free, so a two-hop route costs
		// nothing in fees.
		assert_eq!(route.total_fees_msat, 0);
		assert_eq!(route.hops[0].amt_2_fwrd, 1_000);
		assert_eq!(route.hops[1].amt_2_fwrd, 1_000);
		assert_eq!(route.total_time_lock, 80);
	}

	#[test]
	fn test_interior_hop_charges_floored_fee() {
		let graph = line_graph(&[
			("10", "a", "b", 1_000_000),
			("20", "b", "c", 1_000_000),
			("30", "c", "d", 1_000_000),
		]);
		let payment = query_route(&graph, "a", "d", 1_000, 1);
		let route = &payment.routes.as_ref().unwrap()[0];
		assert_eq!(route.hops.len(), 3);
		assert_eq!(route.hops[0].fee_msat, 0);
		assert_eq!(route.hops[1].fee_msat, 1_000);
		assert_eq!(route.hops[2].fee_msat, 0);
		assert_eq!(route.total_fees_msat, 1_000);
		assert_eq!(route.total_amt_msat, 1_001_000);
		// The first hop fronts the interior fee.
		assert_eq!(route.hops[0].amt_2_fwrd_msat, 1_001_000);
		assert_eq!(route.hops[1].amt_2_fwrd_msat, 1_000_000);
		assert_eq!(route.hops[2].amt_2_fwrd_msat, 1_000_000);
	}

	#[test]
	fn test_disabled_channel_forces_detour() {
		// b—c is disabled in both directions; the only remaining route from
		// a to c runs through d.
		let edges = [
			("10", "a", "b", 1_000_000),
			("20", "b", "c", 1_000_000),
			("30", "a", "d", 1_000_000),
			("40", "d", "c", 1_000_000),
		];
		let graph = graph_with_policies(&edges, &[("20", 1), ("20", 2)]);
		let payment = query_route(&graph, "a", "c", 1_000, 3);
		let route = &payment.routes.as_ref().unwrap()[0];
		let path: Vec<&str> = route.hops.iter().map(|h| h.pub_key.as_str()).collect();
		assert_eq!(path, ["d", "c"]);
	}

	#[test]
	fn test_no_usable_route_reports_error() {
		let edges = [("10", "a", "b", 1_000_000), ("20", "b", "c", 1_000_000)];
		let graph = graph_with_policies(&edges, &[("20", 1), ("20", 2)]);
		let payment = query_route(&graph, "a", "c", 1_000, 3);
		assert!(payment.routes.is_none());
		let error = payment.error.unwrap();
		assert!(error.contains("Unable to find a path"), "unexpected error: {error}");
	}

	#[test]
	fn test_unknown_endpoint_reports_error() {
		let graph = test_graph();
		let payment = query_route(&graph, "02aaaaaaaaaaaaaaaa", "02ffff", 100, 3);
		assert!(payment.routes.is_none());
		assert!(payment.error.unwrap().contains("Nodes not found"));
	}

	#[test]
	fn test_liquidity_guard_excludes_drained_edge() {
		let mut graph = line_graph(&[
			("10", "a", "b", 1_000_000),
			("20", "a", "b", 1_000_000),
		]);
		// Drain channel 10's a-side below amount + base fee; the weight must
		// fall back to the parallel channel 20.
		graph.directed_mut("10-a").unwrap().balance_msat = 50_000;
		let paths = k_shortest_paths(&graph, "a", "b", 1, 100_000).unwrap();
		assert_eq!(paths[0].picks[0].key, "20-a");
	}

	#[test]
	fn test_k_shortest_paths_distinct_and_sorted() {
		// Complete graph on four nodes, unit-capacity channels everywhere.
		let graph = line_graph(&[
			("12", "n1", "n2", 1_000_000),
			("13", "n1", "n3", 1_000_000),
			("14", "n1", "n4", 1_000_000),
			("23", "n2", "n3", 1_000_000),
			("24", "n2", "n4", 1_000_000),
			("34", "n3", "n4", 1_000_000),
		]);
		let paths = k_shortest_paths(&graph, "n1", "n4", 3, 100_000).unwrap();
		assert_eq!(paths.len(), 3);

		for i in 1..paths.len() {
			assert!(paths[i - 1].cost_msat <= paths[i].cost_msat);
			for j in 0..i {
				assert_ne!(paths[i].nodes, paths[j].nodes);
			}
		}
		// Every path is loop-free.
		for path in &paths {
			let unique: HashSet<&String> = path.nodes.iter().collect();
			assert_eq!(unique.len(), path.nodes.len());
		}
		// Direct channel first, two-hop detours after.
		assert_eq!(paths[0].nodes, ["n1", "n4"]);
		assert_eq!(paths[1].nodes.len(), 3);
		assert_eq!(paths[2].nodes.len(), 3);
	}

	#[test]
	fn test_path_cost_matches_edge_weights() {
		let graph = line_graph(&[
			("10", "a", "b", 1_000_000),
			("20", "b", "c", 1_000_000),
			("30", "c", "d", 1_000_000),
		]);
		let paths = k_shortest_paths(&graph, "a", "d", 1, 100_000).unwrap();
		let path = &paths[0];
		let summed: u64 = path.picks.iter().map(|p| p.cost_msat).sum();
		assert_eq!(path.cost_msat, summed);
		// Weight is fee_base + min_htlc of the picked side on every hop.
		assert_eq!(summed, 3 * 2_000);
	}

	#[test]
	fn test_queue_exhaustion_returns_fewer_paths() {
		let graph = line_graph(&[("10", "a", "b", 1_000_000)]);
		let paths = k_shortest_paths(&graph, "a", "b", 5, 100_000).unwrap();
		assert_eq!(paths.len(), 1);
	}
}
