// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! File-based inputs and outputs of a simulation run: the graph snapshot,
//! the test plan, and the persisted payment results.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use ln_sim_engine::snapshot::Snapshot;
use ln_sim_engine::NetworkGraph;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::util::config::Config;

/// One payment request of a test plan.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TestRoute {
	pub origin: String,
	pub destiny: String,
	pub amount: u64,
}

/// The payments to run against one node implementation, with the connection
/// parameters an external connector would need.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TestSuite {
	pub flag: bool,
	#[serde(default)]
	pub node: serde_json::Value,
	pub routes: Vec<TestRoute>,
}

/// A test plan, keyed by implementation tag.
pub type TestPlan = BTreeMap<String, TestSuite>;

pub fn load_snapshot(path: &Path) -> anyhow::Result<Snapshot> {
	let content = fs::read_to_string(path)
		.with_context(|| format!("failed to read snapshot {}", path.display()))?;
	serde_json::from_str(&content)
		.with_context(|| format!("snapshot {} is not valid JSON", path.display()))
}

pub fn load_test_plan(path: &Path) -> anyhow::Result<TestPlan> {
	let content = fs::read_to_string(path)
		.with_context(|| format!("failed to read test plan {}", path.display()))?;
	serde_json::from_str(&content)
		.with_context(|| format!("test plan {} is not valid JSON", path.display()))
}

/// Generates a test plan with `num_routes` random payments per configured
/// implementation: distinct endpoint pairs, amounts uniform in
/// `[1, max_amount)`.
pub fn generate_test_plan<R: Rng>(
	graph: &NetworkGraph, config: &Config, rng: &mut R,
) -> TestPlan {
	let pub_keys: Vec<&str> = graph.nodes().map(|n| n.pub_key.as_str()).collect();
	let mut plan = TestPlan::new();

	let mut random_routes = |rng: &mut R| -> Vec<TestRoute> {
		if pub_keys.len() < 2 {
			return Vec::new();
		}
		(0..config.num_routes)
			.map(|_| {
				let origin = rng.gen_range(0..pub_keys.len());
				let mut destiny = origin;
				while destiny == origin {
					destiny = rng.gen_range(0..pub_keys.len());
				}
				TestRoute {
					origin: pub_keys[origin].to_string(),
					destiny: pub_keys[destiny].to_string(),
					amount: rng.gen_range(1..config.max_amount),
				}
			})
			.collect()
	};

	if let Some(lnd) = &config.connector.lnd {
		let mut node = serde_json::to_value(lnd).expect("connector serializes");
		if let Some(polar_path) = &config.polar_path {
			// Node volumes live under the polar tree, one directory per
			// implementation and alias.
			let volume = format!("{}/lnd/{}", polar_path, lnd.alias);
			node["macaroon_dir"] =
				serde_json::Value::String(format!("{}{}", volume, lnd.macaroon_dir));
			node["cert_dir"] = serde_json::Value::String(format!("{}{}", volume, lnd.cert_dir));
		}
		plan.insert(
			"lnd".to_string(),
			TestSuite { flag: !lnd.alias.is_empty(), node, routes: random_routes(rng) },
		);
	}
	if let Some(eclair) = &config.connector.eclair {
		plan.insert(
			"eclair".to_string(),
			TestSuite {
				flag: true,
				node: serde_json::to_value(eclair).expect("connector serializes"),
				routes: random_routes(rng),
			},
		);
	}
	if let Some(clightning) = &config.connector.c_lightning {
		plan.insert(
			"c-lightning".to_string(),
			TestSuite {
				flag: !clightning.alias.is_empty(),
				node: serde_json::to_value(clightning).expect("connector serializes"),
				routes: random_routes(rng),
			},
		);
	}

	plan
}

pub fn write_test_plan(path: &Path, plan: &TestPlan) -> anyhow::Result<()> {
	let content = serde_json::to_string_pretty(plan)?;
	fs::write(path, content)
		.with_context(|| format!("failed to write test plan {}", path.display()))
}

/// Persists the results map, stamping the file name with the current time so
/// consecutive runs never overwrite each other. Returns the path written.
pub fn persist_results(
	dir: &Path, file_name: &str, results: &serde_json::Map<String, serde_json::Value>,
) -> anyhow::Result<PathBuf> {
	let time_str = Local::now().format("%Y%m%dT%H%M%S");
	let stamped = match file_name.rsplit_once('.') {
		Some((stem, extension)) => format!("{stem}_{time_str}.{extension}"),
		None => format!("{file_name}_{time_str}"),
	};

	let path = dir.join(stamped);
	let content = serde_json::to_string_pretty(results)?;
	fs::write(&path, content)
		.with_context(|| format!("failed to write results {}", path.display()))?;
	Ok(path)
}
