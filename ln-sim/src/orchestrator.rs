// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Drives a simulation run: seeding, route queries, the block/settle cycle
//! for every test-plan entry, correctness checks and result persistence.

use anyhow::Context;
use chrono::Local;
use log::warn;
use rand::rngs::ThreadRng;

use ln_sim_engine::htlc::{block_payment, settle_payment, SettleOutcome, SettleTiming};
use ln_sim_engine::payment::{Implementation, Payment};
use ln_sim_engine::routing::query_route;
use ln_sim_engine::seed::{assign_balances, assign_pending_htlcs};
use ln_sim_engine::NetworkGraph;

use crate::io;
use crate::io::TestPlan;
use crate::util::config::Config;

pub struct Orchestrator {
	config: Config,
	graph: NetworkGraph,
}

impl Orchestrator {
	pub fn new(config: Config, graph: NetworkGraph) -> Self {
		Self { config, graph }
	}

	/// Runs the whole simulation: seed, check, query and block every planned
	/// payment, settle them all, check again, persist the results.
	pub fn run(&mut self) -> anyhow::Result<()> {
		let mut rng = rand::thread_rng();

		assign_balances(&mut self.graph, self.config.balance_seed.as_ref(), &mut rng)
			.context("balance seeding failed")?;
		assign_pending_htlcs(&mut self.graph, self.config.htlc_seed.as_ref())
			.context("HTLC seeding failed")?;
		self.check_correctness()?;

		let plan = self.load_or_generate_plan(&mut rng)?;
		let payments = self.query_payments(&plan, &mut rng);

		println!();
		self.settle_all(&payments, &mut rng)?;
		self.check_correctness()?;

		let results = self.build_results(&payments);
		let path =
			io::persist_results(&self.config.data_dir, &self.config.results_file, &results)?;
		println!("RESULTS WRITTEN TO {}", path.display());

		Ok(())
	}

	fn load_or_generate_plan(&self, rng: &mut ThreadRng) -> anyhow::Result<TestPlan> {
		let path = self.config.data_dir.join(&self.config.test_file);
		if self.config.generate_test_plan || !path.exists() {
			let plan = io::generate_test_plan(&self.graph, &self.config, rng);
			io::write_test_plan(&path, &plan)?;
			println!("TEST PLAN GENERATED AT {}", path.display());
			Ok(plan)
		} else {
			io::load_test_plan(&path)
		}
	}

	/// Queries the routing engine for every planned payment, both directions
	/// of each route, and blocks the funds along every found route.
	fn query_payments(&mut self, plan: &TestPlan, rng: &mut ThreadRng) -> Vec<Payment> {
		let mut payments = Vec::new();

		for (tag, suite) in plan {
			if !suite.flag {
				continue;
			}
			let implementation = match Implementation::from_tag(tag) {
				Some(implementation) => implementation,
				None => {
					warn!("unknown implementation tag {tag}, skipping its routes");
					continue;
				},
			};

			println!("********** {} **********", tag.to_uppercase());
			for route in &suite.routes {
				for _ in 0..self.config.loop_count {
					let directions = [
						(route.origin.as_str(), route.destiny.as_str()),
						(route.destiny.as_str(), route.origin.as_str()),
					];
					for (origin, destiny) in directions {
						let mut payment = query_route(
							&self.graph,
							origin,
							destiny,
							route.amount,
							self.config.num_k,
						);
						self.announce_payment(&payment);
						block_payment(
							&mut self.graph,
							&mut payment,
							self.config.use_node_policy,
							implementation,
							rng,
						);
						payments.push(payment);
					}
				}
			}
		}

		payments
	}

	fn announce_payment(&self, payment: &Payment) {
		let origin = self.alias_or_key(&payment.pubkey_origin);
		let destiny = self.alias_or_key(&payment.pubkey_destiny);
		match (&payment.error, &payment.routes) {
			(Some(error), _) => {
				println!("     UNABLE TO FIND A PATH FROM {origin} TO {destiny}: {error}");
			},
			(None, Some(routes)) => {
				let hops = routes.first().map(|r| r.hops.len()).unwrap_or(0);
				println!(
					"     ROUTE FROM {origin} TO {destiny}: {} sat over {hops} hop(s), {} found",
					payment.payment_amount,
					routes.len()
				);
			},
			(None, None) => {},
		}
	}

	fn settle_all(&mut self, payments: &[Payment], rng: &mut ThreadRng) -> anyhow::Result<()> {
		let timing = SettleTiming {
			sleep_ms: self.config.sleep_ms,
			min_diff_ns: self.config.min_diff_ns,
			max_diff_ns: self.config.max_diff_ns,
			step_diff_ns: self.config.step_diff_ns,
		};

		for payment in payments {
			let origin = self.alias_or_key(&payment.pubkey_origin);
			let destiny = self.alias_or_key(&payment.pubkey_destiny);
			match settle_payment(&mut self.graph, payment, &timing, rng) {
				SettleOutcome::Settled => {
					println!("PAYMENT OF {} SAT FROM {origin} TO {destiny} SETTLED",
						payment.payment_amount);
				},
				SettleOutcome::TimedOut => {
					println!("PAYMENT OF {} SAT FROM {origin} TO {destiny} TIMED OUT, REVERSED",
						payment.payment_amount);
				},
				SettleOutcome::Skipped => {
					if let Some(error) = &payment.error {
						println!("ERROR ON PAYMENT: {error}");
					}
				},
			}
			self.graph.verify_invariants().context("graph invariant violated after settling")?;
		}

		Ok(())
	}

	fn alias_or_key(&self, pub_key: &str) -> String {
		self.graph.alias_of(pub_key).unwrap_or(pub_key).to_string()
	}

	/// Asserts the structural and capacity invariants of the graph. Any
	/// violation aborts the run.
	pub fn check_correctness(&self) -> anyhow::Result<()> {
		println!(
			"INFO: checking correctness of the graph ({} nodes, {} channels, {} directed)",
			self.graph.number_of_nodes(),
			self.graph.number_of_channels(),
			self.graph.number_of_directed_channels()
		);
		self.graph.verify_invariants().context("graph invariant violated")
	}

	fn build_results(
		&self, payments: &[Payment],
	) -> serde_json::Map<String, serde_json::Value> {
		let mut results = serde_json::Map::new();
		let header = format!(
			"{}---{}",
			Local::now().format("%m/%d/%Y, %H:%M:%S"),
			self.config.description
		);
		results.insert("0".to_string(), serde_json::Value::String(header));
		for (index, payment) in payments.iter().enumerate() {
			let value = serde_json::to_value(payment).expect("payments serialize");
			results.insert((index + 1).to_string(), value);
		}
		results
	}
}

#[cfg(test)]
mod tests {
	use std::fs;

	use super::*;
	use crate::io::tests::{test_config, SNAPSHOT};
	use crate::io::load_snapshot;

	#[test]
	fn test_full_run_produces_results_and_keeps_invariants() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = test_config(dir.path());
		config.balance_seed = Some(ln_sim_engine::seed::BalanceDistribution::Const);
		config.htlc_seed =
			Some(ln_sim_engine::seed::HtlcDistribution::Const { number: 1, amount_fract: 0.1 });

		fs::write(dir.path().join("graph.json"), SNAPSHOT).unwrap();
		let snapshot = load_snapshot(&dir.path().join("graph.json")).unwrap();
		let graph = NetworkGraph::from_snapshot(&snapshot).unwrap();

		let mut orchestrator = Orchestrator::new(config, graph);
		orchestrator.run().unwrap();
		orchestrator.check_correctness().unwrap();

		// One results file, with the description header and one entry per
		// blocked payment (4 routes, both directions).
		let results_file = fs::read_dir(dir.path())
			.unwrap()
			.filter_map(Result::ok)
			.find(|entry| entry.file_name().to_string_lossy().starts_with("results_"))
			.expect("results file written");
		let results: serde_json::Value =
			serde_json::from_str(&fs::read_to_string(results_file.path()).unwrap()).unwrap();
		assert!(results["0"].as_str().unwrap().contains("---"));
		assert!(results.get("8").is_some());
		assert!(results.get("9").is_none());

		// A test plan was generated alongside.
		assert!(dir.path().join("test.json").exists());
	}

	#[test]
	fn test_payments_with_unknown_endpoints_are_recorded_as_errors() {
		let dir = tempfile::tempdir().unwrap();
		let config = test_config(dir.path());

		fs::write(dir.path().join("graph.json"), SNAPSHOT).unwrap();
		let snapshot = load_snapshot(&dir.path().join("graph.json")).unwrap();
		let graph = NetworkGraph::from_snapshot(&snapshot).unwrap();

		let plan_json = r#"{
			"lnd": {
				"flag": true,
				"node": {},
				"routes": [
					{"origin": "02aaaaaaaaaaaaaaaa", "destiny": "02ffffffffffffffff",
					 "amount": 100}
				]
			}
		}"#;
		fs::write(dir.path().join("test.json"), plan_json).unwrap();

		let mut orchestrator = Orchestrator::new(config, graph);
		orchestrator.run().unwrap();

		let results_file = fs::read_dir(dir.path())
			.unwrap()
			.filter_map(Result::ok)
			.find(|entry| entry.file_name().to_string_lossy().starts_with("results_"))
			.expect("results file written");
		let results: serde_json::Value =
			serde_json::from_str(&fs::read_to_string(results_file.path()).unwrap()).unwrap();
		assert!(results["1"]["error"].as_str().unwrap().contains("Nodes not found"));
		assert!(results["1"]["routes"].is_null());
	}
}
