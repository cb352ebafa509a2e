// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

mod io;
mod orchestrator;
mod util;

use clap::Parser;
use ln_sim_engine::NetworkGraph;

use crate::orchestrator::Orchestrator;
use crate::util::config::{load_config, ArgsConfig};

fn main() {
	let args = ArgsConfig::parse();
	let config = match load_config(&args) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("Invalid configuration: {}", e);
			std::process::exit(-1);
		},
	};

	env_logger::Builder::new().filter_level(config.log_level).init();

	println!("Starting up...");
	let snapshot_path = config.data_dir.join(&config.snapshot_file);
	let snapshot = match io::load_snapshot(&snapshot_path) {
		Ok(snapshot) => snapshot,
		Err(e) => {
			eprintln!("NODE CONNECTION ERROR: {:#}", e);
			std::process::exit(-1);
		},
	};

	let graph = match NetworkGraph::from_snapshot(&snapshot) {
		Ok(graph) => graph,
		Err(e) => {
			eprintln!("NODE CONNECTION ERROR: {}", e);
			std::process::exit(-1);
		},
	};
	println!(
		"GRAPH LOADED: {} nodes, {} channels ({} sat total capacity)",
		graph.number_of_nodes(),
		graph.number_of_channels(),
		graph.total_capacity()
	);

	let mut orchestrator = Orchestrator::new(config, graph);
	if let Err(e) = orchestrator.run() {
		eprintln!("ERROR ON PAYMENT RUN: {:#}", e);
		std::process::exit(-1);
	}
	println!("Shutdown complete..");
}
