// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::{env, fs};

use clap::Parser;
use ln_sim_engine::seed::{BalanceDistribution, HtlcDistribution};
use log::LevelFilter;
use serde::Deserialize;

const DEFAULT_TEST_FILE: &str = "test.json";
const DEFAULT_RESULTS_FILE: &str = "results.json";
const DEFAULT_DESCRIPTION: &str = "simulation run";
const DEFAULT_NUM_K: usize = 3;
const DEFAULT_NUM_ROUTES: usize = 5;
const DEFAULT_MAX_AMOUNT: u64 = 10_000;
const DEFAULT_LOOP: u32 = 1;
const DEFAULT_MIN_DIFF_NS: u64 = 0;
const DEFAULT_MAX_DIFF_NS: u64 = 3_000_000_000;
const DEFAULT_STEP_DIFF_NS: u64 = 1_000_000;

/// Configuration for a simulation run.
#[derive(Debug)]
pub struct Config {
	pub data_dir: PathBuf,
	pub snapshot_file: String,
	pub test_file: String,
	pub results_file: String,
	pub description: String,
	pub num_k: usize,
	pub num_routes: usize,
	pub max_amount: u64,
	pub loop_count: u32,
	pub sleep_ms: u64,
	pub min_diff_ns: u64,
	pub max_diff_ns: u64,
	pub step_diff_ns: u64,
	pub use_node_policy: bool,
	pub generate_test_plan: bool,
	pub balance_seed: Option<BalanceDistribution>,
	pub htlc_seed: Option<HtlcDistribution>,
	pub polar_path: Option<String>,
	pub connector: ConnectorConfig,
	pub log_level: LevelFilter,
}

/// Connection parameters of the node implementations a test plan may
/// reference. The simulator itself never dials out; the parameters are
/// carried into generated test plans.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ConnectorConfig {
	pub lnd: Option<LndConnector>,
	pub eclair: Option<EclairConnector>,
	#[serde(rename = "c-lightning")]
	pub c_lightning: Option<ClightningConnector>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, serde::Serialize)]
pub struct LndConnector {
	pub host: String,
	pub port: u16,
	pub macaroon_dir: String,
	pub cert_dir: String,
	pub alias: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, serde::Serialize)]
pub struct EclairConnector {
	pub host: String,
	pub port: u16,
	pub user: String,
	pub passwd: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, serde::Serialize)]
pub struct ClightningConnector {
	pub alias: String,
	pub macaroon_dir: String,
}

/// A builder for `Config`.
#[derive(Default)]
struct ConfigBuilder {
	data_dir: Option<String>,
	snapshot_file: Option<String>,
	test_file: Option<String>,
	results_file: Option<String>,
	description: Option<String>,
	num_k: Option<usize>,
	num_routes: Option<usize>,
	max_amount: Option<u64>,
	loop_count: Option<u32>,
	sleep_ms: Option<u64>,
	min_diff_ns: Option<u64>,
	max_diff_ns: Option<u64>,
	step_diff_ns: Option<u64>,
	use_node_policy: Option<bool>,
	generate_test_plan: bool,
	balance_seed: Option<BalanceDistribution>,
	htlc_seed: Option<HtlcDistribution>,
	polar_path: Option<String>,
	connector: Option<ConnectorConfig>,
	log_level: Option<String>,
}

impl ConfigBuilder {
	fn merge_toml(&mut self, toml: TomlConfig) {
		if let Some(simulator) = toml.simulator {
			self.data_dir = simulator.data_dir.or(self.data_dir.clone());
			self.snapshot_file = simulator.snapshot_file.or(self.snapshot_file.clone());
			self.test_file = simulator.test_file.or(self.test_file.clone());
			self.results_file = simulator.results_file.or(self.results_file.clone());
			self.description = simulator.description.or(self.description.clone());
			self.num_k = simulator.num_k.or(self.num_k);
			self.num_routes = simulator.num_routes.or(self.num_routes);
			self.max_amount = simulator.max_amount.or(self.max_amount);
			self.loop_count = simulator.loop_count.or(self.loop_count);
			self.sleep_ms = simulator.sleep_ms.or(self.sleep_ms);
			self.min_diff_ns = simulator.min_diff_ns.or(self.min_diff_ns);
			self.max_diff_ns = simulator.max_diff_ns.or(self.max_diff_ns);
			self.step_diff_ns = simulator.step_diff_ns.or(self.step_diff_ns);
			self.use_node_policy = simulator.use_node_policy.or(self.use_node_policy);
			self.polar_path = simulator.polar_path.or(self.polar_path.clone());
		}

		if let Some(seed) = toml.seed {
			self.balance_seed = seed.balance.or(self.balance_seed.clone());
			self.htlc_seed = seed.htlc.or(self.htlc_seed.clone());
		}

		if let Some(connector) = toml.connector {
			self.connector = Some(connector);
		}

		if let Some(log) = toml.log {
			self.log_level = log.level.or(self.log_level.clone());
		}
	}

	fn merge_args(&mut self, args: &ArgsConfig) {
		if let Some(data_dir) = &args.data_dir {
			self.data_dir = Some(data_dir.clone());
		}

		if let Some(snapshot_file) = &args.snapshot_file {
			self.snapshot_file = Some(snapshot_file.clone());
		}

		if let Some(test_file) = &args.test_file {
			self.test_file = Some(test_file.clone());
		}

		if let Some(results_file) = &args.results_file {
			self.results_file = Some(results_file.clone());
		}

		if let Some(description) = &args.description {
			self.description = Some(description.clone());
		}

		if let Some(num_k) = args.num_k {
			self.num_k = Some(num_k);
		}

		if args.generate_test_plan {
			self.generate_test_plan = true;
		}
	}

	fn build(self) -> io::Result<Config> {
		let snapshot_file = self.snapshot_file.ok_or_else(|| missing_field_err("snapshot_file"))?;

		let data_dir = self
			.data_dir
			.map(PathBuf::from)
			.or_else(|| env::current_dir().ok().map(|dir| dir.join("data")))
			.ok_or_else(|| missing_field_err("data_dir"))?;

		let max_amount = self.max_amount.unwrap_or(DEFAULT_MAX_AMOUNT);
		if max_amount < 2 {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				"`max_amount` must be at least 2 satoshis.".to_string(),
			));
		}

		let log_level = self
			.log_level
			.as_ref()
			.map(|level_str| {
				LevelFilter::from_str(level_str).map_err(|e| {
					io::Error::new(
						io::ErrorKind::InvalidInput,
						format!("Invalid log level configured: {}", e),
					)
				})
			})
			.transpose()?
			.unwrap_or(LevelFilter::Debug);

		Ok(Config {
			data_dir,
			snapshot_file,
			test_file: self.test_file.unwrap_or_else(|| DEFAULT_TEST_FILE.to_string()),
			results_file: self.results_file.unwrap_or_else(|| DEFAULT_RESULTS_FILE.to_string()),
			description: self.description.unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
			num_k: self.num_k.unwrap_or(DEFAULT_NUM_K).max(1),
			num_routes: self.num_routes.unwrap_or(DEFAULT_NUM_ROUTES),
			max_amount,
			loop_count: self.loop_count.unwrap_or(DEFAULT_LOOP).max(1),
			sleep_ms: self.sleep_ms.unwrap_or(0),
			min_diff_ns: self.min_diff_ns.unwrap_or(DEFAULT_MIN_DIFF_NS),
			max_diff_ns: self.max_diff_ns.unwrap_or(DEFAULT_MAX_DIFF_NS),
			step_diff_ns: self.step_diff_ns.unwrap_or(DEFAULT_STEP_DIFF_NS),
			use_node_policy: self.use_node_policy.unwrap_or(true),
			generate_test_plan: self.generate_test_plan,
			balance_seed: self.balance_seed,
			htlc_seed: self.htlc_seed,
			polar_path: self.polar_path,
			connector: self.connector.unwrap_or_default(),
			log_level,
		})
	}
}

/// Configuration loaded from a TOML file.
#[derive(Deserialize)]
pub struct TomlConfig {
	simulator: Option<SimulatorConfig>,
	seed: Option<SeedConfig>,
	connector: Option<ConnectorConfig>,
	log: Option<LogConfig>,
}

#[derive(Deserialize)]
struct SimulatorConfig {
	data_dir: Option<String>,
	snapshot_file: Option<String>,
	test_file: Option<String>,
	results_file: Option<String>,
	description: Option<String>,
	num_k: Option<usize>,
	num_routes: Option<usize>,
	max_amount: Option<u64>,
	#[serde(rename = "loop")]
	loop_count: Option<u32>,
	sleep_ms: Option<u64>,
	min_diff_ns: Option<u64>,
	max_diff_ns: Option<u64>,
	step_diff_ns: Option<u64>,
	use_node_policy: Option<bool>,
	polar_path: Option<String>,
}

#[derive(Deserialize)]
struct SeedConfig {
	balance: Option<BalanceDistribution>,
	htlc: Option<HtlcDistribution>,
}

#[derive(Deserialize)]
struct LogConfig {
	level: Option<String>,
}

#[derive(Parser, Debug)]
#[command(
	version,
	about = "Lightning Network payment simulator",
	long_about = None,
	override_usage = "ln-sim [config_path]"
)]
pub struct ArgsConfig {
	#[arg(required = false, help = "The configuration file for running the simulator.")]
	pub config_file: Option<String>,

	#[arg(
		long,
		env = "LN_SIM_DATA_DIR",
		help = "The directory holding the snapshot, test plan and results files."
	)]
	pub data_dir: Option<String>,

	#[arg(
		long,
		env = "LN_SIM_SNAPSHOT_FILE",
		help = "The channel-graph snapshot to simulate against."
	)]
	pub snapshot_file: Option<String>,

	#[arg(long, env = "LN_SIM_TEST_FILE", help = "The test plan enumerating payments to run.")]
	pub test_file: Option<String>,

	#[arg(
		long,
		env = "LN_SIM_RESULTS_FILE",
		help = "The file the payment results are persisted to."
	)]
	pub results_file: Option<String>,

	#[arg(
		long,
		env = "LN_SIM_DESCRIPTION",
		help = "A free-form description recorded with the results."
	)]
	pub description: Option<String>,

	#[arg(long, env = "LN_SIM_NUM_K", help = "How many shortest paths each route query returns.")]
	pub num_k: Option<usize>,

	#[arg(
		long,
		default_value_t = false,
		help = "Generate a fresh random test plan instead of loading one."
	)]
	pub generate_test_plan: bool,
}

pub fn load_config(args: &ArgsConfig) -> io::Result<Config> {
	let mut builder = ConfigBuilder::default();

	if let Some(path) = &args.config_file {
		let content = fs::read_to_string(path).map_err(|e| {
			io::Error::new(e.kind(), format!("Failed to read config file '{:?}': {}", path, e))
		})?;
		let toml_config: TomlConfig = toml::from_str(&content).map_err(|e| {
			io::Error::new(
				io::ErrorKind::InvalidData,
				format!("Config file contains invalid TOML format: {}", e),
			)
		})?;

		builder.merge_toml(toml_config);
	}

	builder.merge_args(args);

	builder.build()
}

fn missing_field_err(field: &str) -> io::Error {
	io::Error::new(
		io::ErrorKind::InvalidInput,
		format!(
			"Missing `{}`. Please provide it via config file, CLI argument, or environment variable.",
			field
		),
	)
}
