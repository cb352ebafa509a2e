// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Distribution-driven seeding of balances and pending HTLC locks.
//!
//! Both passes are optional: a `None` config leaves the graph untouched.
//! Balance seeding draws one sample per channel and assigns the remainder to
//! the opposite side, so the channel total always equals the capacity. HTLC
//! seeding locks a configured number of equal slices of each directed
//! balance.

use log::info;
use rand::Rng;
use rand_distr::{Beta, Distribution, Exp, Normal};
use serde::Deserialize;
use thiserror::Error;

use crate::graph::NetworkGraph;
use crate::payment::{HtlcDirection, PendingAmount, MSAT_PER_SAT};

#[derive(Debug, Error)]
pub enum SeedError {
	#[error("invalid {distribution} parameter: {reason}")]
	InvalidParameter { distribution: &'static str, reason: String },
	#[error("not enough balance for {number} HTLCs of fraction {amount_fract}")]
	InsufficientHtlcBudget { number: u32, amount_fract: f64 },
}

/// How initial balances are drawn. The sampled fraction (or amount) goes to
/// the `node1` side of each channel.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum BalanceDistribution {
	/// Each side gets half the capacity.
	Const,
	/// First side uniform over `[0, capacity)`.
	Unif,
	/// Fraction drawn from N(mu, sigma), rejection-sampled into `[0, 1]`.
	Normal { mu: f64, sigma: f64 },
	/// Fraction drawn from an exponential with scale `l`, rejected while
	/// above 1.
	Exp { l: f64 },
	/// Fraction drawn from Beta(alpha, beta).
	Beta { alpha: f64, beta: f64 },
}

/// How pending HTLC locks are seeded.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum HtlcDistribution {
	/// Every directed edge gets `number` locks of `amount_fract` of its
	/// balance each.
	Const { number: u32, amount_fract: f64 },
}

/// Assigns initial balances to every stateful channel. No-op without a
/// config.
pub fn assign_balances<R: Rng>(
	graph: &mut NetworkGraph, config: Option<&BalanceDistribution>, rng: &mut R,
) -> Result<(), SeedError> {
	let config = match config {
		Some(config) => config,
		None => {
			info!("balances not assigned");
			return Ok(());
		},
	};
	info!("balances assigned using a {:?} distribution", config);

	let channels: Vec<(String, u64)> = graph
		.channels()
		.filter(|c| c.has_state)
		.map(|c| (c.channel_id.clone(), c.capacity_sat))
		.collect();

	for (channel_id, capacity_sat) in channels {
		let first_sat = sample_first_side(config, capacity_sat, rng)?;
		let (key1, key2) = graph.directed_keys(&channel_id).expect("stateful channel");

		let side1 = graph.directed_mut(&key1).expect("directed side");
		side1.balance_msat = (first_sat * MSAT_PER_SAT) as i64;
		let side2 = graph.directed_mut(&key2).expect("directed side");
		side2.balance_msat = ((capacity_sat - first_sat) * MSAT_PER_SAT) as i64;
	}

	Ok(())
}

fn sample_first_side<R: Rng>(
	config: &BalanceDistribution, capacity_sat: u64, rng: &mut R,
) -> Result<u64, SeedError> {
	let capacity = capacity_sat as f64;
	let first = match config {
		BalanceDistribution::Const => capacity_sat / 2,
		BalanceDistribution::Unif => rng.gen_range(0..capacity_sat.max(1)),
		BalanceDistribution::Normal { mu, sigma } => {
			let normal = Normal::new(*mu, *sigma).map_err(|e| SeedError::InvalidParameter {
				distribution: "normal",
				reason: e.to_string(),
			})?;
			let mut r = normal.sample(rng);
			while !(0.0..=1.0).contains(&r) {
				r = normal.sample(rng);
			}
			capacity_sat - (capacity * r) as u64
		},
		BalanceDistribution::Exp { l } => {
			// `l` is the scale (mean) of the distribution; `Exp` takes the
			// rate.
			let exp = Exp::new(1.0 / *l).map_err(|e| SeedError::InvalidParameter {
				distribution: "exp",
				reason: e.to_string(),
			})?;
			let mut r = exp.sample(rng);
			while r > 1.0 {
				r = exp.sample(rng);
			}
			capacity_sat - (capacity * r) as u64
		},
		BalanceDistribution::Beta { alpha, beta } => {
			let dist = Beta::new(*alpha, *beta).map_err(|e| SeedError::InvalidParameter {
				distribution: "beta",
				reason: e.to_string(),
			})?;
			capacity_sat - (capacity * dist.sample(rng)) as u64
		},
	};
	Ok(first.min(capacity_sat))
}

/// Locks pending HTLC amounts on every directed edge. No-op without a
/// config.
pub fn assign_pending_htlcs(
	graph: &mut NetworkGraph, config: Option<&HtlcDistribution>,
) -> Result<(), SeedError> {
	let config = match config {
		Some(config) => config,
		None => {
			info!("pending HTLCs not assigned");
			return Ok(());
		},
	};
	info!("pending HTLCs assigned using a {:?} distribution", config);

	let HtlcDistribution::Const { number, amount_fract } = *config;
	if f64::from(number) * amount_fract > 1.0 {
		return Err(SeedError::InsufficientHtlcBudget { number, amount_fract });
	}

	for edge in graph.directed_channels_mut() {
		// Every lock is a slice of the balance as it stood before this pass;
		// expiration heights are left at zero.
		let amount_msat = (edge.balance_msat as f64 * amount_fract) as i64;
		let mut locked_msat = 0;
		for _ in 0..number {
			edge.pending
				.push(PendingAmount { amount_msat, direction: HtlcDirection::Outgoing });
			locked_msat += amount_msat;
		}
		edge.balance_msat -= locked_msat;
	}

	Ok(())
}
