// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The two-phase HTLC state machine.
//!
//! `block` walks a route origin-first and reserves amount plus fee on every
//! hop's directed channel. `settle` walks destination-first, verifies the
//! preimage against the payment hash, marks the HTLCs succeeded and credits
//! the opposite side of each channel. `reverse` walks origin-first and
//! returns every reservation to the side it was taken from, marking the
//! HTLCs failed with a timeout reason.
//!
//! Walk order matters: any other order breaks capacity conservation while a
//! payment is in transition. HTLC entries are never removed; terminal state
//! is kept for audit.

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;

use crate::graph::NetworkGraph;
use crate::payment::{
	generate_payment_hash, now_ns, Hop, Htlc, HtlcAttempt, HtlcDirection, HtlcStatus,
	Implementation, Payment, PaymentFailureReason, PaymentStatus, PendingAmount, PendingHtlc,
};

/// How one settle attempt resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettleOutcome {
	/// The preimage propagated back and every hop was credited.
	Settled,
	/// The randomized timeout fired first; the payment was reversed.
	TimedOut,
	/// The payment carried an error or was never blocked; nothing happened.
	Skipped,
}

/// Latency and timeout model applied during settlement.
#[derive(Clone, Copy, Debug)]
pub struct SettleTiming {
	/// Upper bound of the uniform pre-settle sleep, in milliseconds. Zero
	/// disables the sleep.
	pub sleep_ms: u64,
	pub min_diff_ns: u64,
	pub max_diff_ns: u64,
	pub step_diff_ns: u64,
}

impl SettleTiming {
	/// Draws a timeout uniformly from `min_diff_ns..max_diff_ns` in steps of
	/// `step_diff_ns`.
	fn draw_timeout_ns<R: Rng>(&self, rng: &mut R) -> u64 {
		if self.max_diff_ns <= self.min_diff_ns || self.step_diff_ns == 0 {
			return self.min_diff_ns;
		}
		let span = self.max_diff_ns - self.min_diff_ns;
		let steps = (span + self.step_diff_ns - 1) / self.step_diff_ns;
		self.min_diff_ns + self.step_diff_ns * rng.gen_range(0..steps)
	}
}

fn first_route_hops(payment: &Payment) -> Vec<Hop> {
	payment
		.routes
		.as_ref()
		.and_then(|routes| routes.first())
		.map(|route| route.hops.clone())
		.unwrap_or_default()
}

fn directed_key(hop: &Hop) -> String {
	format!("{}-{}", hop.channel_id, hop.pub_key)
}

/// Reserves funds for a payment on every hop of its first route, walking
/// origin to destination.
///
/// Generates the `(preimage, payment_hash)` pair, stamps the payment, and on
/// each hop's directed channel appends an in-flight HTLC at the next free
/// index, debiting balance and per-side capacity by amount plus fee. The
/// HTLC's forwarding parameters come from the channel's destination policy
/// when `use_node_policy` is set, otherwise from the defaults of
/// `implementation`.
pub fn block_payment<R: Rng>(
	graph: &mut NetworkGraph, payment: &mut Payment, use_node_policy: bool,
	implementation: Implementation, rng: &mut R,
) {
	if let Some(error) = &payment.error {
		debug!("not blocking failed payment: {error}");
		return;
	}

	let hops = first_route_hops(payment);
	let (preimage, payment_hash) = generate_payment_hash(rng);
	payment.payment_hash = Some(payment_hash);
	payment.creation_time_ns = now_ns();
	info!(
		"blocking payment {} from {} to {} over {} hop(s)",
		payment_hash, payment.pubkey_origin, payment.pubkey_destiny, hops.len()
	);

	for hop in &hops {
		let key = directed_key(hop);
		let edge = match graph.directed_mut(&key) {
			Some(edge) => edge,
			None => {
				warn!("no directed channel {key}, skipping hop");
				continue;
			},
		};

		let defaults = implementation.default_policy();
		let (time_lock_delta, fee_base_msat, fee_rate_milli_msat) = match edge.policy_dest.as_ref()
		{
			Some(policy) if use_node_policy => {
				(policy.time_lock_delta, policy.fee_base_msat, policy.fee_rate_milli_msat)
			},
			_ => (defaults.time_lock_delta, defaults.fee_base_msat, defaults.fee_rate_milli_msat),
		};

		let index = edge.next_htlc_index();
		let now = now_ns();
		let reserve_msat = (hop.amt_2_fwrd_msat + hop.fee_msat) as i64;

		let htlc = Htlc {
			time_lock_delta,
			fee_base_msat,
			fee_rate_milli_msat,
			payment_hash,
			payment_preimage: preimage,
			payment_status: PaymentStatus::InFlight,
			creation_time_ns: now,
			payment_index: index,
			payment_failure_reason: None,
			attempt: HtlcAttempt {
				status: HtlcStatus::InFlight,
				hop: hop.clone(),
				attempt_time_ns: now,
				resolve_time_ns: None,
				failure_code: None,
			},
		};
		// The summary reserves the forward debit plus the anticipated
		// reverse credit.
		let summary = PendingHtlc {
			incoming: false,
			amount_msat: (hop.amt_2_fwrd_msat + 2 * hop.fee_msat) as i64,
			hash_lock: payment_hash,
			expiration_height: hop.expiry,
		};

		edge.pending
			.push(PendingAmount { amount_msat: reserve_msat, direction: HtlcDirection::Outgoing });
		edge.htlcs.insert(index, htlc);
		edge.val_pending.insert(index, summary);
		edge.balance_msat -= reserve_msat;
		edge.capacity_msat -= reserve_msat;

		debug!("reserved {reserve_msat} msat on {key}, htlc index {index}");
	}
}

/// Attempts to settle a previously blocked payment.
///
/// Sleeps a random simulated propagation delay, then compares the payment's
/// age against a freshly drawn timeout: too old and the payment is reversed
/// instead. Otherwise the hops are walked destination to origin; each HTLC
/// whose hash matches and whose preimage verifies is marked succeeded, and
/// the opposite direction of the channel is credited.
pub fn settle_payment<R: Rng>(
	graph: &mut NetworkGraph, payment: &Payment, timing: &SettleTiming, rng: &mut R,
) -> SettleOutcome {
	if let Some(error) = &payment.error {
		debug!("not settling failed payment: {error}");
		return SettleOutcome::Skipped;
	}
	let payment_hash = match payment.payment_hash {
		Some(hash) => hash,
		None => return SettleOutcome::Skipped,
	};

	if timing.sleep_ms > 0 {
		thread::sleep(Duration::from_millis(rng.gen_range(0..timing.sleep_ms)));
	}

	let diff_ns = now_ns().saturating_sub(payment.creation_time_ns);
	let timeout_ns = timing.draw_timeout_ns(rng);
	if diff_ns >= timeout_ns {
		info!("payment {payment_hash} exceeded its timeout ({diff_ns} >= {timeout_ns} ns)");
		reverse_payment(graph, payment);
		return SettleOutcome::TimedOut;
	}

	info!("settling payment {payment_hash}");
	let hops = first_route_hops(payment);
	for hop in hops.iter().rev() {
		let key = directed_key(hop);
		let edge = match graph.directed_mut(&key) {
			Some(edge) => edge,
			None => continue,
		};

		let now = now_ns();
		let mut settled = 0;
		for htlc in edge.htlcs.values_mut() {
			let verified = htlc.payment_hash == payment_hash
				&& htlc.payment_preimage.payment_hash() == htlc.payment_hash;
			if verified && htlc.attempt.status == HtlcStatus::InFlight {
				htlc.payment_failure_reason = Some(PaymentFailureReason::None);
				htlc.attempt.status = HtlcStatus::Succeeded;
				htlc.attempt.resolve_time_ns = Some(now);
				settled += 1;
			}
		}
		if settled == 0 {
			continue;
		}

		let opposite_key = edge.opposite_key();
		let credit_msat = (hop.amt_2_fwrd_msat + hop.fee_msat) as i64;
		let capacity_credit_msat =
			if hop.fee_msat == 0 { hop.amt_2_fwrd_msat as i64 } else { hop.fee_msat as i64 };
		let opposite = match graph.directed_mut(&opposite_key) {
			Some(opposite) => opposite,
			None => continue,
		};
		for _ in 0..settled {
			opposite.pending.push(PendingAmount {
				amount_msat: -credit_msat,
				direction: HtlcDirection::Incoming,
			});
			opposite.balance_msat += credit_msat;
			opposite.capacity_msat += capacity_credit_msat;
		}
		debug!("unblocked {key}, credited {credit_msat} msat to {opposite_key}");
	}

	SettleOutcome::Settled
}

/// Reverses a blocked payment after a timeout, walking origin to
/// destination.
///
/// Every in-flight HTLC of the payment is marked failed with a timeout
/// reason, its pending slot is zeroed (the slot itself is retained for
/// audit), and balance and per-side capacity are returned to the edge the
/// reservation was taken from. No funds move to the destination.
pub fn reverse_payment(graph: &mut NetworkGraph, payment: &Payment) {
	if let Some(error) = &payment.error {
		debug!("not reversing failed payment: {error}");
		return;
	}
	let payment_hash = match payment.payment_hash {
		Some(hash) => hash,
		None => return,
	};

	info!("reversing payment {payment_hash}");
	let hops = first_route_hops(payment);
	for hop in &hops {
		let key = directed_key(hop);
		let edge = match graph.directed_mut(&key) {
			Some(edge) => edge,
			None => continue,
		};

		let refund_msat = (hop.amt_2_fwrd_msat + hop.fee_msat) as i64;
		let mut slots = Vec::new();
		for htlc in edge.htlcs.values_mut() {
			if htlc.payment_hash == payment_hash && htlc.attempt.status == HtlcStatus::InFlight {
				htlc.payment_failure_reason = Some(PaymentFailureReason::Timeout);
				htlc.payment_status = PaymentStatus::Failed;
				htlc.attempt.status = HtlcStatus::Failed;
				slots.push(htlc.payment_index);
			}
		}
		for slot in slots {
			edge.pending[slot] =
				PendingAmount { amount_msat: 0, direction: HtlcDirection::Outgoing };
			edge.balance_msat += refund_msat;
			edge.capacity_msat += refund_msat;
			debug!("returned {refund_msat} msat to {key}, slot {slot} zeroed");
		}
	}
}
