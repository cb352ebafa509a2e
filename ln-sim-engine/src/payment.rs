// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Payment, route and HTLC record types.
//!
//! Amounts are tracked in integer millisatoshis internally; hop records carry
//! both the satoshi and millisatoshi figures so serialized results read like
//! the RPC structures they mirror.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

pub const MSAT_PER_SAT: u64 = 1_000;

/// Nanoseconds since the UNIX epoch, the timestamp unit used on payments and
/// HTLC attempts.
pub fn now_ns() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).expect("Time must be > 1970").as_nanos() as u64
}

/// The hash of a payment preimage, locking every HTLC of one payment.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaymentHash(pub [u8; 32]);

impl fmt::Display for PaymentHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", hex::encode(self.0))
	}
}

impl fmt::Debug for PaymentHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "PaymentHash({})", hex::encode(self.0))
	}
}

impl Serialize for PaymentHash {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&hex::encode(self.0))
	}
}

/// The value whose SHA-256 equals the payment hash; revealing it settles the
/// HTLCs along the route.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PaymentPreimage(pub [u8; 32]);

impl PaymentPreimage {
	pub fn new_random<R: Rng>(rng: &mut R) -> Self {
		let mut preimage = [0u8; 32];
		rng.fill(&mut preimage);
		Self(preimage)
	}

	pub fn payment_hash(&self) -> PaymentHash {
		let mut hasher = Sha256::new();
		hasher.update(self.0);
		PaymentHash(hasher.finalize().into())
	}
}

impl fmt::Debug for PaymentPreimage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "PaymentPreimage({})", hex::encode(self.0))
	}
}

impl Serialize for PaymentPreimage {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&hex::encode(self.0))
	}
}

/// Generates a fresh `(preimage, payment_hash)` pair for a payment.
pub fn generate_payment_hash<R: Rng>(rng: &mut R) -> (PaymentPreimage, PaymentHash) {
	let preimage = PaymentPreimage::new_random(rng);
	let hash = preimage.payment_hash();
	(preimage, hash)
}

/// Status of a single HTLC attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HtlcStatus {
	InFlight,
	Succeeded,
	Failed,
}

/// Status of the payment an HTLC belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
	Unknown,
	InFlight,
	Succeeded,
	Failed,
}

/// Why a payment failed, mirroring the reasons reported by node RPCs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PaymentFailureReason {
	#[serde(rename = "FAILURE_REASON_NONE")]
	None,
	#[serde(rename = "FAILURE_REASON_TIMEOUT")]
	Timeout,
	#[serde(rename = "FAILURE_REASON_NO_ROUTE")]
	NoRoute,
	#[serde(rename = "FAILURE_REASON_ERROR")]
	Error,
	#[serde(rename = "FAILURE_REASON_INCORRECT_PAYMENT_DETAILS")]
	IncorrectPaymentDetails,
	#[serde(rename = "FAILURE_REASON_INSUFFICIENT_BALANCE")]
	InsufficientBalance,
}

/// The node software whose forwarding defaults apply when a hop is blocked
/// without consulting the published channel policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Implementation {
	CLightning,
	Lnd,
	Lnd06,
	Eclair,
}

/// The forwarding parameters a node applies by default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DefaultPolicy {
	pub time_lock_delta: u32,
	pub fee_base_msat: u64,
	pub fee_rate_milli_msat: u64,
}

impl Implementation {
	pub fn from_tag(tag: &str) -> Option<Self> {
		match tag {
			"c-lightning" => Some(Implementation::CLightning),
			"lnd" => Some(Implementation::Lnd),
			"lnd_0.6" => Some(Implementation::Lnd06),
			"eclair" => Some(Implementation::Eclair),
			_ => None,
		}
	}

	pub fn tag(&self) -> &'static str {
		match self {
			Implementation::CLightning => "c-lightning",
			Implementation::Lnd => "lnd",
			Implementation::Lnd06 => "lnd_0.6",
			Implementation::Eclair => "eclair",
		}
	}

	pub fn default_policy(&self) -> DefaultPolicy {
		match self {
			Implementation::CLightning => {
				DefaultPolicy { time_lock_delta: 14, fee_base_msat: 1_000, fee_rate_milli_msat: 10 }
			},
			Implementation::Lnd => {
				DefaultPolicy { time_lock_delta: 144, fee_base_msat: 1_000, fee_rate_milli_msat: 1 }
			},
			Implementation::Lnd06 => {
				DefaultPolicy { time_lock_delta: 40, fee_base_msat: 1_000, fee_rate_milli_msat: 1 }
			},
			Implementation::Eclair => {
				DefaultPolicy { time_lock_delta: 144, fee_base_msat: 1_000, fee_rate_milli_msat: 100 }
			},
		}
	}
}

/// One hop of a route. `pub_key` identifies the node the hop forwards to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Hop {
	pub channel_id: String,
	pub channel_capacity: u64,
	pub pub_key: String,
	pub amt_2_fwrd: u64,
	pub amt_2_fwrd_msat: u64,
	pub fee: u64,
	pub fee_msat: u64,
	pub expiry: u32,
	pub tlv_pay_load: bool,
}

/// A route with its per-hop records and aggregate totals.
#[derive(Clone, Debug, Serialize)]
pub struct Route {
	pub total_time_lock: u32,
	pub total_fees: u64,
	pub total_amt: u64,
	pub total_fees_msat: u64,
	pub total_amt_msat: u64,
	pub success_prob: f64,
	pub hops: Vec<Hop>,
}

impl Route {
	/// Builds a route from an externally supplied hop list (e.g. a node
	/// implementation's own route query), deriving the aggregates from the
	/// hops.
	pub fn from_hops(hops: Vec<Hop>, payment_amount_sat: u64) -> Self {
		let total_fees_msat: u64 = hops.iter().map(|h| h.fee_msat).sum();
		let total_time_lock: u32 = hops.iter().map(|h| h.expiry).sum();
		let total_amt_msat = payment_amount_sat * MSAT_PER_SAT + total_fees_msat;
		let node_count = hops.len() + 1;
		Route {
			total_time_lock,
			total_fees: total_fees_msat / MSAT_PER_SAT,
			total_amt: total_amt_msat / MSAT_PER_SAT,
			total_fees_msat,
			total_amt_msat,
			success_prob: 1.0 / node_count as f64,
			hops,
		}
	}
}

/// A payment between two nodes. `error` is set exactly when `routes` is
/// absent; the state machine short-circuits on such payments.
#[derive(Clone, Debug, Serialize)]
pub struct Payment {
	pub pubkey_origin: String,
	pub pubkey_destiny: String,
	pub payment_amount: u64,
	pub routes: Option<Vec<Route>>,
	pub payment_hash: Option<PaymentHash>,
	pub creation_time_ns: u64,
	pub error: Option<String>,
}

impl Payment {
	/// A routable payment carrying the routes a producer computed for it.
	pub fn with_routes(origin: &str, destiny: &str, amount_sat: u64, routes: Vec<Route>) -> Self {
		Payment {
			pubkey_origin: origin.to_string(),
			pubkey_destiny: destiny.to_string(),
			payment_amount: amount_sat,
			routes: Some(routes),
			payment_hash: None,
			creation_time_ns: now_ns(),
			error: None,
		}
	}

	/// A payment that could not be routed; carries the failure text instead
	/// of routes.
	pub fn failed(origin: &str, destiny: &str, amount_sat: u64, error: String) -> Self {
		Payment {
			pubkey_origin: origin.to_string(),
			pubkey_destiny: destiny.to_string(),
			payment_amount: amount_sat,
			routes: None,
			payment_hash: None,
			creation_time_ns: now_ns(),
			error: Some(error),
		}
	}
}

/// The per-attempt view of an HTLC: which hop produced it and how it
/// resolved.
#[derive(Clone, Debug, Serialize)]
pub struct HtlcAttempt {
	pub status: HtlcStatus,
	pub hop: Hop,
	pub attempt_time_ns: u64,
	pub resolve_time_ns: Option<u64>,
	/// BOLT #4 failure code, when the attempt failed with one.
	pub failure_code: Option<u16>,
}

/// The full HTLC record stored on a directed channel. Entries are never
/// removed; terminal state is encoded in the status fields.
#[derive(Clone, Debug, Serialize)]
pub struct Htlc {
	pub time_lock_delta: u32,
	pub fee_base_msat: u64,
	pub fee_rate_milli_msat: u64,
	pub payment_hash: PaymentHash,
	pub payment_preimage: PaymentPreimage,
	pub payment_status: PaymentStatus,
	pub creation_time_ns: u64,
	pub payment_index: usize,
	pub payment_failure_reason: Option<PaymentFailureReason>,
	pub attempt: HtlcAttempt,
}

/// A pending lock on a directed channel, keyed by the same index as the
/// corresponding [`Htlc`].
#[derive(Clone, Debug, Serialize)]
pub struct PendingHtlc {
	pub incoming: bool,
	pub amount_msat: i64,
	pub hash_lock: PaymentHash,
	pub expiration_height: u32,
}

/// Whether a pending amount is an outgoing reservation or an incoming credit
/// still awaiting its commitment update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum HtlcDirection {
	Outgoing,
	Incoming,
}

/// A slot in the ordered pending-amount ledger of a directed channel. Slot
/// position is the HTLC index; slots are appended, never removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PendingAmount {
	pub amount_msat: i64,
	pub direction: HtlcDirection,
}

#[cfg(test)]
mod tests {
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	use super::*;

	#[test]
	fn test_preimage_hash_round_trip() {
		let mut rng = StdRng::seed_from_u64(7);
		let (preimage, hash) = generate_payment_hash(&mut rng);
		assert_eq!(preimage.payment_hash(), hash);

		let (other, _) = generate_payment_hash(&mut rng);
		assert_ne!(other.payment_hash(), hash);
	}

	#[test]
	fn test_payment_hash_serializes_as_hex() {
		let hash = PaymentHash([0xab; 32]);
		let json = serde_json::to_string(&hash).unwrap();
		assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
	}

	#[test]
	fn test_implementation_defaults() {
		let lnd = Implementation::Lnd.default_policy();
		assert_eq!(lnd.time_lock_delta, 144);
		assert_eq!(lnd.fee_base_msat, 1_000);
		assert_eq!(lnd.fee_rate_milli_msat, 1);

		assert_eq!(Implementation::CLightning.default_policy().time_lock_delta, 14);
		assert_eq!(Implementation::Lnd06.default_policy().time_lock_delta, 40);
		assert_eq!(Implementation::Eclair.default_policy().fee_rate_milli_msat, 100);
	}

	#[test]
	fn test_implementation_tags_round_trip() {
		for tag in ["c-lightning", "lnd", "lnd_0.6", "eclair"] {
			assert_eq!(Implementation::from_tag(tag).unwrap().tag(), tag);
		}
		assert!(Implementation::from_tag("inconclusive").is_none());
	}

	#[test]
	fn test_route_from_external_hops_recomputes_totals() {
		let hops = vec![
			Hop {
				channel_id: "100".to_string(),
				channel_capacity: 1_000_000,
				pub_key: "03bb".to_string(),
				amt_2_fwrd: 1_001,
				amt_2_fwrd_msat: 1_001_000,
				fee: 0,
				fee_msat: 0,
				expiry: 40,
				tlv_pay_load: true,
			},
			Hop {
				channel_id: "200".to_string(),
				channel_capacity: 1_000_000,
				pub_key: "02cc".to_string(),
				amt_2_fwrd: 1_000,
				amt_2_fwrd_msat: 1_000_000,
				fee: 1,
				fee_msat: 1_000,
				expiry: 144,
				tlv_pay_load: true,
			},
		];
		let route = Route::from_hops(hops, 1_000);
		assert_eq!(route.total_fees_msat, 1_000);
		assert_eq!(route.total_amt_msat, 1_001_000);
		assert_eq!(route.total_time_lock, 184);
		assert_eq!(route.success_prob, 1.0 / 3.0);

		let payment = Payment::with_routes("02aa", "02cc", 1_000, vec![route]);
		assert!(payment.error.is_none());
		assert_eq!(payment.routes.unwrap()[0].hops.len(), 2);
	}

	#[test]
	fn test_failure_reason_serializes_like_rpc_names() {
		let json = serde_json::to_string(&PaymentFailureReason::Timeout).unwrap();
		assert_eq!(json, "\"FAILURE_REASON_TIMEOUT\"");
		let json = serde_json::to_string(&PaymentFailureReason::None).unwrap();
		assert_eq!(json, "\"FAILURE_REASON_NONE\"");
	}
}
