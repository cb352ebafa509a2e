// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Core of the `ln-sim` Lightning Network payment simulator.
//!
//! The engine keeps two views of one payment-channel network: an undirected
//! topology-and-policy view keyed by channel id, and a directed view that
//! carries per-direction balances and pending HTLC locks. Routes are computed
//! with Yen's K-shortest-paths over a fee-and-liquidity-aware edge weight, and
//! payments are simulated with the two-phase HTLC block-and-settle protocol,
//! preserving the per-channel capacity invariant throughout.

pub mod graph;
pub mod htlc;
pub mod payment;
pub mod routing;
pub mod scid;
pub mod seed;
pub mod snapshot;

pub use graph::NetworkGraph;
pub use payment::Payment;
