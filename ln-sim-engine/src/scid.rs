// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Conversions between LND's numeric channel ids and c-lightning's
//! `block x tx x output` short-channel-id notation.
//!
//! The transaction index occupies bits 16..40: `cl_to_lnd` shifts it in with
//! `<< 16`, so `lnd_to_cl` extracts it with `>> 16`, keeping the pair an
//! exact round trip.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScidError {
	#[error("malformed short channel id {0:?}, expected BLOCKxTXxOUTPUT")]
	Malformed(String),
}

/// Splits an LND channel id into `(block, tx_index, output)`.
pub fn lnd_to_cl_scid(channel_id: u64) -> (u64, u64, u64) {
	let block = channel_id >> 40;
	let tx = (channel_id >> 16) & 0xFF_FFFF;
	let output = channel_id & 0xFFFF;
	(block, tx, output)
}

/// Packs a c-lightning `"BxTxO"` short channel id into an LND channel id.
pub fn cl_to_lnd_scid(short_channel_id: &str) -> Result<u64, ScidError> {
	let fields: Vec<u64> = short_channel_id
		.split('x')
		.map(|field| field.parse::<u64>())
		.collect::<Result<_, _>>()
		.map_err(|_| ScidError::Malformed(short_channel_id.to_string()))?;

	match fields.as_slice() {
		[block, tx, output] => Ok((block << 40) | (tx << 16) | output),
		_ => Err(ScidError::Malformed(short_channel_id.to_string())),
	}
}
