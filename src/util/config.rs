// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Various user-configurable channel limits and settings which applications may set.

use bitcoin::hash_types::BlockHash;

/// Bounds we require an `init_hosted_channel` offer from a host to stay within before we agree to
/// open a channel with it.
///
/// These are checked once at channel open, against the parameters the host proposes.
#[derive(Copy, Clone, Debug)]
pub struct HostedChannelLimits {
	/// The remote host must allow at least this much value in flight towards it.
	///
	/// Default value: 100_000_000 msat
	pub min_max_htlc_value_in_flight_msat: u64,
	/// The remote host must not require HTLCs larger than this minimum.
	///
	/// Default value: 546_000 msat (the msat value of the standard output dust limit)
	pub max_htlc_minimum_msat: u64,
	/// The remote host must accept at least this many concurrent HTLCs.
	///
	/// Default value: 1
	pub min_max_accepted_htlcs: u16,
}

impl Default for HostedChannelLimits {
	fn default() -> Self {
		HostedChannelLimits {
			min_max_htlc_value_in_flight_msat: 100_000_000,
			max_htlc_minimum_msat: 546_000,
			min_max_accepted_htlcs: 1,
		}
	}
}

/// Top-level config which holds everything the hosted channel state machine needs from its
/// environment. This is passed in at construction time; there are no process-wide settings.
#[derive(Copy, Clone, Debug)]
pub struct HostedConfig {
	/// Genesis hash of the chain this wallet considers canonical, echoed in every
	/// `invoke_hosted_channel`.
	pub chain_hash: BlockHash,
	/// Outgoing HTLCs must expire at least this many blocks past the current tip, or we refuse to
	/// send them.
	///
	/// Default value: 36
	pub cltv_safety_delta: u32,
	/// Channel open bounds, see [`HostedChannelLimits`].
	pub limits: HostedChannelLimits,
}

impl HostedConfig {
	/// Builds a config for the given chain with default limits.
	pub fn new(chain_hash: BlockHash) -> Self {
		HostedConfig {
			chain_hash,
			cltv_safety_delta: 36,
			limits: HostedChannelLimits::default(),
		}
	}
}
