// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Structs and traits for the tiny slice of chain awareness hosted channels need: the block
//! counter feed and the on-chain preimage lookup used to rescue expired outgoing HTLCs.

use std::collections::HashSet;

use crate::ln::types::{ChannelId, PaymentHash};

/// A lookup for payment preimages that may have been revealed on-chain (typically by asking
/// preimage-serving peers, or scanning recent blocks).
///
/// When an outgoing HTLC expires we cannot tell whether the next hop claimed it (revealing the
/// preimage somewhere we cannot see) or let it die. Before writing such HTLCs off, the channel
/// manager hands their hashes to this collaborator. The lookup is fire-and-forget: on completion
/// the application must call
/// [`HostedChannelManager::preimages_checked`] with whatever it found, which re-enters the state
/// machine as an ordinary, serialized event. A completion delivered to an already-suspended or
/// unknown channel is a no-op.
///
/// [`HostedChannelManager::preimages_checked`]: crate::ln::channelmanager::HostedChannelManager::preimages_checked
pub trait PreimageCheck {
	/// Starts a lookup of the given payment hashes on behalf of the given channel.
	fn process(&self, channel_id: ChannelId, hashes: HashSet<PaymentHash>);
}
