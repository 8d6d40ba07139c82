// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Various wrapper types (most around 32-byte arrays) for use in hosted channels.

use std::fmt;

use bitcoin::hashes::{Hash, HashEngine};
use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::secp256k1::PublicKey;

use crate::ln::msgs::DecodeError;
use crate::util::macro_logger::DebugBytes;
use crate::util::ser::{Readable, Writeable, Writer};

/// The payment hash is the hash of the [`PaymentPreimage`] which is the value used to lock funds
/// in HTLCs while they transit the lightning network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaymentHash(pub [u8; 32]);

impl fmt::Display for PaymentHash {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		DebugBytes(&self.0).fmt(f)
	}
}

/// The payment preimage is the "secret" unlocking funds in an HTLC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaymentPreimage(pub [u8; 32]);

impl PaymentPreimage {
	/// The payment hash this preimage unlocks.
	pub fn payment_hash(&self) -> PaymentHash {
		PaymentHash(Sha256::hash(&self.0).into_inner())
	}
}

/// A unique 32-byte identifier for a channel.
///
/// Hosted channels have no funding outpoint, so the id is derived purely from the identity keys
/// of the two parties.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ChannelId(pub [u8; 32]);

impl ChannelId {
	/// Derives the channel id as `sha256(our node-specific pubkey || host node id)`.
	pub fn hosted_from_keys(node_specific_pubkey: &PublicKey, remote_node_id: &PublicKey) -> Self {
		let mut engine = Sha256::engine();
		engine.input(&node_specific_pubkey.serialize());
		engine.input(&remote_node_id.serialize());
		ChannelId(Sha256::from_engine(engine).into_inner())
	}

	/// The 64-bit truncation of the channel id, used where gossip wants a short channel id.
	pub fn short_channel_id(&self) -> u64 {
		crate::util::byte_utils::slice_to_be64(&self.0[0..8])
	}
}

impl Writeable for ChannelId {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), std::io::Error> {
		self.0.write(w)
	}
}

impl Readable for ChannelId {
	fn read<R: std::io::Read>(r: &mut R) -> Result<Self, DecodeError> {
		let buf: [u8; 32] = Readable::read(r)?;
		Ok(ChannelId(buf))
	}
}

impl fmt::Display for ChannelId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		DebugBytes(&self.0).fmt(f)
	}
}

/// The host's identity, together with the node-specific key we present to this host.
///
/// Our signing key differs per host (derived from the node secret and the host's id) so a host
/// cannot correlate us across hosted channel providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteNodeInfo {
	/// The host's public node id. Its signatures over our view of the channel state verify
	/// against this key.
	pub node_id: PublicKey,
	/// Our per-host public key. The host verifies our signatures over its view of the channel
	/// state against this key.
	pub node_specific_pubkey: PublicKey,
}

impl RemoteNodeInfo {
	/// The channel id shared by both parties for this pairing.
	pub fn channel_id(&self) -> ChannelId {
		ChannelId::hosted_from_keys(&self.node_specific_pubkey, &self.node_id)
	}
}

impl_writeable!(RemoteNodeInfo, 33+33, {
	node_id,
	node_specific_pubkey
});

#[cfg(test)]
mod tests {
	use bitcoin::hashes::{Hash, HashEngine};
	use bitcoin::hashes::sha256::Hash as Sha256;
	use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};

	use super::{ChannelId, PaymentPreimage};

	#[test]
	fn hosted_channel_id_derivation() {
		let secp_ctx = Secp256k1::new();
		let ours = PublicKey::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[11; 32]).unwrap());
		let theirs = PublicKey::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[22; 32]).unwrap());

		let mut engine = Sha256::engine();
		engine.input(&ours.serialize());
		engine.input(&theirs.serialize());
		let expected = Sha256::from_engine(engine).into_inner();

		let id = ChannelId::hosted_from_keys(&ours, &theirs);
		assert_eq!(id.0, expected);
		assert_eq!(id.short_channel_id(), crate::util::byte_utils::slice_to_be64(&expected[0..8]));
	}

	#[test]
	fn preimage_hashes_to_payment_hash() {
		let preimage = PaymentPreimage([42; 32]);
		assert_eq!(preimage.payment_hash().0, Sha256::hash(&[42; 32]).into_inner());
	}
}
