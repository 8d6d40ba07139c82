// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Provides keys to the hosted channel state machine for signing cross-signed states.
//!
//! The node secret is the most sensitive value in a hosted wallet (it IS the money), so the state
//! machine only ever sees this narrow signing capability, never the key itself.

use bitcoin::hashes::{Hash, HashEngine};
use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{Message, PublicKey, Scalar, Secp256k1, SecretKey};
use bitcoin::secp256k1;

/// A narrow capability for signing hosted-channel state digests with a per-host identity key.
///
/// We present a different public key to each host (derived from the node secret and the host's
/// node id) so hosts cannot correlate one wallet across providers. Everything a channel signs is
/// a single SHA-256 digest (see [`hosted_state_digest`]), so that is all this trait exposes.
///
/// [`hosted_state_digest`]: crate::ln::chan_utils::hosted_state_digest
pub trait NodeSigner {
	/// The public key we present to the given host. The host verifies our state signatures
	/// against this key, and the channel id is derived from it.
	fn node_specific_pubkey(&self, host_node_id: &PublicKey) -> PublicKey;

	/// Signs the given 32-byte state digest with the key behind
	/// [`node_specific_pubkey`](Self::node_specific_pubkey) for this host.
	fn sign_state_digest(&self, host_node_id: &PublicKey, digest: &[u8; 32]) -> Signature;
}

impl<'a, T: NodeSigner> NodeSigner for &'a T {
	fn node_specific_pubkey(&self, host_node_id: &PublicKey) -> PublicKey {
		(*self).node_specific_pubkey(host_node_id)
	}
	fn sign_state_digest(&self, host_node_id: &PublicKey, digest: &[u8; 32]) -> Signature {
		(*self).sign_state_digest(host_node_id, digest)
	}
}

/// Simple [`NodeSigner`] implementation holding the node secret in memory.
pub struct KeysManager {
	node_secret: SecretKey,
	node_pubkey: PublicKey,
	secp_ctx: Secp256k1<secp256k1::All>,
}

impl KeysManager {
	/// Constructs a manager from the wallet's node secret.
	pub fn new(node_secret: SecretKey) -> Self {
		let secp_ctx = Secp256k1::new();
		let node_pubkey = PublicKey::from_secret_key(&secp_ctx, &node_secret);
		KeysManager { node_secret, node_pubkey, secp_ctx }
	}

	/// The node-wide public key, from which per-host keys are derived.
	pub fn node_pubkey(&self) -> PublicKey {
		self.node_pubkey
	}

	fn node_specific_secret(&self, host_node_id: &PublicKey) -> SecretKey {
		let mut engine = Sha256::engine();
		engine.input(&self.node_pubkey.serialize());
		engine.input(&host_node_id.serialize());
		let tweak = Sha256::from_engine(engine).into_inner();
		self.node_secret.clone().add_tweak(&Scalar::from_be_bytes(tweak).expect("SHA-256 output is a valid scalar"))
			.expect("Addition only fails if the tweak is the negation of the key, which an unrelated hash cannot be")
	}
}

impl NodeSigner for KeysManager {
	fn node_specific_pubkey(&self, host_node_id: &PublicKey) -> PublicKey {
		PublicKey::from_secret_key(&self.secp_ctx, &self.node_specific_secret(host_node_id))
	}

	fn sign_state_digest(&self, host_node_id: &PublicKey, digest: &[u8; 32]) -> Signature {
		let msg = Message::from_slice(&digest[..]).unwrap();
		self.secp_ctx.sign_ecdsa(&msg, &self.node_specific_secret(host_node_id))
	}
}

#[cfg(test)]
mod tests {
	use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

	use super::{KeysManager, NodeSigner};

	#[test]
	fn per_host_keys_differ_and_verify() {
		let secp_ctx = Secp256k1::new();
		let keys = KeysManager::new(SecretKey::from_slice(&[42; 32]).unwrap());
		let host_a = PublicKey::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[1; 32]).unwrap());
		let host_b = PublicKey::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[2; 32]).unwrap());

		let pubkey_a = keys.node_specific_pubkey(&host_a);
		let pubkey_b = keys.node_specific_pubkey(&host_b);
		assert_ne!(pubkey_a, pubkey_b);
		assert_ne!(pubkey_a, keys.node_pubkey());

		let digest = [7; 32];
		let sig = keys.sign_state_digest(&host_a, &digest);
		let msg = Message::from_slice(&digest).unwrap();
		assert!(secp_ctx.verify_ecdsa(&msg, &sig, &pubkey_a).is_ok());
		assert!(secp_ctx.verify_ecdsa(&msg, &sig, &pubkey_b).is_err());
	}
}
