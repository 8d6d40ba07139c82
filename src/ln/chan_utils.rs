// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Utilities for building and verifying cross-signed hosted channel states.
//!
//! Nothing here touches a transaction: a hosted channel's only enforcement artifact is a SHA-256
//! digest over the state fields, countersigned by both parties. Getting this digest byte-exact is
//! what makes two independent implementations countersign the same state, so the layout below
//! follows the hosted channel protocol exactly: little-endian integers, HTLCs embedded with
//! their lightning wire encoding, and the role flag last.

use bitcoin::hashes::{Hash, HashEngine};
use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, Verification};

use std::mem;

use crate::ln::msgs::{LastCrossSignedState, ResizeChannel, StateUpdate, UpdateAddHtlc, UpdateMessage};
use crate::sign::NodeSigner;
use crate::util::byte_utils::{le32_to_array, le64_to_array};
use crate::util::ser::Writeable;

/// A signature whose bytes are all zero, standing in for "not signed yet" while a state is being
/// built. Never verifies.
pub(crate) fn null_signature() -> Signature {
	Signature::from_compact(&[0; 64]).unwrap()
}

/// Computes the digest both parties sign over a cross-signed state, from the perspective encoded
/// in the state itself. The peer signs the [`reverse`]d state's digest.
///
/// [`reverse`]: LastCrossSignedState::reverse
pub fn hosted_state_digest(state: &LastCrossSignedState) -> [u8; 32] {
	let mut engine = Sha256::engine();
	engine.input(&state.refund_script_pubkey.as_bytes());
	engine.input(&le64_to_array(state.init_hosted_channel.channel_capacity_msat));
	engine.input(&le64_to_array(state.init_hosted_channel.initial_client_balance_msat));
	engine.input(&le32_to_array(state.block_day));
	engine.input(&le64_to_array(state.local_balance_msat));
	engine.input(&le64_to_array(state.remote_balance_msat));
	engine.input(&le32_to_array(state.local_updates));
	engine.input(&le32_to_array(state.remote_updates));
	for htlc in state.incoming_htlcs.iter() {
		engine.input(&htlc.encode());
	}
	for htlc in state.outgoing_htlcs.iter() {
		engine.input(&htlc.encode());
	}
	engine.input(&[state.is_host as u8]);
	Sha256::from_engine(engine).into_inner()
}

/// The digest a client signs when proposing a resize to the given capacity.
pub fn resize_proposal_digest(new_capacity_msat: u64) -> [u8; 32] {
	Sha256::hash(&le64_to_array(new_capacity_msat)).into_inner()
}

impl LastCrossSignedState {
	/// This state as the remote party sees it: role flipped, balances, counters, HTLC directions
	/// and signatures swapped. Reversing twice yields the original state.
	pub fn reverse(&self) -> LastCrossSignedState {
		let mut other = self.clone();
		other.is_host = !other.is_host;
		mem::swap(&mut other.local_balance_msat, &mut other.remote_balance_msat);
		mem::swap(&mut other.local_updates, &mut other.remote_updates);
		mem::swap(&mut other.incoming_htlcs, &mut other.outgoing_htlcs);
		mem::swap(&mut other.local_sig_of_remote, &mut other.remote_sig_of_local);
		other
	}

	/// Returns this state with `local_sig_of_remote` freshly signed over the reversed state's
	/// digest, which is what the peer will verify.
	pub fn with_local_sig_of_remote<S: NodeSigner>(mut self, signer: &S, host_node_id: &PublicKey) -> LastCrossSignedState {
		let digest = hosted_state_digest(&self.reverse());
		self.local_sig_of_remote = signer.sign_state_digest(host_node_id, &digest);
		self
	}

	/// Checks `remote_sig_of_local` against this state's own digest and the given key.
	pub fn verify_remote_sig<C: Verification>(&self, secp_ctx: &Secp256k1<C>, their_pubkey: &PublicKey) -> bool {
		let digest = hosted_state_digest(self);
		let msg = Message::from_slice(&digest[..]).unwrap();
		secp_ctx.verify_ecdsa(&msg, &self.remote_sig_of_local, their_pubkey).is_ok()
	}

	/// The compact countersignature message for this state.
	pub fn state_update(&self) -> StateUpdate {
		StateUpdate {
			block_day: self.block_day,
			local_updates: self.local_updates,
			remote_updates: self.remote_updates,
			local_sig_of_remote_lcss: self.local_sig_of_remote,
		}
	}

	/// Whether this state's counters claim knowledge the peer's don't, meaning the peer must
	/// catch up to us on reconnect.
	pub fn is_ahead_of(&self, remote: &LastCrossSignedState) -> bool {
		self.remote_updates > remote.local_updates || self.local_updates > remote.remote_updates
	}

	/// Whether both sides' counters mirror each other exactly.
	pub fn is_even_with(&self, remote: &LastCrossSignedState) -> bool {
		self.remote_updates == remote.local_updates && self.local_updates == remote.remote_updates
	}
}

impl ResizeChannel {
	/// Signs a resize proposal for the given capacity.
	pub fn sign<S: NodeSigner>(new_capacity_msat: u64, signer: &S, host_node_id: &PublicKey) -> ResizeChannel {
		let digest = resize_proposal_digest(new_capacity_msat);
		ResizeChannel {
			new_capacity_msat,
			client_sig: signer.sign_state_digest(host_node_id, &digest),
		}
	}

	/// Checks the client signature against the given client key. Hosts run this on receipt; we
	/// run it when a host echoes a proposal back to us after we lost channel data.
	pub fn verify_client_sig<C: Verification>(&self, secp_ctx: &Secp256k1<C>, client_pubkey: &PublicKey) -> bool {
		let digest = resize_proposal_digest(self.new_capacity_msat);
		let msg = Message::from_slice(&digest[..]).unwrap();
		secp_ctx.verify_ecdsa(&msg, &self.client_sig, client_pubkey).is_ok()
	}
}

/// Balances and in-flight HTLC sets from the local party's perspective, as projected from a
/// cross-signed state plus any number of not-yet-signed updates.
///
/// Balances are signed so that an over-spending projection shows up as a negative balance at
/// validation time instead of wrapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitmentSpec {
	/// What the local party could claim today.
	pub to_local_msat: i64,
	/// What the remote party could claim today.
	pub to_remote_msat: i64,
	/// HTLCs offered to us, not yet settled.
	pub incoming_htlcs: Vec<UpdateAddHtlc>,
	/// HTLCs we offered, not yet settled.
	pub outgoing_htlcs: Vec<UpdateAddHtlc>,
}

impl CommitmentSpec {
	/// The spec embedded in a cross-signed state, before any pending updates.
	pub fn from_lcss(state: &LastCrossSignedState) -> CommitmentSpec {
		CommitmentSpec {
			to_local_msat: state.local_balance_msat as i64,
			to_remote_msat: state.remote_balance_msat as i64,
			incoming_htlcs: state.incoming_htlcs.clone(),
			outgoing_htlcs: state.outgoing_htlcs.clone(),
		}
	}

	/// Applies pending updates from both sides on top of this spec. Adds are applied before
	/// settles so a settle may reference an add from the same unsigned batch; a settle whose id
	/// is no longer in flight is skipped (it was resolved by an earlier signing).
	pub fn reduce(&self, local_updates: &[UpdateMessage], remote_updates: &[UpdateMessage]) -> CommitmentSpec {
		let mut spec = self.clone();
		for update in local_updates.iter() {
			if let UpdateMessage::AddHtlc(ref add) = update {
				spec.to_local_msat -= add.amount_msat as i64;
				spec.outgoing_htlcs.push(add.clone());
			}
		}
		for update in remote_updates.iter() {
			if let UpdateMessage::AddHtlc(ref add) = update {
				spec.to_remote_msat -= add.amount_msat as i64;
				spec.incoming_htlcs.push(add.clone());
			}
		}
		for update in local_updates.iter() {
			match update {
				UpdateMessage::AddHtlc(..) => {},
				UpdateMessage::FulfillHtlc(ref fulfill) => {
					if let Some(pos) = spec.incoming_htlcs.iter().position(|htlc| htlc.htlc_id == fulfill.htlc_id) {
						spec.to_local_msat += spec.incoming_htlcs[pos].amount_msat as i64;
						spec.incoming_htlcs.remove(pos);
					}
				},
				UpdateMessage::FailHtlc(..) | UpdateMessage::FailMalformedHtlc(..) => {
					if let Some(pos) = spec.incoming_htlcs.iter().position(|htlc| htlc.htlc_id == update.htlc_id()) {
						spec.to_remote_msat += spec.incoming_htlcs[pos].amount_msat as i64;
						spec.incoming_htlcs.remove(pos);
					}
				},
			}
		}
		for update in remote_updates.iter() {
			match update {
				UpdateMessage::AddHtlc(..) => {},
				UpdateMessage::FulfillHtlc(ref fulfill) => {
					if let Some(pos) = spec.outgoing_htlcs.iter().position(|htlc| htlc.htlc_id == fulfill.htlc_id) {
						spec.to_remote_msat += spec.outgoing_htlcs[pos].amount_msat as i64;
						spec.outgoing_htlcs.remove(pos);
					}
				},
				UpdateMessage::FailHtlc(..) | UpdateMessage::FailMalformedHtlc(..) => {
					if let Some(pos) = spec.outgoing_htlcs.iter().position(|htlc| htlc.htlc_id == update.htlc_id()) {
						spec.to_local_msat += spec.outgoing_htlcs[pos].amount_msat as i64;
						spec.outgoing_htlcs.remove(pos);
					}
				},
			}
		}
		spec
	}

	/// Total value locked in outgoing HTLCs.
	pub fn outgoing_amount_msat(&self) -> u64 {
		self.outgoing_htlcs.iter().map(|htlc| htlc.amount_msat).sum()
	}

	/// Total value locked in incoming HTLCs.
	pub fn incoming_amount_msat(&self) -> u64 {
		self.incoming_htlcs.iter().map(|htlc| htlc.amount_msat).sum()
	}

	/// Number of HTLCs in flight in both directions.
	pub fn htlc_count(&self) -> usize {
		self.incoming_htlcs.len() + self.outgoing_htlcs.len()
	}
}

#[cfg(test)]
mod tests {
	use bitcoin::blockdata::script::Builder;
	use bitcoin::blockdata::opcodes;
	use bitcoin::hashes::{Hash, HashEngine};
	use bitcoin::hashes::sha256::Hash as Sha256;
	use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};

	use crate::ln::chan_utils::*;
	use crate::ln::msgs::{InitHostedChannel, LastCrossSignedState, OnionPacket, UpdateAddHtlc, UpdateFailHtlc, UpdateFulfillHtlc, UpdateMessage};
	use crate::ln::types::{ChannelId, PaymentHash, PaymentPreimage};
	use crate::sign::{KeysManager, NodeSigner};
	use crate::util::ser::Writeable;

	fn test_add(htlc_id: u64, amount_msat: u64) -> UpdateAddHtlc {
		UpdateAddHtlc {
			channel_id: ChannelId([1; 32]),
			htlc_id,
			amount_msat,
			payment_hash: PaymentHash(Sha256::hash(&htlc_id.to_be_bytes()).into_inner()),
			cltv_expiry: 19_050,
			onion_routing_packet: OnionPacket { version: 0, public_key: [2; 33], hop_data: [0; 1300], hmac: [0; 32] },
		}
	}

	fn test_lcss() -> LastCrossSignedState {
		LastCrossSignedState {
			is_host: false,
			refund_script_pubkey: Builder::new().push_opcode(opcodes::all::OP_PUSHBYTES_0).push_slice(&[0; 20]).into_script(),
			init_hosted_channel: InitHostedChannel {
				max_htlc_value_in_flight_msat: 90_000_000,
				htlc_minimum_msat: 1000,
				max_accepted_htlcs: 10,
				channel_capacity_msat: 100_000_000,
				initial_client_balance_msat: 0,
			},
			block_day: 19_000,
			local_balance_msat: 40_000_000,
			remote_balance_msat: 59_900_000,
			local_updates: 3,
			remote_updates: 5,
			incoming_htlcs: vec![test_add(5, 60_000)],
			outgoing_htlcs: vec![test_add(3, 40_000)],
			remote_sig_of_local: null_signature(),
			local_sig_of_remote: null_signature(),
		}
	}

	#[test]
	fn digest_layout_is_byte_exact() {
		let lcss = test_lcss();
		let mut engine = Sha256::engine();
		engine.input(lcss.refund_script_pubkey.as_bytes());
		engine.input(&100_000_000u64.to_le_bytes());
		engine.input(&0u64.to_le_bytes());
		engine.input(&19_000u32.to_le_bytes());
		engine.input(&40_000_000u64.to_le_bytes());
		engine.input(&59_900_000u64.to_le_bytes());
		engine.input(&3u32.to_le_bytes());
		engine.input(&5u32.to_le_bytes());
		engine.input(&lcss.incoming_htlcs[0].encode());
		engine.input(&lcss.outgoing_htlcs[0].encode());
		engine.input(&[0u8]);
		assert_eq!(hosted_state_digest(&lcss), Sha256::from_engine(engine).into_inner());
	}

	#[test]
	fn reverse_is_an_involution() {
		let lcss = test_lcss();
		let reversed = lcss.reverse();
		assert!(reversed.is_host);
		assert_eq!(reversed.local_balance_msat, lcss.remote_balance_msat);
		assert_eq!(reversed.local_updates, lcss.remote_updates);
		assert_eq!(reversed.incoming_htlcs, lcss.outgoing_htlcs);
		assert_eq!(reversed.reverse(), lcss);
	}

	#[test]
	fn cross_signatures_verify_in_both_directions() {
		let secp_ctx = Secp256k1::new();
		let host_secret = SecretKey::from_slice(&[99; 32]).unwrap();
		let host_node_id = PublicKey::from_secret_key(&secp_ctx, &host_secret);
		let client_keys = KeysManager::new(SecretKey::from_slice(&[42; 32]).unwrap());
		let client_pubkey = client_keys.node_specific_pubkey(&host_node_id);

		// The client signs the host's view of the state; the host signs ours with its node key.
		let mut lcss = test_lcss().with_local_sig_of_remote(&client_keys, &host_node_id);
		let our_digest = bitcoin::secp256k1::Message::from_slice(&hosted_state_digest(&lcss)).unwrap();
		lcss.remote_sig_of_local = secp_ctx.sign_ecdsa(&our_digest, &host_secret);

		assert!(lcss.verify_remote_sig(&secp_ctx, &host_node_id));
		// What the host holds is our reverse, in which the signature roles swap.
		assert!(lcss.reverse().verify_remote_sig(&secp_ctx, &client_pubkey));

		let mut tampered = lcss.clone();
		tampered.local_balance_msat += 1;
		assert!(!tampered.verify_remote_sig(&secp_ctx, &host_node_id));
	}

	#[test]
	fn resize_signature_verifies() {
		let secp_ctx = Secp256k1::new();
		let host_node_id = PublicKey::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[99; 32]).unwrap());
		let keys = KeysManager::new(SecretKey::from_slice(&[42; 32]).unwrap());
		let resize = ResizeChannel::sign(250_000_000, &keys, &host_node_id);
		assert!(resize.verify_client_sig(&secp_ctx, &keys.node_specific_pubkey(&host_node_id)));
		let mut tampered = resize;
		tampered.new_capacity_msat += 1;
		assert!(!tampered.verify_client_sig(&secp_ctx, &keys.node_specific_pubkey(&host_node_id)));
	}

	#[test]
	fn reduce_conserves_capacity() {
		let lcss = test_lcss();
		let base = CommitmentSpec::from_lcss(&lcss);
		let capacity = |spec: &CommitmentSpec| {
			spec.to_local_msat + spec.to_remote_msat
				+ spec.incoming_amount_msat() as i64 + spec.outgoing_amount_msat() as i64
		};
		assert_eq!(capacity(&base), 100_000_000);

		// We add a new HTLC and fulfill the incoming one; they fail our in-flight outgoing one.
		let local_updates = vec![
			UpdateMessage::AddHtlc(test_add(4, 1_000_000)),
			UpdateMessage::FulfillHtlc(UpdateFulfillHtlc {
				channel_id: ChannelId([1; 32]), htlc_id: 5, payment_preimage: PaymentPreimage([0; 32]),
			}),
		];
		let remote_updates = vec![
			UpdateMessage::FailHtlc(UpdateFailHtlc { channel_id: ChannelId([1; 32]), htlc_id: 3, reason: vec![] }),
		];
		let next = base.reduce(&local_updates, &remote_updates);

		assert_eq!(capacity(&next), 100_000_000);
		// Fulfilled incoming credits us, failed outgoing refunds us, new add debits us.
		assert_eq!(next.to_local_msat, 40_000_000 - 1_000_000 + 60_000 + 40_000);
		assert_eq!(next.to_remote_msat, 59_900_000);
		assert_eq!(next.incoming_htlcs.len(), 0);
		assert_eq!(next.outgoing_htlcs.len(), 1);
		assert_eq!(next.outgoing_htlcs[0].htlc_id, 4);
	}

	#[test]
	fn reduce_skips_already_settled_ids() {
		let lcss = test_lcss();
		let base = CommitmentSpec::from_lcss(&lcss);
		let stale_fulfill = vec![UpdateMessage::FulfillHtlc(UpdateFulfillHtlc {
			channel_id: ChannelId([1; 32]), htlc_id: 999, payment_preimage: PaymentPreimage([0; 32]),
		})];
		assert_eq!(base.reduce(&stale_fulfill, &[]), base);
	}
}
