// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The top-level channel management and event monitoring logic lives here.
//!
//! [`HostedChannelManager`] owns one [`HostedChannel`] per host, routes decoded wire messages to
//! them with an exhaustive match, and enforces the two process-wide rules the channels themselves
//! cannot: events for a given channel are processed strictly one at a time, and a new channel
//! record always hits durable storage before any message derived from it is released to the
//! transport. Upper layers drive it through the [`EventsProvider`]/[`MessageSendEventsProvider`]
//! queues rather than callbacks, so there is no built-in threading.

use bitcoin::blockdata::script::Script;
use bitcoin::secp256k1::PublicKey;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::chain::PreimageCheck;
use crate::ln::channel::{ChannelError, ChannelPhase, HostedChannel};
use crate::ln::msgs::{OnionPacket, UpdateAddHtlc};
use crate::ln::types::{ChannelId, PaymentHash, PaymentPreimage};
use crate::ln::wire::Message;
use crate::sign::NodeSigner;
use crate::util::config::HostedConfig;
use crate::util::errors::APIError;
use crate::util::events::{Event, EventsProvider, MessageSendEvent, MessageSendEventsProvider};
use crate::util::logger::Logger;
use crate::util::persist::{Persist, PersistenceError};

/// Basic information about a hosted channel, for wallet display and routing decisions.
#[derive(Clone, Debug)]
pub struct ChannelDetails {
	/// The channel id shared with the host.
	pub channel_id: ChannelId,
	/// The 64-bit truncation of the channel id, used in routing hints.
	pub short_channel_id: u64,
	/// The host on the other end.
	pub counterparty_node_id: PublicKey,
	/// Current lifecycle phase.
	pub phase: ChannelPhase,
	/// Our balance as of the last cross-signed state, if one exists.
	pub local_balance_msat: Option<u64>,
	/// The host's balance as of the last cross-signed state, if one exists.
	pub remote_balance_msat: Option<u64>,
	/// Whether the channel is frozen on an error (ours or the host's).
	pub is_suspended: bool,
}

/// Manager of all hosted channels of a wallet.
///
/// Holds the signing capability, the persister, the preimage lookup and the logger as explicit
/// values; there is no global state anywhere in this crate.
pub struct HostedChannelManager<S: NodeSigner, P: Persist, C: PreimageCheck, L: Logger> {
	config: HostedConfig,
	signer: S,
	persister: P,
	preimage_check: C,
	logger: L,
	channels: Mutex<HashMap<ChannelId, HostedChannel>>,
	by_peer: Mutex<HashMap<PublicKey, ChannelId>>,
	// (height, block day) as last reported by the chain feed.
	best_block: Mutex<(u32, u32)>,
	pending_events: Mutex<Vec<Event>>,
	pending_msg_events: Mutex<Vec<MessageSendEvent>>,
}

impl<S: NodeSigner, P: Persist, C: PreimageCheck, L: Logger> HostedChannelManager<S, P, C, L> {
	/// Constructs a manager, reviving every persisted channel. Revived channels sleep until
	/// their peer connects and the resync handshake reconciles any divergence.
	pub fn new(config: HostedConfig, signer: S, persister: P, preimage_check: C, logger: L) -> Result<Self, PersistenceError> {
		let mut channels = HashMap::new();
		let mut by_peer = HashMap::new();
		for (channel_id, commits) in persister.read_channels()? {
			by_peer.insert(commits.remote_info.node_id, channel_id);
			channels.insert(channel_id, HostedChannel::from_commits(config, commits));
		}
		Ok(HostedChannelManager {
			config,
			signer,
			persister,
			preimage_check,
			logger,
			channels: Mutex::new(channels),
			by_peer: Mutex::new(by_peer),
			best_block: Mutex::new((0, 0)),
			pending_events: Mutex::new(Vec::new()),
			pending_msg_events: Mutex::new(Vec::new()),
		})
	}

	/// Creates a new hosted channel with the given host. The invite goes out when the peer
	/// connection comes up.
	pub fn create_channel(&self, host_node_id: PublicKey, refund_script_pubkey: Script, secret: Vec<u8>) -> Result<ChannelId, APIError> {
		let node_specific_pubkey = self.signer.node_specific_pubkey(&host_node_id);
		let remote_info = crate::ln::types::RemoteNodeInfo { node_id: host_node_id, node_specific_pubkey };
		let channel_id = remote_info.channel_id();
		let mut channels = self.channels.lock().unwrap();
		if channels.contains_key(&channel_id) {
			return Err(APIError::APIMisuseError { err: format!("hosted channel with {} already exists", log_pubkey!(host_node_id)) });
		}
		channels.insert(channel_id, HostedChannel::new_outbound(self.config, remote_info, refund_script_pubkey, secret));
		self.by_peer.lock().unwrap().insert(host_node_id, channel_id);
		log_info!(self.logger, "created hosted channel {} with host {}", channel_id, log_pubkey!(host_node_id));
		Ok(channel_id)
	}

	/// Basic information about every known channel.
	pub fn list_channels(&self) -> Vec<ChannelDetails> {
		let channels = self.channels.lock().unwrap();
		channels.values().map(|chan| {
			let commits = chan.commits();
			ChannelDetails {
				channel_id: chan.channel_id(),
				short_channel_id: chan.channel_id().short_channel_id(),
				counterparty_node_id: chan.counterparty_node_id(),
				phase: chan.phase(),
				local_balance_msat: commits.map(|c| c.last_cross_signed_state.local_balance_msat),
				remote_balance_msat: commits.map(|c| c.last_cross_signed_state.remote_balance_msat),
				is_suspended: commits.map_or(false, |c| c.error().is_some()),
			}
		}).collect()
	}

	fn drain_channel_events(&self, chan: &mut HostedChannel) {
		let events = chan.get_and_clear_pending_events();
		if !events.is_empty() {
			self.pending_events.lock().unwrap().extend(events);
		}
	}

	fn queue_msgs(&self, node_id: PublicKey, msgs: Vec<Message>) {
		if !msgs.is_empty() {
			self.pending_msg_events.lock().unwrap().push(MessageSendEvent::SendMessages { node_id, msgs });
		}
	}

	/// Persists the channel's current record. Nothing derived from an unpersisted state may be
	/// sent, so callers bail out on failure here.
	fn persist(&self, chan: &HostedChannel) -> bool {
		if let Some(commits) = chan.commits() {
			if let Err(PersistenceError(reason)) = self.persister.persist_channel(chan.channel_id(), commits) {
				log_error!(self.logger, "failed to persist channel {}: {}", chan.channel_id(), reason);
				return false;
			}
		}
		true
	}

	fn process_result(&self, chan: &mut HostedChannel, result: Result<Vec<Message>, ChannelError>) {
		let node_id = chan.counterparty_node_id();
		match result {
			Ok(msgs) => {
				self.drain_channel_events(chan);
				if self.persist(chan) {
					self.queue_msgs(node_id, msgs);
				}
			},
			Err(ChannelError::Ignore(reason)) => {
				log_debug!(self.logger, "ignoring event on channel {}: {}", chan.channel_id(), reason);
				self.drain_channel_events(chan);
			},
			Err(ChannelError::Disconnect(reason)) => {
				log_warn!(self.logger, "disconnecting {} over channel {}: {}", log_pubkey!(node_id), chan.channel_id(), reason);
				chan.peer_disconnected();
				self.drain_channel_events(chan);
				self.pending_msg_events.lock().unwrap().push(MessageSendEvent::DisconnectPeer { node_id });
			},
			Err(ChannelError::Suspend(code, reason)) => {
				log_error!(self.logger, "suspending channel {} with code {}: {}", chan.channel_id(), code, reason);
				self.suspend_channel(chan, code);
			},
		}
	}

	fn suspend_channel(&self, chan: &mut HostedChannel, code: &'static str) {
		let node_id = chan.counterparty_node_id();
		let fail = chan.local_suspend(code);
		self.drain_channel_events(chan);
		if self.persist(chan) {
			if let Some(fail) = fail {
				self.queue_msgs(node_id, vec![Message::Fail(fail)]);
			}
		}
	}

	/// A peer transport came up. Sends the channel's greeting (invite, or its standing error).
	pub fn peer_connected(&self, counterparty_node_id: &PublicKey) {
		let channel_id = match self.by_peer.lock().unwrap().get(counterparty_node_id) { Some(id) => *id, None => return };
		let mut channels = self.channels.lock().unwrap();
		if let Some(chan) = channels.get_mut(&channel_id) {
			let msgs = chan.peer_connected();
			self.drain_channel_events(chan);
			self.queue_msgs(*counterparty_node_id, msgs);
		}
	}

	/// A peer transport went down. The channel sleeps until the next connect.
	pub fn peer_disconnected(&self, counterparty_node_id: &PublicKey) {
		let channel_id = match self.by_peer.lock().unwrap().get(counterparty_node_id) { Some(id) => *id, None => return };
		let mut channels = self.channels.lock().unwrap();
		if let Some(chan) = channels.get_mut(&channel_id) {
			chan.peer_disconnected();
			self.drain_channel_events(chan);
		}
	}

	/// Routes one decoded message from the given peer into its channel. This is the single entry
	/// point for everything the host says; calls for one peer must not run concurrently.
	pub fn handle_message(&self, counterparty_node_id: &PublicKey, message: Message) {
		let channel_id = match self.by_peer.lock().unwrap().get(counterparty_node_id) {
			Some(id) => *id,
			None => {
				log_debug!(self.logger, "dropping hosted channel message from unknown peer {}", log_pubkey!(counterparty_node_id));
				return;
			},
		};
		let (_, block_day) = *self.best_block.lock().unwrap();
		let mut channels = self.channels.lock().unwrap();
		let chan = match channels.get_mut(&channel_id) { Some(chan) => chan, None => return };
		let result = match message {
			Message::InitHostedChannel(ref msg) => chan.handle_init_hosted_channel(msg, block_day, &self.signer),
			Message::LastCrossSignedState(ref msg) => chan.handle_last_cross_signed_state(msg),
			Message::StateUpdate(ref msg) => chan.handle_state_update(msg, block_day, &self.signer),
			Message::StateOverride(ref msg) => chan.handle_state_override(msg),
			Message::ResizeChannel(ref msg) => chan.handle_resize_channel(msg),
			Message::UpdateAddHtlc(ref msg) => chan.handle_update_add_htlc(msg),
			Message::UpdateFulfillHtlc(ref msg) => chan.handle_update_fulfill_htlc(msg),
			Message::UpdateFailHtlc(ref msg) => chan.handle_update_fail_htlc(msg),
			Message::UpdateFailMalformedHtlc(ref msg) => chan.handle_update_fail_malformed_htlc(msg),
			Message::ChannelUpdate(ref msg) => chan.handle_channel_update(msg),
			Message::Fail(ref msg) => chan.handle_remote_fail(msg),
			Message::HostedChannelBranding(branding) => {
				self.pending_events.lock().unwrap().push(Event::BrandingReceived { node_id: *counterparty_node_id, branding });
				return;
			},
			Message::Warning(ref msg) => {
				log_warn!(self.logger, "peer warning on channel {}: {}", channel_id, String::from_utf8_lossy(&msg.data));
				return;
			},
			// We are always the client; channel invites and branding requests target hosts.
			Message::InvokeHostedChannel(..) => Err(ChannelError::Ignore("invoke_hosted_channel targets a host".to_owned())),
			Message::AskBrandingInfo(..) => Err(ChannelError::Ignore("ask_branding_info targets a host".to_owned())),
			// Public hosted channel gossip has its own subsystem; none of it moves channel state.
			Message::AnnouncementSignature(..) | Message::QueryPublicHostedChannels(..)
				| Message::ReplyPublicHostedChannelsEnd(..) | Message::QueryPreimages(..)
				| Message::ReplyPreimages(..) => Err(ChannelError::Ignore("public hosted channel gossip".to_owned())),
			Message::Unknown(type_id) => {
				if type_id.is_even() {
					Err(ChannelError::Disconnect(format!("unknown even message type {}", type_id)))
				} else {
					Err(ChannelError::Ignore(format!("unknown odd message type {}", type_id)))
				}
			},
		};
		self.process_result(chan, result);
	}

	/// Offers an HTLC over the given channel. On refusal an
	/// [`Event::AddRejectedLocally`] is queued in addition to the returned error, mirroring how
	/// in-flight HTLCs are rejected after the fact.
	pub fn send_htlc(&self, channel_id: ChannelId, amount_msat: u64, payment_hash: PaymentHash, cltv_expiry: u32, onion_routing_packet: OnionPacket) -> Result<(), APIError> {
		let (height, block_day) = *self.best_block.lock().unwrap();
		let mut channels = self.channels.lock().unwrap();
		let chan = match channels.get_mut(&channel_id) {
			Some(chan) => chan,
			None => return Err(APIError::ChannelUnavailable { err: format!("no channel {}", channel_id) }),
		};
		match chan.send_htlc(amount_msat, payment_hash, cltv_expiry, onion_routing_packet.clone(), height, block_day, &self.signer) {
			Ok(msgs) => {
				let node_id = chan.counterparty_node_id();
				self.drain_channel_events(chan);
				if self.persist(chan) {
					self.queue_msgs(node_id, msgs);
				}
				Ok(())
			},
			Err(reason) => {
				// The HTLC never got an id; a zeroed one marks it as never-offered.
				let add = UpdateAddHtlc { channel_id, htlc_id: 0, amount_msat, payment_hash, cltv_expiry, onion_routing_packet };
				self.pending_events.lock().unwrap().push(Event::AddRejectedLocally { add, reason });
				Err(APIError::ChannelUnavailable { err: format!("cannot send over channel {}: {:?}", channel_id, reason) })
			},
		}
	}

	/// Settles an incoming HTLC with its preimage. Works on suspended and sleeping channels too.
	pub fn fulfill_htlc(&self, channel_id: ChannelId, htlc_id: u64, payment_preimage: PaymentPreimage) -> Result<(), APIError> {
		self.with_channel(channel_id, |chan| chan.fulfill_htlc(htlc_id, payment_preimage))
	}

	/// Fails an incoming HTLC back to the host.
	pub fn fail_htlc(&self, channel_id: ChannelId, htlc_id: u64, reason: Vec<u8>) -> Result<(), APIError> {
		self.with_channel(channel_id, |chan| chan.fail_htlc(htlc_id, reason))
	}

	/// Fails an incoming HTLC blaming its onion.
	pub fn fail_malformed_htlc(&self, channel_id: ChannelId, htlc_id: u64, sha256_of_onion: [u8; 32], failure_code: u16) -> Result<(), APIError> {
		self.with_channel(channel_id, |chan| chan.fail_malformed_htlc(htlc_id, sha256_of_onion, failure_code))
	}

	/// Asks the host for more capacity; the increase takes effect with the next cross-signing.
	pub fn propose_resize(&self, channel_id: ChannelId, delta_msat: u64) -> Result<(), APIError> {
		let (_, block_day) = *self.best_block.lock().unwrap();
		self.with_channel(channel_id, |chan| chan.propose_resize(delta_msat, block_day, &self.signer))
	}

	/// Accepts the host's pending override proposal, clearing the channel's error state in
	/// exchange for whatever balance the host dictated.
	pub fn accept_override(&self, channel_id: ChannelId) -> Result<(), APIError> {
		self.with_channel(channel_id, |chan| chan.accept_override(&self.signer))
	}

	fn with_channel<F>(&self, channel_id: ChannelId, op: F) -> Result<(), APIError>
		where F: FnOnce(&mut HostedChannel) -> Result<Vec<Message>, APIError>
	{
		let mut channels = self.channels.lock().unwrap();
		let chan = match channels.get_mut(&channel_id) {
			Some(chan) => chan,
			None => return Err(APIError::ChannelUnavailable { err: format!("no channel {}", channel_id) }),
		};
		let msgs = op(chan)?;
		let node_id = chan.counterparty_node_id();
		self.drain_channel_events(chan);
		if self.persist(chan) {
			self.queue_msgs(node_id, msgs);
		}
		Ok(())
	}

	/// A new chain tip, with the matching UTC day counter. Expired HTLCs get timed out, and
	/// ambiguous outgoing ones go to the preimage lookup first.
	pub fn best_block_updated(&self, height: u32, block_day: u32) {
		*self.best_block.lock().unwrap() = (height, block_day);
		let mut channels = self.channels.lock().unwrap();
		for (channel_id, chan) in channels.iter_mut() {
			let actions = chan.best_block_updated(height);
			if let Some(hashes) = actions.preimage_request {
				log_info!(self.logger, "channel {} has {} expired outgoing HTLCs, checking for on-chain preimages", channel_id, hashes.len());
				self.preimage_check.process(*channel_id, hashes);
			}
			self.apply_block_actions(chan, actions.suspend_code);
		}
	}

	/// Completion callback for a [`PreimageCheck`] lookup. Safe to call at any time; a
	/// completion against a closed or already-resolved channel does nothing.
	pub fn preimages_checked(&self, channel_id: ChannelId, found: HashMap<PaymentHash, PaymentPreimage>) {
		let mut channels = self.channels.lock().unwrap();
		if let Some(chan) = channels.get_mut(&channel_id) {
			let actions = chan.preimages_checked(&found);
			self.apply_block_actions(chan, actions.suspend_code);
		}
	}

	fn apply_block_actions(&self, chan: &mut HostedChannel, suspend_code: Option<&'static str>) {
		match suspend_code {
			Some(code) => self.suspend_channel(chan, code),
			None => {
				self.drain_channel_events(chan);
				let _ = self.persist(chan);
			},
		}
	}
}

impl<S: NodeSigner, P: Persist, C: PreimageCheck, L: Logger> EventsProvider for HostedChannelManager<S, P, C, L> {
	fn get_and_clear_pending_events(&self) -> Vec<Event> {
		let mut events = self.pending_events.lock().unwrap();
		::std::mem::replace(&mut *events, Vec::new())
	}
}

impl<S: NodeSigner, P: Persist, C: PreimageCheck, L: Logger> MessageSendEventsProvider for HostedChannelManager<S, P, C, L> {
	fn get_and_clear_pending_msg_events(&self) -> Vec<MessageSendEvent> {
		let mut events = self.pending_msg_events.lock().unwrap();
		::std::mem::replace(&mut *events, Vec::new())
	}
}

#[cfg(test)]
mod tests {
	use bitcoin::blockdata::opcodes;
	use bitcoin::blockdata::script::{Builder, Script};
	use bitcoin::hashes::Hash;
	use bitcoin::hash_types::BlockHash;
	use bitcoin::secp256k1::{Message as SecpMessage, PublicKey, Secp256k1, SecretKey};

	use std::collections::HashMap;

	use crate::ln::chan_utils::{hosted_state_digest, null_signature};
	use crate::ln::channelmanager::HostedChannelManager;
	use crate::ln::channel::ChannelPhase;
	use crate::ln::msgs::*;
	use crate::ln::types::PaymentPreimage;
	use crate::ln::wire::Message;
	use crate::sign::{KeysManager, NodeSigner};
	use crate::util::config::HostedConfig;
	use crate::util::events::{Event, EventsProvider, LocalFailure, MessageSendEvent, MessageSendEventsProvider};
	use crate::util::persist::Persist;
	use crate::util::test_utils::{TestLogger, TestPersister, TestPreimageCheck};

	const BLOCK_DAY: u32 = 19_000;
	const HEIGHT: u32 = 19_000;

	fn refund_script() -> Script {
		Builder::new().push_opcode(opcodes::all::OP_PUSHBYTES_0).push_slice(&[0; 20]).into_script()
	}

	fn test_init() -> InitHostedChannel {
		InitHostedChannel {
			max_htlc_value_in_flight_msat: 100_000_000,
			htlc_minimum_msat: 1000,
			max_accepted_htlcs: 10,
			channel_capacity_msat: 200_000_000,
			initial_client_balance_msat: 100_000_000,
		}
	}

	struct TestFixture {
		manager: HostedChannelManager<KeysManager, TestPersister, TestPreimageCheck, TestLogger>,
		host_secret: SecretKey,
		host_node_id: PublicKey,
	}

	fn new_fixture(persister: TestPersister) -> TestFixture {
		let secp_ctx = Secp256k1::new();
		let host_secret = SecretKey::from_slice(&[99; 32]).unwrap();
		let host_node_id = PublicKey::from_secret_key(&secp_ctx, &host_secret);
		let manager = HostedChannelManager::new(
			HostedConfig::new(BlockHash::hash(&[])),
			KeysManager::new(SecretKey::from_slice(&[42; 32]).unwrap()),
			persister,
			TestPreimageCheck::new(),
			TestLogger::new(),
		).unwrap();
		manager.best_block_updated(HEIGHT, BLOCK_DAY);
		TestFixture { manager, host_secret, host_node_id }
	}

	/// What the host signs to complete the open handshake: the client's zero state.
	fn host_open_state_update(fixture: &TestFixture, init: &InitHostedChannel) -> StateUpdate {
		let secp_ctx = Secp256k1::new();
		let client_zero_state = LastCrossSignedState {
			is_host: false,
			refund_script_pubkey: refund_script(),
			init_hosted_channel: *init,
			block_day: BLOCK_DAY,
			local_balance_msat: init.initial_client_balance_msat,
			remote_balance_msat: init.channel_capacity_msat - init.initial_client_balance_msat,
			local_updates: 0,
			remote_updates: 0,
			incoming_htlcs: Vec::new(),
			outgoing_htlcs: Vec::new(),
			remote_sig_of_local: null_signature(),
			local_sig_of_remote: null_signature(),
		};
		let digest = SecpMessage::from_slice(&hosted_state_digest(&client_zero_state)).unwrap();
		StateUpdate {
			block_day: BLOCK_DAY,
			local_updates: 0,
			remote_updates: 0,
			local_sig_of_remote_lcss: secp_ctx.sign_ecdsa(&digest, &fixture.host_secret),
		}
	}

	fn open_channel(fixture: &TestFixture) -> crate::ln::types::ChannelId {
		let channel_id = fixture.manager.create_channel(fixture.host_node_id, refund_script(), Vec::new()).unwrap();
		fixture.manager.peer_connected(&fixture.host_node_id);
		match &fixture.manager.get_and_clear_pending_msg_events()[0] {
			MessageSendEvent::SendMessages { msgs, .. } => assert!(matches!(msgs[0], Message::InvokeHostedChannel(..))),
			other => panic!("expected send, got {:?}", other),
		}
		let init = test_init();
		fixture.manager.handle_message(&fixture.host_node_id, Message::InitHostedChannel(init));
		match &fixture.manager.get_and_clear_pending_msg_events()[0] {
			MessageSendEvent::SendMessages { msgs, .. } => assert!(matches!(msgs[0], Message::StateUpdate(..))),
			other => panic!("expected send, got {:?}", other),
		}
		fixture.manager.handle_message(&fixture.host_node_id, Message::StateUpdate(host_open_state_update(fixture, &init)));
		channel_id
	}

	#[test]
	fn open_persists_before_branding_request() {
		let fixture = new_fixture(TestPersister::new());
		let channel_id = open_channel(&fixture);

		// The cross-signed record must have been persisted before ask_branding_info went out.
		assert_eq!(fixture.manager.persister.persist_count(), 1);
		assert!(fixture.manager.persister.read_channels().unwrap().iter().any(|(id, _)| *id == channel_id));
		match &fixture.manager.get_and_clear_pending_msg_events()[0] {
			MessageSendEvent::SendMessages { msgs, .. } => assert!(matches!(msgs[0], Message::AskBrandingInfo(..))),
			other => panic!("expected send, got {:?}", other),
		}
		let details = fixture.manager.list_channels();
		assert_eq!(details.len(), 1);
		assert_eq!(details[0].phase, ChannelPhase::Open);
		assert_eq!(details[0].local_balance_msat, Some(100_000_000));
	}

	#[test]
	fn restored_channels_sleep_until_reconnect() {
		let persister = TestPersister::new();
		{
			let fixture = new_fixture(persister.clone());
			open_channel(&fixture);
		}
		let fixture = new_fixture(persister);
		let details = fixture.manager.list_channels();
		assert_eq!(details.len(), 1);
		assert_eq!(details[0].phase, ChannelPhase::Sleeping);

		// On reconnect the channel invites the host again, starting the resync handshake.
		fixture.manager.peer_connected(&fixture.host_node_id);
		match &fixture.manager.get_and_clear_pending_msg_events()[0] {
			MessageSendEvent::SendMessages { msgs, .. } => assert!(matches!(msgs[0], Message::InvokeHostedChannel(..))),
			other => panic!("expected send, got {:?}", other),
		}
	}

	#[test]
	fn local_send_rejection_queues_event() {
		let fixture = new_fixture(TestPersister::new());
		let channel_id = open_channel(&fixture);
		fixture.manager.get_and_clear_pending_msg_events();
		fixture.manager.get_and_clear_pending_events();

		let onion = OnionPacket { version: 0, public_key: [2; 33], hop_data: [0; 1300], hmac: [0; 32] };
		let preimage = PaymentPreimage([1; 32]);
		assert!(fixture.manager.send_htlc(channel_id, 1, preimage.payment_hash(), 19_050, onion).is_err());
		let events = fixture.manager.get_and_clear_pending_events();
		assert!(events.iter().any(|event| matches!(event, Event::AddRejectedLocally { reason: LocalFailure::AmountBelowMinimum, .. })));
	}

	#[test]
	fn expired_htlcs_trigger_preimage_lookup() {
		let fixture = new_fixture(TestPersister::new());
		let channel_id = open_channel(&fixture);
		fixture.manager.get_and_clear_pending_msg_events();

		let onion = OnionPacket { version: 0, public_key: [2; 33], hop_data: [0; 1300], hmac: [0; 32] };
		let preimage = PaymentPreimage([1; 32]);
		fixture.manager.send_htlc(channel_id, 50_000, preimage.payment_hash(), HEIGHT + 37, onion).unwrap();

		fixture.manager.best_block_updated(HEIGHT + 38, BLOCK_DAY);
		let requests = fixture.manager.preimage_check.requests();
		assert_eq!(requests.len(), 1);
		assert_eq!(requests[0].0, channel_id);
		assert!(requests[0].1.contains(&preimage.payment_hash()));

		// Completion rescues the payment and suspends the channel.
		let mut found = HashMap::new();
		found.insert(preimage.payment_hash(), preimage);
		fixture.manager.get_and_clear_pending_events();
		fixture.manager.preimages_checked(channel_id, found);
		let events = fixture.manager.get_and_clear_pending_events();
		assert!(events.iter().any(|event| matches!(event, Event::FulfillReceived { .. })));
		assert!(events.iter().any(|event| matches!(event, Event::ChannelSuspended { by_remote: false, .. })));
		let msg_events = fixture.manager.get_and_clear_pending_msg_events();
		assert!(msg_events.iter().any(|event| match event {
			MessageSendEvent::SendMessages { msgs, .. } => msgs.iter().any(|msg| matches!(msg, Message::Fail(..))),
			_ => false,
		}));
		assert!(fixture.manager.list_channels()[0].is_suspended);
	}

	#[test]
	fn branding_is_surfaced_as_event() {
		let fixture = new_fixture(TestPersister::new());
		open_channel(&fixture);
		let branding = HostedChannelBranding {
			rgb: [0x12, 0x34, 0x56],
			png_icon: None,
			contact_info: "host@example.com".to_owned(),
		};
		fixture.manager.handle_message(&fixture.host_node_id, Message::HostedChannelBranding(branding.clone()));
		let events = fixture.manager.get_and_clear_pending_events();
		assert!(events.iter().any(|event| match event {
			Event::BrandingReceived { branding: received, .. } => received == &branding,
			_ => false,
		}));
	}

	#[test]
	fn unknown_peer_messages_are_dropped() {
		let fixture = new_fixture(TestPersister::new());
		let secp_ctx = Secp256k1::new();
		let stranger = PublicKey::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[7; 32]).unwrap());
		fixture.manager.handle_message(&stranger, Message::InitHostedChannel(test_init()));
		assert!(fixture.manager.get_and_clear_pending_msg_events().is_empty());
	}
}
