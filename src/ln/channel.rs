// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The hosted channel state machine.
//!
//! A hosted channel has no commitment transaction: the only thing binding the host is the
//! [`LastCrossSignedState`] both parties keep countersigning. [`HostedCommits`] is the durable
//! record around that state (plus both sides' not-yet-signed update queues), and
//! [`HostedChannel`] drives it: one channel, one event at a time, no partial transitions.
//!
//! Handlers return the messages to send on success. Failures are typed (`ChannelError`) and the
//! channel manager decides what each kind means for the connection: `Ignore` logs, `Disconnect`
//! drops the transport and lets the reconnect resync reconcile, `Suspend` is a per-channel
//! protocol violation which freezes the channel behind a `fail` message until the host overrides
//! or the user gives up. Fulfills are exempt from suspension in both directions; a preimage is
//! value and always propagates.

use bitcoin::blockdata::script::Script;
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use bitcoin::secp256k1;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::io::Read;
use std::mem;

use crate::ln::chan_utils::{null_signature, CommitmentSpec};
use crate::ln::msgs::{
	AskBrandingInfo, ChannelUpdate, Fail, InitHostedChannel, InvokeHostedChannel,
	LastCrossSignedState, OnionPacket, ResizeChannel, StateOverride, StateUpdate, UpdateAddHtlc,
	UpdateFailHtlc, UpdateFailMalformedHtlc, UpdateFulfillHtlc, UpdateMessage, DecodeError,
	BADONION, ERR_HOSTED_INVALID_RESIZE, ERR_HOSTED_MANUAL_SUSPEND,
	ERR_HOSTED_TIMED_OUT_OUTGOING_HTLC, ERR_HOSTED_WRONG_LOCAL_SIG, ERR_HOSTED_WRONG_REMOTE_SIG,
};
use crate::ln::types::{ChannelId, PaymentHash, PaymentPreimage, RemoteNodeInfo};
use crate::ln::wire::Message;
use crate::sign::NodeSigner;
use crate::util::config::HostedConfig;
use crate::util::errors::APIError;
use crate::util::events::{Event, LocalFailure, RemoteFailure, RemoteFulfill, UpdateAddHtlcExt};
use crate::util::ser::{Readable, Writeable, Writer};

/// Version byte written at the front of every persisted channel record.
const SERIALIZATION_VERSION: u8 = 1;

/// Used to return a typed error back to the channel manager, which decides what it means for the
/// connection and the channel.
pub(crate) enum ChannelError {
	/// The input was harmless but cannot be processed right now; log and carry on.
	Ignore(String),
	/// A transient disagreement (clock skew, a racing unsigned update). Drop the connection and
	/// go sleeping; the reconnect resync reconciles.
	Disconnect(String),
	/// A protocol violation with no recovery. Suspend the channel with the given wire code.
	Suspend(&'static str, String),
}

impl fmt::Debug for ChannelError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			&ChannelError::Ignore(ref e) => write!(f, "Ignore : {}", e),
			&ChannelError::Disconnect(ref e) => write!(f, "Disconnect : {}", e),
			&ChannelError::Suspend(code, ref e) => write!(f, "Suspend {} : {}", code, e),
		}
	}
}

/// Lifecycle phase of a hosted channel. Suspension is not a phase: a suspended channel keeps its
/// phase and carries an error in its [`HostedCommits`] instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelPhase {
	/// Created locally, waiting for the socket to come up before inviting the host.
	WaitForInit,
	/// Invite sent, waiting for the host to propose channel parameters (or recognize us and send
	/// its current state).
	WaitForAccept,
	/// We signed the opening zero state, waiting for the host's countersignature.
	WaitRemoteStateUpdate,
	/// Cross-signed and live.
	Open,
	/// Peer connection lost. State is kept; a reconnect triggers the resync handshake.
	Sleeping,
}

impl fmt::Display for ChannelPhase {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ChannelPhase::WaitForInit => f.write_str("wait-for-init"),
			ChannelPhase::WaitForAccept => f.write_str("wait-for-accept"),
			ChannelPhase::WaitRemoteStateUpdate => f.write_str("wait-remote-state-update"),
			ChannelPhase::Open => f.write_str("open"),
			ChannelPhase::Sleeping => f.write_str("sleeping"),
		}
	}
}

/// What a block tick asks the channel manager to do, separated out because a single tick can
/// require both a suspension and an asynchronous preimage lookup.
#[derive(Default)]
pub(crate) struct BlockActions {
	/// Suspend the channel with this wire code.
	pub suspend_code: Option<&'static str>,
	/// Start an on-chain preimage lookup for these hashes before writing the HTLCs off.
	pub preimage_request: Option<HashSet<PaymentHash>>,
}

/// The durable per-channel record: the last cross-signed state plus everything layered on top of
/// it that has not been signed yet.
///
/// This is a value object: mutators return a new record and the channel swaps it in atomically,
/// so no observer ever sees a half-applied transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostedCommits {
	/// The host's identity and our per-host key.
	pub remote_info: RemoteNodeInfo,
	/// The canonical shared truth.
	pub last_cross_signed_state: LastCrossSignedState,
	/// Updates we originated since the last signing, in order.
	pub next_local_updates: Vec<UpdateMessage>,
	/// Updates the host originated since the last signing, in order.
	pub next_remote_updates: Vec<UpdateMessage>,
	/// The host's gossip about this channel, used for routing hints.
	pub channel_update: Option<ChannelUpdate>,
	/// HTLC ids settled after the channel entered an error state, kept so a replayed settlement
	/// is not double-handled.
	pub post_error_outgoing_resolved_ids: BTreeSet<u64>,
	/// Set once we have suspended the channel.
	pub local_error: Option<Fail>,
	/// Set once the host has failed the channel.
	pub remote_error: Option<Fail>,
	/// A capacity increase we proposed, waiting to be folded into the next signing.
	pub resize_proposal: Option<ResizeChannel>,
	/// A forced reset the host proposed, waiting for the user to accept it.
	pub override_proposal: Option<StateOverride>,
}

impl HostedCommits {
	/// A fresh record around an adopted cross-signed state; queues, errors and proposals empty.
	pub fn restore(remote_info: RemoteNodeInfo, state: LastCrossSignedState) -> HostedCommits {
		HostedCommits {
			remote_info,
			last_cross_signed_state: state,
			next_local_updates: Vec::new(),
			next_remote_updates: Vec::new(),
			channel_update: None,
			post_error_outgoing_resolved_ids: BTreeSet::new(),
			local_error: None,
			remote_error: None,
			resize_proposal: None,
			override_proposal: None,
		}
	}

	/// The channel id shared by both parties.
	pub fn channel_id(&self) -> ChannelId {
		self.remote_info.channel_id()
	}

	/// Whichever error suspended the channel, if any.
	pub fn error(&self) -> Option<&Fail> {
		self.local_error.as_ref().or(self.remote_error.as_ref())
	}

	/// Balances and in-flight HTLCs as of the last signing.
	pub fn local_spec(&self) -> CommitmentSpec {
		CommitmentSpec::from_lcss(&self.last_cross_signed_state)
	}

	/// Balances and in-flight HTLCs with both pending queues applied.
	pub fn next_local_spec(&self) -> CommitmentSpec {
		self.local_spec().reduce(&self.next_local_updates, &self.next_remote_updates)
	}

	/// Our update counter once everything pending is signed. A fresh outgoing HTLC takes this
	/// plus one as its id.
	pub fn next_total_local(&self) -> u64 {
		self.last_cross_signed_state.local_updates as u64 + self.next_local_updates.len() as u64
	}

	/// The host's update counter once everything pending is signed.
	pub fn next_total_remote(&self) -> u64 {
		self.last_cross_signed_state.remote_updates as u64 + self.next_remote_updates.len() as u64
	}

	/// Every outgoing HTLC which may still need a resolution: cross-signed ones plus any we have
	/// offered since.
	pub fn all_outgoing(&self) -> Vec<UpdateAddHtlc> {
		let mut outgoing = self.local_spec().outgoing_htlcs;
		for htlc in self.next_local_spec().outgoing_htlcs {
			if !outgoing.iter().any(|have| have.htlc_id == htlc.htlc_id) {
				outgoing.push(htlc);
			}
		}
		outgoing
	}

	/// Cross-signed incoming HTLCs whose preimage we have already revealed in a pending fulfill.
	/// If one of these expires before the host signs, we gave value away for nothing.
	pub fn revealed_fulfills(&self) -> Vec<UpdateAddHtlc> {
		let incoming = self.local_spec().incoming_htlcs;
		self.next_local_updates.iter().filter_map(|update| match update {
			UpdateMessage::FulfillHtlc(ref fulfill) =>
				incoming.iter().find(|add| add.htlc_id == fulfill.htlc_id).cloned(),
			_ => None,
		}).collect()
	}

	/// Returns this record with one more update of ours queued.
	pub fn add_local_proposal(&self, update: UpdateMessage) -> HostedCommits {
		let mut next = self.clone();
		next.next_local_updates.push(update);
		next
	}

	/// Returns this record with one more update of the host's queued.
	pub fn add_remote_proposal(&self, update: UpdateMessage) -> HostedCommits {
		let mut next = self.clone();
		next.next_remote_updates.push(update);
		next
	}

	/// The next state we would sign right now: pending updates applied, counters bumped, the
	/// given signing day, signatures cleared.
	pub fn next_local_unsigned_lcss(&self, block_day: u32) -> LastCrossSignedState {
		let spec = self.next_local_spec();
		let mut incoming_htlcs = spec.incoming_htlcs;
		let mut outgoing_htlcs = spec.outgoing_htlcs;
		incoming_htlcs.sort_by_key(|htlc| htlc.htlc_id);
		outgoing_htlcs.sort_by_key(|htlc| htlc.htlc_id);
		LastCrossSignedState {
			is_host: self.last_cross_signed_state.is_host,
			refund_script_pubkey: self.last_cross_signed_state.refund_script_pubkey.clone(),
			init_hosted_channel: self.last_cross_signed_state.init_hosted_channel,
			block_day,
			local_balance_msat: spec.to_local_msat as u64,
			remote_balance_msat: spec.to_remote_msat as u64,
			local_updates: self.next_total_local() as u32,
			remote_updates: self.next_total_remote() as u32,
			incoming_htlcs,
			outgoing_htlcs,
			remote_sig_of_local: null_signature(),
			local_sig_of_remote: null_signature(),
		}
	}

	/// Returns this record with a resize folded in: new capacity (which also lifts the in-flight
	/// cap) and the added funds credited to the host side.
	pub fn with_resize(&self, resize: &ResizeChannel) -> HostedCommits {
		let mut next = self.clone();
		let lcss = &mut next.last_cross_signed_state;
		let delta = resize.new_capacity_msat.saturating_sub(lcss.init_hosted_channel.channel_capacity_msat);
		lcss.init_hosted_channel.channel_capacity_msat = resize.new_capacity_msat;
		lcss.init_hosted_channel.max_htlc_value_in_flight_msat = resize.new_capacity_msat;
		if lcss.is_host {
			lcss.local_balance_msat += delta;
		} else {
			lcss.remote_balance_msat += delta;
		}
		next.resize_proposal = None;
		next
	}
}

impl Writeable for HostedCommits {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), ::std::io::Error> {
		SERIALIZATION_VERSION.write(w)?;
		self.remote_info.write(w)?;
		self.last_cross_signed_state.write(w)?;
		self.next_local_updates.write(w)?;
		self.next_remote_updates.write(w)?;
		// The gossip update ends in a read-to-end optional field, so it goes in as a
		// length-prefixed buffer rather than bare in the middle of the record.
		match self.channel_update {
			Some(ref update) => {
				1u8.write(w)?;
				update.encode().write(w)?;
			},
			None => 0u8.write(w)?,
		}
		self.post_error_outgoing_resolved_ids.iter().copied().collect::<Vec<u64>>().write(w)?;
		self.local_error.write(w)?;
		self.remote_error.write(w)?;
		self.resize_proposal.write(w)?;
		self.override_proposal.write(w)?;
		Ok(())
	}
}

impl Readable for HostedCommits {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let version: u8 = Readable::read(r)?;
		if version != SERIALIZATION_VERSION {
			return Err(DecodeError::UnknownVersion);
		}
		Ok(HostedCommits {
			remote_info: Readable::read(r)?,
			last_cross_signed_state: Readable::read(r)?,
			next_local_updates: Readable::read(r)?,
			next_remote_updates: Readable::read(r)?,
			channel_update: {
				match <u8 as Readable>::read(r)? {
					0 => None,
					1 => {
						let buf: Vec<u8> = Readable::read(r)?;
						Some(Readable::read(&mut ::std::io::Cursor::new(buf))?)
					},
					_ => return Err(DecodeError::InvalidValue),
				}
			},
			post_error_outgoing_resolved_ids: <Vec<u64> as Readable>::read(r)?.into_iter().collect(),
			local_error: Readable::read(r)?,
			remote_error: Readable::read(r)?,
			resize_proposal: Readable::read(r)?,
			override_proposal: Readable::read(r)?,
		})
	}
}

fn is_out_of_sync(their_block_day: u32, our_block_day: u32) -> bool {
	(their_block_day as i64 - our_block_day as i64).abs() > 1
}

/// A single hosted channel and its state machine. All methods are invoked serially per channel by
/// the [`HostedChannelManager`]; every transition is atomic with respect to the next event.
///
/// [`HostedChannelManager`]: crate::ln::channelmanager::HostedChannelManager
pub struct HostedChannel {
	phase: ChannelPhase,
	config: HostedConfig,
	remote_info: RemoteNodeInfo,
	refund_script_pubkey: Script,
	invoke_secret: Vec<u8>,
	commits: Option<HostedCommits>,
	// Our signed-but-not-yet-countersigned zero state during the open handshake.
	unsigned_open_lcss: Option<LastCrossSignedState>,
	// Expired outgoing HTLCs handed to a preimage lookup, awaiting its completion.
	rescue_adds: Vec<UpdateAddHtlc>,
	pending_events: Vec<Event>,
	secp_ctx: Secp256k1<secp256k1::All>,
}

impl HostedChannel {
	/// Creates a channel which will invite the given host once the socket is up.
	pub(crate) fn new_outbound(config: HostedConfig, remote_info: RemoteNodeInfo, refund_script_pubkey: Script, invoke_secret: Vec<u8>) -> HostedChannel {
		HostedChannel {
			phase: ChannelPhase::WaitForInit,
			config,
			remote_info,
			refund_script_pubkey,
			invoke_secret,
			commits: None,
			unsigned_open_lcss: None,
			rescue_adds: Vec::new(),
			pending_events: Vec::new(),
			secp_ctx: Secp256k1::new(),
		}
	}

	/// Revives a channel from its persisted record. It starts out sleeping and reconciles with
	/// the host through the resync handshake on next connect.
	pub(crate) fn from_commits(config: HostedConfig, commits: HostedCommits) -> HostedChannel {
		HostedChannel {
			phase: ChannelPhase::Sleeping,
			config,
			remote_info: commits.remote_info,
			refund_script_pubkey: commits.last_cross_signed_state.refund_script_pubkey.clone(),
			invoke_secret: Vec::new(),
			commits: Some(commits),
			unsigned_open_lcss: None,
			rescue_adds: Vec::new(),
			pending_events: Vec::new(),
			secp_ctx: Secp256k1::new(),
		}
	}

	pub(crate) fn channel_id(&self) -> ChannelId {
		self.remote_info.channel_id()
	}

	pub(crate) fn counterparty_node_id(&self) -> PublicKey {
		self.remote_info.node_id
	}

	pub(crate) fn phase(&self) -> ChannelPhase {
		self.phase
	}

	pub(crate) fn commits(&self) -> Option<&HostedCommits> {
		self.commits.as_ref()
	}

	pub(crate) fn get_and_clear_pending_events(&mut self) -> Vec<Event> {
		mem::replace(&mut self.pending_events, Vec::new())
	}

	fn set_phase(&mut self, new: ChannelPhase) {
		if self.phase != new {
			let old = mem::replace(&mut self.phase, new);
			self.pending_events.push(Event::StateTransition { channel_id: self.channel_id(), old, new });
		}
	}

	fn invoke_msg(&self) -> Message {
		Message::InvokeHostedChannel(InvokeHostedChannel {
			chain_hash: self.config.chain_hash,
			refund_script_pubkey: self.refund_script_pubkey.clone(),
			secret: self.invoke_secret.clone(),
		})
	}

	/// The transport to the host came up. Returns the greeting to send.
	pub(crate) fn peer_connected(&mut self) -> Vec<Message> {
		match self.phase {
			ChannelPhase::WaitForInit => {
				self.set_phase(ChannelPhase::WaitForAccept);
				vec![self.invoke_msg()]
			},
			ChannelPhase::Sleeping => {
				match self.commits.as_ref().and_then(|commits| commits.local_error.clone()) {
					Some(fail) => vec![Message::Fail(fail)],
					None => vec![self.invoke_msg()],
				}
			},
			_ => Vec::new(),
		}
	}

	/// The transport to the host went down.
	pub(crate) fn peer_disconnected(&mut self) {
		match self.phase {
			ChannelPhase::WaitForAccept | ChannelPhase::WaitRemoteStateUpdate if self.commits.is_none() => {
				self.unsigned_open_lcss = None;
				self.set_phase(ChannelPhase::WaitForInit);
			},
			ChannelPhase::WaitForAccept | ChannelPhase::WaitRemoteStateUpdate | ChannelPhase::Open => {
				self.set_phase(ChannelPhase::Sleeping);
			},
			_ => {},
		}
	}

	/// The host proposed parameters for a fresh channel: validate them, sign the zero state and
	/// send our half of the countersignature.
	pub(crate) fn handle_init_hosted_channel<S: NodeSigner>(&mut self, msg: &InitHostedChannel, block_day: u32, signer: &S) -> Result<Vec<Message>, ChannelError> {
		if self.phase != ChannelPhase::WaitForAccept {
			return Err(ChannelError::Ignore(format!("got init_hosted_channel in phase {}", self.phase)));
		}
		let limits = &self.config.limits;
		if msg.initial_client_balance_msat > msg.channel_capacity_msat {
			return Err(ChannelError::Disconnect("host offered an initial balance above the channel capacity".to_owned()));
		}
		if msg.max_htlc_value_in_flight_msat < limits.min_max_htlc_value_in_flight_msat {
			return Err(ChannelError::Disconnect(format!("host allows only {} msat in flight, our floor is {}", msg.max_htlc_value_in_flight_msat, limits.min_max_htlc_value_in_flight_msat)));
		}
		if msg.htlc_minimum_msat > limits.max_htlc_minimum_msat {
			return Err(ChannelError::Disconnect(format!("host requires HTLCs of at least {} msat, our ceiling is {}", msg.htlc_minimum_msat, limits.max_htlc_minimum_msat)));
		}
		if msg.max_accepted_htlcs < limits.min_max_accepted_htlcs {
			return Err(ChannelError::Disconnect(format!("host accepts only {} concurrent HTLCs", msg.max_accepted_htlcs)));
		}
		let zero_state = LastCrossSignedState {
			is_host: false,
			refund_script_pubkey: self.refund_script_pubkey.clone(),
			init_hosted_channel: *msg,
			block_day,
			local_balance_msat: msg.initial_client_balance_msat,
			remote_balance_msat: msg.channel_capacity_msat - msg.initial_client_balance_msat,
			local_updates: 0,
			remote_updates: 0,
			incoming_htlcs: Vec::new(),
			outgoing_htlcs: Vec::new(),
			remote_sig_of_local: null_signature(),
			local_sig_of_remote: null_signature(),
		}.with_local_sig_of_remote(signer, &self.remote_info.node_id);
		let state_update = zero_state.state_update();
		self.unsigned_open_lcss = Some(zero_state);
		self.set_phase(ChannelPhase::WaitRemoteStateUpdate);
		Ok(vec![Message::StateUpdate(state_update)])
	}

	/// A state_update from the host: either the countersignature completing the open handshake,
	/// or a signature over the next state of a live channel.
	pub(crate) fn handle_state_update<S: NodeSigner>(&mut self, msg: &StateUpdate, block_day: u32, signer: &S) -> Result<Vec<Message>, ChannelError> {
		match self.phase {
			ChannelPhase::WaitRemoteStateUpdate => {
				let unsigned = match self.unsigned_open_lcss.take() {
					Some(state) => state,
					None => return Err(ChannelError::Ignore("state_update with no open in progress".to_owned())),
				};
				if is_out_of_sync(msg.block_day, block_day) {
					return Err(ChannelError::Disconnect(format!("host signed opening state on day {}, ours is {}", msg.block_day, block_day)));
				}
				if msg.local_updates != 0 || msg.remote_updates != 0 {
					return Err(ChannelError::Disconnect("host's opening state_update carries nonzero update counters".to_owned()));
				}
				let mut state = unsigned;
				state.block_day = msg.block_day;
				let mut state = state.with_local_sig_of_remote(signer, &self.remote_info.node_id);
				state.remote_sig_of_local = msg.local_sig_of_remote_lcss;
				if !state.verify_remote_sig(&self.secp_ctx, &self.remote_info.node_id) {
					return Err(ChannelError::Disconnect("host's signature over the opening state is invalid".to_owned()));
				}
				let commits = HostedCommits::restore(self.remote_info, state);
				let channel_id = commits.channel_id();
				self.commits = Some(commits);
				self.set_phase(ChannelPhase::Open);
				Ok(vec![Message::AskBrandingInfo(AskBrandingInfo { channel_id })])
			},
			ChannelPhase::Open => self.attempt_state_update(msg, block_day, signer),
			_ => Err(ChannelError::Ignore(format!("got state_update in phase {}", self.phase))),
		}
	}

	fn attempt_state_update<S: NodeSigner>(&mut self, msg: &StateUpdate, block_day: u32, signer: &S) -> Result<Vec<Message>, ChannelError> {
		let base = match self.commits.clone() {
			Some(commits) => commits,
			None => return Err(ChannelError::Ignore("state_update before any cross-signed state".to_owned())),
		};
		if base.error().is_some() {
			return Err(ChannelError::Ignore("state_update while suspended".to_owned()));
		}
		if base.last_cross_signed_state.remote_sig_of_local == msg.local_sig_of_remote_lcss {
			return Err(ChannelError::Ignore("duplicate state_update".to_owned()));
		}
		if is_out_of_sync(msg.block_day, block_day) {
			return Err(ChannelError::Disconnect(format!("host signed on day {}, ours is {}", msg.block_day, block_day)));
		}
		if (msg.remote_updates as u64) < base.next_total_local() {
			// The host has not yet accounted for everything we sent. Keep our state as-is and
			// announce our signature again; its next reply will cover the full queue.
			return Ok(self.sign_pending_updates(block_day, signer).into_iter().collect());
		}
		let mut candidates = vec![base.clone()];
		if let Some(ref resize) = base.resize_proposal {
			candidates.push(base.with_resize(resize));
		}
		for candidate in candidates {
			let mut next_state = candidate.next_local_unsigned_lcss(msg.block_day)
				.with_local_sig_of_remote(signer, &self.remote_info.node_id);
			next_state.remote_sig_of_local = msg.local_sig_of_remote_lcss;
			if !next_state.verify_remote_sig(&self.secp_ctx, &self.remote_info.node_id) {
				continue;
			}
			let reply = next_state.state_update();
			let outgoing_before = candidate.all_outgoing();
			for update in candidate.next_remote_updates.iter() {
				let fail = match update {
					UpdateMessage::FailHtlc(ref fail) => RemoteFailure::Fail(fail.clone()),
					UpdateMessage::FailMalformedHtlc(ref fail) => RemoteFailure::Malformed(*fail),
					_ => continue,
				};
				if let Some(add) = outgoing_before.iter().find(|add| add.htlc_id == update.htlc_id()) {
					self.pending_events.push(Event::AddRejectedRemotely { add: add.clone(), fail });
				}
			}
			let mut promoted = candidate;
			promoted.last_cross_signed_state = next_state;
			promoted.next_local_updates.clear();
			promoted.next_remote_updates.clear();
			self.commits = Some(promoted);
			self.pending_events.push(Event::StateUpdated { channel_id: self.channel_id() });
			return Ok(vec![Message::StateUpdate(reply)]);
		}
		Err(ChannelError::Suspend(ERR_HOSTED_WRONG_REMOTE_SIG, "host's signature over the next state is invalid".to_owned()))
	}

	/// Our signature over everything currently pending, to be sent whenever we want the host to
	/// countersign. Does not change any state; state only moves when the host's reply arrives.
	pub(crate) fn sign_pending_updates<S: NodeSigner>(&self, block_day: u32, signer: &S) -> Option<Message> {
		let commits = self.commits.as_ref()?;
		if commits.error().is_some() {
			return None;
		}
		if commits.next_local_updates.is_empty() && commits.resize_proposal.is_none() {
			return None;
		}
		let effective = match commits.resize_proposal {
			Some(ref resize) => commits.with_resize(resize),
			None => commits.clone(),
		};
		let next_state = effective.next_local_unsigned_lcss(block_day)
			.with_local_sig_of_remote(signer, &self.remote_info.node_id);
		Some(Message::StateUpdate(next_state.state_update()))
	}

	/// Offers an HTLC to the host, validated against the projected next state, and immediately
	/// asks for a signature over it.
	pub(crate) fn send_htlc<S: NodeSigner>(
		&mut self, amount_msat: u64, payment_hash: PaymentHash, cltv_expiry: u32, onion_routing_packet: OnionPacket,
		best_block_height: u32, block_day: u32, signer: &S,
	) -> Result<Vec<Message>, LocalFailure> {
		let commits = match self.commits {
			Some(ref commits) if self.phase == ChannelPhase::Open && commits.error().is_none() => commits,
			_ => return Err(LocalFailure::ChannelNotAbleToSend),
		};
		let params = &commits.last_cross_signed_state.init_hosted_channel;
		if amount_msat < params.htlc_minimum_msat {
			return Err(LocalFailure::AmountBelowMinimum);
		}
		if cltv_expiry <= best_block_height + self.config.cltv_safety_delta {
			return Err(LocalFailure::ExpiryTooSoon);
		}
		let add = UpdateAddHtlc {
			channel_id: self.channel_id(),
			htlc_id: commits.next_total_local() + 1,
			amount_msat,
			payment_hash,
			cltv_expiry,
			onion_routing_packet,
		};
		let next = commits.add_local_proposal(UpdateMessage::AddHtlc(add.clone()));
		let spec = next.next_local_spec();
		if spec.outgoing_htlcs.len() > params.max_accepted_htlcs as usize {
			return Err(LocalFailure::TooManyInFlightHtlcs);
		}
		if spec.outgoing_amount_msat() > params.max_htlc_value_in_flight_msat {
			return Err(LocalFailure::ExceedsMaxInFlightValue);
		}
		if spec.to_local_msat < 0 {
			return Err(LocalFailure::InsufficientBalance);
		}
		self.commits = Some(next);
		let sign = self.sign_pending_updates(block_day, signer)
			.expect("a just-queued update is always signable");
		Ok(vec![Message::UpdateAddHtlc(add), sign])
	}

	/// Settles an incoming HTLC with its preimage. Deliberately allowed while suspended and while
	/// sleeping: the preimage is value and must always be sendable.
	pub(crate) fn fulfill_htlc(&mut self, htlc_id: u64, payment_preimage: PaymentPreimage) -> Result<Vec<Message>, APIError> {
		let commits = match self.commits {
			Some(ref commits) => commits,
			None => return Err(APIError::ChannelUnavailable { err: "no channel state yet".to_owned() }),
		};
		let spec = commits.next_local_spec();
		match spec.incoming_htlcs.iter().find(|add| add.htlc_id == htlc_id) {
			Some(add) if payment_preimage.payment_hash() == add.payment_hash => {
				let fulfill = UpdateFulfillHtlc { channel_id: self.channel_id(), htlc_id, payment_preimage };
				self.commits = Some(commits.add_local_proposal(UpdateMessage::FulfillHtlc(fulfill)));
				Ok(vec![Message::UpdateFulfillHtlc(fulfill)])
			},
			Some(_) => Err(APIError::APIMisuseError { err: format!("preimage does not match the payment hash of HTLC {}", htlc_id) }),
			None => Err(APIError::ChannelUnavailable { err: format!("no incoming HTLC with id {}", htlc_id) }),
		}
	}

	/// Fails an incoming HTLC back to the host. Unlike fulfills, failures are not processed on a
	/// suspended channel.
	pub(crate) fn fail_htlc(&mut self, htlc_id: u64, reason: Vec<u8>) -> Result<Vec<Message>, APIError> {
		let fail = UpdateFailHtlc { channel_id: self.channel_id(), htlc_id, reason };
		self.queue_local_fail(htlc_id, UpdateMessage::FailHtlc(fail.clone()))?;
		Ok(vec![Message::UpdateFailHtlc(fail)])
	}

	/// Fails an incoming HTLC blaming its onion.
	pub(crate) fn fail_malformed_htlc(&mut self, htlc_id: u64, sha256_of_onion: [u8; 32], failure_code: u16) -> Result<Vec<Message>, APIError> {
		if failure_code & BADONION == 0 {
			return Err(APIError::APIMisuseError { err: "failure_code must carry the BADONION bit".to_owned() });
		}
		let fail = UpdateFailMalformedHtlc { channel_id: self.channel_id(), htlc_id, sha256_of_onion, failure_code };
		self.queue_local_fail(htlc_id, UpdateMessage::FailMalformedHtlc(fail))?;
		Ok(vec![Message::UpdateFailMalformedHtlc(fail)])
	}

	fn queue_local_fail(&mut self, htlc_id: u64, update: UpdateMessage) -> Result<(), APIError> {
		let commits = match self.commits {
			Some(ref commits) if self.phase == ChannelPhase::Open && commits.error().is_none() => commits,
			_ => return Err(APIError::ChannelUnavailable { err: "channel cannot fail HTLCs right now".to_owned() }),
		};
		if !commits.next_local_spec().incoming_htlcs.iter().any(|add| add.htlc_id == htlc_id) {
			return Err(APIError::ChannelUnavailable { err: format!("no incoming HTLC with id {}", htlc_id) });
		}
		self.commits = Some(commits.add_local_proposal(update));
		Ok(())
	}

	/// The host offered us an HTLC.
	pub(crate) fn handle_update_add_htlc(&mut self, msg: &UpdateAddHtlc) -> Result<Vec<Message>, ChannelError> {
		let commits = match self.commits {
			Some(ref commits) if self.phase == ChannelPhase::Open => commits,
			_ => return Err(ChannelError::Ignore(format!("got update_add_htlc in phase {}", self.phase))),
		};
		if commits.error().is_some() {
			return Err(ChannelError::Ignore("update_add_htlc while suspended".to_owned()));
		}
		if msg.htlc_id != commits.next_total_remote() + 1 {
			return Err(ChannelError::Suspend(ERR_HOSTED_MANUAL_SUSPEND, format!("unexpected htlc id {}, wanted {}", msg.htlc_id, commits.next_total_remote() + 1)));
		}
		if msg.amount_msat < commits.last_cross_signed_state.init_hosted_channel.htlc_minimum_msat {
			return Err(ChannelError::Suspend(ERR_HOSTED_MANUAL_SUSPEND, format!("htlc below minimum: {} msat", msg.amount_msat)));
		}
		let next = commits.add_remote_proposal(UpdateMessage::AddHtlc(msg.clone()));
		let spec = next.next_local_spec();
		let params = &next.last_cross_signed_state.init_hosted_channel;
		if spec.to_remote_msat < 0 {
			return Err(ChannelError::Suspend(ERR_HOSTED_MANUAL_SUSPEND, "host overspent its balance".to_owned()));
		}
		if spec.incoming_htlcs.len() > params.max_accepted_htlcs as usize {
			return Err(ChannelError::Suspend(ERR_HOSTED_MANUAL_SUSPEND, "too many incoming HTLCs".to_owned()));
		}
		if spec.incoming_amount_msat() > params.max_htlc_value_in_flight_msat {
			return Err(ChannelError::Suspend(ERR_HOSTED_MANUAL_SUSPEND, "incoming HTLC value exceeds in-flight maximum".to_owned()));
		}
		self.commits = Some(next);
		self.pending_events.push(Event::AddReceived {
			add: UpdateAddHtlcExt { add: msg.clone(), remote_info: self.remote_info },
		});
		Ok(Vec::new())
	}

	/// The host settled one of our HTLCs with its preimage. Accepted while sleeping and even
	/// while suspended; on a suspended channel the id is remembered so the settlement is not
	/// double-handled later.
	pub(crate) fn handle_update_fulfill_htlc(&mut self, msg: &UpdateFulfillHtlc) -> Result<Vec<Message>, ChannelError> {
		let commits = match self.commits {
			Some(ref commits) if self.phase == ChannelPhase::Open || self.phase == ChannelPhase::Sleeping => commits,
			_ => return Err(ChannelError::Ignore(format!("got update_fulfill_htlc in phase {}", self.phase))),
		};
		let our_add = match commits.all_outgoing().into_iter().find(|add| add.htlc_id == msg.htlc_id) {
			Some(add) => add,
			None => return Err(ChannelError::Suspend(ERR_HOSTED_MANUAL_SUSPEND, format!("fulfill for unknown htlc id {}", msg.htlc_id))),
		};
		if msg.payment_preimage.payment_hash() != our_add.payment_hash {
			return Err(ChannelError::Suspend(ERR_HOSTED_MANUAL_SUSPEND, format!("preimage does not match hash of htlc {}", msg.htlc_id)));
		}
		if commits.error().is_some() {
			if !commits.post_error_outgoing_resolved_ids.contains(&msg.htlc_id) {
				let mut next = commits.add_remote_proposal(UpdateMessage::FulfillHtlc(*msg));
				next.post_error_outgoing_resolved_ids.insert(msg.htlc_id);
				self.commits = Some(next);
			}
		} else {
			self.commits = Some(commits.add_remote_proposal(UpdateMessage::FulfillHtlc(*msg)));
		}
		self.pending_events.push(Event::FulfillReceived {
			fulfill: RemoteFulfill { our_add, preimage: msg.payment_preimage },
		});
		Ok(Vec::new())
	}

	/// The host failed one of our HTLCs. Only valid against a cross-signed HTLC: failing an add
	/// we have not signed yet is a race, resolved by reconnecting.
	pub(crate) fn handle_update_fail_htlc(&mut self, msg: &UpdateFailHtlc) -> Result<Vec<Message>, ChannelError> {
		self.receive_remote_fail(msg.htlc_id, UpdateMessage::FailHtlc(msg.clone()))
	}

	/// Like [`handle_update_fail_htlc`](Self::handle_update_fail_htlc), but blaming the onion.
	pub(crate) fn handle_update_fail_malformed_htlc(&mut self, msg: &UpdateFailMalformedHtlc) -> Result<Vec<Message>, ChannelError> {
		if msg.failure_code & BADONION == 0 {
			return Err(ChannelError::Suspend(ERR_HOSTED_MANUAL_SUSPEND, "update_fail_malformed_htlc without BADONION".to_owned()));
		}
		self.receive_remote_fail(msg.htlc_id, UpdateMessage::FailMalformedHtlc(*msg))
	}

	fn receive_remote_fail(&mut self, htlc_id: u64, update: UpdateMessage) -> Result<Vec<Message>, ChannelError> {
		let commits = match self.commits {
			Some(ref commits) if self.phase == ChannelPhase::Open => commits,
			_ => return Err(ChannelError::Ignore(format!("got htlc failure in phase {}", self.phase))),
		};
		if commits.error().is_some() {
			return Err(ChannelError::Ignore("htlc failure while suspended".to_owned()));
		}
		if commits.post_error_outgoing_resolved_ids.contains(&htlc_id) {
			return Err(ChannelError::Suspend(ERR_HOSTED_MANUAL_SUSPEND, format!("failure for already-resolved htlc id {}", htlc_id)));
		}
		if commits.local_spec().outgoing_htlcs.iter().any(|add| add.htlc_id == htlc_id) {
			self.commits = Some(commits.add_remote_proposal(update));
			return Ok(Vec::new());
		}
		if commits.next_local_spec().outgoing_htlcs.iter().any(|add| add.htlc_id == htlc_id) {
			return Err(ChannelError::Disconnect(format!("host failed htlc id {} before signing it", htlc_id)));
		}
		Err(ChannelError::Suspend(ERR_HOSTED_MANUAL_SUSPEND, format!("failure for unknown htlc id {}", htlc_id)))
	}

	/// The host sent its current cross-signed state: a restore while we were opening, or the
	/// start of the reconnect resync while sleeping. No signing happens here; both signatures of
	/// any adopted state come from the exchanged messages themselves.
	pub(crate) fn handle_last_cross_signed_state(&mut self, msg: &LastCrossSignedState) -> Result<Vec<Message>, ChannelError> {
		match self.phase {
			ChannelPhase::WaitForAccept => {
				// The host already knows us; adopt its state in place of a fresh open.
				let is_local_sig_ok = msg.verify_remote_sig(&self.secp_ctx, &self.remote_info.node_specific_pubkey);
				let is_remote_sig_ok = msg.reverse().verify_remote_sig(&self.secp_ctx, &self.remote_info.node_id);
				let commits = HostedCommits::restore(self.remote_info, msg.reverse());
				self.commits = Some(commits);
				if !is_remote_sig_ok {
					return Err(ChannelError::Suspend(ERR_HOSTED_WRONG_REMOTE_SIG, "restored state carries an invalid host signature".to_owned()));
				}
				if !is_local_sig_ok {
					return Err(ChannelError::Suspend(ERR_HOSTED_WRONG_LOCAL_SIG, "restored state carries an invalid signature of ours".to_owned()));
				}
				self.unsigned_open_lcss = None;
				self.set_phase(ChannelPhase::Open);
				let our_state = self.commits.as_ref().map(|commits| commits.last_cross_signed_state.clone());
				Ok(our_state.into_iter().map(Message::LastCrossSignedState).collect())
			},
			ChannelPhase::Sleeping => self.attempt_init_resync(msg),
			_ => Err(ChannelError::Ignore(format!("got last_cross_signed_state in phase {}", self.phase))),
		}
	}

	fn attempt_init_resync(&mut self, remote_state: &LastCrossSignedState) -> Result<Vec<Message>, ChannelError> {
		let mut commits = match self.commits.clone() {
			Some(commits) => commits,
			None => return Err(ChannelError::Ignore("resync without local state".to_owned())),
		};
		// The host may already have applied a resize we proposed before losing the connection.
		if let Some(resize) = commits.resize_proposal.clone() {
			if resize.new_capacity_msat == remote_state.init_hosted_channel.channel_capacity_msat {
				commits = commits.with_resize(&resize);
				self.commits = Some(commits.clone());
			}
		}
		let is_local_sig_ok = remote_state.verify_remote_sig(&self.secp_ctx, &self.remote_info.node_specific_pubkey);
		let is_remote_sig_ok = remote_state.reverse().verify_remote_sig(&self.secp_ctx, &self.remote_info.node_id);
		if !is_remote_sig_ok {
			return Err(ChannelError::Suspend(ERR_HOSTED_WRONG_REMOTE_SIG, "resync state carries an invalid host signature".to_owned()));
		}
		if !is_local_sig_ok {
			return Err(ChannelError::Suspend(ERR_HOSTED_WRONG_LOCAL_SIG, "resync state carries an invalid signature of ours".to_owned()));
		}
		let local_state = &commits.last_cross_signed_state;
		if local_state.is_even_with(remote_state) || local_state.is_ahead_of(remote_state) {
			// The host is at or behind our state: replay what it is missing and let it catch up.
			let mut msgs = vec![Message::LastCrossSignedState(local_state.clone())];
			if let Some(resize) = commits.resize_proposal {
				msgs.push(Message::ResizeChannel(resize));
			}
			for update in commits.next_local_updates.iter() {
				msgs.push(update_to_message(update));
			}
			commits.next_remote_updates.clear();
			self.commits = Some(commits);
			self.set_phase(ChannelPhase::Open);
			return Ok(msgs);
		}

		// We are behind: reconstruct the state the host signed from our pending queues.
		let local_acked = (remote_state.remote_updates as u64).saturating_sub(local_state.local_updates as u64) as usize;
		let remote_acked = (remote_state.local_updates as u64).saturating_sub(local_state.remote_updates as u64) as usize;
		let take_local = ::std::cmp::min(local_acked, commits.next_local_updates.len());
		let take_remote = ::std::cmp::min(remote_acked, commits.next_remote_updates.len());
		let local_leftover = commits.next_local_updates.split_off(take_local);
		commits.next_remote_updates.truncate(take_remote);

		let mut synced_state = commits.next_local_unsigned_lcss(remote_state.block_day);
		synced_state.local_sig_of_remote = remote_state.remote_sig_of_local;
		synced_state.remote_sig_of_local = remote_state.local_sig_of_remote;

		if synced_state.reverse() == *remote_state {
			// We fell behind a little but have all the data required to catch up.
			commits.last_cross_signed_state = synced_state.clone();
			commits.next_local_updates = local_leftover.clone();
			commits.next_remote_updates = Vec::new();
			let mut msgs = vec![Message::LastCrossSignedState(synced_state)];
			if let Some(resize) = commits.resize_proposal {
				msgs.push(Message::ResizeChannel(resize));
			}
			for update in local_leftover.iter() {
				msgs.push(update_to_message(update));
			}
			self.commits = Some(commits);
			self.set_phase(ChannelPhase::Open);
			self.pending_events.push(Event::StateUpdated { channel_id: self.channel_id() });
			return Ok(msgs);
		}

		// We are too far behind to reconstruct anything: the host's state is the channel now.
		// Anything we thought was in flight but the host no longer carries is gone.
		let adopted = remote_state.reverse();
		let old_outgoing = self.commits.as_ref().map(|commits| commits.all_outgoing()).unwrap_or_default();
		for add in old_outgoing {
			if !adopted.outgoing_htlcs.iter().any(|kept| kept.htlc_id == add.htlc_id) {
				self.pending_events.push(Event::AddRejectedLocally { add, reason: LocalFailure::InPrincipleNotSendable });
			}
		}
		let restored = HostedCommits::restore(self.remote_info, adopted.clone());
		self.commits = Some(restored);
		self.set_phase(ChannelPhase::Open);
		self.pending_events.push(Event::StateUpdated { channel_id: self.channel_id() });
		Ok(vec![Message::LastCrossSignedState(adopted)])
	}

	/// The host echoed a resize proposal back at us. This happens when we proposed one, lost our
	/// data, and restored from the host's copy; the signature proves it was really ours.
	pub(crate) fn handle_resize_channel(&mut self, msg: &ResizeChannel) -> Result<Vec<Message>, ChannelError> {
		let commits = match self.commits {
			Some(ref commits) if self.phase == ChannelPhase::Open || self.phase == ChannelPhase::Sleeping => commits,
			_ => return Err(ChannelError::Ignore(format!("got resize_channel in phase {}", self.phase))),
		};
		if msg.verify_client_sig(&self.secp_ctx, &self.remote_info.node_specific_pubkey) {
			let mut next = commits.clone();
			next.resize_proposal = Some(*msg);
			self.commits = Some(next);
			Ok(Vec::new())
		} else {
			Err(ChannelError::Suspend(ERR_HOSTED_INVALID_RESIZE, "resize proposal signature is not ours".to_owned()))
		}
	}

	/// Proposes a capacity increase to the host and immediately asks for a signature folding it
	/// into the next state.
	pub(crate) fn propose_resize<S: NodeSigner>(&mut self, delta_msat: u64, block_day: u32, signer: &S) -> Result<Vec<Message>, APIError> {
		let commits = match self.commits {
			Some(ref commits) if self.phase == ChannelPhase::Open && commits.error().is_none() => commits,
			_ => return Err(APIError::ChannelUnavailable { err: "channel cannot be resized right now".to_owned() }),
		};
		if commits.resize_proposal.is_some() {
			return Err(APIError::APIMisuseError { err: "a resize proposal is already pending".to_owned() });
		}
		let new_capacity_msat = match commits.last_cross_signed_state.init_hosted_channel.channel_capacity_msat.checked_add(delta_msat) {
			Some(capacity) => capacity,
			None => return Err(APIError::APIMisuseError { err: "resize overflows capacity".to_owned() }),
		};
		let resize = ResizeChannel::sign(new_capacity_msat, signer, &self.remote_info.node_id);
		let mut next = commits.clone();
		next.resize_proposal = Some(resize);
		self.commits = Some(next);
		let sign = self.sign_pending_updates(block_day, signer)
			.expect("a pending resize is always signable");
		Ok(vec![Message::ResizeChannel(resize), sign])
	}

	/// The host proposed a forced reset. Stored for the user to inspect; nothing is applied.
	pub(crate) fn handle_state_override(&mut self, msg: &StateOverride) -> Result<Vec<Message>, ChannelError> {
		let commits = match self.commits {
			Some(ref commits) if self.phase == ChannelPhase::Open || self.phase == ChannelPhase::Sleeping => commits,
			_ => return Err(ChannelError::Ignore(format!("got state_override in phase {}", self.phase))),
		};
		if commits.error().is_none() {
			return Err(ChannelError::Ignore("state_override on a healthy channel".to_owned()));
		}
		let mut next = commits.clone();
		next.override_proposal = Some(*msg);
		self.commits = Some(next);
		self.pending_events.push(Event::OverrideProposed { channel_id: self.channel_id(), proposal: *msg });
		Ok(Vec::new())
	}

	/// Accepts the host's pending override: a clean state with no HTLCs and whatever balance the
	/// host dictated. Anything of ours that was in flight is written off.
	pub(crate) fn accept_override<S: NodeSigner>(&mut self, signer: &S) -> Result<Vec<Message>, APIError> {
		let commits = match self.commits {
			Some(ref commits) => commits,
			None => return Err(APIError::ChannelUnavailable { err: "no channel state yet".to_owned() }),
		};
		let proposal = match commits.override_proposal {
			Some(proposal) => proposal,
			None => return Err(APIError::OverrideRejected { err: "no override proposal to accept".to_owned() }),
		};
		let local_state = &commits.last_cross_signed_state;
		let params = local_state.init_hosted_channel;
		let new_local_balance_msat = match params.channel_capacity_msat.checked_sub(proposal.local_balance_msat) {
			Some(balance) => balance,
			None => return Err(APIError::OverrideRejected { err: "Override impossible: new local balance is larger than capacity".to_owned() }),
		};
		if proposal.local_updates < local_state.remote_updates {
			return Err(APIError::OverrideRejected { err: "Override impossible: new local update number from remote host is wrong".to_owned() });
		}
		if proposal.remote_updates < local_state.local_updates {
			return Err(APIError::OverrideRejected { err: "Override impossible: new remote update number from remote host is wrong".to_owned() });
		}
		if proposal.block_day < local_state.block_day {
			return Err(APIError::OverrideRejected { err: "Override impossible: new override block day from remote host is wrong".to_owned() });
		}
		let mut complete_state = LastCrossSignedState {
			is_host: false,
			refund_script_pubkey: local_state.refund_script_pubkey.clone(),
			init_hosted_channel: params,
			block_day: proposal.block_day,
			local_balance_msat: new_local_balance_msat,
			remote_balance_msat: proposal.local_balance_msat,
			local_updates: proposal.remote_updates,
			remote_updates: proposal.local_updates,
			incoming_htlcs: Vec::new(),
			outgoing_htlcs: Vec::new(),
			remote_sig_of_local: null_signature(),
			local_sig_of_remote: null_signature(),
		}.with_local_sig_of_remote(signer, &self.remote_info.node_id);
		complete_state.remote_sig_of_local = proposal.local_sig_of_remote_lcss;
		if !complete_state.verify_remote_sig(&self.secp_ctx, &self.remote_info.node_id) {
			return Err(APIError::OverrideRejected { err: "Override impossible: new remote signature is wrong".to_owned() });
		}
		for add in commits.all_outgoing() {
			self.pending_events.push(Event::AddRejectedLocally { add, reason: LocalFailure::InPrincipleNotSendable });
		}
		let reply = complete_state.state_update();
		self.commits = Some(HostedCommits::restore(self.remote_info, complete_state));
		self.rescue_adds.clear();
		self.set_phase(ChannelPhase::Open);
		self.pending_events.push(Event::StateUpdated { channel_id: self.channel_id() });
		Ok(vec![Message::StateUpdate(reply)])
	}

	/// A new chain tip. Times out what expired, and flags the dangerous case: an incoming HTLC
	/// whose preimage we revealed going past its expiry means we gave value without being paid.
	pub(crate) fn best_block_updated(&mut self, height: u32) -> BlockActions {
		let mut actions = BlockActions::default();
		let commits = match self.commits {
			Some(ref commits) if self.phase == ChannelPhase::Open || self.phase == ChannelPhase::Sleeping => commits,
			_ => return actions,
		};
		if commits.revealed_fulfills().iter().any(|add| height > add.cltv_expiry) {
			actions.suspend_code = Some(ERR_HOSTED_MANUAL_SUSPEND);
		}
		let sent_expired: Vec<UpdateAddHtlc> = commits.all_outgoing().into_iter()
			.filter(|add| height > add.cltv_expiry).collect();
		if !sent_expired.is_empty() {
			actions.preimage_request = Some(sent_expired.iter().map(|add| add.payment_hash).collect());
			self.rescue_adds = sent_expired;
		}
		actions
	}

	/// Completion of the on-chain preimage lookup started by
	/// [`best_block_updated`](Self::best_block_updated). Expired HTLCs whose preimage surfaced
	/// settle as fulfills; the rest are written off. Either way the channel suspends, since an
	/// expired outgoing HTLC means the host stopped doing its job.
	pub(crate) fn preimages_checked(&mut self, found: &HashMap<PaymentHash, PaymentPreimage>) -> BlockActions {
		let mut actions = BlockActions::default();
		if self.rescue_adds.is_empty() || self.commits.is_none() {
			return actions;
		}
		let rescue_adds = mem::replace(&mut self.rescue_adds, Vec::new());
		let mut commits = self.commits.clone().expect("checked above");
		for add in rescue_adds {
			commits.post_error_outgoing_resolved_ids.insert(add.htlc_id);
			match found.get(&add.payment_hash) {
				Some(preimage) => self.pending_events.push(Event::FulfillReceived {
					fulfill: RemoteFulfill { our_add: add, preimage: *preimage },
				}),
				None => self.pending_events.push(Event::AddRejectedLocally {
					add, reason: LocalFailure::InPrincipleNotSendable,
				}),
			}
		}
		self.commits = Some(commits);
		actions.suspend_code = Some(ERR_HOSTED_TIMED_OUT_OUTGOING_HTLC);
		actions
	}

	/// Suspends the channel with the given wire code, returning the fail message to send. A
	/// second suspension is a no-op.
	pub(crate) fn local_suspend(&mut self, code: &'static str) -> Option<Fail> {
		let channel_id = self.channel_id();
		let commits = self.commits.as_mut()?;
		if commits.local_error.is_some() {
			return None;
		}
		let fail = Fail::from_code(channel_id, code);
		commits.local_error = Some(fail.clone());
		self.pending_events.push(Event::ChannelSuspended {
			channel_id, by_remote: false, description: fail.description(),
		});
		Some(fail)
	}

	/// The host failed the channel. The channel stays around, errored, so a later override can
	/// still recover the balance.
	pub(crate) fn handle_remote_fail(&mut self, msg: &Fail) -> Result<Vec<Message>, ChannelError> {
		let channel_id = self.channel_id();
		if self.commits.is_none() {
			return Err(ChannelError::Disconnect(format!("host refused the channel: {}", msg.description())));
		}
		{
			let commits = self.commits.as_mut().expect("checked above");
			if commits.remote_error.is_none() {
				commits.remote_error = Some(msg.clone());
			}
		}
		match self.phase {
			ChannelPhase::WaitForAccept | ChannelPhase::WaitRemoteStateUpdate | ChannelPhase::Open => {
				self.set_phase(ChannelPhase::Open);
			},
			_ => {},
		}
		self.pending_events.push(Event::ChannelSuspended {
			channel_id, by_remote: true, description: msg.description(),
		});
		Ok(Vec::new())
	}

	/// Gossip from the host about this channel, kept for routing hints.
	pub(crate) fn handle_channel_update(&mut self, msg: &ChannelUpdate) -> Result<Vec<Message>, ChannelError> {
		match self.commits {
			Some(ref mut commits) => {
				commits.channel_update = Some(msg.clone());
				Ok(Vec::new())
			},
			None => Err(ChannelError::Ignore("channel_update before any state".to_owned())),
		}
	}
}

fn update_to_message(update: &UpdateMessage) -> Message {
	match update {
		UpdateMessage::AddHtlc(ref msg) => Message::UpdateAddHtlc(msg.clone()),
		UpdateMessage::FulfillHtlc(ref msg) => Message::UpdateFulfillHtlc(*msg),
		UpdateMessage::FailHtlc(ref msg) => Message::UpdateFailHtlc(msg.clone()),
		UpdateMessage::FailMalformedHtlc(ref msg) => Message::UpdateFailMalformedHtlc(*msg),
	}
}
