// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Events are returned from various bits in the library which indicate some action must be taken
//! by the client.
//!
//! Because we don't have a built-in runtime, it's up to the client to poll
//! [`get_and_clear_pending_events`] and drive payment resolution, and to pull
//! [`MessageSendEvent`]s off and hand them to its peer transport.
//!
//! [`get_and_clear_pending_events`]: EventsProvider::get_and_clear_pending_events

use bitcoin::secp256k1::PublicKey;

use crate::ln::channel::ChannelPhase;
use crate::ln::msgs;
use crate::ln::types::{ChannelId, PaymentPreimage, RemoteNodeInfo};
use crate::ln::wire;

/// An incoming HTLC together with the identity of the host that relayed it, which payment
/// resolution logic needs to fail or fulfill it later.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateAddHtlcExt {
	/// The HTLC itself.
	pub add: msgs::UpdateAddHtlc,
	/// The host it arrived over.
	pub remote_info: RemoteNodeInfo,
}

/// A preimage obtained for an HTLC we sent, either from the peer directly or rescued from an
/// on-chain preimage lookup after expiry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFulfill {
	/// Our original HTLC offer.
	pub our_add: msgs::UpdateAddHtlc,
	/// The preimage that settles it.
	pub preimage: PaymentPreimage,
}

/// Why an outgoing HTLC was refused or abandoned without ever being offered to (or settled by)
/// the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalFailure {
	/// The channel cannot currently send at all: not open, or suspended on an error.
	ChannelNotAbleToSend,
	/// The HTLC was in flight but its fate can no longer be settled through this channel (lost
	/// in an override or resync, or timed out without an on-chain preimage).
	InPrincipleNotSendable,
	/// The amount is below the host's HTLC minimum.
	AmountBelowMinimum,
	/// The expiry is too close to the current tip.
	ExpiryTooSoon,
	/// The channel already carries the maximum number of in-flight HTLCs.
	TooManyInFlightHtlcs,
	/// Total in-flight value would exceed what the host allows.
	ExceedsMaxInFlightValue,
	/// Our projected balance would go negative.
	InsufficientBalance,
}

/// The peer's rejection of an HTLC we offered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteFailure {
	/// An update_fail_htlc with an encrypted reason to relay back.
	Fail(msgs::UpdateFailHtlc),
	/// An update_fail_malformed_htlc blaming the onion.
	Malformed(msgs::UpdateFailMalformedHtlc),
}

/// An Event which you should probably take some action in response to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
	/// An HTLC arrived over a hosted channel. It is not irrevocably ours until it has been
	/// cross-signed, which [`Event::StateUpdated`] announces.
	AddReceived {
		/// The HTLC and the host it came from.
		add: UpdateAddHtlcExt,
	},
	/// An HTLC we sent was settled with its preimage. Hand it to the payment that is waiting on
	/// it; this fires even while the channel is suspended.
	FulfillReceived {
		/// The settlement.
		fulfill: RemoteFulfill,
	},
	/// An HTLC we tried to send was refused locally, or written off after the fact.
	AddRejectedLocally {
		/// The refused HTLC.
		add: msgs::UpdateAddHtlc,
		/// Why it was refused.
		reason: LocalFailure,
	},
	/// The host failed an HTLC we sent. Fires once the failure has been cross-signed.
	AddRejectedRemotely {
		/// Our original HTLC offer.
		add: msgs::UpdateAddHtlc,
		/// The host's failure message.
		fail: RemoteFailure,
	},
	/// A new cross-signed state was reached; anything resolving in-flight HTLCs should re-check
	/// them now.
	StateUpdated {
		/// The channel that advanced.
		channel_id: ChannelId,
	},
	/// The channel moved between lifecycle phases.
	StateTransition {
		/// The channel that moved.
		channel_id: ChannelId,
		/// The phase it left.
		old: ChannelPhase,
		/// The phase it entered.
		new: ChannelPhase,
	},
	/// The host proposed a forced state reset after an error. Nothing is applied until the user
	/// calls [`accept_override`].
	///
	/// [`accept_override`]: crate::ln::channelmanager::HostedChannelManager::accept_override
	OverrideProposed {
		/// The channel in question.
		channel_id: ChannelId,
		/// The host's proposal.
		proposal: msgs::StateOverride,
	},
	/// The channel was suspended; only fulfills and override acceptance will be processed from
	/// here on.
	ChannelSuspended {
		/// The channel in question.
		channel_id: ChannelId,
		/// Whether the peer suspended it (true) or we did (false).
		by_remote: bool,
		/// A displayable reason.
		description: String,
	},
	/// The host sent its wallet-display branding.
	BrandingReceived {
		/// The host that sent it.
		node_id: PublicKey,
		/// The branding payload.
		branding: msgs::HostedChannelBranding,
	},
}

/// An event generated by a channel which needs to be sent to (or performed against) a peer's
/// transport connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageSendEvent {
	/// The given messages should be sent to the peer, in order, over one connection.
	SendMessages {
		/// The node_id of the node which should receive these message(s)
		node_id: PublicKey,
		/// The messages which should be sent, in order.
		msgs: Vec<wire::Message>,
	},
	/// The peer misbehaved in a transient way; drop the connection and let the reconnect resync
	/// reconcile.
	DisconnectPeer {
		/// The node_id of the node with which the connection should be dropped.
		node_id: PublicKey,
	},
}

/// A trait indicating an object may generate message send events
pub trait MessageSendEventsProvider {
	/// Gets the list of pending events which were generated by previous actions, clearing the
	/// list in the process.
	fn get_and_clear_pending_msg_events(&self) -> Vec<MessageSendEvent>;
}

/// A trait indicating an object may generate events
pub trait EventsProvider {
	/// Gets the list of pending events which were generated by previous actions, clearing the
	/// list in the process.
	fn get_and_clear_pending_events(&self) -> Vec<Event>;
}
