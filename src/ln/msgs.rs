// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Wire messages for the hosted channel protocol, plus a few error types.
//!
//! A hosted channel never touches the chain, so the messages here are the entire protocol: the
//! open handshake (`invoke_hosted_channel`/`init_hosted_channel`), the cross-signing handshake
//! (`state_update` and the full `last_cross_signed_state` exchanged on reconnect), HTLC updates,
//! and the recovery messages (`state_override`, `resize_channel`). All integers are big-endian on
//! the wire per the usual lightning conventions; the state *digest* over these fields is
//! little-endian and lives in [`chan_utils`].
//!
//! [`chan_utils`]: crate::ln::chan_utils

use bitcoin::blockdata::script::Script;
use bitcoin::hash_types::BlockHash;
use bitcoin::secp256k1::ecdsa::Signature;

use std::fmt;
use std::io::Read;

use crate::ln::types::{ChannelId, PaymentHash, PaymentPreimage};
use crate::util::ser::{Readable, Writeable, Writer};

/// An error in decoding a message or struct.
#[derive(Debug)]
pub enum DecodeError {
	/// A version byte specified something we don't know how to handle.
	UnknownVersion,
	/// Unknown feature mandating we fail to parse message
	UnknownRequiredFeature,
	/// Value was invalid, eg a byte which was supposed to be a bool was something other than a 0
	/// or 1, a public key/private key/signature was invalid, text wasn't UTF-8, etc
	InvalidValue,
	/// Buffer too short
	ShortRead,
	/// A length descriptor in the packet didn't describe the later data correctly
	BadLengthDescriptor,
	/// Error from std::io
	Io(::std::io::Error),
}

impl fmt::Display for DecodeError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			DecodeError::UnknownVersion => f.write_str("Unknown version byte in serialized data"),
			DecodeError::UnknownRequiredFeature => f.write_str("Unknown required feature preventing decode"),
			DecodeError::InvalidValue => f.write_str("Nonsense bytes didn't map to the type they were interpreted as"),
			DecodeError::ShortRead => f.write_str("Packet extended beyond the provided bytes"),
			DecodeError::BadLengthDescriptor => f.write_str("A length descriptor in the packet didn't describe the later data correctly"),
			DecodeError::Io(ref e) => fmt::Debug::fmt(e, f),
		}
	}
}

impl std::error::Error for DecodeError {}

impl From<::std::io::Error> for DecodeError {
	fn from(e: ::std::io::Error) -> Self {
		if e.kind() == ::std::io::ErrorKind::UnexpectedEof {
			DecodeError::ShortRead
		} else {
			DecodeError::Io(e)
		}
	}
}

/// Messages could have optional fields to use with extended features
/// As we wish to serialize these differently from Option<T>s (Options get a tag byte, but
/// OptionalField simply gets Present if there are enough bytes to read into it), we have a
/// separate enum type for them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionalField<T> {
	/// Optional field is included in message
	Present(T),
	/// Optional field is absent in message
	Absent
}

/// An invoke_hosted_channel message, sent by the client whenever it connects to a host it wants a
/// hosted channel with. The host replies with either `init_hosted_channel` (a new channel) or its
/// `last_cross_signed_state` (it already knows us).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvokeHostedChannel {
	/// Genesis hash of the chain the client is on.
	pub chain_hash: BlockHash,
	/// The client's on-chain refund script. Committed into every cross-signed state, to be used
	/// if the host ever settles out-of-band.
	pub refund_script_pubkey: Script,
	/// Free-form ticket data, empty unless the host requires an access secret.
	pub secret: Vec<u8>,
}

/// An init_hosted_channel message carrying the immutable parameters of a fresh channel, proposed
/// by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InitHostedChannel {
	/// The largest total of in-flight HTLC value the host will accept.
	pub max_htlc_value_in_flight_msat: u64,
	/// The smallest HTLC the host will accept.
	pub htlc_minimum_msat: u64,
	/// The largest number of concurrent in-flight HTLCs the host will accept.
	pub max_accepted_htlcs: u16,
	/// Total channel capacity.
	pub channel_capacity_msat: u64,
	/// The portion of the capacity initially credited to the client.
	pub initial_client_balance_msat: u64,
}

/// The bilaterally signed snapshot of the channel: balances, update counters and in-flight HTLCs,
/// together with both parties' signatures over each other's view of it.
///
/// This is both a wire message (the host sends its current one on every reconnect) and the
/// persisted core of a channel. The signing/verification and transition helpers live in
/// [`chan_utils`].
///
/// [`chan_utils`]: crate::ln::chan_utils
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastCrossSignedState {
	/// Whether the local node is the host in this state's frame of reference.
	pub is_host: bool,
	/// The client's on-chain refund script, as committed at channel open.
	pub refund_script_pubkey: Script,
	/// The immutable channel parameters agreed at open.
	pub init_hosted_channel: InitHostedChannel,
	/// Day counter (days since the unix epoch, UTC) at which this state was signed. Both sides
	/// refuse to countersign a state whose day is more than one off their own clock.
	pub block_day: u32,
	/// The local party's balance.
	pub local_balance_msat: u64,
	/// The remote party's balance.
	pub remote_balance_msat: u64,
	/// Count of update messages the local party has originated, up to and including this state.
	pub local_updates: u32,
	/// Count of update messages the remote party has originated, up to and including this state.
	pub remote_updates: u32,
	/// In-flight HTLCs offered by the remote party, ordered by id.
	pub incoming_htlcs: Vec<UpdateAddHtlc>,
	/// In-flight HTLCs offered by the local party, ordered by id.
	pub outgoing_htlcs: Vec<UpdateAddHtlc>,
	/// The remote party's signature over this state as the local party sees it.
	pub remote_sig_of_local: Signature,
	/// The local party's signature over this state as the remote party sees it (i.e. over the
	/// reversed state).
	pub local_sig_of_remote: Signature,
}

/// A state_update message: the compact form of a countersignature over the next cross-signed
/// state. Each side can reconstruct the full state from its own pending updates, so only the
/// counters, the signing day and the signature travel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateUpdate {
	/// Day counter at signing time.
	pub block_day: u32,
	/// The signer's count of updates it has originated.
	pub local_updates: u32,
	/// The signer's count of updates its peer has originated.
	pub remote_updates: u32,
	/// The signer's signature over the receiver's view of the next state.
	pub local_sig_of_remote_lcss: Signature,
}

/// A state_override message: the host proposing a forced reset of the channel after it has
/// entered an error state. Never applied automatically; the wallet user must accept it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateOverride {
	/// Day counter at signing time.
	pub block_day: u32,
	/// The host's balance in the overridden state.
	pub local_balance_msat: u64,
	/// The host's update counter in the overridden state.
	pub local_updates: u32,
	/// The client's update counter in the overridden state.
	pub remote_updates: u32,
	/// The host's signature over the client's view of the overridden state.
	pub local_sig_of_remote_lcss: Signature,
}

/// A resize_channel message: the client asking the host for more capacity. Signed separately by
/// the client and folded into the next cross-signed state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResizeChannel {
	/// The proposed new total capacity.
	pub new_capacity_msat: u64,
	/// The client's signature over `sha256(le64(new_capacity_msat))`.
	pub client_sig: Signature,
}

/// An ask_branding_info message, sent by the client after a successful open to request the host's
/// wallet-display branding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AskBrandingInfo {
	/// The channel this request refers to.
	pub channel_id: ChannelId,
}

/// A hosted_channel_branding message carrying the host's display branding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostedChannelBranding {
	/// Brand color.
	pub rgb: [u8; 3],
	/// Optional png logo, preserved verbatim.
	pub png_icon: Option<Vec<u8>>,
	/// Contact info / support URL.
	pub contact_info: String,
}

/// An announcement_signature message used by public hosted channel gossip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnnouncementSignature {
	/// Signature over the channel announcement.
	pub node_signature: Signature,
	/// Set when the sender wants our signature in return.
	pub wants_reply: bool,
}

/// A query_public_hosted_channels message opening a public-hosted-channel gossip sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryPublicHostedChannels {
	/// Genesis hash of the chain being synced.
	pub chain_hash: BlockHash,
}

/// A reply_public_hosted_channels_end message closing a public-hosted-channel gossip sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplyPublicHostedChannelsEnd {
	/// Genesis hash of the chain being synced.
	pub chain_hash: BlockHash,
}

/// A query_preimages message asking a peer for any preimages it has seen on-chain for the given
/// payment hashes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryPreimages {
	/// The payment hashes in question.
	pub hashes: Vec<PaymentHash>,
}

/// A reply_preimages message carrying revealed preimages in response to a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyPreimages {
	/// The revealed preimages.
	pub preimages: Vec<PaymentPreimage>,
}

/// BOLT 4 onion packet as carried in update_add_htlc. This crate never constructs or peels
/// onions (that is the payment layer's concern), so the ephemeral key is kept as raw bytes
/// rather than a parsed public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnionPacket {
	/// Version byte, 0 for the current construction.
	pub version: u8,
	/// Serialized ephemeral public key used to derive the shared onion secret.
	pub public_key: [u8; 33],
	/// 20 hops of per-hop payloads.
	pub hop_data: [u8; 1300],
	/// HMAC over the packet.
	pub hmac: [u8; 32],
}

/// An update_add_htlc message to be sent or received from a peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateAddHtlc {
	/// The channel this HTLC travels over.
	pub channel_id: ChannelId,
	/// The HTLC id. In hosted channels ids share the per-direction update counter sequence, so a
	/// fresh add's id is always `update counter of that direction + 1`.
	pub htlc_id: u64,
	/// HTLC value.
	pub amount_msat: u64,
	/// Hash whose preimage unlocks the HTLC.
	pub payment_hash: PaymentHash,
	/// Block height after which the HTLC is expired and must be failed back.
	pub cltv_expiry: u32,
	/// The onion for the next hop.
	pub onion_routing_packet: OnionPacket,
}

/// An update_fulfill_htlc message to be sent or received from a peer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateFulfillHtlc {
	/// The channel the fulfilled HTLC travels over.
	pub channel_id: ChannelId,
	/// The id of the HTLC being fulfilled.
	pub htlc_id: u64,
	/// The preimage unlocking it.
	pub payment_preimage: PaymentPreimage,
}

/// An update_fail_htlc message to be sent or received from a peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateFailHtlc {
	/// The channel the failed HTLC travels over.
	pub channel_id: ChannelId,
	/// The id of the HTLC being failed.
	pub htlc_id: u64,
	/// The encrypted failure reason to relay back to the payer.
	pub reason: Vec<u8>,
}

/// The bit set in `failure_code` for errors in the onion itself.
pub const BADONION: u16 = 0x8000;

/// An update_fail_malformed_htlc message to be sent or received from a peer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateFailMalformedHtlc {
	/// The channel the failed HTLC travels over.
	pub channel_id: ChannelId,
	/// The id of the HTLC being failed.
	pub htlc_id: u64,
	/// Hash of the onion we could not process.
	pub sha256_of_onion: [u8; 32],
	/// Failure code, must have [`BADONION`] set.
	pub failure_code: u16,
}

/// The four HTLC update messages, as queued between cross-signings. The pending update queues in
/// a persisted channel record hold these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateMessage {
	/// An HTLC offer.
	AddHtlc(UpdateAddHtlc),
	/// An HTLC settlement with its preimage.
	FulfillHtlc(UpdateFulfillHtlc),
	/// An HTLC failure with an encrypted reason.
	FailHtlc(UpdateFailHtlc),
	/// An HTLC failure blaming the onion.
	FailMalformedHtlc(UpdateFailMalformedHtlc),
}

impl UpdateMessage {
	/// The id of the HTLC this update concerns.
	pub fn htlc_id(&self) -> u64 {
		match self {
			UpdateMessage::AddHtlc(ref msg) => msg.htlc_id,
			UpdateMessage::FulfillHtlc(ref msg) => msg.htlc_id,
			UpdateMessage::FailHtlc(ref msg) => msg.htlc_id,
			UpdateMessage::FailMalformedHtlc(ref msg) => msg.htlc_id,
		}
	}
}

/// Error code sent when the peer's signature over our view of the state was invalid.
pub const ERR_HOSTED_WRONG_REMOTE_SIG: &str = "0001";
/// Error code sent when our own signature, as echoed back by the peer, was invalid.
pub const ERR_HOSTED_WRONG_LOCAL_SIG: &str = "0002";
/// Error code sent when the channel was suspended locally: either by the user, or because an
/// incoming HTLC whose preimage we revealed expired unresolved.
pub const ERR_HOSTED_MANUAL_SUSPEND: &str = "0003";
/// Error code sent when an outgoing HTLC expired without resolution.
pub const ERR_HOSTED_TIMED_OUT_OUTGOING_HTLC: &str = "0004";
/// Error code sent when a resize proposal carried an invalid signature.
pub const ERR_HOSTED_INVALID_RESIZE: &str = "0005";

/// A fail message, fatally suspending the channel it names. The data carries one of the
/// `ERR_HOSTED_*` code strings, or free-form text from the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fail {
	/// The channel being failed.
	pub channel_id: ChannelId,
	/// The failure code or description, consumed as-is by the wire.
	pub data: Vec<u8>,
}

impl Fail {
	/// Builds a fail message carrying one of the `ERR_HOSTED_*` codes.
	pub fn from_code(channel_id: ChannelId, code: &str) -> Self {
		Fail { channel_id, data: code.as_bytes().to_vec() }
	}

	/// A displayable rendering of the carried data, mapping known codes to text.
	pub fn description(&self) -> String {
		match ::std::str::from_utf8(&self.data) {
			Ok(ERR_HOSTED_WRONG_REMOTE_SIG) => "invalid remote signature over local state".to_owned(),
			Ok(ERR_HOSTED_WRONG_LOCAL_SIG) => "peer reports invalid local signature over remote state".to_owned(),
			Ok(ERR_HOSTED_MANUAL_SUSPEND) => "channel was manually suspended".to_owned(),
			Ok(ERR_HOSTED_TIMED_OUT_OUTGOING_HTLC) => "outgoing htlc timed out without resolution".to_owned(),
			Ok(ERR_HOSTED_INVALID_RESIZE) => "invalid signature over resize proposal".to_owned(),
			Ok(other) => other.to_owned(),
			Err(_) => format!("{}", crate::util::macro_logger::DebugBytes(&self.data)),
		}
	}
}

/// A warning message; informational only, the channel stays usable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Warning {
	/// The channel being warned about.
	pub channel_id: ChannelId,
	/// Free-form description.
	pub data: Vec<u8>,
}

/// The unsigned part of a channel_update
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsignedChannelUpdate {
	/// Genesis hash of the chain the update is for.
	pub chain_hash: BlockHash,
	/// The short channel id this update refers to. For hosted channels this is the 64-bit
	/// truncation of the channel id.
	pub short_channel_id: u64,
	/// Seconds since the unix epoch at which this update was generated.
	pub timestamp: u32,
	/// Direction and disabled bits.
	pub flags: u16,
	/// Blocks a relaying node must subtract from an incoming expiry.
	pub cltv_expiry_delta: u16,
	/// The smallest HTLC the sender will relay.
	pub htlc_minimum_msat: u64,
	/// Base relay fee.
	pub fee_base_msat: u32,
	/// Proportional relay fee.
	pub fee_proportional_millionths: u32,
	/// The largest HTLC the sender will relay, if advertised. Preserved through serialization
	/// round-trips whether present or absent.
	pub htlc_maximum_msat: OptionalField<u64>,
}

/// A channel_update message to be sent or received from a peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelUpdate {
	/// The signature over the contents.
	pub signature: Signature,
	/// The actual update.
	pub contents: UnsignedChannelUpdate,
}

impl Writeable for InvokeHostedChannel {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), ::std::io::Error> {
		w.size_hint(32 + 2 + self.refund_script_pubkey.len() + 2 + self.secret.len());
		self.chain_hash.write(w)?;
		self.refund_script_pubkey.write(w)?;
		self.secret.write(w)?;
		Ok(())
	}
}

impl Readable for InvokeHostedChannel {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			chain_hash: Readable::read(r)?,
			refund_script_pubkey: Readable::read(r)?,
			secret: Readable::read(r)?,
		})
	}
}

impl_writeable!(InitHostedChannel, 8+8+2+8+8, {
	max_htlc_value_in_flight_msat,
	htlc_minimum_msat,
	max_accepted_htlcs,
	channel_capacity_msat,
	initial_client_balance_msat
});

impl Writeable for Vec<UpdateAddHtlc> {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), ::std::io::Error> {
		(self.len() as u16).write(w)?;
		for htlc in self.iter() {
			htlc.write(w)?;
		}
		Ok(())
	}
}

impl Readable for Vec<UpdateAddHtlc> {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let len: u16 = Readable::read(r)?;
		let mut ret = Vec::with_capacity(::std::cmp::min(len as usize, 64));
		for _ in 0..len { ret.push(Readable::read(r)?); }
		Ok(ret)
	}
}

impl Writeable for Vec<PaymentHash> {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), ::std::io::Error> {
		(self.len() as u16).write(w)?;
		for hash in self.iter() {
			hash.write(w)?;
		}
		Ok(())
	}
}

impl Readable for Vec<PaymentHash> {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let len: u16 = Readable::read(r)?;
		let mut ret = Vec::with_capacity(::std::cmp::min(len as usize, 512));
		for _ in 0..len { ret.push(Readable::read(r)?); }
		Ok(ret)
	}
}

impl Writeable for Vec<PaymentPreimage> {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), ::std::io::Error> {
		(self.len() as u16).write(w)?;
		for preimage in self.iter() {
			preimage.write(w)?;
		}
		Ok(())
	}
}

impl Readable for Vec<PaymentPreimage> {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let len: u16 = Readable::read(r)?;
		let mut ret = Vec::with_capacity(::std::cmp::min(len as usize, 512));
		for _ in 0..len { ret.push(Readable::read(r)?); }
		Ok(ret)
	}
}

impl_writeable_len_match!(LastCrossSignedState, {
		{ LastCrossSignedState { ref refund_script_pubkey, ref incoming_htlcs, ref outgoing_htlcs, .. },
			1 + 2 + refund_script_pubkey.len() + 34 + 4 + 8*2 + 4*2 + 4 + (incoming_htlcs.len() + outgoing_htlcs.len()) * 1450 + 64*2 }
	}, {
	is_host,
	refund_script_pubkey,
	init_hosted_channel,
	block_day,
	local_balance_msat,
	remote_balance_msat,
	local_updates,
	remote_updates,
	incoming_htlcs,
	outgoing_htlcs,
	remote_sig_of_local,
	local_sig_of_remote
});

impl_writeable!(StateUpdate, 4+4+4+64, {
	block_day,
	local_updates,
	remote_updates,
	local_sig_of_remote_lcss
});

impl_writeable!(StateOverride, 4+8+4+4+64, {
	block_day,
	local_balance_msat,
	local_updates,
	remote_updates,
	local_sig_of_remote_lcss
});

impl_writeable!(ResizeChannel, 8+64, {
	new_capacity_msat,
	client_sig
});

impl_writeable!(AskBrandingInfo, 32, {
	channel_id
});

impl Writeable for HostedChannelBranding {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), ::std::io::Error> {
		w.size_hint(3 + 1 + 2 + self.contact_info.len());
		self.rgb.write(w)?;
		self.png_icon.write(w)?;
		(self.contact_info.len() as u16).write(w)?;
		w.write_all(self.contact_info.as_bytes())?;
		Ok(())
	}
}

impl Readable for HostedChannelBranding {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			rgb: Readable::read(r)?,
			png_icon: Readable::read(r)?,
			contact_info: {
				let len: u16 = Readable::read(r)?;
				let mut buf = vec![0; len as usize];
				r.read_exact(&mut buf)?;
				match String::from_utf8(buf) {
					Ok(s) => s,
					Err(_) => return Err(DecodeError::InvalidValue),
				}
			},
		})
	}
}

impl_writeable!(AnnouncementSignature, 64+1, {
	node_signature,
	wants_reply
});

impl_writeable!(QueryPublicHostedChannels, 32, {
	chain_hash
});

impl_writeable!(ReplyPublicHostedChannelsEnd, 32, {
	chain_hash
});

impl_writeable_len_match!(QueryPreimages, {
		{ QueryPreimages { ref hashes }, 2 + hashes.len()*32 }
	}, {
	hashes
});

impl_writeable_len_match!(ReplyPreimages, {
		{ ReplyPreimages { ref preimages }, 2 + preimages.len()*32 }
	}, {
	preimages
});

impl_writeable!(OnionPacket, 1+33+1300+32, {
	version,
	public_key,
	hop_data,
	hmac
});

impl_writeable!(UpdateAddHtlc, 32+8+8+32+4+1366, {
	channel_id,
	htlc_id,
	amount_msat,
	payment_hash,
	cltv_expiry,
	onion_routing_packet
});

impl_writeable!(UpdateFulfillHtlc, 32+8+32, {
	channel_id,
	htlc_id,
	payment_preimage
});

impl_writeable_len_match!(UpdateFailHtlc, {
		{ UpdateFailHtlc { ref reason, .. }, 32 + 10 + reason.len() }
	}, {
	channel_id,
	htlc_id,
	reason
});

impl_writeable!(UpdateFailMalformedHtlc, 32+8+32+2, {
	channel_id,
	htlc_id,
	sha256_of_onion,
	failure_code
});

impl Writeable for UpdateMessage {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), ::std::io::Error> {
		match self {
			UpdateMessage::AddHtlc(ref msg) => {
				0u8.write(w)?;
				msg.write(w)
			},
			UpdateMessage::FulfillHtlc(ref msg) => {
				1u8.write(w)?;
				msg.write(w)
			},
			UpdateMessage::FailHtlc(ref msg) => {
				2u8.write(w)?;
				msg.write(w)
			},
			UpdateMessage::FailMalformedHtlc(ref msg) => {
				3u8.write(w)?;
				msg.write(w)
			},
		}
	}
}

impl Readable for UpdateMessage {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		match <u8 as Readable>::read(r)? {
			0 => Ok(UpdateMessage::AddHtlc(Readable::read(r)?)),
			1 => Ok(UpdateMessage::FulfillHtlc(Readable::read(r)?)),
			2 => Ok(UpdateMessage::FailHtlc(Readable::read(r)?)),
			3 => Ok(UpdateMessage::FailMalformedHtlc(Readable::read(r)?)),
			_ => Err(DecodeError::InvalidValue),
		}
	}
}

impl Writeable for Vec<UpdateMessage> {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), ::std::io::Error> {
		(self.len() as u16).write(w)?;
		for update in self.iter() {
			update.write(w)?;
		}
		Ok(())
	}
}

impl Readable for Vec<UpdateMessage> {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let len: u16 = Readable::read(r)?;
		let mut ret = Vec::with_capacity(::std::cmp::min(len as usize, 64));
		for _ in 0..len { ret.push(Readable::read(r)?); }
		Ok(ret)
	}
}

impl_writeable_len_match!(Fail, {
		{ Fail { ref data, .. }, 32 + 2 + data.len() }
	}, {
	channel_id,
	data
});

impl_writeable_len_match!(Warning, {
		{ Warning { ref data, .. }, 32 + 2 + data.len() }
	}, {
	channel_id,
	data
});

impl Writeable for UnsignedChannelUpdate {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), ::std::io::Error> {
		w.size_hint(64 + 8);
		self.chain_hash.write(w)?;
		self.short_channel_id.write(w)?;
		self.timestamp.write(w)?;
		self.flags.write(w)?;
		self.cltv_expiry_delta.write(w)?;
		self.htlc_minimum_msat.write(w)?;
		self.fee_base_msat.write(w)?;
		self.fee_proportional_millionths.write(w)?;
		match self.htlc_maximum_msat {
			OptionalField::Present(ref max) => max.write(w)?,
			OptionalField::Absent => {},
		}
		Ok(())
	}
}

impl Readable for UnsignedChannelUpdate {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			chain_hash: Readable::read(r)?,
			short_channel_id: Readable::read(r)?,
			timestamp: Readable::read(r)?,
			flags: Readable::read(r)?,
			cltv_expiry_delta: Readable::read(r)?,
			htlc_minimum_msat: Readable::read(r)?,
			fee_base_msat: Readable::read(r)?,
			fee_proportional_millionths: Readable::read(r)?,
			htlc_maximum_msat: {
				match <u64 as Readable>::read(r) {
					Ok(max) => OptionalField::Present(max),
					Err(DecodeError::ShortRead) => OptionalField::Absent,
					Err(e) => return Err(e),
				}
			},
		})
	}
}

impl_writeable_len_match!(ChannelUpdate, {
		{ _, 64 + 64 + 8 }
	}, {
	signature,
	contents
});

#[cfg(test)]
mod tests {
	use bitcoin::blockdata::script::Builder;
	use bitcoin::blockdata::opcodes;
	use bitcoin::hashes::Hash;
	use bitcoin::hash_types::BlockHash;
	use bitcoin::secp256k1::ecdsa::Signature;

	use std::io::Cursor;

	use crate::ln::msgs::*;
	use crate::ln::types::{ChannelId, PaymentHash, PaymentPreimage};
	use crate::util::ser::{Readable, Writeable};

	fn dummy_sig() -> Signature {
		Signature::from_compact(&[0x55; 64]).unwrap()
	}

	fn dummy_add(htlc_id: u64, amount_msat: u64) -> UpdateAddHtlc {
		UpdateAddHtlc {
			channel_id: ChannelId([7; 32]),
			htlc_id,
			amount_msat,
			payment_hash: PaymentHash([3; 32]),
			cltv_expiry: 19050,
			onion_routing_packet: OnionPacket {
				version: 0,
				public_key: [2; 33],
				hop_data: [0; 1300],
				hmac: [9; 32],
			},
		}
	}

	#[test]
	fn update_add_htlc_wire_format() {
		let add = dummy_add(4, 50_000);
		let encoded = add.encode();
		assert_eq!(encoded.len(), 32 + 8 + 8 + 32 + 4 + 1366);

		let mut expected = Vec::new();
		expected.extend_from_slice(&[7; 32]);
		expected.extend_from_slice(&4u64.to_be_bytes());
		expected.extend_from_slice(&50_000u64.to_be_bytes());
		expected.extend_from_slice(&[3; 32]);
		expected.extend_from_slice(&19050u32.to_be_bytes());
		expected.push(0);
		expected.extend_from_slice(&[2; 33]);
		expected.extend_from_slice(&[0; 1300]);
		expected.extend_from_slice(&[9; 32]);
		assert_eq!(encoded, expected);

		let decoded: UpdateAddHtlc = Readable::read(&mut Cursor::new(&encoded)).unwrap();
		assert_eq!(decoded, add);
	}

	#[test]
	fn last_cross_signed_state_round_trip() {
		let lcss = LastCrossSignedState {
			is_host: false,
			refund_script_pubkey: Builder::new().push_opcode(opcodes::all::OP_PUSHBYTES_0).push_slice(&[0; 20]).into_script(),
			init_hosted_channel: InitHostedChannel {
				max_htlc_value_in_flight_msat: 90_000_000,
				htlc_minimum_msat: 1000,
				max_accepted_htlcs: 10,
				channel_capacity_msat: 100_000_000,
				initial_client_balance_msat: 0,
			},
			block_day: 19000,
			local_balance_msat: 100_000_000 - 50_000,
			remote_balance_msat: 100_000_000,
			local_updates: 1,
			remote_updates: 0,
			incoming_htlcs: vec![],
			outgoing_htlcs: vec![dummy_add(1, 50_000)],
			remote_sig_of_local: dummy_sig(),
			local_sig_of_remote: dummy_sig(),
		};
		let encoded = lcss.encode();
		let decoded: LastCrossSignedState = Readable::read(&mut Cursor::new(&encoded)).unwrap();
		assert_eq!(decoded, lcss);
		assert_eq!(decoded.encode(), encoded);
	}

	#[test]
	fn channel_update_preserves_optional_htlc_maximum() {
		let mut update = ChannelUpdate {
			signature: dummy_sig(),
			contents: UnsignedChannelUpdate {
				chain_hash: BlockHash::hash(&[]),
				short_channel_id: 42,
				timestamp: 1,
				flags: 0,
				cltv_expiry_delta: 144,
				htlc_minimum_msat: 1000,
				fee_base_msat: 1000,
				fee_proportional_millionths: 100,
				htlc_maximum_msat: OptionalField::Present(90_000_000),
			},
		};
		let decoded: ChannelUpdate = Readable::read(&mut Cursor::new(&update.encode())).unwrap();
		assert_eq!(decoded, update);

		update.contents.htlc_maximum_msat = OptionalField::Absent;
		let decoded: ChannelUpdate = Readable::read(&mut Cursor::new(&update.encode())).unwrap();
		assert_eq!(decoded, update);
	}

	#[test]
	fn update_message_round_trip() {
		let msgs = vec![
			UpdateMessage::AddHtlc(dummy_add(1, 1000)),
			UpdateMessage::FulfillHtlc(UpdateFulfillHtlc {
				channel_id: ChannelId([7; 32]),
				htlc_id: 1,
				payment_preimage: PaymentPreimage([4; 32]),
			}),
			UpdateMessage::FailHtlc(UpdateFailHtlc {
				channel_id: ChannelId([7; 32]),
				htlc_id: 2,
				reason: vec![0xde, 0xad],
			}),
			UpdateMessage::FailMalformedHtlc(UpdateFailMalformedHtlc {
				channel_id: ChannelId([7; 32]),
				htlc_id: 3,
				sha256_of_onion: [1; 32],
				failure_code: BADONION | 6,
			}),
		];
		for msg in msgs {
			let decoded: UpdateMessage = Readable::read(&mut Cursor::new(&msg.encode())).unwrap();
			assert_eq!(decoded, msg);
		}
	}

	#[test]
	fn fail_code_description() {
		let fail = Fail::from_code(ChannelId([0; 32]), ERR_HOSTED_TIMED_OUT_OUTGOING_HTLC);
		assert_eq!(fail.data, b"0004".to_vec());
		assert!(fail.description().contains("timed out"));
		// 32-byte channel id, u16 length, then the code as ascii, as it travels on the wire.
		let expected = ::hex::decode(format!("{}{}{}", "00".repeat(32), "0004", "30303034")).unwrap();
		assert_eq!(fail.encode(), expected);
	}
}
