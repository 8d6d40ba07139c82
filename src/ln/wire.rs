// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Wire encoding/decoding for hosted channel messages.
//!
//! Messages known by this module can be read from the wire using [`read`]. The [`Message`] enum
//! returned by [`read`] wraps the decoded message or the message type (if unknown) to use with
//! pattern matching; the channel manager matches it exhaustively.
//!
//! Hosted channels travel over the same transport as regular lightning messages but use message
//! types from the experimental odd range, so a node which doesn't understand them ignores them
//! per the usual it's-ok-to-be-odd rule.

use crate::ln::msgs;
use crate::util::ser::{Readable, Writeable, Writer};

/// A hosted channel message returned by [`read`] when decoding bytes received over the wire. Each
/// variant contains a message from [`msgs`] or otherwise the message type if unknown.
///
/// [`msgs`]: crate::ln::msgs
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Message {
	InvokeHostedChannel(msgs::InvokeHostedChannel),
	InitHostedChannel(msgs::InitHostedChannel),
	LastCrossSignedState(msgs::LastCrossSignedState),
	StateUpdate(msgs::StateUpdate),
	StateOverride(msgs::StateOverride),
	ResizeChannel(msgs::ResizeChannel),
	AskBrandingInfo(msgs::AskBrandingInfo),
	HostedChannelBranding(msgs::HostedChannelBranding),
	AnnouncementSignature(msgs::AnnouncementSignature),
	QueryPublicHostedChannels(msgs::QueryPublicHostedChannels),
	ReplyPublicHostedChannelsEnd(msgs::ReplyPublicHostedChannelsEnd),
	QueryPreimages(msgs::QueryPreimages),
	ReplyPreimages(msgs::ReplyPreimages),
	UpdateAddHtlc(msgs::UpdateAddHtlc),
	UpdateFulfillHtlc(msgs::UpdateFulfillHtlc),
	UpdateFailHtlc(msgs::UpdateFailHtlc),
	UpdateFailMalformedHtlc(msgs::UpdateFailMalformedHtlc),
	ChannelUpdate(msgs::ChannelUpdate),
	Fail(msgs::Fail),
	Warning(msgs::Warning),
	/// A message that could not be decoded because its type is unknown.
	Unknown(MessageType),
}

/// A number identifying a message to determine how it is encoded on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageType(u16);

impl Message {
	/// Returns the type that was used to decode the message payload.
	pub fn type_id(&self) -> MessageType {
		match self {
			&Message::InvokeHostedChannel(ref msg) => msg.type_id(),
			&Message::InitHostedChannel(ref msg) => msg.type_id(),
			&Message::LastCrossSignedState(ref msg) => msg.type_id(),
			&Message::StateUpdate(ref msg) => msg.type_id(),
			&Message::StateOverride(ref msg) => msg.type_id(),
			&Message::ResizeChannel(ref msg) => msg.type_id(),
			&Message::AskBrandingInfo(ref msg) => msg.type_id(),
			&Message::HostedChannelBranding(ref msg) => msg.type_id(),
			&Message::AnnouncementSignature(ref msg) => msg.type_id(),
			&Message::QueryPublicHostedChannels(ref msg) => msg.type_id(),
			&Message::ReplyPublicHostedChannelsEnd(ref msg) => msg.type_id(),
			&Message::QueryPreimages(ref msg) => msg.type_id(),
			&Message::ReplyPreimages(ref msg) => msg.type_id(),
			&Message::UpdateAddHtlc(ref msg) => msg.type_id(),
			&Message::UpdateFulfillHtlc(ref msg) => msg.type_id(),
			&Message::UpdateFailHtlc(ref msg) => msg.type_id(),
			&Message::UpdateFailMalformedHtlc(ref msg) => msg.type_id(),
			&Message::ChannelUpdate(ref msg) => msg.type_id(),
			&Message::Fail(ref msg) => msg.type_id(),
			&Message::Warning(ref msg) => msg.type_id(),
			&Message::Unknown(type_id) => type_id,
		}
	}
}

impl MessageType {
	/// Returns whether the message type is even, indicating both endpoints must support it.
	pub fn is_even(&self) -> bool {
		(self.0 & 1) == 0
	}
}

impl ::std::fmt::Display for MessageType {
	fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Reads a message from the data buffer consisting of a 2-byte big-endian type and a
/// variable-length payload conforming to the type.
///
/// # Errors
///
/// Returns an error if the message payload could not be decoded as the specified type.
pub fn read<R: ::std::io::Read>(buffer: &mut R) -> Result<Message, msgs::DecodeError> {
	let message_type = <u16 as Readable>::read(buffer)?;
	match message_type {
		msgs::InvokeHostedChannel::TYPE => {
			Ok(Message::InvokeHostedChannel(Readable::read(buffer)?))
		},
		msgs::InitHostedChannel::TYPE => {
			Ok(Message::InitHostedChannel(Readable::read(buffer)?))
		},
		msgs::LastCrossSignedState::TYPE => {
			Ok(Message::LastCrossSignedState(Readable::read(buffer)?))
		},
		msgs::StateUpdate::TYPE => {
			Ok(Message::StateUpdate(Readable::read(buffer)?))
		},
		msgs::StateOverride::TYPE => {
			Ok(Message::StateOverride(Readable::read(buffer)?))
		},
		msgs::ResizeChannel::TYPE => {
			Ok(Message::ResizeChannel(Readable::read(buffer)?))
		},
		msgs::AskBrandingInfo::TYPE => {
			Ok(Message::AskBrandingInfo(Readable::read(buffer)?))
		},
		msgs::HostedChannelBranding::TYPE => {
			Ok(Message::HostedChannelBranding(Readable::read(buffer)?))
		},
		msgs::AnnouncementSignature::TYPE => {
			Ok(Message::AnnouncementSignature(Readable::read(buffer)?))
		},
		msgs::QueryPublicHostedChannels::TYPE => {
			Ok(Message::QueryPublicHostedChannels(Readable::read(buffer)?))
		},
		msgs::ReplyPublicHostedChannelsEnd::TYPE => {
			Ok(Message::ReplyPublicHostedChannelsEnd(Readable::read(buffer)?))
		},
		msgs::QueryPreimages::TYPE => {
			Ok(Message::QueryPreimages(Readable::read(buffer)?))
		},
		msgs::ReplyPreimages::TYPE => {
			Ok(Message::ReplyPreimages(Readable::read(buffer)?))
		},
		msgs::UpdateAddHtlc::TYPE => {
			Ok(Message::UpdateAddHtlc(Readable::read(buffer)?))
		},
		msgs::UpdateFulfillHtlc::TYPE => {
			Ok(Message::UpdateFulfillHtlc(Readable::read(buffer)?))
		},
		msgs::UpdateFailHtlc::TYPE => {
			Ok(Message::UpdateFailHtlc(Readable::read(buffer)?))
		},
		msgs::UpdateFailMalformedHtlc::TYPE => {
			Ok(Message::UpdateFailMalformedHtlc(Readable::read(buffer)?))
		},
		msgs::ChannelUpdate::TYPE => {
			Ok(Message::ChannelUpdate(Readable::read(buffer)?))
		},
		msgs::Fail::TYPE => {
			Ok(Message::Fail(Readable::read(buffer)?))
		},
		msgs::Warning::TYPE => {
			Ok(Message::Warning(Readable::read(buffer)?))
		},
		_ => {
			Ok(Message::Unknown(MessageType(message_type)))
		},
	}
}

/// Writes a message to the data buffer encoded as a 2-byte big-endian type and a variable-length
/// payload.
pub fn write<M: Encode + Writeable, W: Writer>(message: &M, buffer: &mut W) -> Result<(), ::std::io::Error> {
	M::TYPE.write(buffer)?;
	message.write(buffer)
}

impl Writeable for Message {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), ::std::io::Error> {
		match self {
			&Message::InvokeHostedChannel(ref msg) => write(msg, w),
			&Message::InitHostedChannel(ref msg) => write(msg, w),
			&Message::LastCrossSignedState(ref msg) => write(msg, w),
			&Message::StateUpdate(ref msg) => write(msg, w),
			&Message::StateOverride(ref msg) => write(msg, w),
			&Message::ResizeChannel(ref msg) => write(msg, w),
			&Message::AskBrandingInfo(ref msg) => write(msg, w),
			&Message::HostedChannelBranding(ref msg) => write(msg, w),
			&Message::AnnouncementSignature(ref msg) => write(msg, w),
			&Message::QueryPublicHostedChannels(ref msg) => write(msg, w),
			&Message::ReplyPublicHostedChannelsEnd(ref msg) => write(msg, w),
			&Message::QueryPreimages(ref msg) => write(msg, w),
			&Message::ReplyPreimages(ref msg) => write(msg, w),
			&Message::UpdateAddHtlc(ref msg) => write(msg, w),
			&Message::UpdateFulfillHtlc(ref msg) => write(msg, w),
			&Message::UpdateFailHtlc(ref msg) => write(msg, w),
			&Message::UpdateFailMalformedHtlc(ref msg) => write(msg, w),
			&Message::ChannelUpdate(ref msg) => write(msg, w),
			&Message::Fail(ref msg) => write(msg, w),
			&Message::Warning(ref msg) => write(msg, w),
			&Message::Unknown(_) => Ok(()),
		}
	}
}

/// Defines a type-identified encoding for sending messages over the wire.
///
/// Messages implementing this trait specify a type and must be [`Writeable`] to use with
/// [`write`].
pub trait Encode {
	/// The type identifying the message payload.
	const TYPE: u16;

	/// Returns the type identifying the message payload. Convenience method for accessing
	/// [`TYPE`](Self::TYPE).
	fn type_id(&self) -> MessageType {
		MessageType(Self::TYPE)
	}
}

impl Encode for msgs::InvokeHostedChannel {
	const TYPE: u16 = 65535;
}

impl Encode for msgs::InitHostedChannel {
	const TYPE: u16 = 65533;
}

impl Encode for msgs::LastCrossSignedState {
	const TYPE: u16 = 65531;
}

impl Encode for msgs::StateUpdate {
	const TYPE: u16 = 65529;
}

impl Encode for msgs::StateOverride {
	const TYPE: u16 = 65527;
}

impl Encode for msgs::HostedChannelBranding {
	const TYPE: u16 = 65525;
}

impl Encode for msgs::AnnouncementSignature {
	const TYPE: u16 = 65523;
}

impl Encode for msgs::QueryPreimages {
	const TYPE: u16 = 65519;
}

impl Encode for msgs::ReplyPreimages {
	const TYPE: u16 = 65517;
}

impl Encode for msgs::AskBrandingInfo {
	const TYPE: u16 = 65511;
}

impl Encode for msgs::ResizeChannel {
	const TYPE: u16 = 65509;
}

impl Encode for msgs::QueryPublicHostedChannels {
	const TYPE: u16 = 65507;
}

impl Encode for msgs::ReplyPublicHostedChannelsEnd {
	const TYPE: u16 = 65505;
}

impl Encode for msgs::ChannelUpdate {
	const TYPE: u16 = 64509;
}

impl Encode for msgs::UpdateAddHtlc {
	const TYPE: u16 = 63505;
}

impl Encode for msgs::UpdateFulfillHtlc {
	const TYPE: u16 = 63503;
}

impl Encode for msgs::UpdateFailHtlc {
	const TYPE: u16 = 63501;
}

impl Encode for msgs::UpdateFailMalformedHtlc {
	const TYPE: u16 = 63499;
}

impl Encode for msgs::Fail {
	const TYPE: u16 = 63497;
}

impl Encode for msgs::Warning {
	const TYPE: u16 = 63495;
}

#[cfg(test)]
mod tests {
	use bitcoin::hashes::Hash;
	use bitcoin::hash_types::BlockHash;
	use bitcoin::blockdata::script::Script;

	use std::io::Cursor;

	use super::*;
	use crate::ln::types::ChannelId;
	use crate::util::ser::Writeable;

	#[test]
	fn read_invoke_round_trip() {
		let msg = msgs::InvokeHostedChannel {
			chain_hash: BlockHash::hash(&[]),
			refund_script_pubkey: Script::new(),
			secret: vec![],
		};
		let mut buf = Vec::new();
		write(&msg, &mut buf).unwrap();
		assert_eq!(&buf[0..2], &[0xff, 0xff]);
		match read(&mut Cursor::new(&buf)).unwrap() {
			Message::InvokeHostedChannel(decoded) => assert_eq!(decoded, msg),
			_ => panic!("wrong variant"),
		}
	}

	#[test]
	fn read_unknown_type() {
		let mut buf = Vec::new();
		0x2a2bu16.write(&mut buf).unwrap();
		match read(&mut Cursor::new(&buf)).unwrap() {
			Message::Unknown(t) => assert!(!t.is_even()),
			_ => panic!("expected unknown"),
		}
	}

	#[test]
	fn fail_round_trips_through_message_enum() {
		let msg = Message::Fail(msgs::Fail::from_code(ChannelId([1; 32]), msgs::ERR_HOSTED_MANUAL_SUSPEND));
		let buf = msg.encode();
		assert_eq!(read(&mut Cursor::new(&buf)).unwrap(), msg);
	}
}
