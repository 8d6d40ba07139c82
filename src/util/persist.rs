// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Durable storage of per-channel state.
//!
//! Because hosted channels have no on-chain commitment, the persisted [`HostedCommits`] record is
//! the only thing standing between the wallet and total data loss, so writes must be durable
//! before any message derived from the new state reaches the host. The
//! [`HostedChannelManager`] upholds that ordering; implementors of [`Persist`] only need to make
//! `persist_channel` atomic and durable per key.
//!
//! [`HostedChannelManager`]: crate::ln::channelmanager::HostedChannelManager

use crate::ln::channel::HostedCommits;
use crate::ln::types::ChannelId;

/// An error occurred while persisting, the operation must be retried or the channel torn down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistenceError(pub String);

/// Hands off durable storage of channel records to the surrounding application.
///
/// One record is kept per channel id, serialized with a leading version byte so future versions
/// can migrate old records (see [`HostedCommits`]'s `Writeable` impl).
pub trait Persist {
	/// Durably replaces the record stored under the given channel id.
	///
	/// Must not return until the data has hit stable storage: the caller will send messages
	/// derived from this state as soon as this call returns.
	fn persist_channel(&self, channel_id: ChannelId, data: &HostedCommits) -> Result<(), PersistenceError>;

	/// Reads back every stored channel record, used once at startup. Channels restored this way
	/// begin life sleeping and reconcile with the host via the resync handshake on next connect.
	fn read_channels(&self) -> Result<Vec<(ChannelId, HostedCommits)>, PersistenceError>;
}
