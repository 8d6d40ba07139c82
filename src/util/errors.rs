// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Error types live here.

use std::fmt;

/// Indicates an error on the client's part (usually some variant of attempting to use too-low or
/// too-high values)
pub enum APIError {
	/// Indicates the API was wholly misused (see err for more). Cases where these can be returned
	/// are documented, but generally indicates some precondition of a function was violated.
	APIMisuseError {
		/// A human-readable error message
		err: String
	},
	/// We were unable to complete the request as the channel required to do so is unable to
	/// complete it (or was not found). This can take many forms, including a disconnected peer, a
	/// channel at capacity, or a channel suspended on an error.
	ChannelUnavailable {
		/// A human-readable error message
		err: String
	},
	/// The host's override proposal could not be accepted, with an explicit reason.
	OverrideRejected {
		/// A human-readable error message
		err: String
	},
}

impl fmt::Debug for APIError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			APIError::APIMisuseError {ref err} => f.write_str(err),
			APIError::ChannelUnavailable {ref err} => f.write_str(err),
			APIError::OverrideRejected {ref err} => f.write_str(err),
		}
	}
}
