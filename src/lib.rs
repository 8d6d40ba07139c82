// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

#![crate_name = "lightning_hosted"]

//! A flexible hosted-channel implementation for Lightning wallets, in library form.
//!
//! A hosted channel is a bilateral off-chain channel with a trusted host: there is no funding
//! transaction and no on-chain enforcement, so the channel *is* its cross-signed state. This
//! crate implements that state machine - the signing discipline, the HTLC flows, the
//! reconnect resync, expiry handling and the resize/override recovery protocols - and nothing
//! else. There is no built-in threading/execution environment and it's up to the user to figure
//! out how best to make networking happen/timers fire/things get written to disk, which makes it
//! a good candidate for tight integration into an existing wallet.
//!
//! Trust caveat: the host can always cheat by going silent. What this crate guarantees is that
//! the client ends every interaction holding cryptographic evidence of the balance the host
//! agreed to.

#![cfg_attr(not(any(test, feature = "_test_utils")), deny(missing_docs))]
#![cfg_attr(not(any(test, feature = "_test_utils")), forbid(unsafe_code))]

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

extern crate bitcoin;
#[cfg(any(test, feature = "_test_utils"))] extern crate hex;

#[macro_use]
pub mod util;
pub mod chain;
pub mod ln;
pub mod sign;
