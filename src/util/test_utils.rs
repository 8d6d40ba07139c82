// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use crate::chain::PreimageCheck;
use crate::ln::channel::HostedCommits;
use crate::ln::types::{ChannelId, PaymentHash};
use crate::util::logger::{Logger, Level, Record};
use crate::util::persist::{Persist, PersistenceError};
use crate::util::ser::{Readable, Writeable};

pub struct TestLogger {
	level: Level,
	pub lines: Mutex<HashMap<(String, String), usize>>,
}

impl TestLogger {
	pub fn new() -> TestLogger {
		TestLogger {
			level: Level::Trace,
			lines: Mutex::new(HashMap::new()),
		}
	}
	pub fn enable(&mut self, level: Level) {
		self.level = level;
	}

	/// Search for the number of occurrences of logged lines which
	/// 1. belong to the specified module and
	/// 2. contain `line` in them.
	/// And asserts if the number of occurrences is the same with the given `count`
	pub fn assert_log_contains(&self, module: String, line: String, count: usize) {
		let log_entries = self.lines.lock().unwrap();
		let l: usize = log_entries.iter().filter(|&(&(ref m, ref l), _c)| {
			m == &module && l.contains(line.as_str())
		}).map(|(_, c)| { c }).sum();
		assert_eq!(l, count)
	}
}

impl Logger for TestLogger {
	fn log(&self, record: &Record) {
		*self.lines.lock().unwrap().entry((record.module_path.to_string(), format!("{}", record.args))).or_insert(0) += 1;
		if record.level >= self.level {
			println!("{:<5} [{} : {}, {}] {}", record.level.to_string(), record.module_path, record.file, record.line, record.args);
		}
	}
}

/// An in-memory [`Persist`] implementation which stores the serialized bytes, so tests exercise
/// the real record codec.
#[derive(Clone)]
pub struct TestPersister {
	records: Arc<Mutex<HashMap<ChannelId, Vec<u8>>>>,
	persist_count: Arc<Mutex<usize>>,
}

impl TestPersister {
	pub fn new() -> TestPersister {
		TestPersister {
			records: Arc::new(Mutex::new(HashMap::new())),
			persist_count: Arc::new(Mutex::new(0)),
		}
	}

	pub fn persist_count(&self) -> usize {
		*self.persist_count.lock().unwrap()
	}
}

impl Persist for TestPersister {
	fn persist_channel(&self, channel_id: ChannelId, data: &HostedCommits) -> Result<(), PersistenceError> {
		self.records.lock().unwrap().insert(channel_id, data.encode());
		*self.persist_count.lock().unwrap() += 1;
		Ok(())
	}

	fn read_channels(&self) -> Result<Vec<(ChannelId, HostedCommits)>, PersistenceError> {
		let records = self.records.lock().unwrap();
		let mut channels = Vec::new();
		for (channel_id, bytes) in records.iter() {
			let commits = <HostedCommits as Readable>::read(&mut Cursor::new(bytes))
				.map_err(|e| PersistenceError(format!("corrupt record: {}", e)))?;
			channels.push((*channel_id, commits));
		}
		Ok(channels)
	}
}

/// Records preimage lookup requests without answering them; tests feed completions back into the
/// manager by hand.
pub struct TestPreimageCheck {
	requests: Mutex<Vec<(ChannelId, HashSet<PaymentHash>)>>,
}

impl TestPreimageCheck {
	pub fn new() -> TestPreimageCheck {
		TestPreimageCheck { requests: Mutex::new(Vec::new()) }
	}

	pub fn requests(&self) -> Vec<(ChannelId, HashSet<PaymentHash>)> {
		self.requests.lock().unwrap().clone()
	}
}

impl PreimageCheck for TestPreimageCheck {
	fn process(&self, channel_id: ChannelId, hashes: HashSet<PaymentHash>) {
		self.requests.lock().unwrap().push((channel_id, hashes));
	}
}
