// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Replayed serial sessions
//!
//! [`ReplayOpener`] stands in for a serial device: each `open` hands out the
//! next recorded session, which ends with a disconnect. Once the recordings
//! are used up the line stays open but quiet, like an idle scale.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read};
use std::time::Duration;

use super::PortOpener;

pub struct ReplayOpener {
    sessions: VecDeque<Vec<u8>>,
    fail_open: bool,
    idle_poll: Duration,
}

impl ReplayOpener {
    pub fn new(sessions: Vec<Vec<u8>>) -> Self {
        Self {
            sessions: sessions.into(),
            fail_open: false,
            idle_poll: Duration::from_millis(10),
        }
    }

    /// A device that never opens
    pub fn failing() -> Self {
        Self {
            sessions: VecDeque::new(),
            fail_open: true,
            idle_poll: Duration::from_millis(10),
        }
    }
}

impl PortOpener for ReplayOpener {
    fn open(&mut self) -> io::Result<Box<dyn Read + Send>> {
        if self.fail_open {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }
        match self.sessions.pop_front() {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes))),
            None => Ok(Box::new(IdleLine {
                poll: self.idle_poll,
            })),
        }
    }
}

/// Never yields data; every read times out
struct IdleLine {
    poll: Duration,
}

impl Read for IdleLine {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        std::thread::sleep(self.poll);
        Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
    }
}
