// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Terminator based frame splitting

use log::warn;

use super::RawFrame;

/// Splits a byte stream on a terminator sequence.
///
/// When more than `max_length` bytes accumulate without a terminator the
/// buffer is discarded, and so is everything up to the next terminator, so a
/// noisy line cannot grow the buffer or produce a truncated frame.
#[derive(Debug)]
pub struct FrameSplitter {
    buffer: Vec<u8>,
    terminator: Vec<u8>,
    max_length: usize,
    discarding: bool,
    overflows: u64,
}

impl FrameSplitter {
    pub fn new(terminator: impl Into<Vec<u8>>, max_length: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_length.min(1024)),
            terminator: terminator.into(),
            max_length: max_length.max(1),
            discarding: false,
            overflows: 0,
        }
    }

    /// Feed received bytes, returning the frames they complete
    pub fn feed(&mut self, data: &[u8]) -> Vec<RawFrame> {
        let mut frames = Vec::new();

        for &byte in data {
            self.buffer.push(byte);

            if self.buffer.ends_with(&self.terminator) {
                let end = self.buffer.len() - self.terminator.len();
                if self.discarding {
                    self.discarding = false;
                } else if end > 0 {
                    frames.push(RawFrame::new(&self.buffer[..end]));
                }
                self.buffer.clear();
                continue;
            }

            // A full frame plus a partial terminator is the longest valid
            // buffer; keep enough bytes to recognise a split terminator
            if self.buffer.len() >= self.max_length + self.terminator.len() {
                if !self.discarding {
                    self.overflows += 1;
                    warn!(
                        "No terminator within {} bytes, discarding buffered data",
                        self.max_length
                    );
                    self.discarding = true;
                }
                let keep = self.terminator.len().saturating_sub(1);
                let start = self.buffer.len() - keep;
                self.buffer.drain(..start);
            }
        }

        frames
    }

    /// Forget partial data, e.g. after the device was reopened
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    /// Number of times the buffer overflowed
    pub fn overflows(&self) -> u64 {
        self.overflows
    }
}
