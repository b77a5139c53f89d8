//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//

use crate::request::Mode;
use snafu::Snafu;

/// The errors a parser session can produce.
///
/// `InvalidDemand` and `DoubleParkedChunk` are structural misuse: the session that
/// raised them is poisoned and every later operation fails with `SessionPoisoned`.
/// `UnsatisfiedAtEndOfStream` is the expected short-read condition that parsers check for.
#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
pub enum ParserError {
    #[snafu(display("Invalid demand: {}", reason))]
    InvalidDemand { reason: String },

    #[snafu(display(
        "A chunk of {} bytes arrived while a chunk of {} bytes is still parked awaiting a demand",
        incoming,
        parked
    ))]
    DoubleParkedChunk { parked: usize, incoming: usize },

    #[snafu(display(
        "Stream ended with {} bytes still outstanding for a {:?} demand",
        remaining,
        mode
    ))]
    UnsatisfiedAtEndOfStream { mode: Mode, remaining: usize },

    #[snafu(display("Stream ended while {} parked bytes were never demanded", len))]
    UnclaimedAtEndOfStream { len: usize },

    #[snafu(display("Parsing is already finished, no more demands are accepted"))]
    AlreadyFinished {},

    #[snafu(display("Stream has ended, no more chunks are accepted"))]
    StreamEnded {},

    #[snafu(display("Dispatch called while another dispatch is in progress"))]
    ReentrantDispatch {},

    #[snafu(display("Session is unusable after earlier misuse: {}", reason))]
    SessionPoisoned { reason: String },

    #[snafu(display("Session was dropped before the demand was resolved"))]
    SessionClosed {},

    #[snafu(display("Failed to read chunk from transport: {}", source))]
    ReadChunk { source: std::io::Error },
}

impl ParserError {
    /// True for the recoverable short-read condition.
    pub fn is_short_read(&self) -> bool {
        matches!(self, ParserError::UnsatisfiedAtEndOfStream { .. })
    }

    /// True for errors that leave the session unusable.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ParserError::InvalidDemand { .. }
                | ParserError::DoubleParkedChunk { .. }
                | ParserError::SessionPoisoned { .. }
        )
    }
}
