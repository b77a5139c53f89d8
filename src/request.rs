//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//

use crate::error::ParserError;
use snafu::ensure;
use std::collections::vec_deque::Drain;
use std::collections::VecDeque;
use std::fmt;

/// What happens to the bytes consumed for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Buffer the bytes and hand them back as one contiguous buffer.
    Accumulate,
    /// Consume the bytes without keeping them.
    Discard,
    /// Relay the bytes untouched to the forwarding sink.
    Forward,
    /// Stop consuming; every later byte is dropped.
    Finish,
}

/// How many bytes a request still needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Length {
    Exact(usize),
    /// The rest of the stream. Only valid for `Discard` and `Forward`.
    Unbounded,
}

impl Length {
    /// The number of bytes of a chunk of `available` bytes that belong to this request.
    pub fn window(&self, available: usize) -> usize {
        match *self {
            Length::Exact(n) => n.min(available),
            Length::Unbounded => available,
        }
    }

    fn consume(&mut self, n: usize) {
        if let Length::Exact(left) = self {
            assert!(n <= *left, "consumed {} bytes but only {} were left", n, left);
            *left -= n;
        }
    }

    fn is_zero(&self) -> bool {
        *self == Length::Exact(0)
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Length::Exact(n) => write!(f, "{}", n),
            Length::Unbounded => write!(f, "unbounded"),
        }
    }
}

///
/// A single unit of demand: a byte count, a mode and the completion that is
/// resolved once the count reaches zero.
///
pub struct Request<R> {
    remaining: Length,
    mode: Mode,
    completion: R,
}

impl<R> Request<R> {
    ///
    /// Validates the demand and creates the request.
    /// The count must be positive, and only `Discard`/`Forward` may ask for the rest of the stream.
    /// The count of a `Finish` request is ignored.
    ///
    pub fn new(remaining: Length, mode: Mode, completion: R) -> Result<Self, ParserError> {
        if mode == Mode::Finish {
            return Ok(Request::finish(completion));
        }
        ensure!(
            !remaining.is_zero(),
            crate::error::InvalidDemand {
                reason: format!("can only demand a positive number of bytes for {:?}", mode),
            }
        );
        ensure!(
            !(mode == Mode::Accumulate && remaining == Length::Unbounded),
            crate::error::InvalidDemand {
                reason: "can only buffer a finite number of bytes".to_string(),
            }
        );
        Ok(Request {
            remaining,
            mode,
            completion,
        })
    }

    pub fn finish(completion: R) -> Self {
        Request {
            remaining: Length::Exact(0),
            mode: Mode::Finish,
            completion,
        }
    }

    pub fn remaining(&self) -> Length {
        self.remaining
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Accounts `n` consumed bytes against this request.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the remaining count.
    pub fn consume(&mut self, n: usize) {
        self.remaining.consume(n);
    }

    /// A satisfied request is ready to be retired from the queue.
    pub fn is_satisfied(&self) -> bool {
        self.mode == Mode::Finish || self.remaining.is_zero()
    }

    pub fn into_completion(self) -> R {
        self.completion
    }
}

impl<R> fmt::Debug for Request<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("remaining", &self.remaining)
            .field("mode", &self.mode)
            .finish()
    }
}

///
/// FIFO of pending requests. Insertion order is fulfillment order and only the
/// head is ever drained.
///
pub struct RequestQueue<R> {
    requests: VecDeque<Request<R>>,
}

impl<R> RequestQueue<R> {
    pub fn new() -> Self {
        RequestQueue {
            requests: VecDeque::new(),
        }
    }

    /// Validates a demand and appends it to the tail.
    pub fn enqueue(&mut self, remaining: Length, mode: Mode, completion: R) -> Result<(), ParserError> {
        let request = Request::new(remaining, mode, completion)?;
        self.requests.push_back(request);
        Ok(())
    }

    pub fn push(&mut self, request: Request<R>) {
        self.requests.push_back(request);
    }

    pub fn peek_head(&self) -> Option<&Request<R>> {
        self.requests.front()
    }

    pub fn head_mut(&mut self) -> Option<&mut Request<R>> {
        self.requests.front_mut()
    }

    ///
    /// Removes the head request.
    ///
    /// # Panics
    ///
    /// Panics if the head still needs bytes.
    ///
    pub fn pop_head(&mut self) -> Option<Request<R>> {
        if let Some(head) = self.requests.front() {
            assert!(head.is_satisfied(), "popped an unsatisfied request {:?}", head);
        }
        self.requests.pop_front()
    }

    /// Removes every request regardless of its state, in queue order.
    pub fn drain(&mut self) -> Drain<'_, Request<R>> {
        self.requests.drain(..)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl<R> Default for RequestQueue<R> {
    fn default() -> Self {
        RequestQueue::new()
    }
}
