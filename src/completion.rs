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
use crate::session::Session;
use bytes::Bytes;
use futures::ready;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// The value a request resolves with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The bytes collected by an `Accumulate` request.
    Buffered(Bytes),
    /// A `Discard` or `Forward` request consumed its bytes.
    Done,
    /// The `Finish` request was reached.
    Finished,
}

/// Conversion from a raw completion into the value a typed demand yields.
pub trait FromCompletion: Sized {
    fn from_completion(completion: Completion) -> Self;
}

impl FromCompletion for Completion {
    fn from_completion(completion: Completion) -> Self {
        completion
    }
}

impl FromCompletion for Bytes {
    fn from_completion(completion: Completion) -> Self {
        match completion {
            Completion::Buffered(bytes) => bytes,
            Completion::Done | Completion::Finished => Bytes::new(),
        }
    }
}

impl FromCompletion for () {
    fn from_completion(_completion: Completion) -> Self {}
}

pub(crate) type Outcome = Result<Completion, ParserError>;

pub(crate) type Callback<S> = Box<dyn FnOnce(&mut Session<S>, Outcome) + Send>;

///
/// How a request reports back: through a handle the caller awaits, or through a
/// callback run inside the session with mutable access to it.
///
pub(crate) enum Resolver<S> {
    Handle(oneshot::Sender<Outcome>),
    Callback(Callback<S>),
}

impl<S> fmt::Debug for Resolver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolver::Handle(_) => f.write_str("Resolver::Handle"),
            Resolver::Callback(_) => f.write_str("Resolver::Callback"),
        }
    }
}

///
/// Completion handle of a demand. Resolves exactly once with the demanded value,
/// or with the error that prevented the demand from being met.
///
/// `Demand` is a future; in contexts without an executor use [`Demand::try_take`].
///
/// [`Demand::try_take`]: Demand::try_take
///
pub struct Demand<T> {
    receiver: oneshot::Receiver<Outcome>,
    taken: bool,
    _value: PhantomData<fn() -> T>,
}

impl<T: FromCompletion> Demand<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<Outcome>) -> Self {
        Demand {
            receiver,
            taken: false,
            _value: PhantomData,
        }
    }

    pub(crate) fn channel() -> (oneshot::Sender<Outcome>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Demand::new(rx))
    }

    ///
    /// Takes the result if the demand has been resolved, without waiting.
    /// Returns `None` while the demand is still pending or once the result has been taken.
    ///
    pub fn try_take(&mut self) -> Option<Result<T, ParserError>> {
        if self.taken {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(outcome) => {
                self.taken = true;
                Some(outcome.map(T::from_completion))
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => {
                self.taken = true;
                Some(Err(ParserError::SessionClosed {}))
            }
        }
    }
}

impl<T: FromCompletion> Future for Demand<T> {
    type Output = Result<T, ParserError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        assert!(!self.taken, "demand polled after its result was taken");
        let outcome = ready!(Pin::new(&mut self.receiver).poll(cx));
        self.taken = true;
        Poll::Ready(match outcome {
            Ok(outcome) => outcome.map(T::from_completion),
            Err(_) => Err(ParserError::SessionClosed {}),
        })
    }
}

impl<T> fmt::Debug for Demand<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demand").field("taken", &self.taken).finish()
    }
}

///
/// Returned for a chunk that had to be parked because nothing was demanded yet.
/// Resolves once the parked bytes have been consumed by later demands, which is the
/// transport's signal that it may deliver more data.
///
#[derive(Debug)]
pub struct ChunkReceipt {
    receiver: oneshot::Receiver<Result<(), ParserError>>,
}

impl ChunkReceipt {
    pub(crate) fn channel() -> (oneshot::Sender<Result<(), ParserError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, ChunkReceipt { receiver: rx })
    }

    /// Whether the parked chunk has been fully processed, without waiting.
    pub fn try_take(&mut self) -> Option<Result<(), ParserError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(ParserError::SessionClosed {})),
        }
    }
}

impl Future for ChunkReceipt {
    type Output = Result<(), ParserError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = ready!(Pin::new(&mut self.receiver).poll(cx));
        Poll::Ready(result.unwrap_or(Err(ParserError::SessionClosed {})))
    }
}
