//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//

use crate::buffer::AccumulationBuffer;
use crate::completion::{Callback, ChunkReceipt, Completion, Demand, FromCompletion, Outcome, Resolver};
use crate::config::ParserConfig;
use crate::error::ParserError;
use crate::request::{Length, Mode, Request, RequestQueue};
use crate::sink::{NoSink, Sink};
use bytes::Bytes;
use std::fmt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What became of a dispatched chunk.
#[derive(Debug)]
pub enum Delivery {
    /// Every byte was routed to a demand, or dropped because parsing is finished.
    Consumed,
    /// Some or all of the chunk is waiting for a demand. The receipt resolves once it is consumed.
    Parked(ChunkReceipt),
}

struct ParkedChunk {
    chunk: Bytes,
    ack: oneshot::Sender<Result<(), ParserError>>,
}

enum Drained {
    Consumed,
    Leftover(Bytes),
}

///
/// The parsing state attached to one transport.
///
/// A `Session` turns an arbitrarily chunked byte stream into a sequence of demands
/// declared by the caller. Each demand asks for a number of bytes to be buffered,
/// skipped or passed through to the sink, or marks the end of interest in the stream.
/// Demands are fulfilled strictly in the order they were made, regardless of how the
/// transport splits the data.
///
/// The transport pushes chunks with [`dispatch`] and signals the end of input with [`end`].
/// Demands may be made before or after the data they consume arrives: a chunk that
/// shows up while nothing is demanded is parked and replayed by the next demand.
///
/// # Examples
/// ```
/// use stream_parser::session::Session;
///
/// let mut session = Session::default();
/// let mut header = session.demand_bytes(2).expect("demand header");
/// session.dispatch(vec![0x01u8]).expect("dispatch");
/// session.dispatch(vec![0x02u8, 0x03]).expect("dispatch");
///
/// let header = header.try_take().expect("resolved").expect("two bytes");
/// assert_eq!(&header[..], &[0x01, 0x02]);
/// assert!(session.has_parked());
/// ```
///
/// [`dispatch`]: Session::dispatch
/// [`end`]: Session::end
///
pub struct Session<S = NoSink> {
    id: Uuid,
    config: ParserConfig,
    sink: S,
    requests: RequestQueue<Resolver<S>>,
    buffered: AccumulationBuffer,
    parked: Option<ParkedChunk>,
    finished: bool,
    ended: bool,
    dispatching: bool,
    poisoned: Option<String>,
}

impl Default for Session<NoSink> {
    fn default() -> Self {
        Session::new(NoSink)
    }
}

impl<S: Sink> Session<S> {
    pub fn new(sink: S) -> Self {
        Session::with_config(sink, ParserConfig::default())
    }

    pub fn with_config(sink: S, config: ParserConfig) -> Self {
        let id = Uuid::new_v4();
        debug!("initializing parser session {}", id);
        Session {
            id,
            config,
            sink,
            requests: RequestQueue::new(),
            buffered: AccumulationBuffer::default(),
            parked: None,
            finished: false,
            ended: false,
            dispatching: false,
            poisoned: None,
        }
    }

    /// Buffers `n` bytes and yields them as one contiguous buffer.
    pub fn demand_bytes(&mut self, n: usize) -> Result<Demand<Bytes>, ParserError> {
        self.demand(Length::Exact(n), Mode::Accumulate)
    }

    /// Skips over the next `n` bytes.
    pub fn demand_skip(&mut self, n: usize) -> Result<Demand<()>, ParserError> {
        self.demand(Length::Exact(n), Mode::Discard)
    }

    /// Skips everything that is left in the stream. Resolves at end of stream.
    pub fn demand_skip_rest(&mut self) -> Result<Demand<()>, ParserError> {
        self.demand(Length::Unbounded, Mode::Discard)
    }

    /// Passes the next `n` bytes through to the sink untouched.
    pub fn demand_passthrough(&mut self, n: usize) -> Result<Demand<()>, ParserError> {
        self.demand(Length::Exact(n), Mode::Forward)
    }

    /// Passes everything that is left in the stream through to the sink. Resolves at end of stream.
    pub fn demand_passthrough_rest(&mut self) -> Result<Demand<()>, ParserError> {
        self.demand(Length::Unbounded, Mode::Forward)
    }

    ///
    /// Declares that no more data is of interest. Resolves when the next chunk (possibly empty)
    /// reaches this demand; that chunk and every later one are dropped.
    ///
    pub fn demand_finish(&mut self) -> Result<Demand<()>, ParserError> {
        self.demand(Length::Exact(0), Mode::Finish)
    }

    /// The general form of the demand methods above.
    pub fn enqueue(&mut self, remaining: Length, mode: Mode) -> Result<Demand<Completion>, ParserError> {
        self.demand(remaining, mode)
    }

    pub fn demand_bytes_with<F>(&mut self, n: usize, callback: F) -> Result<(), ParserError>
    where
        F: FnOnce(&mut Session<S>, Result<Bytes, ParserError>) + Send + 'static,
        S: 'static,
    {
        self.demand_with(Length::Exact(n), Mode::Accumulate, callback)
    }

    pub fn demand_skip_with<F>(&mut self, n: usize, callback: F) -> Result<(), ParserError>
    where
        F: FnOnce(&mut Session<S>, Result<(), ParserError>) + Send + 'static,
        S: 'static,
    {
        self.demand_with(Length::Exact(n), Mode::Discard, callback)
    }

    pub fn demand_passthrough_with<F>(&mut self, n: usize, callback: F) -> Result<(), ParserError>
    where
        F: FnOnce(&mut Session<S>, Result<(), ParserError>) + Send + 'static,
        S: 'static,
    {
        self.demand_with(Length::Exact(n), Mode::Forward, callback)
    }

    pub fn demand_finish_with<F>(&mut self, callback: F) -> Result<(), ParserError>
    where
        F: FnOnce(&mut Session<S>, Result<(), ParserError>) + Send + 'static,
        S: 'static,
    {
        self.demand_with(Length::Exact(0), Mode::Finish, callback)
    }

    ///
    /// Callback form of [`enqueue`]. The callback runs inside the session once the demand is
    /// resolved, usually while a chunk is being dispatched, and may make the next demand.
    ///
    /// [`enqueue`]: Session::enqueue
    ///
    pub fn enqueue_with<F>(&mut self, remaining: Length, mode: Mode, callback: F) -> Result<(), ParserError>
    where
        F: FnOnce(&mut Session<S>, Result<Completion, ParserError>) + Send + 'static,
        S: 'static,
    {
        self.demand_with(remaining, mode, callback)
    }

    ///
    /// Feeds one chunk from the transport.
    ///
    /// The chunk is sliced against the pending demands, completing as many as it can in order.
    /// Bytes that no demand claims yet are parked until the next demand is made; at most one
    /// chunk can be parked at a time, so the transport must wait for the returned receipt before
    /// delivering more. Chunks that arrive after parsing finished are dropped silently.
    ///
    pub fn dispatch<B: Into<Bytes>>(&mut self, chunk: B) -> Result<Delivery, ParserError> {
        let chunk = chunk.into();
        self.check_poisoned()?;
        if self.dispatching {
            return Err(ParserError::ReentrantDispatch {});
        }
        if self.ended {
            return Err(ParserError::StreamEnded {});
        }
        debug!(session = %self.id, "dispatch({} bytes)", chunk.len());

        if self.finished {
            debug!(session = %self.id, "already finished, dropping {} bytes on floor", chunk.len());
            return Ok(Delivery::Consumed);
        }
        if let Some(parked) = &self.parked {
            let error = ParserError::DoubleParkedChunk {
                parked: parked.chunk.len(),
                incoming: chunk.len(),
            };
            self.poison(error.to_string());
            return Err(error);
        }

        match self.run(chunk)? {
            Drained::Consumed => Ok(Delivery::Consumed),
            Drained::Leftover(rest) => {
                debug!(session = %self.id, "waiting for next demand, parking {} bytes", rest.len());
                let (ack, receipt) = ChunkReceipt::channel();
                self.parked = Some(ParkedChunk { chunk: rest, ack });
                Ok(Delivery::Parked(receipt))
            }
        }
    }

    ///
    /// Signals that the transport has no more input.
    ///
    /// Pending demands are resolved in order: `Finish` and rest-of-stream demands succeed, any
    /// demand still short of bytes fails with `UnsatisfiedAtEndOfStream`, and the first such
    /// failure is also returned here. Partially buffered bytes are discarded, never delivered.
    ///
    pub fn end(&mut self) -> Result<(), ParserError> {
        self.check_poisoned()?;
        if self.dispatching {
            return Err(ParserError::ReentrantDispatch {});
        }
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        info!(session = %self.id, "end of stream with {} pending demands", self.requests.len());

        if let Some(ParkedChunk { chunk, ack }) = self.parked.take() {
            warn!(session = %self.id, "{} parked bytes were never demanded", chunk.len());
            let _ = ack.send(Err(ParserError::UnclaimedAtEndOfStream { len: chunk.len() }));
        }
        if self.buffered.len() > 0 {
            warn!(session = %self.id, "discarding {} partially buffered bytes", self.buffered.len());
        }
        self.buffered.clear();

        let pending: Vec<_> = self.requests.drain().collect();
        let mut short_read = None;
        for request in pending {
            let outcome = Session::<S>::outcome_at_end(&request);
            if let (None, Err(ParserError::UnsatisfiedAtEndOfStream { mode, remaining })) = (&short_read, &outcome) {
                short_read = Some(ParserError::UnsatisfiedAtEndOfStream {
                    mode: *mode,
                    remaining: *remaining,
                });
            }
            self.resolve(request.into_completion(), outcome);
        }
        match short_read {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// True once a `Finish` demand has been reached.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    pub fn has_parked(&self) -> bool {
        self.parked.is_some()
    }

    /// Length of the parked chunk, zero if none.
    pub fn parked_len(&self) -> usize {
        self.parked.as_ref().map_or(0, |parked| parked.chunk.len())
    }

    /// Number of demands not yet resolved.
    pub fn pending(&self) -> usize {
        self.requests.len()
    }

    /// Bytes collected so far for the accumulating head demand.
    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn demand<T: FromCompletion>(&mut self, remaining: Length, mode: Mode) -> Result<Demand<T>, ParserError> {
        let (tx, demand) = Demand::channel();
        self.submit(remaining, mode, Resolver::Handle(tx))?;
        Ok(demand)
    }

    fn demand_with<T, F>(&mut self, remaining: Length, mode: Mode, callback: F) -> Result<(), ParserError>
    where
        T: FromCompletion + 'static,
        F: FnOnce(&mut Session<S>, Result<T, ParserError>) + Send + 'static,
        S: 'static,
    {
        let callback: Callback<S> = Box::new(move |session: &mut Session<S>, outcome: Outcome| {
            callback(session, outcome.map(T::from_completion))
        });
        self.submit(remaining, mode, Resolver::Callback(callback))
    }

    fn submit(&mut self, remaining: Length, mode: Mode, resolver: Resolver<S>) -> Result<(), ParserError> {
        self.check_poisoned()?;
        if self.finished {
            return Err(ParserError::AlreadyFinished {});
        }
        let request = match self
            .validate(remaining, mode)
            .and_then(|()| Request::new(remaining, mode, resolver))
        {
            Ok(request) => request,
            Err(error) => {
                self.poison(error.to_string());
                return Err(error);
            }
        };

        if self.ended {
            let outcome = Session::<S>::outcome_at_end(&request);
            self.resolve(request.into_completion(), outcome);
            return Ok(());
        }

        debug!(session = %self.id, "demand {:?} of {} bytes", mode, remaining);
        self.requests.push(request);
        self.flush_parked();
        Ok(())
    }

    fn validate(&self, remaining: Length, mode: Mode) -> Result<(), ParserError> {
        match (mode, remaining) {
            (Mode::Accumulate, Length::Exact(n)) if n > self.config.max_accumulate() => {
                Err(ParserError::InvalidDemand {
                    reason: format!(
                        "cannot buffer {} bytes, the limit is {}",
                        n,
                        self.config.max_accumulate()
                    ),
                })
            }
            (Mode::Forward, _) if !self.sink.is_attached() => Err(ParserError::InvalidDemand {
                reason: "cannot pass bytes through without a forwarding sink".to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn outcome_at_end(request: &Request<Resolver<S>>) -> Outcome {
        match (request.mode(), request.remaining()) {
            (Mode::Finish, _) => Ok(Completion::Finished),
            (_, Length::Unbounded) => Ok(Completion::Done),
            (mode, Length::Exact(remaining)) => Err(ParserError::UnsatisfiedAtEndOfStream { mode, remaining }),
        }
    }

    // Replays the parked chunk against the demand that was just queued.
    fn flush_parked(&mut self) {
        if let Some(ParkedChunk { chunk, ack }) = self.parked.take() {
            debug!(session = %self.id, "flushing parked chunk of {} bytes", chunk.len());
            match self.run(chunk) {
                Ok(Drained::Consumed) => {
                    let _ = ack.send(Ok(()));
                }
                Ok(Drained::Leftover(rest)) => {
                    debug!(session = %self.id, "parking the {} bytes left over", rest.len());
                    self.parked = Some(ParkedChunk { chunk: rest, ack });
                }
                Err(error) => {
                    warn!(session = %self.id, "failed to replay parked chunk: {}", error);
                    let _ = ack.send(Err(error));
                }
            }
        }
    }

    fn run(&mut self, chunk: Bytes) -> Result<Drained, ParserError> {
        self.dispatching = true;
        let drained = self.drain(chunk);
        self.dispatching = false;
        drained
    }

    fn drain(&mut self, mut chunk: Bytes) -> Result<Drained, ParserError> {
        loop {
            self.check_poisoned()?;
            if self.finished {
                debug!(session = %self.id, "already finished, dropping {} bytes on floor", chunk.len());
                return Ok(Drained::Consumed);
            }

            let (mode, window) = match self.requests.peek_head() {
                Some(head) => (head.mode(), head.remaining().window(chunk.len())),
                None => return Ok(Drained::Leftover(chunk)),
            };
            if mode == Mode::Finish {
                self.reach_finish(chunk.len());
                return Ok(Drained::Consumed);
            }
            if window == chunk.len() {
                self.route(chunk);
                return Ok(Drained::Consumed);
            }

            let piece = chunk.split_to(window);
            debug!(
                session = %self.id,
                "sliced chunk from {} to {} bytes",
                piece.len() + chunk.len(),
                piece.len()
            );
            self.route(piece);
        }
    }

    fn route(&mut self, piece: Bytes) {
        let len = piece.len();
        let (mode, remaining, satisfied) = match self.requests.head_mut() {
            Some(head) => {
                head.consume(len);
                (head.mode(), head.remaining(), head.is_satisfied())
            }
            None => return,
        };

        if len > 0 {
            match mode {
                Mode::Accumulate => self.buffered.push(piece),
                Mode::Forward => self.sink.forward(piece),
                Mode::Discard | Mode::Finish => {}
            }
        }
        if !satisfied {
            debug!(session = %self.id, "need {} more bytes", remaining);
            return;
        }

        if let Some(request) = self.requests.pop_head() {
            let completion = match mode {
                Mode::Accumulate => Completion::Buffered(self.buffered.take()),
                _ => Completion::Done,
            };
            debug!(session = %self.id, "{:?} demand fulfilled", mode);
            self.resolve(request.into_completion(), Ok(completion));
        }
    }

    fn reach_finish(&mut self, dropped: usize) {
        info!(session = %self.id, "done parsing, dropping {} bytes on floor", dropped);
        self.finished = true;
        let finish = self.requests.pop_head();
        let stranded: Vec<_> = self.requests.drain().collect();
        if let Some(request) = finish {
            self.resolve(request.into_completion(), Ok(Completion::Finished));
        }
        for request in stranded {
            warn!(session = %self.id, "{:?} demand queued after finish will never be met", request);
            self.resolve(request.into_completion(), Err(ParserError::AlreadyFinished {}));
        }
    }

    fn resolve(&mut self, resolver: Resolver<S>, outcome: Outcome) {
        match resolver {
            Resolver::Handle(tx) => {
                if tx.send(outcome).is_err() {
                    debug!(session = %self.id, "demand handle dropped before resolution");
                }
            }
            Resolver::Callback(callback) => callback(self, outcome),
        }
    }

    fn poison(&mut self, reason: String) {
        warn!(session = %self.id, "session poisoned: {}", reason);
        self.poisoned = Some(reason.clone());
        self.buffered.clear();
        if let Some(parked) = self.parked.take() {
            let _ = parked.ack.send(Err(ParserError::SessionPoisoned { reason: reason.clone() }));
        }
        let pending: Vec<_> = self.requests.drain().collect();
        for request in pending {
            self.resolve(
                request.into_completion(),
                Err(ParserError::SessionPoisoned { reason: reason.clone() }),
            );
        }
    }

    fn check_poisoned(&self) -> Result<(), ParserError> {
        match &self.poisoned {
            Some(reason) => Err(ParserError::SessionPoisoned { reason: reason.clone() }),
            None => Ok(()),
        }
    }
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("pending", &self.requests.len())
            .field("buffered", &self.buffered.len())
            .field("parked", &self.parked.as_ref().map(|parked| parked.chunk.len()))
            .field("finished", &self.finished)
            .field("ended", &self.ended)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::{Arc, Mutex};

    fn take<T: FromCompletion>(demand: &mut Demand<T>) -> Result<T, ParserError> {
        demand.try_take().expect("demand should be resolved")
    }

    #[test]
    fn test_single_byte_chunks() {
        let mut session = Session::default();
        let mut demand = session.demand_bytes(4).unwrap();
        for i in 0..4u8 {
            assert!(demand.try_take().is_none());
            assert!(matches!(session.dispatch(vec![i]).unwrap(), Delivery::Consumed));
        }
        assert_eq!(&take(&mut demand).unwrap()[..], &[0, 1, 2, 3]);
        assert_eq!(session.pending(), 0);
        assert_eq!(session.buffered(), 0);
    }

    #[test]
    fn test_one_chunk_many_demands() {
        let mut session = Session::default();
        let mut one = session.demand_bytes(1).unwrap();
        let mut two = session.demand_bytes(2).unwrap();
        let mut three = session.demand_bytes(3).unwrap();

        let delivery = session.dispatch(vec![0u8, 0, 1, 0, 1, 2]).unwrap();
        assert!(matches!(delivery, Delivery::Consumed));
        assert_eq!(&take(&mut one).unwrap()[..], &[0]);
        assert_eq!(&take(&mut two).unwrap()[..], &[0, 1]);
        assert_eq!(&take(&mut three).unwrap()[..], &[0, 1, 2]);
        assert!(!session.has_parked());
    }

    #[test]
    fn test_completions_precede_leftover() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut session = Session::default();
        for (name, n) in vec![("a", 2), ("b", 3), ("c", 1)] {
            let order = order.clone();
            session
                .demand_bytes_with(n, move |session, bytes| {
                    // the leftover of the chunk has not been looked at yet
                    assert!(!session.has_parked());
                    order.lock().unwrap().push((name, bytes.unwrap()));
                })
                .unwrap();
        }

        let delivery = session.dispatch(b"aabbbcxyz".to_vec()).unwrap();
        let order = order.lock().unwrap();
        assert_eq!(
            *order,
            vec![
                ("a", Bytes::from_static(b"aa")),
                ("b", Bytes::from_static(b"bbb")),
                ("c", Bytes::from_static(b"c")),
            ]
        );
        assert!(matches!(delivery, Delivery::Parked(_)));
        assert_eq!(session.parked_len(), 3);
    }

    #[test]
    fn test_slices_share_the_chunk() {
        let chunk = Bytes::from(vec![9u8; 16]);
        let mut session = Session::default();
        let mut first = session.demand_bytes(4).unwrap();
        let mut second = session.demand_bytes(12).unwrap();
        session.dispatch(chunk.clone()).unwrap();
        assert_eq!(take(&mut first).unwrap().as_ptr(), chunk.as_ptr());
        assert_eq!(take(&mut second).unwrap().as_ptr(), chunk[4..].as_ptr());
    }

    #[test]
    fn test_finish_drops_later_bytes() {
        let mut session = Session::default();
        let mut bytes = session.demand_bytes(2).unwrap();
        let mut finish = session.demand_finish().unwrap();

        session.dispatch(vec![1u8, 2, 3, 4]).unwrap();
        assert_eq!(&take(&mut bytes).unwrap()[..], &[1, 2]);
        assert!(take(&mut finish).is_ok());
        assert!(session.is_finished());

        assert!(matches!(session.dispatch(vec![5u8, 6]).unwrap(), Delivery::Consumed));
        assert!(matches!(session.dispatch(Bytes::new()).unwrap(), Delivery::Consumed));
        assert!(!session.has_parked());
        assert_eq!(session.pending(), 0);
        assert!(matches!(session.demand_bytes(1), Err(ParserError::AlreadyFinished {})));
        assert!(session.end().is_ok());
    }

    #[test]
    fn test_finish_needs_a_chunk() {
        let mut session = Session::default();
        let mut bytes = session.demand_bytes(2).unwrap();
        let mut finish = session.demand_finish().unwrap();

        session.dispatch(vec![1u8, 2]).unwrap();
        assert!(take(&mut bytes).is_ok());
        assert!(finish.try_take().is_none());

        session.dispatch(Bytes::new()).unwrap();
        assert!(take(&mut finish).is_ok());
    }

    #[test]
    fn test_demands_behind_finish_fail() {
        let mut session = Session::default();
        let mut finish = session.demand_finish().unwrap();
        let mut stranded = session.demand_bytes(1).unwrap();
        session.dispatch(vec![7u8]).unwrap();
        assert!(take(&mut finish).is_ok());
        assert!(matches!(take(&mut stranded), Err(ParserError::AlreadyFinished {})));
    }

    #[test]
    fn test_passthrough() {
        let mut session = Session::new(Vec::<Bytes>::new());
        let mut forwarded = session.demand_passthrough(5).unwrap();
        let mut trailer = session.demand_bytes(2).unwrap();

        session.dispatch(vec![0u8, 1, 2]).unwrap();
        assert_eq!(session.buffered(), 0);
        session.dispatch(vec![3u8, 4, 5, 6]).unwrap();

        assert!(take(&mut forwarded).is_ok());
        assert_eq!(&take(&mut trailer).unwrap()[..], &[5, 6]);
        let sink = session.into_sink();
        assert_eq!(sink, vec![Bytes::from_static(&[0, 1, 2]), Bytes::from_static(&[3, 4])]);
    }

    #[test]
    fn test_skip() {
        let mut session = Session::default();
        let mut skipped = session.demand_skip(3).unwrap();
        let mut kept = session.demand_bytes(1).unwrap();
        session.dispatch(vec![1u8, 2]).unwrap();
        session.dispatch(vec![3u8, 4]).unwrap();
        assert!(take(&mut skipped).is_ok());
        assert_eq!(&take(&mut kept).unwrap()[..], &[4]);
    }

    #[test]
    fn test_passthrough_without_sink() {
        let mut session = Session::default();
        let result = session.demand_passthrough(1);
        assert!(matches!(result, Err(ParserError::InvalidDemand { .. })));
        assert!(session.is_poisoned());
    }

    #[test]
    fn test_invalid_demands_poison_the_session() {
        let mut session = Session::default();
        let mut pending = session.demand_bytes(8).unwrap();

        let result = session.enqueue(Length::Unbounded, Mode::Accumulate);
        assert!(matches!(result, Err(ParserError::InvalidDemand { .. })));
        assert!(matches!(take(&mut pending), Err(ParserError::SessionPoisoned { .. })));

        assert!(matches!(session.dispatch(vec![1u8]), Err(ParserError::SessionPoisoned { .. })));
        assert!(matches!(session.demand_bytes(1), Err(ParserError::SessionPoisoned { .. })));
        assert!(matches!(session.end(), Err(ParserError::SessionPoisoned { .. })));
    }

    #[test]
    fn test_zero_byte_demand() {
        let mut session = Session::default();
        let result = session.demand_bytes(0);
        assert!(matches!(result, Err(ParserError::InvalidDemand { .. })));
        assert!(result.unwrap_err().is_structural());
    }

    #[test]
    fn test_accumulate_limit() {
        let config = crate::config::ParserConfigBuilder::default()
            .max_accumulate(4usize)
            .build()
            .unwrap();
        let mut session = Session::with_config(NoSink, config);
        assert!(session.demand_bytes(4).is_ok());
        assert!(matches!(session.demand_bytes(5), Err(ParserError::InvalidDemand { .. })));
    }

    #[test]
    fn test_parked_chunk_is_replayed() {
        let mut session = Session::default();
        let mut receipt = match session.dispatch(vec![1u8, 2, 3]).unwrap() {
            Delivery::Parked(receipt) => receipt,
            Delivery::Consumed => panic!("chunk should be parked"),
        };
        assert_eq!(session.parked_len(), 3);
        assert!(receipt.try_take().is_none());

        let mut first = session.demand_bytes(2).unwrap();
        assert_eq!(&take(&mut first).unwrap()[..], &[1, 2]);
        assert_eq!(session.parked_len(), 1);
        assert!(receipt.try_take().is_none());

        let mut second = session.demand_bytes(2).unwrap();
        assert!(!session.has_parked());
        assert!(second.try_take().is_none());
        assert!(receipt.now_or_never().unwrap().is_ok());

        session.dispatch(vec![4u8]).unwrap();
        assert_eq!(&take(&mut second).unwrap()[..], &[3, 4]);
    }

    #[test]
    fn test_double_parked_chunk() {
        let mut session = Session::default();
        let receipt = match session.dispatch(vec![1u8]).unwrap() {
            Delivery::Parked(receipt) => receipt,
            Delivery::Consumed => panic!("chunk should be parked"),
        };
        let result = session.dispatch(vec![2u8]);
        assert!(matches!(
            result,
            Err(ParserError::DoubleParkedChunk { parked: 1, incoming: 1 })
        ));
        assert!(matches!(
            receipt.now_or_never().unwrap(),
            Err(ParserError::SessionPoisoned { .. })
        ));
        assert!(matches!(session.demand_bytes(1), Err(ParserError::SessionPoisoned { .. })));
    }

    #[test]
    fn test_empty_chunk_is_parked_for_finish() {
        let mut session = Session::default();
        assert!(matches!(session.dispatch(Bytes::new()).unwrap(), Delivery::Parked(_)));
        let mut finish = session.demand_finish().unwrap();
        assert!(take(&mut finish).is_ok());
        assert!(session.is_finished());
    }

    #[test]
    fn test_end_with_short_read() {
        let mut session = Session::default();
        let mut short = session.demand_bytes(4).unwrap();
        let mut behind = session.demand_skip(1).unwrap();
        session.dispatch(vec![1u8, 2]).unwrap();

        let result = session.end();
        assert!(matches!(
            result,
            Err(ParserError::UnsatisfiedAtEndOfStream {
                mode: Mode::Accumulate,
                remaining: 2
            })
        ));
        assert!(result.unwrap_err().is_short_read());
        assert!(matches!(take(&mut short), Err(ParserError::UnsatisfiedAtEndOfStream { remaining: 2, .. })));
        assert!(matches!(take(&mut behind), Err(ParserError::UnsatisfiedAtEndOfStream { remaining: 1, .. })));
        assert_eq!(session.buffered(), 0);

        assert!(matches!(session.dispatch(vec![3u8]), Err(ParserError::StreamEnded {})));
        assert!(session.end().is_ok());

        let mut late = session.demand_bytes(3).unwrap();
        assert!(matches!(take(&mut late), Err(ParserError::UnsatisfiedAtEndOfStream { remaining: 3, .. })));
        let mut late_finish = session.demand_finish().unwrap();
        assert!(take(&mut late_finish).is_ok());
    }

    #[test]
    fn test_end_satisfies_rest_of_stream() {
        let mut session = Session::new(bytes::BytesMut::new());
        let mut rest = session.demand_passthrough_rest().unwrap();
        let mut finish = session.demand_finish().unwrap();
        session.dispatch(vec![1u8, 2, 3]).unwrap();
        session.dispatch(vec![4u8]).unwrap();
        assert!(rest.try_take().is_none());

        assert!(session.end().is_ok());
        assert!(take(&mut rest).is_ok());
        assert!(take(&mut finish).is_ok());
        assert_eq!(&session.sink()[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_end_with_parked_chunk() {
        let mut session = Session::default();
        let receipt = match session.dispatch(vec![1u8, 2]).unwrap() {
            Delivery::Parked(receipt) => receipt,
            Delivery::Consumed => panic!("chunk should be parked"),
        };
        assert!(session.end().is_ok());
        assert!(matches!(
            receipt.now_or_never().unwrap(),
            Err(ParserError::UnclaimedAtEndOfStream { len: 2 })
        ));
    }

    #[test]
    fn test_dropped_session_closes_demands() {
        let mut session = Session::default();
        let demand = session.demand_bytes(1).unwrap();
        drop(session);
        assert!(matches!(
            demand.now_or_never().unwrap(),
            Err(ParserError::SessionClosed {})
        ));
    }

    type Frames = Arc<Mutex<Vec<Bytes>>>;
    type Step = Box<dyn FnOnce(&mut Session, Result<Bytes, ParserError>) + Send>;

    // length-prefixed frames: one length byte, then that many bytes of body
    fn on_header(frames: Frames) -> Step {
        Box::new(move |session: &mut Session, header: Result<Bytes, ParserError>| {
            let len = header.unwrap()[0] as usize;
            session.demand_bytes_with(len, on_body(frames)).unwrap();
        })
    }

    fn on_body(frames: Frames) -> Step {
        Box::new(move |session: &mut Session, body: Result<Bytes, ParserError>| {
            frames.lock().unwrap().push(body.unwrap());
            session.demand_bytes_with(1, on_header(frames)).unwrap();
        })
    }

    #[test]
    fn test_reentrant_demands_from_callbacks() {
        let input = b"\x03abc\x02de\x01f".to_vec();
        let expected = vec![
            Bytes::from_static(b"abc"),
            Bytes::from_static(b"de"),
            Bytes::from_static(b"f"),
        ];

        let frames: Frames = Arc::new(Mutex::new(Vec::new()));
        let mut session = Session::default();
        session.demand_bytes_with(1, on_header(frames.clone())).unwrap();
        assert!(matches!(session.dispatch(input.clone()).unwrap(), Delivery::Consumed));
        assert_eq!(*frames.lock().unwrap(), expected);
        assert_eq!(session.pending(), 1);

        let frames: Frames = Arc::new(Mutex::new(Vec::new()));
        let mut session = Session::default();
        session.demand_bytes_with(1, on_header(frames.clone())).unwrap();
        for byte in input {
            session.dispatch(vec![byte]).unwrap();
        }
        assert_eq!(*frames.lock().unwrap(), expected);
    }

    #[test]
    fn test_dispatch_from_callback_is_rejected() {
        let seen = Arc::new(Mutex::new(None));
        let mut session = Session::default();
        let slot = seen.clone();
        session
            .demand_bytes_with(1, move |session, _| {
                *slot.lock().unwrap() = Some(session.dispatch(vec![0u8]).is_err());
            })
            .unwrap();
        session.dispatch(vec![1u8]).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_generic_enqueue() {
        let mut session = Session::default();
        let mut bytes = session.enqueue(Length::Exact(1), Mode::Accumulate).unwrap();
        let mut skip = session.enqueue(Length::Exact(1), Mode::Discard).unwrap();
        let mut finish = session.enqueue(Length::Exact(0), Mode::Finish).unwrap();
        session.dispatch(vec![1u8, 2, 3]).unwrap();
        assert_eq!(take(&mut bytes).unwrap(), Completion::Buffered(Bytes::from_static(&[1])));
        assert_eq!(take(&mut skip).unwrap(), Completion::Done);
        assert_eq!(take(&mut finish).unwrap(), Completion::Finished);
    }
}
