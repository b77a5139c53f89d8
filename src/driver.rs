//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//

use crate::completion::{Demand, FromCompletion};
use crate::error::{ParserError, ReadChunk};
use crate::session::Session;
use crate::sink::{NoSink, Sink};
use bytes::{Bytes, BytesMut};
use snafu::ResultExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

///
/// Drives a [`Session`] from a pull-based transport.
///
/// Every demand method enqueues its demand, then reads chunks from the transport and
/// dispatches them until the demand is resolved. Whatever the last chunk held beyond the
/// demand stays parked in the session and is replayed by the next demand, so nothing read
/// from the transport is lost between calls.
///
/// # Examples
/// ```no_run
/// use stream_parser::driver::StreamDriver;
/// use tokio::net::TcpStream;
///
/// #[tokio::main]
/// async fn main() {
///     let stream = TcpStream::connect("127.0.0.1:9090").await.expect("connect");
///     let mut driver = StreamDriver::new(stream);
///     let header = driver.bytes(8).await.expect("read header");
///     let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
///     let _payload = driver.bytes(len).await.expect("read payload");
///     driver.finish().await.expect("finish");
/// }
/// ```
///
pub struct StreamDriver<R, S = NoSink> {
    reader: R,
    session: Session<S>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> StreamDriver<R, NoSink> {
    pub fn new(reader: R) -> Self {
        StreamDriver::with_session(reader, Session::default())
    }
}

impl<R: AsyncRead + Unpin, S: Sink> StreamDriver<R, S> {
    pub fn with_session(reader: R, session: Session<S>) -> Self {
        StreamDriver {
            reader,
            session,
            eof: false,
        }
    }

    pub async fn bytes(&mut self, n: usize) -> Result<Bytes, ParserError> {
        let demand = self.session.demand_bytes(n)?;
        self.fulfil(demand).await
    }

    pub async fn skip(&mut self, n: usize) -> Result<(), ParserError> {
        let demand = self.session.demand_skip(n)?;
        self.fulfil(demand).await
    }

    /// Skips to the end of the transport.
    pub async fn skip_rest(&mut self) -> Result<(), ParserError> {
        let demand = self.session.demand_skip_rest()?;
        self.fulfil(demand).await
    }

    pub async fn passthrough(&mut self, n: usize) -> Result<(), ParserError> {
        let demand = self.session.demand_passthrough(n)?;
        self.fulfil(demand).await
    }

    /// Forwards everything up to the end of the transport.
    pub async fn passthrough_rest(&mut self) -> Result<(), ParserError> {
        let demand = self.session.demand_passthrough_rest()?;
        self.fulfil(demand).await
    }

    /// Stops parsing without waiting for more input; anything left unread is dropped.
    pub async fn finish(&mut self) -> Result<(), ParserError> {
        let demand = self.session.demand_finish()?;
        if !self.session.is_finished() && !self.session.is_ended() {
            // the finish demand is at the head, an empty chunk is enough to reach it
            self.session.dispatch(Bytes::new())?;
        }
        self.fulfil(demand).await
    }

    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<S> {
        &mut self.session
    }

    pub fn into_inner(self) -> (R, Session<S>) {
        (self.reader, self.session)
    }

    async fn fulfil<T: FromCompletion>(&mut self, mut demand: Demand<T>) -> Result<T, ParserError> {
        loop {
            if let Some(result) = demand.try_take() {
                return result;
            }
            if self.eof {
                // demands made after the end are resolved on the spot
                return demand.await;
            }

            let mut chunk = BytesMut::with_capacity(self.session.config().read_buffer_size());
            let read = self.reader.read_buf(&mut chunk).await.context(ReadChunk)?;
            if read == 0 {
                debug!(session = %self.session.id(), "transport reached end of stream");
                self.eof = true;
                match self.session.end() {
                    Ok(()) | Err(ParserError::UnsatisfiedAtEndOfStream { .. }) => {}
                    Err(e) => return Err(e),
                }
            } else {
                self.session.dispatch(chunk.freeze())?;
            }
        }
    }
}
