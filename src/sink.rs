//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

/// Downstream consumer of the bytes a `Forward` demand passes through.
///
/// Chunks are handed over synchronously during dispatch, in stream order.
pub trait Sink {
    fn forward(&mut self, chunk: Bytes);

    /// A detached sink cannot take forwarded bytes, so `Forward` demands are rejected up front.
    fn is_attached(&self) -> bool {
        true
    }
}

/// The sink of a session that only reads: it has no downstream side.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSink;

impl Sink for NoSink {
    fn forward(&mut self, chunk: Bytes) {
        warn!("no forwarding sink attached, dropping {} bytes", chunk.len());
    }

    fn is_attached(&self) -> bool {
        false
    }
}

impl Sink for BytesMut {
    fn forward(&mut self, chunk: Bytes) {
        self.extend_from_slice(&chunk);
    }
}

impl Sink for Vec<Bytes> {
    fn forward(&mut self, chunk: Bytes) {
        self.push(chunk);
    }
}

impl Sink for UnboundedSender<Bytes> {
    fn forward(&mut self, chunk: Bytes) {
        if let Err(e) = self.send(chunk) {
            warn!("forwarding receiver dropped, discarding {} bytes", e.0.len());
        }
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn forward(&mut self, chunk: Bytes) {
        (**self).forward(chunk)
    }

    fn is_attached(&self) -> bool {
        (**self).is_attached()
    }
}
