//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//

use bytes::{BufMut, Bytes, BytesMut};

///
/// The slices collected so far for the accumulating head request, plus their total length.
/// Reset every time a request completes.
///
#[derive(Debug, Default)]
pub(crate) struct AccumulationBuffer {
    pieces: Vec<Bytes>,
    buffered: usize,
}

impl AccumulationBuffer {
    pub(crate) fn push(&mut self, piece: Bytes) {
        self.buffered += piece.len();
        self.pieces.push(piece);
    }

    pub(crate) fn len(&self) -> usize {
        self.buffered
    }

    ///
    /// Returns the collected bytes as one contiguous buffer and resets the accumulation.
    /// A single piece is handed back as is, without copying.
    ///
    pub(crate) fn take(&mut self) -> Bytes {
        let buffered = self.buffered;
        self.buffered = 0;
        if self.pieces.len() == 1 {
            return self.pieces.pop().unwrap_or_default();
        }
        let mut joined = BytesMut::with_capacity(buffered);
        for piece in self.pieces.drain(..) {
            joined.put(piece);
        }
        joined.freeze()
    }

    pub(crate) fn clear(&mut self) {
        self.pieces.clear();
        self.buffered = 0;
    }
}
