//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//

#![deny(
    clippy::all,
    clippy::cargo,
    clippy::else_if_without_else,
    clippy::empty_line_after_outer_attr,
    clippy::multiple_inherent_impl,
    clippy::mut_mut,
    clippy::path_buf_push_overwrite
)]
#![warn(
    clippy::cargo_common_metadata,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::similar_names
)]
#![allow(clippy::multiple_crate_versions, clippy::needless_doctest_main)]

//! A demand-driven parser for chunked byte streams.
//!
//! Transports deliver bytes in chunks whose boundaries carry no meaning: a record header may
//! be split across three network reads, or one read may carry a dozen records. A [Session]
//! hides that framing. The protocol code declares what it wants next, as a sequence of
//! demands:
//! * buffer exactly `n` bytes and hand them over in one contiguous piece,
//! * skip `n` bytes, or the rest of the stream,
//! * pass `n` bytes, or the rest of the stream, through to a downstream [Sink],
//! * finish, dropping whatever follows.
//!
//! Demands are served strictly in order, and the result never depends on how the input was
//! chunked. Sessions are push-based; [StreamDriver] adapts one to a pull-based
//! `tokio::io::AsyncRead`.
//!
//! [Session]: crate::session::Session
//! [Sink]: crate::sink::Sink
//! [StreamDriver]: crate::driver::StreamDriver
//!
mod buffer;
pub mod completion;
pub mod config;
pub mod driver;
pub mod error;
pub mod request;
pub mod session;
pub mod sink;
pub mod trace;

pub use completion::{ChunkReceipt, Completion, Demand};
pub use config::{ParserConfig, ParserConfigBuilder};
pub use driver::StreamDriver;
pub use error::ParserError;
pub use request::{Length, Mode};
pub use session::{Delivery, Session};
pub use sink::{NoSink, Sink};
