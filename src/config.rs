//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//

use derive_builder::*;
use getset::CopyGetters;

pub const DEFAULT_MAX_ACCUMULATE: usize = usize::MAX;
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Settings of a parser session.
#[derive(Builder, Debug, CopyGetters, Clone, PartialEq, Eq)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ParserConfig {
    /// Largest byte count a single `Accumulate` demand may ask for.
    #[get_copy = "pub"]
    #[builder(default = "DEFAULT_MAX_ACCUMULATE")]
    pub max_accumulate: usize,

    /// Capacity of each chunk the pull driver reads from its transport.
    #[get_copy = "pub"]
    #[builder(default = "DEFAULT_READ_BUFFER_SIZE")]
    pub read_buffer_size: usize,
}

impl ParserConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(0) = self.max_accumulate {
            return Err("max_accumulate must be positive".to_string());
        }
        if let Some(0) = self.read_buffer_size {
            return Err("read_buffer_size must be positive".to_string());
        }
        Ok(())
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            max_accumulate: DEFAULT_MAX_ACCUMULATE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}
