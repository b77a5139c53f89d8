//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//

use tracing::{dispatcher, Dispatch, Level};
use tracing_subscriber::FmtSubscriber;

/// Installs a formatting subscriber for the session logs at the default `INFO` level.
pub fn init() -> bool {
    init_with_level(Level::INFO)
}

///
/// Installs a formatting subscriber that records events up to `level`.
///
/// Only the first call in a process takes effect; later calls, or a global subscriber
/// installed by the application, are left in place and `false` is returned.
///
pub fn init_with_level(level: Level) -> bool {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_ansi(true)
        .finish();

    let my_dispatch = Dispatch::new(subscriber);
    dispatcher::set_global_default(my_dispatch).is_ok()
}
