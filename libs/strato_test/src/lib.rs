// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::future::Future;

use tokio::task::LocalSet;

/// Runs a future on a fresh `LocalSet`, the task context the stream engine
/// and serve loop expect. Tests wrap their bodies in this.
pub async fn test_local<F: Future>(future: F) -> F::Output {
    LocalSet::new().run_until(future).await
}
