// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
pub mod bytes;
pub mod channel;
pub mod iterable_weak_set;
pub mod mc_oneshot;
pub mod queue;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
