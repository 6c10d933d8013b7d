// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
mod body;
mod body_stream;
mod decompress;
mod fetch;
mod headers;
mod request;
mod response;

pub use body::{Body, BodyInit, ExtractedBody};
pub use body_stream::{ContentEncoding, RequestResource};
pub use fetch::fetch;
pub use headers::{Headers, HeadersGuard};
pub use request::{
    Request, RequestCache, RequestCredentials, RequestInfo, RequestInit, RequestMode,
    RequestRedirect,
};
pub use response::{HttpBody, Response, ResponseInit, ResponseType};
