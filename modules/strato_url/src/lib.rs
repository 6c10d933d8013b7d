// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
mod url_class;
mod url_search_params;

pub use url_class::Url;
pub use url_search_params::UrlSearchParams;
