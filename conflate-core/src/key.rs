// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Keys for stats buckets

use std::{
    borrow::Cow,
    fmt,
    hash::{BuildHasher, Hash, Hasher},
};

use ahash::RandomState;

// Fixed seeds keep the precomputed hash stable for the lifetime of the process without
// depending on per-map random state.
fn key_hasher() -> RandomState {
    RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
}

/// Identity of one line in a stats bucket.
///
/// Equality covers all five labels. The hash is computed once at construction, so the key can be
/// looked up repeatedly in the pending table and the aggregate map without rehashing its strings.
///
/// ```
/// use conflate_core::AggregationKey;
///
/// let key = AggregationKey::new("GET /users", "web", "http.request", "web", 200);
/// assert_eq!(key.resource(), "GET /users");
/// assert_eq!(key.http_status_code(), 200);
/// ```
#[derive(Clone)]
pub struct AggregationKey {
    resource: Cow<'static, str>,
    service: Cow<'static, str>,
    operation: Cow<'static, str>,
    span_type: Cow<'static, str>,
    http_status_code: u16,
    hash: u64,
}

impl AggregationKey {
    /// Create a key. Use `0` for `http_status_code` and an empty `span_type` when not applicable.
    pub fn new(
        resource: impl Into<Cow<'static, str>>,
        service: impl Into<Cow<'static, str>>,
        operation: impl Into<Cow<'static, str>>,
        span_type: impl Into<Cow<'static, str>>,
        http_status_code: u16,
    ) -> Self {
        let resource = resource.into();
        let service = service.into();
        let operation = operation.into();
        let span_type = span_type.into();

        let mut hasher = key_hasher().build_hasher();
        resource.hash(&mut hasher);
        service.hash(&mut hasher);
        operation.hash(&mut hasher);
        span_type.hash(&mut hasher);
        http_status_code.hash(&mut hasher);
        let hash = hasher.finish();

        Self {
            resource,
            service,
            operation,
            span_type,
            http_status_code,
            hash,
        }
    }

    /// Resource name, e.g. a normalized endpoint or query
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Service name
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Operation name
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span type, empty when unset
    pub fn span_type(&self) -> &str {
        &self.span_type
    }

    /// HTTP status code, `0` when unset
    pub fn http_status_code(&self) -> u16 {
        self.http_status_code
    }
}

impl PartialEq for AggregationKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.http_status_code == other.http_status_code
            && self.resource == other.resource
            && self.service == other.service
            && self.operation == other.operation
            && self.span_type == other.span_type
    }
}

impl Eq for AggregationKey {}

impl Hash for AggregationKey {
    fn hash<S: Hasher>(&self, state: &mut S) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationKey")
            .field("resource", &self.resource)
            .field("service", &self.service)
            .field("operation", &self.operation)
            .field("span_type", &self.span_type)
            .field("http_status_code", &self.http_status_code)
            .finish()
    }
}
