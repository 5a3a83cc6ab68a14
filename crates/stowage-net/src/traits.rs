use std::io::Write;

use crate::{
    error::NetResult,
    retry::RetryTransport,
    types::{FetchRequest, RetryPolicy},
};

/// Something that can stream the body behind a [`FetchRequest`] into a sink.
///
/// Implementations block until the body is fully written or an error occurs.
/// `progress` receives the number of body bytes written so far, starting from
/// zero for this call regardless of any requested range.
pub trait Transport: Send + Sync {
    /// Returns the number of body bytes written to `sink`.
    ///
    /// When `request.range` is set and the remote ignores it, implementations
    /// must return [`crate::NetError::RangeIgnored`] before writing anything.
    fn fetch(
        &self,
        request: &FetchRequest,
        sink: &mut dyn Write,
        progress: &mut dyn FnMut(u64),
    ) -> NetResult<u64>;

    /// Size of the resource, when the transport can tell cheaply.
    fn content_length(&self, _request: &FetchRequest) -> NetResult<Option<u64>> {
        Ok(None)
    }
}

pub trait TransportExt: Transport + Sized {
    /// Add retry layer
    fn with_retry(self, policy: RetryPolicy) -> RetryTransport<Self> {
        RetryTransport::new(self, policy)
    }
}

impl<T: Transport> TransportExt for T {}
