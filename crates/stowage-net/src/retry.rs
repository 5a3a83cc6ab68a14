use std::{io::Write, thread};

use tracing::warn;

use crate::{
    error::{NetError, NetResult},
    traits::Transport,
    types::{FetchRequest, RetryPolicy},
};

/// Retry decorator for [`Transport`] implementations.
///
/// An attempt is only retried when it failed before writing any byte to the
/// sink; partially written bodies are left to the caller, which knows how to
/// resume them.
pub struct RetryTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn should_retry(&self, error: &NetError, attempt: u32) -> bool {
        attempt < self.policy.max_retries && error.is_retryable()
    }
}

impl<T: Transport> Transport for RetryTransport<T> {
    fn fetch(
        &self,
        request: &FetchRequest,
        sink: &mut dyn Write,
        progress: &mut dyn FnMut(u64),
    ) -> NetResult<u64> {
        let mut attempt = 0;
        loop {
            let mut written = 0u64;
            let result = self.inner.fetch(request, sink, &mut |bytes| {
                written = bytes;
                progress(bytes);
            });
            match result {
                Ok(bytes) => return Ok(bytes),
                Err(error) if written == 0 && self.should_retry(&error, attempt) => {
                    attempt += 1;
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(url = %request.url, attempt, ?delay, %error, "retrying fetch");
                    thread::sleep(delay);
                }
                Err(error) if written == 0 && attempt > 0 && error.is_retryable() => {
                    return Err(NetError::RetryExhausted {
                        max_retries: self.policy.max_retries,
                        source: Box::new(error),
                    });
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn content_length(&self, request: &FetchRequest) -> NetResult<Option<u64>> {
        self.inner.content_length(request)
    }
}
