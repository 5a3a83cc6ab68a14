//! Retry decorator behaviour against a scripted transport.

use std::{
    io::Write,
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use stowage_net::{
    FetchRequest, NetError, NetResult, RetryPolicy, Transport, TransportExt, Url,
};

/// Fails with the scripted errors in order, then succeeds with `body`.
struct Scripted {
    failures: Mutex<Vec<(NetError, usize)>>,
    body: &'static [u8],
    calls: AtomicU32,
}

impl Scripted {
    fn new(failures: Vec<(NetError, usize)>) -> Self {
        Self {
            failures: Mutex::new(failures),
            body: b"payload",
            calls: AtomicU32::new(0),
        }
    }
}

impl Transport for Scripted {
    fn fetch(
        &self,
        _request: &FetchRequest,
        sink: &mut dyn Write,
        progress: &mut dyn FnMut(u64),
    ) -> NetResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures.lock().unwrap();
        if !failures.is_empty() {
            let (error, partial) = failures.remove(0);
            if partial > 0 {
                sink.write_all(&self.body[..partial])?;
                progress(partial as u64);
            }
            return Err(error);
        }
        sink.write_all(self.body)?;
        progress(self.body.len() as u64);
        Ok(self.body.len() as u64)
    }
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(2))
}

fn request() -> FetchRequest {
    FetchRequest::new(Url::parse("http://cdn.example/bundle").unwrap())
}

#[test]
fn test_transient_failures_are_retried() {
    let transport = Scripted::new(vec![
        (NetError::http_status(503, "u"), 0),
        (NetError::Timeout, 0),
    ])
    .with_retry(fast_policy(3));

    let mut out = Vec::new();
    let written = transport.fetch(&request(), &mut out, &mut |_| {}).unwrap();
    assert_eq!(written, 7);
    assert_eq!(out, b"payload");
    assert_eq!(transport.inner().calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_permanent_failure_is_not_retried() {
    let transport = Scripted::new(vec![(
        NetError::NotFound {
            url: "http://cdn.example/bundle".into(),
        },
        0,
    )])
    .with_retry(fast_policy(3));

    let err = transport
        .fetch(&request(), &mut Vec::new(), &mut |_| {})
        .unwrap_err();
    assert!(matches!(err, NetError::NotFound { .. }));
    assert_eq!(transport.inner().calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_partial_body_is_not_retried() {
    let transport = Scripted::new(vec![(NetError::Http("reset".into()), 3)])
        .with_retry(fast_policy(3));

    let mut out = Vec::new();
    let err = transport.fetch(&request(), &mut out, &mut |_| {}).unwrap_err();
    assert_eq!(err, NetError::Http("reset".into()));
    assert_eq!(out, b"pay");
    assert_eq!(transport.inner().calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_exhausted_retries_wrap_the_last_error() {
    let transport = Scripted::new(vec![
        (NetError::Timeout, 0),
        (NetError::Timeout, 0),
        (NetError::Timeout, 0),
    ])
    .with_retry(fast_policy(2));

    let err = transport
        .fetch(&request(), &mut Vec::new(), &mut |_| {})
        .unwrap_err();
    assert_eq!(
        err,
        NetError::RetryExhausted {
            max_retries: 2,
            source: Box::new(NetError::Timeout),
        }
    );
    assert_eq!(transport.inner().calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_partial_body_after_retry_is_not_reported_as_exhausted() {
    let transport = Scripted::new(vec![
        (NetError::Timeout, 0),
        (NetError::Http("reset".into()), 3),
    ])
    .with_retry(fast_policy(3));

    let mut out = Vec::new();
    let err = transport.fetch(&request(), &mut out, &mut |_| {}).unwrap_err();
    assert_eq!(err, NetError::Http("reset".into()));
    assert_eq!(out, b"pay");
    assert_eq!(transport.inner().calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_exhausted_error_reports_the_policy_limit() {
    let transport = Scripted::new(vec![(NetError::Timeout, 0); 6]).with_retry(fast_policy(4));

    let err = transport
        .fetch(&request(), &mut Vec::new(), &mut |_| {})
        .unwrap_err();
    assert!(matches!(err, NetError::RetryExhausted { max_retries: 4, .. }));
    assert_eq!(err.to_string(), "Request failed after 4 retries: Timeout");
    assert_eq!(transport.inner().calls.load(Ordering::SeqCst), 5);
}
