#![forbid(unsafe_code)]

//! Transport layer for Stowage.
//!
//! Transports are blocking on purpose: the engine runs them on its worker
//! pool and only ever polls their completion from the tick thread.

mod error;
mod file;
mod http;
mod retry;
mod traits;
mod types;

pub use crate::{
    error::{NetError, NetResult},
    file::FileTransport,
    http::HttpTransport,
    retry::RetryTransport,
    traits::{Transport, TransportExt},
    types::{FetchRequest, NetOptions, RangeSpec, RetryPolicy},
};

pub use url::Url;
