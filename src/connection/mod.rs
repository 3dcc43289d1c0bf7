pub mod http;

use crate::app::error::Error;
use bytes::Bytes;
use std::time::Duration;

pub trait SendMessage<T, R> {
    fn send(&self, data: T) -> R;
}

/// A prepared request together with the time it may take at most.
#[derive(Debug)]
pub struct Outgoing {
    pub request: ::http::Request<Vec<u8>>,
    pub timeout: Option<Duration>,
}

pub type HttpResult = Result<::http::Response<Bytes>, Error>;
