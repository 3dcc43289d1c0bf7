use crate::app::error::Error;
use crate::connection::{HttpResult, Outgoing, SendMessage};
use http::Response as HttpResponse;
use reqwest::blocking::Client;
use reqwest::blocking::Request;
use reqwest::Error as RequestError;
use std::convert::TryFrom;
use std::time::Duration;

impl SendMessage<Outgoing, HttpResult> for Client {
    fn send(&self, data: Outgoing) -> HttpResult {
        let Outgoing { request, timeout } = data;
        let mut req: Request =
            Request::try_from(request).map_err(|err| Error::Request(err.to_string()))?;
        if timeout.is_some() {
            *req.timeout_mut() = timeout;
        }
        let response = self.execute(req).map_err(|err| classify(err, timeout))?;
        let mut builder = HttpResponse::builder()
            .status(response.status())
            .version(response.version());
        for (name, value) in response.headers() {
            builder = builder.header(name, value);
        }
        let body = response.bytes().map_err(|err| classify(err, timeout))?;
        builder
            .body(body)
            .map_err(|err| Error::Unexpected(err.to_string()))
    }
}

fn classify(err: RequestError, timeout: Option<Duration>) -> Error {
    if err.is_timeout() {
        Error::Timeout(timeout.unwrap_or_default())
    } else {
        Error::Connection(err.to_string())
    }
}
