use std::time::Duration;

use url::Url;

use crate::{Error, Result};

/// An outgoing delivery call.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Full delivery URL, including `client` and `sessionId` query parameters.
    pub url: Url,
    /// Extra headers. `Content-Type: application/json` is implied by the JSON body.
    pub headers: Vec<(&'static str, String)>,
    /// JSON body.
    pub body: serde_json::Value,
    /// Timeout for the whole call.
    pub timeout: Duration,
}

/// Response to a delivery call.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Create a `200 OK` response with a JSON body.
    pub fn ok(body: &serde_json::Value) -> Self {
        HttpResponse {
            status: 200,
            body: body.to_string().into_bytes(),
        }
    }
}

/// Performs delivery calls.
///
/// Calls are blocking and run on dedicated network threads, never on the worker thread. A
/// blanket implementation is provided for closures, which is handy for tests:
///
/// ```
/// # use target_delivery::{ClientConfig, HttpRequest, HttpResponse};
/// let mut config = ClientConfig::from_client_code("acme");
/// config.transport(|_request: &HttpRequest| -> target_delivery::Result<HttpResponse> {
///     Ok(HttpResponse::ok(&serde_json::json!({})))
/// });
/// ```
pub trait Transport {
    /// Send `request` and wait for the response.
    fn post(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

impl<T: Fn(&HttpRequest) -> Result<HttpResponse>> Transport for T {
    fn post(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self(request)
    }
}

/// [`Transport`] backed by a blocking `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Create a transport with a default `reqwest` client.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for ReqwestTransport {
    fn post(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .post(request.url.clone())
            .timeout(request.timeout)
            .json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let body = response.bytes()?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

/// Build the delivery URL for `host`.
pub(crate) fn delivery_url(host: &str, client_code: &str, session_id: &str) -> Result<Url> {
    Url::parse_with_params(
        &format!("https://{host}/rest/v1/delivery/"),
        &[("client", client_code), ("sessionId", session_id)],
    )
    .map_err(Error::InvalidBaseUrl)
}

/// SDK identification headers.
pub(crate) fn sdk_headers() -> Vec<(&'static str, String)> {
    vec![
        ("X-EXC-SDK", "target-delivery-rust".to_owned()),
        ("X-EXC-SDK-Version", env!("CARGO_PKG_VERSION").to_owned()),
    ]
}
