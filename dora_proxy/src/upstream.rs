use anyhow::Result;
use axum::{
    body::Bytes,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
};
use mime::APPLICATION_JSON;
use reqwest::{Client, Url};
use serde_json::Value;

use crate::error::Error;

// `reqwest` sets its own `content-length` for the forwarded body.
const SKIPPED_REQUEST_HEADERS: [&str; 11] = [
    "accept-encoding",
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

// The response body is re-framed by the proxy.
const SKIPPED_RESPONSE_HEADERS: [&str; 3] = ["connection", "content-length", "transfer-encoding"];

/// The explorer API the proxy forwards to.
pub struct Upstream {
    client: Client,
    base_url: Url,
}

impl Upstream {
    #[must_use]
    pub const fn new(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse, Error> {
        let url = self.url(path, query);

        let response = self
            .client
            .request(method, url)
            .headers(forwarded_headers(headers))
            .body(body)
            .send()
            .await
            .map_err(Error::UpstreamUnreachable)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(Error::UpstreamBody)?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }

    fn url(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{base_path}{path}"));
        url.set_query(query);
        url
    }
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let Self {
            status,
            mut headers,
            body,
        } = self;

        for name in SKIPPED_RESPONSE_HEADERS {
            headers.remove(name);
        }

        headers.insert(CONTENT_TYPE, json_header_value());

        (status, headers, body).into_response()
    }
}

impl UpstreamResponse {
    /// Applies `transform` to a JSON body. Bodies that are not JSON are passed through.
    pub fn transform_json(self, transform: impl FnOnce(&mut Value)) -> Result<Response, Error> {
        let Ok(mut value) = serde_json::from_slice::<Value>(&self.body) else {
            return Ok(self.into_response());
        };

        transform(&mut value);

        let body = serde_json::to_vec(&value).map_err(Error::Serialization)?;

        Ok(Self {
            body: body.into(),
            ..self
        }
        .into_response())
    }
}

fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();

    for name in SKIPPED_REQUEST_HEADERS {
        forwarded.remove(name);
    }

    forwarded.insert(ACCEPT, json_header_value());

    forwarded
}

fn json_header_value() -> HeaderValue {
    HeaderValue::from_static(APPLICATION_JSON.as_ref())
}
