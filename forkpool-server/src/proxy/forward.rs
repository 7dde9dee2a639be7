use axum::{
    body::{Body, HttpBody},
    extract::Request,
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

use crate::infra::errors::AppError;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no worker available")]
    NoWorkerAvailable,
    #[error("worker on port {port} is unreachable")]
    Upstream {
        port: u16,
        #[source]
        source: reqwest::Error,
    },
    #[error("worker on port {port} did not respond within {timeout:?}")]
    Timeout { port: u16, timeout: Duration },
    #[error("failed to build response from worker on port {port}")]
    InvalidResponse {
        port: u16,
        #[source]
        source: axum::http::Error,
    },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoWorkerAvailable => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Upstream { .. } | ProxyError::InvalidResponse { .. } => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        tracing::warn!(error = ?err, "proxy request failed");
        AppError::new(err.status(), err.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}

/// Headers that describe a single connection rather than the message.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Removes hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("proxy-connection");
}

/// Relays requests to workers on the loopback interface.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    response_timeout: Duration,
}

impl Forwarder {
    pub fn new(
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            response_timeout,
        })
    }

    /// Sends `request` to the worker on `port` and streams its response
    /// back. Exactly one attempt is made.
    pub async fn forward(
        &self,
        port: u16,
        request: Request,
    ) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("http://127.0.0.1:{port}{path_and_query}");

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);

        let mut upstream =
            self.client.request(parts.method, url).headers(headers);
        if !body.is_end_stream() {
            upstream = upstream
                .body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let response = timeout(self.response_timeout, upstream.send())
            .await
            .map_err(|_| ProxyError::Timeout {
                port,
                timeout: self.response_timeout,
            })?
            .map_err(|source| {
                if source.is_timeout() {
                    ProxyError::Timeout {
                        port,
                        timeout: self.response_timeout,
                    }
                } else {
                    ProxyError::Upstream { port, source }
                }
            })?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut builder = Response::builder().status(status);
        if let Some(target) = builder.headers_mut() {
            *target = headers;
        }
        builder
            .body(Body::from_stream(response.bytes_stream()))
            .map_err(|source| ProxyError::InvalidResponse { port, source })
    }
}
