//! Pluggable HTTP transports.
//!
//! The client builds plain [http::Request] values and hands them to a
//! [Transport]. Two implementations are provided: [ReqwestTransport], the
//! default, and [UreqTransport], which drives a blocking ureq agent from the
//! tokio blocking pool.

use std::{future::Future, time};

/// The error type returned by transports.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Sends HTTP requests and collects the full response.
///
/// Implementations must not treat error statuses as failures; classification
/// happens in the client.
pub trait Transport: Send + Sync {
    /// Send the request and return the response with its complete body.
    fn send(
        &self,
        req: http::Request<Vec<u8>>,
    ) -> impl Future<Output = Result<http::Response<Vec<u8>>, TransportError>> + Send;
}

/// A transport backed by a [reqwest::Client].
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Wrap an existing reqwest client, e.g. one with custom timeouts.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    async fn send(
        &self,
        req: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, TransportError> {
        let req: reqwest::Request = req.try_into()?;
        let resp = self.client.execute(req).await?;

        let mut builder = http::Response::builder()
            .status(resp.status())
            .version(resp.version());
        if let Some(headers) = builder.headers_mut() {
            *headers = resp.headers().clone();
        }

        let body = resp.bytes().await?;
        Ok(builder.body(body.to_vec())?)
    }
}

/// A transport backed by a blocking [ureq::Agent].
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    /// Create an agent with the given global timeout (or none).
    pub fn new(timeout: Option<time::Duration>) -> Self {
        // Allows error responses to be classified by the client.
        let cfg = ureq::config::Config::builder()
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build();

        Self {
            agent: ureq::Agent::new_with_config(cfg),
        }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Transport for UreqTransport {
    async fn send(
        &self,
        req: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, TransportError> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || -> Result<_, TransportError> {
            let mut resp = agent.run(req)?;
            let body = resp.body_mut().read_to_vec()?;
            let (parts, _) = resp.into_parts();
            Ok(http::Response::from_parts(parts, body))
        })
        .await?
    }
}
