use std::{
    future::Future,
    io::{self, Cursor, Write},
    pin::pin,
};

use futures::FutureExt as _;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    ApiError, ApiRequest, ApiResponse, Profile, RequestError, Response, TableHandle,
    api::{build_request, classify_response},
    transport::{ReqwestTransport, Transport, TransportError},
};

/// An error encountered while making an API call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request could not be built.
    #[error(transparent)]
    Request(#[from] RequestError),
    /// The transport failed to deliver the request or read the response.
    #[error("Transport error: {0}")]
    Transport(#[source] TransportError),
    /// The caller's cancellation future completed first.
    #[error("Request cancelled")]
    Cancelled,
    /// The API returned an error, or a response that couldn't be decoded.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// The response body could not be written to the caller's sink.
    #[error("Failed to write response body")]
    Io(#[from] io::Error),
}

/// A client for a single Airtable base.
///
/// Every call takes a cancellation future; when it completes before the
/// response arrives, the call fails with [Error::Cancelled]. Pass
/// [std::future::pending] to never cancel.
#[derive(Debug, Clone)]
pub struct Client<T = ReqwestTransport> {
    profile: Profile,
    transport: T,
}

impl Client {
    /// Create a client for `base` using the default transport and settings.
    ///
    /// The default [RetryPolicy](crate::RetryPolicy) retries rate-limited
    /// calls four times, so a base that keeps answering 429 holds a call for
    /// up to 3.5 minutes (30s, 60s, 60s, 60s) before [ApiError::RateLimit] is
    /// returned. Use [Client::from_profile] with
    /// [Profile::with_retry] to change that.
    pub fn new(base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::from_profile(Profile::new(base, api_key), ReqwestTransport::default())
    }
}

impl<T: Transport> Client<T> {
    /// Create a client for `base` that sends requests through `transport`.
    pub fn with_transport(
        transport: T,
        base: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self::from_profile(Profile::new(base, api_key), transport)
    }

    /// Create a client from a fully resolved profile.
    pub fn from_profile(profile: Profile, transport: T) -> Self {
        Self { profile, transport }
    }

    /// The profile this client was created with.
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Select a table by name (or ID). The returned handle is independent of
    /// any other handle, so selections never interfere with each other.
    pub fn table(&self, name: impl Into<String>) -> TableHandle<'_, T> {
        TableHandle::new(self, name.into())
    }

    /// Build an authenticated request for an arbitrary endpoint below the
    /// base, e.g. `"Schedule/rec123"`.
    pub fn new_request(
        &self,
        method: http::Method,
        endpoint: &str,
        body: Option<impl Serialize>,
    ) -> Result<http::Request<Vec<u8>>, RequestError> {
        build_request(&self.profile, method, endpoint, None::<()>, body)
    }

    /// Send a typed request and decode its response.
    pub async fn execute<R: ApiRequest>(
        &self,
        cancel: impl Future<Output = ()>,
        req: R,
    ) -> Result<R::Response, Error> {
        let request = req.into_request(&self.profile)?;
        let (parts, body) = self.dispatch(cancel, request).await?.into_parts();
        Ok(R::Response::from_response_parts(parts, Cursor::new(body))?)
    }

    /// Send a prebuilt request and copy the body, undecoded, into `sink`.
    pub async fn execute_raw(
        &self,
        cancel: impl Future<Output = ()>,
        request: http::Request<Vec<u8>>,
        sink: &mut impl Write,
    ) -> Result<Response, Error> {
        let resp = self.dispatch(cancel, request).await?;
        sink.write_all(resp.body())?;
        Ok(Response::new(&resp))
    }

    /// Send the request, retrying on 429 according to the profile's retry
    /// policy, and return the response if (and only if) it was a 200.
    async fn dispatch(
        &self,
        cancel: impl Future<Output = ()>,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, Error> {
        let mut cancel = pin!(cancel);
        let method = request.method().clone();
        let url = request.uri().to_string();
        let retry = &self.profile.retry;

        let mut attempt = 0;
        loop {
            debug!(%method, %url, attempt, "sending request");

            let result = tokio::select! {
                biased;
                _ = &mut cancel => return Err(Error::Cancelled),
                res = self.transport.send(copy_request(&request)) => res,
            };

            let resp = match result {
                Ok(resp) => resp,
                Err(e) => {
                    // A transport error caused by cancellation should be
                    // reported as such.
                    if cancel.as_mut().now_or_never().is_some() {
                        return Err(Error::Cancelled);
                    }

                    return Err(Error::Transport(e));
                }
            };

            match classify_response(&method, &url, &resp, retry.wait_min) {
                Ok(()) => return Ok(resp),
                // A Retry-After beyond `wait_max` is returned, not retried.
                Err(ApiError::RateLimit { retry_after, .. })
                    if attempt < retry.attempts
                        && retry_after.is_none_or(|d| d <= retry.wait_max) =>
                {
                    let wait = retry.backoff(attempt).max(retry_after.unwrap_or_default());

                    warn!(%method, %url, ?wait, "rate limited, retrying");
                    tokio::select! {
                        biased;
                        _ = &mut cancel => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(wait) => (),
                    }

                    attempt += 1;
                }
                Err(e) => {
                    debug!(%method, %url, status = %resp.status(), "request failed");
                    return Err(e.into());
                }
            }
        }
    }
}

pub(crate) fn copy_request(req: &http::Request<Vec<u8>>) -> http::Request<Vec<u8>> {
    let mut copy = http::Request::new(req.body().clone());
    *copy.method_mut() = req.method().clone();
    *copy.uri_mut() = req.uri().clone();
    *copy.version_mut() = req.version();
    *copy.headers_mut() = req.headers().clone();
    copy
}

#[cfg(test)]
mod test {
    use std::{future::pending, time};

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::{
        RetryPolicy,
        records::{ListRecordsParams, Table},
        testutil::{MockReply, MockTransport, json_response, status_response},
    };

    fn client(replies: Vec<MockReply>) -> Client<MockTransport> {
        Client::with_transport(MockTransport::new(replies), "appXXXX", "keyYYYY")
    }

    fn client_with_retry(replies: Vec<MockReply>, retry: RetryPolicy) -> Client<MockTransport> {
        let profile = Profile::new("appXXXX", "keyYYYY").with_retry(retry);
        Client::from_profile(profile, MockTransport::new(replies))
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            wait_min: time::Duration::from_millis(10),
            wait_max: time::Duration::from_millis(40),
            attempts,
        }
    }

    #[tokio::test]
    async fn get_schedule() -> anyhow::Result<()> {
        let client = client(vec![json_response(
            200,
            r#"{"records":[{"id":"rec1","fields":{"Name":"Alice"}}]}"#,
        )]);

        let table = client.table("Schedule").get(pending()).await?;

        assert_eq!(table.name, "Schedule");
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].id, "rec1");
        assert_eq!(
            serde_json::Value::Object(table.records[0].fields.clone()),
            json!({"Name": "Alice"})
        );

        let requests = client.transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(*requests[0].method(), http::Method::GET);
        assert_eq!(
            requests[0].uri().to_string(),
            "https://api.airtable.com/v0/appXXXX/Schedule"
        );
        assert_eq!(requests[0].headers()["authorization"], "Bearer keyYYYY");

        Ok(())
    }

    #[tokio::test]
    async fn list_sends_params() -> anyhow::Result<()> {
        let client = client(vec![json_response(200, r#"{"records":[]}"#)]);
        let params = ListRecordsParams {
            page_size: Some(5),
            ..Default::default()
        };

        client.table("Schedule").list(pending(), &params).await?;

        let requests = client.transport.requests();
        assert_eq!(requests[0].uri().query(), Some("pageSize=5"));
        Ok(())
    }

    #[tokio::test]
    async fn handles_are_independent() -> anyhow::Result<()> {
        let client = client(vec![
            json_response(200, "{}"),
            json_response(200, "{}"),
        ]);

        let first = client.table("First");
        let second = client.table("Second");
        assert_eq!(second.get(pending()).await?.name, "Second");
        assert_eq!(first.get(pending()).await?.name, "First");

        let paths: Vec<_> = client
            .transport
            .requests()
            .iter()
            .map(|r| r.uri().path().to_owned())
            .collect();
        assert_eq!(paths, ["/v0/appXXXX/Second", "/v0/appXXXX/First"]);

        Ok(())
    }

    #[tokio::test]
    async fn empty_body_is_default() -> anyhow::Result<()> {
        let client = client(vec![status_response(200)]);
        let table = client.table("Schedule").get(pending()).await?;

        assert_eq!(
            table,
            Table {
                name: "Schedule".to_owned(),
                ..Default::default()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn error_status_is_response_error() {
        let client = client(vec![json_response(
            404,
            r#"{"error":{"type":"TABLE_NOT_FOUND","message":"Could not find table Nope"}}"#,
        )]);

        let result = client.table("Nope").get(pending()).await;
        assert_matches!(
            result,
            Err(Error::Api(ApiError::Response { method, url, status, .. }))
                if method == http::Method::GET
                    && url == "https://api.airtable.com/v0/appXXXX/Nope"
                    && status == http::StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn no_content_is_an_error() {
        let client = client(vec![status_response(204)]);
        let result = client.table("Schedule").get(pending()).await;
        assert_matches!(
            result,
            Err(Error::Api(ApiError::Response { status, .. })) if status.as_u16() == 204
        );
    }

    #[tokio::test]
    async fn rate_limit_without_retries() {
        let client = client_with_retry(vec![status_response(429)], RetryPolicy::none());
        let result = client.table("Schedule").get(pending()).await;

        assert_matches!(result, Err(Error::Api(ApiError::RateLimit { .. })));
        assert_eq!(client.transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_is_retried() -> anyhow::Result<()> {
        let client = client_with_retry(
            vec![
                status_response(429),
                status_response(429),
                json_response(200, r#"{"records":[{"id":"rec1","fields":{}}]}"#),
            ],
            fast_retry(2),
        );

        let start = tokio::time::Instant::now();
        let table = client.table("Schedule").get(pending()).await?;

        assert_eq!(table.records[0].id, "rec1");
        assert_eq!(client.transport.requests().len(), 3);
        // 10ms, then 20ms.
        assert!(start.elapsed() >= time::Duration::from_millis(30));

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retries_run_out() {
        let client = client_with_retry(
            vec![
                status_response(429),
                status_response(429),
                status_response(429),
            ],
            fast_retry(2),
        );

        let result = client.table("Schedule").get(pending()).await;
        assert_matches!(result, Err(Error::Api(ApiError::RateLimit { .. })));
        assert_eq!(client.transport.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_extends_wait() -> anyhow::Result<()> {
        let limited = http::Response::builder()
            .status(429)
            .header(http::header::RETRY_AFTER, "1")
            .body(Vec::new())?;

        let retry = RetryPolicy {
            wait_min: time::Duration::from_millis(10),
            wait_max: time::Duration::from_secs(5),
            attempts: 1,
        };
        let client = client_with_retry(
            vec![MockReply::Response(limited), json_response(200, "{}")],
            retry,
        );

        let start = tokio::time::Instant::now();
        client.table("Schedule").get(pending()).await?;
        assert!(start.elapsed() >= time::Duration::from_secs(1));

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_beyond_wait_max_is_returned() -> anyhow::Result<()> {
        let limited = http::Response::builder()
            .status(429)
            .header(http::header::RETRY_AFTER, "120")
            .body(Vec::new())?;
        let client = client_with_retry(vec![MockReply::Response(limited)], RetryPolicy::default());

        let start = tokio::time::Instant::now();
        let result = client.table("Schedule").get(pending()).await;

        assert_matches!(
            result,
            Err(Error::Api(ApiError::RateLimit { retry_after: Some(d), .. })) if d.as_secs() == 120
        );
        assert_eq!(client.transport.requests().len(), 1);
        assert!(start.elapsed() < time::Duration::from_secs(1));

        Ok(())
    }

    #[tokio::test]
    async fn rate_limit_message_uses_profile_wait() {
        let retry = RetryPolicy {
            wait_min: time::Duration::from_secs(5),
            ..RetryPolicy::none()
        };
        let client = client_with_retry(vec![status_response(429)], retry);

        let result = client.table("Schedule").get(pending()).await;
        assert_matches!(
            result,
            Err(Error::Api(ApiError::RateLimit { message, .. }))
                if message.contains("at least 5 seconds")
        );
    }

    #[tokio::test]
    async fn dot_table_names_are_rejected() {
        let client = client(vec![]);

        for name in [".", ".."] {
            let result = client.table(name).get(pending()).await;
            assert_matches!(result, Err(Error::Request(RequestError::DotSegment(_))));
        }
        assert!(client.transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_retry_wait() {
        let client = client_with_retry(vec![status_response(429)], RetryPolicy::default());

        let cancel = tokio::time::sleep(time::Duration::from_secs(1));
        let result = client.table("Schedule").get(cancel).await;

        assert_matches!(result, Err(Error::Cancelled));
        assert_eq!(client.transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_response() {
        let client = client(vec![MockReply::Hang]);
        let result = client.table("Schedule").get(std::future::ready(())).await;
        assert_matches!(result, Err(Error::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_while_waiting() {
        let client = client(vec![MockReply::Hang]);
        let cancel = tokio::time::sleep(time::Duration::from_secs(10));
        let result = client.table("Schedule").get(cancel).await;
        assert_matches!(result, Err(Error::Cancelled));
    }

    #[tokio::test]
    async fn transport_error() {
        let client = client(vec![MockReply::Error("connection refused".to_owned())]);
        let result = client.table("Schedule").get(pending()).await;
        assert_matches!(result, Err(Error::Transport(e)) if e.to_string() == "connection refused");
    }

    #[tokio::test]
    async fn transport_error_after_cancel_is_cancelled() {
        let client = client(vec![MockReply::Error("connection reset".to_owned())]);

        // Pending when the request is sent, ready by the time the transport
        // has failed.
        let cancel = tokio::task::yield_now();
        let result = client.table("Schedule").get(cancel).await;
        assert_matches!(result, Err(Error::Cancelled));
    }

    #[tokio::test]
    async fn invalid_json_is_reported() {
        let client = client(vec![json_response(200, r#"{"records": "nope"}"#)]);
        let result = client.table("Schedule").get(pending()).await;
        assert_matches!(
            result,
            Err(Error::Api(ApiError::InvalidResponse { status, .. })) if status.is_success()
        );
    }

    #[tokio::test]
    async fn raw_body_goes_to_sink() -> anyhow::Result<()> {
        let body = r#"{"records":[{"id":"rec1","fields":{"Name":"Alice"}}],"offset":"itr1/rec1"}"#;
        let client = client(vec![json_response(200, body)]);

        let req = client.new_request(http::Method::GET, "Schedule", None::<()>)?;
        let mut sink = Vec::new();
        let resp = client.execute_raw(pending(), req, &mut sink).await?;

        assert_eq!(sink, body.as_bytes());
        assert_eq!(resp.status, http::StatusCode::OK);
        assert_eq!(resp.offset.as_deref(), Some("itr1/rec1"));
        assert_eq!(resp.headers["content-type"], "application/json");

        Ok(())
    }

    #[tokio::test]
    async fn new_request_with_body() -> anyhow::Result<()> {
        let client = client(vec![json_response(200, "{}")]);

        let req = client.new_request(
            http::Method::PATCH,
            "Schedule/rec1",
            Some(json!({"fields": {"Name": "Alicia"}})),
        )?;
        client.execute_raw(pending(), req, &mut io::sink()).await?;

        let requests = client.transport.requests();
        assert_eq!(*requests[0].method(), http::Method::PATCH);
        assert_eq!(requests[0].uri().path(), "/v0/appXXXX/Schedule/rec1");
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(requests[0].body())?,
            json!({"fields": {"Name": "Alicia"}})
        );

        Ok(())
    }
}
