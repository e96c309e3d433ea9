//! Test utilities for exercising the client without a network.

use std::{collections::VecDeque, sync::Mutex};

use crate::{
    client::copy_request,
    transport::{Transport, TransportError},
};

/// What the mock transport does with the next request.
#[derive(Debug)]
pub(crate) enum MockReply {
    Response(http::Response<Vec<u8>>),
    Error(String),
    /// Never respond.
    Hang,
}

/// A transport that records every request and answers from a script.
#[derive(Debug)]
pub(crate) struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<http::Request<Vec<u8>>>>,
}

impl MockTransport {
    pub(crate) fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Copies of the requests sent so far, in order.
    pub(crate) fn requests(&self) -> Vec<http::Request<Vec<u8>>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(copy_request)
            .collect()
    }
}

impl Transport for MockTransport {
    async fn send(
        &self,
        req: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, TransportError> {
        self.requests.lock().unwrap().push(req);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("no reply scripted for request");

        match reply {
            MockReply::Response(resp) => Ok(resp),
            MockReply::Error(msg) => Err(msg.into()),
            MockReply::Hang => std::future::pending().await,
        }
    }
}

/// A response with a JSON body.
pub(crate) fn json_response(status: u16, body: &str) -> MockReply {
    MockReply::Response(
        http::Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body.as_bytes().to_vec())
            .unwrap(),
    )
}

/// A response with no body.
pub(crate) fn status_response(status: u16) -> MockReply {
    MockReply::Response(
        http::Response::builder()
            .status(status)
            .body(Vec::new())
            .unwrap(),
    )
}
