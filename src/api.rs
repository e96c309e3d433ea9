use std::io::Read;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::Profile;

mod error;
pub mod records;

pub use error::*;

// Everything outside RFC 3986 `pchar`, plus ':' so that a segment can never
// be mistaken for a URL scheme when joined.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Percent-encode a single path segment, such as a table name.
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// An error encountered while building a request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The endpoint could not be resolved against the API URL.
    #[error("Invalid request URL")]
    Url(#[from] url::ParseError),
    /// The query parameters could not be serialized.
    #[error("Failed to serialize query string")]
    Query(#[from] serde_qs::Error),
    /// The body could not be serialized as JSON.
    #[error("Failed to serialize request body")]
    Body(#[from] serde_json::Error),
    /// The resulting request was invalid, e.g. because of a bad header value.
    #[error("Invalid request")]
    Http(#[from] http::Error),
    /// A path segment would be resolved as `.` or `..` and leave the base.
    #[error("Invalid path segment: {0:?}")]
    DotSegment(String),
}

/// Implemented by types that can be sent as requests to the Airtable API.
pub trait ApiRequest: Sized {
    /// The corresponding response type.
    type Response: ApiResponse;

    /// The path of the request, relative to the configured base. Segments
    /// must already be percent-encoded (see [encode_segment]).
    fn path(&self) -> String;

    /// The method to use.
    fn method(&self) -> http::Method {
        http::Method::GET
    }

    /// The serializable request body.
    fn body(&self) -> Option<impl Serialize> {
        None::<&()>
    }

    /// The serializable query string.
    fn query(&self) -> Option<impl Serialize> {
        None::<&()>
    }

    /// Consume the request and return an [http::Request] suitable for passing
    /// to your favorite HTTP client.
    fn into_request(self, profile: &Profile) -> Result<http::Request<Vec<u8>>, RequestError> {
        build_request(
            profile,
            self.method(),
            &self.path(),
            self.query(),
            self.body(),
        )
    }
}

/// Build an authenticated request for `endpoint`, which is resolved relative
/// to `<api_url>/<base>/`.
///
/// The body, if any, is encoded as JSON. `Content-Type: application/json` is
/// sent either way.
pub fn build_request(
    profile: &Profile,
    method: http::Method,
    endpoint: &str,
    query: Option<impl Serialize>,
    body: Option<impl Serialize>,
) -> Result<http::Request<Vec<u8>>, RequestError> {
    let base = encode_segment(&profile.base);
    if let Some(seg) = std::iter::once(base.as_str())
        .chain(endpoint.split('/'))
        .find(|seg| is_dot_segment(seg))
    {
        return Err(RequestError::DotSegment(seg.to_owned()));
    }

    let relative = format!("{base}/{endpoint}");
    let mut url = profile.api_url.join(&relative)?;

    if let Some(query) = query {
        let qs = serde_qs::to_string(&query)?;
        if !qs.is_empty() {
            url.set_query(Some(&qs));
        }
    }

    let req = http::Request::builder()
        .method(method)
        .uri(url.as_str())
        .header(http::header::CONTENT_TYPE, "application/json")
        .header(
            http::header::AUTHORIZATION,
            format!("Bearer {}", profile.api_key),
        )
        .header(http::header::USER_AGENT, &profile.user_agent);

    if let Some(body) = body {
        let body = serde_json::to_vec(&body)?;
        Ok(req
            .header(http::header::CONTENT_LENGTH, body.len())
            .body(body)?)
    } else {
        Ok(req.body(Vec::new())?)
    }
}

// URL parsers treat `%2e` as a dot too, so encoding can't make these safe.
fn is_dot_segment(seg: &str) -> bool {
    let seg = seg.to_ascii_lowercase().replace("%2e", ".");
    seg == "." || seg == ".."
}

/// Implemented by types that can be read from successful (200) responses of
/// the Airtable API. Status classification happens before decoding; see
/// [check_response].
pub trait ApiResponse: Sized {
    /// Read the response from an [http::Response] object.
    fn from_response(resp: http::Response<impl Read>) -> Result<Self, ApiError> {
        let (parts, body) = resp.into_parts();
        Self::from_response_parts(parts, body)
    }

    /// Read the response from pre-parsed parts. Useful for async HTTP clients
    /// where the body must be collected before parsing.
    fn from_response_parts(parts: http::response::Parts, body: impl Read)
    -> Result<Self, ApiError>;
}

/// A private trait for types that deserialize directly from the JSON body.
/// An empty body decodes to the default value.
pub(crate) trait DataResponse: DeserializeOwned + Default {}

impl<T: DataResponse> ApiResponse for T {
    fn from_response_parts(
        parts: http::response::Parts,
        mut body: impl Read,
    ) -> Result<Self, ApiError> {
        let mut buf = Vec::new();
        body.read_to_end(&mut buf)
            .map_err(|e| ApiError::ReadBody {
                status: parts.status,
                source: e,
            })?;

        if buf.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }

        let de = &mut serde_json::Deserializer::from_slice(&buf);
        serde_path_to_error::deserialize(de).map_err(|e| {
            tracing::error!("Failed to parse API response: {e:#?}");
            ApiError::InvalidResponse {
                status: parts.status,
                source: e,
            }
        })
    }
}

/// The status and headers of a raw API response, along with the pagination
/// offset if the body carried one.
#[derive(Debug, Clone)]
pub struct Response {
    /// The HTTP status.
    pub status: http::StatusCode,
    /// The response headers.
    pub headers: http::HeaderMap,
    /// The cursor for the next page of results, if any.
    pub offset: Option<String>,
}

#[derive(Deserialize)]
struct RawOffset {
    offset: Option<String>,
}

impl Response {
    pub(crate) fn new(resp: &http::Response<Vec<u8>>) -> Self {
        let offset = serde_json::from_slice::<RawOffset>(resp.body())
            .ok()
            .and_then(|raw| raw.offset);

        Self {
            status: resp.status(),
            headers: resp.headers().clone(),
            offset,
        }
    }
}
