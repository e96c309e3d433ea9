use std::str::FromStr as _;

use serde::Deserialize;

use crate::RetryPolicy;

const GENERIC_MESSAGE: &str = "Error processing request.";

/// An error response from the API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The API responded with 429 Too Many Requests.
    #[error("{method} {url}: {} {message}", .status.as_u16())]
    RateLimit {
        /// The method of the offending request.
        method: http::Method,
        /// The full URL of the offending request.
        url: String,
        /// The HTTP status on the response (always 429).
        status: http::StatusCode,
        /// A human-readable description.
        message: String,
        /// The wait requested by the server via `Retry-After`, if any.
        retry_after: Option<std::time::Duration>,
    },
    /// The API responded with any other status than 200.
    #[error("{method} {url}: {} {message}", .status.as_u16())]
    Response {
        /// The method of the offending request.
        method: http::Method,
        /// The full URL of the offending request.
        url: String,
        /// The HTTP status on the response.
        status: http::StatusCode,
        /// The error code from the API, if the body carried one.
        kind: Option<ApiErrorKind>,
        /// A human-readable description.
        message: String,
    },
    /// The API response body could not be read.
    #[error("Failed to read response body ({status})")]
    ReadBody {
        /// The HTTP status on the response.
        status: http::StatusCode,
        /// The underlying I/O error.
        source: std::io::Error,
    },
    /// The API response body could not be decoded.
    #[error("Invalid response ({status}): {source}")]
    InvalidResponse {
        /// The HTTP status on the response.
        status: http::StatusCode,
        /// Where and why decoding failed.
        source: serde_path_to_error::Error<serde_json::Error>,
    },
}

impl ApiError {
    /// The HTTP status of the response that caused the error.
    pub fn status(&self) -> http::StatusCode {
        match self {
            ApiError::RateLimit { status, .. }
            | ApiError::Response { status, .. }
            | ApiError::ReadBody { status, .. }
            | ApiError::InvalidResponse { status, .. } => *status,
        }
    }

    /// The API error code, if one was returned.
    pub fn kind(&self) -> Option<&ApiErrorKind> {
        match self {
            ApiError::Response { kind, .. } => kind.as_ref(),
            _ => None,
        }
    }
}

/// Indicates that the error code was unrecognized.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid error kind: {0}")]
pub struct InvalidErrorKind(String);

macro_rules! api_error_kinds {
    ($($code:literal => $variant:ident),* $(,)?) => {
        /// An error code from the API.
        #[derive(Debug, Clone, PartialEq, Eq)]
        #[non_exhaustive]
        pub enum ApiErrorKind {
            $(
                #[doc = $code]
                $variant,
            )*
            /// An unknown error code.
            Unknown(String),
        }

        impl std::fmt::Display for ApiErrorKind {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(match self {
                    $(ApiErrorKind::$variant => $code,)*
                    ApiErrorKind::Unknown(kind) => kind,
                })
            }
        }

        impl std::str::FromStr for ApiErrorKind {
            type Err = InvalidErrorKind;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(match s {
                    $($code => ApiErrorKind::$variant,)*
                    _ => return Err(InvalidErrorKind(s.to_string())),
                })
            }
        }
    };
}

api_error_kinds! {
    "AUTHENTICATION_REQUIRED" => AuthenticationRequired,
    "INVALID_PERMISSIONS" => InvalidPermissions,
    "INVALID_PERMISSIONS_OR_MODEL_NOT_FOUND" => InvalidPermissionsOrModelNotFound,
    "INVALID_REQUEST_UNKNOWN" => InvalidRequestUnknown,
    "INVALID_REQUEST_MISSING_FIELDS" => InvalidRequestMissingFields,
    "INVALID_VALUE_FOR_COLUMN" => InvalidValueForColumn,
    "INVALID_FILTER_BY_FORMULA" => InvalidFilterByFormula,
    "INVALID_MULTIPLE_CHOICE_OPTIONS" => InvalidMultipleChoiceOptions,
    "INVALID_OFFSET_VALUE" => InvalidOffsetValue,
    "LIST_RECORDS_ITERATOR_NOT_AVAILABLE" => ListRecordsIteratorNotAvailable,
    "MODEL_ID_NOT_FOUND" => ModelIdNotFound,
    "NOT_FOUND" => NotFound,
    "REQUEST_TOO_LARGE" => RequestTooLarge,
    "ROW_DOES_NOT_EXIST" => RowDoesNotExist,
    "TABLE_NOT_FOUND" => TableNotFound,
    "UNKNOWN_FIELD_NAME" => UnknownFieldName,
    "VIEW_NAME_NOT_FOUND" => ViewNameNotFound,
}

/// The `error` member of an Airtable error body. Comes in a detailed and a
/// bare-code form.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawApiError {
    Detailed {
        r#type: String,
        message: Option<String>,
    },
    Code(String),
}

#[derive(Debug, Deserialize)]
struct RawErrorBody {
    error: RawApiError,
}

/// Classify a response to the request `method url`. Only 200 counts as
/// success; 429 becomes [ApiError::RateLimit] and every other status becomes
/// [ApiError::Response].
pub fn check_response(
    method: &http::Method,
    url: &str,
    resp: &http::Response<impl AsRef<[u8]>>,
) -> Result<(), ApiError> {
    classify_response(method, url, resp, RetryPolicy::default().wait_min)
}

/// Like [check_response], but a 429 without `Retry-After` reports
/// `default_wait` as the required wait.
pub(crate) fn classify_response(
    method: &http::Method,
    url: &str,
    resp: &http::Response<impl AsRef<[u8]>>,
    default_wait: std::time::Duration,
) -> Result<(), ApiError> {
    let status = resp.status();
    if status == http::StatusCode::OK {
        return Ok(());
    }

    if status == http::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = resp
            .headers()
            .get(http::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(std::time::Duration::from_secs);

        let wait = retry_after.unwrap_or(default_wait).as_secs();

        return Err(ApiError::RateLimit {
            method: method.clone(),
            url: url.to_owned(),
            status,
            message: format!(
                "API rate limit exceeded, must wait at least {wait} seconds before retry."
            ),
            retry_after,
        });
    }

    let (kind, message) = match serde_json::from_slice::<RawErrorBody>(resp.body().as_ref()) {
        Ok(RawErrorBody {
            error: RawApiError::Detailed { r#type, message },
        }) => (
            Some(parse_kind(r#type)),
            message.unwrap_or_else(|| GENERIC_MESSAGE.to_owned()),
        ),
        Ok(RawErrorBody {
            error: RawApiError::Code(code),
        }) => (Some(parse_kind(code)), GENERIC_MESSAGE.to_owned()),
        Err(_) => (None, GENERIC_MESSAGE.to_owned()),
    };

    Err(ApiError::Response {
        method: method.clone(),
        url: url.to_owned(),
        status,
        kind,
        message,
    })
}

fn parse_kind(code: String) -> ApiErrorKind {
    ApiErrorKind::from_str(&code).unwrap_or(ApiErrorKind::Unknown(code))
}
