//! A client for the [Airtable](https://airtable.com) web API.
//!
//! # Quick start
//!
//! ```no_run
//! use airtable::Client;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let client = Client::new("appXXXXXXXXXXXXXX", "patXXXXXXXXXXXXXX");
//! let table = client.table("Schedule").get(std::future::pending()).await?;
//!
//! for record in &table.records {
//!     println!("{}: {:?}", record.id, record.fields.get("Name"));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # HTTP Requests and Responses
//!
//! The API types are designed to work with any HTTP client that uses the
//! [`http`] crate. Use [`ApiRequest::into_request`] to create a request, and
//! [`ApiResponse::from_response`] to parse the body of a successful response.
//! [`Client`] does both, and classifies error statuses in between, on top of
//! any [`Transport`].
//!
//! ```no_run
//! use airtable::{ApiRequest, ApiResponse, Profile, check_response, records::ListRecords};
//!
//! # fn main() -> anyhow::Result<()> {
//! let profile = Profile::from_default_env()?;
//!
//! let req = ListRecords {
//!     table: "Schedule",
//!     params: None,
//! };
//!
//! let http_req = req.into_request(&profile)?;
//! let (method, url) = (http_req.method().clone(), http_req.uri().to_string());
//!
//! let agent = ureq::Agent::new_with_config(
//!     ureq::config::Config::builder()
//!         .http_status_as_error(false)
//!         .build(),
//! );
//! let mut resp = agent.run(http_req)?;
//! let body = resp.body_mut().read_to_vec()?;
//! let resp = resp.map(|_| body);
//!
//! check_response(&method, &url, &resp)?;
//! let table = <ListRecords<'_> as ApiRequest>::Response::from_response(
//!     resp.map(std::io::Cursor::new),
//! )?;
//!
//! println!("{} records", table.records.len());
//! # Ok(())
//! # }
//! ```

#![warn(
    anonymous_parameters,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_qualifications
)]

mod api;
mod client;
mod config;
mod table;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use api::*;
pub use client::{Client, Error};
pub use config::{Error as ConfigError, Profile, RetryPolicy};
pub use table::TableHandle;
pub use transport::{ReqwestTransport, Transport, UreqTransport};
