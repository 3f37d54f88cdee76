#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Service clients over a hyper/tower HTTP stack with transparent gzip unzipping
//!
//! - [`ServiceFactory`] builds a [`ServiceClient`] from a base URL (scheme and
//!   trailing slash added when missing), a [`BodyFormat`] (JSON or XML) and a
//!   gzip switch
//! - [`UnzipLayer`] is the response interceptor: a gzip-encoded response with
//!   a body gets its body replaced by a lazily unzipped stream and loses its
//!   `Content-Encoding` and `Content-Length` headers; everything else passes
//!   through untouched
//! - [`HttpClient`] is the pooled client underneath: rustls TLS (HTTPS only
//!   by default), timeouts, default headers, fail-fast request buffer, and body
//!   size limits counted on unzipped bytes
//!
//! # Example
//!
//! ```ignore
//! use service_factory::{BodyFormat, ServiceFactory};
//!
//! let people = ServiceFactory::builder("https://people.example.com/api")
//!     .format(BodyFormat::Json)
//!     .gzip(true)
//!     .build()?;
//!
//! let peter: Person = people.fetch("people/123").await?;
//! ```
//!
//! A corrupt or truncated gzip stream does not fail `send()`; it fails the
//! body read with `HttpError::Transport` wrapping an `io::Error` of kind
//! `InvalidData`.

mod builder;
mod client;
mod config;
mod error;
mod factory;
mod gzip_body;
mod layers;
mod request;
mod response;
mod tls;

pub use builder::HttpClientBuilder;
pub use client::HttpClient;
pub use config::{
    BodyFormat, DEFAULT_USER_AGENT, HttpClientConfig, ServiceFactoryConfig, TlsRootConfig,
    TransportSecurity,
};
pub use error::{HttpError, InvalidUriKind};
pub use factory::{ProviderBase, ServiceClient, ServiceFactory, normalize_base_url};
pub use gzip_body::{GzipBody, MAX_FRAME_LEN};
pub use layers::{
    DefaultHeadersLayer, DefaultHeadersService, ResponseFuture as UnzipResponseFuture, UnzipBody,
    UnzipLayer, UnzipService, is_gzip_encoded, strip_headers, unzip_response,
};
pub use request::RequestBuilder;
pub use response::{ERROR_BODY_PREVIEW_LIMIT, HttpResponse, LimitedBody, ResponseBody};
