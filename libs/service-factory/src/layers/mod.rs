//! Tower layers for the HTTP client pipeline
//!
//! ## Available Layers
//!
//! - [`UnzipLayer`] - Unzips gzip-encoded response bodies and strips the
//!   `Content-Encoding` / `Content-Length` headers
//! - [`DefaultHeadersLayer`] - Fills in default request headers (`User-Agent`,
//!   `Accept`, ...) when the request does not set them

mod default_headers;
mod unzip;

pub use default_headers::{DefaultHeadersLayer, DefaultHeadersService};
pub use unzip::{
    ResponseFuture, UnzipBody, UnzipLayer, UnzipService, is_gzip_encoded, strip_headers,
    unzip_response,
};
