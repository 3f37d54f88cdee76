//! Service clients bound to a base URL.
//!
//! [`ServiceFactory`] turns a base URL, a [`BodyFormat`] and a gzip switch into
//! a [`ServiceClient`]. Paths given to the client are resolved against the
//! base URL and requests advertise the format's media type in `Accept`.
//!
//! ```ignore
//! let people = ServiceFactory::builder("api.example.com/v1")
//!     .format(BodyFormat::Xml)
//!     .gzip(true)
//!     .build()?;
//!
//! let peter: Person = people.fetch("people/123").await?;
//! ```

use crate::HttpClient;
use crate::builder::HttpClientBuilder;
use crate::config::{BodyFormat, HttpClientConfig, ServiceFactoryConfig, TransportSecurity};
use crate::error::{HttpError, InvalidUriKind};
use crate::request::RequestBuilder;
use http::Method;
use http::header::{ACCEPT, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

/// Supplies the base URL a service lives at
pub trait ProviderBase {
    fn default_base_url(&self) -> &str;
}

/// Trim, add `http://` when no `http://`/`https://` prefix is present, and end with `/`
///
/// The scheme check is a case-insensitive prefix match.
#[must_use]
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim();

    let has_scheme = ["http://", "https://"].iter().any(|scheme| {
        trimmed
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    });

    let mut url = if has_scheme {
        trimmed.to_owned()
    } else {
        format!("http://{trimmed}")
    };
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

/// Builder for a [`ServiceClient`]
#[derive(Debug, Clone)]
#[must_use]
pub struct ServiceFactory {
    base_url: String,
    format: BodyFormat,
    gzip: bool,
    http_config: HttpClientConfig,
    client: Option<HttpClient>,
}

impl ServiceFactory {
    /// JSON format, gzip disabled
    pub fn builder(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            format: BodyFormat::default(),
            gzip: false,
            http_config: HttpClientConfig::default(),
            client: None,
        }
    }

    pub fn from_provider(provider: &impl ProviderBase) -> Self {
        Self::builder(provider.default_base_url())
    }

    pub fn with_config(config: ServiceFactoryConfig) -> Self {
        Self::builder(config.base_url)
            .format(config.format)
            .gzip(config.gzip)
    }

    pub fn format(mut self, format: BodyFormat) -> Self {
        self.format = format;
        self
    }

    /// Install the gzip unzip layer in the default client
    ///
    /// Ignored when a client is supplied with [`client`](Self::client).
    pub fn gzip(mut self, enabled: bool) -> Self {
        self.gzip = enabled;
        self
    }

    /// Configuration for the default client
    pub fn http_config(mut self, config: HttpClientConfig) -> Self {
        self.http_config = config;
        self
    }

    /// Use `client` as-is instead of building one
    pub fn client(mut self, client: HttpClient) -> Self {
        self.client = Some(client);
        self
    }

    /// Normalize the base URL and build the client
    ///
    /// For an `http://` base URL the default client allows insecure HTTP
    /// (a warning is logged).
    ///
    /// # Errors
    ///
    /// Returns `HttpError::InvalidBaseUrl` if the normalized base URL does not
    /// parse, or the client builder's error.
    pub fn build(self) -> Result<ServiceClient, HttpError> {
        let normalized = normalize_base_url(&self.base_url);
        let base = Url::parse(&normalized).map_err(|source| HttpError::InvalidBaseUrl {
            url: normalized.clone(),
            source,
        })?;

        let http = match self.client {
            Some(client) => {
                tracing::debug!(
                    base_url = %base,
                    gzip = self.gzip,
                    "using supplied HTTP client; gzip setting ignored"
                );
                client
            }
            None => {
                let mut config = self.http_config;
                config.unzip = self.gzip;
                if base.scheme() == "http" {
                    config.transport = TransportSecurity::AllowInsecureHttp;
                }
                HttpClientBuilder::with_config(config).build()?
            }
        };

        tracing::debug!(
            base_url = %base,
            format = ?self.format,
            gzip = self.gzip,
            "service client built"
        );

        Ok(ServiceClient {
            base,
            format: self.format,
            http,
        })
    }
}

/// HTTP client bound to a base URL and body format
#[derive(Debug, Clone)]
pub struct ServiceClient {
    base: Url,
    format: BodyFormat,
    http: HttpClient,
}

impl ServiceClient {
    /// Normalized base URL, always ending with `/`
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    #[must_use]
    pub fn format(&self) -> BodyFormat {
        self.format
    }

    /// Underlying client, for absolute URLs
    #[must_use]
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Resolve `path` against the base URL
    ///
    /// Relative paths extend the base path; a leading `/` replaces it.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::InvalidUri` with [`InvalidUriKind::UnresolvablePath`].
    pub fn resolve(&self, path: &str) -> Result<Url, HttpError> {
        self.base.join(path).map_err(|e| HttpError::InvalidUri {
            url: path.to_owned(),
            kind: InvalidUriKind::UnresolvablePath,
            reason: e.to_string(),
        })
    }

    /// Request for `path`, sending `Accept: <format media type>` unless overridden
    ///
    /// A path that does not resolve fails at `send()`.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        match self.resolve(path) {
            Ok(url) => self
                .http
                .request(method, url.as_str())
                .default_header(ACCEPT, HeaderValue::from_static(self.format.media_type())),
            Err(e) => self.http.request(method, path).with_error(e),
        }
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// GET `path` and decode the body in the service format
    ///
    /// # Errors
    ///
    /// Returns any send error, `HttpError::HttpStatus` for non-2xx, or the
    /// format's decode error.
    pub async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T, HttpError> {
        self.get(path).send().await?.decode(self.format).await
    }

    /// Send `body` encoded in the service format and decode the response
    ///
    /// # Errors
    ///
    /// As [`fetch`](Self::fetch), plus the format's encode error.
    pub async fn send_body<B, T>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(method, path)
            .encode(self.format, body)?
            .send()
            .await?
            .decode(self.format)
            .await
    }
}
