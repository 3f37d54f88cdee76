use crate::client::{BufferedService, map_buffer_error, try_acquire_buffer_slot};
use crate::config::{BodyFormat, TransportSecurity};
use crate::error::{HttpError, InvalidUriKind};
use crate::response::{HttpResponse, ResponseBody};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{Request, Response};
use http_body_util::Full;
use serde::Serialize;
use tower::Service;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Clone, Debug)]
enum BodyKind {
    Empty,
    /// Raw bytes, no default Content-Type
    Raw(Bytes),
    /// Serialized body with the Content-Type applied unless the caller set one
    Typed {
        content_type: &'static str,
        bytes: Bytes,
    },
}

/// HTTP request builder with fluent API
///
/// Created by [`HttpClient::get`](crate::HttpClient::get) and friends, or by
/// [`ServiceClient::request`](crate::ServiceClient::request) for paths relative
/// to a service base URL. Errors from `header()` are deferred to `send()`.
///
/// ```ignore
/// let resp = client
///     .post("https://api.example.com/people")
///     .header("x-request-id", "123")
///     .xml(&NewPerson { name: "PETER" })?
///     .send()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    service: BufferedService,
    max_body_size: usize,
    method: http::Method,
    url: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    /// Applied at `send()` only if `headers` has no entry of that name
    defaults: Vec<(HeaderName, HeaderValue)>,
    body: BodyKind,
    error: Option<HttpError>,
    transport_security: TransportSecurity,
}

impl RequestBuilder {
    pub(crate) fn new(
        service: BufferedService,
        max_body_size: usize,
        method: http::Method,
        url: String,
        transport_security: TransportSecurity,
    ) -> Self {
        Self {
            service,
            max_body_size,
            method,
            url,
            headers: Vec::new(),
            defaults: Vec::new(),
            body: BodyKind::Empty,
            error: None,
            transport_security,
        }
    }

    /// Fail this request at `send()` with `err`
    pub(crate) fn with_error(mut self, err: HttpError) -> Self {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self
    }

    /// Header used only when the caller does not set one of the same name
    pub(crate) fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.defaults.push((name, value));
        self
    }

    /// Add a single header to the request
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }

        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => self.headers.push((name, value)),
            (Err(e), _) => self.error = Some(HttpError::InvalidHeaderName(e)),
            (_, Err(e)) => self.error = Some(HttpError::InvalidHeaderValue(e)),
        }
        self
    }

    /// Add multiple headers to the request, in order
    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        for (name, value) in headers {
            self = self.header(&name, &value);
            if self.error.is_some() {
                break;
            }
        }
        self
    }

    /// Set the body as JSON (`Content-Type: application/json` unless set)
    ///
    /// # Errors
    ///
    /// Returns a deferred header error, or `HttpError::Json` if serialization fails.
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, HttpError> {
        self.encode(BodyFormat::Json, body)
    }

    /// Set the body as XML (`Content-Type: application/xml` unless set)
    ///
    /// The root element is named after the serialized type.
    ///
    /// # Errors
    ///
    /// Returns a deferred header error, or `HttpError::XmlEncode` if serialization fails.
    pub fn xml<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, HttpError> {
        self.encode(BodyFormat::Xml, body)
    }

    /// Set the body in the given format
    ///
    /// # Errors
    ///
    /// Returns a deferred header error, or the format's serialization error.
    pub fn encode<T: Serialize + ?Sized>(
        mut self,
        format: BodyFormat,
        body: &T,
    ) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let bytes = match format {
            BodyFormat::Json => Bytes::from(serde_json::to_vec(body)?),
            BodyFormat::Xml => Bytes::from(quick_xml::se::to_string(body)?),
        };
        self.body = BodyKind::Typed {
            content_type: format.media_type(),
            bytes,
        };
        Ok(self)
    }

    /// Set the body as form URL-encoded
    ///
    /// # Errors
    ///
    /// Returns a deferred header error, or `HttpError::FormEncode` if encoding fails.
    pub fn form(mut self, fields: &[(&str, &str)]) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let encoded = serde_urlencoded::to_string(fields)?;
        self.body = BodyKind::Typed {
            content_type: FORM_CONTENT_TYPE,
            bytes: Bytes::from(encoded),
        };
        Ok(self)
    }

    pub fn body_bytes(mut self, body: Bytes) -> Self {
        self.body = BodyKind::Raw(body);
        self
    }

    pub fn body_string(mut self, body: String) -> Self {
        self.body = BodyKind::Raw(Bytes::from(body));
        self
    }

    /// Parse the URL and check its scheme against the transport mode
    fn validate_url(&self) -> Result<http::Uri, HttpError> {
        let uri: http::Uri =
            self.url
                .parse()
                .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
                    url: self.url.clone(),
                    kind: InvalidUriKind::ParseError,
                    reason: e.to_string(),
                })?;

        if uri.authority().is_none() {
            return Err(HttpError::InvalidUri {
                url: self.url.clone(),
                kind: InvalidUriKind::MissingAuthority,
                reason: "missing host/authority".to_owned(),
            });
        }

        match uri.scheme_str() {
            Some("https") => Ok(uri),
            Some("http") => match self.transport_security {
                TransportSecurity::AllowInsecureHttp => Ok(uri),
                TransportSecurity::TlsOnly => Err(HttpError::InvalidScheme {
                    scheme: "http".to_owned(),
                    reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
                }),
            },
            Some(scheme) => Err(HttpError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "only http:// and https:// schemes are supported".to_owned(),
            }),
            None => Err(HttpError::InvalidUri {
                url: self.url.clone(),
                kind: InvalidUriKind::MissingScheme,
                reason: "missing scheme".to_owned(),
            }),
        }
    }

    /// Send the request
    ///
    /// Resolves once the response head arrives. Body errors (including a
    /// corrupt or truncated gzip stream) surface when the body is read.
    ///
    /// # Errors
    ///
    /// Returns `HttpError` for deferred builder errors, an invalid URL or
    /// scheme, transport failure, timeout, or `Overloaded` when the request
    /// buffer is full.
    pub async fn send(mut self) -> Result<HttpResponse, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let uri = self.validate_url()?;
        let mut builder = Request::builder().method(self.method).uri(uri);

        let body = match self.body {
            BodyKind::Empty => Bytes::new(),
            BodyKind::Raw(bytes) => bytes,
            BodyKind::Typed {
                content_type,
                bytes,
            } => {
                if !self.headers.iter().any(|(name, _)| name == CONTENT_TYPE) {
                    builder = builder.header(CONTENT_TYPE, content_type);
                }
                bytes
            }
        };

        for (name, value) in self.defaults {
            if !self.headers.iter().any(|(set, _)| *set == name) {
                builder = builder.header(name, value);
            }
        }
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }

        let request = builder.body(Full::new(body))?;

        try_acquire_buffer_slot(&mut self.service).await?;

        let inner: Response<ResponseBody> =
            self.service.call(request).await.map_err(map_buffer_error)?;

        Ok(HttpResponse {
            inner,
            max_body_size: self.max_body_size,
        })
    }
}
