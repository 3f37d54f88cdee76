use crate::config::BodyFormat;
use crate::error::HttpError;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body::Frame;
use http_body_util::BodyExt;
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Maximum bytes of an error body kept in [`HttpError::HttpStatus`]
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Type-erased response body.
///
/// Holds either the body as received or the unzipped body, depending on
/// whether the unzip layer is installed and the response was gzip-encoded.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

pin_project! {
    /// Body wrapper that enforces size limits during streaming.
    ///
    /// Created by [`HttpResponse::into_limited_body()`]. Returns
    /// [`HttpError::BodyTooLarge`] once more than `limit` bytes were read.
    ///
    /// ```ignore
    /// use http_body_util::BodyExt;
    ///
    /// let mut body = client.get(url).send().await?.into_limited_body();
    /// while let Some(frame) = body.frame().await {
    ///     if let Some(chunk) = frame?.data_ref() {
    ///         sink.write_all(chunk)?;
    ///     }
    /// }
    /// ```
    pub struct LimitedBody {
        #[pin]
        inner: ResponseBody,
        limit: usize,
        read: usize,
    }
}

impl LimitedBody {
    #[must_use]
    pub fn new(inner: ResponseBody, limit: usize) -> Self {
        Self {
            inner,
            limit,
            read: 0,
        }
    }

    /// Bytes read so far
    #[must_use]
    pub fn bytes_read(&self) -> usize {
        self.read
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl http_body::Body for LimitedBody {
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        match this.inner.poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    *this.read += data.len();
                    if *this.read > *this.limit {
                        return Poll::Ready(Some(Err(HttpError::BodyTooLarge {
                            limit: *this.limit,
                            actual: *this.read,
                        })));
                    }
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(HttpError::Transport(e)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }
}

/// HTTP response wrapper with body-reading helpers
///
/// - `resp.error_for_status()?` checks the status without reading the body
/// - `resp.bytes().await?` reads raw bytes
/// - `resp.checked_bytes().await?` reads bytes after a status check
/// - `resp.json::<T>()` / `resp.xml::<T>()` / `resp.decode::<T>(format)` parse the body
///
/// All body reads enforce the configured `max_body_size`. When the unzip
/// layer handled the response, the limit applies to the unzipped bytes and
/// the headers no longer carry `Content-Encoding` or `Content-Length`.
#[derive(Debug)]
pub struct HttpResponse {
    pub(crate) inner: Response<ResponseBody>,
    pub(crate) max_body_size: usize,
}

impl HttpResponse {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Consume the wrapper and return the inner response
    #[must_use]
    pub fn into_inner(self) -> Response<ResponseBody> {
        self.inner
    }

    /// Return `HttpError::HttpStatus` for non-2xx responses without reading the body
    ///
    /// # Errors
    ///
    /// Returns `HttpError::HttpStatus` (with an empty preview) if the status is not 2xx.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.inner.status().is_success() {
            return Ok(self);
        }

        Err(HttpError::HttpStatus {
            status: self.inner.status(),
            body_preview: String::new(),
            content_type: content_type(self.inner.headers()),
        })
    }

    /// Read the body as bytes without a status check
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if the body exceeds the limit and
    /// `HttpError::Transport` if the body stream fails (including corrupt gzip).
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        read_body_limited(self.inner, self.max_body_size).await
    }

    /// Read the body as bytes after a status check
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` if status is not 2xx (with a body preview).
    /// Returns `HttpError::BodyTooLarge` or `HttpError::Transport` as [`bytes`](Self::bytes).
    pub async fn checked_bytes(self) -> Result<Bytes, HttpError> {
        checked_body(self.inner, self.max_body_size).await
    }

    /// Parse the body as JSON after a status check
    ///
    /// # Errors
    /// Returns the errors of [`checked_bytes`](Self::checked_bytes), or
    /// `HttpError::Json` if parsing fails.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        self.decode(BodyFormat::Json).await
    }

    /// Parse the body as XML after a status check
    ///
    /// # Errors
    /// Returns the errors of [`checked_bytes`](Self::checked_bytes), or
    /// `HttpError::Xml` if parsing fails.
    pub async fn xml<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        self.decode(BodyFormat::Xml).await
    }

    /// Parse the body in the given format after a status check
    ///
    /// # Errors
    /// Returns the errors of [`checked_bytes`](Self::checked_bytes), or the
    /// format's parse error.
    pub async fn decode<T: DeserializeOwned>(self, format: BodyFormat) -> Result<T, HttpError> {
        let body = checked_body(self.inner, self.max_body_size).await?;
        decode_body(format, &body)
    }

    /// Read the body as UTF-8 text after a status check (lossy)
    ///
    /// # Errors
    /// Returns the errors of [`checked_bytes`](Self::checked_bytes).
    pub async fn text(self) -> Result<String, HttpError> {
        let body = checked_body(self.inner, self.max_body_size).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Body as a stream, without status check or size limit
    ///
    /// Prefer [`into_limited_body()`](Self::into_limited_body) for untrusted
    /// peers: a small gzip payload can unzip to a very large body.
    #[must_use]
    pub fn into_body(self) -> ResponseBody {
        self.inner.into_body()
    }

    /// Body as a stream that fails with `HttpError::BodyTooLarge` past `max_body_size`
    #[must_use]
    pub fn into_limited_body(self) -> LimitedBody {
        LimitedBody::new(self.inner.into_body(), self.max_body_size)
    }

    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn decode_body<T: DeserializeOwned>(format: BodyFormat, body: &[u8]) -> Result<T, HttpError> {
    match format {
        BodyFormat::Json => Ok(serde_json::from_slice(body)?),
        BodyFormat::Xml => {
            let text = std::str::from_utf8(body).map_err(|e| {
                HttpError::Xml(quick_xml::DeError::Custom(format!(
                    "XML body is not valid UTF-8: {e}"
                )))
            })?;
            Ok(quick_xml::de::from_str(text)?)
        }
    }
}

async fn checked_body(
    response: Response<ResponseBody>,
    max_body_size: usize,
) -> Result<Bytes, HttpError> {
    let status = response.status();

    if !status.is_success() {
        let content_type = content_type(response.headers());

        // An oversized error body must not hide the status
        let preview_limit = max_body_size.min(ERROR_BODY_PREVIEW_LIMIT);
        let body_preview = match read_body_limited(response, preview_limit).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(HttpError::BodyTooLarge { .. }) => "<body too large for preview>".to_owned(),
            Err(e) => return Err(e),
        };

        return Err(HttpError::HttpStatus {
            status,
            body_preview,
            content_type,
        });
    }

    read_body_limited(response, max_body_size).await
}

async fn read_body_limited(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<Bytes, HttpError> {
    let mut body = std::pin::pin!(response.into_body());
    let mut collected = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            let actual = collected.len() + chunk.len();
            if actual > limit {
                return Err(HttpError::BodyTooLarge { limit, actual });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}
