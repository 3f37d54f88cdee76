use crate::gzip_body::GzipBody;
use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use http::{HeaderMap, HeaderName, Request, Response};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tower::{Layer, Service};

/// Tower layer that transparently unzips gzip-encoded responses
///
/// The request is forwarded to the inner service untouched. When the response
/// comes back with a body and `Content-Encoding: gzip`, the body is replaced by
/// a lazily decompressing [`GzipBody`] and the `Content-Encoding` and
/// `Content-Length` headers are removed. Everything else about the response
/// (status, version, extensions, the remaining headers and their order) is kept.
///
/// The layer is stateless; one instance can be shared by any number of
/// concurrent exchanges.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnzipLayer;

impl UnzipLayer {
    /// Create a new `UnzipLayer`
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for UnzipLayer {
    type Service = UnzipService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        UnzipService { inner }
    }
}

/// Service that unzips gzip-encoded response bodies
#[derive(Clone, Debug)]
pub struct UnzipService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for UnzipService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: Body<Data = Bytes>,
{
    type Response = Response<UnzipBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        ResponseFuture {
            future: self.inner.call(req),
        }
    }
}

pin_project! {
    /// Response future of [`UnzipService`]
    pub struct ResponseFuture<F> {
        #[pin]
        future: F,
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body<Data = Bytes>,
{
    type Output = Result<Response<UnzipBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let response = ready!(self.project().future.poll(cx))?;
        Poll::Ready(Ok(unzip_response(response)))
    }
}

/// Rewrite a single response, unzipping its body if it is gzip-encoded.
///
/// Responses without a body, or without a single `gzip` content coding, are
/// returned as they are (wrapped in [`UnzipBody::Identity`]).
#[must_use]
pub fn unzip_response<B>(response: Response<B>) -> Response<UnzipBody<B>>
where
    B: Body<Data = Bytes>,
{
    let (mut parts, body) = response.into_parts();

    if body.is_end_stream() || !is_gzip_encoded(&parts.headers) {
        return Response::from_parts(parts, UnzipBody::Identity { inner: body });
    }

    tracing::trace!(status = %parts.status, "unzipping gzip response body");

    parts.headers = strip_headers(&parts.headers, &[CONTENT_ENCODING, CONTENT_LENGTH]);
    Response::from_parts(
        parts,
        UnzipBody::Gzip {
            inner: GzipBody::new(body),
        },
    )
}

/// Whether the headers declare exactly one content coding and it is gzip.
///
/// Stacked codings (`gzip, br`) and non-UTF-8 values are not unzipped.
#[must_use]
pub fn is_gzip_encoded(headers: &HeaderMap) -> bool {
    let mut codings = Vec::new();
    for value in headers.get_all(CONTENT_ENCODING).iter() {
        let Ok(value) = value.to_str() else {
            return false;
        };
        codings.extend(value.split(',').map(str::trim).filter(|c| !c.is_empty()));
    }

    matches!(
        codings.as_slice(),
        [coding] if coding.eq_ignore_ascii_case("gzip") || coding.eq_ignore_ascii_case("x-gzip")
    )
}

/// Copy `headers` without any entry named in `names`.
///
/// Every occurrence of a listed name is dropped. The remaining entries keep
/// their relative order and multiplicity; `HeaderMap::remove` is not used
/// since it reorders the map.
#[must_use]
pub fn strip_headers(headers: &HeaderMap, names: &[HeaderName]) -> HeaderMap {
    let mut stripped = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !names.contains(name) {
            stripped.append(name.clone(), value.clone());
        }
    }
    stripped
}

pin_project! {
    /// Response body produced by [`UnzipService`]
    ///
    /// Both variants report errors as [`std::io::Error`].
    #[project = UnzipBodyProj]
    #[derive(Debug)]
    pub enum UnzipBody<B> {
        /// Body passed through untouched
        Identity {
            #[pin]
            inner: B,
        },
        /// Body being decompressed on read
        Gzip {
            #[pin]
            inner: GzipBody<B>,
        },
    }
}

impl<B> Body for UnzipBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            UnzipBodyProj::Identity { inner } => inner
                .poll_frame(cx)
                .map(|frame| frame.map(|r| r.map_err(io::Error::other))),
            UnzipBodyProj::Gzip { inner } => inner.poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Identity { inner } => inner.is_end_stream(),
            Self::Gzip { inner } => inner.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            Self::Identity { inner } => inner.size_hint(),
            Self::Gzip { inner } => inner.size_hint(),
        }
    }
}
