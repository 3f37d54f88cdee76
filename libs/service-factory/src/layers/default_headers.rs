use crate::error::HttpError;
use http::{HeaderMap, HeaderName, HeaderValue, Request};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that fills in default request headers
///
/// Each default is only applied when the request carries no header of that
/// name, so per-request values always win. Used for `User-Agent` and for the
/// `Accept` header matching the service's body format.
#[derive(Clone, Debug, Default)]
pub struct DefaultHeadersLayer {
    defaults: Arc<HeaderMap>,
}

impl DefaultHeadersLayer {
    /// Create a layer from an already validated header map
    #[must_use]
    pub fn new(defaults: HeaderMap) -> Self {
        Self {
            defaults: Arc::new(defaults),
        }
    }

    /// Create a layer from string pairs
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderName` or `HttpError::InvalidHeaderValue`
    /// for the first pair that does not parse
    pub fn try_from_pairs<I, K, V>(pairs: I) -> Result<Self, HttpError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut defaults = HeaderMap::new();
        for (name, value) in pairs {
            let name = HeaderName::try_from(name.as_ref())?;
            let value = HeaderValue::try_from(value.as_ref())?;
            defaults.append(name, value);
        }
        Ok(Self::new(defaults))
    }
}

impl<S> Layer<S> for DefaultHeadersLayer {
    type Service = DefaultHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultHeadersService {
            inner,
            defaults: Arc::clone(&self.defaults),
        }
    }
}

/// Service that adds default headers to requests
#[derive(Clone, Debug)]
pub struct DefaultHeadersService<S> {
    inner: S,
    defaults: Arc<HeaderMap>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for DefaultHeadersService<S>
where
    S: Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let headers = req.headers_mut();
        for name in self.defaults.keys() {
            if headers.contains_key(name) {
                continue;
            }
            for value in self.defaults.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        self.inner.call(req)
    }
}
