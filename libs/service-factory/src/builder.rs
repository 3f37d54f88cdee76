use crate::config::{HttpClientConfig, TlsRootConfig, TransportSecurity};
use crate::error::HttpError;
use crate::layers::{DefaultHeadersLayer, UnzipLayer};
use crate::response::ResponseBody;
use crate::tls;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::time::Duration;
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower::{ServiceBuilder, ServiceExt};

type HyperClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Pooled connections plus the optional unzip layer, type-erased
type TransportService =
    BoxCloneService<Request<Full<Bytes>>, Response<ResponseBody>, tower::BoxError>;

/// Builder for an [`HttpClient`](crate::HttpClient)
#[derive(Debug, Clone)]
pub struct HttpClientBuilder {
    config: HttpClientConfig,
}

impl HttpClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: HttpClientConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self { config }
    }

    /// Per-request timeout, covering connect and the response head
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a header sent with every request that does not set it already
    ///
    /// May be called repeatedly; repeated names produce multiple values.
    /// Invalid names or values fail at [`build`](Self::build).
    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    /// Maximum response body size, counted after unzipping
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Unzip `Content-Encoding: gzip` responses (default: off)
    #[must_use]
    pub fn unzip(mut self, enabled: bool) -> Self {
        self.config.unzip = enabled;
        self
    }

    /// Use `TransportSecurity::AllowInsecureHttp` only for testing with mock servers.
    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Allow plain `http://` URLs (testing only)
    ///
    /// Only available in debug builds or with the `allow-insecure-http` feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "service_factory::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Maximum queued requests; 0 is clamped to 1 (`tower::buffer::Buffer` panics on 0)
    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity.max(1);
        self
    }

    /// Idle connection timeout; `None` keeps hyper-util's default
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// `0` disables connection reuse
    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Build the client
    ///
    /// Stack, outermost first:
    ///
    /// ```text
    /// Buffer -> ErrorMapping -> Timeout -> DefaultHeaders -> [Unzip] -> hyper client
    /// ```
    ///
    /// The unzip layer sits directly above the pool, so every other layer and
    /// every caller sees the unzipped body and the stripped headers.
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails or a default header is invalid
    pub fn build(self) -> Result<crate::HttpClient, HttpError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let timeout = self.config.request_timeout;

        let headers_layer = DefaultHeadersLayer::try_from_pairs(
            std::iter::once(("user-agent", self.config.user_agent.as_str())).chain(
                self.config
                    .default_headers
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str())),
            ),
        )?;

        let https = tls::https_connector(self.config.tls_roots, self.config.transport)?;

        let mut client_builder = Client::builder(TokioExecutor::new());
        // pool_idle_timeout has no effect without a pool timer
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host)
            .http2_only(false);
        if let Some(idle_timeout) = self.config.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle_timeout);
        }
        let hyper_client: HyperClient = client_builder.build(https);

        let transport = transport_service(hyper_client, self.config.unzip);

        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(headers_layer)
            .service(transport)
            .map_err(move |e: tower::BoxError| map_tower_error(e, timeout))
            .boxed_clone();

        let buffered: crate::client::BufferedService =
            Buffer::new(service, self.config.buffer_capacity.max(1));

        Ok(crate::HttpClient {
            service: buffered,
            max_body_size: self.config.max_body_size,
            transport_security: self.config.transport,
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn transport_service(client: HyperClient, unzip: bool) -> TransportService {
    if unzip {
        tracing::debug!("gzip unzip layer installed");
        ServiceBuilder::new()
            .layer(UnzipLayer::new())
            .service(client)
            .map_response(into_response_body)
            .map_err(|e| -> tower::BoxError { e.into() })
            .boxed_clone()
    } else {
        client
            .map_response(into_response_body)
            .map_err(|e| -> tower::BoxError { e.into() })
            .boxed_clone()
    }
}

/// Map tower errors to `HttpError`, keeping typed errors from inner services
fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }

    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}

fn into_response_body<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    response.map(|body| body.map_err(Into::into).boxed())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::DEFAULT_USER_AGENT;
    use httpmock::prelude::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;

    /// Collects the messages of WARN events
    #[derive(Clone, Default)]
    struct WarningCapture {
        warnings: Arc<Mutex<Vec<String>>>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarningCapture {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if *event.metadata().level() == tracing::Level::WARN {
                let mut visitor = MessageVisitor(String::new());
                event.record(&mut visitor);
                self.warnings.lock().unwrap().push(visitor.0);
            }
        }
    }

    struct MessageVisitor(String);

    impl tracing::field::Visit for MessageVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    fn captured_warnings(build: impl FnOnce()) -> Vec<String> {
        let capture = WarningCapture::default();
        let warnings = capture.warnings.clone();
        let subscriber = tracing_subscriber::registry().with(capture);
        tracing::subscriber::with_default(subscriber, build);
        warnings.lock().unwrap().clone()
    }

    #[test]
    fn test_builder_default() {
        let builder = HttpClientBuilder::new();
        assert_eq!(builder.config.request_timeout, Duration::from_secs(30));
        assert_eq!(builder.config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(builder.config.transport, TransportSecurity::TlsOnly);
        assert!(!builder.config.unzip);
    }

    #[test]
    fn test_builder_setters() {
        let builder = HttpClientBuilder::new()
            .timeout(Duration::from_secs(60))
            .user_agent("custom/1.0")
            .max_body_size(1024)
            .unzip(true)
            .default_header("x-client", "people-app")
            .tls_roots(TlsRootConfig::Native)
            .pool_idle_timeout(None)
            .pool_max_idle_per_host(0);

        assert_eq!(builder.config.request_timeout, Duration::from_secs(60));
        assert_eq!(builder.config.user_agent, "custom/1.0");
        assert_eq!(builder.config.max_body_size, 1024);
        assert!(builder.config.unzip);
        assert_eq!(
            builder.config.default_headers,
            vec![("x-client".to_owned(), "people-app".to_owned())]
        );
        assert_eq!(builder.config.tls_roots, TlsRootConfig::Native);
        assert_eq!(builder.config.pool_idle_timeout, None);
        assert_eq!(builder.config.pool_max_idle_per_host, 0);
    }

    #[test]
    fn test_builder_transport_security() {
        let builder = HttpClientBuilder::new().transport(TransportSecurity::AllowInsecureHttp);
        assert_eq!(builder.config.transport, TransportSecurity::AllowInsecureHttp);

        let builder = HttpClientBuilder::new().allow_insecure_http();
        assert_eq!(builder.config.transport, TransportSecurity::AllowInsecureHttp);
    }

    #[test]
    fn test_builder_buffer_capacity_zero_clamped() {
        let builder = HttpClientBuilder::new().buffer_capacity(0);
        assert_eq!(builder.config.buffer_capacity, 1);
    }

    #[tokio::test]
    async fn test_builder_buffer_capacity_zero_in_config_clamped() {
        let config = HttpClientConfig {
            buffer_capacity: 0,
            ..Default::default()
        };
        assert!(HttpClientBuilder::with_config(config).build().is_ok());
    }

    #[tokio::test]
    async fn test_builder_build_variants() {
        assert!(HttpClientBuilder::new().build().is_ok());
        assert!(HttpClientBuilder::new().unzip(true).build().is_ok());
        assert!(HttpClientBuilder::with_config(HttpClientConfig::minimal()).build().is_ok());
        assert!(HttpClientBuilder::with_config(HttpClientConfig::for_testing()).build().is_ok());
    }

    #[tokio::test]
    async fn test_builder_build_invalid_user_agent() {
        let result = HttpClientBuilder::new().user_agent("invalid\x00agent").build();
        assert!(matches!(result, Err(HttpError::InvalidHeaderValue(_))));
    }

    #[tokio::test]
    async fn test_builder_build_invalid_default_header() {
        let result = HttpClientBuilder::new().default_header("bad header", "x").build();
        assert!(matches!(result, Err(HttpError::InvalidHeaderName(_))));
    }

    #[tokio::test]
    async fn test_builder_native_roots() {
        let result = HttpClientBuilder::new().tls_roots(TlsRootConfig::Native).build();
        match result {
            Ok(_) | Err(HttpError::Tls(_)) => {}
            Err(other) => panic!("Unexpected error type: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(Duration::from_millis(500));
        });

        let client = HttpClientBuilder::new()
            .allow_insecure_http()
            .unzip(true)
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();

        let url = format!("{}/slow", server.base_url());
        match client.get(&url).send().await {
            Err(HttpError::Timeout(d)) => assert_eq!(d, Duration::from_millis(50)),
            other => panic!("Expected Timeout error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_insecure_http_warning_emitted() {
        let captured = captured_warnings(|| {
            _ = HttpClientBuilder::new().allow_insecure_http().build();
        });

        assert!(
            captured
                .iter()
                .any(|w| w.contains("insecure HTTP") || w.contains("HTTP traffic")),
            "warning should mention insecure HTTP: {captured:?}"
        );
    }

    #[tokio::test]
    async fn test_tls_only_no_warning() {
        let captured = captured_warnings(|| {
            _ = HttpClientBuilder::new()
                .transport(TransportSecurity::TlsOnly)
                .build();
        });

        assert!(
            !captured.iter().any(|w| w.contains("insecure HTTP")),
            "no insecure HTTP warning expected, got: {captured:?}"
        );
    }

    #[test]
    fn test_map_tower_error_preserves_http_errors() {
        let boxed: tower::BoxError = Box::new(HttpError::Overloaded);
        assert!(matches!(
            map_tower_error(boxed, Duration::from_secs(30)),
            HttpError::Overloaded
        ));

        let boxed: tower::BoxError = Box::new(HttpError::Timeout(Duration::from_secs(5)));
        match map_tower_error(boxed, Duration::from_secs(30)) {
            HttpError::Timeout(d) => assert_eq!(d, Duration::from_secs(5)),
            other => panic!("Should preserve HttpError::Timeout, got: {other:?}"),
        }
    }

    #[test]
    fn test_map_tower_error_elapsed_becomes_timeout() {
        let boxed: tower::BoxError = Box::new(tower::timeout::error::Elapsed::new());
        match map_tower_error(boxed, Duration::from_secs(7)) {
            HttpError::Timeout(d) => assert_eq!(d, Duration::from_secs(7)),
            other => panic!("Expected Timeout, got: {other:?}"),
        }
    }

    #[test]
    fn test_map_tower_error_wraps_unknown_as_transport() {
        let other: tower::BoxError = Box::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(matches!(
            map_tower_error(other, Duration::from_secs(30)),
            HttpError::Transport(_)
        ));
    }
}
