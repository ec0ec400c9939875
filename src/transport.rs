use std::future::Future;

use futures_util::future::BoxFuture;

use crate::error::TransportError;
use crate::request::AttemptRequest;
use crate::response::Response;

/// `Ok(None)` means the call completed without producing a response.
pub type TransportResult = Result<Option<Response>, TransportError>;

/// Performs one HTTP exchange. Timeouts, if any, are the transport's business
/// and surface as [`TransportErrorKind::Timeout`](crate::TransportErrorKind::Timeout).
pub trait Transport: Send + Sync {
    fn perform(&self, request: AttemptRequest) -> BoxFuture<'_, TransportResult>;
}

impl<F, Fut> Transport for F
where
    F: Fn(AttemptRequest) -> Fut + Send + Sync,
    Fut: Future<Output = TransportResult> + Send + 'static,
{
    fn perform(&self, request: AttemptRequest) -> BoxFuture<'_, TransportResult> {
        Box::pin(self(request))
    }
}

#[cfg(feature = "hyper-transport")]
pub use hyper_transport::HyperTransport;

#[cfg(feature = "hyper-transport")]
mod hyper_transport {
    use std::time::Duration;

    use bytes::Bytes;
    use futures_util::future::BoxFuture;
    use http_body_util::{BodyExt, Full};
    use hyper_util::client::legacy::Client;
    use hyper_util::client::legacy::connect::HttpConnector;
    use hyper_util::rt::TokioExecutor;
    use tokio::time::timeout;

    use super::{Transport, TransportResult};
    use crate::error::{TransportError, TransportErrorKind};
    use crate::request::AttemptRequest;
    use crate::response::Response;

    const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Plain HTTP/1.1 transport on the hyper-util legacy client.
    #[derive(Clone)]
    pub struct HyperTransport {
        client: Client<HttpConnector, Full<Bytes>>,
        request_timeout: Duration,
    }

    impl std::fmt::Debug for HyperTransport {
        fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter
                .debug_struct("HyperTransport")
                .field("request_timeout", &self.request_timeout)
                .finish()
        }
    }

    impl HyperTransport {
        pub fn new() -> Self {
            Self {
                client: Client::builder(TokioExecutor::new()).build_http(),
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
            }
        }

        /// Bounds the response head and the body read separately.
        pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
            self.request_timeout = request_timeout.max(Duration::from_millis(1));
            self
        }

        async fn send(&self, request: AttemptRequest) -> TransportResult {
            let AttemptRequest {
                url,
                method,
                headers,
                body,
                ..
            } = request;
            let uri: http::Uri = url
                .parse()
                .map_err(|source: http::uri::InvalidUri| {
                    TransportError::new(TransportErrorKind::Other, source)
                })?;

            let mut http_request = http::Request::new(Full::new(body.unwrap_or_default()));
            *http_request.method_mut() = method;
            *http_request.uri_mut() = uri;
            *http_request.headers_mut() = headers;

            let response = match timeout(self.request_timeout, self.client.request(http_request))
                .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(source)) => {
                    let kind = classify_transport_error(&source);
                    return Err(TransportError::new(kind, source));
                }
                Err(_) => return Err(self.timeout_error()),
            };

            let (parts, incoming) = response.into_parts();
            let body = match timeout(self.request_timeout, incoming.collect()).await {
                Ok(Ok(collected)) => collected.to_bytes(),
                Ok(Err(source)) => {
                    return Err(TransportError::new(TransportErrorKind::Read, source));
                }
                Err(_) => return Err(self.timeout_error()),
            };

            Ok(Some(Response::new(url, parts.status, parts.headers, body)))
        }

        fn timeout_error(&self) -> TransportError {
            TransportError::new(
                TransportErrorKind::Timeout,
                format!(
                    "no response within {}ms",
                    self.request_timeout.as_millis()
                ),
            )
        }
    }

    impl Default for HyperTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transport for HyperTransport {
        fn perform(&self, request: AttemptRequest) -> BoxFuture<'_, TransportResult> {
            Box::pin(self.send(request))
        }
    }

    fn error_chain_text(error: &(dyn std::error::Error + 'static)) -> String {
        let mut text = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            text.push_str(": ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        text.to_ascii_lowercase()
    }

    fn find_in_chain<'a, T: std::error::Error + 'static>(
        error: &'a (dyn std::error::Error + 'static),
    ) -> Option<&'a T> {
        let mut current = Some(error);
        while let Some(cause) = current {
            if let Some(found) = cause.downcast_ref::<T>() {
                return Some(found);
            }
            current = cause.source();
        }
        None
    }

    pub(crate) fn classify_transport_error(
        error: &hyper_util::client::legacy::Error,
    ) -> TransportErrorKind {
        classify_error_chain(error.is_connect(), error)
    }

    pub(crate) fn classify_error_chain(
        is_connect: bool,
        error: &(dyn std::error::Error + 'static),
    ) -> TransportErrorKind {
        let text = error_chain_text(error);
        // The plain connector only speaks http.
        if text.contains("scheme is not http") || text.contains("invalid url") {
            return TransportErrorKind::Other;
        }
        let io_kind = find_in_chain::<std::io::Error>(error).map(std::io::Error::kind);

        if is_connect {
            if text.contains("dns")
                || text.contains("name or service not known")
                || text.contains("failed to lookup address")
            {
                return TransportErrorKind::Dns;
            }
            if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
                return TransportErrorKind::Tls;
            }
            return TransportErrorKind::Connect;
        }

        if matches!(
            io_kind,
            Some(
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            )
        ) || text.contains("connection reset")
            || text.contains("broken pipe")
        {
            return TransportErrorKind::Reset;
        }
        let incomplete = find_in_chain::<hyper::Error>(error).is_some_and(|hyper_error| {
            hyper_error.is_incomplete_message() || hyper_error.is_closed()
        });
        if incomplete
            || io_kind == Some(std::io::ErrorKind::UnexpectedEof)
            || text.contains("read error")
            || text.contains("unexpected eof")
            || text.contains("connection closed before message completed")
        {
            return TransportErrorKind::Read;
        }

        TransportErrorKind::Other
    }
}
