use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::data::{ProgressSample, RequestDescriptor};
use crate::error::TransportFailure;

/// Receives raw byte counters from a transport.
pub type SampleCallback = Arc<dyn Fn(ProgressSample) + Send + Sync>;

/// Per-attempt hooks handed to [`Transport::send`].
#[derive(Clone, Default)]
pub struct SendOptions {
    pub on_upload_progress: Option<SampleCallback>,
    pub on_download_progress: Option<SampleCallback>,

    /// Fires when the caller gives up on the attempt. Transports should stop
    /// promptly and report [`TransportFailure::cancelled`].
    pub cancel: Option<CancellationToken>,
}

impl fmt::Debug for SendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendOptions")
            .field("on_upload_progress", &self.on_upload_progress.is_some())
            .field("on_download_progress", &self.on_download_progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl SendOptions {
    pub fn report_upload(&self, sample: ProgressSample) {
        if let Some(report) = &self.on_upload_progress {
            report(sample);
        }
    }

    pub fn report_download(&self, sample: ProgressSample) {
        if let Some(report) = &self.on_download_progress {
            report(sample);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// Send one request, get one response or one failure.
///
/// This is the only I/O the orchestrator performs. Implementations decide
/// the wire format; the orchestrator only needs the failure to say whether a
/// response arrived and with which status, so it can be classified.
///
/// # Implementations
///
/// - [`ReqwestTransport`]: production implementation using `reqwest`
/// - Scripted mocks for testing
pub trait Transport: Send + Sync + 'static {
    /// Successful response. Cloned out of the cache and to de-duplicated callers.
    type Response: Clone + Send + Sync + 'static;

    fn send(
        &self,
        request: &RequestDescriptor,
        options: SendOptions,
    ) -> impl Future<Output = Result<Self::Response, TransportFailure>> + Send;
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use super::*;

    use bytes::Bytes;
    use futures_util::{Stream, StreamExt, stream};
    use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};
    use serde::de::DeserializeOwned;

    use crate::core::classify;
    use crate::data::Method;
    use crate::error::Result;

    const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

    /// A fully buffered HTTP response with a success status.
    #[derive(Debug, Clone)]
    pub struct HttpResponse {
        pub status: u16,
        pub headers: HeaderMap,
        pub body: Bytes,
    }

    impl HttpResponse {
        pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
            serde_json::from_slice(&self.body)
        }

        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }

    /// Production transport using reqwest.
    ///
    /// Bodies are sent as JSON. Upload progress is reported per chunk when an
    /// upload callback is present; download progress per received chunk.
    /// Non-success statuses become [`TransportFailure::status`].
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
        base_url: Option<String>,
    }

    impl ReqwestTransport {
        /// Create a new ReqwestTransport with default configuration.
        pub fn new() -> Result<Self> {
            let client = reqwest::Client::builder().build().map_err(|e| {
                classify(&TransportFailure::network("failed to build HTTP client").with_cause(e))
            })?;
            Ok(Self::with_client(client))
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client, base_url: None }
        }

        /// Prefix applied to targets that are not absolute URLs.
        #[must_use]
        pub fn base_url(mut self, base: impl Into<String>) -> Self {
            self.base_url = Some(base.into());
            self
        }

        fn url_for(
            &self,
            request: &RequestDescriptor,
        ) -> std::result::Result<reqwest::Url, TransportFailure> {
            let raw = match &self.base_url {
                Some(base) if !request.target.contains("://") => format!(
                    "{}/{}",
                    base.trim_end_matches('/'),
                    request.target.trim_start_matches('/')
                ),
                _ => request.target.clone(),
            };
            let mut url = reqwest::Url::parse(&raw).map_err(|e| {
                TransportFailure::network(format!("invalid request URL `{raw}`")).with_cause(e)
            })?;
            if !request.query.is_empty() {
                url.query_pairs_mut().extend_pairs(&request.query);
            }
            Ok(url)
        }

        async fn perform(
            &self,
            request: &RequestDescriptor,
            options: &SendOptions,
        ) -> std::result::Result<HttpResponse, TransportFailure> {
            let url = self.url_for(request)?;
            let mut builder = self.client.request(reqwest_method(request.method), url);

            for (key, value) in &request.headers {
                builder = builder.header(key, value);
            }

            if let Some(body) = &request.body {
                let payload = serde_json::to_vec(body).map_err(|e| {
                    TransportFailure::network("failed to encode request body").with_cause(e)
                })?;
                builder = builder.header(CONTENT_TYPE, "application/json");
                builder = match &options.on_upload_progress {
                    Some(report) => builder.body(reqwest::Body::wrap_stream(upload_stream(
                        Bytes::from(payload),
                        Arc::clone(report),
                    ))),
                    None => builder.body(payload),
                };
            }

            let response = builder.send().await.map_err(failure_from)?;
            let status = response.status();
            if !status.is_success() {
                return Err(TransportFailure::status(
                    status.as_u16(),
                    format!("{} {} returned {status}", request.method, request.target),
                ));
            }

            let headers = response.headers().clone();
            let total = headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);

            let mut body = Vec::new();
            let mut loaded = 0u64;
            let mut chunks = response.bytes_stream();
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk.map_err(failure_from)?;
                loaded += chunk.len() as u64;
                body.extend_from_slice(&chunk);
                options.report_download(ProgressSample::new(loaded, total));
            }

            Ok(HttpResponse {
                status: status.as_u16(),
                headers,
                body: Bytes::from(body),
            })
        }
    }

    impl Transport for ReqwestTransport {
        type Response = HttpResponse;

        async fn send(
            &self,
            request: &RequestDescriptor,
            options: SendOptions,
        ) -> std::result::Result<HttpResponse, TransportFailure> {
            match options.cancel.clone() {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(TransportFailure::cancelled(format!(
                        "{} {} was cancelled",
                        request.method, request.target
                    ))),
                    result = self.perform(request, &options) => result,
                },
                None => self.perform(request, &options).await,
            }
        }
    }

    fn reqwest_method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Options => reqwest::Method::OPTIONS,
        }
    }

    fn failure_from(err: reqwest::Error) -> TransportFailure {
        let failure = if err.is_timeout() {
            TransportFailure::timed_out(err.to_string())
        } else if let Some(status) = err.status() {
            TransportFailure::status(status.as_u16(), err.to_string())
        } else {
            TransportFailure::network(err.to_string())
        };
        failure.with_cause(err)
    }

    /// Split `payload` into chunks, reporting the running total as each is taken.
    fn upload_stream(
        payload: Bytes,
        report: SampleCallback,
    ) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static {
        let total = payload.len() as u64;
        let chunks: Vec<Bytes> = (0..payload.len())
            .step_by(UPLOAD_CHUNK_SIZE)
            .map(|start| payload.slice(start..(start + UPLOAD_CHUNK_SIZE).min(payload.len())))
            .collect();

        let mut sent = 0u64;
        stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            report(ProgressSample::new(sent, total));
            Ok(chunk)
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use parking_lot::Mutex;

        #[test]
        fn relative_targets_use_base_url() {
            let transport = ReqwestTransport::with_client(reqwest::Client::new())
                .base_url("https://api.example.com/v1/");
            let request = RequestDescriptor::get("/items").query("page", "2");
            let url = transport.url_for(&request).unwrap();
            assert_eq!(url.as_str(), "https://api.example.com/v1/items?page=2");

            let absolute = RequestDescriptor::get("https://other.example.com/x");
            let url = transport.url_for(&absolute).unwrap();
            assert_eq!(url.as_str(), "https://other.example.com/x");
        }

        #[test]
        fn relative_target_without_base_is_a_network_failure() {
            let transport = ReqwestTransport::with_client(reqwest::Client::new());
            let failure = transport.url_for(&RequestDescriptor::get("/items")).unwrap_err();
            assert!(!failure.response_received());
            assert!(!failure.cancelled);
        }

        #[tokio::test]
        async fn upload_stream_reports_running_total() {
            let samples = Arc::new(Mutex::new(Vec::new()));
            let report: SampleCallback = {
                let samples = samples.clone();
                Arc::new(move |s: ProgressSample| samples.lock().push(s.loaded_bytes))
            };

            let payload = Bytes::from(vec![7u8; UPLOAD_CHUNK_SIZE * 2 + 10]);
            let chunks: Vec<_> = upload_stream(payload, report).collect().await;

            assert_eq!(chunks.len(), 3);
            let chunk = UPLOAD_CHUNK_SIZE as u64;
            assert_eq!(*samples.lock(), [chunk, chunk * 2, chunk * 2 + 10]);
        }

        #[tokio::test]
        async fn cancelled_token_short_circuits() {
            let transport = ReqwestTransport::with_client(reqwest::Client::new());
            let token = CancellationToken::new();
            token.cancel();

            let options = SendOptions { cancel: Some(token), ..SendOptions::default() };
            let failure = transport
                .send(&RequestDescriptor::get("http://127.0.0.1:9/never"), options)
                .await
                .unwrap_err();
            assert!(failure.cancelled);
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::{HttpResponse, ReqwestTransport};
