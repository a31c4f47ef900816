//! HTTP instrumentation middleware
//!
//! A tower [`Layer`] that records one metric emission per request:
//! - starts the timer and registers a [`CompletionHandle`] on entry
//! - calls the inner service straight away
//! - fires the handle when the response body finishes, fails, or is dropped
//!
//! ```ignore
//! let layer = InstrumentationLayer::new(&config.instrumentation)?;
//! let app = Router::new()
//!     .route("/users/:id", get(handler))
//!     .layer(layer.clone());
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::{Method, Request, Response, StatusCode};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use tower::{Layer, Service};
use validator::Validate;

use super::lifecycle::{
    CompletionHandle, CompletionListener, CompletionOutcome, RequestObservation,
};
use super::point::PointBuilder;
use super::sanitizer::PathSanitizer;
use crate::config::InstrumentationConfig;
use crate::error::ConfigError;
use crate::sink::{self, MetricSink};
use crate::telemetry;

/// Shared state for every request passing through one layer.
pub struct Instrumentation {
    sanitizer: PathSanitizer,
    builder: PointBuilder,
    sink: Arc<dyn MetricSink>,
}

impl Instrumentation {
    pub fn new(sanitizer: PathSanitizer, builder: PointBuilder, sink: Arc<dyn MetricSink>) -> Self {
        Self {
            sanitizer,
            builder,
            sink,
        }
    }

    pub fn sink(&self) -> &Arc<dyn MetricSink> {
        &self.sink
    }

    /// Register completion hooks for one request.
    pub fn observe<B>(self: &Arc<Self>, request: &Request<B>) -> CompletionHandle {
        telemetry::request_started();
        CompletionHandle::register(RequestObservation::from_request(request), self.clone())
    }
}

impl CompletionListener for Instrumentation {
    fn on_complete(&self, observation: RequestObservation, outcome: CompletionOutcome) {
        telemetry::request_finished(outcome.terminal.as_str());

        let path = self.sanitizer.sanitize(&observation.path);
        let points = self.builder.build(&observation, &outcome, &path);
        if points.is_empty() {
            tracing::debug!(
                "No metric points for {} {} ({})",
                observation.method,
                path,
                outcome.terminal
            );
            return;
        }

        self.sink.emit(points);
    }
}

/// Tower layer wrapping services with request instrumentation.
#[derive(Clone)]
pub struct InstrumentationLayer {
    instrumentation: Arc<Instrumentation>,
}

impl InstrumentationLayer {
    /// Build the layer and the sink selected by `config.backend.style`.
    ///
    /// Must be called inside a Tokio runtime when the line style is used.
    pub fn new(config: &InstrumentationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let sink = sink::from_config(&config.backend)?;
        Self::with_sink(config, sink)
    }

    /// Build the layer around an existing sink.
    pub fn with_sink(
        config: &InstrumentationConfig,
        sink: Arc<dyn MetricSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let sanitizer = PathSanitizer::from_config(config)?;
        let builder = PointBuilder::from_config(&config.backend);

        tracing::info!(
            "Request instrumentation enabled (style: {:?}, remove_ids: {})",
            config.backend.style,
            sanitizer.is_enabled()
        );

        Ok(Self {
            instrumentation: Arc::new(Instrumentation::new(sanitizer, builder, sink)),
        })
    }

    pub fn instrumentation(&self) -> &Arc<Instrumentation> {
        &self.instrumentation
    }

    /// Flush and stop the sink.
    pub async fn shutdown(&self) {
        self.instrumentation.sink().shutdown().await;
    }
}

impl<S> Layer<S> for InstrumentationLayer {
    type Service = InstrumentationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InstrumentationService {
            inner,
            instrumentation: self.instrumentation.clone(),
        }
    }
}

/// Instrumentation middleware service.
#[derive(Clone)]
pub struct InstrumentationService<S> {
    inner: S,
    instrumentation: Arc<Instrumentation>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for InstrumentationService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    ResBody: Body,
{
    type Response = Response<InstrumentedBody<ResBody>>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let mut handle = self.instrumentation.observe(&request);
        let head = request.method() == Method::HEAD;
        let future = self.inner.call(request);

        // Dropping this future before the inner service answers drops the
        // handle, which counts as an abort.
        Box::pin(async move {
            match future.await {
                Ok(response) => {
                    let (parts, body) = response.into_parts();
                    let body = InstrumentedBody::new(body, parts.status, head, handle);
                    Ok(Response::from_parts(parts, body))
                }
                Err(e) => {
                    handle.error();
                    Err(e)
                }
            }
        })
    }
}

pin_project! {
    /// Response body that fires the completion handle at end of stream.
    #[derive(Debug)]
    pub struct InstrumentedBody<B> {
        #[pin]
        inner: B,
        status: StatusCode,
        handle: CompletionHandle,
    }
}

impl<B: Body> InstrumentedBody<B> {
    fn new(inner: B, status: StatusCode, head: bool, mut handle: CompletionHandle) -> Self {
        // The server drops these bodies unread once the head is written, so
        // the response is complete as soon as it exists.
        if inner.is_end_stream() || skips_body(head, status) {
            handle.complete(status);
        }
        Self {
            inner,
            status,
            handle,
        }
    }
}

/// Responses sent without a body: HEAD replies, 1xx, 204 and 304.
fn skips_body(head: bool, status: StatusCode) -> bool {
    head
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

impl<B: Body> Body for InstrumentedBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        let polled = this.inner.as_mut().poll_frame(cx);

        match &polled {
            Poll::Ready(None) => {
                this.handle.complete(*this.status);
            }
            Poll::Ready(Some(Err(_))) => {
                this.handle.error();
            }
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => {
                this.handle.complete(*this.status);
            }
            _ => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
