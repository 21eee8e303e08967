//! Server-Sent Events transport for streaming executions.

use axum::response::sse::{Event as AxumEvent, KeepAlive};
use axum::response::{IntoResponse, Response, Sse};
use futures_util::Stream;
use omnirepl_types::StreamEvent;
use pin_project_lite::pin_project;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::error::{HttpError, Result};

/// An SSE frame ready to be written to the client.
#[derive(Debug, Clone)]
pub struct SseEvent {
    /// Event type (optional)
    pub event_type: Option<String>,
    /// Event data
    pub data: String,
}

impl SseEvent {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            event_type: None,
            data: data.into(),
        }
    }

    pub fn with_type(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            data: data.into(),
        }
    }

    /// The event name is the event's `type`; the data line is its JSON form.
    pub fn from_stream_event(event: &StreamEvent) -> Result<Self> {
        let data = serde_json::to_string(event).map_err(HttpError::Json)?;
        Ok(Self::with_type(event.event_name(), data))
    }
}

impl From<SseEvent> for AxumEvent {
    fn from(event: SseEvent) -> Self {
        let axum_event = AxumEvent::default().data(event.data);
        match event.event_type {
            Some(event_type) => axum_event.event(event_type),
            None => axum_event,
        }
    }
}

pin_project! {
    /// A stream wrapper that converts execution events to SSE frames.
    pub struct SseStream<S> {
        #[pin]
        inner: S,
    }
}

impl<S> SseStream<S> {
    pub fn new(stream: S) -> Self {
        Self { inner: stream }
    }
}

impl<S> Stream for SseStream<S>
where
    S: Stream<Item = StreamEvent>,
{
    type Item = std::result::Result<AxumEvent, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(event)) => match SseEvent::from_stream_event(&event) {
                Ok(sse_event) => Poll::Ready(Some(Ok(sse_event.into()))),
                Err(e) => {
                    log::error!("Failed to convert stream event to SSE: {}", e);
                    let fallback = SseEvent::with_type(
                        event.event_name(),
                        format!(r#"{{"type":"error","content":"Failed to serialize event: {}"}}"#, e),
                    );
                    Poll::Ready(Some(Ok(fallback.into())))
                }
            },
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Create an SSE response from a stream of execution events.
pub fn create_sse_response<S>(stream: S, keepalive_interval: Duration) -> Response
where
    S: Stream<Item = StreamEvent> + Send + 'static,
{
    Sse::new(SseStream::new(stream))
        .keep_alive(
            KeepAlive::new()
                .interval(keepalive_interval)
                .text("keep-alive"),
        )
        .into_response()
}
