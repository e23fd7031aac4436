//! The browsing-session side of passive capture.
//!
//! A session hands out its network responses as a stream of
//! [`ResponseEvent`]s in the order it observed them. The body of an event is
//! read lazily so that consumers pay nothing for responses they ignore.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt};
use futures_util::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("response body unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

type BodyFuture = BoxFuture<'static, Result<Bytes, BodyError>>;

/// One network response observed by the session.
pub struct ResponseEvent {
    pub method: String,
    pub url: String,
    pub status: u16,
    /// Browser resource classification (`image`, `script`, ...), if known.
    pub resource_type: Option<String>,
    headers: Vec<(String, String)>,
    body: BodyFuture,
}

impl ResponseEvent {
    /// A `GET 200` response whose body is produced by `body` on demand.
    pub fn new<F>(url: impl Into<String>, body: F) -> Self
    where
        F: Future<Output = Result<Bytes, BodyError>> + Send + 'static,
    {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            status: 200,
            resource_type: None,
            headers: Vec::new(),
            body: body.boxed(),
        }
    }

    /// A response with an already-available body.
    pub fn with_body(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self::new(url, async move { Ok(body) })
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup; first match wins.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header_value("content-type")
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Reads the body. Consumes the event since the body can only be read once.
    pub async fn into_body(self) -> Result<Bytes, BodyError> {
        self.body.await
    }
}

impl fmt::Debug for ResponseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseEvent")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("status", &self.status)
            .field("resource_type", &self.resource_type)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Anything that can deliver the responses of an open browsing session.
pub trait BrowsingSession {
    /// Subscribes to responses. The stream ends when the session closes.
    fn responses(&self) -> BoxStream<'static, ResponseEvent>;
}

/// A session fed through a channel, for browser adapters and tests.
///
/// Only one subscriber receives the events; later calls to
/// [`responses`](BrowsingSession::responses) get an empty stream.
pub struct ChannelSession {
    rx: Mutex<Option<mpsc::UnboundedReceiver<ResponseEvent>>>,
}

/// Sending half of a [`ChannelSession`].
#[derive(Clone)]
pub struct SessionFeed {
    tx: mpsc::UnboundedSender<ResponseEvent>,
}

impl ChannelSession {
    pub fn new() -> (SessionFeed, ChannelSession) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            SessionFeed { tx },
            ChannelSession {
                rx: Mutex::new(Some(rx)),
            },
        )
    }
}

impl SessionFeed {
    /// Delivers an event; false once the subscriber is gone.
    pub fn push(&self, event: ResponseEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

impl BrowsingSession for ChannelSession {
    fn responses(&self) -> BoxStream<'static, ResponseEvent> {
        let rx = match self.rx.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match rx {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })
            .boxed(),
            None => stream::empty().boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let event = ResponseEvent::with_body("https://x.test/a.png", Bytes::new())
            .header("Content-Type", "image/png");
        assert_eq!(event.content_type(), Some("image/png"));
        assert_eq!(event.header_value("CONTENT-TYPE"), Some("image/png"));
        assert_eq!(event.header_value("etag"), None);
    }

    #[tokio::test]
    async fn body_is_read_on_demand() {
        let event = ResponseEvent::new("https://x.test/a", async {
            Err(BodyError::Unavailable("evicted".into()))
        });
        assert!(event.into_body().await.is_err());
    }

    #[tokio::test]
    async fn channel_session_delivers_in_order_then_ends() {
        let (feed, session) = ChannelSession::new();
        let mut events = session.responses();
        feed.push(ResponseEvent::with_body("https://x.test/1", "a"));
        feed.push(ResponseEvent::with_body("https://x.test/2", "b"));
        drop(feed);

        assert_eq!(events.next().await.unwrap().url, "https://x.test/1");
        assert_eq!(events.next().await.unwrap().url, "https://x.test/2");
        assert!(events.next().await.is_none());
        assert!(session.responses().next().await.is_none());
    }
}
