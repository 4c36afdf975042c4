//! Outgoing response abstraction supplied by the host pipeline

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::exchange::Headers;

/// The host's outgoing response object.
///
/// `end` consumes the sink, so a response can be completed at most once.
pub trait ResponseSink: Send + 'static {
    /// Whether the response was already finalized upstream of the engine
    fn is_finished(&self) -> bool;

    /// Write status line and headers
    fn write_head(&mut self, status: u16, status_message: &str, headers: &Headers);

    /// Set only the status code
    fn set_status(&mut self, status: u16);

    /// Terminate the response with `body`
    fn end(self, body: Bytes);
}

/// Response produced through a [`ChannelSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    pub status_message: String,
    /// Response headers
    pub headers: Headers,
    /// Response body
    pub body: Bytes,
}

/// Sink that hands the completed response to an awaiting receiver
#[derive(Debug)]
pub struct ChannelSink {
    response: CompletedResponse,
    finished: bool,
    tx: oneshot::Sender<CompletedResponse>,
}

/// Create a sink and the receiver that yields its completed response
#[must_use]
pub fn channel() -> (ChannelSink, oneshot::Receiver<CompletedResponse>) {
    let (tx, rx) = oneshot::channel();
    let sink = ChannelSink {
        response: CompletedResponse {
            status: 200,
            status_message: String::new(),
            headers: Vec::new(),
            body: Bytes::new(),
        },
        finished: false,
        tx,
    };
    (sink, rx)
}

impl ChannelSink {
    /// Mark the response as already finalized by an earlier stage
    #[must_use]
    pub fn finished(mut self) -> Self {
        self.finished = true;
        self
    }

    /// Status written so far
    #[must_use]
    pub fn status(&self) -> u16 {
        self.response.status
    }

    /// Headers written so far
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.response.headers
    }
}

impl ResponseSink for ChannelSink {
    fn is_finished(&self) -> bool {
        self.finished
    }

    fn write_head(&mut self, status: u16, status_message: &str, headers: &Headers) {
        self.response.status = status;
        self.response.status_message = status_message.to_string();
        self.response.headers.clone_from(headers);
    }

    fn set_status(&mut self, status: u16) {
        self.response.status = status;
    }

    fn end(mut self, body: Bytes) {
        self.response.body = body;
        // Receiver may have gone away; nothing left to do then.
        let _ = self.tx.send(self.response);
    }
}
