//! Transport abstraction
//!
//! A `Transport` opens duplex text links to the controller. The runtime owns
//! at most one `TransportLink` at a time, each driven by its own task.

use async_trait::async_trait;
use ctrlsync_core::{Endpoint, TransportError};

/// Factory for links to the controller
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a link; the runtime bounds this with the connect timeout
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn TransportLink>, TransportError>;

    /// Name for logs
    fn name(&self) -> &'static str;
}

/// One open duplex text channel
#[async_trait]
pub trait TransportLink: Send {
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Next inbound text frame; `None` once the link has closed cleanly
    ///
    /// Must be cancel safe: the runtime races it against outbound frames.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self) -> Result<(), TransportError>;
}
