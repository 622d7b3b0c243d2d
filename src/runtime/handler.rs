use crate::runtime::escalation::EscalationHandler;
use crate::runtime::router::StreamRouter;
use crate::runtime::transport::{Channel, StreamKind};
use std::fmt;
use std::sync::Arc;

/// Caller-supplied output callback
///
/// Receives the channel (which may be used to send data back to the remote
/// process), the stream the chunk arrived on, and the chunk itself.
pub type OutputCallback = Arc<dyn Fn(&dyn Channel, StreamKind, &str) + Send + Sync>;

/// A chain of output handlers
///
/// Each variant either handles a chunk fully or hands it to the next handler
/// in the chain.
pub enum OutputHandler {
    Router(StreamRouter),
    Custom(OutputCallback),
    Escalation(EscalationHandler),
}

impl OutputHandler {
    pub fn custom<F>(callback: F) -> Self
    where
        F: Fn(&dyn Channel, StreamKind, &str) + Send + Sync + 'static,
    {
        OutputHandler::Custom(Arc::new(callback))
    }

    pub fn handle(&self, channel: &dyn Channel, stream: StreamKind, chunk: &str) {
        match self {
            OutputHandler::Router(router) => router.route(channel, stream, chunk),
            OutputHandler::Custom(callback) => callback(channel, stream, chunk),
            OutputHandler::Escalation(escalation) => escalation.handle(channel, stream, chunk),
        }
    }
}

impl fmt::Debug for OutputHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputHandler::Router(router) => f.debug_tuple("Router").field(router).finish(),
            OutputHandler::Custom(_) => f.write_str("Custom(..)"),
            OutputHandler::Escalation(escalation) => {
                f.debug_tuple("Escalation").field(escalation).finish()
            }
        }
    }
}
