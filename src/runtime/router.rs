use crate::core::logging::{Logger, Severity, TracingLogger};
use crate::runtime::transport::{Channel, StreamKind};
use std::fmt;
use std::sync::Arc;

/// Default output handler: every chunk goes to the logger
///
/// stderr is reported as [`Severity::Important`], stdout as
/// [`Severity::Info`]. Messages are tagged `"<stream> :: <host>"` so
/// interleaved output from several hosts stays readable.
#[derive(Clone)]
pub struct StreamRouter {
    logger: Arc<dyn Logger>,
}

impl StreamRouter {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self { logger }
    }

    pub fn route(&self, channel: &dyn Channel, stream: StreamKind, chunk: &str) {
        let severity = match stream {
            StreamKind::Err => Severity::Important,
            StreamKind::Out => Severity::Info,
        };
        self.logger
            .log(severity, chunk, &stream_tag(stream, channel));
    }
}

impl Default for StreamRouter {
    fn default() -> Self {
        Self::new(Arc::new(TracingLogger))
    }
}

impl fmt::Debug for StreamRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRouter").finish_non_exhaustive()
    }
}

pub(crate) fn stream_tag(stream: StreamKind, channel: &dyn Channel) -> String {
    format!("{} :: {}", stream, channel.host())
}
