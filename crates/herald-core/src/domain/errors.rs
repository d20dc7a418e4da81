//! Error classification shared by the pipeline.

use std::fmt;

/// Operational classification of a delivery failure.
///
/// - Transient: infrastructure hiccup (store/queue/provider), retry later
/// - NotReady: the message arrived before its schedule, redeliver later
/// - Content: the template itself is broken; retrying will not help until
///   the template is fixed, so it is reported loudly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    NotReady,
    Content,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::NotReady => "not_ready",
            ErrorKind::Content => "content",
        };
        f.write_str(s)
    }
}
