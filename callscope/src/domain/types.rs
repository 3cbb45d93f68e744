//! Domain types providing compile-time safety and self-documentation

use std::fmt;

/// Symbolizer worker ID within one resolution pool (0-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Worker#{}", self.0)
    }
}

/// Lifecycle of one request on a symbolizer channel
///
/// ```text
/// AwaitingCapacity ──► Sent ──► AwaitingSymbolLine ──► AwaitingLocationLine ──► Delivered
/// ```
///
/// The submitting side owns the first two states, the draining side the rest.
/// A request holds its in-flight slot from `Sent` until `Delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    AwaitingCapacity,
    Sent,
    AwaitingSymbolLine,
    AwaitingLocationLine,
    Delivered,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::AwaitingCapacity => "awaiting capacity",
            Self::Sent => "sending request",
            Self::AwaitingSymbolLine => "awaiting symbol line",
            Self::AwaitingLocationLine => "awaiting location line",
            Self::Delivered => "delivering response",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_display() {
        assert_eq!(WorkerId(3).to_string(), "Worker#3");
    }

    #[test]
    fn test_request_state_display() {
        assert_eq!(RequestState::AwaitingLocationLine.to_string(), "awaiting location line");
    }
}
