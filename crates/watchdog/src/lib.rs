//! Client side of the watchdog handshake.
//!
//! The watchdog is a separate process that outlives ours. We hand it label
//! filters over a line oriented byte stream; once our connection drops it
//! deletes everything matching the filters it acknowledged.

pub mod stream;

use std::sync::Arc;

use api_types::FilterSet;
use thiserror::Error;
use url::form_urlencoded;

pub use stream::StreamWatchdog;
pub use stream::TcpWatchdog;
pub use stream::WatchdogConfig;

/// Line the watchdog sends once a filter has been registered.
pub const ACKNOWLEDGMENT: &str = "ACK";

#[derive(Error, Debug)]
pub enum WatchdogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to connect to watchdog at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("watchdog address `{0}` did not resolve to any socket address")]
    Unresolved(String),
}

pub trait Watchdog {
    /// Sends `filters` to the watchdog and waits for its acknowledgment.
    ///
    /// Returns `Ok(false)` when the stream ends before an `ACK` line arrives.
    fn register(&self, filters: &FilterSet) -> Result<bool, WatchdogError>;
}

impl<T> Watchdog for Arc<T>
where T: Watchdog
{
    fn register(&self, filters: &FilterSet) -> Result<bool, WatchdogError> {
        (**self).register(filters)
    }
}

/// Encodes a filter set as `key=value` pairs joined by `&`.
///
/// Keys and values are form-urlencoded, so `=`, `&` and spaces inside a
/// clause never collide with the separators.
pub fn encode_query(filters: &FilterSet) -> String {
    filters
        .clauses()
        .iter()
        .map(|clause| {
            format!(
                "{}={}",
                form_urlencoded::byte_serialize(clause.key().as_bytes()).collect::<String>(),
                form_urlencoded::byte_serialize(clause.value().as_bytes()).collect::<String>()
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use api_types::FilterClause;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn encodes_label_clauses() {
        let filters = FilterSet::new()
            .with_clause(FilterClause::label("reaper.managed", "true").unwrap())
            .with_clause(FilterClause::label("session", "abc").unwrap());

        assert_eq!(
            encode_query(&filters),
            "label=reaper.managed%3Dtrue&label=session%3Dabc"
        );
    }

    #[test]
    fn escapes_separators_and_spaces() {
        let filters = FilterSet::new()
            .with_clause(FilterClause::new("a b", "x=y&z").unwrap())
            .with_clause(FilterClause::new("k", "hello world").unwrap());

        assert_eq!(encode_query(&filters), "a+b=x%3Dy%26z&k=hello+world");
    }

    #[test]
    fn empty_filter_set_encodes_to_empty_query() {
        assert_eq!(encode_query(&FilterSet::new()), "");
    }
}
