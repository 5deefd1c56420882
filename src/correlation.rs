use std::fmt;
use uuid::Uuid;

/// Prefix of the optional preamble line that tags a session.
pub const TRACE_PREFIX: &str = "TRACE ";

/// Client supplied tag threaded through a session's log output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new random correlation id.
    pub fn new() -> Self { Self(Uuid::new_v4().to_string()) }

    /// Recognise a `TRACE <id>` preamble line. Blank ids are not a tag.
    pub fn from_preamble(line: &str) -> Option<Self> {
        let id = line.strip_prefix(TRACE_PREFIX)?.trim();
        if id.is_empty() { return None; }
        Some(Self(id.to_string()))
    }

    /// Line a client sends to tag its session.
    pub fn preamble(&self) -> String { format!("{}{}\n", TRACE_PREFIX, self.0) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl Default for CorrelationId {
    fn default() -> Self { Self::new() }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_detection() {
        let id = CorrelationId::from_preamble("TRACE node:42-1700000000").unwrap();
        assert_eq!(id.as_str(), "node:42-1700000000");
        assert!(CorrelationId::from_preamble("TRACE    ").is_none());
        assert!(CorrelationId::from_preamble("TRACEX abc").is_none());
        assert!(CorrelationId::from_preamble("OPEN photo").is_none());
    }

    #[test]
    fn generated_ids_roundtrip_through_preamble() {
        let id = CorrelationId::new();
        let line = id.preamble();
        assert!(line.ends_with('\n'));
        let back = CorrelationId::from_preamble(line.trim_end()).unwrap();
        assert_eq!(back, id);
    }
}
