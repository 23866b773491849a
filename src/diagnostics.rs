/// Per-record diagnostics raised while aggregating.
///
/// Soft errors never abort a run; they are handed to a `DiagnosticSink`
/// so the binary can log them and tests can inspect them.
use std::fmt;

/// A recoverable problem found in a single log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The line could not be decoded into fields and was skipped.
    MalformedLine { line: u64, reason: String },
    /// The status field was missing or empty; the record was skipped.
    MissingStatus { line: u64 },
    /// The latency field did not parse as a number; `0` was recorded.
    InvalidLatency { line: u64, value: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MalformedLine { line, reason } => {
                write!(f, "line {line}: malformed record skipped: {reason}")
            }
            Diagnostic::MissingStatus { line } => {
                write!(f, "line {line}: missing status field, record skipped")
            }
            Diagnostic::InvalidLatency { line, value } => {
                write!(f, "line {line}: invalid latency {value:?}, recorded as 0")
            }
        }
    }
}

/// Receiver for soft errors.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

/// Forwards diagnostics to `tracing` at warn level.
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(%diagnostic, "bad log record");
    }
}

/// Keeps every diagnostic in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub diagnostics: Vec<Diagnostic>,
}

#[cfg(test)]
impl DiagnosticSink for CollectingSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_keeps_order() {
        let mut sink = CollectingSink::default();
        sink.report(Diagnostic::MissingStatus { line: 3 });
        sink.report(Diagnostic::InvalidLatency {
            line: 4,
            value: "abc".to_string(),
        });
        assert_eq!(
            sink.diagnostics,
            vec![
                Diagnostic::MissingStatus { line: 3 },
                Diagnostic::InvalidLatency {
                    line: 4,
                    value: "abc".to_string()
                },
            ]
        );
    }

    #[test]
    fn display_mentions_line_number() {
        let d = Diagnostic::MalformedLine {
            line: 12,
            reason: "field without ':'".to_string(),
        };
        assert_eq!(
            d.to_string(),
            "line 12: malformed record skipped: field without ':'"
        );
    }
}
