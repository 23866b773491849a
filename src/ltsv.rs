//! LTSV (Labeled Tab-separated Values) record decoding.
//!
//! Each line is a TAB-separated list of `label:value` fields. The decoder
//! yields one `FieldRecord` per non-blank line and stops at end of stream.

use std::collections::HashMap;
use std::io::BufRead;

/// Fields decoded from one log line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldRecord {
    /// 1-based line number within the stream being decoded.
    pub line: u64,
    fields: HashMap<String, String>,
}

impl FieldRecord {
    /// Value for `label`, or `""` when the field is absent.
    pub fn get(&self, label: &str) -> &str {
        self.fields.get(label).map(String::as_str).unwrap_or("")
    }
}

/// Error produced while pulling the next record.
#[derive(Debug)]
pub enum RecordError {
    /// The underlying stream failed. Fatal for the run.
    Io(std::io::Error),
    /// A single line could not be decoded. The decoder moves on to the next line.
    Malformed { line: u64, reason: String },
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordError::Io(e) => write!(f, "failed to read log stream: {e}"),
            RecordError::Malformed { line, reason } => {
                write!(f, "malformed LTSV at line {line}: {reason}")
            }
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecordError::Io(e) => Some(e),
            RecordError::Malformed { .. } => None,
        }
    }
}

/// Streaming LTSV decoder over any buffered reader.
pub struct Reader<R> {
    inner: R,
    buf: Vec<u8>,
    line: u64,
    done: bool,
}

impl<R: BufRead> Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            line: 0,
            done: false,
        }
    }

    /// Give back the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: BufRead> Iterator for Reader<R> {
    type Item = Result<FieldRecord, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            let n = match self.inner.read_until(b'\n', &mut self.buf) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(RecordError::Io(e)));
                }
            };
            if n == 0 {
                self.done = true;
                break;
            }
            self.line += 1;

            let text = String::from_utf8_lossy(&self.buf);
            let text = text.trim_end_matches(['\n', '\r']);
            if text.is_empty() {
                continue;
            }
            return Some(parse_line(text, self.line));
        }
        None
    }
}

/// Decode one line (without its terminator) into a record.
pub fn parse_line(text: &str, line: u64) -> Result<FieldRecord, RecordError> {
    let mut fields = HashMap::new();
    for field in text.split('\t') {
        if field.is_empty() {
            continue;
        }
        let Some((label, value)) = field.split_once(':') else {
            return Err(RecordError::Malformed {
                line,
                reason: format!("field {field:?} has no ':' separator"),
            });
        };
        if !is_valid_label(label) {
            return Err(RecordError::Malformed {
                line,
                reason: format!("invalid label {label:?}"),
            });
        }
        fields.insert(label.to_string(), value.to_string());
    }
    Ok(FieldRecord { line, fields })
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}
