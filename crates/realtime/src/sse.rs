//! Incremental parser for `text/event-stream` bodies.
//!
//! The search backends stream records as `data: <json>\n\n`. Network chunks
//! can split a record anywhere, including mid-line, so the parser buffers
//! bytes until a full record boundary (blank line) is available instead of
//! attempting any lossy recovery on partial frames. Multiple `data:` lines
//! belonging to one record are joined with `\n`, comment lines are skipped
//! and `\r\n` line endings are tolerated.

/// Streaming SSE record parser. Feed raw body chunks with [`SseParser::push`]
/// and collect the `data` payloads of every record completed so far.
#[derive(Debug, Default)]
pub struct SseParser {
    line_buffer: String,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one chunk of the response body, returning the `data`
    /// payloads of all records completed by it, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut records = Vec::new();
        for ch in String::from_utf8_lossy(chunk).chars() {
            if ch != '\n' {
                self.line_buffer.push(ch);
                continue;
            }
            let line = std::mem::take(&mut self.line_buffer);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(record) = self.take_line(line) {
                records.push(record);
            }
        }
        records
    }

    /// Emits any record left buffered when the stream ends without a final
    /// blank line.
    pub fn flush(&mut self) -> Option<String> {
        if !self.line_buffer.is_empty() {
            let line = std::mem::take(&mut self.line_buffer);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.take_line(line);
        }
        if self.data_lines.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data_lines).join("\n"))
        }
    }

    fn take_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data_lines.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.data_lines).join("\n"));
        }
        // Comment lines start with ':'; unknown fields are ignored per the
        // SSE grammar.
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = field_value(line, "data") {
            self.data_lines.push(value.to_string());
        }
        None
    }
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?;
    let value = rest.strip_prefix(':')?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}
