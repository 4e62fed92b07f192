use super::RawMessage;

/// Incremental `text/event-stream` decoder.
///
/// Input is consumed line by line. Bytes after the last newline stay buffered
/// until the next chunk, so frames split across network reads are reassembled
/// rather than dropped. `scanned` marks how far the buffer is known to hold no
/// newline, so each byte is searched once however many reads a frame spans.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
    scanned: usize,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<RawMessage> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut line_start = 0;
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let line_end = self.scanned + offset;
            let line = decode_line(&self.buf[line_start..line_end]);
            line_start = line_end + 1;
            self.scanned = line_start;
            if let Some(frame) = self.take_line(&line) {
                frames.push(frame);
            }
        }
        self.buf.drain(..line_start);
        self.scanned = self.buf.len();
        frames
    }

    /// Flushes a trailing frame that the server ended without a blank line.
    pub fn finish(&mut self) -> Option<RawMessage> {
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        let line = decode_line(&rest);
        if !line.is_empty() {
            self.take_line(&line);
        }
        self.dispatch()
    }

    fn take_line(&mut self, line: &str) -> Option<RawMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            self.event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<RawMessage> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        Some(RawMessage {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let line = String::from_utf8_lossy(bytes);
    let line: &str = &line;
    line.strip_suffix('\r').unwrap_or(line).to_string()
}
