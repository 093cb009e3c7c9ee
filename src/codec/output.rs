/// Non-blocking character sink.
///
/// A full output applies backpressure: writers stop, keep their progress,
/// and resume on the next pull once the caller has drained it.
pub trait Output {
    fn is_cont(&self) -> bool {
        !self.is_full() && !self.is_done()
    }

    fn is_full(&self) -> bool;

    /// The sink is closed and accepts nothing more.
    fn is_done(&self) -> bool;

    /// Writes one character. Callers check `is_cont` first.
    fn write_char(&mut self, c: char);

    /// Writes as much of `s` as fits, returning the number of bytes written.
    fn write_str(&mut self, s: &str) -> usize {
        let mut written = 0;
        for c in s.chars() {
            if !self.is_cont() {
                break;
            }
            self.write_char(c);
            written += c.len_utf8();
        }
        written
    }
}

/// Output into an owned string, optionally bounded.
#[derive(Clone, Debug, Default)]
pub struct StringOutput {
    buffer: String,
    limit: Option<usize>,
    closed: bool,
}

impl StringOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports full once `limit` bytes are buffered.
    pub fn bounded(limit: usize) -> Self {
        Self { buffer: String::new(), limit: Some(limit), closed: false }
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Drains the buffer, clearing any backpressure.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn into_string(self) -> String {
        self.buffer
    }
}

impl Output for StringOutput {
    fn is_full(&self) -> bool {
        self.limit.is_some_and(|limit| self.buffer.len() >= limit)
    }

    fn is_done(&self) -> bool {
        self.closed
    }

    fn write_char(&mut self, c: char) {
        self.buffer.push(c);
    }
}
