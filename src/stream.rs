use std::io::{self, Read};

/// Sentinel returned by [`Stream::char`] when the cursor has run past the
/// buffered input. Consumers see it either as "refill and retry" or, when
/// [`Stream::read`] reports no more data, as end of input.
pub(crate) const NUL: u8 = 0;

const READ_CHUNK: usize = 512;

/// Refillable byte source for the streaming decoders.
///
/// Bytes read so far stay buffered, so `cursor` doubles as the absolute
/// input offset for diagnostics.
pub struct Stream {
    buf: Vec<u8>,
    pub cursor: usize,
    reader: Box<dyn Read>,
    eof: bool,
    err: Option<io::Error>,
}

impl Stream {
    pub fn new(reader: impl Read + 'static) -> Self {
        Stream {
            buf: Vec::new(),
            cursor: 0,
            reader: Box::new(reader),
            eof: false,
            err: None,
        }
    }

    /// Current byte, or [`NUL`] past the buffered end.
    pub(crate) fn char(&self) -> u8 {
        self.buf.get(self.cursor).copied().unwrap_or(NUL)
    }

    /// Pull more bytes from the reader. Returns false once the reader is
    /// exhausted (or failed; see [`Stream::io_error`]).
    pub fn read(&mut self) -> bool {
        if self.eof {
            return false;
        }
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return false;
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return true;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.err = Some(err);
                    self.eof = true;
                    return false;
                }
            }
        }
    }

    /// Advance past ASCII whitespace, refilling as needed.
    pub fn skip_white_space(&mut self) {
        loop {
            match self.char() {
                b' ' | b'\t' | b'\n' | b'\r' => self.cursor += 1,
                NUL => {
                    if !self.read() {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    /// Absolute input offset of the cursor.
    pub fn total_offset(&self) -> usize {
        self.cursor
    }

    /// The I/O error that terminated the stream, if any. Decoders report
    /// such terminations as unexpected end of input; this preserves the
    /// underlying cause.
    pub fn io_error(&self) -> Option<&io::Error> {
        self.err.as_ref()
    }
}
