use std::fmt::{Debug, Formatter};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

/// The prefix classic buildpacks use to indent output below a `----->` header.
pub const INDENTATION: &str = "       ";

/// A cloneable, thread-safe handle to an output stream.
///
/// Every buildpack invocation of a build writes to the same pair of sinks, and subprocess output is
/// copied on background threads, so the underlying writer is shared behind a mutex.
#[derive(Clone)]
pub struct Sink {
    inner: Arc<Mutex<Box<dyn io::Write + Send>>>,
}

impl Sink {
    pub fn new(w: impl io::Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(w))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// A sink that discards everything written to it.
    pub fn null() -> Self {
        Self::new(io::sink())
    }

    /// A sink that keeps everything written to it in memory, together with a handle to read it.
    pub fn capture() -> (Self, Captured) {
        let captured = Captured::default();
        (Self::new(captured.clone()), captured)
    }
}

impl io::Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}

impl Debug for Sink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink").finish_non_exhaustive()
    }
}

/// In-memory output collected by a [`Sink::capture`] sink.
#[derive(Clone, Default, Debug)]
pub struct Captured {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Captured {
    /// The output written so far, lossily converted to UTF-8.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
            .into_owned()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Constructs a writer that prefixes every line written to it with [`INDENTATION`].
pub fn indented<W: io::Write>(w: W) -> PrefixedLines<W> {
    PrefixedLines::new(w, INDENTATION)
}

/// A writer that buffers written data until a newline byte is encountered and then passes the line,
/// prefixed, to the wrapped writer.
///
/// Incomplete trailing lines are written when the writer is unwrapped or dropped.
pub struct PrefixedLines<W: io::Write> {
    // `None` only during `unwrap`, which consumes the value. Keeping the writer optional allows
    // taking it out while still flushing leftovers in `Drop`.
    inner: Option<W>,
    prefix: Vec<u8>,
    buffer: Vec<u8>,
}

impl<W: io::Write> PrefixedLines<W> {
    pub fn new(w: W, prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Some(w),
            prefix: prefix.into(),
            buffer: Vec::new(),
        }
    }

    pub fn unwrap(mut self) -> W {
        let _result = self.write_buffered_line();

        match self.inner.take() {
            Some(inner) => inner,
            None => unreachable!("self.inner will never be None"),
        }
    }

    fn write_buffered_line(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        match self.inner {
            Some(ref mut inner) => {
                let mut line = self.prefix.clone();
                line.append(&mut self.buffer);
                inner.write_all(&line)
            }
            None => Ok(()),
        }
    }
}

impl<W: io::Write> io::Write for PrefixedLines<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for byte in buf {
            self.buffer.push(*byte);

            if *byte == NEWLINE_ASCII_BYTE {
                self.write_buffered_line()?;
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner {
            Some(ref mut inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl<W: io::Write> Drop for PrefixedLines<W> {
    fn drop(&mut self) {
        // Drop implementations must not panic. We intentionally ignore the potential error here.
        let _result = self.write_buffered_line();
    }
}

impl<W: io::Write + Debug> Debug for PrefixedLines<W> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixedLines")
            .field("inner", &self.inner)
            .field("prefix", &self.prefix)
            .field("buffer", &self.buffer)
            .finish()
    }
}

const NEWLINE_ASCII_BYTE: u8 = 0x0Au8;
