//! Entry stream handles.
//!
//! Controllers hand out [`EntryReader`]s and [`EntryWriter`]s. Each wraps a
//! boxed stream with an explicit `close`; layers decorate the boxed stream to
//! observe open and close (see the resource accounting layer). Dropping a
//! handle closes it; use [`EntryWriter::close`] to observe close failures,
//! since closing a writer is what commits its data.

use std::io::{self, Read, Write};

use crate::{EntryName, FsError};

/// A readable stream with an explicit close.
pub trait ReadStream: Read + Send {
    /// Release the stream.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: AsRef<[u8]> + Send> ReadStream for io::Cursor<T> {}

/// A writable stream whose close commits the written data.
pub trait WriteStream: Write + Send {
    /// Commit and release the stream.
    fn close(&mut self) -> io::Result<()>;
}

fn closed() -> io::Error {
    io::Error::other("stream is closed")
}

/// Handle to an entry opened for reading.
pub struct EntryReader {
    name: EntryName,
    inner: Option<Box<dyn ReadStream>>,
}

impl EntryReader {
    /// Wrap a stream reading `name`.
    pub fn new(name: EntryName, stream: impl ReadStream + 'static) -> Self {
        Self::from_boxed(name, Box::new(stream))
    }

    /// Wrap a boxed stream reading `name`.
    pub fn from_boxed(name: EntryName, stream: Box<dyn ReadStream>) -> Self {
        Self {
            name,
            inner: Some(stream),
        }
    }

    /// The entry this handle reads.
    #[inline]
    pub fn name(&self) -> &EntryName {
        &self.name
    }

    /// Close the stream.
    ///
    /// # Errors
    ///
    /// - [`FsError::Io`] if the underlying stream fails to close
    pub fn close(mut self) -> Result<(), FsError> {
        match self.inner.take() {
            Some(mut stream) => stream
                .close()
                .map_err(|e| FsError::io("close", &self.name, e)),
            None => Ok(()),
        }
    }

    /// Take the boxed stream out of the handle without closing it.
    pub(crate) fn into_parts(mut self) -> (EntryName, Box<dyn ReadStream>) {
        let stream = self
            .inner
            .take()
            .unwrap_or_else(|| Box::new(io::Cursor::new(Vec::new())));
        (std::mem::take(&mut self.name), stream)
    }
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.as_mut().ok_or_else(closed)?.read(buf)
    }
}

impl Drop for EntryReader {
    fn drop(&mut self) {
        if let Some(mut stream) = self.inner.take() {
            if let Err(e) = stream.close() {
                tracing::warn!(entry = %self.name, error = %e, "closing dropped reader failed");
            }
        }
    }
}

impl std::fmt::Debug for EntryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryReader")
            .field("name", &self.name)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

/// Handle to an entry opened for writing.
pub struct EntryWriter {
    name: EntryName,
    inner: Option<Box<dyn WriteStream>>,
}

impl EntryWriter {
    /// Wrap a stream writing `name`.
    pub fn new(name: EntryName, stream: impl WriteStream + 'static) -> Self {
        Self::from_boxed(name, Box::new(stream))
    }

    /// Wrap a boxed stream writing `name`.
    pub fn from_boxed(name: EntryName, stream: Box<dyn WriteStream>) -> Self {
        Self {
            name,
            inner: Some(stream),
        }
    }

    /// The entry this handle writes.
    #[inline]
    pub fn name(&self) -> &EntryName {
        &self.name
    }

    /// Commit the written data and close the stream.
    ///
    /// # Errors
    ///
    /// - [`FsError::Io`] if flushing or committing fails
    pub fn close(mut self) -> Result<(), FsError> {
        match self.inner.take() {
            Some(mut stream) => stream
                .close()
                .map_err(|e| FsError::io("close", &self.name, e)),
            None => Ok(()),
        }
    }

    /// Take the boxed stream out of the handle without closing it.
    pub(crate) fn into_parts(mut self) -> (EntryName, Box<dyn WriteStream>) {
        let stream = self
            .inner
            .take()
            .unwrap_or_else(|| Box::new(ClosedWriteStream));
        (std::mem::take(&mut self.name), stream)
    }
}

impl Write for EntryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.as_mut().ok_or_else(closed)?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.as_mut().ok_or_else(closed)?.flush()
    }
}

impl Drop for EntryWriter {
    fn drop(&mut self) {
        if let Some(mut stream) = self.inner.take() {
            if let Err(e) = stream.close() {
                tracing::warn!(entry = %self.name, error = %e, "closing dropped writer failed");
            }
        }
    }
}

impl std::fmt::Debug for EntryWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryWriter")
            .field("name", &self.name)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

struct ClosedWriteStream;

impl Write for ClosedWriteStream {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        Err(closed())
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(closed())
    }
}

impl WriteStream for ClosedWriteStream {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}
