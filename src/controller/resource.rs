//! Resource accounting layer.
//!
//! Registers every stream it hands out with a [`ResourceAccountant`] and
//! refuses to sync while streams are open, unless the caller asks for them to
//! be closed forcibly.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::accountant::ForceClose;
use crate::{
    Controller, DirEntry, EntryName, EntryReader, EntryType, EntryWriter, Flow, FsError, Layer,
    MknodOptions, Model, Node, ReadStream, ResourceAccountant, SyncErrorBuilder, SyncOptions,
    WriteOptions, WriteStream,
};

/// Layer adding [`ResourceController`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceLayer;

impl ResourceLayer {
    /// Create the layer.
    pub fn new() -> Self {
        Self
    }
}

impl<C: Controller> Layer<C> for ResourceLayer {
    type Controller = ResourceController<C>;

    fn layer(self, inner: C) -> Self::Controller {
        ResourceController {
            inner,
            accountant: Arc::new(ResourceAccountant::new()),
        }
    }
}

/// Accounts open streams and gates sync on them.
pub struct ResourceController<C> {
    inner: C,
    accountant: Arc<ResourceAccountant>,
}

impl<C: Controller> ResourceController<C> {
    /// The accountant of this mount point.
    pub fn accountant(&self) -> &Arc<ResourceAccountant> {
        &self.accountant
    }

    fn check_busy(&self) -> Result<(), FsError> {
        let mount_point = self.inner.model().mount_point();
        let local = self.accountant.local_resources();
        if local > 0 {
            return Err(FsError::ThreadLocalBusy {
                mount_point: mount_point.clone(),
                local,
            });
        }
        let total = self.accountant.total_resources();
        if total > 0 {
            return Err(FsError::GlobalBusy {
                mount_point: mount_point.clone(),
                local,
                total,
            });
        }
        Ok(())
    }

    fn close_all(&self, builder: &mut SyncErrorBuilder) {
        let mount_point = self.inner.model().mount_point();
        for (name, result) in self.accountant.close_all() {
            tracing::warn!(%mount_point, entry = %name, "forcibly closed stream");
            if let Err(e) = result {
                builder.warn(FsError::io("close", &name, e));
            }
            builder.warn(FsError::ForciblyClosed {
                mount_point: mount_point.clone(),
                name,
            });
        }
    }
}

impl<C: Controller> Controller for ResourceController<C> {
    fn model(&self) -> &Arc<Model> {
        self.inner.model()
    }

    fn node(&self, name: &EntryName) -> Flow<Option<Node>> {
        self.inner.node(name)
    }

    fn read_dir(&self, name: &EntryName) -> Flow<Vec<DirEntry>> {
        self.inner.read_dir(name)
    }

    fn read_link(&self, name: &EntryName) -> Flow<PathBuf> {
        self.inner.read_link(name)
    }

    fn mknod(&self, name: &EntryName, entry_type: EntryType, options: MknodOptions) -> Flow<()> {
        self.inner.mknod(name, entry_type, options)
    }

    fn symlink(&self, name: &EntryName, target: &Path, options: MknodOptions) -> Flow<()> {
        self.inner.symlink(name, target, options)
    }

    fn unlink(&self, name: &EntryName) -> Flow<()> {
        self.inner.unlink(name)
    }

    fn open_read(&self, name: &EntryName) -> Flow<EntryReader> {
        let (name, stream) = self.inner.open_read(name)?.into_parts();
        let slot = Slot::open(&self.accountant, &name, stream);
        Ok(EntryReader::new(name, AccountedReader { slot }))
    }

    fn open_write(&self, name: &EntryName, options: WriteOptions) -> Flow<EntryWriter> {
        let (name, stream) = self.inner.open_write(name, options)?.into_parts();
        let slot = Slot::open(&self.accountant, &name, stream);
        Ok(EntryWriter::new(name, AccountedWriter { slot }))
    }

    fn sync(&self, options: SyncOptions) -> Flow<()> {
        if options.wait_close_io {
            self.accountant.await_other_threads();
        }
        let mut builder = SyncErrorBuilder::new();
        if options.force_close_io {
            self.close_all(&mut builder);
        } else {
            self.check_busy()?;
        }
        if let Err(control) = self.inner.sync(options) {
            builder.add(control.into_reported()?);
        }
        builder.check().map_err(|e| FsError::Sync(e).into())
    }
}

/// Closing behavior shared by boxed read and write streams.
trait Closeable: Send {
    fn close_stream(&mut self) -> io::Result<()>;
}

impl Closeable for Box<dyn ReadStream> {
    fn close_stream(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl Closeable for Box<dyn WriteStream> {
    fn close_stream(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// An accounted stream. The accountant holds it weakly so it can close it.
struct Slot<S> {
    id: u64,
    accountant: Arc<ResourceAccountant>,
    stream: Mutex<Option<S>>,
}

impl<S: Closeable + 'static> Slot<S> {
    fn open(accountant: &Arc<ResourceAccountant>, name: &EntryName, stream: S) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let closer: Weak<dyn ForceClose> = weak.clone();
            Slot {
                id: accountant.start(name.clone(), closer),
                accountant: Arc::clone(accountant),
                stream: Mutex::new(Some(stream)),
            }
        })
    }

    fn close(&self) -> io::Result<()> {
        let taken = self.stream.lock().take();
        let result = match taken {
            Some(mut stream) => stream.close_stream(),
            None => Ok(()),
        };
        self.accountant.stop(self.id);
        result
    }

    fn with_stream<T>(&self, f: impl FnOnce(&mut S) -> io::Result<T>) -> io::Result<T> {
        match self.stream.lock().as_mut() {
            Some(stream) => f(stream),
            None => Err(io::Error::other("stream was forcibly closed")),
        }
    }
}

impl<S: Closeable + 'static> ForceClose for Slot<S> {
    fn force_close(&self) -> io::Result<()> {
        self.close()
    }
}

struct AccountedReader {
    slot: Arc<Slot<Box<dyn ReadStream>>>,
}

impl Read for AccountedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.slot.with_stream(|s| s.read(buf))
    }
}

impl ReadStream for AccountedReader {
    fn close(&mut self) -> io::Result<()> {
        self.slot.close()
    }
}

struct AccountedWriter {
    slot: Arc<Slot<Box<dyn WriteStream>>>,
}

impl Write for AccountedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.slot.with_stream(|s| s.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.slot.with_stream(|s| s.flush())
    }
}

impl WriteStream for AccountedWriter {
    fn close(&mut self) -> io::Result<()> {
        self.slot.close()
    }
}
