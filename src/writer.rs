use std::{
	fmt,
	fs::File,
	io::{self, Write},
	path::{Path, PathBuf},
	sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
	identity::{self, DefaultIdentity, FileIdentity},
	retry::retry_open,
};
use self::options::WriterOptions;

pub mod options;

/// An append-only writer to a path that may be rotated away at any moment.
///
/// Before every write, the writer checks that the file it holds open is still the one at its
/// path. If the file was renamed, deleted, or replaced, the path is reopened (or created, if
/// [`self_create`](WriterOptions::self_create) allows) and the write lands in the new file.
///
/// All operations take an internal lock for their whole duration, so concurrent writes from
/// several threads never interleave their bytes, and a rotation is only ever handled once.
///
/// Writes are passed to the OS unbuffered. `&RotatableWriter` implements [`Write`], so an
/// `Arc<RotatableWriter>` can be handed to `tracing_subscriber` as a `MakeWriter` directly.
pub struct RotatableWriter<Id = DefaultIdentity> {
	path: PathBuf,
	options: WriterOptions,
	slot: Mutex<Slot<Id>>,
}

enum Slot<Id> {
	/// Never opened successfully, or the last reopen failed.
	Vacant,

	/// The open handle and the identity of the file it refers to.
	Open { file: File, identity: Id },

	/// Closed for good.
	Closed,
}

impl<Id> fmt::Debug for RotatableWriter<Id> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RotatableWriter")
			.field("path", &self.path)
			.field("options", &self.options)
			.field("identity", &std::any::type_name::<Id>())
			.finish()
	}
}

fn closed() -> io::Error {
	io::Error::new(io::ErrorKind::NotConnected, "writer is closed")
}

impl<Id> RotatableWriter<Id>
where
	Id: FileIdentity,
{
	/// Open `path` for appending.
	///
	/// This runs the same sequence as [`reopen`](Self::reopen), including retries, and errors if
	/// it cannot get a file open. That happens for example if the parent directory is missing,
	/// or if the file is missing and `self_create` is false.
	#[tracing::instrument(level = "trace", skip_all, fields(path = %path.as_ref().display()))]
	pub fn open(path: impl AsRef<Path>, options: WriterOptions) -> io::Result<Self> {
		let writer = Self {
			path: path.as_ref().to_path_buf(),
			options,
			slot: Mutex::new(Slot::Vacant),
		};

		writer.reopen_locked(&mut writer.lock())?;
		Ok(writer)
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn options(&self) -> &WriterOptions {
		&self.options
	}

	/// Whether [`close`](Self::close) has been called.
	pub fn is_closed(&self) -> bool {
		matches!(*self.lock(), Slot::Closed)
	}

	/// Whether the open file is still the one at the path.
	///
	/// If this is false, the next write will reopen first.
	pub fn is_current(&self) -> io::Result<bool> {
		let slot = self.lock();
		identity::matches(slot.identity(), &self.path)
	}

	/// Write `buf` to the file at the path, reopening first if it was rotated.
	///
	/// If the reopen fails, its error is returned and nothing is written; the next call will
	/// try to reopen again. Errors from the write itself are returned unchanged.
	#[tracing::instrument(level = "trace", skip_all, fields(len = buf.len()))]
	pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
		let (written, reopened) = {
			let mut slot = self.lock();
			let reopened = self.ensure_current(&mut slot)?;
			let Slot::Open { file, .. } = &mut *slot else {
				return Err(closed());
			};
			(file.write(buf), reopened)
		};

		if reopened {
			tracing::debug!(path = %self.path.display(), "reopened after rotation");
		}

		written
	}

	/// Close the current file and open the path again, without checking whether it changed.
	///
	/// Meant for a supervisor that knows a rotation just happened, e.g. on `SIGHUP`.
	#[tracing::instrument(level = "trace", skip(self))]
	pub fn reopen(&self) -> io::Result<()> {
		self.reopen_locked(&mut self.lock())
	}

	/// Sync and release the file.
	///
	/// Write errors the OS deferred until the data reached storage are returned here. Files that
	/// can't be synced at all, like `/dev/null` or a pipe, are released without error.
	///
	/// Afterwards, writes and reopens fail with [`NotConnected`](io::ErrorKind::NotConnected).
	/// Closing again does nothing.
	#[tracing::instrument(level = "trace", skip(self))]
	pub fn close(&self) -> io::Result<()> {
		let previous = std::mem::replace(&mut *self.lock(), Slot::Closed);
		match previous {
			Slot::Open { file, .. } => match file.sync_all() {
				Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
				res => res,
			},
			Slot::Vacant | Slot::Closed => Ok(()),
		}
	}

	pub fn flush(&self) -> io::Result<()> {
		match &mut *self.lock() {
			Slot::Open { file, .. } => file.flush(),
			Slot::Vacant | Slot::Closed => Ok(()),
		}
	}

	/// The identity of the open file, if there is one.
	pub fn identity(&self) -> Option<Id>
	where
		Id: Clone,
	{
		self.lock().identity().cloned()
	}

	fn lock(&self) -> MutexGuard<'_, Slot<Id>> {
		// every transition leaves the slot whole, so a panicking holder can't corrupt it
		self.slot.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Reopen if the open file is no longer the one at the path. Returns whether it reopened.
	fn ensure_current(&self, slot: &mut Slot<Id>) -> io::Result<bool> {
		if let Slot::Closed = slot {
			return Err(closed());
		}

		if identity::matches(slot.identity(), &self.path)? {
			return Ok(false);
		}

		self.reopen_locked(slot)?;
		Ok(true)
	}

	fn reopen_locked(&self, slot: &mut Slot<Id>) -> io::Result<()> {
		if let Slot::Closed = slot {
			return Err(closed());
		}

		// drop the old handle before anything else, so a failure leaves nothing half-open
		*slot = Slot::Vacant;

		let open_options = self.options.open_options();
		let file = retry_open(&self.options.retry, self.options.clock.as_ref(), || {
			open_options.open(&self.path)
		})?;

		// if this fails, `file` is dropped and closed with it
		let identity = Id::of_file(&file)?;
		*slot = Slot::Open { file, identity };
		Ok(())
	}
}

impl<Id> Slot<Id> {
	fn identity(&self) -> Option<&Id> {
		match self {
			Slot::Open { identity, .. } => Some(identity),
			Slot::Vacant | Slot::Closed => None,
		}
	}
}

impl<Id: FileIdentity> Write for RotatableWriter<Id> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		RotatableWriter::write(self, buf)
	}

	fn flush(&mut self) -> io::Result<()> {
		RotatableWriter::flush(self)
	}
}

impl<Id: FileIdentity> Write for &RotatableWriter<Id> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		RotatableWriter::write(*self, buf)
	}

	fn flush(&mut self) -> io::Result<()> {
		RotatableWriter::flush(*self)
	}
}
