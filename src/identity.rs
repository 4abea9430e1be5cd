//! Telling whether two references point at the same file on disk.
//!
//! A [`RotatableWriter`](crate::writer::RotatableWriter) remembers the identity of the file it
//! opened, and before each write compares it against the identity of whatever is at its path now.
//! The comparison is pluggable so that platforms with a strong notion of file identity (a device
//! and inode pair) can use it, while others fall back to a portable "same file" predicate.

use std::{
	fmt,
	fs::{File, OpenOptions},
	io,
	path::Path,
};

#[cfg(unix)]
pub type DefaultIdentity = DevIno;

#[cfg(not(unix))]
pub type DefaultIdentity = SameFile;

/// A value that identifies an underlying file object, independent of its path.
pub trait FileIdentity: Sized + PartialEq + fmt::Debug + Send + Sync {
	/// Identity of the file currently at `path`.
	///
	/// Returns an error of kind [`NotFound`](io::ErrorKind::NotFound) if nothing is there.
	fn of_path(path: &Path) -> io::Result<Self>;

	/// Identity of an open file.
	fn of_file(file: &File) -> io::Result<Self>;
}

/// Strict identity: the device and inode numbers from `stat(2)`.
///
/// Any difference, including a recycled inode on another device, counts as a different file.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevIno {
	pub dev: u64,
	pub ino: u64,
}

#[cfg(unix)]
impl DevIno {
	fn from_metadata(meta: &std::fs::Metadata) -> Self {
		use std::os::unix::fs::MetadataExt as _;
		Self {
			dev: meta.dev(),
			ino: meta.ino(),
		}
	}
}

#[cfg(unix)]
impl fmt::Display for DevIno {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.dev, self.ino)
	}
}

#[cfg(unix)]
impl FileIdentity for DevIno {
	fn of_path(path: &Path) -> io::Result<Self> {
		std::fs::metadata(path).map(|meta| Self::from_metadata(&meta))
	}

	fn of_file(file: &File) -> io::Result<Self> {
		file.metadata().map(|meta| Self::from_metadata(&meta))
	}
}

/// Portable identity, using the [`same_file`] crate's comparison.
///
/// Querying a path opens it, for reading if possible and otherwise for appending, so a write-only
/// file works too. The file is never created or truncated by the query. The snapshot keeps its
/// own handle open, which is what lets platforms without inode numbers tell a recreated path
/// apart from the original file.
#[derive(Debug, PartialEq, Eq)]
pub struct SameFile(same_file::Handle);

impl FileIdentity for SameFile {
	fn of_path(path: &Path) -> io::Result<Self> {
		match same_file::Handle::from_path(path) {
			Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
				let file = OpenOptions::new().append(true).open(path)?;
				same_file::Handle::from_file(file).map(Self)
			}
			res => res.map(Self),
		}
	}

	fn of_file(file: &File) -> io::Result<Self> {
		same_file::Handle::from_file(file.try_clone()?).map(Self)
	}
}

/// Compare a stored identity with whatever is at `path` now.
///
/// A missing file at `path` is never a match, and neither is a missing `stored` identity. A file
/// this process can't query is not a match either: the reopen that follows then either succeeds
/// or waits for access like any other reopen.
pub(crate) fn matches<Id: FileIdentity>(stored: Option<&Id>, path: &Path) -> io::Result<bool> {
	let current = match Id::of_path(path) {
		Ok(id) => id,
		Err(err)
			if matches!(
				err.kind(),
				io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
			) =>
		{
			return Ok(false)
		}
		Err(err) => return Err(err),
	};

	Ok(stored.is_some_and(|stored| *stored == current))
}
