use std::{
	future::Future,
	io,
	path::Path,
	pin::Pin,
	sync::Arc,
	task::{Context, Poll},
};

use futures_io::AsyncWrite;
use futures_util::ready;
use tokio::task::{spawn_blocking, JoinHandle};

use crate::{
	identity::{DefaultIdentity, FileIdentity},
	writer::{options::WriterOptions, RotatableWriter},
};

/// [`AsyncWrite`] over a [`RotatableWriter`], running each operation on tokio's blocking pool.
///
/// The underlying writer can block for a while when a reopen has to wait for the new file, so it
/// is never called on an async worker thread. Must be used from within a tokio runtime.
///
/// As with `tokio::fs::File`, a write that returned `Pending` is still in flight: poll it again
/// with the same data to get its result.
pub struct AsyncRotatableWriter<Id = DefaultIdentity> {
	inner: Arc<RotatableWriter<Id>>,
	state: State,
}

enum State {
	Idle,
	Busy(Op, JoinHandle<io::Result<usize>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
	Write,
	Flush,
	Close,
}

impl<Id> std::fmt::Debug for AsyncRotatableWriter<Id> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AsyncRotatableWriter")
			.field("inner", &self.inner)
			.field(
				"busy",
				&match &self.state {
					State::Idle => None,
					State::Busy(op, _) => Some(*op),
				},
			)
			.finish()
	}
}

impl<Id> From<Arc<RotatableWriter<Id>>> for AsyncRotatableWriter<Id> {
	fn from(inner: Arc<RotatableWriter<Id>>) -> Self {
		Self {
			inner,
			state: State::Idle,
		}
	}
}

impl<Id> From<RotatableWriter<Id>> for AsyncRotatableWriter<Id> {
	fn from(inner: RotatableWriter<Id>) -> Self {
		Arc::new(inner).into()
	}
}

impl<Id> AsyncRotatableWriter<Id>
where
	Id: FileIdentity + 'static,
{
	/// Open `path` for appending. See [`RotatableWriter::open`].
	pub async fn open(path: impl AsRef<Path>, options: WriterOptions) -> io::Result<Self> {
		let path = path.as_ref().to_path_buf();
		let inner = spawn_blocking(move || RotatableWriter::<Id>::open(path, options))
			.await
			.map_err(io::Error::other)??;
		Ok(inner.into())
	}

	/// The writer this drives.
	pub fn get_ref(&self) -> &RotatableWriter<Id> {
		&self.inner
	}

	/// A shared handle to the writer this drives, e.g. for a task that reopens on a signal.
	pub fn shared(&self) -> Arc<RotatableWriter<Id>> {
		Arc::clone(&self.inner)
	}

	/// Reopen the path now. See [`RotatableWriter::reopen`].
	#[tracing::instrument(level = "trace", skip(self))]
	pub async fn reopen(&self) -> io::Result<()> {
		let inner = Arc::clone(&self.inner);
		spawn_blocking(move || inner.reopen())
			.await
			.map_err(io::Error::other)?
	}

	/// Drive `op` to completion, first finishing whatever else is in flight.
	fn poll_op(
		&mut self,
		cx: &mut Context<'_>,
		op: Op,
		run: impl FnOnce(&RotatableWriter<Id>) -> io::Result<usize> + Send + 'static,
	) -> Poll<io::Result<usize>> {
		let mut run = Some(run);
		loop {
			match &mut self.state {
				State::Idle => {
					let Some(run) = run.take() else {
						return Poll::Ready(Ok(0));
					};
					let inner = Arc::clone(&self.inner);
					self.state = State::Busy(op, spawn_blocking(move || run(&inner)));
				}
				State::Busy(running, task) => {
					let running = *running;
					let result = ready!(Pin::new(task).poll(cx))
						.unwrap_or_else(|err| Err(io::Error::other(err)));
					self.state = State::Idle;

					if running == op {
						return Poll::Ready(result);
					}

					if let Err(err) = result {
						return Poll::Ready(Err(err));
					}
				}
			}
		}
	}
}

impl<Id> AsyncWrite for AsyncRotatableWriter<Id>
where
	Id: FileIdentity + 'static,
{
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		let buf = buf.to_vec();
		self.get_mut()
			.poll_op(cx, Op::Write, move |inner| inner.write(&buf))
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		self.get_mut()
			.poll_op(cx, Op::Flush, |inner| inner.flush().map(|()| 0))
			.map_ok(drop)
	}

	fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		self.get_mut()
			.poll_op(cx, Op::Close, |inner| inner.close().map(|()| 0))
			.map_ok(drop)
	}
}

#[cfg(test)]
mod tests {
	use futures_util::io::AsyncWriteExt as _;

	use super::*;

	#[tokio::test]
	async fn rename_keeps_writing() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("rotatable.log");
		let rotated = dir.path().join("rotatable.log.1");

		let mut writer = AsyncRotatableWriter::<DefaultIdentity>::open(&path, WriterOptions::new())
			.await
			.unwrap();
		for i in 0..5 {
			if i == 3 {
				tokio::fs::rename(&path, &rotated).await.unwrap();
			}
			writer.write_all(format!("{i}\n").as_bytes()).await.unwrap();
		}
		writer.flush().await.unwrap();

		assert_eq!(tokio::fs::read_to_string(&rotated).await.unwrap(), "0\n1\n2\n");
		assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "3\n4\n");
	}

	#[tokio::test]
	async fn reopen_then_close() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("rotatable.log");
		let rotated = dir.path().join("rotatable.log.1");

		let mut writer = AsyncRotatableWriter::<DefaultIdentity>::open(&path, WriterOptions::new())
			.await
			.unwrap();
		writer.write_all(b"before\n").await.unwrap();

		tokio::fs::rename(&path, &rotated).await.unwrap();
		writer.reopen().await.unwrap();
		assert!(writer.get_ref().is_current().unwrap());

		writer.write_all(b"after\n").await.unwrap();
		writer.close().await.unwrap();
		assert!(writer.get_ref().is_closed());

		let err = writer.write_all(b"late\n").await.unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::NotConnected);

		assert_eq!(tokio::fs::read_to_string(&rotated).await.unwrap(), "before\n");
		assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "after\n");
	}

	#[tokio::test]
	async fn shares_with_blocking_writer() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("rotatable.log");

		let shared = Arc::new(
			RotatableWriter::<DefaultIdentity>::open(&path, WriterOptions::new()).unwrap(),
		);
		let mut writer = AsyncRotatableWriter::from(Arc::clone(&shared));
		writer.write_all(b"async\n").await.unwrap();
		shared.write(b"sync\n").unwrap();
		assert!(Arc::ptr_eq(&writer.shared(), &shared));

		assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "async\nsync\n");
	}

	#[tokio::test]
	async fn open_failure_is_reported() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("missing").join("rotatable.log");

		let err = AsyncRotatableWriter::<DefaultIdentity>::open(&path, WriterOptions::new())
			.await
			.unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::NotFound);
	}
}
