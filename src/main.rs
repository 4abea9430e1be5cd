use std::{io, path::PathBuf, time::Duration};

use clap::Parser;
use futures_util::io::AsyncWriteExt as _;
use rotatable_file::{impls::AsyncRotatableWriter, RetryPolicy, WriterOptions};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

/// Append stdin to a file, following the path across log rotation.
///
/// Send SIGHUP to reopen the file immediately instead of at the next line.
#[derive(Debug, Parser)]
struct Args {
	/// File to append to.
	path: PathBuf,

	/// Permission bits (octal) for the file, if it gets created.
	#[arg(long, default_value = "644", value_parser = parse_mode)]
	mode: u32,

	/// Never create the file; wait for the rotation tool to create it.
	#[arg(long)]
	no_create: bool,

	/// How many times to retry opening a file that isn't accessible yet.
	#[arg(long, default_value_t = 3)]
	retries: u32,

	/// Delay before the first retry, in milliseconds. Doubles on each retry.
	#[arg(long, default_value_t = 10)]
	backoff_ms: u64,

	/// Also copy input to stdout.
	#[arg(long)]
	echo: bool,
}

fn parse_mode(s: &str) -> Result<u32, String> {
	u32::from_str_radix(s.trim_start_matches("0o"), 8)
		.map_err(|err| format!("bad mode {s:?}: {err}"))
}

#[tokio::main]
async fn main() -> io::Result<()> {
	tracing_subscriber::registry()
		.with(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new("rotatable_file=info,rotate_tee=info")),
		)
		.with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
		.init();

	let args = Args::parse();
	let options = WriterOptions::new()
		.with_mode(args.mode)
		.with_self_create(!args.no_create)
		.with_retry(
			RetryPolicy::new()
				.with_max_retries(args.retries)
				.with_initial_backoff(Duration::from_millis(args.backoff_ms)),
		);

	let mut writer: AsyncRotatableWriter = AsyncRotatableWriter::open(&args.path, options).await?;
	tracing::info!(path = %args.path.display(), "appending stdin");

	#[cfg(unix)]
	reopen_on_hangup(&writer)?;

	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	let mut count = 0_u64;
	while let Some(mut line) = lines.next_line().await? {
		line.push('\n');
		if args.echo {
			print!("{line}");
		}
		writer.write_all(line.as_bytes()).await?;
		count += 1;
	}

	writer.close().await?;
	tracing::info!(lines = count, "input closed");
	Ok(())
}

#[cfg(unix)]
fn reopen_on_hangup(writer: &AsyncRotatableWriter) -> io::Result<()> {
	use tokio::signal::unix::{signal, SignalKind};

	let mut hangup = signal(SignalKind::hangup())?;
	let writer = AsyncRotatableWriter::from(writer.shared());
	tokio::spawn(async move {
		while hangup.recv().await.is_some() {
			match writer.reopen().await {
				Ok(()) => tracing::info!("reopened on SIGHUP"),
				Err(err) => tracing::error!(%err, "reopen on SIGHUP failed"),
			}
		}
	});
	Ok(())
}
