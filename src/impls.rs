#[cfg(feature = "async")]
pub use on_tokio::AsyncRotatableWriter;

#[cfg(feature = "async")]
mod on_tokio;
