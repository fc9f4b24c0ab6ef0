//! Byte sources for `tokenflow decode`.
//!
//! Files and stdin are read in `chunk_size` pieces; URLs are fetched with
//! `reqwest` and their streaming body is forwarded chunk by chunk.  Every
//! source ends up as a [`ReadableStream`] so the decoder pipeline can take
//! and release its lock.

use std::path::Path;

use anyhow::{Context, Result};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use tokenflow_stream::{FuturesSource, ReadableStream, StreamError};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::cli::Input;
use crate::config::CliConfig;

/// Boxed stream of byte chunks.
pub type ByteStream = BoxStream<'static, tokenflow_stream::Result<Vec<u8>>>;

/// A readable stream over any CLI byte source.
pub type ByteSource = ReadableStream<FuturesSource<ByteStream>>;

/// Open `input` as a readable stream.
pub async fn open(input: &Input, config: &CliConfig) -> Result<ByteSource> {
    let bytes = match input {
        Input::File(path) => open_file(path, config.stream.chunk_size).await?,
        Input::Stdin => read_chunks(tokio::io::stdin(), config.stream.chunk_size),
        Input::Url(url) => open_url(url, config).await?,
    };
    Ok(ReadableStream::new(FuturesSource::new(bytes)))
}

async fn open_file(path: &Path, chunk_size: usize) -> Result<ByteStream> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    debug!(path = %path.display(), "reading event stream from file");
    Ok(read_chunks(file, chunk_size))
}

/// Turn an async reader into a stream of chunks of at most `chunk_size`
/// bytes.  The stream ends at EOF or after the first read error.
pub fn read_chunks<R>(reader: R, chunk_size: usize) -> ByteStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let chunk_size = chunk_size.max(1);
    stream::unfold(Some(reader), move |reader| async move {
        let mut reader = reader?;
        let mut buf = vec![0; chunk_size];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(buf), Some(reader)))
            }
            Err(err) => Some((Err(StreamError::from(err)), None)),
        }
    })
    .boxed()
}

async fn open_url(url: &url::Url, config: &CliConfig) -> Result<ByteStream> {
    let headers = build_headers(config)?;
    info!(url = %url, "connecting to event stream");

    let response = reqwest::Client::new()
        .get(url.clone())
        .headers(headers)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?
        .error_for_status()
        .with_context(|| format!("request to {url} was rejected"))?;

    debug!(status = %response.status(), "event stream connected");

    Ok(response
        .bytes_stream()
        .map_ok(|chunk| chunk.to_vec())
        .map_err(|e| StreamError::upstream(format!("stream read error: {e}")))
        .boxed())
}

/// Request headers: `Accept: text/event-stream` plus the configured ones.
fn build_headers(config: &CliConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    for (name, value) in &config.http.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name {name:?}"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header {name}"))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
