//! Byte-stream channel implementation
//!
//! Carries one JSON value per line over any `AsyncRead`/`AsyncWrite` pair, such
//! as a child process's stdio or a socket. Framing uses
//! [`tokio_util::codec::LinesCodec`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt::Debug;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use webview_channel::{Channel, ChannelError, MessageStream};

/// Default maximum length of a single encoded message.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024; // 16MB

/// Channel over a pair of byte streams
pub struct StreamChannel<R, W> {
    max_length: usize,
    reader: Mutex<Option<FramedRead<R, LinesCodec>>>,
    writer: tokio::sync::Mutex<FramedWrite<W, LinesCodec>>,
}

impl<R, W> StreamChannel<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Create a channel reading from `reader` and writing to `writer`.
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_max_line_length(reader, writer, DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a channel with a custom limit on the size of one message.
    ///
    /// Inbound lines over the limit are skipped. Outbound messages over the
    /// limit fail to post.
    pub fn with_max_line_length(reader: R, writer: W, max_length: usize) -> Self {
        Self {
            max_length,
            reader: Mutex::new(Some(FramedRead::new(
                reader,
                LinesCodec::new_with_max_length(max_length),
            ))),
            writer: tokio::sync::Mutex::new(FramedWrite::new(
                writer,
                LinesCodec::new_with_max_length(max_length),
            )),
        }
    }
}

impl<T> StreamChannel<ReadHalf<T>, WriteHalf<T>>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create a channel over a single duplex I/O object.
    pub fn from_io(io: T) -> Self {
        let (reader, writer) = tokio::io::split(io);
        Self::new(reader, writer)
    }
}

impl StreamChannel<tokio::io::Stdin, tokio::io::Stdout> {
    /// Create a channel over this process's stdin and stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> Debug for StreamChannel<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChannel")
            .field("max_length", &self.max_length)
            .field("listening", &self.reader.lock().is_none())
            .finish_non_exhaustive()
    }
}

fn codec_error(err: LinesCodecError) -> ChannelError {
    match err {
        LinesCodecError::Io(e) => ChannelError::Io(e),
        LinesCodecError::MaxLineLengthExceeded => {
            ChannelError::Serialization("message exceeds maximum line length".to_string())
        }
    }
}

#[async_trait]
impl<R, W> Channel for StreamChannel<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn post_message(&self, message: Value) -> Result<(), ChannelError> {
        let line = serde_json::to_string(&message)?;
        if line.len() > self.max_length {
            return Err(codec_error(LinesCodecError::MaxLineLengthExceeded));
        }

        let mut writer = self.writer.lock().await;
        writer.send(line).await.map_err(codec_error)
    }

    fn incoming(&self) -> Result<MessageStream, ChannelError> {
        let reader = self
            .reader
            .lock()
            .take()
            .ok_or(ChannelError::AlreadyListening)?;

        let stream = reader
            .take_while(|line| {
                let keep_going = match line {
                    Err(LinesCodecError::Io(e)) => {
                        warn!("Stream channel read failed, closing inbound stream: {e}");
                        false
                    }
                    _ => true,
                };
                future::ready(keep_going)
            })
            .filter_map(|line| {
                let value = match line {
                    Ok(line) if line.trim().is_empty() => None,
                    Ok(line) => match serde_json::from_str::<Value>(&line) {
                        Ok(value) => Some(value),
                        Err(e) => {
                            warn!("Skipping unparsable line on stream channel: {e}");
                            None
                        }
                    },
                    Err(e) => {
                        warn!("Skipping inbound line: {e}");
                        None
                    }
                };
                future::ready(value)
            });

        debug!("Stream channel inbound stream taken");

        Ok(Box::pin(stream))
    }
}
