//! Content-Length framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{body}` framing over stdin/stdout.
//! This module provides [`FrameReader`] and [`FrameWriter`] for async
//! reading and writing of framed message bodies. Bodies are opaque bytes;
//! interpreting them is the job of [`crate::message`].

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::FramingError;

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Frame a body: `Content-Length` header, blank line, then the body verbatim.
#[must_use]
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Reads frames from an async reader.
///
/// Parses `Content-Length` headers and reads exactly that many bytes.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame body.
    ///
    /// Returns `Ok(None)` on EOF between frames (clean shutdown).
    /// Oversized frames are consumed and discarded before the error is
    /// returned, so the next call starts at a frame boundary.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };

        if content_length > MAX_FRAME_BYTES {
            let mut skipped = (&mut self.reader).take(content_length as u64);
            let discarded = tokio::io::copy(&mut skipped, &mut tokio::io::sink()).await?;
            if discarded < content_length as u64 {
                return Err(FramingError::UnexpectedEof);
            }
            return Err(FramingError::FrameTooLarge {
                length: content_length,
                max: MAX_FRAME_BYTES,
            });
        }

        let mut body = vec![0u8; content_length];
        match self.reader.read_exact(&mut body).await {
            Ok(_) => Ok(Some(body)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(FramingError::UnexpectedEof)
            }
            Err(e) => Err(FramingError::Io(e)),
        }
    }

    /// Parse headers until the empty line separator.
    ///
    /// Returns the `Content-Length` value, or `None` on EOF.
    async fn read_headers(&mut self) -> Result<Option<usize>, FramingError> {
        let mut content_length: Option<usize> = None;
        let mut invalid_length: Option<String> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                // EOF is only clean before any byte of a header block.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(FramingError::UnexpectedEof);
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            // Header names are matched case-insensitively; order is irrelevant.
            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let value = value.trim();
                match value.parse::<usize>() {
                    Ok(len) => {
                        content_length = Some(len);
                        invalid_length = None;
                    }
                    Err(_) => invalid_length = Some(value.to_string()),
                }
            }
        }

        // The whole header block is consumed before reporting, so a bad
        // length never leaves half a header in the buffer.
        if let Some(value) = invalid_length {
            return Err(FramingError::InvalidContentLength(value));
        }
        match content_length {
            Some(len) => Ok(Some(len)),
            None => Err(FramingError::MissingContentLength),
        }
    }
}

/// Writes frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one body with its `Content-Length` header and flush.
    pub async fn write_frame(&mut self, body: &[u8]) -> io::Result<()> {
        self.writer.write_all(&encode_frame(body)).await?;
        self.writer.flush().await
    }

    /// Flush and close the underlying writer (EOF for the peer).
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
