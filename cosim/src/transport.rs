/*!
Length prefixed framing over a byte stream.

A frame is a 4 bytes big endian length followed by that many bytes of
payload. A single read may return a partial frame or more than one frame:
the [`Transport`] accumulates bytes until a whole frame is available and
keeps the surplus for the next call.
*/

use std::io::{self, Read, Write};
use thiserror::Error;
use tracing::trace;

/// Size of the length prefix
pub const HEADER_SIZE: usize = 4;

/// Largest payload accepted in either direction (4 MiB).
pub const MAX_FRAME_SIZE: usize = 4 * 1_024 * 1_024;

const READ_CHUNK: usize = 64 * 1_024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Connection closed by peer")]
    Closed,
    #[error("Connection closed in the middle of a frame ({received} of {expected} bytes)")]
    Truncated { received: usize, expected: usize },
    #[error("Frame of {size} bytes exceeds the maximum of {max} bytes")]
    TooLarge { size: usize, max: usize },
    #[error("I/O error on the connection")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// `true` if the connection may still be used after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(error) => matches!(
                error.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            ),
            Self::Closed | Self::Truncated { .. } | Self::TooLarge { .. } => false,
        }
    }
}

/// Prefix `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Extract the first complete frame of `bytes`.
///
/// Returns the payload and the number of bytes the frame occupies, or
/// `None` if more bytes are needed.
pub fn decode_frame(bytes: &[u8]) -> Result<Option<(&[u8], usize)>, FrameError> {
    let Some(header) = bytes.first_chunk::<HEADER_SIZE>() else {
        return Ok(None);
    };
    let size = u32::from_be_bytes(*header) as usize;
    if size > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }

    let end = HEADER_SIZE + size;
    Ok(bytes.get(HEADER_SIZE..end).map(|payload| (payload, end)))
}

pub struct Transport<S> {
    stream: S,
    /// bytes received and not yet returned as a frame
    buffer: Vec<u8>,
}

impl<S> Transport<S>
where
    S: Read + Write,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    /// Block until a whole frame is received and return its payload.
    ///
    /// On error the partially received frame is discarded.
    pub fn read_frame(&mut self) -> Result<Vec<u8>, FrameError> {
        let result = self.fill_frame();
        if result.is_err() {
            self.buffer.clear();
        }
        result
    }

    fn fill_frame(&mut self) -> Result<Vec<u8>, FrameError> {
        let mut chunk = vec![0; READ_CHUNK];

        loop {
            if let Some((payload, used)) = decode_frame(&self.buffer)? {
                let payload = payload.to_vec();
                self.buffer.drain(..used);
                trace!(size = payload.len(), "frame received");
                return Ok(payload);
            }

            let read = match self.stream.read(&mut chunk) {
                Ok(read) => read,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error.into()),
            };

            if read == 0 {
                return Err(self.closed());
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    fn closed(&self) -> FrameError {
        if self.buffer.is_empty() {
            return FrameError::Closed;
        }

        let expected = self
            .buffer
            .first_chunk::<HEADER_SIZE>()
            .map(|header| HEADER_SIZE + u32::from_be_bytes(*header) as usize)
            .unwrap_or(HEADER_SIZE);
        FrameError::Truncated {
            received: self.buffer.len(),
            expected,
        }
    }

    /// Send `payload` as one frame, the whole frame is written before
    /// returning.
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let frame = encode_frame(payload)?;
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        trace!(size = payload.len(), "frame sent");
        Ok(())
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
