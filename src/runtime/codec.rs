//! Length-prefixed frame codec.
//!
//! Every frame is a 4-byte header followed by exactly that many body bytes.
//! Two header layouts exist and are never mixed on one connection:
//!
//! ```text
//! Binary:  [len: u32 big-endian][body]      00 00 00 05 h e l l o
//! Decimal: [len: 4 ASCII digits][body]      0 0 0 5 h e l l o
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FramingError;

/// Size of every frame header, regardless of encoding.
pub const HEADER_SIZE: usize = 4;

/// Largest body a decimal header can describe.
pub const DECIMAL_MAX_LEN: usize = 9999;

/// Default cap on a single frame body (16MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Header byte layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderEncoding {
    /// 4 raw bytes, network byte order.
    #[default]
    Binary,
    /// 4 zero-padded ASCII digits.
    Decimal,
}

impl HeaderEncoding {
    /// Largest length this header layout can carry.
    pub fn max_len(self) -> usize {
        match self {
            HeaderEncoding::Binary => u32::MAX as usize,
            HeaderEncoding::Decimal => DECIMAL_MAX_LEN,
        }
    }
}

/// Frame encoder/decoder for one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    encoding: HeaderEncoding,
    max_frame_size: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(HeaderEncoding::Binary, DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Codec {
    pub fn new(encoding: HeaderEncoding, max_frame_size: usize) -> Self {
        Self {
            encoding,
            max_frame_size,
        }
    }

    pub fn encoding(&self) -> HeaderEncoding {
        self.encoding
    }

    /// Effective body size limit: the smaller of the header's range and the configured cap.
    pub fn max_len(&self) -> usize {
        self.encoding.max_len().min(self.max_frame_size)
    }

    /// Build the header for a body of `len` bytes.
    pub fn encode_header(&self, len: usize) -> Result<[u8; HEADER_SIZE], FramingError> {
        let max = self.max_len();
        if len > max {
            return Err(FramingError::TooLarge { len, max });
        }

        let mut header = [0u8; HEADER_SIZE];
        match self.encoding {
            HeaderEncoding::Binary => header.copy_from_slice(&(len as u32).to_be_bytes()),
            HeaderEncoding::Decimal => {
                let mut rest = len;
                for slot in header.iter_mut().rev() {
                    *slot = b'0' + (rest % 10) as u8;
                    rest /= 10;
                }
            }
        }
        Ok(header)
    }

    /// Prepend a length header to `message`.
    pub fn encode(&self, message: &[u8]) -> Result<Bytes, FramingError> {
        let header = self.encode_header(message.len())?;
        let mut frame = BytesMut::with_capacity(HEADER_SIZE + message.len());
        frame.put_slice(&header);
        frame.put_slice(message);
        Ok(frame.freeze())
    }

    /// Extract the declared body length from a header.
    ///
    /// Used by the session before the body has arrived, so the cap is
    /// enforced here rather than after allocation.
    pub fn peek_body_size(&self, header: &[u8; HEADER_SIZE]) -> Result<usize, FramingError> {
        let len = match self.encoding {
            HeaderEncoding::Binary => u32::from_be_bytes(*header) as usize,
            HeaderEncoding::Decimal => {
                let mut len = 0usize;
                for &b in header {
                    if !b.is_ascii_digit() {
                        return Err(FramingError::InvalidHeader);
                    }
                    len = len * 10 + (b - b'0') as usize;
                }
                len
            }
        };

        if len > self.max_frame_size {
            return Err(FramingError::TooLarge {
                len,
                max: self.max_frame_size,
            });
        }
        Ok(len)
    }

    /// Strip and validate the header of a complete frame.
    pub fn decode(&self, frame: &[u8]) -> Result<Bytes, FramingError> {
        if frame.len() < HEADER_SIZE {
            return Err(FramingError::InvalidHeader);
        }
        let (header, body) = frame.split_at(HEADER_SIZE);
        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(header);

        let declared = self.peek_body_size(&raw)?;
        if declared != body.len() {
            return Err(FramingError::LengthMismatch {
                declared,
                actual: body.len(),
            });
        }
        Ok(Bytes::copy_from_slice(body))
    }
}
