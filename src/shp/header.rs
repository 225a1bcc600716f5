//! The 100-byte header shared by `.shp` and `.shx` files.

use crate::error::{Result, ShapeError};
use crate::types::{Envelope, ShapeType};
use bytes::{Buf, BufMut, BytesMut};

pub const FILE_CODE: i32 = 9994;
pub const VERSION: i32 = 1000;
pub const HEADER_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct ShapefileHeader {
    /// Total file length in 16-bit words, header included.
    pub file_length: u32,
    pub shape_type: ShapeType,
    pub bbox: Envelope,
    pub z_range: (f64, f64),
    pub m_range: (f64, f64),
}

impl ShapefileHeader {
    pub fn new(shape_type: ShapeType) -> Self {
        Self {
            file_length: (HEADER_LEN / 2) as u32,
            shape_type,
            bbox: Envelope::EMPTY,
            z_range: (0.0, 0.0),
            m_range: (0.0, 0.0),
        }
    }

    pub fn file_length_bytes(&self) -> u64 {
        u64::from(self.file_length) * 2
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(ShapeError::InvalidFormat(format!(
                "header is {} bytes, expected {HEADER_LEN}",
                buf.len()
            )));
        }

        let file_code = buf.get_i32();
        if file_code != FILE_CODE {
            return Err(ShapeError::InvalidFormat(format!(
                "bad file code {file_code}"
            )));
        }
        buf.advance(20);
        let file_length = buf.get_i32();
        if file_length < (HEADER_LEN / 2) as i32 {
            return Err(ShapeError::InvalidFormat(format!(
                "bad file length {file_length}"
            )));
        }

        let version = buf.get_i32_le();
        if version != VERSION {
            return Err(ShapeError::InvalidFormat(format!("bad version {version}")));
        }
        let code = buf.get_i32_le();
        let shape_type = ShapeType::from_code(code)
            .ok_or_else(|| ShapeError::InvalidFormat(format!("unknown shape type {code}")))?;

        let min_x = buf.get_f64_le();
        let min_y = buf.get_f64_le();
        let max_x = buf.get_f64_le();
        let max_y = buf.get_f64_le();
        let z_range = (buf.get_f64_le(), buf.get_f64_le());
        let m_range = (buf.get_f64_le(), buf.get_f64_le());

        Ok(Self {
            file_length: file_length as u32,
            shape_type,
            bbox: Envelope {
                min_x,
                min_y,
                max_x,
                max_y,
            },
            z_range,
            m_range,
        })
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.reserve(HEADER_LEN);
        out.put_i32(FILE_CODE);
        for _ in 0..5 {
            out.put_i32(0);
        }
        out.put_i32(self.file_length as i32);
        out.put_i32_le(VERSION);
        out.put_i32_le(self.shape_type.code());

        // An empty bbox is written as zeros, matching what most writers emit for empty files.
        let bbox = if self.bbox.is_empty() {
            Envelope::new(0.0, 0.0, 0.0, 0.0)
        } else {
            self.bbox
        };
        out.put_f64_le(bbox.min_x);
        out.put_f64_le(bbox.min_y);
        out.put_f64_le(bbox.max_x);
        out.put_f64_le(bbox.max_y);
        out.put_f64_le(self.z_range.0);
        out.put_f64_le(self.z_range.1);
        out.put_f64_le(self.m_range.0);
        out.put_f64_le(self.m_range.1);
    }
}
