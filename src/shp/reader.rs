//! Random-access and sequential reader for `.shp` geometry files.

use super::codec;
use super::header::{HEADER_LEN, ShapefileHeader};
use crate::error::{Result, ShapeError};
use crate::shape::Shape;
use crate::types::{Envelope, ShapeType};
use bytes::{Buf, Bytes};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

const RECORD_HEADER_LEN: u64 = 8;

/// An undecoded record body together with its location in the file.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// 0-based position of the record in the file.
    pub ordinal: usize,
    /// 1-based record number from the record header.
    pub record_number: i32,
    /// Byte offset of the record header.
    pub offset: u64,
    pub content: Bytes,
}

impl RawRecord {
    /// Content length in 16-bit words, as stored in `.shx`.
    pub fn content_length_words(&self) -> u32 {
        (self.content.len() / 2) as u32
    }

    pub fn shape_type(&self) -> Result<ShapeType> {
        codec::decode_envelope(&self.content, self.ordinal).map(|(t, _)| t)
    }

    /// Bounds of the record without decoding its coordinate arrays.
    pub fn envelope(&self) -> Result<Envelope> {
        codec::decode_envelope(&self.content, self.ordinal).map(|(_, env)| env)
    }

    pub fn shape(&self) -> Result<Shape> {
        codec::decode_shape(&self.content, self.ordinal)
    }
}

pub struct ShapefileReader {
    path: PathBuf,
    file: BufReader<File>,
    header: ShapefileHeader,
    /// Readable end of the record area: the smaller of the header length and the real size.
    end: u64,
    position: u64,
}

impl ShapefileReader {
    /// Open a `.shp` file. Open failures are fatal ([`ShapeError::FatalIo`]).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| ShapeError::fatal_io(&path, e))?;
        let size = file
            .metadata()
            .map_err(|e| ShapeError::fatal_io(&path, e))?
            .len();

        let mut file = BufReader::new(file);
        let mut buf = [0u8; HEADER_LEN];
        file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ShapeError::InvalidFormat(format!("{} is shorter than a header", path.display()))
            } else {
                ShapeError::fatal_io(&path, e)
            }
        })?;
        let header = ShapefileHeader::decode(&buf)?;

        let declared = header.file_length_bytes();
        if declared != size {
            log::warn!(
                "{}: header declares {} bytes but file has {}",
                path.display(),
                declared,
                size
            );
        }

        Ok(Self {
            path,
            file,
            end: declared.min(size),
            header,
            position: HEADER_LEN as u64,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &ShapefileHeader {
        &self.header
    }

    pub fn shape_type(&self) -> ShapeType {
        self.header.shape_type
    }

    /// Bounds declared in the file header.
    pub fn bounds(&self) -> Envelope {
        self.header.bbox
    }

    /// Byte offset just past the last readable record.
    pub fn data_end(&self) -> u64 {
        self.end
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        if offset != self.position {
            self.file.seek(SeekFrom::Start(offset))?;
            self.position = offset;
        }
        Ok(())
    }

    /// Read the record whose header starts at `offset` bytes.
    pub fn read_record_at(&mut self, ordinal: usize, offset: u64) -> Result<RawRecord> {
        if offset < HEADER_LEN as u64 || offset + RECORD_HEADER_LEN > self.end {
            return Err(ShapeError::decode(
                ordinal,
                format!("record offset {offset} outside record area (end {})", self.end),
            ));
        }
        self.seek_to(offset)?;
        // Unknown until both reads succeed.
        self.position = u64::MAX;

        let mut head = [0u8; RECORD_HEADER_LEN as usize];
        self.file.read_exact(&mut head)?;
        let mut head = &head[..];
        let record_number = head.get_i32();
        let length_words = head.get_i32();

        if length_words < 2 {
            return Err(ShapeError::decode(
                ordinal,
                format!("record content length {length_words} words is too short"),
            ));
        }
        let length = u64::from(length_words as u32) * 2;
        if offset + RECORD_HEADER_LEN + length > self.end {
            return Err(ShapeError::decode(
                ordinal,
                format!(
                    "record of {length} bytes at {offset} runs past end of file ({})",
                    self.end
                ),
            ));
        }

        let mut content = vec![0u8; length as usize];
        self.file.read_exact(&mut content)?;
        self.position = offset + RECORD_HEADER_LEN + length;

        Ok(RawRecord {
            ordinal,
            record_number,
            offset,
            content: Bytes::from(content),
        })
    }

    /// Read a record located through `.shx`, checking its stored content length.
    pub fn read_indexed(
        &mut self,
        ordinal: usize,
        offset: u64,
        content_length: u32,
    ) -> Result<RawRecord> {
        let record = self.read_record_at(ordinal, offset)?;
        if record.content.len() as u64 != u64::from(content_length) {
            return Err(ShapeError::decode(
                ordinal,
                format!(
                    "index says {} bytes, record header says {}",
                    content_length,
                    record.content.len()
                ),
            ));
        }
        Ok(record)
    }

    /// Sequential scan over every record, starting after the header.
    pub fn records(&mut self) -> Records<'_> {
        Records {
            reader: self,
            offset: HEADER_LEN as u64,
            ordinal: 0,
            done: false,
        }
    }

    /// Sequential scan yielding each record's ordinal and bounds.
    pub fn envelopes(&mut self) -> impl Iterator<Item = Result<(usize, Envelope)>> + '_ {
        self.records()
            .map(|record| record.and_then(|r| r.envelope().map(|env| (r.ordinal, env))))
    }

    /// Count records with a sequential scan. Stops at the first unreadable record.
    pub fn count_records(&mut self) -> Result<usize> {
        let mut count = 0;
        for record in self.records() {
            record?;
            count += 1;
        }
        Ok(count)
    }
}

/// Iterator returned by [`ShapefileReader::records`]. Stops after the first error.
pub struct Records<'a> {
    reader: &'a mut ShapefileReader,
    offset: u64,
    ordinal: usize,
    done: bool,
}

impl Iterator for Records<'_> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset + RECORD_HEADER_LEN > self.reader.end {
            return None;
        }
        match self.reader.read_record_at(self.ordinal, self.offset) {
            Ok(record) => {
                self.offset += RECORD_HEADER_LEN + record.content.len() as u64;
                self.ordinal += 1;
                Some(Ok(record))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
