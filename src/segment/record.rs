//! Segment record encoding
//!
//! Frame body (inside a `codec` frame):
//!
//! ```text
//! | sequence (u64) | flags (u8: 0 live, 1 tombstone) | id (u32 len + utf8) |
//! | body (u32 len + sealed JSON attributes; empty for tombstones) |
//! ```

use std::io;

use crate::codec::{BodyReader, BodyWriter};
use crate::crypto::PayloadCipher;
use crate::document::{Attributes, DocumentId};

use super::errors::{SegmentError, SegmentResult};

const FLAG_LIVE: u8 = 0;
const FLAG_TOMBSTONE: u8 = 1;

/// Header fields, decodable without opening the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub sequence: u64,
    pub tombstone: bool,
    pub id: DocumentId,
}

/// A document version or deletion marker
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRecord {
    pub sequence: u64,
    pub id: DocumentId,
    /// `None` for tombstones
    pub attributes: Option<Attributes>,
}

impl SegmentRecord {
    pub fn live(id: DocumentId, sequence: u64, attributes: Attributes) -> Self {
        Self {
            sequence,
            id,
            attributes: Some(attributes),
        }
    }

    pub fn tombstone(id: DocumentId, sequence: u64) -> Self {
        Self {
            sequence,
            id,
            attributes: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.attributes.is_none()
    }

    /// Encode into a complete frame
    pub fn encode(&self, cipher: &PayloadCipher) -> SegmentResult<Vec<u8>> {
        let payload = match &self.attributes {
            Some(attributes) => {
                let json = serde_json::to_vec(attributes).map_err(|e| {
                    SegmentError::io(
                        "failed to serialize document",
                        io::Error::new(io::ErrorKind::InvalidData, e),
                    )
                })?;
                cipher.seal(&json).map_err(|e| {
                    SegmentError::io(
                        "failed to seal document",
                        io::Error::new(io::ErrorKind::Other, e),
                    )
                })?
            }
            None => Vec::new(),
        };

        let mut body = BodyWriter::new();
        body.put_u64(self.sequence)
            .put_u8(if self.is_tombstone() {
                FLAG_TOMBSTONE
            } else {
                FLAG_LIVE
            })
            .put_str(self.id.as_str())
            .put_bytes(&payload);
        Ok(body.into_frame())
    }

    /// Decode only the header of a verified frame body
    pub fn decode_header(body: &[u8]) -> SegmentResult<RecordHeader> {
        let malformed =
            |e: io::Error| SegmentError::corruption(format!("malformed segment record: {}", e));
        let mut r = BodyReader::new(body);
        let sequence = r.get_u64().map_err(malformed)?;
        let flags = r.get_u8().map_err(malformed)?;
        let raw_id = r.get_string().map_err(malformed)?;

        let tombstone = match flags {
            FLAG_LIVE => false,
            FLAG_TOMBSTONE => true,
            other => {
                return Err(SegmentError::corruption(format!(
                    "invalid record flags 0x{:02x}",
                    other
                )))
            }
        };
        let id = DocumentId::parse(&raw_id)
            .map_err(|_| SegmentError::corruption(format!("invalid document id '{}'", raw_id)))?;

        Ok(RecordHeader {
            sequence,
            tombstone,
            id,
        })
    }

    /// Decode a verified frame body, opening the payload
    pub fn decode(body: &[u8], cipher: &PayloadCipher) -> SegmentResult<Self> {
        let malformed =
            |e: io::Error| SegmentError::corruption(format!("malformed segment record: {}", e));
        let header = Self::decode_header(body)?;

        let mut r = BodyReader::new(body);
        r.get_u64().map_err(malformed)?;
        r.get_u8().map_err(malformed)?;
        r.get_string().map_err(malformed)?;
        let payload = r.get_bytes().map_err(malformed)?;

        let attributes = if header.tombstone {
            None
        } else {
            let json = cipher.open(&payload).map_err(|e| {
                SegmentError::corruption(format!("record {}: {}", header.id, e))
            })?;
            Some(serde_json::from_slice(&json).map_err(|e| {
                SegmentError::corruption(format!("record {}: invalid document: {}", header.id, e))
            })?)
        };

        Ok(Self {
            sequence: header.sequence,
            id: header.id,
            attributes,
        })
    }
}
