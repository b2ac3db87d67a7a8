//! WAL entry types and their on-disk encoding
//!
//! Each entry is one checksummed frame (see `codec`). Frame body:
//!
//! ```text
//! | sequence (u64) | txn_id (u64, 0 = none) | batch_len (u32) | kind (u8) |
//! | target id (u32 len + utf8) | payload (u32 len + bytes) |
//! ```
//!
//! The payload is the JSON encoding of `WalPayload`, sealed by the payload
//! cipher. Update entries carry both the shallow patch and the full
//! post-image so replay never depends on the prior state being present.

use std::io;

use serde::{Deserialize, Serialize};

use crate::codec::{BodyReader, BodyWriter};
use crate::crypto::PayloadCipher;
use crate::document::{Attributes, DocumentId, Patch};

use super::errors::{WalError, WalResult};

/// Mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OpKind {
    Create = 0,
    Update = 1,
    Delete = 2,
}

impl OpKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(OpKind::Create),
            1 => Some(OpKind::Update),
            2 => Some(OpKind::Delete),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// What an entry carries besides its header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalPayload {
    /// Full document body (create)
    Document { attributes: Attributes },
    /// Shallow patch plus resulting document (update)
    Patch { patch: Patch, post_image: Attributes },
    /// Deletion marker
    Tombstone,
}

impl WalPayload {
    fn matches_kind(&self, kind: OpKind) -> bool {
        matches!(
            (kind, self),
            (OpKind::Create, WalPayload::Document { .. })
                | (OpKind::Update, WalPayload::Patch { .. })
                | (OpKind::Delete, WalPayload::Tombstone)
        )
    }
}

/// A mutation not yet assigned a sequence number
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub kind: OpKind,
    pub target: DocumentId,
    pub payload: WalPayload,
}

impl PendingEntry {
    pub fn create(target: DocumentId, attributes: Attributes) -> Self {
        Self {
            kind: OpKind::Create,
            target,
            payload: WalPayload::Document { attributes },
        }
    }

    pub fn update(target: DocumentId, patch: Patch, post_image: Attributes) -> Self {
        Self {
            kind: OpKind::Update,
            target,
            payload: WalPayload::Patch { patch, post_image },
        }
    }

    pub fn delete(target: DocumentId) -> Self {
        Self {
            kind: OpKind::Delete,
            target,
            payload: WalPayload::Tombstone,
        }
    }
}

/// A logged mutation
#[derive(Debug, Clone, PartialEq)]
pub struct WalEntry {
    /// Monotonic, gapless, never reused
    pub sequence: u64,
    /// Owning transaction, if any
    pub txn_id: Option<u64>,
    /// Number of entries in the owning transaction's batch (1 when alone)
    pub batch_len: u32,
    pub kind: OpKind,
    pub target: DocumentId,
    pub payload: WalPayload,
}

impl WalEntry {
    /// Document state after this entry; `None` for deletes
    pub fn post_image(&self) -> Option<&Attributes> {
        match &self.payload {
            WalPayload::Document { attributes } => Some(attributes),
            WalPayload::Patch { post_image, .. } => Some(post_image),
            WalPayload::Tombstone => None,
        }
    }

    pub fn patch(&self) -> Option<&Patch> {
        match &self.payload {
            WalPayload::Patch { patch, .. } => Some(patch),
            _ => None,
        }
    }

    /// Encode into a complete frame
    pub fn encode(&self, cipher: &PayloadCipher) -> WalResult<Vec<u8>> {
        let json = serde_json::to_vec(&self.payload).map_err(|e| {
            WalError::append_failed(
                "failed to serialize WAL payload",
                io::Error::new(io::ErrorKind::InvalidData, e),
            )
        })?;
        let sealed = cipher.seal(&json).map_err(|e| {
            WalError::append_failed(
                "failed to seal WAL payload",
                io::Error::new(io::ErrorKind::Other, e),
            )
        })?;

        let mut body = BodyWriter::new();
        body.put_u64(self.sequence)
            .put_u64(self.txn_id.unwrap_or(0))
            .put_u32(self.batch_len)
            .put_u8(self.kind.as_u8())
            .put_str(self.target.as_str())
            .put_bytes(&sealed);
        Ok(body.into_frame())
    }

    /// Decode a verified frame body
    pub fn decode(body: &[u8], cipher: &PayloadCipher) -> WalResult<Self> {
        let malformed = |e: io::Error| WalError::corruption(format!("malformed WAL entry: {}", e));

        let mut r = BodyReader::new(body);
        let sequence = r.get_u64().map_err(malformed)?;
        let txn_raw = r.get_u64().map_err(malformed)?;
        let batch_len = r.get_u32().map_err(malformed)?;
        let kind_raw = r.get_u8().map_err(malformed)?;
        let target_raw = r.get_string().map_err(malformed)?;
        let sealed = r.get_bytes().map_err(malformed)?;

        if !r.is_exhausted() {
            return Err(WalError::corruption_at_sequence(
                sequence,
                "trailing bytes in WAL entry",
            ));
        }
        if batch_len == 0 {
            return Err(WalError::corruption_at_sequence(sequence, "zero batch length"));
        }

        let kind = OpKind::from_u8(kind_raw).ok_or_else(|| {
            WalError::corruption_at_sequence(sequence, format!("invalid op kind {}", kind_raw))
        })?;
        let target = DocumentId::parse(&target_raw).map_err(|_| {
            WalError::corruption_at_sequence(sequence, format!("invalid target '{}'", target_raw))
        })?;

        let json = cipher
            .open(&sealed)
            .map_err(|e| WalError::corruption_at_sequence(sequence, e.to_string()))?;
        let payload: WalPayload = serde_json::from_slice(&json).map_err(|e| {
            WalError::corruption_at_sequence(sequence, format!("invalid payload: {}", e))
        })?;

        if !payload.matches_kind(kind) {
            return Err(WalError::corruption_at_sequence(
                sequence,
                format!("payload does not match op kind {:?}", kind),
            ));
        }

        Ok(Self {
            sequence,
            txn_id: if txn_raw == 0 { None } else { Some(txn_raw) },
            batch_len,
            kind,
            target,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_frame, FrameRead};
    use serde_json::json;
    use std::io::Cursor;

    fn attrs(v: serde_json::Value) -> Attributes {
        v.as_object().cloned().unwrap()
    }

    fn update_entry() -> WalEntry {
        WalEntry {
            sequence: 9,
            txn_id: Some(3),
            batch_len: 2,
            kind: OpKind::Update,
            target: DocumentId::parse("USER_1").unwrap(),
            payload: WalPayload::Patch {
                patch: Patch::new().set("name", "Bob"),
                post_image: attrs(json!({"name": "Bob"})),
            },
        }
    }

    fn decode_frame(frame: Vec<u8>, cipher: &PayloadCipher) -> WalResult<WalEntry> {
        let len = frame.len() as u64;
        match read_frame(&mut Cursor::new(frame), len).unwrap() {
            FrameRead::Frame { body, .. } => WalEntry::decode(&body, cipher),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_update_entry_decodes() {
        let cipher = PayloadCipher::disabled();
        let entry = update_entry();
        let decoded = decode_frame(entry.encode(&cipher).unwrap(), &cipher).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.post_image().unwrap()["name"], json!("Bob"));
    }

    #[test]
    fn test_txn_zero_means_none() {
        let cipher = PayloadCipher::disabled();
        let entry = WalEntry {
            sequence: 1,
            txn_id: None,
            batch_len: 1,
            kind: OpKind::Delete,
            target: DocumentId::parse("USER_1").unwrap(),
            payload: WalPayload::Tombstone,
        };
        let decoded = decode_frame(entry.encode(&cipher).unwrap(), &cipher).unwrap();
        assert_eq!(decoded.txn_id, None);
        assert!(decoded.post_image().is_none());
    }

    #[test]
    fn test_wrong_key_is_corruption() {
        let frame = update_entry()
            .encode(&PayloadCipher::from_secret("a"))
            .unwrap();
        let err = decode_frame(frame, &PayloadCipher::from_secret("b")).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_kind_payload_mismatch_rejected() {
        let cipher = PayloadCipher::disabled();
        let mut entry = update_entry();
        entry.kind = OpKind::Delete;
        let err = decode_frame(entry.encode(&cipher).unwrap(), &cipher).unwrap_err();
        assert!(err.is_corruption());
    }
}
