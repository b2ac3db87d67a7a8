//! WAL reading and replay
//!
//! The log is a directory of files named by the first sequence number they
//! hold (`wal-<seq>.log`). Replay walks them in order and yields entries
//! lazily, validating checksums, payloads and sequence continuity. Any
//! damage surfaces as `TIER_WAL_CORRUPTION`; repairing a torn tail is the
//! writer's job at open, never the reader's.

use std::fs::{self, File};
use std::io::{self, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::codec::{read_frame, FrameRead};
use crate::crypto::PayloadCipher;

use super::errors::{WalError, WalResult};
use super::record::WalEntry;

const WAL_PREFIX: &str = "wal-";
const WAL_SUFFIX: &str = ".log";

/// File name for a WAL file whose first entry is `first_sequence`
pub fn wal_file_name(first_sequence: u64) -> String {
    format!("{}{:020}{}", WAL_PREFIX, first_sequence, WAL_SUFFIX)
}

fn parse_wal_file_name(name: &str) -> Option<u64> {
    name.strip_prefix(WAL_PREFIX)?
        .strip_suffix(WAL_SUFFIX)?
        .parse()
        .ok()
}

/// A WAL file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalFile {
    pub first_sequence: u64,
    pub path: PathBuf,
}

/// List WAL files in `wal_dir`, ordered by first sequence number.
/// A missing directory is an empty log.
pub fn list_wal_files(wal_dir: &Path) -> WalResult<Vec<WalFile>> {
    let entries = match fs::read_dir(wal_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(WalError::append_failed(
                format!("failed to list WAL directory {}", wal_dir.display()),
                e,
            ))
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| WalError::append_failed("failed to read WAL directory", e))?;
        let name = entry.file_name();
        if let Some(first_sequence) = name.to_str().and_then(parse_wal_file_name) {
            files.push(WalFile {
                first_sequence,
                path: entry.path(),
            });
        }
    }
    files.sort_by_key(|f| f.first_sequence);
    Ok(files)
}

/// One step of a frame-level scan
#[derive(Debug)]
pub enum FrameStep {
    /// A decoded entry starting at `offset`
    Entry { entry: WalEntry, offset: u64 },
    /// Clean end of file
    End,
    /// Unreadable frame at `offset`. `at_tail` is true when nothing valid can
    /// follow it: the frame is cut short or is the file's last frame.
    Damaged {
        offset: u64,
        reason: String,
        at_tail: bool,
    },
}

/// Sequential reader over a single WAL file
pub struct WalFileReader {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    file_size: u64,
    cipher: PayloadCipher,
}

impl WalFileReader {
    pub fn open(path: &Path, cipher: PayloadCipher) -> WalResult<Self> {
        let file = File::open(path).map_err(|e| {
            WalError::corruption(format!("failed to open WAL file {}: {}", path.display(), e))
        })?;
        let file_size = file
            .metadata()
            .map_err(|e| WalError::corruption(format!("failed to read WAL metadata: {}", e)))?
            .len();

        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            offset: 0,
            file_size,
            cipher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    fn file_label(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Read the next frame, classifying damage instead of failing on it.
    /// Payload-level failures (bad key, bad JSON) are errors: the frame
    /// itself is intact, so they are never mistaken for a torn write.
    pub fn next_frame(&mut self) -> WalResult<FrameStep> {
        let start = self.offset;
        let remaining = self.file_size - start;

        let read = read_frame(&mut self.reader, remaining).map_err(|e| {
            WalError::corruption_at_offset(&self.file_label(), start, format!("read failed: {}", e))
        })?;

        match read {
            FrameRead::Eof => Ok(FrameStep::End),
            FrameRead::Truncated => Ok(FrameStep::Damaged {
                offset: start,
                reason: "frame truncated".into(),
                at_tail: true,
            }),
            FrameRead::Corrupt { reason, frame_len } => Ok(FrameStep::Damaged {
                offset: start,
                reason,
                at_tail: start + frame_len >= self.file_size,
            }),
            FrameRead::Frame { body, frame_len } => {
                let entry = WalEntry::decode(&body, &self.cipher)?;
                self.offset += frame_len;
                Ok(FrameStep::Entry {
                    entry,
                    offset: start,
                })
            }
        }
    }

    /// Read the next entry. Any damage is corruption.
    pub fn read_next(&mut self) -> WalResult<Option<WalEntry>> {
        match self.next_frame()? {
            FrameStep::Entry { entry, .. } => Ok(Some(entry)),
            FrameStep::End => Ok(None),
            FrameStep::Damaged { offset, reason, .. } => Err(WalError::corruption_at_offset(
                &self.file_label(),
                offset,
                reason,
            )),
        }
    }

    /// Rewind to the start of the file
    pub fn reset(&mut self) -> WalResult<()> {
        self.reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| WalError::corruption(format!("failed to rewind WAL file: {}", e)))?;
        self.offset = 0;
        Ok(())
    }
}

/// Reader over the whole WAL directory
pub struct WalReader {
    wal_dir: PathBuf,
    cipher: PayloadCipher,
}

impl WalReader {
    pub fn new(wal_dir: &Path, cipher: PayloadCipher) -> Self {
        Self {
            wal_dir: wal_dir.to_path_buf(),
            cipher,
        }
    }

    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    /// Lazily replay entries with sequence ≥ `from_sequence`. Each call
    /// starts a fresh pass, so replay is restartable.
    pub fn replay(&self, from_sequence: u64) -> WalResult<WalReplay> {
        let files = list_wal_files(&self.wal_dir)?;

        // Files wholly below `from_sequence` are skipped without opening
        let mut start = 0;
        for (i, window) in files.windows(2).enumerate() {
            if window[1].first_sequence <= from_sequence {
                start = i + 1;
            }
        }

        Ok(WalReplay {
            files: files.into_iter().skip(start).collect(),
            next_file: 0,
            current: None,
            from_sequence,
            expected: None,
            cipher: self.cipher.clone(),
            finished: false,
        })
    }

    /// Read every entry into memory
    pub fn read_all(&self) -> WalResult<Vec<WalEntry>> {
        self.replay(0)?.collect()
    }
}

/// Lazy, finite iterator over WAL entries
pub struct WalReplay {
    files: Vec<WalFile>,
    next_file: usize,
    current: Option<WalFileReader>,
    from_sequence: u64,
    expected: Option<u64>,
    cipher: PayloadCipher,
    finished: bool,
}

impl WalReplay {
    fn advance(&mut self) -> WalResult<Option<WalEntry>> {
        loop {
            if self.current.is_none() {
                let Some(file) = self.files.get(self.next_file) else {
                    return Ok(None);
                };
                self.next_file += 1;
                self.current = Some(WalFileReader::open(&file.path, self.cipher.clone())?);
            }

            let Some(reader) = self.current.as_mut() else {
                continue;
            };
            let Some(entry) = reader.read_next()? else {
                self.current = None;
                continue;
            };

            if let Some(expected) = self.expected {
                if entry.sequence != expected {
                    return Err(WalError::corruption_at_sequence(
                        entry.sequence,
                        format!("non-sequential entry: expected {}", expected),
                    ));
                }
            }
            self.expected = Some(entry.sequence + 1);

            if entry.sequence >= self.from_sequence {
                return Ok(Some(entry));
            }
        }
    }
}

impl Iterator for WalReplay {
    type Item = WalResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_round_trip() {
        let name = wal_file_name(42);
        assert_eq!(name, "wal-00000000000000000042.log");
        assert_eq!(parse_wal_file_name(&name), Some(42));
        assert_eq!(parse_wal_file_name("wal-x.log"), None);
        assert_eq!(parse_wal_file_name("seg-1.dat"), None);
    }

    #[test]
    fn test_missing_directory_is_empty_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let reader = WalReader::new(&dir.path().join("absent"), PayloadCipher::disabled());
        assert!(reader.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_listing_ignores_foreign_files() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join(wal_file_name(10)), b"").unwrap();
        fs::write(dir.path().join(wal_file_name(1)), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let files = list_wal_files(dir.path()).unwrap();
        let firsts: Vec<u64> = files.iter().map(|f| f.first_sequence).collect();
        assert_eq!(firsts, vec![1, 10]);
    }
}
