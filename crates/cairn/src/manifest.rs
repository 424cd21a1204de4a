//! Archive manifests: point-in-time descriptions of a directory tree.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::MetadataExt;

use cairn_store::Metadata;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::id::ContentId;

/// Length of a manifest identity in hex characters (SHA-256).
pub const MANIFEST_ID_HEX_LEN: usize = 64;

/// Kind of a recorded tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Dir,
    Symlink,
    /// Block device, char device, fifo, socket
    Other,
}

impl From<fs::FileType> for FileType {
    fn from(file_type: fs::FileType) -> Self {
        if file_type.is_file() {
            FileType::File
        } else if file_type.is_dir() {
            FileType::Dir
        } else if file_type.is_symlink() {
            FileType::Symlink
        } else {
            FileType::Other
        }
    }
}

type StatTuple = (i64, i64, i64, u32, u32, u32, u64);

/// Filesystem attributes of an entry.
///
/// Times are nanoseconds since the Unix epoch. Serialized as the tuple
/// `[mtime, atime, ctime, uid, gid, mode, size]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StatTuple", into = "StatTuple")]
pub struct Stat {
    pub mtime: i64,
    pub atime: i64,
    pub ctime: i64,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub size: u64,
}

impl From<StatTuple> for Stat {
    fn from((mtime, atime, ctime, uid, gid, mode, size): StatTuple) -> Self {
        Self {
            mtime,
            atime,
            ctime,
            uid,
            gid,
            mode,
            size,
        }
    }
}

impl From<Stat> for StatTuple {
    fn from(s: Stat) -> Self {
        (s.mtime, s.atime, s.ctime, s.uid, s.gid, s.mode, s.size)
    }
}

fn nanos(secs: i64, nsecs: i64) -> i64 {
    secs.saturating_mul(1_000_000_000).saturating_add(nsecs)
}

/// First attribute found to differ between a recorded and a current stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    Mtime,
    Ctime,
    Uid,
    Gid,
    Mode,
    Size,
}

impl ChangeReason {
    pub fn label(self) -> &'static str {
        match self {
            ChangeReason::Mtime => "MTIME",
            ChangeReason::Ctime => "CTIME",
            ChangeReason::Uid => "UID",
            ChangeReason::Gid => "GID",
            ChangeReason::Mode => "MODE",
            ChangeReason::Size => "SIZE",
        }
    }
}

impl Stat {
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        Self {
            mtime: nanos(metadata.mtime(), metadata.mtime_nsec()),
            atime: nanos(metadata.atime(), metadata.atime_nsec()),
            ctime: nanos(metadata.ctime(), metadata.ctime_nsec()),
            uid: metadata.uid(),
            gid: metadata.gid(),
            mode: metadata.mode(),
            size: metadata.size(),
        }
    }

    /// Compare against `current` in the order mtime, ctime, uid, gid, mode,
    /// size and return the first mismatch. Access time is never compared.
    pub fn first_difference(&self, current: &Stat) -> Option<ChangeReason> {
        if self.mtime != current.mtime {
            Some(ChangeReason::Mtime)
        } else if self.ctime != current.ctime {
            Some(ChangeReason::Ctime)
        } else if self.uid != current.uid {
            Some(ChangeReason::Uid)
        } else if self.gid != current.gid {
            Some(ChangeReason::Gid)
        } else if self.mode != current.mode {
            Some(ChangeReason::Mode)
        } else if self.size != current.size {
            Some(ChangeReason::Size)
        } else {
            None
        }
    }
}

/// One recorded path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Recipe checksum; `None` for anything but regular files
    pub checksum: Option<ContentId>,
    pub stat: Stat,
    pub filetype: FileType,
    /// Link target, for symlinks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// One backup snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Root directory that was snapshotted
    pub path: String,
    /// Absolute path to entry
    pub filedata: BTreeMap<String, Entry>,
    pub hostname: String,
    pub tag: String,
    pub datetime: Timestamp,
    pub starttime: Timestamp,
    pub stoptime: Option<Timestamp>,
    pub totalcount: u64,
    pub totalsize: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Manifest {
    pub fn new(path: impl Into<String>, hostname: impl Into<String>, tag: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            path: path.into(),
            filedata: BTreeMap::new(),
            hostname: hostname.into(),
            tag: tag.into(),
            datetime: now,
            starttime: now,
            stoptime: None,
            totalcount: 0,
            totalsize: 0,
            checksum: None,
        }
    }

    /// Recompute `totalcount` and `totalsize` over every recorded entry.
    pub fn recount(&mut self) {
        self.totalcount = self.filedata.len() as u64;
        self.totalsize = self.filedata.values().map(|e| e.stat.size).sum();
    }

    /// SHA-256 over the sorted-key JSON of every field except `checksum`.
    pub fn compute_checksum(&self) -> Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let serde_json::Value::Object(map) = &mut value {
            map.remove("checksum");
        }
        // serde_json maps are ordered by key
        let canonical = serde_json::to_vec(&value)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }

    /// Queryable side metadata for the stored object.
    pub fn side_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("hostname".into(), self.hostname.clone());
        metadata.insert("tag".into(), self.tag.clone());
        metadata.insert("datetime".into(), self.datetime.to_string());
        metadata
    }

    /// Gzip-compressed JSON body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, self)?;
        encoder.flush()?;
        Ok(encoder.finish()?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_reader(GzDecoder::new(data))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat() -> Stat {
        Stat {
            mtime: 10,
            atime: 11,
            ctime: 12,
            uid: 1000,
            gid: 100,
            mode: 0o100644,
            size: 5,
        }
    }

    fn manifest() -> Manifest {
        let mut m = Manifest::new("/data", "box", "data");
        m.filedata.insert(
            "/data/a".into(),
            Entry {
                checksum: Some(ContentId::hash(b"a")),
                stat: stat(),
                filetype: FileType::File,
                target: None,
            },
        );
        m.filedata.insert(
            "/data/d".into(),
            Entry {
                checksum: None,
                stat: Stat { size: 4096, ..stat() },
                filetype: FileType::Dir,
                target: None,
            },
        );
        m.recount();
        m
    }

    #[test]
    fn stat_serializes_as_tuple() {
        let json = serde_json::to_string(&stat()).unwrap();
        assert_eq!(json, "[10,11,12,1000,100,33188,5]");
        assert_eq!(serde_json::from_str::<Stat>(&json).unwrap(), stat());
    }

    #[test]
    fn first_difference_priority() {
        let old = stat();
        assert_eq!(old.first_difference(&old), None);

        // atime alone is not a change
        let touched = Stat { atime: 99, ..old };
        assert_eq!(old.first_difference(&touched), None);

        // mtime wins over everything else that changed
        let all = Stat {
            mtime: 1,
            ctime: 1,
            uid: 1,
            gid: 1,
            mode: 1,
            size: 1,
            ..old
        };
        assert_eq!(old.first_difference(&all), Some(ChangeReason::Mtime));

        let later = Stat { gid: 1, mode: 1, size: 1, ..old };
        assert_eq!(old.first_difference(&later), Some(ChangeReason::Gid));
        assert_eq!(
            old.first_difference(&Stat { size: 9, ..old }),
            Some(ChangeReason::Size)
        );
    }

    #[test]
    fn recount_sums_every_entry() {
        let m = manifest();
        assert_eq!(m.totalcount, 2);
        assert_eq!(m.totalsize, 5 + 4096);
    }

    #[test]
    fn checksum_ignores_checksum_field() {
        let mut m = manifest();
        let first = m.compute_checksum().unwrap();
        assert_eq!(first.len(), MANIFEST_ID_HEX_LEN);

        m.checksum = Some(first.clone());
        assert_eq!(m.compute_checksum().unwrap(), first);

        m.tag = "other".into();
        assert_ne!(m.compute_checksum().unwrap(), first);
    }

    #[test]
    fn encode_decode() {
        let m = manifest();
        let body = m.encode().unwrap();
        // gzip magic
        assert_eq!(&body[..2], &[0x1f, 0x8b]);
        assert_eq!(Manifest::decode(&body).unwrap(), m);
    }

    #[test]
    fn entry_json_shape() {
        let value = serde_json::to_value(&manifest()).unwrap();
        assert!(value["filedata"]["/data/d"]["checksum"].is_null());
        assert_eq!(value["filedata"]["/data/d"]["filetype"], "dir");
        assert!(value["filedata"]["/data/a"].get("target").is_none());
        assert_eq!(value["totalcount"], 2);
    }
}
