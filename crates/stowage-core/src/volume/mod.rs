pub mod blocks;
pub mod fileset;
pub mod index;

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// What a remote volume carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeKind {
    /// Fileset manifest (`.dlist`).
    Files,
    /// Block lookup index (`.dindex`).
    Index,
    /// Block payloads (`.dblock`).
    Blocks,
}

impl VolumeKind {
    pub fn extension(self) -> &'static str {
        match self {
            VolumeKind::Files => "dlist",
            VolumeKind::Index => "dindex",
            VolumeKind::Blocks => "dblock",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "dlist" => Some(VolumeKind::Files),
            "dindex" => Some(VolumeKind::Index),
            "dblock" => Some(VolumeKind::Blocks),
            _ => None,
        }
    }
}

impl fmt::Display for VolumeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolumeKind::Files => "Files",
            VolumeKind::Index => "Index",
            VolumeKind::Blocks => "Blocks",
        };
        f.write_str(s)
    }
}

/// A remote name that follows the volume naming scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedVolumeName {
    pub prefix: String,
    pub kind: VolumeKind,
    /// Set for `Files` volumes.
    pub timestamp: Option<DateTime<Utc>>,
    /// Random hex id, set for `Index` and `Blocks` volumes.
    pub id: Option<String>,
}

/// Parse `<prefix>-b<32 hex>.dblock`, `<prefix>-i<32 hex>.dindex` or
/// `<prefix>-<YYYYMMDDTHHMMSSZ>.dlist`. Anything else yields `None`.
pub fn parse_volume_name(name: &str) -> Option<ParsedVolumeName> {
    let (stem, ext) = name.rsplit_once('.')?;
    let kind = VolumeKind::from_extension(ext)?;
    let (prefix, tail) = stem.rsplit_once('-')?;
    if prefix.is_empty() {
        return None;
    }

    let (timestamp, id) = match kind {
        VolumeKind::Files => {
            let ts = NaiveDateTime::parse_from_str(tail, TIMESTAMP_FORMAT).ok()?;
            (Some(ts.and_utc()), None)
        }
        VolumeKind::Index | VolumeKind::Blocks => {
            let marker = if kind == VolumeKind::Index { 'i' } else { 'b' };
            let hex_id = tail.strip_prefix(marker)?;
            if hex_id.len() != 32 || !hex_id.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            (None, Some(hex_id.to_ascii_lowercase()))
        }
    };

    Some(ParsedVolumeName {
        prefix: prefix.to_string(),
        kind,
        timestamp,
        id,
    })
}

/// Generate a fresh name. `Files` volumes are named by `timestamp`, the
/// others get a random 128-bit id.
pub fn generate_volume_name(prefix: &str, kind: VolumeKind, timestamp: DateTime<Utc>) -> String {
    match kind {
        VolumeKind::Files => format!(
            "{prefix}-{}.{}",
            timestamp.format(TIMESTAMP_FORMAT),
            kind.extension()
        ),
        VolumeKind::Index | VolumeKind::Blocks => {
            let mut id = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut id);
            let marker = if kind == VolumeKind::Index { 'i' } else { 'b' };
            format!("{prefix}-{marker}{}.{}", hex::encode(id), kind.extension())
        }
    }
}

/// A serialized volume ready for upload.
#[derive(Debug, Clone)]
pub struct VolumeUpload {
    pub name: String,
    pub kind: VolumeKind,
    pub data: Vec<u8>,
}

/// Human-readable byte count for report messages.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["bytes", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} bytes");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_generated_names() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        for kind in [VolumeKind::Files, VolumeKind::Index, VolumeKind::Blocks] {
            let name = generate_volume_name("stowage", kind, ts);
            let parsed = parse_volume_name(&name).unwrap();
            assert_eq!(parsed.prefix, "stowage");
            assert_eq!(parsed.kind, kind);
            if kind == VolumeKind::Files {
                assert_eq!(name, "stowage-20240301T123005Z.dlist");
                assert_eq!(parsed.timestamp, Some(ts));
            } else {
                assert_eq!(parsed.id.unwrap().len(), 32);
            }
        }
    }

    #[test]
    fn random_ids_differ() {
        let ts = Utc::now();
        assert_ne!(
            generate_volume_name("p", VolumeKind::Blocks, ts),
            generate_volume_name("p", VolumeKind::Blocks, ts)
        );
    }

    #[test]
    fn foreign_prefix_still_parses() {
        let parsed = parse_volume_name("other.set-i0123456789abcdef0123456789abcdef.dindex").unwrap();
        assert_eq!(parsed.prefix, "other.set");
        assert_eq!(parsed.kind, VolumeKind::Index);
    }

    #[test]
    fn unparseable_names() {
        for name in [
            "readme.txt",
            "stowage-b1234.dblock",
            "stowage-i0123456789abcdef0123456789abcdef.dblock",
            "stowage-2024.dlist",
            "-b0123456789abcdef0123456789abcdef.dblock",
            "stowage.dblock",
        ] {
            assert!(parse_volume_name(name).is_none(), "{name}");
        }
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(12), "12 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }
}
