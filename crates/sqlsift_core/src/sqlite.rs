//! SQLite file-format constants and header decoding for the database file and
//! its sidecars (`-wal`, `-shm`, `-journal`, `-backup`).

use crate::error::{CoreError, Result};
use crate::scanner::{read_u16_be, read_u32_be};
use serde::{Deserialize, Serialize};

pub const PLAINTEXT_MAGIC: &[u8; 16] = b"SQLite format 3\0";
pub const HEADER_LEN: usize = 100;
pub const MIN_PAGE_SIZE: u32 = 512;
pub const MAX_PAGE_SIZE: u32 = 65536;

pub const WAL_MAGIC_LE: u32 = 0x377f_0682;
pub const WAL_MAGIC_BE: u32 = 0x377f_0683;
pub const WAL_HEADER_LEN: usize = 32;
pub const WAL_FRAME_HEADER_LEN: usize = 24;
pub const WAL_INDEX_VERSION: u32 = 3_007_000;
pub const JOURNAL_MAGIC: [u8; 8] = [0xd9, 0xd5, 0x05, 0xf9, 0x20, 0xa1, 0x63, 0xd7];

/// B-tree page type bytes that may start the schema page.
pub const LEAF_TABLE_PAGE: u8 = 0x0d;
pub const INTERIOR_TABLE_PAGE: u8 = 0x05;

/// Number of leading bytes read from a sidecar when inspecting it.
pub const SIDECAR_HEAD_LEN: usize = 128;

#[inline]
pub fn is_plaintext(buffer: &[u8]) -> bool {
    buffer.starts_with(PLAINTEXT_MAGIC)
}

#[inline]
pub fn is_valid_page_size(size: u32) -> bool {
    (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&size) && size.is_power_of_two()
}

/// Decodes the two-byte page-size field, where `1` stands for 65536.
#[inline]
pub fn decode_page_size_field(raw: u16) -> u32 {
    if raw == 1 {
        MAX_PAGE_SIZE
    } else {
        raw as u32
    }
}

#[inline]
pub fn encode_page_size_field(size: u32) -> u16 {
    if size >= MAX_PAGE_SIZE {
        1
    } else {
        size as u16
    }
}

/// Page size stored in a plaintext header, if the field holds a legal value.
pub fn header_page_size(buffer: &[u8]) -> Option<u32> {
    let size = decode_page_size_field(read_u16_be(buffer, 16).ok()?);
    is_valid_page_size(size).then_some(size)
}

/// The fields of the 100-byte database header that matter for recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatabaseHeader {
    pub page_size: u32,
    pub write_version: u8,
    pub read_version: u8,
    pub reserved_bytes: u8,
    pub max_payload_fraction: u8,
    pub min_payload_fraction: u8,
    pub leaf_payload_fraction: u8,
    pub change_counter: u32,
    pub page_count: u32,
    pub schema_format: u32,
    pub text_encoding: u32,
    pub version_valid_for: u32,
}

impl DatabaseHeader {
    pub fn parse(page: &[u8]) -> Result<Self> {
        if page.len() < HEADER_LEN {
            return Err(CoreError::Structural {
                offset: 0,
                needed: HEADER_LEN,
                available: page.len(),
            });
        }
        if !is_plaintext(page) {
            return Err(CoreError::InvalidFormat(
                "missing SQLite header magic".to_string(),
            ));
        }
        Ok(Self {
            page_size: decode_page_size_field(read_u16_be(page, 16)?),
            write_version: page[18],
            read_version: page[19],
            reserved_bytes: page[20],
            max_payload_fraction: page[21],
            min_payload_fraction: page[22],
            leaf_payload_fraction: page[23],
            change_counter: read_u32_be(page, 24)?,
            page_count: read_u32_be(page, 28)?,
            schema_format: read_u32_be(page, 44)?,
            text_encoding: read_u32_be(page, 56)?,
            version_valid_for: read_u32_be(page, 92)?,
        })
    }

    /// Checks the invariants every SQLite writer maintains.
    pub fn is_sane(&self) -> bool {
        is_valid_page_size(self.page_size)
            && matches!(self.write_version, 1 | 2)
            && matches!(self.read_version, 1 | 2)
            && self.max_payload_fraction == 64
            && self.min_payload_fraction == 32
            && self.leaf_payload_fraction == 32
            && self.schema_format <= 4
            && self.text_encoding <= 3
    }
}

/// Rewrites bytes 16..32 of a page-1 image with the values SQLite writes for
/// a database of the given geometry. Used when those bytes were overwritten by
/// a 32-byte salt.
pub fn rebuild_header_tail(page: &mut [u8], page_size: u32, reserve: u8, page_count: u32) {
    if page.len() < HEADER_LEN {
        return;
    }
    page[16..18].copy_from_slice(&encode_page_size_field(page_size).to_be_bytes());
    page[18] = 1;
    page[19] = 1;
    page[20] = reserve;
    page[21] = 64;
    page[22] = 32;
    page[23] = 32;
    // A change counter equal to version-valid-for makes SQLite trust the page count.
    let valid_for = [page[92], page[93], page[94], page[95]];
    page[24..28].copy_from_slice(&valid_for);
    page[28..32].copy_from_slice(&page_count.to_be_bytes());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidecarKind {
    Wal,
    Shm,
    Journal,
    Backup,
}

impl SidecarKind {
    pub const ALL: [SidecarKind; 4] = [Self::Wal, Self::Shm, Self::Journal, Self::Backup];

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Wal => "-wal",
            Self::Shm => "-shm",
            Self::Journal => "-journal",
            Self::Backup => "-backup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SidecarEvidence {
    pub kind: SidecarKind,
    pub path: String,
    pub len: u64,
    pub magic_ok: bool,
    pub page_size_hint: Option<u32>,
    pub shares_salt: bool,
}

/// Decodes the leading bytes of a sidecar file.
///
/// `target_head` is the first bytes of the database; a sidecar that carries
/// the same 16-byte salt (a backup copy, or a WAL frame holding page 1) is
/// flagged with `shares_salt`.
pub fn inspect_sidecar(
    kind: SidecarKind,
    path: impl Into<String>,
    len: u64,
    header: &[u8],
    target_head: &[u8],
) -> SidecarEvidence {
    let salt = target_head.get(..16).filter(|s| !is_plaintext(target_head) && s.len() == 16);
    let salt_at = |offset: usize| match (salt, header.get(offset..offset + 16)) {
        (Some(salt), Some(candidate)) => salt == candidate,
        _ => false,
    };

    let (magic_ok, page_size_hint, shares_salt) = match kind {
        SidecarKind::Wal => {
            let magic = read_u32_be(header, 0).ok();
            let magic_ok = matches!(magic, Some(WAL_MAGIC_LE | WAL_MAGIC_BE));
            let page_size = read_u32_be(header, 8).ok().filter(|s| is_valid_page_size(*s));
            (
                magic_ok,
                page_size.filter(|_| magic_ok),
                salt_at(WAL_HEADER_LEN + WAL_FRAME_HEADER_LEN),
            )
        }
        SidecarKind::Shm => {
            let version = header
                .get(..4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
            let magic_ok = version == Some(WAL_INDEX_VERSION);
            let page_size = header
                .get(14..16)
                .map(|b| decode_page_size_field(u16::from_le_bytes([b[0], b[1]])))
                .filter(|s| is_valid_page_size(*s));
            (magic_ok, page_size.filter(|_| magic_ok), false)
        }
        SidecarKind::Journal => {
            let magic_ok = header.starts_with(&JOURNAL_MAGIC);
            let page_size = read_u32_be(header, 24).ok().filter(|s| is_valid_page_size(*s));
            (magic_ok, page_size.filter(|_| magic_ok), false)
        }
        SidecarKind::Backup => {
            let shares = salt_at(0);
            let page_size = if is_plaintext(header) {
                header_page_size(header)
            } else {
                None
            };
            (shares || is_plaintext(header), page_size, shares)
        }
    };

    SidecarEvidence {
        kind,
        path: path.into(),
        len,
        magic_ok,
        page_size_hint,
        shares_salt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_header(page_size: u32) -> Vec<u8> {
        let mut page = vec![0u8; page_size as usize];
        page[..16].copy_from_slice(PLAINTEXT_MAGIC);
        page[16..18].copy_from_slice(&encode_page_size_field(page_size).to_be_bytes());
        page[18] = 1;
        page[19] = 1;
        page[21] = 64;
        page[22] = 32;
        page[23] = 32;
        page[44..48].copy_from_slice(&4u32.to_be_bytes());
        page[56..60].copy_from_slice(&1u32.to_be_bytes());
        page
    }

    #[test]
    fn page_size_field_round_trip_for_64k() {
        assert_eq!(decode_page_size_field(1), 65536);
        assert_eq!(encode_page_size_field(65536), 1);
        assert_eq!(decode_page_size_field(4096), 4096);
    }

    #[test]
    fn header_page_size_rejects_garbage() {
        assert_eq!(header_page_size(&plain_header(4096)), Some(4096));
        let mut garbage = plain_header(4096);
        garbage[16] = 0x13;
        garbage[17] = 0x37;
        assert_eq!(header_page_size(&garbage), None);
        assert_eq!(header_page_size(&[0u8; 10]), None);
    }

    #[test]
    fn parse_and_validate_header() {
        let header = DatabaseHeader::parse(&plain_header(1024)).unwrap();
        assert_eq!(header.page_size, 1024);
        assert!(header.is_sane());

        let mut broken = plain_header(1024);
        broken[21] = 0x99;
        assert!(!DatabaseHeader::parse(&broken).unwrap().is_sane());
        assert!(DatabaseHeader::parse(&[0u8; 100]).is_err());
        assert!(DatabaseHeader::parse(&[0u8; 10]).is_err());
    }

    #[test]
    fn rebuild_tail_restores_sane_header() {
        let mut page = plain_header(4096);
        page[16..32].copy_from_slice(&[0xAB; 16]);
        page[92..96].copy_from_slice(&7u32.to_be_bytes());
        rebuild_header_tail(&mut page, 4096, 80, 12);
        let header = DatabaseHeader::parse(&page).unwrap();
        assert!(header.is_sane());
        assert_eq!(header.reserved_bytes, 80);
        assert_eq!(header.page_count, 12);
        assert_eq!(header.change_counter, 7);
    }

    #[test]
    fn wal_header_hint() {
        let mut wal = vec![0u8; 96];
        wal[..4].copy_from_slice(&WAL_MAGIC_LE.to_be_bytes());
        wal[8..12].copy_from_slice(&4096u32.to_be_bytes());
        let salt = [0x5Au8; 16];
        wal[56..72].copy_from_slice(&salt);
        let mut target = salt.to_vec();
        target.extend_from_slice(&[0u8; 16]);

        let ev = inspect_sidecar(SidecarKind::Wal, "db-wal", 96, &wal, &target);
        assert!(ev.magic_ok);
        assert_eq!(ev.page_size_hint, Some(4096));
        assert!(ev.shares_salt);
    }

    #[test]
    fn shm_and_journal_hints() {
        let mut shm = vec![0u8; 32];
        shm[..4].copy_from_slice(&WAL_INDEX_VERSION.to_le_bytes());
        shm[14..16].copy_from_slice(&1u16.to_le_bytes());
        let ev = inspect_sidecar(SidecarKind::Shm, "db-shm", 32, &shm, &[]);
        assert_eq!(ev.page_size_hint, Some(65536));

        let mut journal = vec![0u8; 32];
        journal[..8].copy_from_slice(&JOURNAL_MAGIC);
        journal[24..28].copy_from_slice(&8192u32.to_be_bytes());
        let ev = inspect_sidecar(SidecarKind::Journal, "db-journal", 32, &journal, &[]);
        assert!(ev.magic_ok);
        assert_eq!(ev.page_size_hint, Some(8192));
    }

    #[test]
    fn unknown_sidecar_bytes_give_no_hint() {
        let junk = vec![0x42u8; 64];
        for kind in SidecarKind::ALL {
            let ev = inspect_sidecar(kind, "x", 64, &junk, &[0x11; 32]);
            assert!(!ev.magic_ok, "{kind:?}");
            assert_eq!(ev.page_size_hint, None);
        }
    }
}
