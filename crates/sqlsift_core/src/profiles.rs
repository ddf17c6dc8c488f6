//! Fingerprints of application databases seen in earlier cases.
//!
//! A known header does not identify the key, but it narrows the matrix: each
//! profile carries the page size and KDF iteration counts its application
//! was observed to use.

use crate::layout::PageSizeHint;
use crate::sqlite::is_valid_page_size;
use serde::Serialize;

/// Where in the first bytes of the file a profile's signature sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Signature {
    /// The file starts with these bytes.
    Prefix(&'static [u8]),
    /// `needle` occurs inside `[start, end)` of the file.
    Within {
        start: usize,
        end: usize,
        needle: &'static [u8],
    },
}

impl Signature {
    pub fn matches(&self, head: &[u8]) -> bool {
        match *self {
            Self::Prefix(prefix) => head.starts_with(prefix),
            Self::Within { start, end, needle } => {
                let end = end.min(head.len());
                head.get(start..end)
                    .is_some_and(|region| region.windows(needle.len()).any(|w| w == needle))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseProfile {
    pub name: &'static str,
    /// Any one of these identifies the profile.
    pub signatures: &'static [Signature],
    pub page_size: Option<u32>,
    pub kdf_iterations: &'static [u32],
}

impl DatabaseProfile {
    pub fn matches(&self, head: &[u8]) -> bool {
        self.signatures.iter().any(|s| s.matches(head))
    }

    pub fn page_size_hint(&self) -> Option<PageSizeHint> {
        self.page_size
            .filter(|size| is_valid_page_size(*size))
            .map(|size| PageSizeHint::new(size, format!("profile:{}", self.name)))
    }
}

const KEYVALUE_MAGIC: [u8; 16] = [
    0x53, 0xf5, 0xc7, 0xc5, 0x6b, 0x6c, 0x98, 0xc9, 0xd9, 0x21, 0x44, 0x1f, 0x64, 0x02, 0xbb, 0x38,
];

const MESSAGE_MAGIC: [u8; 16] = [
    0x85, 0x41, 0x67, 0x1c, 0x1a, 0x23, 0x95, 0xcd, 0x69, 0x0a, 0xe0, 0xb1, 0x78, 0x11, 0x19, 0xb3,
];

static BUILTIN: [DatabaseProfile; 3] = [
    DatabaseProfile {
        name: "cache",
        signatures: &[
            Signature::Within {
                start: 56,
                end: 64,
                needle: b"aes",
            },
            Signature::Within {
                start: 64,
                end: 72,
                needle: b"CBC",
            },
        ],
        page_size: Some(4096),
        kdf_iterations: &[64000, 4000],
    },
    DatabaseProfile {
        name: "keyvalue",
        signatures: &[Signature::Prefix(&KEYVALUE_MAGIC)],
        page_size: None,
        kdf_iterations: &[64000, 4000],
    },
    DatabaseProfile {
        name: "message",
        signatures: &[Signature::Prefix(&MESSAGE_MAGIC)],
        page_size: None,
        kdf_iterations: &[64000, 4000],
    },
];

pub fn builtin() -> &'static [DatabaseProfile] {
    &BUILTIN
}

/// The first built-in profile whose signature matches `head`.
pub fn identify(head: &[u8]) -> Option<&'static DatabaseProfile> {
    BUILTIN.iter().find(|p| p.matches(head))
}
