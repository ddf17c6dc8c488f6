//! Discovery of the files SQLite and SQLCipher leave next to a database.

use crate::reader::DiskReader;
use sqlsift_core::sqlite::{inspect_sidecar, SidecarEvidence, SidecarKind, SIDECAR_HEAD_LEN};
use sqlsift_core::{BlockSource, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// `<target>-wal`, `<target>-shm` and so on.
pub fn sidecar_path(target: &Path, kind: SidecarKind) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(kind.suffix());
    PathBuf::from(name)
}

/// Inspects every sidecar that exists next to `target`.
///
/// Missing sidecars are skipped; one that exists but cannot be read is an
/// error, since it usually means the evidence directory has bad permissions.
pub fn discover(target: &Path, target_head: &[u8]) -> Result<Vec<SidecarEvidence>> {
    let mut found = Vec::new();
    for kind in SidecarKind::ALL {
        let path = sidecar_path(target, kind);
        if !path.is_file() {
            continue;
        }
        found.push(inspect(kind, &path, target_head)?);
    }
    Ok(found)
}

pub fn inspect(kind: SidecarKind, path: &Path, target_head: &[u8]) -> Result<SidecarEvidence> {
    let mut reader = DiskReader::new(path)?;
    let mut head = vec![0u8; SIDECAR_HEAD_LEN];
    let read = reader.read_full(0, &mut head)?;
    head.truncate(read);
    Ok(inspect_sidecar(
        kind,
        path.display().to_string(),
        reader.size(),
        &head,
        target_head,
    ))
}
