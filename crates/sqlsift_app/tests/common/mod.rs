#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sqlsift::SearchConfig;
use sqlsift_core::cipher::seal_database;
use sqlsift_core::matrix::{CipherVersion, HmacAlgorithm, KdfAlgorithm};
use sqlsift_core::{CipherConfig, MatrixDimensions};
use std::fs;
use std::path::{Path, PathBuf};

pub const PAGE_SIZE: u32 = 1024;
pub const TABLE: &str = "secrets";
pub const PASSPHRASE: &[u8] = b"m9Qz4LxV7tRb2WcN8pHs5JdK3fGy6Ea1";

/// SQLCipher 4 layout with a two-round KDF so tests stay fast.
pub fn fast_v4() -> CipherConfig {
    CipherConfig {
        kdf_iterations: 2,
        ..CipherConfig::v4(PAGE_SIZE)
    }
}

pub fn fast_v3() -> CipherConfig {
    CipherConfig {
        kdf_iterations: 2,
        ..CipherConfig::v3(PAGE_SIZE)
    }
}

/// Search settings restricted to the fast configurations above.
pub fn search_config() -> SearchConfig {
    let mut config = SearchConfig::default();
    config.matrix = MatrixDimensions {
        versions: vec![CipherVersion::V3, CipherVersion::V4],
        page_sizes: vec![PAGE_SIZE],
        kdf_algorithms: vec![KdfAlgorithm::Pbkdf2HmacSha1, KdfAlgorithm::Pbkdf2HmacSha512],
        kdf_iterations: vec![2],
        hmac_algorithms: vec![HmacAlgorithm::HmacSha1, HmacAlgorithm::HmacSha512],
        salt_sizes: vec![16],
    };
    config.entropy.max_per_length = 4;
    config.expansion.max_candidates = 128;
    config.harness.workers = 2;
    config.harness.attempt_timeout_ms = 10_000;
    config.harness.cancel_grace_ms = 100;
    config
}

fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    let mut groups = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        groups.push((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
    groups.reverse();
    out.extend_from_slice(&groups);
}

/// A `sqlite_schema` row describing one table rooted at page 2.
fn schema_record(table: &str, sql: &str) -> Vec<u8> {
    let mut types = Vec::new();
    put_varint(&mut types, 2 * 5 + 13); // "table"
    put_varint(&mut types, 2 * table.len() as u64 + 13);
    put_varint(&mut types, 2 * table.len() as u64 + 13);
    put_varint(&mut types, 1);
    put_varint(&mut types, 2 * sql.len() as u64 + 13);

    let mut record = vec![(types.len() + 1) as u8];
    record.extend_from_slice(&types);
    record.extend_from_slice(b"table");
    record.extend_from_slice(table.as_bytes());
    record.extend_from_slice(table.as_bytes());
    record.push(2);
    record.extend_from_slice(sql.as_bytes());
    record
}

/// A two-page plaintext database holding one empty table, with `reserve`
/// bytes kept free at the end of every page.
pub fn plain_database(reserve: usize) -> Vec<u8> {
    let size = PAGE_SIZE as usize;
    let usable = size - reserve;
    let mut db = vec![0u8; size * 2];

    let header = &mut db[..100];
    header[..16].copy_from_slice(b"SQLite format 3\0");
    header[16..18].copy_from_slice(&(PAGE_SIZE as u16).to_be_bytes());
    header[18] = 1;
    header[19] = 1;
    header[20] = reserve as u8;
    header[21] = 64;
    header[22] = 32;
    header[23] = 32;
    header[24..28].copy_from_slice(&1u32.to_be_bytes());
    header[28..32].copy_from_slice(&2u32.to_be_bytes());
    header[40..44].copy_from_slice(&1u32.to_be_bytes());
    header[44..48].copy_from_slice(&4u32.to_be_bytes());
    header[56..60].copy_from_slice(&1u32.to_be_bytes());
    header[92..96].copy_from_slice(&1u32.to_be_bytes());
    header[96..100].copy_from_slice(&3_045_000u32.to_be_bytes());

    let record = schema_record(TABLE, &format!("CREATE TABLE {TABLE}(k TEXT, v BLOB)"));
    let mut cell = Vec::new();
    put_varint(&mut cell, record.len() as u64);
    put_varint(&mut cell, 1);
    cell.extend_from_slice(&record);
    let cell_start = usable - cell.len();

    let page1 = &mut db[..size];
    page1[100] = 0x0d;
    page1[103..105].copy_from_slice(&1u16.to_be_bytes());
    page1[105..107].copy_from_slice(&(cell_start as u16).to_be_bytes());
    page1[108..110].copy_from_slice(&(cell_start as u16).to_be_bytes());
    page1[cell_start..usable].copy_from_slice(&cell);

    let page2 = &mut db[size..];
    page2[0] = 0x0d;
    page2[5..7].copy_from_slice(&(usable as u16).to_be_bytes());
    db
}

/// Encrypts the fixture database with `passphrase` under `config`.
pub fn sealed_database(passphrase: &[u8], config: &CipherConfig, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut salt = [0u8; 16];
    rng.fill_bytes(&mut salt);
    sealed_database_with_salt(passphrase, config, &salt, seed)
}

/// Like [`sealed_database`], with the leading salt chosen by the caller.
pub fn sealed_database_with_salt(
    passphrase: &[u8],
    config: &CipherConfig,
    salt: &[u8; 16],
    seed: u64,
) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let plain = plain_database(config.reserve_size());
    seal_database(&plain, passphrase, config, salt, &mut rng).unwrap()
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

/// A minimal WAL header advertising the fixture page size.
pub fn wal_header(salt_source: &[u8]) -> Vec<u8> {
    let mut wal = vec![0u8; 128];
    wal[..4].copy_from_slice(&0x377f_0682u32.to_be_bytes());
    wal[4..8].copy_from_slice(&3_007_000u32.to_be_bytes());
    wal[8..12].copy_from_slice(&PAGE_SIZE.to_be_bytes());
    wal[56..72].copy_from_slice(&salt_source[..16]);
    wal
}

/// Application data in which the key sits right after a `KEY` label.
pub fn config_blob_with_key(key: &[u8]) -> Vec<u8> {
    let mut blob = b"[settings]\nsync=enabled\nretries=3\ntheme=dark;lang=en-GB;".to_vec();
    blob.extend_from_slice(b"KEY");
    blob.extend_from_slice(key);
    blob.extend_from_slice(b"\n[end]\n");
    blob
}
