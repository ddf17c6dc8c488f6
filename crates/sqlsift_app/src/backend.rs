//! Native trial backend: decrypt with the candidate key and ask SQLite to
//! list the tables of the result.

use dashmap::DashMap;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use sha2::{Digest, Sha256};
use sqlsift_core::cipher::{derive_keys, first_page_is_plausible, DerivedKeys, PageCodec};
use sqlsift_core::matrix::KdfAlgorithm;
use sqlsift_core::sqlite;
use sqlsift_core::{
    CancelToken, CipherConfig, CoreError, KeyCandidate, TrialBackend, TrialOutcome, TrialRequest,
};
use sqlsift_io::DiskReader;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

const TABLES_QUERY: &str = "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name";
const DECRYPTED_NAME: &str = "decrypted.db";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeyCacheKey {
    passphrase_digest: [u8; 32],
    kdf: KdfAlgorithm,
    iterations: u32,
    with_hmac: bool,
    salt: Vec<u8>,
}

/// Why a page run stopped before writing every page.
enum Interrupted {
    Rejected,
    Cancelled,
    Io(std::io::Error),
    Core(CoreError),
}

impl From<std::io::Error> for Interrupted {
    fn from(e: std::io::Error) -> Self {
        Interrupted::Io(e)
    }
}

impl From<CoreError> for Interrupted {
    fn from(e: CoreError) -> Self {
        Interrupted::Core(e)
    }
}

/// A target whose page 1 decrypted and passed the header check.
struct Unlocked {
    reader: DiskReader,
    keys: Arc<DerivedKeys>,
    first_page: Vec<u8>,
    page_count: u64,
}

pub struct SqlCipherBackend {
    keys: DashMap<KeyCacheKey, Arc<DerivedKeys>>,
    scratch_dir: Option<PathBuf>,
}

impl Default for SqlCipherBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCipherBackend {
    pub fn new() -> Self {
        Self {
            keys: DashMap::new(),
            scratch_dir: None,
        }
    }

    /// Places the private decrypted copies under `dir` instead of the system
    /// temporary directory.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn cached_keys(&self) -> usize {
        self.keys.len()
    }

    fn keys_for(&self, passphrase: &[u8], salt: &[u8], config: &CipherConfig) -> Arc<DerivedKeys> {
        let key = KeyCacheKey {
            passphrase_digest: Sha256::digest(passphrase).into(),
            kdf: config.kdf_algorithm,
            iterations: config.kdf_iterations,
            with_hmac: config.version.has_hmac(),
            salt: salt.to_vec(),
        };
        if let Some(found) = self.keys.get(&key) {
            return Arc::clone(found.value());
        }
        let derived = Arc::new(derive_keys(passphrase, salt, config));
        Arc::clone(self.keys.entry(key).or_insert(derived).value())
    }

    /// Derives the keys for `candidate` and checks that page 1 authenticates
    /// and decodes to a plausible header. Nothing is written yet.
    fn unlock(
        &self,
        target: &Path,
        candidate: &KeyCandidate,
        config: &CipherConfig,
        token: &CancelToken,
    ) -> Result<Unlocked, Interrupted> {
        let page_size = config.page_size as usize;
        let mut reader = DiskReader::new(target)?;
        let first = reader.read_page(1, page_size)?;
        if sqlite::is_plaintext(&first) || first.len() < page_size {
            return Err(Interrupted::Rejected);
        }

        let passphrase = candidate.passphrase();
        let keys = self.keys_for(&passphrase, &first[..config.salt_size], config);
        if token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }

        let page_count = reader.page_count(page_size);
        let first_page = {
            let codec = PageCodec::new(&keys, config)?
                .with_page_count(u32::try_from(page_count).unwrap_or(u32::MAX));
            codec
                .decrypt_page(1, &first)
                .map_err(|_| Interrupted::Rejected)?
        };
        if !first_page_is_plausible(&first_page, config) {
            return Err(Interrupted::Rejected);
        }

        Ok(Unlocked {
            reader,
            keys,
            first_page,
            page_count,
        })
    }

    /// Writes the unlocked database to `out`. Later pages that fail to
    /// decrypt are written as zeros and counted.
    fn write_pages(
        &self,
        mut unlocked: Unlocked,
        config: &CipherConfig,
        token: &CancelToken,
        out: &mut impl Write,
    ) -> Result<usize, Interrupted> {
        let page_size = config.page_size as usize;
        let page_count = unlocked.page_count;
        let codec = PageCodec::new(&unlocked.keys, config)?
            .with_page_count(u32::try_from(page_count).unwrap_or(u32::MAX));
        out.write_all(&unlocked.first_page)?;

        let mut damaged = 0usize;
        let zeros = vec![0u8; page_size];
        for pgno in 2..=page_count {
            if token.is_cancelled() {
                return Err(Interrupted::Cancelled);
            }
            let Ok(pgno) = u32::try_from(pgno) else {
                break;
            };
            let page = unlocked.reader.read_page(pgno, page_size)?;
            if page.len() < page_size {
                trace!(pgno, len = page.len(), "ignoring trailing partial page");
                break;
            }
            match codec.decrypt_page(pgno, &page) {
                Ok(plain) => out.write_all(&plain)?,
                Err(_) => {
                    damaged += 1;
                    out.write_all(&zeros)?;
                }
            }
        }
        out.flush()?;
        Ok(damaged)
    }

    /// Writes the decrypted database for a known-good pair to `dest`.
    pub fn export(
        &self,
        target: &Path,
        candidate: &KeyCandidate,
        config: &CipherConfig,
        dest: &Path,
    ) -> Result<usize, CoreError> {
        let token = CancelToken::new();
        let written = self.unlock(target, candidate, config, &token).and_then(|unlocked| {
            let mut out = BufWriter::new(File::create(dest)?);
            self.write_pages(unlocked, config, &token, &mut out)
        });
        match written {
            Ok(damaged) => Ok(damaged),
            Err(Interrupted::Io(e)) => Err(CoreError::Io(e)),
            Err(Interrupted::Core(e)) => Err(e),
            Err(Interrupted::Rejected | Interrupted::Cancelled) => Err(CoreError::Cipher(
                "key and configuration do not decrypt the target".to_string(),
            )),
        }
    }

    fn scratch(&self) -> std::io::Result<tempfile::TempDir> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("sqlsift-");
            b
        };
        match &self.scratch_dir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
    }
}

fn sqlite_uri(path: &Path) -> String {
    let mut uri = String::from("file:");
    for ch in path.to_string_lossy().chars() {
        match ch {
            '%' => uri.push_str("%25"),
            '?' => uri.push_str("%3f"),
            '#' => uri.push_str("%23"),
            other => uri.push(other),
        }
    }
    // The copy has no -wal or -shm next to it and is never written.
    uri.push_str("?immutable=1");
    uri
}

fn list_tables(path: &Path) -> TrialOutcome {
    let uri = sqlite_uri(path);
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let result = Connection::open_with_flags(uri, flags).and_then(|conn| {
        let mut stmt = conn.prepare(TABLES_QUERY)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
    });
    match result {
        Ok(tables) => TrialOutcome::Success { tables },
        Err(rusqlite::Error::SqliteFailure(e, _))
            if matches!(e.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) =>
        {
            TrialOutcome::WrongKeyOrConfig
        }
        Err(e) => TrialOutcome::io(e.to_string()),
    }
}

impl TrialBackend for SqlCipherBackend {
    fn name(&self) -> &'static str {
        "sqlcipher"
    }

    fn attempt(&self, request: &TrialRequest<'_>, token: &CancelToken) -> TrialOutcome {
        if token.is_cancelled() {
            return TrialOutcome::Cancelled;
        }

        // Checked on its own so a plaintext target is never reported as a
        // wrong key.
        let head = DiskReader::new(request.target)
            .and_then(|mut r| r.read_page(1, sqlite::PLAINTEXT_MAGIC.len()));
        match head {
            Ok(head) if sqlite::is_plaintext(&head) => return TrialOutcome::Unencrypted,
            Ok(_) => {}
            Err(e) => return TrialOutcome::io(e.to_string()),
        }

        let written = self
            .unlock(request.target, request.candidate, request.config, token)
            .and_then(|unlocked| {
                // The scratch copy is made only for a key that opens page 1
                // while the attempt is still live.
                if token.is_cancelled() {
                    return Err(Interrupted::Cancelled);
                }
                let dir = self.scratch()?;
                let path = dir.path().join(DECRYPTED_NAME);
                let mut out = BufWriter::new(File::create(&path)?);
                let damaged = self.write_pages(unlocked, request.config, token, &mut out)?;
                drop(out);
                Ok((dir, path, damaged))
            });

        match written {
            Ok((dir, path, damaged)) => {
                if damaged > 0 {
                    debug!(damaged, config = %request.config, "pages failed to decrypt");
                }
                if token.is_cancelled() {
                    return TrialOutcome::Cancelled;
                }
                let outcome = list_tables(&path);
                if let Err(e) = dir.close() {
                    debug!(error = %e, "scratch directory not removed");
                }
                outcome
            }
            Err(Interrupted::Rejected) => TrialOutcome::WrongKeyOrConfig,
            Err(Interrupted::Cancelled) => TrialOutcome::Cancelled,
            Err(Interrupted::Core(e)) if !matches!(e, CoreError::Io(_)) => {
                trace!(error = %e, "configuration rejected");
                TrialOutcome::WrongKeyOrConfig
            }
            Err(Interrupted::Core(e)) => TrialOutcome::io(e.to_string()),
            Err(Interrupted::Io(e)) => TrialOutcome::io(e.to_string()),
        }
    }
}
