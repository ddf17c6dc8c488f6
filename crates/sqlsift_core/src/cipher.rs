//! SQLCipher-compatible page codec.
//!
//! Page layout: `[salt (page 1 only)][AES-256-CBC ciphertext][IV][HMAC][pad]`,
//! where IV, HMAC and pad fill the reserved region at the end of the page.
//! The HMAC covers ciphertext and IV followed by the page number as a
//! little-endian `u32`. The encryption key is PBKDF2 over the passphrase and
//! the file salt; the HMAC key is PBKDF2 over the encryption key with the salt
//! XOR `0x3a`, two iterations.

use crate::error::{CoreError, Result};
use crate::matrix::{CipherConfig, HmacAlgorithm, KdfAlgorithm};
use crate::sqlite::{self, DatabaseHeader};
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::fmt;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
pub const HMAC_SALT_MASK: u8 = 0x3a;
pub const HMAC_KEY_ITERATIONS: u32 = 2;

#[derive(Clone, PartialEq, Eq)]
pub struct DerivedKeys {
    enc_key: [u8; KEY_LEN],
    hmac_key: [u8; KEY_LEN],
}

impl DerivedKeys {
    #[inline]
    pub fn enc_key(&self) -> &[u8; KEY_LEN] {
        &self.enc_key
    }

    #[inline]
    pub fn hmac_key(&self) -> &[u8; KEY_LEN] {
        &self.hmac_key
    }
}

impl fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKeys { .. }")
    }
}

fn pbkdf2_with(algorithm: KdfAlgorithm, password: &[u8], salt: &[u8], rounds: u32, out: &mut [u8]) {
    match algorithm {
        KdfAlgorithm::Pbkdf2HmacSha1 => pbkdf2_hmac::<Sha1>(password, salt, rounds, out),
        KdfAlgorithm::Pbkdf2HmacSha256 => pbkdf2_hmac::<Sha256>(password, salt, rounds, out),
        KdfAlgorithm::Pbkdf2HmacSha512 => pbkdf2_hmac::<Sha512>(password, salt, rounds, out),
    }
}

/// Runs the key derivation for one passphrase, salt and configuration.
///
/// Only the KDF algorithm and iteration count (and whether the version has an
/// HMAC) affect the result.
pub fn derive_keys(passphrase: &[u8], salt: &[u8], config: &CipherConfig) -> DerivedKeys {
    let mut enc_key = [0u8; KEY_LEN];
    pbkdf2_with(
        config.kdf_algorithm,
        passphrase,
        salt,
        config.kdf_iterations,
        &mut enc_key,
    );

    let mut hmac_key = [0u8; KEY_LEN];
    if config.version.has_hmac() {
        let hmac_salt: Vec<u8> = salt.iter().map(|b| b ^ HMAC_SALT_MASK).collect();
        pbkdf2_with(
            config.kdf_algorithm,
            &enc_key,
            &hmac_salt,
            HMAC_KEY_ITERATIONS,
            &mut hmac_key,
        );
    }
    DerivedKeys { enc_key, hmac_key }
}

fn keyed_mac<M: Mac + KeyInit>(key: &[u8], data: &[u8], pgno: u32) -> Result<M> {
    let mut mac = <M as Mac>::new_from_slice(key)
        .map_err(|e| CoreError::Cipher(format!("HMAC key rejected: {e}")))?;
    mac.update(data);
    mac.update(&pgno.to_le_bytes());
    Ok(mac)
}

/// Encrypts and decrypts pages of one database under fixed keys.
pub struct PageCodec<'k> {
    keys: &'k DerivedKeys,
    config: CipherConfig,
    page_count: u32,
}

impl<'k> PageCodec<'k> {
    pub fn new(keys: &'k DerivedKeys, config: &CipherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            keys,
            config: *config,
            page_count: 1,
        })
    }

    /// Page count written into a rebuilt header (32-byte salt layout only).
    #[must_use]
    pub fn with_page_count(mut self, page_count: u32) -> Self {
        self.page_count = page_count.max(1);
        self
    }

    #[inline]
    fn page_size(&self) -> usize {
        self.config.page_size as usize
    }

    #[inline]
    fn data_offset(&self, pgno: u32) -> usize {
        if pgno == 1 {
            self.config.salt_size
        } else {
            0
        }
    }

    #[inline]
    fn data_end(&self) -> usize {
        self.page_size() - self.config.reserve_size()
    }

    fn check_len(&self, pgno: u32, page: &[u8]) -> Result<()> {
        if page.len() != self.page_size() {
            return Err(CoreError::Cipher(format!(
                "page {pgno} is {} bytes, expected {}",
                page.len(),
                self.page_size()
            )));
        }
        Ok(())
    }

    fn tag(&self, pgno: u32, data: &[u8]) -> Result<Vec<u8>> {
        let key = &self.keys.hmac_key;
        Ok(match self.config.hmac_algorithm {
            HmacAlgorithm::HmacSha1 => keyed_mac::<Hmac<Sha1>>(key, data, pgno)?
                .finalize()
                .into_bytes()
                .to_vec(),
            HmacAlgorithm::HmacSha256 => keyed_mac::<Hmac<Sha256>>(key, data, pgno)?
                .finalize()
                .into_bytes()
                .to_vec(),
            HmacAlgorithm::HmacSha512 => keyed_mac::<Hmac<Sha512>>(key, data, pgno)?
                .finalize()
                .into_bytes()
                .to_vec(),
        })
    }

    /// Checks the page HMAC. Versions without an HMAC always pass.
    pub fn authenticate(&self, pgno: u32, page: &[u8]) -> Result<()> {
        self.check_len(pgno, page)?;
        if !self.config.version.has_hmac() {
            return Ok(());
        }
        let covered = &page[self.data_offset(pgno)..self.data_end() + IV_LEN];
        let tag_at = self.data_end() + IV_LEN;
        let stored = &page[tag_at..tag_at + self.config.hmac_len()];
        let key = &self.keys.hmac_key;
        let verified = match self.config.hmac_algorithm {
            HmacAlgorithm::HmacSha1 => keyed_mac::<Hmac<Sha1>>(key, covered, pgno)?
                .verify_slice(stored)
                .is_ok(),
            HmacAlgorithm::HmacSha256 => keyed_mac::<Hmac<Sha256>>(key, covered, pgno)?
                .verify_slice(stored)
                .is_ok(),
            HmacAlgorithm::HmacSha512 => keyed_mac::<Hmac<Sha512>>(key, covered, pgno)?
                .verify_slice(stored)
                .is_ok(),
        };
        if verified {
            Ok(())
        } else {
            Err(CoreError::Cipher(format!("HMAC mismatch on page {pgno}")))
        }
    }

    /// Authenticates and decrypts one page into its plaintext image.
    pub fn decrypt_page(&self, pgno: u32, page: &[u8]) -> Result<Vec<u8>> {
        self.authenticate(pgno, page)?;

        let offset = self.data_offset(pgno);
        let end = self.data_end();
        let iv = &page[end..end + IV_LEN];

        let mut plain = vec![0u8; self.page_size()];
        plain[offset..end].copy_from_slice(&page[offset..end]);
        Aes256CbcDec::new_from_slices(&self.keys.enc_key, iv)
            .map_err(|e| CoreError::Cipher(format!("bad key or IV length: {e}")))?
            .decrypt_padded_mut::<NoPadding>(&mut plain[offset..end])
            .map_err(|e| CoreError::Cipher(format!("decryption failed: {e}")))?;
        plain[end..].copy_from_slice(&page[end..]);

        if pgno == 1 {
            plain[..sqlite::PLAINTEXT_MAGIC.len()].copy_from_slice(sqlite::PLAINTEXT_MAGIC);
            if offset > sqlite::PLAINTEXT_MAGIC.len() {
                sqlite::rebuild_header_tail(
                    &mut plain,
                    self.config.page_size,
                    self.config.reserve_size() as u8,
                    self.page_count,
                );
            }
        }
        Ok(plain)
    }

    /// Encrypts one plaintext page. `salt` is written in front of page 1; the
    /// IV and any reserve padding come from `rng`.
    pub fn encrypt_page<R: RngCore>(
        &self,
        pgno: u32,
        plain: &[u8],
        salt: &[u8],
        rng: &mut R,
    ) -> Result<Vec<u8>> {
        self.check_len(pgno, plain)?;
        if salt.len() != self.config.salt_size {
            return Err(CoreError::Cipher(format!(
                "salt is {} bytes, configuration expects {}",
                salt.len(),
                self.config.salt_size
            )));
        }
        let offset = self.data_offset(pgno);
        let end = self.data_end();

        let mut iv = [0u8; IV_LEN];
        rng.fill_bytes(&mut iv);

        let mut page = vec![0u8; self.page_size()];
        if pgno == 1 {
            page[..offset].copy_from_slice(salt);
        }
        page[offset..end].copy_from_slice(&plain[offset..end]);
        let msg_len = end - offset;
        Aes256CbcEnc::new_from_slices(&self.keys.enc_key, &iv)
            .map_err(|e| CoreError::Cipher(format!("bad key or IV length: {e}")))?
            .encrypt_padded_mut::<NoPadding>(&mut page[offset..end], msg_len)
            .map_err(|e| CoreError::Cipher(format!("encryption failed: {e}")))?;
        page[end..end + IV_LEN].copy_from_slice(&iv);

        let mut pad_from = end + IV_LEN;
        if self.config.version.has_hmac() {
            let tag = self.tag(pgno, &page[offset..end + IV_LEN])?;
            page[pad_from..pad_from + tag.len()].copy_from_slice(&tag);
            pad_from += tag.len();
        }
        rng.fill_bytes(&mut page[pad_from..]);
        Ok(page)
    }
}

/// Sanity checks on a decrypted first page: a plausible database header whose
/// geometry matches the configuration and a table b-tree page at offset 100.
pub fn first_page_is_plausible(plain: &[u8], config: &CipherConfig) -> bool {
    let Ok(header) = DatabaseHeader::parse(plain) else {
        return false;
    };
    header.is_sane()
        && header.page_size == config.page_size
        && header.reserved_bytes as usize == config.reserve_size()
        && matches!(
            plain.get(sqlite::HEADER_LEN),
            Some(&sqlite::LEAF_TABLE_PAGE) | Some(&sqlite::INTERIOR_TABLE_PAGE)
        )
}

/// Encrypts a complete plaintext database image.
///
/// The plaintext must already reserve `config.reserve_size()` bytes per page
/// (header byte 20), as a database created under the codec does.
pub fn seal_database<R: RngCore>(
    plain: &[u8],
    passphrase: &[u8],
    config: &CipherConfig,
    salt: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>> {
    config.validate()?;
    let page_size = config.page_size as usize;
    if plain.is_empty() || plain.len() % page_size != 0 {
        return Err(CoreError::InvalidFormat(format!(
            "plaintext length {} is not a multiple of page size {page_size}",
            plain.len()
        )));
    }
    let header = DatabaseHeader::parse(plain)?;
    if header.reserved_bytes as usize != config.reserve_size() {
        return Err(CoreError::InvalidFormat(format!(
            "plaintext reserves {} bytes per page, configuration needs {}",
            header.reserved_bytes,
            config.reserve_size()
        )));
    }

    let keys = derive_keys(passphrase, salt, config);
    let codec = PageCodec::new(&keys, config)?;
    let mut sealed = Vec::with_capacity(plain.len());
    for (idx, page) in plain.chunks(page_size).enumerate() {
        sealed.extend(codec.encrypt_page(idx as u32 + 1, page, salt, rng)?);
    }
    Ok(sealed)
}
