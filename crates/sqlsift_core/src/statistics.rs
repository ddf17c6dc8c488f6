/// Thresholds used when deciding whether a short slot holds cipher material
/// (an IV, an HMAC tag or a salt) rather than plaintext structure.
pub const CIPHER_SLOT_MIN_RATIO: f64 = 0.85;
pub const CIPHER_SLOT_MIN_DISTINCT: f64 = 0.5;
pub const CIPHER_SLOT_MAX_PRINTABLE: f64 = 0.75;

pub fn byte_histogram(data: &[u8]) -> [u32; 256] {
    let mut counts = [0u32; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }
    counts
}

/// Shannon entropy in bits per byte, `0.0..=8.0`.
pub fn compute_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let counts = byte_histogram(data);
    let len = data.len() as f64;
    let mut entropy = 0.0;
    for &count in &counts {
        if count > 0 {
            let p = count as f64 / len;
            entropy -= p * p.log2();
        }
    }
    entropy
}

/// Normalized Shannon entropy in `[0, 1]` (bits per byte divided by 8).
#[inline]
pub fn entropy(data: &[u8]) -> f64 {
    (compute_entropy(data) / 8.0).clamp(0.0, 1.0)
}

/// Largest normalized entropy a window of `len` bytes can reach.
#[inline]
pub fn max_entropy_for_len(len: usize) -> f64 {
    if len <= 1 {
        return 0.0;
    }
    (len.min(256) as f64).log2() / 8.0
}

/// Entropy relative to the ceiling for the window length.
///
/// A 32-byte window of all-distinct bytes scores 1.0 here although its
/// normalized entropy is only 0.625.
pub fn entropy_ratio(data: &[u8]) -> f64 {
    let ceiling = max_entropy_for_len(data.len());
    if ceiling == 0.0 {
        return 0.0;
    }
    (entropy(data) / ceiling).clamp(0.0, 1.0)
}

pub fn distinct_count(data: &[u8]) -> usize {
    byte_histogram(data).iter().filter(|&&c| c > 0).count()
}

pub fn distinct_ratio(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    distinct_count(data) as f64 / data.len() as f64
}

pub fn printable_ratio(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let printable = data
        .iter()
        .filter(|b| b.is_ascii_graphic() || **b == b' ')
        .count();
    printable as f64 / data.len() as f64
}

/// True for a non-empty, even-length run of ASCII hex digits.
pub fn is_hex_text(data: &[u8]) -> bool {
    !data.is_empty() && data.len() % 2 == 0 && data.iter().all(u8::is_ascii_hexdigit)
}

pub fn looks_like_cipher(data: &[u8]) -> bool {
    !data.is_empty()
        && entropy_ratio(data) >= CIPHER_SLOT_MIN_RATIO
        && distinct_ratio(data) > CIPHER_SLOT_MIN_DISTINCT
        && printable_ratio(data) < CIPHER_SLOT_MAX_PRINTABLE
}
