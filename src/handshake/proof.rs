//! Handshake proof computation
//!
//! Two independent algorithms:
//! - Legacy numeric keys (hybi-00): `MD5(key1 / spaces1 || key2 / spaces2 || key3)`
//! - Nonce concatenation (hybi-07 and later): `Base64(SHA-1(key + GUID))`

use base64::Engine;
use md5::Md5;
use sha1::{Digest, Sha1};

use crate::WS_GUID;
use crate::error::{Error, Result};

/// Hash algorithms a handshake variant may name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// MD5, used by hybi-00
    Md5,
    /// SHA-1, used by hybi-07 and later
    Sha1,
}

impl HashAlgorithm {
    /// Resolve an algorithm identifier such as `"MD5"` or `"SHA1"`
    pub fn from_name(name: &str) -> Result<Self> {
        if name.eq_ignore_ascii_case("MD5") {
            Ok(HashAlgorithm::Md5)
        } else if name.eq_ignore_ascii_case("SHA1") || name.eq_ignore_ascii_case("SHA-1") {
            Ok(HashAlgorithm::Sha1)
        } else {
            Err(Error::AlgorithmUnavailable(name.to_owned()))
        }
    }

    /// Canonical identifier
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA1",
        }
    }

    /// Hash the concatenation of `parts`
    pub fn digest(&self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            HashAlgorithm::Md5 => {
                let mut hasher = Md5::new();
                for part in parts {
                    hasher.update(part);
                }
                hasher.finalize().to_vec()
            }
            HashAlgorithm::Sha1 => {
                let mut hasher = Sha1::new();
                for part in parts {
                    hasher.update(part);
                }
                hasher.finalize().to_vec()
            }
        }
    }
}

/// Decode a legacy `Sec-WebSocket-Key1`/`Key2` value
///
/// The digits form a number that is divided by the count of spaces.
pub fn decode_key(encoded: &str) -> Result<u64> {
    let spaces = encoded.bytes().filter(|&b| b == b' ').count() as u64;
    if spaces == 0 {
        return Err(Error::Format("key contains no spaces"));
    }

    let mut digits = 0usize;
    let mut number: u64 = 0;
    for b in encoded.bytes().filter(u8::is_ascii_digit) {
        number = number
            .checked_mul(10)
            .and_then(|n| n.checked_add(u64::from(b - b'0')))
            .ok_or(Error::Format("key number out of range"))?;
        digits += 1;
    }
    if digits == 0 {
        return Err(Error::Format("key contains no digits"));
    }

    Ok(number / spaces)
}

/// Compute the hybi-00 response body from the raw key headers and key3
pub fn solve_legacy(algorithm: &str, key1: &str, key2: &str, key3: &[u8; 8]) -> Result<Vec<u8>> {
    solve_legacy_decoded(algorithm, decode_key(key1)?, decode_key(key2)?, key3)
}

/// Compute the hybi-00 response body from already decoded keys
///
/// Each key is packed as a 32-bit big-endian integer.
pub fn solve_legacy_decoded(
    algorithm: &str,
    key1: u64,
    key2: u64,
    key3: &[u8; 8],
) -> Result<Vec<u8>> {
    let algorithm = HashAlgorithm::from_name(algorithm)?;

    let mut challenge = [0u8; 16];
    challenge[..4].copy_from_slice(&(key1 as u32).to_be_bytes());
    challenge[4..8].copy_from_slice(&(key2 as u32).to_be_bytes());
    challenge[8..].copy_from_slice(key3);

    Ok(algorithm.digest(&[&challenge]))
}

/// Compute the `Sec-WebSocket-Accept` value for a client nonce
pub fn solve_nonce(algorithm: &str, magic: &str, nonce: &str) -> Result<String> {
    Ok(nonce_token(HashAlgorithm::from_name(algorithm)?, magic, nonce))
}

/// Generate the Sec-WebSocket-Accept key
///
/// This computes: Base64(SHA-1(key + GUID))
#[inline]
pub fn accept_key(key: &str) -> String {
    nonce_token(HashAlgorithm::Sha1, WS_GUID, key)
}

fn nonce_token(algorithm: HashAlgorithm, magic: &str, nonce: &str) -> String {
    let hash = algorithm.digest(&[nonce.trim().as_bytes(), magic.as_bytes()]);
    base64::engine::general_purpose::STANDARD.encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_key_rfc_vector() {
        // Test vector from RFC 6455
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        assert_eq!(accept_key(key), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(
            solve_nonce("SHA1", WS_GUID, key).unwrap(),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_accept_key_matches_sha1_nonce() {
        for key in ["x3JJHMbDL1EzLkh9GBhXDw==", " AQIDBAUGBwgJCgsMDQ4PEC== ", ""] {
            assert_eq!(accept_key(key), solve_nonce("SHA1", WS_GUID, key).unwrap());
        }
    }

    #[test]
    fn test_nonce_is_trimmed() {
        assert_eq!(
            solve_nonce("SHA1", WS_GUID, "  dGhlIHNhbXBsZSBub25jZQ==\t").unwrap(),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_decode_key() {
        assert_eq!(decode_key("1 2z3 4").unwrap(), 617);
        // Every space counts, including doubled ones
        assert_eq!(decode_key("1  2z3 4").unwrap(), 411);
        assert_eq!(decode_key("4 @1  46546xW%0l 1 5").unwrap(), 829_309_203);
        assert_eq!(decode_key("12998 5 Y3 1  .P00").unwrap(), 259_970_620);
    }

    #[test]
    fn test_decode_key_without_spaces() {
        assert!(matches!(decode_key("1234"), Err(Error::Format(_))));
    }

    #[test]
    fn test_decode_key_without_digits() {
        assert!(matches!(decode_key("a b"), Err(Error::Format(_))));
    }

    #[test]
    fn test_decode_key_overflow() {
        assert!(matches!(
            decode_key("99999999999999999999999 "),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_legacy_vector() {
        // Example handshake from draft-hixie-thewebsocketprotocol-76
        let solution = solve_legacy(
            "MD5",
            "4 @1  46546xW%0l 1 5",
            "12998 5 Y3 1  .P00",
            b"^n:ds[4U",
        )
        .unwrap();
        assert_eq!(solution, b"8jKS'y:G*Co,Wxa-");
    }

    #[test]
    fn test_unknown_algorithm() {
        let err = solve_nonce("SHA3-512", WS_GUID, "abc").unwrap_err();
        assert!(matches!(err, Error::AlgorithmUnavailable(name) if name == "SHA3-512"));

        let err = solve_legacy_decoded("WHIRLPOOL", 1, 2, &[0; 8]).unwrap_err();
        assert!(matches!(err, Error::AlgorithmUnavailable(_)));
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(HashAlgorithm::from_name("md5").unwrap(), HashAlgorithm::Md5);
        assert_eq!(HashAlgorithm::from_name("SHA-1").unwrap().name(), "SHA1");
        assert_eq!(HashAlgorithm::Md5.digest(&[b"a", b"bc"]).len(), 16);
        assert_eq!(
            HashAlgorithm::Sha1.digest(&[b"a", b"bc"]),
            HashAlgorithm::Sha1.digest(&[b"abc"])
        );
    }
}
