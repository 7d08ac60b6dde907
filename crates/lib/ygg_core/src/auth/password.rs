//! Password verification against legacy hash schemes.
//!
//! The scheme is chosen by configuration, never detected from the stored
//! hash. Digest-based schemes compare in constant time.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use argon2::password_hash::SaltString;
use argon2::{Argon2, Params, PasswordHasher, Version};
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use md5::Md5;
use rand::Rng;
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;
use tracing::warn;

use super::AuthError;

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

/// Argon2i parameters matching PHP's `PASSWORD_ARGON2I` defaults.
const ARGON2_MEMORY_KIB: u32 = 65536;
const ARGON2_ITERATIONS: u32 = 4;
const ARGON2_PARALLELISM: u32 = 1;

/// Supported hash schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasswordAlgorithm {
    #[default]
    Bcrypt,
    Argon2i,
    Md5,
    /// `md5(md5(password) . salt)`
    Salted2Md5,
    Sha256,
    /// `sha256(sha256(password) . salt)`
    Salted2Sha256,
    Sha512,
    /// `sha512(sha512(password) . salt)`
    Salted2Sha512,
}

impl PasswordAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            PasswordAlgorithm::Bcrypt => "BCRYPT",
            PasswordAlgorithm::Argon2i => "ARGON2I",
            PasswordAlgorithm::Md5 => "MD5",
            PasswordAlgorithm::Salted2Md5 => "SALTED2MD5",
            PasswordAlgorithm::Sha256 => "SHA256",
            PasswordAlgorithm::Salted2Sha256 => "SALTED2SHA256",
            PasswordAlgorithm::Sha512 => "SHA512",
            PasswordAlgorithm::Salted2Sha512 => "SALTED2SHA512",
        }
    }

    /// Parse a configured scheme name. Unknown or empty names fall back to
    /// bcrypt.
    pub fn from_config(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            warn!(algorithm = value, "unknown password algorithm, using BCRYPT");
            PasswordAlgorithm::Bcrypt
        })
    }
}

impl fmt::Display for PasswordAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PasswordAlgorithm {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BCRYPT" => Ok(PasswordAlgorithm::Bcrypt),
            "ARGON2I" => Ok(PasswordAlgorithm::Argon2i),
            "MD5" => Ok(PasswordAlgorithm::Md5),
            "SALTED2MD5" => Ok(PasswordAlgorithm::Salted2Md5),
            "SHA256" => Ok(PasswordAlgorithm::Sha256),
            "SALTED2SHA256" => Ok(PasswordAlgorithm::Salted2Sha256),
            "SHA512" => Ok(PasswordAlgorithm::Sha512),
            "SALTED2SHA512" => Ok(PasswordAlgorithm::Salted2Sha512),
            other => Err(AuthError::IllegalArgument(format!(
                "unknown password algorithm: {other}"
            ))),
        }
    }
}

/// Verifies (and produces) password hashes for one configured scheme.
#[derive(Clone)]
pub struct CredentialVerifier {
    algorithm: PasswordAlgorithm,
    salt: String,
}

impl fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl CredentialVerifier {
    /// `salt` is the site-wide salt used by the `SALTED2*` schemes.
    pub fn new(algorithm: PasswordAlgorithm, salt: impl Into<String>) -> Self {
        Self {
            algorithm,
            salt: salt.into(),
        }
    }

    pub fn algorithm(&self) -> PasswordAlgorithm {
        self.algorithm
    }

    /// Check `raw` against `stored`.
    pub fn verify(&self, raw: &str, stored: &str) -> bool {
        verify_password(raw, stored, self.algorithm, &self.salt)
    }

    /// Hash `raw` with the configured scheme.
    pub fn hash(&self, raw: &str) -> Result<String, AuthError> {
        hash_password(raw, self.algorithm, &self.salt)
    }

    /// Spend roughly the time of a real verification. Called when the user
    /// does not exist so response timing does not reveal it.
    pub fn burn(&self, raw: &str) {
        static BCRYPT_DUMMY: OnceLock<String> = OnceLock::new();
        static ARGON2_DUMMY: OnceLock<String> = OnceLock::new();

        let dummy = match self.algorithm {
            PasswordAlgorithm::Bcrypt => BCRYPT_DUMMY.get_or_init(|| {
                hash_password("ygg-dummy", PasswordAlgorithm::Bcrypt, "").unwrap_or_default()
            }),
            PasswordAlgorithm::Argon2i => ARGON2_DUMMY.get_or_init(|| {
                hash_password("ygg-dummy", PasswordAlgorithm::Argon2i, "").unwrap_or_default()
            }),
            _ => "",
        };
        let _ = self.verify(raw, dummy);
    }
}

/// Verify a password under `algorithm`. Malformed stored hashes never match.
pub fn verify_password(raw: &str, stored: &str, algorithm: PasswordAlgorithm, salt: &str) -> bool {
    match algorithm {
        PasswordAlgorithm::Bcrypt => bcrypt::verify(raw, stored).unwrap_or(false),
        PasswordAlgorithm::Argon2i => verify_argon2i(raw, stored),
        digest_scheme => match digest_hex(raw, digest_scheme, salt) {
            Some(computed) => constant_time_eq_hex(&computed, stored),
            None => false,
        },
    }
}

/// Hash a password under `algorithm`.
pub fn hash_password(raw: &str, algorithm: PasswordAlgorithm, salt: &str) -> Result<String, AuthError> {
    match algorithm {
        PasswordAlgorithm::Bcrypt => bcrypt::hash(raw, BCRYPT_COST)
            .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}"))),
        PasswordAlgorithm::Argon2i => {
            let params = Params::new(
                ARGON2_MEMORY_KIB,
                ARGON2_ITERATIONS,
                ARGON2_PARALLELISM,
                None,
            )
            .map_err(|e| AuthError::Internal(format!("argon2 params: {e}")))?;
            let argon2 = Argon2::new(argon2::Algorithm::Argon2i, Version::V0x13, params);
            let mut bytes = [0u8; 16];
            rand::rng().fill(&mut bytes);
            let salt = SaltString::encode_b64(&bytes)
                .map_err(|e| AuthError::Internal(format!("argon2 salt: {e}")))?;
            argon2
                .hash_password(raw.as_bytes(), &salt)
                .map(|h| h.to_string())
                .map_err(|e| AuthError::Internal(format!("argon2 hash: {e}")))
        }
        digest_scheme => digest_hex(raw, digest_scheme, salt)
            .ok_or_else(|| AuthError::Internal("not a digest scheme".into())),
    }
}

/// Lowercase hex digest for the digest-based schemes.
fn digest_hex(raw: &str, algorithm: PasswordAlgorithm, salt: &str) -> Option<String> {
    let salted = |inner: String| format!("{inner}{salt}");
    Some(match algorithm {
        PasswordAlgorithm::Md5 => hex::encode(Md5::digest(raw)),
        PasswordAlgorithm::Salted2Md5 => {
            hex::encode(Md5::digest(salted(hex::encode(Md5::digest(raw)))))
        }
        PasswordAlgorithm::Sha256 => hex::encode(Sha256::digest(raw)),
        PasswordAlgorithm::Salted2Sha256 => {
            hex::encode(Sha256::digest(salted(hex::encode(Sha256::digest(raw)))))
        }
        PasswordAlgorithm::Sha512 => hex::encode(Sha512::digest(raw)),
        PasswordAlgorithm::Salted2Sha512 => {
            hex::encode(Sha512::digest(salted(hex::encode(Sha512::digest(raw)))))
        }
        PasswordAlgorithm::Bcrypt | PasswordAlgorithm::Argon2i => return None,
    })
}

fn constant_time_eq_hex(computed: &str, stored: &str) -> bool {
    let stored = stored.trim().to_ascii_lowercase();
    computed.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// Fields of an encoded Argon2i hash:
/// `$argon2i$v=19$m=65536,t=4,p=1$<salt>$<hash>`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Argon2Encoded {
    version: u32,
    memory: u32,
    iterations: u32,
    parallelism: u32,
    salt: Vec<u8>,
    hash: Vec<u8>,
}

fn parse_argon2i(encoded: &str) -> Option<Argon2Encoded> {
    let parts: Vec<&str> = encoded.split('$').collect();
    // The version segment is absent in hashes from argon2 1.0 (0x10).
    let (version, params, salt, hash) = match parts.as_slice() {
        ["", "argon2i", version, params, salt, hash] => {
            (parse_field(version, "v")?, *params, *salt, *hash)
        }
        ["", "argon2i", params, salt, hash] => (0x10, *params, *salt, *hash),
        _ => return None,
    };

    let mut fields = params.split(',');
    let memory = parse_field(fields.next()?, "m")?;
    let iterations = parse_field(fields.next()?, "t")?;
    let parallelism = parse_field(fields.next()?, "p")?;
    if fields.next().is_some() {
        return None;
    }

    let salt = decode_b64(salt)?;
    let hash = decode_b64(hash)?;
    if salt.is_empty() || hash.is_empty() {
        return None;
    }

    Some(Argon2Encoded {
        version,
        memory,
        iterations,
        parallelism,
        salt,
        hash,
    })
}

/// Parse `name=<u32>`.
fn parse_field(field: &str, name: &str) -> Option<u32> {
    let (key, value) = field.split_once('=')?;
    if key != name {
        return None;
    }
    value.parse().ok()
}

fn decode_b64(value: &str) -> Option<Vec<u8>> {
    STANDARD_NO_PAD.decode(value.trim_end_matches('=')).ok()
}

fn verify_argon2i(raw: &str, stored: &str) -> bool {
    let Some(encoded) = parse_argon2i(stored) else {
        return false;
    };
    let Ok(version) = Version::try_from(encoded.version) else {
        return false;
    };
    let Ok(params) = Params::new(
        encoded.memory,
        encoded.iterations,
        encoded.parallelism,
        Some(encoded.hash.len()),
    ) else {
        return false;
    };
    let argon2 = Argon2::new(argon2::Algorithm::Argon2i, version, params);
    let mut computed = vec![0u8; encoded.hash.len()];
    if argon2
        .hash_password_into(raw.as_bytes(), &encoded.salt, &mut computed)
        .is_err()
    {
        return false;
    }
    computed.ct_eq(&encoded.hash).into()
}
