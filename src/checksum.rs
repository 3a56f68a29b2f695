//! Checksum parsing and verification
//!
//! Declared checksums come either as `algorithm:hex` (`sha256:9f86d0...`) or as
//! Subresource Integrity strings (`sha512-z4PhNX7v...`). Verification streams
//! the content once, computing every declared algorithm plus SHA-256, which is
//! always returned because it keys the content store.

use crate::error::{HermitError, HermitResult};
use crate::request::Mode;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Digest length in bytes
    pub fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    fn hasher(self) -> Hasher {
        match self {
            Self::Sha1 => Hasher::Sha1(Sha1::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
            Self::Sha384 => Hasher::Sha384(Sha384::new()),
            Self::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(format!("unsupported algorithm '{}'", other)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha384(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// A declared digest, normalized to lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChecksumInfo {
    pub algorithm: Algorithm,
    pub hex_digest: String,
}

impl ChecksumInfo {
    pub fn new(algorithm: Algorithm, hex_digest: impl Into<String>) -> HermitResult<Self> {
        let hex_digest = hex_digest.into().to_ascii_lowercase();
        let invalid = |reason: String| HermitError::InvalidChecksum {
            value: format!("{}:{}", algorithm, hex_digest),
            reason,
        };

        if hex_digest.len() != algorithm.digest_len() * 2 {
            return Err(invalid(format!(
                "expected {} hex characters for {}, got {}",
                algorithm.digest_len() * 2,
                algorithm,
                hex_digest.len()
            )));
        }
        if !hex_digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("digest is not hexadecimal".to_string()));
        }

        Ok(Self {
            algorithm,
            hex_digest,
        })
    }

    /// Parse `algorithm:hex`
    pub fn parse(value: &str) -> HermitResult<Self> {
        let (algorithm, digest) = value.split_once(':').ok_or_else(|| {
            HermitError::InvalidChecksum {
                value: value.to_string(),
                reason: "expected the form 'algorithm:digest'".to_string(),
            }
        })?;
        let algorithm = algorithm
            .trim()
            .parse()
            .map_err(|reason| HermitError::InvalidChecksum {
                value: value.to_string(),
                reason,
            })?;
        Self::new(algorithm, digest.trim())
    }

    /// Parse a Subresource Integrity value. Several space-separated digests
    /// yield several checksums.
    pub fn parse_sri(value: &str) -> HermitResult<Vec<Self>> {
        let mut checksums = Vec::new();
        for entry in value.split_whitespace() {
            let invalid = |reason: String| HermitError::InvalidChecksum {
                value: entry.to_string(),
                reason,
            };
            let (algorithm, encoded) = entry
                .split_once('-')
                .ok_or_else(|| invalid("expected the form 'algorithm-base64'".to_string()))?;
            let algorithm: Algorithm = algorithm.parse().map_err(invalid)?;
            // Options after '?' are reserved by the SRI format and ignored.
            let encoded = encoded.split('?').next().unwrap_or_default();
            let bytes = BASE64
                .decode(encoded)
                .map_err(|e| invalid(format!("invalid base64: {}", e)))?;
            checksums.push(Self::new(algorithm, hex::encode(bytes))?);
        }
        if checksums.is_empty() {
            return Err(HermitError::InvalidChecksum {
                value: value.to_string(),
                reason: "empty integrity value".to_string(),
            });
        }
        Ok(checksums)
    }

    /// Render as a Subresource Integrity value
    pub fn to_sri(&self) -> String {
        let bytes = hex::decode(&self.hex_digest).unwrap_or_default();
        format!("{}-{}", self.algorithm, BASE64.encode(bytes))
    }
}

impl fmt::Display for ChecksumInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex_digest)
    }
}

/// Result of a successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// SHA-256 of the content, used as the store key
    pub sha256: String,
    /// True when nothing was declared and the content was accepted in permissive mode
    pub unverified: bool,
}

/// Verify `reader` against every declared checksum.
///
/// A mismatch fails in every mode. With nothing declared, strict mode fails
/// with `MissingChecksum` and permissive mode accepts the content unverified.
pub fn verify_reader<R: Read>(
    mut reader: R,
    declared: &[ChecksumInfo],
    mode: Mode,
    subject: &str,
) -> HermitResult<Verification> {
    if declared.is_empty() && mode == Mode::Strict {
        return Err(HermitError::MissingChecksum {
            subject: subject.to_string(),
        });
    }

    let mut algorithms: Vec<Algorithm> = declared.iter().map(|c| c.algorithm).collect();
    algorithms.push(Algorithm::Sha256);
    algorithms.sort();
    algorithms.dedup();

    let mut hashers: Vec<(Algorithm, Hasher)> =
        algorithms.iter().map(|a| (*a, a.hasher())).collect();

    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|e| HermitError::io(format!("reading {}", subject), e))?;
        if read == 0 {
            break;
        }
        for (_, hasher) in &mut hashers {
            hasher.update(&buffer[..read]);
        }
    }

    let computed: Vec<(Algorithm, String)> = hashers
        .into_iter()
        .map(|(algorithm, hasher)| (algorithm, hasher.finalize_hex()))
        .collect();
    let digest_for = |algorithm: Algorithm| {
        computed
            .iter()
            .find(|(a, _)| *a == algorithm)
            .map(|(_, d)| d.as_str())
            .unwrap_or_default()
    };

    let mismatches: Vec<String> = declared
        .iter()
        .filter(|c| digest_for(c.algorithm) != c.hex_digest)
        .map(|c| format!("expected {}, got {}:{}", c, c.algorithm, digest_for(c.algorithm)))
        .collect();

    if !mismatches.is_empty() {
        return Err(HermitError::ChecksumVerificationFailed {
            subject: subject.to_string(),
            detail: mismatches.join("; "),
        });
    }

    Ok(Verification {
        sha256: digest_for(Algorithm::Sha256).to_string(),
        unverified: declared.is_empty(),
    })
}

/// Verify a file on disk
pub fn verify_file(
    path: &Path,
    declared: &[ChecksumInfo],
    mode: Mode,
    subject: &str,
) -> HermitResult<Verification> {
    let file = std::fs::File::open(path)
        .map_err(|e| HermitError::io(format!("opening {}", path.display()), e))?;
    verify_reader(std::io::BufReader::new(file), declared, mode, subject)
}

/// SHA-256 of a file as lowercase hex
pub fn sha256_file(path: &Path) -> HermitResult<String> {
    verify_file(path, &[], Mode::Permissive, &path.display().to_string()).map(|v| v.sha256)
}
