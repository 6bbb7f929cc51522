//! File digests for integrity verification.
//!
//! Files are read whole, sequentially, through a fixed-size buffer.

use digest::Digest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Supported checksum algorithms. SHA-256 is the default and the strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha1,
    Md5,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Md5 => "md5",
        }
    }

    /// Length of the hex-encoded digest
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Sha256 => 64,
            ChecksumAlgorithm::Sha1 => 40,
            ChecksumAlgorithm::Md5 => 32,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha1" => Ok(ChecksumAlgorithm::Sha1),
            "md5" => Ok(ChecksumAlgorithm::Md5),
            other => Err(format!("unsupported checksum algorithm: {}", other)),
        }
    }
}

/// Compute the lowercase hex digest of a file
pub fn hash_file(path: &Path, algorithm: ChecksumAlgorithm) -> io::Result<String> {
    let file = File::open(path)?;
    match algorithm {
        ChecksumAlgorithm::Sha256 => digest_reader::<sha2::Sha256, _>(file),
        ChecksumAlgorithm::Sha1 => digest_reader::<sha1::Sha1, _>(file),
        ChecksumAlgorithm::Md5 => digest_reader::<md5::Md5, _>(file),
    }
}

fn digest_reader<D: Digest, R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(to_hex(&hasher.finalize()))
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_with(content: &[u8]) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        file.write_all(content)?;
        file.flush()?;
        Ok(file)
    }

    #[test]
    fn test_known_digests() -> io::Result<()> {
        let file = temp_with(b"abc")?;

        assert_eq!(
            hash_file(file.path(), ChecksumAlgorithm::Sha256)?,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            hash_file(file.path(), ChecksumAlgorithm::Sha1)?,
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            hash_file(file.path(), ChecksumAlgorithm::Md5)?,
            "900150983cd24fb0d6963f7d28e17f72"
        );
        Ok(())
    }

    #[test]
    fn test_digest_length_matches_algorithm() -> io::Result<()> {
        let file = temp_with(&vec![7u8; HASH_BUFFER_SIZE * 3 + 11])?;
        for algorithm in [
            ChecksumAlgorithm::Sha256,
            ChecksumAlgorithm::Sha1,
            ChecksumAlgorithm::Md5,
        ] {
            assert_eq!(hash_file(file.path(), algorithm)?.len(), algorithm.hex_len());
        }
        Ok(())
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!("SHA256".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Sha256));
        assert_eq!("sha-1".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Sha1));
        assert_eq!("md5".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Md5));
        assert!("crc32".parse::<ChecksumAlgorithm>().is_err());
    }

    #[test]
    fn test_missing_file_errors() {
        let err = hash_file(Path::new("/no/such/file"), ChecksumAlgorithm::Md5).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
