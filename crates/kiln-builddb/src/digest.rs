//! Content hashes for produced files.

use kiln_core::{Asset, Hashes};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigests {
    pub size: u64,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub sha384: String,
}

impl FileDigests {
    pub fn compute(data: &[u8]) -> Self {
        Self {
            size: data.len() as u64,
            md5: format!("{:x}", md5::compute(data)),
            sha1: hex::encode(Sha1::digest(data)),
            sha256: hex::encode(Sha256::digest(data)),
            sha384: hex::encode(Sha384::digest(data)),
        }
    }

    pub fn to_asset(&self, file_name: &str) -> Asset {
        Asset {
            sha1: self.sha1.clone(),
            sha256: self.sha256.clone(),
            md5: self.md5.clone(),
            size: self.size,
            file_name: file_name.to_string(),
        }
    }

    pub fn to_hashes(&self) -> Hashes {
        Hashes {
            md5sum: self.md5.clone(),
            sha1sum: self.sha1.clone(),
            sha256sum: self.sha256.clone(),
            sha384sum: self.sha384.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests_of_abc() {
        let d = FileDigests::compute(b"abc");
        assert_eq!(d.size, 3);
        assert_eq!(d.md5, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(d.sha1, "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(
            d.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(d.sha384.starts_with("cb00753f45a35e8b"));
    }
}
