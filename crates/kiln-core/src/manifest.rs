//! Build manifest (BuildDB) and hash manifest (HashDB) formats.
//!
//! Both are persisted as JSON and read by download and verification clients,
//! so field names are part of the wire contract.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hashes and size of one produced archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub sha1: String,
    pub sha256: String,
    pub md5: String,
    pub size: u64,
    pub file_name: String,
}

/// Everything published for one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    #[serde(rename = "go_version", default)]
    pub tool_version: String,
    pub build_date: DateTime<Utc>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// Label -> branch entry for one repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildDb(pub BTreeMap<String, Branch>);

impl BuildDb {
    /// Parse a stored manifest. Empty input is an empty manifest.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Insert or overwrite one label. Other labels are untouched.
    pub fn upsert(&mut self, label: impl Into<String>, branch: Branch) {
        self.0.insert(label.into(), branch);
    }

    pub fn get(&self, label: &str) -> Option<&Branch> {
        self.0.get(label)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Labels ordered newest build first, ties broken by label name.
    pub fn labels_by_build_date(&self) -> Vec<&str> {
        let mut labels: Vec<(&String, &Branch)> = self.0.iter().collect();
        labels.sort_by(|(la, a), (lb, b)| b.build_date.cmp(&a.build_date).then(la.cmp(lb)));
        labels.into_iter().map(|(label, _)| label.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hashes {
    pub md5sum: String,
    pub sha1sum: String,
    pub sha256sum: String,
    pub sha384sum: String,
}

/// File name -> hashes for a single label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashDb(pub BTreeMap<String, Hashes>);

impl HashDb {
    pub fn insert(&mut self, file_name: impl Into<String>, hashes: Hashes) {
        self.0.insert(file_name.into(), hashes);
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn branch(ts: i64) -> Branch {
        Branch {
            tool_version: "go1.22".into(),
            build_date: Utc.timestamp_opt(ts, 0).unwrap(),
            assets: vec![],
        }
    }

    #[test]
    fn test_wire_field_names() {
        let mut db = BuildDb::default();
        db.upsert(
            "master",
            Branch {
                assets: vec![Asset {
                    sha1: "s1".into(),
                    sha256: "s256".into(),
                    md5: "m5".into(),
                    size: 3,
                    file_name: "app_master_linux-amd64.zip".into(),
                }],
                ..branch(0)
            },
        );
        let json: serde_json::Value = serde_json::from_slice(&db.to_vec().unwrap()).unwrap();
        let entry = &json["master"];
        assert_eq!(entry["go_version"], "go1.22");
        assert_eq!(entry["build_date"], "1970-01-01T00:00:00Z");
        assert_eq!(entry["assets"][0]["file_name"], "app_master_linux-amd64.zip");
        assert_eq!(entry["assets"][0]["size"], 3);
    }

    #[test]
    fn test_empty_seed_is_empty_manifest() {
        assert!(BuildDb::from_slice(b"").unwrap().is_empty());
        assert!(BuildDb::from_slice(b" \n").unwrap().is_empty());
        assert!(BuildDb::from_slice(b"{").is_err());
    }

    #[test]
    fn test_upsert_keeps_other_labels() {
        let mut db = BuildDb::default();
        db.upsert("v1.0", branch(10));
        db.upsert("master", branch(20));
        db.upsert("master", branch(30));
        assert_eq!(db.len(), 2);
        assert_eq!(db.get("master").unwrap().build_date.timestamp(), 30);
    }

    #[test]
    fn test_labels_by_build_date() {
        let mut db = BuildDb::default();
        db.upsert("old", branch(10));
        db.upsert("new", branch(30));
        db.upsert("mid", branch(20));
        assert_eq!(db.labels_by_build_date(), vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_hash_projection_format() {
        let mut hashes = HashDb::default();
        hashes.insert(
            "a.zip",
            Hashes {
                md5sum: "1".into(),
                sha1sum: "2".into(),
                sha256sum: "3".into(),
                sha384sum: "4".into(),
            },
        );
        let json: serde_json::Value = serde_json::from_slice(&hashes.to_vec().unwrap()).unwrap();
        assert_eq!(json["a.zip"]["sha384sum"], "4");
        assert_eq!(json["a.zip"]["md5sum"], "1");
    }
}
