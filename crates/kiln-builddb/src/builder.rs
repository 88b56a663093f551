//! Manifest generation from a build's working directory.

use crate::digest::FileDigests;
use chrono::Utc;
use kiln_core::{Branch, BuildDb, Error, HashDb, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Manifest seed, rewritten in place.
pub const BUILD_DB_FILE: &str = ".build.db";

/// Toolchain version the container built with.
pub const TOOL_VERSION_FILE: &str = ".tool_version";

pub const ARCHIVE_SUFFIXES: &[&str] = &[".zip", ".tar.gz", ".tgz"];

/// Label embedded in an archive name: the second-to-last `_` segment.
///
/// `app_master_linux-amd64.zip` is labelled `master`.
pub fn label_for(file_name: &str) -> Option<&str> {
    let parts: Vec<&str> = file_name.split('_').collect();
    if parts.len() < 2 {
        return None;
    }
    let label = parts[parts.len() - 2];
    (!label.is_empty()).then_some(label)
}

fn is_archive(file_name: &str) -> bool {
    ARCHIVE_SUFFIXES.iter().any(|suffix| file_name.ends_with(suffix))
}

/// Result of one generation pass.
#[derive(Debug, Clone)]
pub struct Generated {
    /// Full manifest, including labels this build did not touch.
    pub manifest: BuildDb,
    /// Hash projection for each label this build produced.
    pub hashes: BTreeMap<String, HashDb>,
}

impl Generated {
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.hashes.keys().map(String::as_str)
    }
}

pub struct BuildDbBuilder {
    dir: PathBuf,
}

impl BuildDbBuilder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Merge the archives in the directory into the seed manifest and write
    /// the result back to [`BUILD_DB_FILE`].
    pub async fn generate(&self) -> Result<Generated> {
        let mut manifest = self.read_seed().await?;
        let tool_version = self.read_tool_version().await?;
        let now = Utc::now();

        let mut by_label: BTreeMap<String, Vec<(String, FileDigests)>> = BTreeMap::new();
        for file_name in self.archive_names().await? {
            let Some(label) = label_for(&file_name) else {
                warn!(file = %file_name, "Archive name carries no label, skipping");
                continue;
            };
            let digests = digest_file(self.dir.join(&file_name)).await?;
            by_label
                .entry(label.to_string())
                .or_default()
                .push((file_name, digests));
        }

        let mut hashes = BTreeMap::new();
        for (label, mut files) in by_label {
            files.sort_by(|(a, _), (b, _)| a.cmp(b));

            let mut projection = HashDb::default();
            for (name, digests) in &files {
                projection.insert(name.clone(), digests.to_hashes());
            }

            let branch = Branch {
                tool_version: tool_version.clone(),
                build_date: now,
                assets: files.iter().map(|(name, d)| d.to_asset(name)).collect(),
            };
            debug!(label = %label, assets = branch.assets.len(), "Updated manifest label");
            manifest.upsert(label.clone(), branch);
            hashes.insert(label, projection);
        }

        tokio::fs::write(self.dir.join(BUILD_DB_FILE), manifest.to_vec()?).await?;
        info!(
            dir = %self.dir.display(),
            labels = hashes.len(),
            "Build manifest generated"
        );

        Ok(Generated { manifest, hashes })
    }

    async fn read_seed(&self) -> Result<BuildDb> {
        match read_optional(&self.dir.join(BUILD_DB_FILE)).await? {
            Some(bytes) => BuildDb::from_slice(&bytes),
            None => Ok(BuildDb::default()),
        }
    }

    async fn read_tool_version(&self) -> Result<String> {
        Ok(read_optional(&self.dir.join(TOOL_VERSION_FILE))
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .unwrap_or_default())
    }

    async fn archive_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') && is_archive(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn digest_file(path: PathBuf) -> Result<FileDigests> {
    tokio::task::spawn_blocking(move || std::fs::read(&path).map(|data| FileDigests::compute(&data)))
        .await
        .map_err(|e| Error::Internal(format!("Hashing task failed: {}", e)))?
        .map_err(Error::from)
}
