//! Publishing a successful build: artifact upload and coordination-store
//! metadata.
//!
//! Dot-prefixed files in the working directory are the container's side
//! channel and are never uploaded.

use chrono::{DateTime, Utc};
use kiln_builddb::{BUILD_DB_FILE, BuildDbBuilder, Generated};
use kiln_core::ports::{BlobStore, CoordinationStore, Visibility};
use kiln_core::{Result, keys};
use std::path::Path;
use tracing::{debug, info, warn};

/// Newline separated labels the build produced.
pub const BUILT_TAGS_FILE: &str = ".built_tags";

/// Commit the build checked out.
pub const LAST_COMMIT_FILE: &str = ".build_commit";

pub fn signature_file(label: &str) -> String {
    format!(".signature_{}", label)
}

pub fn hashes_file(label: &str) -> String {
    format!(".hashes_{}.txt", label)
}

fn content_type(file_name: &str) -> &'static str {
    if file_name.ends_with(".zip") {
        "application/zip"
    } else if file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz") {
        "application/gzip"
    } else if file_name.ends_with(".txt") || file_name.ends_with(".asc") {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

/// Upload every regular, non-dot file to `<repository>/<file>`.
pub async fn upload_assets(
    blobs: &dyn BlobStore,
    repository: &str,
    dir: &Path,
) -> Result<Vec<String>> {
    let mut uploaded = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || entry.file_type().await?.is_dir() {
            continue;
        }

        let data = tokio::fs::read(entry.path()).await?;
        let path = format!("{}/{}", repository, name);
        blobs
            .put(&path, data, content_type(&name), Visibility::PublicRead)
            .await?;
        uploaded.push(path);
    }

    uploaded.sort();
    info!(repository = %repository, files = uploaded.len(), "Artifacts uploaded");
    Ok(uploaded)
}

async fn read_side_file(dir: &Path, name: &str) -> Result<Option<String>> {
    match tokio::fs::read_to_string(dir.join(name)).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Mirror an optional side file into a store key, deleting the key when the
/// file is absent.
async fn mirror_side_file(
    store: &dyn CoordinationStore,
    dir: &Path,
    file: &str,
    key: &str,
) -> Result<()> {
    match read_side_file(dir, file).await? {
        Some(content) => store.set(key, content.as_bytes(), None).await,
        None => store.delete(key).await,
    }
}

/// Record duration, side files, last commit and the regenerated manifest.
pub async fn update_metadata(
    store: &dyn CoordinationStore,
    repository: &str,
    dir: &Path,
    started_at: DateTime<Utc>,
) -> Result<Generated> {
    let now = Utc::now();
    let duration = (now - started_at).num_seconds().max(0);
    store
        .set(
            &keys::build_duration(repository),
            duration.to_string().as_bytes(),
            None,
        )
        .await?;
    store
        .sorted_set_add(keys::LAST_BUILDS, repository, now.timestamp() as f64)
        .await?;

    let labels: Vec<String> = read_side_file(dir, BUILT_TAGS_FILE)
        .await?
        .map(|content| {
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    for label in &labels {
        mirror_side_file(
            store,
            dir,
            &signature_file(label),
            &keys::signature(repository, label),
        )
        .await?;
        mirror_side_file(store, dir, &hashes_file(label), &keys::hashes(repository, label)).await?;
    }
    debug!(repository = %repository, labels = labels.len(), "Side files recorded");

    match read_side_file(dir, LAST_COMMIT_FILE).await? {
        Some(commit) if !commit.trim().is_empty() => {
            let commit = commit.trim();
            store
                .set(&keys::last_build(repository), commit.as_bytes(), None)
                .await?;
            store
                .sorted_set_add(&keys::built_commits(repository), commit, now.timestamp() as f64)
                .await?;
        }
        _ => warn!(repository = %repository, "Build left no commit marker"),
    }

    // Seed the generator with the published manifest so untouched labels
    // survive when the container did not provide one.
    let seed_path = dir.join(BUILD_DB_FILE);
    if !tokio::fs::try_exists(&seed_path).await? {
        if let Some(published) = store.get(&keys::build_db(repository)).await? {
            tokio::fs::write(&seed_path, published).await?;
        }
    }

    let generated = BuildDbBuilder::new(dir).generate().await?;
    store
        .set(
            &keys::build_db(repository),
            &generated.manifest.to_vec()?,
            None,
        )
        .await?;
    for (label, hashes) in &generated.hashes {
        store
            .set(&keys::hash_db(repository, label), &hashes.to_vec()?, None)
            .await?;
    }

    info!(
        repository = %repository,
        duration_secs = duration,
        labels = generated.hashes.len(),
        "Build metadata updated"
    );
    Ok(generated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_file_names() {
        assert_eq!(signature_file("v1.0"), ".signature_v1.0");
        assert_eq!(hashes_file("master"), ".hashes_master.txt");
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type("a_master_b.zip"), "application/zip");
        assert_eq!(content_type("a.tar.gz"), "application/gzip");
        assert_eq!(content_type("bin"), "application/octet-stream");
    }
}
