// src/core/template_fs/mod.rs

//! Manages each cluster's on-disk root: template instantiation, script
//! staging, and POSIX permission normalization (spec §4.D).

use crate::core::errors::ControlPlaneError;
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[cfg(unix)]
const DIR_MODE: u32 = 0o775;
#[cfg(unix)]
const FILE_MODE: u32 = 0o664;

/// Creates a cluster's root directory (and any missing parents).
pub async fn create_cluster_dir(root: &Path) -> Result<(), ControlPlaneError> {
    tokio::fs::create_dir_all(root).await?;
    normalize_permissions(root).await?;
    Ok(())
}

/// Recursively copies `template_dir` into `dest_root`, normalizing
/// permissions on every created entry (spec §4.D: directories get
/// owner/group rwx + other rx, files get owner/group rw + other r).
pub async fn copy_template(template_dir: &Path, dest_root: &Path) -> Result<(), ControlPlaneError> {
    copy_dir_recursive(template_dir, dest_root).await
}

/// Copies the template's `scripts/` subdirectory (if present) into the
/// cluster root's `scripts/` directory, same permission rules as
/// [`copy_template`] (spec §4.D).
pub async fn copy_scripts(template_dir: &Path, dest_root: &Path) -> Result<(), ControlPlaneError> {
    let src = template_dir.join("scripts");
    if !tokio::fs::try_exists(&src).await.unwrap_or(false) {
        return Ok(());
    }
    copy_dir_recursive(&src, &dest_root.join("scripts")).await
}

fn copy_dir_recursive<'a>(
    src: &'a Path,
    dest: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ControlPlaneError>> + Send + 'a>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(dest).await?;
        normalize_permissions(dest).await?;

        let mut entries = tokio::fs::read_dir(src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let dest_path = dest.join(entry.file_name());
            if file_type.is_dir() {
                copy_dir_recursive(&entry.path(), &dest_path).await?;
            } else if file_type.is_file() {
                tokio::fs::copy(entry.path(), &dest_path).await?;
                normalize_permissions(&dest_path).await?;
            }
        }
        Ok(())
    })
}

#[cfg(unix)]
async fn normalize_permissions(path: &Path) -> Result<(), ControlPlaneError> {
    let meta = tokio::fs::metadata(path).await?;
    let mode = if meta.is_dir() { DIR_MODE } else { FILE_MODE };
    let perms = std::fs::Permissions::from_mode(mode);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn normalize_permissions(_path: &Path) -> Result<(), ControlPlaneError> {
    Ok(())
}

/// Removes a cluster's root directory tree (spec §4.D, delete flow).
pub async fn remove_dir(root: &Path) -> Result<(), ControlPlaneError> {
    if tokio::fs::try_exists(root).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(root).await?;
    }
    Ok(())
}

pub async fn read_file(path: &Path) -> Result<String, ControlPlaneError> {
    Ok(tokio::fs::read_to_string(path).await?)
}

pub async fn write_file(path: &Path, contents: &str) -> Result<(), ControlPlaneError> {
    tokio::fs::write(path, contents).await?;
    normalize_permissions(path).await?;
    Ok(())
}

/// Builds the canonical cluster root path from a configured base directory
/// and sanitized cluster name (spec §4.D).
pub fn cluster_root(base_dir: &Path, sanitized_name: &str) -> PathBuf {
    base_dir.join(sanitized_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn copy_template_mirrors_tree_and_sets_permissions() {
        let src = tempdir().unwrap();
        tokio::fs::create_dir_all(src.path().join("sub")).await.unwrap();
        tokio::fs::write(src.path().join("index.php"), b"<?php echo 1;").await.unwrap();
        tokio::fs::write(src.path().join("sub/nested.txt"), b"x").await.unwrap();

        let dest = tempdir().unwrap();
        let dest_root = dest.path().join("cluster_root");
        copy_template(src.path(), &dest_root).await.unwrap();

        assert!(tokio::fs::try_exists(dest_root.join("index.php")).await.unwrap());
        assert!(tokio::fs::try_exists(dest_root.join("sub/nested.txt")).await.unwrap());

        #[cfg(unix)]
        {
            let meta = tokio::fs::metadata(dest_root.join("index.php")).await.unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, FILE_MODE);
        }
    }

    #[tokio::test]
    async fn copy_scripts_is_a_noop_when_missing() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        copy_scripts(src.path(), dest.path()).await.unwrap();
        assert!(!tokio::fs::try_exists(dest.path().join("scripts")).await.unwrap());
    }

    #[tokio::test]
    async fn remove_dir_is_idempotent() {
        let dest = tempdir().unwrap();
        let root = dest.path().join("gone_already");
        remove_dir(&root).await.unwrap();
        remove_dir(&root).await.unwrap();
    }
}
