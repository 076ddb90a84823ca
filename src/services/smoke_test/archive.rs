//! 发布包检查
//!
//! 发布包为 `<tag>.tar.gz`，必须只有一个顶层目录 `<tag>/`，
//! 并包含生命周期脚本、Keycloak 模板与维护页面等固定文件。

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tokio::task::spawn_blocking;
use tracing::debug;

use crate::domain::tag::DeployTag;
use crate::error::{DeployError, DeployResult};

/// 发布包内必须存在的文件（相对 `<tag>/`）
pub const REQUIRED_RELEASE_FILES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.staging.yml",
    "docker-compose.production.yml",
    "scripts/server.sh",
    "scripts/init-server.sh",
    "scripts/merge-secrets.sh",
    "scripts/maintenance.sh",
    "keycloak/realm-template.json",
    "maintenance/index.html",
];

/// 已检查的本地发布包
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseArchive {
    pub path: PathBuf,
    pub size: u64,
}

/// 检查发布包是否存在、结构是否正确、必需文件是否齐全
pub async fn inspect(
    path: &Path,
    tag: &DeployTag,
    extra_required: &[String],
) -> DeployResult<ReleaseArchive> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        DeployError::precondition(format!("Release archive {} not found: {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(DeployError::precondition(format!(
            "Release archive {} is not a file",
            path.display()
        )));
    }

    let owned = path.to_owned();
    let entries = spawn_blocking(move || list_entries(&owned))
        .await
        .map_err(|e| DeployError::precondition(format!("Archive listing task failed: {}", e)))?
        .map_err(|e| {
            DeployError::precondition(format!(
                "Release archive {} could not be read: {}",
                path.display(),
                e
            ))
        })?;

    debug!(archive = %path.display(), entries = entries.len(), "Listed release archive");

    let mut required: Vec<String> = REQUIRED_RELEASE_FILES.iter().map(|s| s.to_string()).collect();
    required.extend(extra_required.iter().cloned());

    check_layout(&entries, tag.as_str(), &required).map_err(|reason| {
        DeployError::precondition(format!("Release archive {} {}", path.display(), reason))
    })?;

    Ok(ReleaseArchive {
        path: path.to_path_buf(),
        size: metadata.len(),
    })
}

/// 列出 tar.gz 中的所有成员路径
fn list_entries(path: &Path) -> std::io::Result<Vec<String>> {
    let file = File::open(path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

    let mut names = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        names.push(entry.path()?.to_string_lossy().into_owned());
    }
    Ok(names)
}

/// 成员路径必须全部位于 `<tag>/` 之下，并覆盖全部必需文件
pub fn check_layout(entries: &[String], tag: &str, required: &[String]) -> Result<(), String> {
    if entries.is_empty() {
        return Err("is empty".to_string());
    }

    let prefix = format!("{}/", tag);
    let mut present = HashSet::new();

    for entry in entries {
        let name = entry.strip_prefix("./").unwrap_or(entry);
        if name.is_empty() {
            continue;
        }
        let inside = name == tag || name.starts_with(&prefix);
        if !inside || name.split('/').any(|part| part == "..") {
            return Err(format!(
                "is not in the expected directory structure: '{}' is outside '{}'",
                entry, prefix
            ));
        }
        present.insert(name.trim_end_matches('/').to_string());
    }

    for file in required {
        let expected = format!("{}{}", prefix, file);
        if !present.contains(&expected) {
            return Err(format!("is missing required file '{}'", expected));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    const TAG: &str = "25.0615.1000.00";

    fn all_required() -> Vec<String> {
        REQUIRED_RELEASE_FILES
            .iter()
            .map(|f| format!("{}/{}", TAG, f))
            .collect()
    }

    fn build_archive(dir: &TempDir, members: &[String]) -> PathBuf {
        let path = dir.path().join(format!("{}.tar.gz", TAG));
        let file = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::fast()));
        for name in members {
            let data = b"#!/bin/sh\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, name, &data[..]).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    #[test]
    fn test_layout_ok() {
        let mut entries = vec![format!("./{}/", TAG)];
        entries.extend(all_required());
        let required: Vec<String> = REQUIRED_RELEASE_FILES.iter().map(|s| s.to_string()).collect();
        assert!(check_layout(&entries, TAG, &required).is_ok());
    }

    #[test]
    fn test_layout_rejects_outside_entry() {
        let mut entries = all_required();
        entries.push("README.md".to_string());
        let err = check_layout(&entries, TAG, &[]).unwrap_err();
        assert!(err.contains("not in the expected directory structure"), "{}", err);

        let entries = vec![format!("{}/../evil", TAG)];
        assert!(check_layout(&entries, TAG, &[]).is_err());

        let entries = vec![format!("{}-other/file", TAG)];
        assert!(check_layout(&entries, TAG, &[]).is_err());
    }

    #[test]
    fn test_layout_reports_missing_file() {
        let entries = vec![format!("{}/docker-compose.yml", TAG)];
        let required = vec!["docker-compose.yml".to_string(), "scripts/server.sh".to_string()];
        let err = check_layout(&entries, TAG, &required).unwrap_err();
        assert!(err.contains("scripts/server.sh"), "{}", err);
    }

    #[tokio::test]
    async fn test_inspect_real_archive() {
        let dir = TempDir::new().unwrap();
        let mut members = all_required();
        members.push(format!("{}/docker-compose.local-db.yml", TAG));
        let path = build_archive(&dir, &members);
        let tag = DeployTag::parse(TAG).unwrap();

        let archive = inspect(&path, &tag, &["docker-compose.local-db.yml".to_string()])
            .await
            .unwrap();
        assert_eq!(archive.path, path);
        assert!(archive.size > 0);
    }

    #[tokio::test]
    async fn test_inspect_archive_with_stray_file() {
        let dir = TempDir::new().unwrap();
        let mut members = all_required();
        members.push("stray.txt".to_string());
        let path = build_archive(&dir, &members);
        let tag = DeployTag::parse(TAG).unwrap();

        let err = inspect(&path, &tag, &[]).await.unwrap_err();
        assert!(matches!(err, DeployError::Precondition(_)));
        assert!(err.to_string().contains("not in the expected directory structure"));
    }

    #[tokio::test]
    async fn test_inspect_missing_archive() {
        let dir = TempDir::new().unwrap();
        let tag = DeployTag::parse(TAG).unwrap();
        let err = inspect(&dir.path().join("nope.tar.gz"), &tag, &[]).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
