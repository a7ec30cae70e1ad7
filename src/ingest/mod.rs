//! Ingest pipeline: spool handling and the indexing consumer pool.

use std::path::{Path, PathBuf};

pub mod consumer;

pub use consumer::{start_consumers, ConsumerDeps};

/// Spool location for a freshly received file awaiting indexing.
pub fn spool_file(spool_dir: &Path, tenant_code: &str, original_name: &str) -> PathBuf {
    let safe_name = sanitize_file_name(original_name);
    spool_dir
        .join("incoming")
        .join(tenant_code)
        .join(format!("{}_{}", uuid::Uuid::new_v4(), safe_name))
}

/// Quarantine location for a file that failed to parse or store: the
/// file keeps its original upload name under `error/{tenant}/`.
pub fn quarantine_file(spool_dir: &Path, tenant_code: &str, original: &Path) -> PathBuf {
    let name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed.dcm".to_string());
    let name = strip_spool_prefix(&name).to_string();
    spool_dir.join("error").join(tenant_code).join(name)
}

/// Undo the `{uuid}_` prefix [`spool_file`] adds. Paths that did not
/// come through the spool (transfer commits) pass through unchanged.
fn strip_spool_prefix(name: &str) -> &str {
    match name.split_once('_') {
        Some((prefix, rest)) if !rest.is_empty() && uuid::Uuid::parse_str(prefix).is_ok() => rest,
        _ => name,
    }
}

/// Strip path separators and oddities from client-supplied names.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload.dcm".to_string()
    } else {
        cleaned
    }
}

/// Move a failed file into quarantine, falling back to copy+remove when
/// the rename crosses filesystems.
pub async fn quarantine(spool_dir: &Path, tenant_code: &str, file: &Path) {
    let target = quarantine_file(spool_dir, tenant_code, file);
    if let Some(parent) = target.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    let moved = match tokio::fs::rename(file, &target).await {
        Ok(()) => true,
        Err(_) => match tokio::fs::copy(file, &target).await {
            Ok(_) => tokio::fs::remove_file(file).await.is_ok(),
            Err(e) => {
                tracing::error!(file = %file.display(), "quarantine failed: {}", e);
                false
            }
        },
    };
    if moved {
        tracing::warn!(file = %file.display(), quarantined = %target.display(), "file quarantined");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spool_paths_are_tenant_scoped() {
        let path = spool_file(Path::new("/spool"), "h1", "scan.dcm");
        let display = path.display().to_string();
        assert!(display.starts_with("/spool/incoming/h1/"));
        assert!(display.ends_with("_scan.dcm"));
    }

    #[test]
    fn file_names_are_sanitised() {
        let path = spool_file(Path::new("/spool"), "h1", "../../etc/passwd");
        assert!(!path.display().to_string().contains("../"));
    }

    #[test]
    fn quarantine_restores_the_original_name_from_a_spooled_path() {
        let spooled = spool_file(Path::new("/spool"), "h1", "scan.dcm");
        let path = quarantine_file(Path::new("/spool"), "h1", &spooled);
        assert_eq!(path, PathBuf::from("/spool/error/h1/scan.dcm"));
    }

    #[test]
    fn quarantine_keeps_underscored_names_intact() {
        let spooled = spool_file(Path::new("/spool"), "h1", "mr_head_001.dcm");
        let path = quarantine_file(Path::new("/spool"), "h1", &spooled);
        assert_eq!(path, PathBuf::from("/spool/error/h1/mr_head_001.dcm"));
    }

    #[test]
    fn quarantine_passes_non_spool_paths_through() {
        let path = quarantine_file(
            Path::new("/spool"),
            "h1",
            Path::new("/gateway/out/handoff_x.dcm"),
        );
        assert_eq!(path, PathBuf::from("/spool/error/h1/handoff_x.dcm"));
    }
}
