use crate::orchestration::error::{io_error, OrchestratorError};
use crate::shared::fs_atomic::{atomic_write_file, canonicalize_existing};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProposal {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedFile {
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub applied: Vec<AppliedFile>,
    pub rejected: Vec<RejectedFile>,
}

/// Read the `files` array out of a role payload. Entries that are not
/// `{path, content}` objects are skipped; payloads are free-form and the
/// accessor must not fail on shape surprises.
pub fn proposals_from_payload(payload: &Map<String, Value>) -> Vec<FileProposal> {
    let Some(entries) = payload.get("files").and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let path = entry.get("path").and_then(Value::as_str)?;
            let content = entry.get("content").and_then(Value::as_str)?;
            Some(FileProposal {
                path: path.to_string(),
                content: content.to_string(),
            })
        })
        .collect()
}

/// Materialise proposals under the workspace root. Invalid proposals are
/// collected as rejections and the rest of the batch still lands; real I/O
/// failures abort.
pub fn apply_proposals(
    workspace_root: &Path,
    proposals: &[FileProposal],
    allowed_extensions: &[String],
) -> Result<ApplyOutcome, OrchestratorError> {
    let canonical_root =
        canonicalize_existing(workspace_root).map_err(|err| io_error(workspace_root, err))?;

    let mut outcome = ApplyOutcome::default();
    for proposal in proposals {
        let relative = match validate_proposal_path(&proposal.path, allowed_extensions) {
            Ok(relative) => relative,
            Err(reason) => {
                outcome.rejected.push(RejectedFile {
                    path: proposal.path.clone(),
                    reason,
                });
                continue;
            }
        };

        let target = canonical_root.join(&relative);
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| canonical_root.clone());
        fs::create_dir_all(&parent).map_err(|err| io_error(&parent, err))?;

        // Containment is checked on the canonical parent so a symlinked
        // directory cannot smuggle the write outside the root.
        let canonical_parent = match canonicalize_existing(&parent) {
            Ok(path) => path,
            Err(err) => return Err(io_error(&parent, err)),
        };
        if !canonical_parent.starts_with(&canonical_root) {
            outcome.rejected.push(RejectedFile {
                path: proposal.path.clone(),
                reason: "resolved path escapes the workspace root".to_string(),
            });
            continue;
        }
        if let Ok(meta) = fs::symlink_metadata(&target) {
            if meta.file_type().is_symlink() {
                outcome.rejected.push(RejectedFile {
                    path: proposal.path.clone(),
                    reason: "target is a symlink".to_string(),
                });
                continue;
            }
        }

        atomic_write_file(&target, proposal.content.as_bytes())
            .map_err(|err| io_error(&target, err))?;

        let mut hasher = Sha256::new();
        hasher.update(proposal.content.as_bytes());
        outcome.applied.push(AppliedFile {
            path: relative.display().to_string(),
            bytes: proposal.content.len() as u64,
            sha256: format!("{:x}", hasher.finalize()),
        });
    }
    Ok(outcome)
}

/// Normalise and validate a proposed relative path. Both separator styles are
/// treated as separators so a `..` cannot hide behind backslashes; trailing
/// separators are ignored.
pub fn validate_proposal_path(
    raw: &str,
    allowed_extensions: &[String],
) -> Result<PathBuf, String> {
    if raw.trim().is_empty() {
        return Err("path must be non-empty".to_string());
    }
    let unified = raw.replace('\\', "/");
    let trimmed = unified.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err("path must name a file".to_string());
    }
    if trimmed.starts_with('/') {
        return Err("path must be relative".to_string());
    }
    if trimmed.len() >= 2 && trimmed.as_bytes()[1] == b':' {
        return Err("path must be relative".to_string());
    }

    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." {
            return Err("path must not contain `..` segments".to_string());
        }
        segments.push(segment);
    }
    if segments.is_empty() {
        return Err("path must name a file".to_string());
    }

    if !allowed_extensions.is_empty() {
        let file_name = segments[segments.len() - 1];
        let extension = file_name
            .rsplit_once('.')
            .map(|(stem, ext)| if stem.is_empty() { "" } else { ext })
            .unwrap_or("");
        let allowed = allowed_extensions
            .iter()
            .any(|entry| entry.trim_start_matches('.').eq_ignore_ascii_case(extension));
        if extension.is_empty() || !allowed {
            return Err(format!(
                "extension `{extension}` is not in the allow-list"
            ));
        }
    }

    Ok(segments.iter().collect())
}
