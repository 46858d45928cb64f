//! Workspace sandbox: path containment and resource limits.
//!
//! All writes are confined to a workspace root; the enclosing project tree
//! is readable but never writable. Containment is decided after both
//! lexical and physical canonicalization, so `..` traversal and symlinks
//! that point outside the root are both caught. Blocked-directory and
//! sensitive-file checks run on the canonical path.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sysinfo::System;
use walkdir::WalkDir;

use crate::error::{Result, SandboxError};

/// Subdirectory of the workspace holding patch bundles.
pub const PATCHES_DIR: &str = "patches";
/// Subdirectory of the workspace holding the task queue.
pub const QUEUE_DIR: &str = "queue";
/// Subdirectory of the queue holding checkpoints.
pub const CHECKPOINTS_DIR: &str = "checkpoints";
/// Subdirectory of the workspace holding chunk and vector artifacts.
pub const STORE_DIR: &str = "store";

/// Resource limits enforced by [`Sandbox::check_resources`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Maximum total workspace size in bytes.
    pub max_workspace_size_bytes: u64,
    /// Minimum free RAM percentage before expensive work is refused.
    pub min_free_ram_percent: f32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_workspace_size_bytes: 1024 * 1024 * 1024,
            min_free_ram_percent: 5.0,
        }
    }
}

/// Workspace sandbox.
///
/// Resolves user-supplied paths to absolute paths under a fixed workspace
/// root for writes, permits read-only access to the enclosing project, and
/// refuses everything else.
#[derive(Debug, Clone)]
pub struct Sandbox {
    workspace_root: PathBuf,
    project_root: PathBuf,
    config: SandboxConfig,
}

impl Sandbox {
    /// Creates a sandbox rooted at `workspace_root`, with the project root
    /// being its parent directory. Creates the workspace layout
    /// (`patches/`, `queue/checkpoints/`, `store/`) if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace cannot be created or canonicalized,
    /// or if it has no parent directory.
    pub fn new(workspace_root: impl AsRef<Path>, config: SandboxConfig) -> Result<Self> {
        let raw = workspace_root.as_ref();
        std::fs::create_dir_all(raw).map_err(|e| SandboxError::Io {
            path: raw.display().to_string(),
            reason: e.to_string(),
        })?;
        let workspace_root = std::fs::canonicalize(raw).map_err(|e| SandboxError::Io {
            path: raw.display().to_string(),
            reason: e.to_string(),
        })?;
        let project_root = workspace_root
            .parent()
            .ok_or_else(|| SandboxError::Io {
                path: workspace_root.display().to_string(),
                reason: "workspace has no parent directory".to_string(),
            })?
            .to_path_buf();

        let sandbox = Self {
            workspace_root,
            project_root,
            config,
        };
        sandbox.ensure_layout()?;
        Ok(sandbox)
    }

    /// Creates the standard workspace subdirectories idempotently.
    fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.workspace_root.join(PATCHES_DIR),
            self.workspace_root.join(QUEUE_DIR).join(CHECKPOINTS_DIR),
            self.workspace_root.join(STORE_DIR),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| SandboxError::Io {
                path: dir.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// The canonical workspace root.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// The canonical project root (parent of the workspace).
    #[must_use]
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Resolves a path for writing: absolute, contained in the workspace,
    /// not blocked.
    ///
    /// # Errors
    ///
    /// `SandboxError::OutsideWorkspace` if resolution escapes the root
    /// (via `..`, an absolute path, or a symlink out);
    /// `SandboxError::BlockedPath` for sensitive patterns.
    pub fn resolve(&self, path: impl AsRef<Path>) -> std::result::Result<PathBuf, SandboxError> {
        let resolved = self.canonicalize_under(path.as_ref(), &self.workspace_root)?;
        if !resolved.starts_with(&self.workspace_root) {
            return Err(SandboxError::OutsideWorkspace {
                path: path.as_ref().display().to_string(),
            });
        }
        self.check_blocked(&resolved, &self.workspace_root)?;
        Ok(resolved)
    }

    /// Resolves a path for reading from the workspace. Same containment
    /// rules as [`Sandbox::resolve`]; existence is not required.
    ///
    /// # Errors
    ///
    /// Same as [`Sandbox::resolve`].
    pub fn resolve_read(
        &self,
        path: impl AsRef<Path>,
    ) -> std::result::Result<PathBuf, SandboxError> {
        self.resolve(path)
    }

    /// Resolves a path for read-only access to the project tree.
    ///
    /// The file must exist. Sensitive patterns (`.env*`, `*.pem`, `*.key`,
    /// `*secret*`, `*credentials*`, `.git/`) are refused.
    ///
    /// # Errors
    ///
    /// `SandboxError::OutsideProject` for escapes,
    /// `SandboxError::BlockedPath` for sensitive matches,
    /// `SandboxError::NotFound` when the target does not exist.
    pub fn resolve_project_read(
        &self,
        path: impl AsRef<Path>,
    ) -> std::result::Result<PathBuf, SandboxError> {
        let resolved = self.canonicalize_under(path.as_ref(), &self.project_root)?;
        if !resolved.starts_with(&self.project_root) {
            return Err(SandboxError::OutsideProject {
                path: path.as_ref().display().to_string(),
            });
        }
        self.check_blocked(&resolved, &self.project_root)?;
        if !resolved.exists() {
            return Err(SandboxError::NotFound {
                path: path.as_ref().display().to_string(),
            });
        }
        Ok(resolved)
    }

    /// Whether an already-resolved path lies inside the workspace.
    #[must_use]
    pub fn contains(&self, resolved: &Path) -> bool {
        resolved.starts_with(&self.workspace_root)
    }

    /// Advisory resource circuit breaker, called before writes and
    /// expensive ingests.
    ///
    /// # Errors
    ///
    /// `SandboxError::ResourceLimit` when the workspace exceeds its size
    /// cap or free RAM drops below the configured floor.
    pub fn check_resources(&self) -> std::result::Result<(), SandboxError> {
        let size = self.workspace_size_bytes();
        if size > self.config.max_workspace_size_bytes {
            return Err(SandboxError::ResourceLimit {
                reason: format!(
                    "workspace size {size} bytes exceeds limit {}",
                    self.config.max_workspace_size_bytes
                ),
            });
        }

        let mut system = System::new();
        system.refresh_memory();
        let total = system.total_memory();
        if total > 0 {
            #[allow(clippy::cast_precision_loss)]
            let free_percent = (system.available_memory() as f32 / total as f32) * 100.0;
            if free_percent < self.config.min_free_ram_percent {
                return Err(SandboxError::ResourceLimit {
                    reason: format!(
                        "free RAM {free_percent:.1}% below floor {:.1}%",
                        self.config.min_free_ram_percent
                    ),
                });
            }
        }
        Ok(())
    }

    /// Total size of all files under the workspace.
    #[must_use]
    pub fn workspace_size_bytes(&self) -> u64 {
        WalkDir::new(&self.workspace_root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// Joins `path` under `root` (relative inputs) or takes it as-is
    /// (absolute inputs), then canonicalizes: the deepest existing ancestor
    /// physically (resolving symlinks), the remainder lexically.
    fn canonicalize_under(
        &self,
        path: &Path,
        root: &Path,
    ) -> std::result::Result<PathBuf, SandboxError> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        };
        let normalized = lexical_normalize(&joined);

        // Physically canonicalize the deepest existing ancestor so symlinks
        // cannot smuggle the path outside the root.
        let mut existing = normalized.clone();
        let mut tail = Vec::new();
        while !existing.exists() {
            let Some(name) = existing.file_name() else {
                break;
            };
            tail.push(name.to_os_string());
            let Some(parent) = existing.parent() else {
                break;
            };
            existing = parent.to_path_buf();
        }
        let mut resolved = if existing.exists() {
            std::fs::canonicalize(&existing).map_err(|e| SandboxError::Io {
                path: existing.display().to_string(),
                reason: e.to_string(),
            })?
        } else {
            existing
        };
        for name in tail.iter().rev() {
            resolved.push(name);
        }
        Ok(resolved)
    }

    /// Rejects paths whose workspace- or project-relative components match
    /// the blocked set. Runs after canonicalization.
    fn check_blocked(
        &self,
        resolved: &Path,
        root: &Path,
    ) -> std::result::Result<(), SandboxError> {
        let rel = resolved.strip_prefix(root).unwrap_or(resolved);
        for component in rel.components() {
            let name = component.as_os_str().to_string_lossy();
            if is_sensitive_component(&name) {
                return Err(SandboxError::BlockedPath {
                    path: resolved.display().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Lexically normalizes a path: resolves `.` and `..` components without
/// touching the filesystem. `..` above the root is dropped, which leaves
/// the result at the filesystem root where containment checks then fail.
#[must_use]
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // pop() is a no-op at the root, which pins escapes there.
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Whether a single path component matches the sensitive-pattern set:
/// `.env*`, `*.pem`, `*.key`, `*secret*`, `*credentials*`, `.git`.
#[must_use]
pub fn is_sensitive_component(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower == ".git"
        || lower.starts_with(".env")
        || lower.ends_with(".pem")
        || lower.ends_with(".key")
        || lower.contains("secret")
        || lower.contains("credentials")
}
