use std::io;
use std::path::{Component, Path, PathBuf};

/// Errors that can occur during path validation
#[derive(Debug, thiserror::Error)]
pub enum PathSecurityError {
    #[error("Path '{path}' is outside allowed root directory '{root}'")]
    OutsideRootDirectory { path: PathBuf, root: PathBuf },

    #[error("Path '{path}' must be relative to the root directory")]
    NotRelative { path: PathBuf },

    #[error("Path is empty")]
    Empty,

    #[error("Cannot canonicalize path '{path}': {error}")]
    CannotCanonicalize { path: PathBuf, error: io::Error },

    #[error("Path does not exist: '{path}'")]
    PathNotFound { path: PathBuf },

    #[error("IO error for path '{path}': {error}")]
    IoError { path: PathBuf, error: io::Error },
}

/// Resolves `relative` against `root` and checks that the result stays inside it.
///
/// This function performs the following checks:
/// 1. Rejects empty and absolute inputs
/// 2. Canonicalizes both paths, resolving `.`, `..` and symlinks
/// 3. Ensures the canonical path is within the canonical root
///
/// # Returns
///
/// * `Ok(PathBuf)` - The canonicalized, validated path
/// * `Err(PathSecurityError)` - If validation fails
///
/// # Examples
///
/// ```rust,ignore
/// let script = resolve_within_root(Path::new("./tools"), "scripts/word_count.py")?;
/// ```
pub fn resolve_within_root(root: &Path, relative: &str) -> Result<PathBuf, PathSecurityError> {
    if relative.trim().is_empty() {
        return Err(PathSecurityError::Empty);
    }

    let path = Path::new(relative);
    if path
        .components()
        .any(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
    {
        return Err(PathSecurityError::NotRelative {
            path: path.to_path_buf(),
        });
    }

    let canonical_root = root.canonicalize().map_err(|e| PathSecurityError::IoError {
        path: root.to_path_buf(),
        error: e,
    })?;

    let canonical_path = canonicalize_path(&canonical_root.join(path))?;

    if !is_within_root(&canonical_path, &canonical_root) {
        return Err(PathSecurityError::OutsideRootDirectory {
            path: canonical_path,
            root: canonical_root,
        });
    }

    Ok(canonical_path)
}

/// Checks if a path is within (or equal to) a root directory
fn is_within_root(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

fn canonicalize_path(path: &Path) -> Result<PathBuf, PathSecurityError> {
    path.canonicalize().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            PathSecurityError::PathNotFound {
                path: path.to_path_buf(),
            }
        } else {
            PathSecurityError::CannotCanonicalize {
                path: path.to_path_buf(),
                error: e,
            }
        }
    })
}
