//! The tree-copy primitive used when a distribution is produced.

use std::fs;
use std::path::Path;

use muddle_core::{MuddleError, Result};
use walkdir::WalkDir;

/// Copy `src` to `dst` recursively, skipping any entry whose file name or
/// src-relative path equals one of `exclusions`. Symlinks are copied as
/// symlinks; missing sources are the caller's problem.
pub fn copy_tree(src: &Path, dst: &Path, exclusions: &[String]) -> Result<()> {
    let excluded = |entry: &walkdir::DirEntry| -> bool {
        let name_matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| exclusions.iter().any(|x| x == name));
        if name_matches {
            return true;
        }
        entry
            .path()
            .strip_prefix(src)
            .ok()
            .and_then(|rel| rel.to_str())
            .is_some_and(|rel| exclusions.iter().any(|x| x == rel))
    };

    for entry in WalkDir::new(src)
        .into_iter()
        .filter_entry(|e| !excluded(e))
    {
        let entry = entry.map_err(|e| {
            MuddleError::GiveUp(format!("walking {}: {e}", src.display()))
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| MuddleError::Bug(format!("walkdir escaped its root: {e}")))?;
        let target = dst.join(rel);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| MuddleError::io(&target, e))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .map_err(|e| MuddleError::io(entry.path(), e))?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| MuddleError::io(parent, e))?;
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target)
                .map_err(|e| MuddleError::io(&target, e))?;
            #[cfg(not(unix))]
            fs::copy(entry.path(), &target).map_err(|e| MuddleError::io(&target, e))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| MuddleError::io(parent, e))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| MuddleError::io(&target, e))?;
        }
    }
    Ok(())
}
