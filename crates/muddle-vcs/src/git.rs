//! The git adapter.

use std::path::Path;

use crate::{run, VcsAdapter, VcsError, VcsResult};

#[derive(Debug)]
pub struct Git;

impl Git {
    fn is_dirty(&self, dir: &Path) -> VcsResult<bool> {
        let status = run("git", &["status", "--porcelain"], Some(dir))?;
        Ok(!status.trim().is_empty())
    }
}

impl VcsAdapter for Git {
    fn name(&self) -> &str {
        "git"
    }

    fn vcs_dir_name(&self) -> Option<&str> {
        Some(".git")
    }

    fn checkout(
        &self,
        url: &str,
        dest: &Path,
        branch: Option<&str>,
        revision: Option<&str>,
    ) -> VcsResult<()> {
        let dest_str = dest.to_string_lossy().into_owned();
        let mut args = vec!["clone"];
        if let Some(branch) = branch {
            args.extend(["--branch", branch]);
        }
        args.extend([url, dest_str.as_str()]);
        run("git", &args, None)?;
        if let Some(revision) = revision {
            run("git", &["checkout", revision], Some(dest))?;
        }
        Ok(())
    }

    fn pull(&self, dir: &Path) -> VcsResult<()> {
        run("git", &["fetch", "origin"], Some(dir))?;
        run("git", &["merge", "--ff-only", "FETCH_HEAD"], Some(dir))?;
        Ok(())
    }

    fn merge(&self, dir: &Path) -> VcsResult<()> {
        run("git", &["fetch", "origin"], Some(dir))?;
        run("git", &["merge", "FETCH_HEAD"], Some(dir))?;
        Ok(())
    }

    fn commit(&self, dir: &Path) -> VcsResult<()> {
        if self.is_dirty(dir)? {
            run("git", &["add", "-A"], Some(dir))?;
            run("git", &["commit", "-a", "-m", "commit by muddle"], Some(dir))?;
        }
        Ok(())
    }

    fn push(&self, dir: &Path) -> VcsResult<()> {
        run("git", &["push", "origin", "HEAD"], Some(dir))?;
        Ok(())
    }

    fn status(&self, dir: &Path) -> VcsResult<Option<String>> {
        let porcelain = run("git", &["status", "--porcelain"], Some(dir))?;
        if porcelain.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(porcelain))
        }
    }

    fn reparent(&self, dir: &Path, url: &str) -> VcsResult<()> {
        run("git", &["remote", "set-url", "origin", url], Some(dir))?;
        Ok(())
    }

    fn current_revision(&self, dir: &Path, allow_dirty: bool) -> VcsResult<String> {
        if !allow_dirty && self.is_dirty(dir)? {
            return Err(VcsError::NoRevision(format!(
                "{} has uncommitted changes",
                dir.display()
            )));
        }
        let rev = run("git", &["rev-parse", "HEAD"], Some(dir))?;
        Ok(rev.trim().to_string())
    }
}
