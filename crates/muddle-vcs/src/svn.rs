//! The subversion adapter.
//!
//! Subversion has no local commits, so `commit` and `push` collapse into
//! one remote operation and `merge` is not meaningful.

use std::path::Path;

use crate::{run, VcsAdapter, VcsError, VcsResult};

#[derive(Debug)]
pub struct Svn;

impl Svn {
    fn is_dirty(&self, dir: &Path) -> VcsResult<bool> {
        let status = run("svn", &["status", "-q"], Some(dir))?;
        Ok(!status.trim().is_empty())
    }
}

impl VcsAdapter for Svn {
    fn name(&self) -> &str {
        "svn"
    }

    fn vcs_dir_name(&self) -> Option<&str> {
        Some(".svn")
    }

    fn checkout(
        &self,
        url: &str,
        dest: &Path,
        branch: Option<&str>,
        revision: Option<&str>,
    ) -> VcsResult<()> {
        if branch.is_some() {
            return Err(VcsError::NotSupported {
                vcs: "svn".to_string(),
                operation: "named branches (encode the branch in the URL)".to_string(),
            });
        }
        let dest_str = dest.to_string_lossy().into_owned();
        let mut args = vec!["checkout"];
        if let Some(revision) = revision {
            args.extend(["-r", revision]);
        }
        args.extend([url, dest_str.as_str()]);
        run("svn", &args, None)?;
        Ok(())
    }

    fn pull(&self, dir: &Path) -> VcsResult<()> {
        run("svn", &["update"], Some(dir))?;
        Ok(())
    }

    fn merge(&self, dir: &Path) -> VcsResult<()> {
        Err(VcsError::NotSupported {
            vcs: "svn".to_string(),
            operation: "merge (use 'muddle pull' instead)".to_string(),
        })
    }

    fn commit(&self, dir: &Path) -> VcsResult<()> {
        if self.is_dirty(dir)? {
            run("svn", &["commit", "-m", "commit by muddle"], Some(dir))?;
        }
        Ok(())
    }

    fn push(&self, _dir: &Path) -> VcsResult<()> {
        Err(VcsError::NotSupported {
            vcs: "svn".to_string(),
            operation: "push ('muddle commit' already published the changes)".to_string(),
        })
    }

    fn status(&self, dir: &Path) -> VcsResult<Option<String>> {
        let status = run("svn", &["status"], Some(dir))?;
        if status.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(status))
        }
    }

    fn reparent(&self, dir: &Path, url: &str) -> VcsResult<()> {
        run("svn", &["relocate", url], Some(dir))?;
        Ok(())
    }

    fn current_revision(&self, dir: &Path, allow_dirty: bool) -> VcsResult<String> {
        if !allow_dirty && self.is_dirty(dir)? {
            return Err(VcsError::NoRevision(format!(
                "{} has uncommitted changes",
                dir.display()
            )));
        }
        let rev = run("svnversion", &[], Some(dir))?;
        let rev = rev.trim().to_string();
        if rev.ends_with(['M', 'S', 'P']) && !allow_dirty {
            return Err(VcsError::NoRevision(format!(
                "{} reports a mixed or modified revision '{rev}'",
                dir.display()
            )));
        }
        Ok(rev)
    }
}
