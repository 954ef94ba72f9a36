//! The bazaar adapter.

use std::path::Path;

use crate::{run, VcsAdapter, VcsError, VcsResult};

#[derive(Debug)]
pub struct Bzr;

impl Bzr {
    fn is_dirty(&self, dir: &Path) -> VcsResult<bool> {
        let status = run("bzr", &["status"], Some(dir))?;
        Ok(!status.trim().is_empty())
    }
}

impl VcsAdapter for Bzr {
    fn name(&self) -> &str {
        "bzr"
    }

    fn vcs_dir_name(&self) -> Option<&str> {
        Some(".bzr")
    }

    fn checkout(
        &self,
        url: &str,
        dest: &Path,
        branch: Option<&str>,
        revision: Option<&str>,
    ) -> VcsResult<()> {
        if branch.is_some() {
            // bzr branches are separate URLs; a branch name here is a
            // build-description mistake.
            return Err(VcsError::NotSupported {
                vcs: "bzr".to_string(),
                operation: "named branches (encode the branch in the URL)".to_string(),
            });
        }
        let dest_str = dest.to_string_lossy().into_owned();
        let mut args = vec!["branch"];
        if let Some(revision) = revision {
            args.extend(["-r", revision]);
        }
        args.extend([url, dest_str.as_str()]);
        run("bzr", &args, None)?;
        Ok(())
    }

    fn pull(&self, dir: &Path) -> VcsResult<()> {
        run("bzr", &["pull"], Some(dir))?;
        Ok(())
    }

    fn merge(&self, dir: &Path) -> VcsResult<()> {
        run("bzr", &["merge"], Some(dir))?;
        Ok(())
    }

    fn commit(&self, dir: &Path) -> VcsResult<()> {
        if self.is_dirty(dir)? {
            run("bzr", &["commit", "-m", "commit by muddle"], Some(dir))?;
        }
        Ok(())
    }

    fn push(&self, dir: &Path) -> VcsResult<()> {
        run("bzr", &["push"], Some(dir))?;
        Ok(())
    }

    fn status(&self, dir: &Path) -> VcsResult<Option<String>> {
        let status = run("bzr", &["status"], Some(dir))?;
        if status.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(status))
        }
    }

    fn reparent(&self, dir: &Path, url: &str) -> VcsResult<()> {
        // "bzr bind" expects a branch location; rebinding moves the parent.
        run("bzr", &["bind", url], Some(dir))?;
        Ok(())
    }

    fn current_revision(&self, dir: &Path, allow_dirty: bool) -> VcsResult<String> {
        if !allow_dirty && self.is_dirty(dir)? {
            return Err(VcsError::NoRevision(format!(
                "{} has uncommitted changes",
                dir.display()
            )));
        }
        let rev = run("bzr", &["revno"], Some(dir))?;
        Ok(rev.trim().to_string())
    }
}
