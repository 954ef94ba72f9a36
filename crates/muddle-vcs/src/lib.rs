//! Version-control adapters.
//!
//! Checkout actions, the stamp codec and the distribution planner all talk
//! to version control through the narrow [`VcsAdapter`] interface; a
//! [`VcsRegistry`] maps a VCS tag (`git`, `bzr`, `svn`) to its adapter.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use log::debug;
use muddle_core::MuddleError;
use thiserror::Error;

mod bzr;
mod git;
mod svn;

pub use bzr::Bzr;
pub use git::Git;
pub use svn::Svn;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("no VCS registered under the name '{0}'")]
    UnknownVcs(String),

    #[error("'{url}' is not of the form <vcs>+<repository-url>")]
    BadUrl { url: String },

    #[error("{vcs} does not support {operation}")]
    NotSupported { vcs: String, operation: String },

    #[error("cannot determine a revision: {0}")]
    NoRevision(String),

    #[error("command '{command}' failed:\n{stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl From<VcsError> for MuddleError {
    fn from(e: VcsError) -> Self {
        MuddleError::GiveUp(e.to_string())
    }
}

pub type VcsResult<T> = Result<T, VcsError>;

/// A repository address of the form `<vcs>+<url>`, e.g.
/// `git+file:///srv/repo/main` or `svn+http://example.com/svn`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VcsUrl {
    pub vcs: String,
    pub url: String,
}

impl VcsUrl {
    pub fn parse(s: &str) -> VcsResult<Self> {
        match s.split_once('+') {
            Some((vcs, url)) if !vcs.is_empty() && !url.is_empty() => Ok(VcsUrl {
                vcs: vcs.to_string(),
                url: url.to_string(),
            }),
            _ => Err(VcsError::BadUrl { url: s.to_string() }),
        }
    }

    /// Join a relative repository path onto this URL.
    pub fn join(&self, rel: &str) -> VcsUrl {
        VcsUrl {
            vcs: self.vcs.clone(),
            url: format!("{}/{}", self.url.trim_end_matches('/'), rel),
        }
    }
}

impl fmt::Display for VcsUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.vcs, self.url)
    }
}

/// Per-checkout version-control operations. Adapters are stateless; every
/// call names the working directory it applies to.
pub trait VcsAdapter: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// The metadata subdirectory this VCS keeps in a working tree
    /// (`.git`, `.bzr`, `.svn`), if any.
    fn vcs_dir_name(&self) -> Option<&str>;

    /// Clone `url` into `dest` (which must not yet exist), at the given
    /// branch and/or revision when specified.
    fn checkout(
        &self,
        url: &str,
        dest: &Path,
        branch: Option<&str>,
        revision: Option<&str>,
    ) -> VcsResult<()>;

    /// Update the working tree from its remote; fast-forward only.
    fn pull(&self, dir: &Path) -> VcsResult<()>;

    /// Update the working tree from its remote, merging if needed.
    fn merge(&self, dir: &Path) -> VcsResult<()>;

    /// Commit all local changes.
    fn commit(&self, dir: &Path) -> VcsResult<()>;

    /// Push committed changes to the remote.
    fn push(&self, dir: &Path) -> VcsResult<()>;

    /// A human-readable summary of local state, or `None` when the tree
    /// is clean and in sync.
    fn status(&self, dir: &Path) -> VcsResult<Option<String>>;

    /// Point the working tree's idea of its remote at `url`.
    fn reparent(&self, dir: &Path, url: &str) -> VcsResult<()>;

    /// The current revision identifier. Fails with
    /// [`VcsError::NoRevision`] when the tree has uncommitted changes and
    /// `allow_dirty` is false.
    fn current_revision(&self, dir: &Path, allow_dirty: bool) -> VcsResult<String>;
}

/// Maps VCS tags to adapters.
#[derive(Clone, Debug, Default)]
pub struct VcsRegistry {
    adapters: BTreeMap<String, Arc<dyn VcsAdapter>>,
}

impl VcsRegistry {
    pub fn new() -> Self {
        VcsRegistry::default()
    }

    /// A registry with the standard adapters installed.
    pub fn with_standard() -> Self {
        let mut registry = VcsRegistry::new();
        registry.register(Arc::new(Git));
        registry.register(Arc::new(Bzr));
        registry.register(Arc::new(Svn));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn VcsAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> VcsResult<Arc<dyn VcsAdapter>> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| VcsError::UnknownVcs(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }
}

/// Run a VCS command, capturing output and turning a non-zero exit into
/// an error that quotes stderr.
pub(crate) fn run(program: &str, args: &[&str], dir: Option<&Path>) -> VcsResult<String> {
    let mut command = Command::new(program);
    command.args(args);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    debug!("running {program} {}", args.join(" "));
    let output = command.output()?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(VcsError::CommandFailed {
            command: format!("{program} {}", args.join(" ")),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vcs_url_splits_on_the_first_plus() {
        let url = VcsUrl::parse("git+file:///srv/repo/main").unwrap();
        assert_eq!(url.vcs, "git");
        assert_eq!(url.url, "file:///srv/repo/main");
        assert_eq!(url.to_string(), "git+file:///srv/repo/main");

        // A '+' inside the URL proper is preserved.
        let url = VcsUrl::parse("bzr+http://host/a+b").unwrap();
        assert_eq!(url.url, "http://host/a+b");
    }

    #[test]
    fn vcs_url_rejects_malformed_input() {
        for bad in ["file:///srv/repo", "+url", "git+", ""] {
            assert!(VcsUrl::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn vcs_url_join() {
        let url = VcsUrl::parse("git+file:///srv/repo/").unwrap();
        assert_eq!(url.join("hello").url, "file:///srv/repo/hello");
    }

    #[test]
    fn registry_knows_the_standard_adapters() {
        let registry = VcsRegistry::with_standard();
        assert_eq!(registry.names(), ["bzr", "git", "svn"]);
        assert_eq!(registry.get("git").unwrap().vcs_dir_name(), Some(".git"));
        assert_eq!(registry.get("bzr").unwrap().vcs_dir_name(), Some(".bzr"));
        assert!(matches!(
            registry.get("cvs").unwrap_err(),
            VcsError::UnknownVcs(_)
        ));
    }
}
