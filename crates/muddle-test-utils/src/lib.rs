//! Hermetic, offline test sandbox.
//!
//! Integration tests need real git repositories to check out from, but
//! must never touch the network or the developer's own git identity.
//! Everything lives under an [`assert_fs::TempDir`] and is cleaned up on
//! drop: a private HOME with its own `.gitconfig`, a directory of local
//! fixture repositories, and a scratch area for build trees.
//!
//! ```no_run
//! use muddle_test_utils::Sandbox;
//!
//! let sb = Sandbox::new();
//! let repo = sb.git_fixture("hello");
//! repo.write("Makefile.muddle", "all:\n\ttrue\n").commit("init");
//! let url = format!("git+file://{}", repo.path().display());
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use assert_fs::fixture::PathChild;
use assert_fs::TempDir;
use duct::cmd;

pub struct Sandbox {
    root: TempDir,
    home: PathBuf,
    repos: PathBuf,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Sandbox {
    pub fn new() -> Self {
        let root = TempDir::new().expect("create sandbox TempDir");
        let home = root.child("home").to_path_buf();
        let repos = root.child("repos").to_path_buf();
        fs::create_dir_all(&home).expect("create home dir");
        fs::create_dir_all(&repos).expect("create repos dir");

        fs::write(
            home.join(".gitconfig"),
            "[user]\n\tname = Muddle Tests\n\temail = tests@muddle.invalid\n\
             [init]\n\tdefaultBranch = main\n\
             [protocol]\n\tallow = never\n\
             [protocol \"file\"]\n\tallow = always\n",
        )
        .expect("write gitconfig");

        Sandbox { root, home, repos }
    }

    pub fn root_path(&self) -> &Path {
        self.root.path()
    }

    /// A fresh directory for a build tree.
    pub fn build_dir(&self, name: &str) -> PathBuf {
        let dir = self.root.child(name).to_path_buf();
        fs::create_dir_all(&dir).expect("create build dir");
        dir
    }

    /// Run `git` with the sandbox's isolated environment.
    pub fn git(&self, dir: &Path, args: &[&str]) {
        let mut full = vec!["-C", dir.to_str().expect("utf-8 path")];
        full.extend_from_slice(args);
        cmd("git", full)
            .env("HOME", self.home.to_string_lossy().into_owned())
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdout_capture()
            .stderr_capture()
            .run()
            .unwrap_or_else(|e| panic!("git {args:?} failed: {e}"));
    }

    /// Create (or reopen) a local git repository fixture.
    pub fn git_fixture(&self, name: &str) -> GitFixture<'_> {
        let path = self.repos.join(name);
        if !path.exists() {
            fs::create_dir_all(&path).expect("create fixture dir");
            self.git(&path, &["init", "-q"]);
        }
        GitFixture { sandbox: self, path }
    }
}

/// One local repository under the sandbox, driven through plain git.
pub struct GitFixture<'a> {
    sandbox: &'a Sandbox,
    path: PathBuf,
}

impl GitFixture<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `git+file://...` URL muddle uses to reach this repository.
    pub fn url(&self) -> String {
        format!("git+file://{}", self.path.display())
    }

    pub fn write(&self, rel: &str, content: &str) -> &Self {
        let path = self.path.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create fixture subdir");
        }
        fs::write(&path, content).expect("write fixture file");
        self
    }

    pub fn commit(&self, message: &str) -> &Self {
        self.sandbox.git(&self.path, &["add", "-A"]);
        self.sandbox
            .git(&self.path, &["commit", "-q", "-m", message]);
        self
    }

    pub fn current_revision(&self) -> String {
        let output = cmd!("git", "-C", self.path.as_os_str(), "rev-parse", "HEAD")
            .env("HOME", self.sandbox.home.to_string_lossy().into_owned())
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .read()
            .expect("rev-parse");
        output.trim().to_string()
    }
}
