//! The durable surface of a build tree: the `.muddle/` directory.
//!
//! For every non-transient label whose rule has completed, a marker file
//! exists at a deterministic path under `.muddle/tags/`. The directory
//! also records where the build came from (`RootRepository`,
//! `Description`, `VersionsRepository`) and holds per-package instruction
//! files.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MuddleError, Result};
use crate::label::{Label, LabelKind};

pub const MUDDLE_DIR: &str = ".muddle";
pub const TAGS_DIR: &str = "tags";
pub const INSTRUCTIONS_DIR: &str = "instructions";

const ROOT_REPOSITORY_FILE: &str = "RootRepository";
const DESCRIPTION_FILE: &str = "Description";
const VERSIONS_REPOSITORY_FILE: &str = "VersionsRepository";

/// Where a checkout comes from and how it is laid out on disk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckoutInfo {
    /// VCS tag, e.g. `git`.
    pub vcs: String,
    /// Repository URL (without the `<vcs>+` prefix).
    pub repo: String,
    /// Directory relative to `src/`; defaults to the checkout leaf.
    pub dir: Option<String>,
    /// The leaf directory name; defaults to the checkout name.
    pub co_leaf: Option<String>,
    /// Repository path relative to the root repository, when the checkout
    /// was registered relative to it.
    pub relative: Option<String>,
    pub revision: Option<String>,
    pub branch: Option<String>,
}

impl CheckoutInfo {
    /// The checkout's directory relative to `src/`.
    pub fn src_rel(&self, co_name: &str) -> PathBuf {
        match &self.dir {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from(self.co_leaf.as_deref().unwrap_or(co_name)),
        }
    }
}

/// The tag database plus the in-memory checkout registry for one build
/// tree. Only the tags and the three provenance files are durable.
#[derive(Debug)]
pub struct Database {
    root: PathBuf,
    checkouts: BTreeMap<Label, CheckoutInfo>,
}

impl Database {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Database {
            root: root.into(),
            checkouts: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn muddle_dir(&self) -> PathBuf {
        self.root.join(MUDDLE_DIR)
    }

    /// Create `.muddle/` and record the provenance of this build tree.
    pub fn setup(&self, root_repo: &str, description: &str, versions_repo: &str) -> Result<()> {
        let dir = self.muddle_dir();
        fs::create_dir_all(dir.join(TAGS_DIR)).map_err(|e| MuddleError::io(&dir, e))?;
        self.write_one_liner(ROOT_REPOSITORY_FILE, root_repo)?;
        self.write_one_liner(DESCRIPTION_FILE, description)?;
        self.write_one_liner(VERSIONS_REPOSITORY_FILE, versions_repo)?;
        Ok(())
    }

    pub fn root_repository(&self) -> Result<String> {
        self.read_one_liner(ROOT_REPOSITORY_FILE)
    }

    pub fn description(&self) -> Result<String> {
        self.read_one_liner(DESCRIPTION_FILE)
    }

    pub fn versions_repository(&self) -> Result<String> {
        self.read_one_liner(VERSIONS_REPOSITORY_FILE)
    }

    pub fn set_versions_repository(&self, url: &str) -> Result<()> {
        self.write_one_liner(VERSIONS_REPOSITORY_FILE, url)
    }

    fn read_one_liner(&self, name: &str) -> Result<String> {
        let path = self.muddle_dir().join(name);
        let text = fs::read_to_string(&path).map_err(|e| MuddleError::io(&path, e))?;
        Ok(text.trim_end().to_string())
    }

    fn write_one_liner(&self, name: &str, value: &str) -> Result<()> {
        let path = self.muddle_dir().join(name);
        fs::write(&path, format!("{value}\n")).map_err(|e| MuddleError::io(&path, e))
    }

    /// The marker path for a label. Domains become nested directories;
    /// packages always carry a role segment (`_` when the role is absent),
    /// checkouts and deployments never do.
    pub fn tag_path(&self, label: &Label) -> PathBuf {
        let mut path = self.muddle_dir().join(TAGS_DIR).join(label.kind().as_str());
        if let Some(domain) = label.domain() {
            for part in domain.split('.') {
                path.push(part);
            }
        }
        path.push(label.name());
        if label.kind() == &LabelKind::Package {
            path.push(label.role().unwrap_or("_"));
        }
        path.push(label.tag());
        path
    }

    /// Has this label's tag been reached?
    pub fn has_tag(&self, label: &Label) -> bool {
        self.tag_path(label).exists()
    }

    /// Record that the label's tag has been reached. Never called for
    /// transient labels; the builder filters those out.
    pub fn set_tag(&self, label: &Label) -> Result<()> {
        let path = self.tag_path(label);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| MuddleError::io(parent, e))?;
        }
        fs::write(&path, b"").map_err(|e| MuddleError::io(&path, e))
    }

    /// Explicitly retract a tag. Missing markers are not an error.
    pub fn clear_tag(&self, label: &Label) -> Result<()> {
        let path = self.tag_path(label);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MuddleError::io(&path, e)),
        }
    }

    // ------------------------------------------------------------------
    // Instruction files
    // ------------------------------------------------------------------

    /// `.muddle/instructions/<package>/<role>.xml` for a package label.
    pub fn instruction_path(&self, label: &Label) -> PathBuf {
        self.muddle_dir()
            .join(INSTRUCTIONS_DIR)
            .join(label.name())
            .join(format!("{}.xml", label.role().unwrap_or("_")))
    }

    /// Install (copy) an instruction file for the given package label.
    pub fn set_instructions(&self, label: &Label, source: &Path) -> Result<()> {
        let path = self.instruction_path(label);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| MuddleError::io(parent, e))?;
        }
        fs::copy(source, &path).map_err(|e| MuddleError::io(&path, e))?;
        Ok(())
    }

    pub fn clear_instructions(&self, label: &Label) -> Result<()> {
        let path = self.instruction_path(label);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MuddleError::io(&path, e)),
        }
    }

    /// Every instruction file whose (package, role) matches the query
    /// label, sorted by package then role.
    pub fn scan_instructions(&self, query: &Label) -> Result<Vec<(Label, PathBuf)>> {
        let base = self.muddle_dir().join(INSTRUCTIONS_DIR);
        let mut found = Vec::new();
        if !base.exists() {
            return Ok(found);
        }
        let mut packages: Vec<_> = read_dir_names(&base)?;
        packages.sort();
        for pkg in packages {
            let pkg_dir = base.join(&pkg);
            let mut files = read_dir_names(&pkg_dir)?;
            files.sort();
            for file in files {
                let Some(stem) = file.strip_suffix(".xml") else {
                    continue;
                };
                let role = if stem == "_" { None } else { Some(stem) };
                let label = Label::package(query.domain(), &pkg, role, "*")?;
                if query.matches(&label.with_tag(query.tag())).is_some() {
                    found.push((label, pkg_dir.join(&file)));
                }
            }
        }
        Ok(found)
    }

    // ------------------------------------------------------------------
    // Checkout registry (in-memory; populated by the build description)
    // ------------------------------------------------------------------

    fn checkout_key(label: &Label) -> Label {
        label.with_tag("*")
    }

    pub fn register_checkout(&mut self, label: &Label, info: CheckoutInfo) {
        self.checkouts.insert(Self::checkout_key(label), info);
    }

    pub fn checkout_info(&self, label: &Label) -> Result<&CheckoutInfo> {
        self.checkouts
            .get(&Self::checkout_key(label))
            .ok_or_else(|| {
                MuddleError::Configuration(format!("checkout {label} has not been registered"))
            })
    }

    /// All registered checkout labels (tag `*`), sorted.
    pub fn all_checkouts(&self) -> Vec<Label> {
        self.checkouts.keys().cloned().collect()
    }

    /// The checkout's source directory relative to the build root.
    pub fn checkout_rel(&self, label: &Label) -> Result<PathBuf> {
        let info = self.checkout_info(label)?;
        let mut rel = PathBuf::new();
        if let Some(domain) = label.domain() {
            rel.push("domains");
            for part in domain.split('.') {
                rel.push(part);
            }
        }
        rel.push("src");
        rel.push(info.src_rel(label.name()));
        Ok(rel)
    }

    /// Find the checkout whose source directory contains `path` (given
    /// relative to the build root).
    pub fn checkout_for_dir(&self, rel: &Path) -> Option<(&Label, &CheckoutInfo)> {
        self.checkouts.iter().find(|(label, info)| {
            let mut co_rel = PathBuf::new();
            if let Some(domain) = label.domain() {
                co_rel.push("domains");
                for part in domain.split('.') {
                    co_rel.push(part);
                }
            }
            co_rel.push("src");
            co_rel.push(info.src_rel(label.name()));
            rel.starts_with(&co_rel)
        })
    }
}

fn read_dir_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| MuddleError::io(dir, e))? {
        let entry = entry.map_err(|e| MuddleError::io(dir, e))?;
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}
