//! Stamp files: a textual snapshot of where every checkout in a build
//! tree came from and which revision it was at, sufficient to reproduce
//! the tree elsewhere.
//!
//! The format is a small INI dialect:
//!
//! ```text
//! [STAMP]
//! version = 1
//! [BUILD]
//! repository = git+file:///srv/repo/main
//! description = builds/muddle.toml
//! versions_repo =
//! [CHECKOUT hello]
//! repository = git+file:///srv/repo/hello
//! revision = 58107d...
//! ...
//! ```
//!
//! Sections are written in a stable, alphabetical order so that two
//! captures of the same tree are byte-identical; the SHA-1 of the
//! rendered text names saves that were not given an explicit name. When
//! any checkout's revision cannot be determined the file is written with
//! a `.partial` extension, and restoring from it requires `force`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use muddle_core::{tag, CheckoutInfo, Database, Label, Layout, MuddleError};
use muddle_vcs::{VcsRegistry, VcsUrl};
use sha1::{Digest, Sha1};
use thiserror::Error;

pub const STAMP_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StampError {
    #[error("stamp file is malformed: {0}")]
    BadFormat(String),

    #[error("stamp file version {0} is not supported")]
    UnsupportedVersion(u32),

    #[error("stamp is partial (some revisions are unknown); pass force to use it anyway")]
    Partial,

    #[error("{}: {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error(transparent)]
    Vcs(#[from] muddle_vcs::VcsError),

    #[error(transparent)]
    Core(#[from] MuddleError),
}

impl From<StampError> for MuddleError {
    fn from(e: StampError) -> Self {
        match e {
            StampError::Core(inner) => inner,
            other => MuddleError::GiveUp(other.to_string()),
        }
    }
}

/// One `[CHECKOUT]` section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckoutStamp {
    pub repository: String,
    /// `None` when the revision could not be determined.
    pub revision: Option<String>,
    pub relative: String,
    pub directory: String,
    pub domain: String,
    pub co_leaf: String,
    pub branch: String,
}

/// One `[DOMAIN]` section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainStamp {
    pub repository: String,
    pub description: String,
}

/// A parsed or captured stamp.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stamp {
    pub repository: String,
    pub description: String,
    pub versions_repo: String,
    /// Keyed by `name` or `(domain)name`.
    pub checkouts: BTreeMap<String, CheckoutStamp>,
    pub domains: BTreeMap<String, DomainStamp>,
}

/// How to behave when a checkout's revision cannot be determined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevisionPolicy {
    /// Record nothing and mark the stamp partial.
    Normal,
    /// Use the revision even if the working tree is dirty.
    Force,
    /// Record the symbolic head instead of a concrete revision.
    Head,
}

impl Stamp {
    /// Is any checkout's revision unknown?
    pub fn is_partial(&self) -> bool {
        self.checkouts.values().any(|c| c.revision.is_none())
    }

    /// Render in the stable on-disk form.
    pub fn write_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "[STAMP]");
        let _ = writeln!(out, "version = {STAMP_VERSION}");
        let _ = writeln!(out, "[BUILD]");
        let _ = writeln!(out, "repository = {}", self.repository);
        let _ = writeln!(out, "description = {}", self.description);
        let _ = writeln!(out, "versions_repo = {}", self.versions_repo);
        for (name, co) in &self.checkouts {
            let _ = writeln!(out, "[CHECKOUT {name}]");
            let _ = writeln!(out, "repository = {}", co.repository);
            let _ = writeln!(out, "revision = {}", co.revision.as_deref().unwrap_or(""));
            let _ = writeln!(out, "relative = {}", co.relative);
            let _ = writeln!(out, "directory = {}", co.directory);
            let _ = writeln!(out, "domain = {}", co.domain);
            let _ = writeln!(out, "co_leaf = {}", co.co_leaf);
            let _ = writeln!(out, "branch = {}", co.branch);
        }
        for (name, domain) in &self.domains {
            let _ = writeln!(out, "[DOMAIN {name}]");
            let _ = writeln!(out, "repository = {}", domain.repository);
            let _ = writeln!(out, "description = {}", domain.description);
        }
        out
    }

    /// The SHA-1 of the rendered text, used to name stampless saves.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.write_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn parse(text: &str) -> Result<Self, StampError> {
        #[derive(PartialEq)]
        enum Section {
            None,
            Stamp,
            Build,
            Checkout(String),
            Domain(String),
        }

        let mut stamp = Stamp::default();
        let mut version = None;
        let mut section = Section::None;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = match header.split_once(' ') {
                    None if header == "STAMP" => Section::Stamp,
                    None if header == "BUILD" => Section::Build,
                    Some(("CHECKOUT", name)) => {
                        stamp
                            .checkouts
                            .insert(name.to_string(), CheckoutStamp::default());
                        Section::Checkout(name.to_string())
                    }
                    Some(("DOMAIN", name)) => {
                        stamp
                            .domains
                            .insert(name.to_string(), DomainStamp::default());
                        Section::Domain(name.to_string())
                    }
                    _ => {
                        return Err(StampError::BadFormat(format!(
                            "line {}: unknown section '{header}'",
                            lineno + 1
                        )))
                    }
                };
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(StampError::BadFormat(format!(
                    "line {}: expected 'key = value', got '{line}'",
                    lineno + 1
                )));
            };
            let key = key.trim();
            let value = value.trim();
            match &section {
                Section::None => {
                    return Err(StampError::BadFormat(format!(
                        "line {}: '{key}' outside any section",
                        lineno + 1
                    )))
                }
                Section::Stamp => {
                    if key == "version" {
                        version = Some(value.parse::<u32>().map_err(|_| {
                            StampError::BadFormat(format!("bad version '{value}'"))
                        })?);
                    }
                }
                Section::Build => match key {
                    "repository" => stamp.repository = value.to_string(),
                    "description" => stamp.description = value.to_string(),
                    "versions_repo" => stamp.versions_repo = value.to_string(),
                    _ => {}
                },
                Section::Checkout(name) => {
                    let co = stamp.checkouts.get_mut(name).expect("section was inserted");
                    match key {
                        "repository" => co.repository = value.to_string(),
                        "revision" => {
                            co.revision = if value.is_empty() {
                                None
                            } else {
                                Some(value.to_string())
                            }
                        }
                        "relative" => co.relative = value.to_string(),
                        "directory" => co.directory = value.to_string(),
                        "domain" => co.domain = value.to_string(),
                        "co_leaf" => co.co_leaf = value.to_string(),
                        "branch" => co.branch = value.to_string(),
                        _ => {}
                    }
                }
                Section::Domain(name) => {
                    let domain = stamp.domains.get_mut(name).expect("section was inserted");
                    match key {
                        "repository" => domain.repository = value.to_string(),
                        "description" => domain.description = value.to_string(),
                        _ => {}
                    }
                }
            }
        }

        match version {
            Some(STAMP_VERSION) => Ok(stamp),
            Some(other) => Err(StampError::UnsupportedVersion(other)),
            None => Err(StampError::BadFormat("missing [STAMP] version".to_string())),
        }
    }

    /// Write to `dir/<basename>.stamp`, or `.partial` when any revision is
    /// unknown. Without a basename the SHA-1 of the content is used.
    pub fn save(&self, dir: &Path, basename: Option<&str>) -> Result<PathBuf, StampError> {
        fs::create_dir_all(dir).map_err(|e| StampError::Io(dir.to_path_buf(), e))?;
        let name = match basename {
            Some(name) => name.to_string(),
            None => self.content_hash(),
        };
        let extension = if self.is_partial() { "partial" } else { "stamp" };
        let path = dir.join(format!("{name}.{extension}"));
        fs::write(&path, self.write_string()).map_err(|e| StampError::Io(path.clone(), e))?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, StampError> {
        let text = fs::read_to_string(path).map_err(|e| StampError::Io(path.to_path_buf(), e))?;
        Self::parse(&text)
    }
}

/// Capture a stamp from a live build tree: ask each checkout's VCS for
/// its current revision. Returns the stamp and the list of checkouts
/// whose revision could not be determined.
pub fn capture(
    db: &Database,
    layout: &Layout,
    vcs: &VcsRegistry,
    policy: RevisionPolicy,
) -> Result<(Stamp, Vec<Label>), StampError> {
    let mut stamp = Stamp {
        repository: db.root_repository()?,
        description: db.description()?,
        versions_repo: db.versions_repository()?,
        ..Default::default()
    };
    let mut problems = Vec::new();

    for co in db.all_checkouts() {
        let info = db.checkout_info(&co)?;
        let dir = layout.checkout_path(db, &co)?;
        let revision = match policy {
            RevisionPolicy::Head => Some("HEAD".to_string()),
            RevisionPolicy::Normal | RevisionPolicy::Force => {
                let adapter = vcs.get(&info.vcs)?;
                match adapter.current_revision(&dir, policy == RevisionPolicy::Force) {
                    Ok(rev) => Some(rev),
                    Err(e) => {
                        warn!("cannot determine a revision for {co}: {e}");
                        problems.push(co.clone());
                        None
                    }
                }
            }
        };

        let name = match co.domain() {
            Some(domain) => format!("({domain}){}", co.name()),
            None => co.name().to_string(),
        };
        stamp.checkouts.insert(
            name,
            CheckoutStamp {
                repository: format!("{}+{}", info.vcs, info.repo),
                revision,
                relative: info.relative.clone().unwrap_or_default(),
                directory: info.dir.clone().unwrap_or_default(),
                domain: co.domain().unwrap_or("").to_string(),
                co_leaf: info
                    .co_leaf
                    .clone()
                    .unwrap_or_else(|| co.name().to_string()),
                branch: info.branch.clone().unwrap_or_default(),
            },
        );
    }

    Ok((stamp, problems))
}

/// The checkout registrations a stamp describes, ready to feed into a
/// database. Keys are checkout labels at tag `*`.
pub fn checkouts_from_stamp(stamp: &Stamp) -> Result<Vec<(Label, CheckoutInfo)>, StampError> {
    let mut result = Vec::new();
    for (key, co) in &stamp.checkouts {
        let url = VcsUrl::parse(&co.repository)?;
        let domain = if co.domain.is_empty() {
            None
        } else {
            Some(co.domain.as_str())
        };
        // The section key is `name` or `(domain)name`; the checkout name
        // can differ from its leaf directory (multilevel checkouts).
        let name = match key.split_once(')') {
            Some((_, name)) if key.starts_with('(') => name,
            _ => key.as_str(),
        };
        let label = Label::checkout(domain, name, "*").map_err(StampError::Core)?;
        result.push((
            label,
            CheckoutInfo {
                vcs: url.vcs,
                repo: url.url,
                dir: if co.directory.is_empty() {
                    None
                } else {
                    Some(co.directory.clone())
                },
                co_leaf: if co.co_leaf.is_empty() {
                    None
                } else {
                    Some(co.co_leaf.clone())
                },
                relative: if co.relative.is_empty() {
                    None
                } else {
                    Some(co.relative.clone())
                },
                revision: co.revision.clone(),
                branch: if co.branch.is_empty() {
                    None
                } else {
                    Some(co.branch.clone())
                },
            },
        ));
    }
    Ok(result)
}

/// Reproduce a build tree from a stamp in (empty) `root`: set up
/// `.muddle/`, check every checkout out at its recorded revision, and set
/// the `CheckedOut` tags. Partial stamps are refused unless `force`.
pub fn restore(
    stamp: &Stamp,
    root: &Path,
    vcs: &VcsRegistry,
    force: bool,
) -> Result<Vec<Label>, StampError> {
    if stamp.is_partial() && !force {
        return Err(StampError::Partial);
    }

    let mut db = Database::new(root);
    db.setup(&stamp.repository, &stamp.description, &stamp.versions_repo)?;

    let mut labels = Vec::new();
    for (label, info) in checkouts_from_stamp(stamp)? {
        db.register_checkout(&label, info.clone());
        let dest = root.join(db.checkout_rel(&label)?);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| StampError::Io(parent.to_path_buf(), e))?;
        }
        info!("checking out {label} into {}", dest.display());
        let adapter = vcs.get(&info.vcs)?;
        adapter.checkout(
            &info.repo,
            &dest,
            info.branch.as_deref(),
            info.revision.as_deref(),
        )?;
        let checked_out = label.with_tag(tag::CHECKED_OUT);
        db.set_tag(&checked_out)?;
        labels.push(checked_out);
    }
    labels.sort();
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Stamp {
        let mut stamp = Stamp {
            repository: "git+file:///srv/repo/main".to_string(),
            description: "builds/muddle.toml".to_string(),
            versions_repo: String::new(),
            ..Default::default()
        };
        stamp.checkouts.insert(
            "hello".to_string(),
            CheckoutStamp {
                repository: "git+file:///srv/repo/hello".to_string(),
                revision: Some("58107d".to_string()),
                co_leaf: "hello".to_string(),
                ..Default::default()
            },
        );
        stamp.checkouts.insert(
            "checkout2".to_string(),
            CheckoutStamp {
                repository: "git+file:///srv/repo/twolevel/checkout2".to_string(),
                revision: Some("abc123".to_string()),
                directory: "twolevel/checkout2".to_string(),
                co_leaf: "checkout2".to_string(),
                branch: "stable".to_string(),
                ..Default::default()
            },
        );
        stamp
    }

    #[test]
    fn render_parse_round_trip() {
        let stamp = sample();
        let text = stamp.write_string();
        let parsed = Stamp::parse(&text).unwrap();
        assert_eq!(parsed, stamp);
    }

    #[test]
    fn sections_are_alphabetical_and_stable() {
        let text = sample().write_string();
        let checkout2 = text.find("[CHECKOUT checkout2]").unwrap();
        let hello = text.find("[CHECKOUT hello]").unwrap();
        assert!(checkout2 < hello);
        // Two renders of the same stamp are byte-identical.
        assert_eq!(text, sample().write_string());
        assert_eq!(sample().content_hash(), sample().content_hash());
    }

    #[test]
    fn partial_when_any_revision_is_unknown() {
        let mut stamp = sample();
        assert!(!stamp.is_partial());
        stamp.checkouts.get_mut("hello").unwrap().revision = None;
        assert!(stamp.is_partial());

        let tmp = tempfile::tempdir().unwrap();
        let path = stamp.save(tmp.path(), Some("test_build")).unwrap();
        assert_eq!(path.file_name().unwrap(), "test_build.partial");

        // An empty revision line parses back to None.
        let parsed = Stamp::load(&path).unwrap();
        assert!(parsed.is_partial());
    }

    #[test]
    fn save_without_name_uses_the_content_hash() {
        let stamp = sample();
        let tmp = tempfile::tempdir().unwrap();
        let path = stamp.save(tmp.path(), None).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy().into_owned(),
            format!("{}.stamp", stamp.content_hash())
        );
    }

    #[test]
    fn restore_refuses_partial_without_force() {
        let mut stamp = sample();
        stamp.checkouts.get_mut("hello").unwrap().revision = None;
        let tmp = tempfile::tempdir().unwrap();
        let err = restore(&stamp, tmp.path(), &VcsRegistry::with_standard(), false).unwrap_err();
        assert!(matches!(err, StampError::Partial));
    }

    #[test]
    fn bad_inputs_are_rejected() {
        assert!(matches!(
            Stamp::parse("[STAMP]\nversion = 99\n"),
            Err(StampError::UnsupportedVersion(99))
        ));
        assert!(matches!(
            Stamp::parse("[BUILD]\nrepository = x\n"),
            Err(StampError::BadFormat(_))
        ));
        assert!(matches!(
            Stamp::parse("[NONSENSE here]\n"),
            Err(StampError::BadFormat(_))
        ));
        assert!(matches!(
            Stamp::parse("version = 1\n"),
            Err(StampError::BadFormat(_))
        ));
    }

    #[test]
    fn checkouts_from_stamp_registers_layout() {
        let stamp = sample();
        let checkouts = checkouts_from_stamp(&stamp).unwrap();
        assert_eq!(checkouts.len(), 2);
        let (label, info) = checkouts
            .iter()
            .find(|(l, _)| l.name() == "checkout2")
            .unwrap();
        assert_eq!(label.to_string(), "checkout:checkout2/*");
        assert_eq!(info.vcs, "git");
        assert_eq!(info.dir.as_deref(), Some("twolevel/checkout2"));
        assert_eq!(info.branch.as_deref(), Some("stable"));
    }
}
