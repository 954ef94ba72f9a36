//! Build-tree layout: where checkouts, build scratch, install trees and
//! deployment outputs live, and how to recognise where we are inside one.

use std::path::{Path, PathBuf};

use crate::db::{Database, MUDDLE_DIR};
use crate::error::{MuddleError, Result};
use crate::label::Label;

/// Walk upwards from `start` until a directory containing `.muddle/` is
/// found.
pub fn find_root(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        if d.join(MUDDLE_DIR).is_dir() {
            return Some(d.to_path_buf());
        }
        dir = d.parent();
    }
    None
}

/// Prefix for a label's domain, if any: `domains/<a>/<b>` for domain
/// `a.b`, empty for the top build.
fn domain_prefix(root: &Path, domain: Option<&str>) -> PathBuf {
    let mut path = root.to_path_buf();
    if let Some(domain) = domain {
        path.push("domains");
        for part in domain.split('.') {
            path.push(part);
        }
    }
    path
}

/// Path helpers over one build root. All of them are pure path
/// arithmetic; nothing here touches the filesystem except [`find_root`]
/// and [`classify_dir`].
#[derive(Clone, Debug)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Layout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn src_path(&self, domain: Option<&str>) -> PathBuf {
        domain_prefix(&self.root, domain).join("src")
    }

    /// The working tree of a checkout, as registered in the database.
    pub fn checkout_path(&self, db: &Database, label: &Label) -> Result<PathBuf> {
        Ok(self.root.join(db.checkout_rel(label)?))
    }

    /// Per-package build scratch: `obj/<pkg>/<role>/`.
    pub fn package_obj_path(&self, label: &Label) -> PathBuf {
        domain_prefix(&self.root, label.domain())
            .join("obj")
            .join(label.name())
            .join(label.role().unwrap_or("_"))
    }

    /// Per-role install tree: `install/<role>/`.
    pub fn role_install_path(&self, role: &str, domain: Option<&str>) -> PathBuf {
        domain_prefix(&self.root, domain).join("install").join(role)
    }

    pub fn package_install_path(&self, label: &Label) -> PathBuf {
        self.role_install_path(label.role().unwrap_or("_"), label.domain())
    }

    /// Per-deployment output: `deploy/<name>/`.
    pub fn deploy_path(&self, name: &str, domain: Option<&str>) -> PathBuf {
        domain_prefix(&self.root, domain).join("deploy").join(name)
    }

    /// Stamp file output directory.
    pub fn versions_path(&self) -> PathBuf {
        self.root.join("versions")
    }

    /// The root of a nested sub-build.
    pub fn domain_root(&self, domain: &str) -> PathBuf {
        domain_prefix(&self.root, Some(domain))
    }
}

/// What kind of place a directory inside the build tree is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirType {
    Root,
    /// Inside `src/` but not inside any registered checkout.
    Src,
    /// Inside a registered checkout's working tree.
    Checkout(Label),
    /// Inside `obj/<pkg>/<role>`.
    Object(Label),
    /// Inside `install/<role>`.
    Install(String),
    /// Inside `deploy/<name>`.
    Deployed(String),
    /// The root of a nested domain build.
    DomainRoot(String),
}

/// Work out what `dir` is within the build tree rooted at `db.root()`.
/// Returns `None` when the directory is outside the tree or in no
/// recognisable place.
pub fn classify_dir(db: &Database, dir: &Path) -> Option<DirType> {
    let rel = dir.strip_prefix(db.root()).ok()?;
    if rel.as_os_str().is_empty() {
        return Some(DirType::Root);
    }

    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    // Peel a `domains/<a>/<b>` prefix off into the domain name `a.b`:
    // everything up to the first recognised top-level directory.
    const TOP_LEVEL: [&str; 5] = ["src", "obj", "install", "deploy", "versions"];
    let mut idx = 0;
    let mut domain_parts: Vec<String> = Vec::new();
    if parts[0] == "domains" {
        idx = 1;
        while idx < parts.len() && !TOP_LEVEL.contains(&parts[idx].as_str()) {
            domain_parts.push(parts[idx].clone());
            idx += 1;
        }
    }
    let domain = if domain_parts.is_empty() {
        None
    } else {
        Some(domain_parts.join("."))
    };
    let rest = &parts[idx..];

    if rest.is_empty() {
        return domain.map(DirType::DomainRoot);
    }

    match rest[0].as_str() {
        "src" => {
            if let Some((label, _)) = db.checkout_for_dir(rel) {
                Some(DirType::Checkout(label.clone()))
            } else {
                Some(DirType::Src)
            }
        }
        "obj" if rest.len() >= 3 => {
            let role = if rest[2] == "_" { None } else { Some(rest[2].as_str()) };
            Label::package(domain.as_deref(), &rest[1], role, "*")
                .ok()
                .map(DirType::Object)
        }
        "install" if rest.len() >= 2 => Some(DirType::Install(rest[1].clone())),
        "deploy" if rest.len() >= 2 => Some(DirType::Deployed(rest[1].clone())),
        _ => None,
    }
}

/// Check a path exists, with a decent error when it does not.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| MuddleError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CheckoutInfo;

    fn lbl(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    #[test]
    fn layout_paths() {
        let layout = Layout::new("/build");
        assert_eq!(
            layout.package_obj_path(&lbl("package:hello{x86}/Built")),
            PathBuf::from("/build/obj/hello/x86")
        );
        assert_eq!(
            layout.role_install_path("x86", None),
            PathBuf::from("/build/install/x86")
        );
        assert_eq!(
            layout.deploy_path("everything", None),
            PathBuf::from("/build/deploy/everything")
        );
        assert_eq!(
            layout.package_obj_path(&lbl("package:(arm.hw)hello{x86}/Built")),
            PathBuf::from("/build/domains/arm/hw/obj/hello/x86")
        );
        assert_eq!(layout.domain_root("arm.hw"), PathBuf::from("/build/domains/arm/hw"));
    }

    #[test]
    fn classify_recognises_the_usual_places() {
        let mut db = Database::new("/build");
        db.register_checkout(
            &lbl("checkout:hello/*"),
            CheckoutInfo {
                vcs: "git".into(),
                repo: "file:///srv/hello".into(),
                ..Default::default()
            },
        );

        assert_eq!(classify_dir(&db, Path::new("/build")), Some(DirType::Root));
        assert_eq!(
            classify_dir(&db, Path::new("/build/src/hello/sub")),
            Some(DirType::Checkout(lbl("checkout:hello/*")))
        );
        assert_eq!(
            classify_dir(&db, Path::new("/build/src/unknown")),
            Some(DirType::Src)
        );
        assert_eq!(
            classify_dir(&db, Path::new("/build/obj/hello/x86/deep")),
            Some(DirType::Object(lbl("package:hello{x86}/*")))
        );
        assert_eq!(
            classify_dir(&db, Path::new("/build/install/x86")),
            Some(DirType::Install("x86".into()))
        );
        assert_eq!(
            classify_dir(&db, Path::new("/build/deploy/everything")),
            Some(DirType::Deployed("everything".into()))
        );
        assert_eq!(
            classify_dir(&db, Path::new("/build/domains/arm/hw")),
            Some(DirType::DomainRoot("arm.hw".into()))
        );
        assert_eq!(classify_dir(&db, Path::new("/elsewhere")), None);
    }

    #[test]
    fn find_root_walks_upwards() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("build");
        std::fs::create_dir_all(root.join(".muddle/tags")).unwrap();
        let deep = root.join("src/hello/sub");
        std::fs::create_dir_all(&deep).unwrap();

        assert_eq!(find_root(&deep), Some(root.clone()));
        assert_eq!(find_root(tmp.path()), None);
    }
}
