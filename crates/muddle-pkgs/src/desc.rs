//! The build description: a declarative TOML file registering checkouts,
//! packages, deployments, licenses and distributions.
//!
//! The description lives inside a checkout of its own (named by
//! `.muddle/Description`, e.g. `builds/muddle.toml`), so the build can
//! version-control itself. Loading a tree parses the description and
//! populates the rule set and the various registries.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::warn;
use muddle_core::{
    tag, BuildContext, Builder, CheckoutInfo, Database, Label, Layout, MuddleError, Result,
    RuleSet, WILDCARD,
};
use muddle_distribute::DistributionRegistry;
use muddle_licenses::{standard_licenses, License, LicenseRegistry};
use muddle_vcs::{VcsRegistry, VcsUrl};
use serde::Deserialize;

use crate::{checkouts, collect, cpio, make};

pub const DEFAULT_DESCRIPTION: &str = "builds/muddle.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DescriptionFile {
    pub build: BuildSection,
    #[serde(default, rename = "checkout")]
    pub checkouts: Vec<CheckoutSection>,
    #[serde(default, rename = "package")]
    pub packages: Vec<PackageSection>,
    #[serde(default, rename = "deployment")]
    pub deployments: Vec<DeploymentSection>,
    #[serde(default)]
    pub not_built_against: Vec<NotBuiltAgainstSection>,
    #[serde(default, rename = "distribution")]
    pub distributions: Vec<DistributionSection>,
    #[serde(default, rename = "domain")]
    pub domains: Vec<DomainSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    pub name: String,
    #[serde(default)]
    pub default_roles: Vec<String>,
    #[serde(default)]
    pub default_deployments: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckoutSection {
    pub name: String,
    /// Full `<vcs>+<url>`; defaults to the root repository plus the
    /// checkout's path.
    #[serde(default)]
    pub repo: Option<String>,
    /// Repository path relative to the root repository.
    #[serde(default)]
    pub relative: Option<String>,
    /// Two-level: the directory under `src/` holding the checkout.
    #[serde(default)]
    pub co_dir: Option<String>,
    /// Multilevel: the checkout's full directory under `src/`.
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub co_leaf: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub license: Option<LicenseSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LicenseSpec {
    /// A shorthand from the standard table, e.g. `"gpl2"`.
    Name(String),
    /// An explicit license, e.g. `{ kind = "binary", name = "Customer" }`.
    Detailed {
        kind: String,
        name: String,
        #[serde(default)]
        with_exception: bool,
    },
}

impl LicenseSpec {
    fn resolve(&self) -> Result<License> {
        match self {
            LicenseSpec::Name(shorthand) => standard_licenses()
                .get(shorthand.as_str())
                .cloned()
                .ok_or_else(|| {
                    MuddleError::Configuration(format!("unknown license shorthand '{shorthand}'"))
                }),
            LicenseSpec::Detailed {
                kind,
                name,
                with_exception,
            } => match kind.as_str() {
                "open" => Ok(License::Open(name.clone())),
                "gpl" => Ok(License::Gpl {
                    name: name.clone(),
                    with_exception: *with_exception,
                }),
                "lgpl" => Ok(License::Lgpl {
                    name: name.clone(),
                    with_exception: *with_exception,
                }),
                "binary" => Ok(License::Binary(name.clone())),
                "secret" => Ok(License::Secret(name.clone())),
                other => Err(MuddleError::Configuration(format!(
                    "unknown license kind '{other}'"
                ))),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSection {
    pub name: String,
    /// Defaults to the build's default roles.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Defaults to a checkout of the same name.
    #[serde(default)]
    pub checkout: Option<String>,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub makefile: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentSection {
    pub name: String,
    #[serde(default)]
    pub kind: DeploymentKind,
    /// Deploy this by default when muddle is run with no arguments.
    #[serde(default)]
    pub default: bool,
    #[serde(default, rename = "copy")]
    pub copies: Vec<CopySection>,
    /// cpio only: the archive file name under `deploy/<name>/`.
    #[serde(default)]
    pub target_file: Option<String>,
    /// cpio only: role -> base directory within the image.
    #[serde(default)]
    pub bases: BTreeMap<String, String>,
    /// cpio only: `gzip` or `bzip2`.
    #[serde(default)]
    pub compression: Option<String>,
}

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    #[default]
    Collect,
    Cpio,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopySection {
    pub from: CopySource,
    #[serde(default)]
    pub checkout: Option<String>,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default)]
    pub rel: String,
    #[serde(default)]
    pub dest: String,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CopySource {
    Checkout,
    PackageObj,
    RoleInstall,
    Deployment,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotBuiltAgainstSection {
    pub package: String,
    #[serde(default)]
    pub role: Option<String>,
    pub checkout: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistributionSection {
    pub name: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub secret_build_files: Vec<String>,
    #[serde(default, rename = "content")]
    pub contents: Vec<ContentSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentSection {
    #[serde(default)]
    pub checkout: Option<String>,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub with_vcs: bool,
    #[serde(default = "default_true")]
    pub binary: bool,
    #[serde(default)]
    pub source: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainSection {
    pub name: String,
    /// The sub-build's root repository, `<vcs>+<url>`.
    pub repo: String,
    /// The sub-build's description path under its `src/`.
    pub description: String,
}

/// A domain known to the build, for stamping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainInfo {
    pub repository: String,
    pub description: String,
}

/// A fully loaded build tree.
pub struct Loaded {
    pub builder: Builder,
    pub licenses: LicenseRegistry,
    pub distributions: DistributionRegistry,
    pub vcs: VcsRegistry,
    pub domains: BTreeMap<String, DomainInfo>,
}

impl std::fmt::Debug for Loaded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loaded").finish_non_exhaustive()
    }
}

/// Initialise a fresh build tree: record the root repository and
/// description path, and check the description's own checkout out.
pub fn init_tree(root: &Path, root_repo: &str, description: &str) -> Result<()> {
    let url = VcsUrl::parse(root_repo).map_err(MuddleError::from)?;
    let vcs = VcsRegistry::with_standard();
    let adapter = vcs.get(&url.vcs).map_err(MuddleError::from)?;

    let db = Database::new(root);
    db.setup(root_repo, description, "")?;

    let co_dir = description_checkout_dir(description)?;
    let dest = root.join("src").join(co_dir);
    if !dest.exists() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| MuddleError::io(parent, e))?;
        }
        adapter
            .checkout(&url.join(co_dir).url, &dest, None, None)
            .map_err(MuddleError::from)?;
    }
    let co_label = Label::checkout(None, co_dir, tag::CHECKED_OUT)?;
    db.set_tag(&co_label)?;
    Ok(())
}

/// The first component of the description path names its checkout.
fn description_checkout_dir(description: &str) -> Result<&str> {
    description
        .split('/')
        .next()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            MuddleError::Configuration(format!(
                "description path '{description}' has no checkout component"
            ))
        })
}

/// Load the build tree rooted at `root`: read `.muddle/`, parse the build
/// description (and any domain descriptions), and wire everything up.
pub fn load_build(root: &Path) -> Result<Loaded> {
    let db = Database::new(root);
    let root_repo = db.root_repository()?;
    let description = db.description()?;

    let mut state = LoadState {
        ruleset: RuleSet::new(),
        ctx: BuildContext::new(Layout::new(root), db),
        licenses: LicenseRegistry::new(),
        distributions: DistributionRegistry::new(),
        vcs: VcsRegistry::with_standard(),
        domains: BTreeMap::new(),
    };
    state.load_description(&root_repo, &description, None)?;

    let LoadState {
        ruleset,
        ctx,
        licenses,
        distributions,
        vcs,
        domains,
    } = state;
    Ok(Loaded {
        builder: Builder::new(ctx, ruleset),
        licenses,
        distributions,
        vcs,
        domains,
    })
}

struct LoadState {
    ruleset: RuleSet,
    ctx: BuildContext,
    licenses: LicenseRegistry,
    distributions: DistributionRegistry,
    vcs: VcsRegistry,
    domains: BTreeMap<String, DomainInfo>,
}

impl LoadState {
    /// Load one description file; `domain` is `None` for the top build.
    fn load_description(
        &mut self,
        root_repo: &str,
        description: &str,
        domain: Option<&str>,
    ) -> Result<()> {
        let base = match domain {
            Some(d) => self.ctx.layout.domain_root(d),
            None => self.ctx.layout.root().to_path_buf(),
        };
        let path = base.join("src").join(description);
        let text = fs::read_to_string(&path).map_err(|e| MuddleError::io(&path, e))?;
        let desc: DescriptionFile = toml::from_str(&text)
            .map_err(|e| MuddleError::Configuration(format!("{}: {e}", path.display())))?;

        let root_url = VcsUrl::parse(root_repo).map_err(MuddleError::from)?;

        if domain.is_none() {
            self.ctx.build_name = desc.build.name.clone();
            self.ctx.default_roles = desc.build.default_roles.clone();
        }

        // The description's own checkout, unless explicitly declared.
        let desc_co = description_checkout_dir(description)?.to_string();
        if !desc.checkouts.iter().any(|c| c.name == desc_co) {
            self.register_checkout_section(
                &CheckoutSection {
                    name: desc_co,
                    repo: None,
                    relative: None,
                    co_dir: None,
                    dir: None,
                    co_leaf: None,
                    revision: None,
                    branch: None,
                    license: None,
                },
                &root_url,
                domain,
            )?;
        }

        for section in &desc.checkouts {
            self.register_checkout_section(section, &root_url, domain)?;
        }

        for section in &desc.packages {
            let roles = if section.roles.is_empty() {
                self.ctx.default_roles.clone()
            } else {
                section.roles.clone()
            };
            if roles.is_empty() {
                return Err(MuddleError::Configuration(format!(
                    "package '{}' has no roles (and there are no default roles)",
                    section.name
                )));
            }
            let co_name = section.checkout.as_deref().unwrap_or(&section.name);
            let co_label = Label::checkout(domain, co_name, WILDCARD)?;
            make::medium(
                &mut self.ruleset,
                &section.name,
                &roles,
                &co_label,
                &section.deps,
                section.makefile.as_deref(),
            )?;
        }

        for section in &desc.not_built_against {
            let package = Label::package(
                domain,
                &section.package,
                Some(section.role.as_deref().unwrap_or(WILDCARD)),
                WILDCARD,
            )?;
            let checkout = Label::checkout(domain, &section.checkout, WILDCARD)?;
            self.licenses.set_not_built_against(&package, &checkout);
        }

        for section in &desc.deployments {
            self.register_deployment_section(section, domain)?;
            if domain.is_none()
                && (section.default
                    || desc.build.default_deployments.contains(&section.name))
            {
                self.ctx
                    .default_labels
                    .push(Label::deployment(None, &section.name, tag::DEPLOYED)?);
            }
        }

        for section in &desc.distributions {
            self.register_distribution_section(section, domain)?;
        }

        for sub in &desc.domains {
            let full_name = match domain {
                Some(parent) => format!("{parent}.{}", sub.name),
                None => sub.name.clone(),
            };
            self.domains.insert(
                full_name.clone(),
                DomainInfo {
                    repository: sub.repo.clone(),
                    description: sub.description.clone(),
                },
            );

            // Each domain carries its own description checkout too.
            let sub_root = self.ctx.layout.domain_root(&full_name);
            if sub_root.join("src").join(&sub.description).exists() {
                self.load_description(&sub.repo, &sub.description, Some(&full_name))?;
            } else {
                // Not fatal: the domain's description checkout may simply
                // not be checked out yet.
                warn!(
                    "domain '{full_name}': description {} not present yet, skipping",
                    sub.description
                );
                let sub_url = VcsUrl::parse(&sub.repo).map_err(MuddleError::from)?;
                let desc_co = description_checkout_dir(&sub.description)?.to_string();
                self.register_checkout_section(
                    &CheckoutSection {
                        name: desc_co,
                        repo: None,
                        relative: None,
                        co_dir: None,
                        dir: None,
                        co_leaf: None,
                        revision: None,
                        branch: None,
                        license: None,
                    },
                    &sub_url,
                    Some(&full_name),
                )?;
            }
        }

        Ok(())
    }

    fn register_checkout_section(
        &mut self,
        section: &CheckoutSection,
        root_url: &VcsUrl,
        domain: Option<&str>,
    ) -> Result<()> {
        let label = Label::checkout(domain, &section.name, WILDCARD)?;

        let (vcs_name, repo, relative) = match &section.repo {
            Some(explicit) => {
                let url = VcsUrl::parse(explicit).map_err(MuddleError::from)?;
                (url.vcs, url.url, None)
            }
            None => {
                let rel = section
                    .relative
                    .clone()
                    .or_else(|| section.dir.clone())
                    .unwrap_or_else(|| match &section.co_dir {
                        Some(co_dir) => format!("{co_dir}/{}", section.name),
                        None => section.name.clone(),
                    });
                (
                    root_url.vcs.clone(),
                    root_url.join(&rel).url,
                    Some(rel),
                )
            }
        };
        let adapter = self.vcs.get(&vcs_name).map_err(MuddleError::from)?;

        let info = CheckoutInfo {
            vcs: vcs_name,
            repo,
            dir: None,
            co_leaf: section.co_leaf.clone(),
            relative,
            revision: section.revision.clone(),
            branch: section.branch.clone(),
        };

        if let Some(dir) = &section.dir {
            checkouts::multilevel(&mut self.ruleset, &mut self.ctx, adapter, &label, dir, info)?;
        } else if let Some(co_dir) = &section.co_dir {
            checkouts::twolevel(&mut self.ruleset, &mut self.ctx, adapter, &label, co_dir, info)?;
        } else {
            checkouts::simple(&mut self.ruleset, &mut self.ctx, adapter, &label, info)?;
        }

        if let Some(license) = &section.license {
            self.licenses.set_license(&label, license.resolve()?);
        }
        Ok(())
    }

    fn register_deployment_section(
        &mut self,
        section: &DeploymentSection,
        domain: Option<&str>,
    ) -> Result<()> {
        match section.kind {
            DeploymentKind::Collect => {
                let action = collect::deploy(&mut self.ruleset, &section.name, domain)?;
                let deployment = Label::deployment(domain, &section.name, WILDCARD)?;
                for copy in &section.copies {
                    match copy.from {
                        CopySource::Checkout => {
                            let name = copy.checkout.as_deref().ok_or_else(|| {
                                MuddleError::Configuration(format!(
                                    "deployment '{}': checkout copy needs a checkout name",
                                    section.name
                                ))
                            })?;
                            collect::copy_from_checkout(
                                &mut self.ruleset,
                                &action,
                                &deployment,
                                &Label::checkout(domain, name, WILDCARD)?,
                                &copy.rel,
                                &copy.dest,
                            )?;
                        }
                        CopySource::PackageObj => {
                            let name = copy.package.as_deref().ok_or_else(|| {
                                MuddleError::Configuration(format!(
                                    "deployment '{}': package copy needs a package name",
                                    section.name
                                ))
                            })?;
                            let role = copy.role.as_deref().ok_or_else(|| {
                                MuddleError::Configuration(format!(
                                    "deployment '{}': package copy needs a role",
                                    section.name
                                ))
                            })?;
                            collect::copy_from_package_obj(
                                &mut self.ruleset,
                                &action,
                                &deployment,
                                &Label::package(domain, name, Some(role), WILDCARD)?,
                                &copy.rel,
                                &copy.dest,
                            )?;
                        }
                        CopySource::RoleInstall => {
                            let role = copy.role.as_deref().ok_or_else(|| {
                                MuddleError::Configuration(format!(
                                    "deployment '{}': role-install copy needs a role",
                                    section.name
                                ))
                            })?;
                            collect::copy_from_role_install(
                                &mut self.ruleset,
                                &action,
                                &deployment,
                                role,
                                domain,
                                &copy.rel,
                                &copy.dest,
                            )?;
                        }
                        CopySource::Deployment => {
                            let name = copy.deployment.as_deref().ok_or_else(|| {
                                MuddleError::Configuration(format!(
                                    "deployment '{}': deployment copy needs a deployment name",
                                    section.name
                                ))
                            })?;
                            collect::copy_from_deployment(
                                &mut self.ruleset,
                                &action,
                                &deployment,
                                &Label::deployment(domain, name, WILDCARD)?,
                                &copy.rel,
                                &copy.dest,
                            )?;
                        }
                    }
                }
            }
            DeploymentKind::Cpio => {
                let target_file = section.target_file.as_deref().ok_or_else(|| {
                    MuddleError::Configuration(format!(
                        "cpio deployment '{}' needs a target_file",
                        section.name
                    ))
                })?;
                if section.bases.is_empty() {
                    return Err(MuddleError::Configuration(format!(
                        "cpio deployment '{}' needs at least one role base",
                        section.name
                    )));
                }
                let compression = match section.compression.as_deref() {
                    None => None,
                    Some("gzip") => Some(cpio::Compression::Gzip),
                    Some("bzip2") => Some(cpio::Compression::Bzip2),
                    Some(other) => {
                        return Err(MuddleError::Configuration(format!(
                            "unknown compression '{other}'"
                        )))
                    }
                };
                cpio::deploy(
                    &mut self.ruleset,
                    &mut self.ctx,
                    &section.name,
                    domain,
                    target_file,
                    section.bases.clone(),
                    compression,
                    None,
                )?;
            }
        }
        Ok(())
    }

    fn register_distribution_section(
        &mut self,
        section: &DistributionSection,
        domain: Option<&str>,
    ) -> Result<()> {
        let categories: Vec<&str> = section.categories.iter().map(String::as_str).collect();
        self.distributions
            .name_distribution(&section.name, &categories);
        let secret: Vec<&str> = section
            .secret_build_files
            .iter()
            .map(String::as_str)
            .collect();
        self.distributions
            .set_secret_build_files(&section.name, &secret);

        for content in &section.contents {
            match (&content.checkout, &content.package) {
                (Some(checkout), None) => {
                    self.distributions.distribute_checkout(
                        &section.name,
                        &Label::checkout(domain, checkout, WILDCARD)?,
                        content.with_vcs,
                    )?;
                }
                (None, Some(package)) => {
                    let roles = match &content.role {
                        Some(role) => vec![role.clone()],
                        None => self.ctx.default_roles.clone(),
                    };
                    if roles.is_empty() {
                        return Err(MuddleError::Configuration(format!(
                            "distribution '{}': package '{package}' needs a role",
                            section.name
                        )));
                    }
                    for role in roles {
                        self.distributions.distribute_package(
                            &section.name,
                            &Label::package(domain, package, Some(&role), WILDCARD)?,
                            content.binary,
                            content.source,
                            content.with_vcs,
                        )?;
                    }
                }
                _ => {
                    return Err(MuddleError::Configuration(format!(
                        "distribution '{}': each content entry names exactly one checkout or package",
                        section.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const DESC: &str = r#"
[build]
name = "test_build"
default_roles = ["x86"]
default_deployments = ["everything"]

[[checkout]]
name = "hello"
license = "gpl2"

[[checkout]]
name = "checkout2"
co_dir = "twolevel"

[[package]]
name = "hello"

[[package]]
name = "app"
checkout = "checkout2"
deps = ["hello"]

[[not_built_against]]
package = "app"
role = "x86"
checkout = "hello"

[[deployment]]
name = "everything"

[[deployment.copy]]
from = "role-install"
role = "x86"

[[distribution]]
name = "vendor"
categories = ["binary"]
secret_build_files = ["secret.toml"]

[[distribution.content]]
package = "app"
source = true
"#;

    fn write_tree(desc: &str) -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::new(tmp.path());
        db.setup("git+file:///srv/repo/main", "builds/muddle.toml", "")
            .unwrap();
        let desc_path = tmp.path().join("src/builds/muddle.toml");
        fs::create_dir_all(desc_path.parent().unwrap()).unwrap();
        fs::write(&desc_path, desc).unwrap();
        tmp
    }

    fn lbl(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    #[test]
    fn loads_a_full_description() {
        let tmp = write_tree(DESC);
        let loaded = load_build(tmp.path()).unwrap();
        let builder = &loaded.builder;

        assert_eq!(builder.ctx.build_name, "test_build");
        assert_eq!(builder.ctx.default_roles, ["x86"]);
        assert_eq!(
            builder.ctx.default_labels,
            [lbl("deployment:everything/Deployed")]
        );

        // Checkouts: the description's own, plus the two declared.
        let names: Vec<String> = builder
            .ctx
            .db
            .all_checkouts()
            .iter()
            .map(|l| l.name().to_string())
            .collect();
        assert_eq!(names, ["builds", "checkout2", "hello"]);

        // Twolevel checkout landed under its directory.
        assert_eq!(
            builder
                .ctx
                .db
                .checkout_rel(&lbl("checkout:checkout2/*"))
                .unwrap(),
            PathBuf::from("src/twolevel/checkout2")
        );

        // The package chain and cross-package dependency exist.
        let pre = builder
            .ruleset
            .rule_for(&lbl("package:app{x86}/PreConfig"))
            .unwrap();
        assert!(pre.deps.contains(&lbl("checkout:checkout2/CheckedOut")));
        assert!(pre.deps.contains(&lbl("package:hello{x86}/PostInstalled")));

        // The deployment waits for the whole role.
        let deployed = builder
            .ruleset
            .rule_for(&lbl("deployment:everything/Deployed"))
            .unwrap();
        assert!(deployed.deps.contains(&lbl("package:*{x86}/PostInstalled")));

        // License and exception registered.
        assert_eq!(
            loaded.licenses.license(&lbl("checkout:hello/*")),
            Some(&License::gpl("GPL v2"))
        );
        assert!(loaded.licenses.is_not_built_against(
            &lbl("package:app{x86}/*"),
            &lbl("checkout:hello/*")
        ));

        // Distribution requests registered.
        assert_eq!(loaded.distributions.names(), ["vendor"]);
        let requests = loaded.distributions.requests_for("vendor");
        assert!(requests.contains_key(&lbl("package:app{x86}/*")));
    }

    #[test]
    fn default_roles_flow_into_packages() {
        let tmp = write_tree(DESC);
        let loaded = load_build(tmp.path()).unwrap();
        // `hello` had no explicit roles; it picked up x86.
        assert!(loaded
            .builder
            .ruleset
            .rule_for(&lbl("package:hello{x86}/Built"))
            .is_some());
    }

    #[test]
    fn bad_descriptions_are_configuration_errors() {
        let tmp = write_tree("[build]\nname = \"x\"\n[[package]]\nname = \"p\"\n");
        let err = load_build(tmp.path()).unwrap_err();
        assert!(matches!(err, MuddleError::Configuration(_)));

        let tmp = write_tree("not valid toml [");
        let err = load_build(tmp.path()).unwrap_err();
        assert!(matches!(err, MuddleError::Configuration(_)));
    }

    #[test]
    fn missing_domain_descriptions_are_tolerated() {
        let desc = format!(
            "{DESC}\n[[domain]]\nname = \"sub\"\nrepo = \"git+file:///srv/repo/sub\"\ndescription = \"builds/muddle.toml\"\n"
        );
        let tmp = write_tree(&desc);
        let loaded = load_build(tmp.path()).unwrap();
        assert!(loaded.domains.contains_key("sub"));
        // The domain's description checkout is registered for fetching.
        assert!(loaded
            .builder
            .ctx
            .db
            .checkout_info(&lbl("checkout:(sub)builds/*"))
            .is_ok());
    }
}
