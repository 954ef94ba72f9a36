//! Named distributions: redistributable subsets of a build tree.
//!
//! The build description requests, per checkout or package, membership of
//! one or more named distributions. Producing a distribution computes a
//! copy manifest over the working tree (sources, binaries, tag files)
//! and hands the copying to a tree-copy primitive.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use muddle_core::{Label, LabelKind, MuddleError, Result, WILDCARD};
use muddle_licenses::LicenseAnalysis;

mod copy;
mod plan;

pub use copy::copy_tree;
pub use plan::{plan, prepare_target, CopyManifest, DistributionPlan, PlanInputs};

/// The well-known distribution names, always available.
pub const SOURCE_RELEASE: &str = "_source_release";
pub const JUST_GPL: &str = "_just_gpl";
pub const OPEN: &str = "_open";
pub const BY_LICENSE: &str = "_by_license";

/// How one label is distributed, per distribution name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistributeMode {
    /// Copy the checkout's source tree, with or without VCS metadata.
    CheckoutSource { with_vcs: bool },
    /// Copy the package's obj/install trees and/or the sources of the
    /// checkouts it directly consumes.
    PackageBinary {
        binary: bool,
        source: bool,
        with_vcs: bool,
    },
}

impl DistributeMode {
    /// Re-requesting a label upgrades the existing entry in place:
    /// `binary`/`source` compose by OR, `with_vcs` takes the new value.
    fn upgrade(&mut self, other: DistributeMode) {
        match (&mut *self, other) {
            (
                DistributeMode::CheckoutSource { with_vcs },
                DistributeMode::CheckoutSource { with_vcs: new },
            ) => *with_vcs = new,
            (
                DistributeMode::PackageBinary { binary, source, with_vcs },
                DistributeMode::PackageBinary {
                    binary: new_binary,
                    source: new_source,
                    with_vcs: new_vcs,
                },
            ) => {
                *binary |= new_binary;
                *source |= new_source;
                *with_vcs = new_vcs;
            }
            // Kind mismatch for one label means the description is wrong.
            (current, other) => {
                log::warn!("conflicting distribute modes {current:?} / {other:?}; keeping the new one");
                *current = other;
            }
        }
    }
}

impl fmt::Display for DistributeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributeMode::CheckoutSource { with_vcs } => {
                write!(f, "checkout-source{{with_vcs:{with_vcs}}}")
            }
            DistributeMode::PackageBinary {
                binary,
                source,
                with_vcs,
            } => write!(
                f,
                "package-binary{{binary:{binary}, source:{source}, with_vcs:{with_vcs}}}"
            ),
        }
    }
}

/// Description-supplied metadata for one distribution name.
#[derive(Clone, Debug, Default)]
pub struct DistributionInfo {
    pub categories: BTreeSet<String>,
    /// Build-description-local files never copied into this distribution,
    /// relative to the build description's checkout directory.
    pub secret_build_files: BTreeSet<String>,
}

/// All distribution state registered by the build description.
#[derive(Clone, Debug, Default)]
pub struct DistributionRegistry {
    named: BTreeMap<String, DistributionInfo>,
    requests: BTreeMap<Label, BTreeMap<String, DistributeMode>>,
}

impl DistributionRegistry {
    pub fn new() -> Self {
        DistributionRegistry::default()
    }

    /// Declare a distribution with its (informational) categories.
    pub fn name_distribution(&mut self, name: &str, categories: &[&str]) {
        let info = self.named.entry(name.to_string()).or_default();
        info.categories
            .extend(categories.iter().map(|c| c.to_string()));
    }

    pub fn set_secret_build_files(&mut self, name: &str, files: &[&str]) {
        let info = self.named.entry(name.to_string()).or_default();
        info.secret_build_files
            .extend(files.iter().map(|f| f.to_string()));
    }

    pub fn info(&self, name: &str) -> Option<&DistributionInfo> {
        self.named.get(name)
    }

    /// Every declared distribution name, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.named.keys().map(String::as_str).collect()
    }

    /// Declared distributions carrying none of the given categories.
    pub fn distributions_not_for(&self, categories: &[&str]) -> Vec<&str> {
        self.named
            .iter()
            .filter(|(_, info)| !categories.iter().any(|c| info.categories.contains(*c)))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Request distribution of a checkout's source tree.
    pub fn distribute_checkout(
        &mut self,
        name: &str,
        checkout: &Label,
        with_vcs: bool,
    ) -> Result<()> {
        if checkout.kind() != &LabelKind::Checkout {
            return Err(MuddleError::Bug(format!(
                "attempt to distribute non-checkout label {checkout} as a checkout"
            )));
        }
        self.request(name, checkout, DistributeMode::CheckoutSource { with_vcs });
        Ok(())
    }

    /// Request distribution of a package's binaries and/or sources.
    pub fn distribute_package(
        &mut self,
        name: &str,
        package: &Label,
        binary: bool,
        source: bool,
        with_vcs: bool,
    ) -> Result<()> {
        if package.kind() != &LabelKind::Package {
            return Err(MuddleError::Bug(format!(
                "attempt to distribute non-package label {package} as a package"
            )));
        }
        self.request(
            name,
            package,
            DistributeMode::PackageBinary {
                binary,
                source,
                with_vcs,
            },
        );
        Ok(())
    }

    fn request(&mut self, name: &str, label: &Label, mode: DistributeMode) {
        self.name_distribution(name, &[]);
        let per_name = self.requests.entry(label.with_tag(WILDCARD)).or_default();
        match per_name.get_mut(name) {
            Some(existing) => existing.upgrade(mode),
            None => {
                per_name.insert(name.to_string(), mode);
            }
        }
    }

    /// The labels and modes participating in distribution `name`, sorted
    /// by label.
    pub fn requests_for(&self, name: &str) -> BTreeMap<Label, DistributeMode> {
        self.requests
            .iter()
            .filter_map(|(label, per_name)| {
                per_name.get(name).map(|mode| (label.clone(), *mode))
            })
            .collect()
    }

    /// The distribution names a label participates in.
    pub fn distributions_of(&self, label: &Label) -> Vec<&str> {
        self.requests
            .get(&label.with_tag(WILDCARD))
            .map(|per_name| per_name.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// The computed requests for a well-known distribution name, or `None`
/// when `name` is not well-known. `all_checkouts` is every registered
/// checkout entity; `analysis` the current license analysis.
pub fn well_known_requests(
    name: &str,
    all_checkouts: &[Label],
    analysis: &LicenseAnalysis,
) -> Option<BTreeMap<Label, DistributeMode>> {
    let source = DistributeMode::CheckoutSource { with_vcs: false };
    let selected: Vec<&Label> = match name {
        SOURCE_RELEASE => all_checkouts.iter().collect(),
        JUST_GPL => {
            let gpl = analysis.all_gpl();
            all_checkouts.iter().filter(|co| gpl.contains(co)).collect()
        }
        OPEN => all_checkouts
            .iter()
            .filter(|co| {
                analysis
                    .licensed
                    .get(*co)
                    .is_none_or(|license| !license.is_binary() && !license.is_secret())
            })
            .collect(),
        _ => return None,
    };
    Some(
        selected
            .into_iter()
            .map(|co| (co.with_tag(WILDCARD), source))
            .collect(),
    )
}

/// The license class a checkout falls into for `_by_license`.
pub fn license_class(analysis: &LicenseAnalysis, checkout: &Label) -> &'static str {
    match analysis.licensed.get(checkout) {
        Some(license) if license.is_binary() => "binary",
        Some(license) if license.is_secret() => "secret",
        Some(license) if license.is_gpl_ish() => "gpl",
        Some(_) => "open",
        None => {
            if analysis.implicit.contains_key(checkout) {
                "gpl"
            } else {
                "open"
            }
        }
    }
}
