//! Planning and producing one distribution.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use muddle_core::{tag, Database, Label, LabelKind, Layout, MuddleError, Result, RuleSet, WILDCARD};
use muddle_licenses::LicenseAnalysis;
use muddle_vcs::VcsRegistry;

use crate::{
    copy_tree, license_class, well_known_requests, DistributeMode, DistributionRegistry,
    BY_LICENSE,
};

/// One copy operation: a source directory, its destination, and the entry
/// names or relative paths to leave out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyManifest {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub exclusions: Vec<String>,
}

/// A fully planned distribution, ready to execute.
#[derive(Clone, Debug)]
pub struct DistributionPlan {
    pub name: String,
    pub target: PathBuf,
    pub copies: Vec<CopyManifest>,
    /// Labels to mark `/Distributed` in the source tree afterwards.
    pub distributed: Vec<Label>,
    root_repository: String,
    description: String,
    versions_repository: String,
}

/// Everything the planner reads. All borrowed; planning mutates nothing.
pub struct PlanInputs<'a> {
    pub db: &'a Database,
    pub layout: &'a Layout,
    pub ruleset: &'a RuleSet,
    pub vcs: &'a VcsRegistry,
    pub registry: &'a DistributionRegistry,
    pub analysis: &'a LicenseAnalysis,
}

/// Compute the copy manifest for distribution `name` into `target`.
pub fn plan(inputs: &PlanInputs, name: &str, target: &Path) -> Result<DistributionPlan> {
    let all_checkouts = inputs.db.all_checkouts();

    let mut builder = PlanBuilder {
        inputs,
        target: target.to_path_buf(),
        copies: BTreeMap::new(),
        distributed: Vec::new(),
        secret_exclusions: secret_exclusions(inputs, name)?,
    };

    if name == BY_LICENSE {
        // One subtree per license class.
        for co in &all_checkouts {
            let class = license_class(inputs.analysis, co);
            let sub = target.join(class);
            builder.add_checkout(co, false, &sub)?;
        }
    } else if let Some(requests) = well_known_requests(name, &all_checkouts, inputs.analysis) {
        for (label, mode) in requests {
            builder.add_request(&label, mode)?;
        }
    } else {
        let requests = inputs.registry.requests_for(name);
        if requests.is_empty() && inputs.registry.info(name).is_none() {
            return Err(MuddleError::GiveUp(format!(
                "there is no distribution called '{name}'"
            )));
        }
        for (label, mode) in requests {
            builder.add_request(&label, mode)?;
        }
    }

    let mut distributed = builder.distributed;
    distributed.sort();
    distributed.dedup();

    Ok(DistributionPlan {
        name: name.to_string(),
        target: target.to_path_buf(),
        copies: builder.copies.into_values().collect(),
        distributed,
        root_repository: inputs.db.root_repository()?,
        description: inputs.db.description()?,
        versions_repository: inputs.db.versions_repository()?,
    })
}

impl DistributionPlan {
    /// Produce the distribution: set up the target's `.muddle/` and run
    /// every copy whose source exists.
    pub fn execute(&self) -> Result<()> {
        let target_db = Database::new(&self.target);
        target_db.setup(
            &self.root_repository,
            &self.description,
            &self.versions_repository,
        )?;
        for copy in &self.copies {
            if !copy.src.exists() {
                continue;
            }
            info!(
                "copying {} to {}",
                copy.src.display(),
                copy.dst.display()
            );
            copy_tree(&copy.src, &copy.dst, &copy.exclusions)?;
        }
        Ok(())
    }
}

struct PlanBuilder<'a, 'b> {
    inputs: &'a PlanInputs<'b>,
    target: PathBuf,
    /// Keyed by destination so repeated requests collapse; the manifest
    /// with the fewest exclusions (the most content) wins.
    copies: BTreeMap<PathBuf, CopyManifest>,
    distributed: Vec<Label>,
    /// Secret build files, as paths relative to the description checkout.
    secret_exclusions: Vec<String>,
}

impl PlanBuilder<'_, '_> {
    fn add_request(&mut self, label: &Label, mode: DistributeMode) -> Result<()> {
        let target = self.target.clone();
        match mode {
            DistributeMode::CheckoutSource { with_vcs } => {
                self.add_checkout(label, with_vcs, &target)
            }
            DistributeMode::PackageBinary {
                binary,
                source,
                with_vcs,
            } => {
                if binary {
                    self.add_package_binary(label)?;
                }
                if source {
                    for co in self.direct_checkouts(label) {
                        self.add_checkout(&co, with_vcs, &target)?;
                    }
                }
                self.distributed
                    .push(label.with_tag(tag::DISTRIBUTED));
                Ok(())
            }
        }
    }

    /// Copy a checkout's source tree and its tag files under `base`.
    fn add_checkout(&mut self, label: &Label, with_vcs: bool, base: &Path) -> Result<()> {
        let inputs = self.inputs;
        let info = inputs.db.checkout_info(label)?;
        let rel = inputs.db.checkout_rel(label)?;

        let mut exclusions = Vec::new();
        if !with_vcs {
            let adapter = inputs.vcs.get(&info.vcs).map_err(MuddleError::from)?;
            if let Some(vcs_dir) = adapter.vcs_dir_name() {
                exclusions.push(vcs_dir.to_string());
            }
        }
        if self.is_description_checkout(label) {
            exclusions.extend(self.secret_exclusions.iter().cloned());
        }

        self.push_copy(CopyManifest {
            src: inputs.layout.root().join(&rel),
            dst: base.join(&rel),
            exclusions,
        });
        self.add_tag_dir(label, base)?;
        self.distributed.push(label.with_tag(tag::DISTRIBUTED));
        Ok(())
    }

    /// Copy a package's obj and install trees plus its tag files.
    fn add_package_binary(&mut self, label: &Label) -> Result<()> {
        let inputs = self.inputs;
        let obj = inputs.layout.package_obj_path(label);
        let install = inputs.layout.package_install_path(label);
        let target = self.target.clone();
        for src in [obj, install] {
            let rel = src
                .strip_prefix(inputs.layout.root())
                .map_err(|_| MuddleError::Bug("package path outside build root".to_string()))?
                .to_path_buf();
            self.push_copy(CopyManifest {
                src,
                dst: target.join(rel),
                exclusions: Vec::new(),
            });
        }
        self.add_tag_dir(label, &target)
    }

    /// Replicate `.muddle/tags/...` for one entity.
    fn add_tag_dir(&mut self, label: &Label, base: &Path) -> Result<()> {
        let inputs = self.inputs;
        let tag_dir = inputs
            .db
            .tag_path(&label.with_tag("tag"))
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| MuddleError::Bug("tag path has no parent".to_string()))?;
        let rel = tag_dir
            .strip_prefix(inputs.db.root())
            .map_err(|_| MuddleError::Bug("tag path outside build root".to_string()))?
            .to_path_buf();
        self.push_copy(CopyManifest {
            src: tag_dir,
            dst: base.join(rel),
            exclusions: Vec::new(),
        });
        Ok(())
    }

    fn push_copy(&mut self, manifest: CopyManifest) {
        match self.copies.get_mut(&manifest.dst) {
            Some(existing) => {
                if manifest.exclusions.len() < existing.exclusions.len() {
                    *existing = manifest;
                }
            }
            None => {
                self.copies.insert(manifest.dst.clone(), manifest);
            }
        }
    }

    /// The checkouts `package` consumes directly.
    fn direct_checkouts(&self, package: &Label) -> Vec<Label> {
        let entity = package.with_tag(WILDCARD);
        let mut checkouts: Vec<Label> = self
            .inputs
            .ruleset
            .rules_for_target(&entity, true, true)
            .iter()
            .flat_map(|r| r.deps.iter())
            .filter(|d| d.kind() == &LabelKind::Checkout)
            .map(|d| d.with_tag(WILDCARD))
            .collect();
        checkouts.sort();
        checkouts.dedup();
        checkouts
    }

    fn is_description_checkout(&self, label: &Label) -> bool {
        if self.secret_exclusions.is_empty() {
            return false;
        }
        description_checkout(self.inputs.db)
            .map(|desc_co| desc_co == label.with_tag(WILDCARD))
            .unwrap_or(false)
    }
}

/// The checkout holding the build description, if it can be identified.
fn description_checkout(db: &Database) -> Option<Label> {
    let desc = db.description().ok()?;
    let rel = Path::new("src").join(desc);
    db.checkout_for_dir(&rel).map(|(label, _)| label.clone())
}

/// The secret-file exclusions for this distribution, as paths relative to
/// the description checkout's directory.
fn secret_exclusions(inputs: &PlanInputs, name: &str) -> Result<Vec<String>> {
    let Some(info) = inputs.registry.info(name) else {
        return Ok(Vec::new());
    };
    if info.secret_build_files.is_empty() {
        return Ok(Vec::new());
    }

    // Secret files are named relative to the directory holding the build
    // description file itself.
    let desc = inputs.db.description()?;
    let Some(desc_co) = description_checkout(inputs.db) else {
        return Ok(Vec::new());
    };
    let co_rel = inputs.db.checkout_rel(&desc_co)?;
    let desc_full = Path::new("src").join(&desc);
    let desc_dir = desc_full.parent().unwrap_or(Path::new(""));
    let within = desc_dir.strip_prefix(&co_rel).unwrap_or(Path::new(""));

    Ok(info
        .secret_build_files
        .iter()
        .map(|file| {
            within
                .join(file)
                .to_string_lossy()
                .into_owned()
        })
        .collect())
}

/// Create the directory a distribution will be produced into, refusing a
/// non-empty one so stale content cannot leak into the output.
pub fn prepare_target(target: &Path) -> Result<()> {
    if target.exists() {
        let occupied = fs::read_dir(target)
            .map_err(|e| MuddleError::io(target, e))?
            .next()
            .is_some();
        if occupied {
            return Err(MuddleError::GiveUp(format!(
                "distribution target {} already exists and is not empty",
                target.display()
            )));
        }
    } else {
        fs::create_dir_all(target).map_err(|e| MuddleError::io(target, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DistributionRegistry, SOURCE_RELEASE};
    use muddle_core::rules::{depend_none, depend_one};
    use muddle_core::CheckoutInfo;
    use muddle_licenses::{analyze, LicenseRegistry};

    fn lbl(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    fn touch(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// A little build tree: two checkouts (one the build description),
    /// one package built from `hello`, plus obj/install/deploy litter
    /// that source distributions must not pick up.
    struct Tree {
        tmp: tempfile::TempDir,
        db: Database,
        layout: Layout,
        ruleset: RuleSet,
    }

    fn make_tree() -> Tree {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let mut db = Database::new(&root);
        db.setup("git+file:///srv/repo/main", "builds/muddle.toml", "")
            .unwrap();

        for (name, dir) in [("builds", "builds"), ("hello", "hello")] {
            db.register_checkout(
                &lbl(&format!("checkout:{name}/*")),
                CheckoutInfo {
                    vcs: "git".into(),
                    repo: format!("file:///srv/repo/{name}"),
                    dir: Some(dir.into()),
                    ..Default::default()
                },
            );
        }

        touch(&root.join("src/builds/muddle.toml"), "[build]\n");
        touch(&root.join("src/builds/secret.toml"), "shh\n");
        touch(&root.join("src/builds/.git/config"), "[core]\n");
        touch(&root.join("src/hello/Makefile.muddle"), "all:\n");
        touch(&root.join("src/hello/.git/config"), "[core]\n");
        touch(&root.join("obj/hello/x86/hello.o"), "obj\n");
        touch(&root.join("install/x86/hello"), "bin\n");
        touch(&root.join("deploy/everything/hello"), "bin\n");

        let mut ruleset = RuleSet::new();
        ruleset.add(depend_none(None, &lbl("checkout:hello/CheckedOut")));
        ruleset.add(depend_none(None, &lbl("checkout:builds/CheckedOut")));
        ruleset.add(depend_one(
            None,
            &lbl("package:hello{x86}/PostInstalled"),
            lbl("checkout:hello/CheckedOut"),
        ));

        // Tags as a finished build would have left them.
        db.set_tag(&lbl("checkout:hello/CheckedOut")).unwrap();
        db.set_tag(&lbl("checkout:builds/CheckedOut")).unwrap();
        db.set_tag(&lbl("package:hello{x86}/PostInstalled")).unwrap();
        db.set_tag(&lbl("deployment:everything/Deployed")).unwrap();

        let layout = Layout::new(&root);
        Tree {
            tmp,
            db,
            layout,
            ruleset,
        }
    }

    fn analysis_for(tree: &Tree) -> LicenseAnalysis {
        analyze(
            &tree.ruleset,
            &LicenseRegistry::new(),
            &tree.db.all_checkouts(),
        )
    }

    #[test]
    fn source_release_copies_sources_and_checkout_tags_only() {
        let tree = make_tree();
        let analysis = analysis_for(&tree);
        let registry = DistributionRegistry::new();
        let vcs = VcsRegistry::with_standard();
        let inputs = PlanInputs {
            db: &tree.db,
            layout: &tree.layout,
            ruleset: &tree.ruleset,
            vcs: &vcs,
            registry: &registry,
            analysis: &analysis,
        };

        let target = tree.tmp.path().join("out");
        let plan = plan(&inputs, SOURCE_RELEASE, &target).unwrap();
        plan.execute().unwrap();

        // Sources, without VCS metadata.
        assert!(target.join("src/hello/Makefile.muddle").exists());
        assert!(target.join("src/builds/muddle.toml").exists());
        assert!(!target.join("src/hello/.git").exists());
        // No build products.
        assert!(!target.join("obj").exists());
        assert!(!target.join("install").exists());
        assert!(!target.join("deploy").exists());
        // Checkout tags preserved, package/deployment tags omitted.
        assert!(target.join(".muddle/tags/checkout/hello/CheckedOut").exists());
        assert!(!target.join(".muddle/tags/package").exists());
        assert!(!target.join(".muddle/tags/deployment").exists());
        // Provenance reproduced.
        assert_eq!(
            fs::read_to_string(target.join(".muddle/RootRepository")).unwrap(),
            "git+file:///srv/repo/main\n"
        );

        // Both checkouts are to be marked distributed.
        assert_eq!(
            plan.distributed,
            vec![
                lbl("checkout:builds/Distributed"),
                lbl("checkout:hello/Distributed"),
            ]
        );
    }

    #[test]
    fn named_distribution_honours_secret_build_files() {
        let tree = make_tree();
        let analysis = analysis_for(&tree);
        let mut registry = DistributionRegistry::new();
        registry.name_distribution("vendor", &["binary"]);
        registry.set_secret_build_files("vendor", &["secret.toml"]);
        registry
            .distribute_checkout("vendor", &lbl("checkout:builds/*"), false)
            .unwrap();
        registry
            .distribute_checkout("vendor", &lbl("checkout:hello/*"), false)
            .unwrap();
        let vcs = VcsRegistry::with_standard();
        let inputs = PlanInputs {
            db: &tree.db,
            layout: &tree.layout,
            ruleset: &tree.ruleset,
            vcs: &vcs,
            registry: &registry,
            analysis: &analysis,
        };

        let target = tree.tmp.path().join("vendor_out");
        plan(&inputs, "vendor", &target).unwrap().execute().unwrap();
        assert!(target.join("src/builds/muddle.toml").exists());
        assert!(!target.join("src/builds/secret.toml").exists());
        assert!(target.join("src/hello/Makefile.muddle").exists());
    }

    #[test]
    fn package_binary_copies_obj_and_install() {
        let tree = make_tree();
        let analysis = analysis_for(&tree);
        let mut registry = DistributionRegistry::new();
        registry
            .distribute_package("drop", &lbl("package:hello{x86}/*"), true, true, false)
            .unwrap();
        let vcs = VcsRegistry::with_standard();
        let inputs = PlanInputs {
            db: &tree.db,
            layout: &tree.layout,
            ruleset: &tree.ruleset,
            vcs: &vcs,
            registry: &registry,
            analysis: &analysis,
        };

        let target = tree.tmp.path().join("drop_out");
        let plan = plan(&inputs, "drop", &target).unwrap();
        plan.execute().unwrap();

        assert!(target.join("obj/hello/x86/hello.o").exists());
        assert!(target.join("install/x86/hello").exists());
        // source=true pulls in the package's direct checkout too.
        assert!(target.join("src/hello/Makefile.muddle").exists());
        assert!(!target.join("src/hello/.git").exists());
        // But not unrelated checkouts.
        assert!(!target.join("src/builds").exists());
        assert!(target
            .join(".muddle/tags/package/hello/x86/PostInstalled")
            .exists());
    }

    #[test]
    fn by_license_splits_checkouts_into_class_subtrees() {
        let tree = make_tree();
        let mut licenses = LicenseRegistry::new();
        licenses.set_license(
            &lbl("checkout:hello/*"),
            muddle_licenses::License::gpl("GPL v2"),
        );
        let analysis = analyze(&tree.ruleset, &licenses, &tree.db.all_checkouts());
        let registry = DistributionRegistry::new();
        let vcs = VcsRegistry::with_standard();
        let inputs = PlanInputs {
            db: &tree.db,
            layout: &tree.layout,
            ruleset: &tree.ruleset,
            vcs: &vcs,
            registry: &registry,
            analysis: &analysis,
        };

        let target = tree.tmp.path().join("by_license");
        plan(&inputs, crate::BY_LICENSE, &target)
            .unwrap()
            .execute()
            .unwrap();
        assert!(target.join("gpl/src/hello/Makefile.muddle").exists());
        assert!(target.join("open/src/builds/muddle.toml").exists());
        assert!(!target.join("open/src/hello").exists());
    }

    #[test]
    fn unknown_distribution_is_refused() {
        let tree = make_tree();
        let analysis = analysis_for(&tree);
        let registry = DistributionRegistry::new();
        let vcs = VcsRegistry::with_standard();
        let inputs = PlanInputs {
            db: &tree.db,
            layout: &tree.layout,
            ruleset: &tree.ruleset,
            vcs: &vcs,
            registry: &registry,
            analysis: &analysis,
        };
        let err = plan(&inputs, "nonesuch", &tree.tmp.path().join("x")).unwrap_err();
        assert!(matches!(err, MuddleError::GiveUp(_)));
    }

    #[test]
    fn prepare_target_refuses_occupied_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("fresh");
        prepare_target(&target).unwrap();
        assert!(target.is_dir());
        prepare_target(&target).unwrap();

        fs::write(target.join("litter"), "x").unwrap();
        assert!(prepare_target(&target).is_err());
    }
}
