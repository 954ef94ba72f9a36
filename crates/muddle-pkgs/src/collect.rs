//! Collect deployments: gather outputs built elsewhere into one
//! directory, usually for some external tool to consume.
//!
//! A collect deployment is a list of assembly descriptors, each copying
//! from a checkout, a package's obj directory, a role's install tree or
//! another deployment, into a named place under `deploy/<name>/`.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use muddle_core::{
    rules::Rule, tag, workspace, Action, BuildContext, Label, LabelKind, MuddleError, Result,
    RuleSet, WILDCARD,
};
use muddle_distribute::copy_tree;

/// Where an assembly copies from.
#[derive(Clone, Debug)]
pub struct AssemblyDescriptor {
    /// A checkout, package or deployment label. A package label with a
    /// wildcard name means "the role's whole install tree".
    pub from: Label,
    /// Subdirectory of the source to start from; empty for everything.
    pub from_rel: String,
    /// Destination name under the deployment directory.
    pub to_name: String,
    pub recursive: bool,
    pub fail_on_absent_source: bool,
}

impl AssemblyDescriptor {
    fn source_dir(&self, ctx: &BuildContext) -> Result<PathBuf> {
        match self.from.kind() {
            LabelKind::Checkout => ctx.layout.checkout_path(&ctx.db, &self.from),
            LabelKind::Package => {
                if self.from.name() == WILDCARD {
                    let role = self.from.role().ok_or_else(|| {
                        MuddleError::Configuration(format!(
                            "assembly from {} needs a role",
                            self.from
                        ))
                    })?;
                    Ok(ctx.layout.role_install_path(role, self.from.domain()))
                } else {
                    Ok(ctx.layout.package_obj_path(&self.from))
                }
            }
            LabelKind::Deployment => {
                Ok(ctx.layout.deploy_path(self.from.name(), self.from.domain()))
            }
            other => Err(MuddleError::Configuration(format!(
                "assembly source {} has unusable kind '{}'",
                self.from,
                other.as_str()
            ))),
        }
    }
}

/// The action behind `deployment:<name>/Deployed`.
pub struct CollectDeployment {
    assemblies: Mutex<Vec<AssemblyDescriptor>>,
}

impl CollectDeployment {
    fn add_assembly(&self, assembly: AssemblyDescriptor) {
        self.assemblies.lock().expect("assembly lock").push(assembly);
    }
}

impl Action for CollectDeployment {
    fn name(&self) -> &str {
        "collect-deployment"
    }

    fn build_label(
        &self,
        ctx: &BuildContext,
        label: &Label,
        _env: &BTreeMap<String, String>,
    ) -> Result<()> {
        let deploy_dir = ctx.layout.deploy_path(label.name(), label.domain());
        match label.tag() {
            tag::DEPLOYED => {
                workspace::ensure_dir(&deploy_dir)?;
                let assemblies = self.assemblies.lock().expect("assembly lock").clone();
                for assembly in &assemblies {
                    let src = assembly.source_dir(ctx)?.join(&assembly.from_rel);
                    let dst = deploy_dir.join(&assembly.to_name);
                    if !src.exists() {
                        if assembly.fail_on_absent_source {
                            return Err(MuddleError::GiveUp(format!(
                                "deployment {}: source {} does not exist",
                                label.name(),
                                src.display()
                            )));
                        }
                        continue;
                    }
                    if assembly.recursive {
                        copy_tree(&src, &dst, &[])?;
                    } else if src.is_file() {
                        if let Some(parent) = dst.parent() {
                            workspace::ensure_dir(parent)?;
                        }
                        fs::copy(&src, &dst).map_err(|e| MuddleError::io(&dst, e))?;
                    }
                }
                Ok(())
            }
            tag::CLEAN => {
                if deploy_dir.exists() {
                    fs::remove_dir_all(&deploy_dir)
                        .map_err(|e| MuddleError::io(&deploy_dir, e))?;
                }
                Ok(())
            }
            tag::DISTRIBUTED => Ok(()),
            other => Err(MuddleError::Bug(format!(
                "collect deployment asked to build unknown tag '{other}' of {label}"
            ))),
        }
    }
}

/// Start a collect deployment: registers `deployment:<name>/Deployed`
/// (empty so far) and its `Clean` rule, returning the handle assemblies
/// are added through.
pub fn deploy(ruleset: &mut RuleSet, name: &str, domain: Option<&str>) -> Result<Arc<CollectDeployment>> {
    let action = Arc::new(CollectDeployment {
        assemblies: Mutex::new(Vec::new()),
    });
    let as_action: Arc<dyn Action> = action.clone();
    let deployed = Label::deployment(domain, name, tag::DEPLOYED)?;
    ruleset.add(Rule::new(deployed, Some(as_action.clone())));
    ruleset.add(Rule::new(
        Label::deployment(domain, name, tag::CLEAN)?,
        Some(as_action),
    ));
    Ok(action)
}

/// Copy from within a checkout's source tree.
pub fn copy_from_checkout(
    ruleset: &mut RuleSet,
    action: &Arc<CollectDeployment>,
    deployment: &Label,
    checkout: &Label,
    rel: &str,
    dest: &str,
) -> Result<()> {
    add_assembly(
        ruleset,
        action,
        deployment,
        checkout.with_tag(tag::CHECKED_OUT),
        rel,
        dest,
    )
}

/// Copy from a package's obj directory.
pub fn copy_from_package_obj(
    ruleset: &mut RuleSet,
    action: &Arc<CollectDeployment>,
    deployment: &Label,
    package: &Label,
    rel: &str,
    dest: &str,
) -> Result<()> {
    add_assembly(
        ruleset,
        action,
        deployment,
        package.with_tag(tag::BUILT),
        rel,
        dest,
    )
}

/// Copy from a role's install tree; the deployment then depends on every
/// package in that role being post-installed.
pub fn copy_from_role_install(
    ruleset: &mut RuleSet,
    action: &Arc<CollectDeployment>,
    deployment: &Label,
    role: &str,
    domain: Option<&str>,
    rel: &str,
    dest: &str,
) -> Result<()> {
    let from = Label::package(domain, WILDCARD, Some(role), tag::POST_INSTALLED)?;
    add_assembly(ruleset, action, deployment, from, rel, dest)
}

/// Copy from another deployment's output.
pub fn copy_from_deployment(
    ruleset: &mut RuleSet,
    action: &Arc<CollectDeployment>,
    deployment: &Label,
    other: &Label,
    rel: &str,
    dest: &str,
) -> Result<()> {
    add_assembly(
        ruleset,
        action,
        deployment,
        other.with_tag(tag::DEPLOYED),
        rel,
        dest,
    )
}

fn add_assembly(
    ruleset: &mut RuleSet,
    action: &Arc<CollectDeployment>,
    deployment: &Label,
    from: Label,
    rel: &str,
    dest: &str,
) -> Result<()> {
    let target = deployment.with_tag(tag::DEPLOYED);
    ruleset.rule_for_mut(&target).add(from.clone());
    action.add_assembly(AssemblyDescriptor {
        from,
        from_rel: rel.to_string(),
        to_name: dest.to_string(),
        recursive: true,
        fail_on_absent_source: false,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use muddle_core::{Database, Layout};

    fn lbl(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    #[test]
    fn deploy_registers_rules_and_collects_deps() {
        let mut rs = RuleSet::new();
        let action = deploy(&mut rs, "everything", None).unwrap();
        copy_from_role_install(
            &mut rs,
            &action,
            &lbl("deployment:everything/*"),
            "x86",
            None,
            "",
            "",
        )
        .unwrap();
        copy_from_deployment(
            &mut rs,
            &action,
            &lbl("deployment:everything/*"),
            &lbl("deployment:(subdomain)everything/*"),
            "",
            "sub",
        )
        .unwrap();

        let rule = rs.rule_for(&lbl("deployment:everything/Deployed")).unwrap();
        assert!(rule
            .deps
            .contains(&lbl("package:*{x86}/PostInstalled")));
        assert!(rule
            .deps
            .contains(&lbl("deployment:(subdomain)everything/Deployed")));
        assert!(rule.action.is_some());
        assert!(rs.rule_for(&lbl("deployment:everything/Clean")).is_some());
    }

    #[test]
    fn deployed_copies_the_role_install_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join(".muddle/tags")).unwrap();
        std::fs::create_dir_all(root.join("install/x86/bin")).unwrap();
        std::fs::write(root.join("install/x86/bin/hello"), "x").unwrap();

        let mut rs = RuleSet::new();
        let action = deploy(&mut rs, "everything", None).unwrap();
        copy_from_role_install(
            &mut rs,
            &action,
            &lbl("deployment:everything/*"),
            "x86",
            None,
            "",
            "",
        )
        .unwrap();

        let ctx = BuildContext::new(Layout::new(root), Database::new(root));
        let deployed = lbl("deployment:everything/Deployed");
        action
            .build_label(&ctx, &deployed, &BTreeMap::new())
            .unwrap();
        assert!(root.join("deploy/everything/bin/hello").exists());

        // Clean removes the output again.
        action
            .build_label(&ctx, &lbl("deployment:everything/Clean"), &BTreeMap::new())
            .unwrap();
        assert!(!root.join("deploy/everything").exists());
    }

    #[test]
    fn absent_sources_are_ignored_unless_required() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join(".muddle/tags")).unwrap();

        let mut rs = RuleSet::new();
        let action = deploy(&mut rs, "everything", None).unwrap();
        copy_from_role_install(
            &mut rs,
            &action,
            &lbl("deployment:everything/*"),
            "nonesuch",
            None,
            "",
            "",
        )
        .unwrap();

        let ctx = BuildContext::new(Layout::new(root), Database::new(root));
        action
            .build_label(&ctx, &lbl("deployment:everything/Deployed"), &BTreeMap::new())
            .unwrap();

        // The same source, but required, fails.
        action.add_assembly(AssemblyDescriptor {
            from: lbl("package:*{nonesuch}/PostInstalled"),
            from_rel: String::new(),
            to_name: String::new(),
            recursive: true,
            fail_on_absent_source: true,
        });
        let err = action
            .build_label(&ctx, &lbl("deployment:everything/Deployed"), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, MuddleError::GiveUp(_)));
    }
}
