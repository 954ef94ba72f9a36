//! Make-driven packages.
//!
//! A make package is built from one checkout containing a muddle
//! makefile; the package lifecycle tags map onto conventional make
//! targets (`config`, `all`, `install`, `clean`, `distclean`), run with
//! the composed muddle environment.

use std::collections::BTreeMap;
use std::process::Command;
use std::sync::Arc;

use log::debug;
use muddle_core::{
    rules::{depend_one, Rule},
    tag, workspace, Action, BuildContext, Label, MuddleError, Result, RuleSet,
};

pub const DEFAULT_MAKEFILE: &str = "Makefile.muddle";

/// One action drives all tags of a make package.
pub struct MakePackageAction {
    checkout: Label,
    makefile: String,
}

impl MakePackageAction {
    pub fn new(checkout: &Label, makefile: Option<&str>) -> Self {
        MakePackageAction {
            checkout: checkout.clone(),
            makefile: makefile.unwrap_or(DEFAULT_MAKEFILE).to_string(),
        }
    }

    fn run_make(
        &self,
        ctx: &BuildContext,
        label: &Label,
        env: &BTreeMap<String, String>,
        target: Option<&str>,
    ) -> Result<()> {
        let src = ctx.layout.checkout_path(&ctx.db, &self.checkout)?;
        let mut command = Command::new("make");
        command
            .arg("-f")
            .arg(&self.makefile)
            .current_dir(&src)
            .env_clear()
            .envs(env);
        if let Some(target) = target {
            command.arg(target);
        }
        debug!(
            "{label}: make{} in {}",
            target.map(|t| format!(" {t}")).unwrap_or_default(),
            src.display()
        );
        let status = command
            .status()
            .map_err(|e| MuddleError::io(&src, e))?;
        if status.success() {
            Ok(())
        } else {
            Err(MuddleError::GiveUp(format!(
                "make{} failed for {label} (exit {})",
                target.map(|t| format!(" {t}")).unwrap_or_default(),
                status.code().unwrap_or(-1)
            )))
        }
    }
}

impl Action for MakePackageAction {
    fn name(&self) -> &str {
        "make-package"
    }

    fn build_label(
        &self,
        ctx: &BuildContext,
        label: &Label,
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        match label.tag() {
            tag::PRE_CONFIG => {
                workspace::ensure_dir(&ctx.layout.package_obj_path(label))?;
                workspace::ensure_dir(&ctx.layout.package_install_path(label))?;
                Ok(())
            }
            tag::CONFIGURED => self.run_make(ctx, label, env, Some("config")),
            tag::BUILT => self.run_make(ctx, label, env, None),
            tag::INSTALLED => self.run_make(ctx, label, env, Some("install")),
            tag::POST_INSTALLED => Ok(()),
            tag::CLEAN => self.run_make(ctx, label, env, Some("clean")),
            tag::DIST_CLEAN => self.run_make(ctx, label, env, Some("distclean")),
            tag::DISTRIBUTED => Ok(()),
            other => Err(MuddleError::Bug(format!(
                "make action asked to build unknown tag '{other}' of {label}"
            ))),
        }
    }
}

/// Register a make package: `name` in each of `roles`, built from
/// `checkout`, with optional package dependencies within the same role.
///
/// The lifecycle chain is
/// `PreConfig -> Configured -> Built -> Installed -> PostInstalled`, with
/// `PreConfig` waiting for the checkout and for each dependency's
/// `PostInstalled`.
pub fn medium(
    ruleset: &mut RuleSet,
    name: &str,
    roles: &[String],
    checkout: &Label,
    deps: &[String],
    makefile: Option<&str>,
) -> Result<()> {
    let action: Arc<dyn Action> = Arc::new(MakePackageAction::new(checkout, makefile));
    let domain = checkout.domain();

    for role in roles {
        let pre = Label::package(domain, name, Some(role), tag::PRE_CONFIG)?;
        let mut rule = Rule::new(pre.clone(), Some(action.clone()));
        rule.add(checkout.with_tag(tag::CHECKED_OUT));
        for dep in deps {
            rule.add(Label::package(
                domain,
                dep,
                Some(role),
                tag::POST_INSTALLED,
            )?);
        }
        ruleset.add(rule);

        let mut last = pre;
        for t in [
            tag::CONFIGURED,
            tag::BUILT,
            tag::INSTALLED,
            tag::POST_INSTALLED,
        ] {
            let next = last.with_tag(t);
            ruleset.add(depend_one(Some(action.clone()), &next, last));
            last = next;
        }

        // Cleaning needs the sources present, nothing more.
        for t in [tag::CLEAN, tag::DIST_CLEAN] {
            ruleset.add(depend_one(
                Some(action.clone()),
                &Label::package(domain, name, Some(role), t)?,
                checkout.with_tag(tag::CHECKED_OUT),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lbl(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    #[test]
    fn medium_wires_the_package_chain() {
        let mut rs = RuleSet::new();
        medium(
            &mut rs,
            "hello",
            &["x86".to_string()],
            &lbl("checkout:hello/*"),
            &[],
            None,
        )
        .unwrap();

        let pre = rs.rule_for(&lbl("package:hello{x86}/PreConfig")).unwrap();
        assert!(pre.deps.contains(&lbl("checkout:hello/CheckedOut")));

        for (t, dep) in [
            ("Configured", "PreConfig"),
            ("Built", "Configured"),
            ("Installed", "Built"),
            ("PostInstalled", "Installed"),
        ] {
            let rule = rs
                .rule_for(&lbl(&format!("package:hello{{x86}}/{t}")))
                .unwrap();
            assert!(
                rule.deps.contains(&lbl(&format!("package:hello{{x86}}/{dep}"))),
                "{t} should depend on {dep}"
            );
            assert!(rule.action.is_some());
        }

        let clean = rs.rule_for(&lbl("package:hello{x86}/Clean")).unwrap();
        assert!(clean.deps.contains(&lbl("checkout:hello/CheckedOut")));
    }

    #[test]
    fn package_deps_join_at_preconfig() {
        let mut rs = RuleSet::new();
        medium(
            &mut rs,
            "app",
            &["x86".to_string(), "arm".to_string()],
            &lbl("checkout:app/*"),
            &["libc".to_string()],
            None,
        )
        .unwrap();

        for role in ["x86", "arm"] {
            let pre = rs
                .rule_for(&lbl(&format!("package:app{{{role}}}/PreConfig")))
                .unwrap();
            assert!(
                pre.deps
                    .contains(&lbl(&format!("package:libc{{{role}}}/PostInstalled"))),
                "{role} should need libc"
            );
        }
    }

    #[test]
    fn domain_follows_the_checkout() {
        let mut rs = RuleSet::new();
        medium(
            &mut rs,
            "xyzlib",
            &["x86".to_string()],
            &lbl("checkout:(subdomain)xyzlib/*"),
            &[],
            None,
        )
        .unwrap();
        assert!(rs
            .rule_for(&lbl("package:(subdomain)xyzlib{x86}/PreConfig"))
            .is_some());
    }
}
