//! Checkout registration: wiring a version-controlled source tree into
//! the rule set, with its lifecycle driven by one VCS action.
//!
//! Three layouts are supported: `simple` puts the checkout at
//! `src/<name>`, `twolevel` at `src/<dir>/<leaf>`, and `multilevel` at an
//! arbitrary path that may not end in the checkout's name at all (needed
//! for deeply nested vendor trees, where several same-named repositories
//! must coexist).

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use muddle_core::{
    rules::{depend_one, Rule},
    tag, Action, BuildContext, Label, MuddleError, Result, RuleSet,
};
use muddle_vcs::{VcsAdapter, VcsError};

/// The one action serving a checkout's whole lifecycle: it dispatches on
/// the tag being built.
pub struct VcsCheckoutAction {
    adapter: Arc<dyn VcsAdapter>,
}

impl VcsCheckoutAction {
    pub fn new(adapter: Arc<dyn VcsAdapter>) -> Self {
        VcsCheckoutAction { adapter }
    }
}

impl Action for VcsCheckoutAction {
    fn name(&self) -> &str {
        "vcs-checkout"
    }

    fn build_label(
        &self,
        ctx: &BuildContext,
        label: &Label,
        _env: &BTreeMap<String, String>,
    ) -> Result<()> {
        let info = ctx.db.checkout_info(label)?.clone();
        let dir = ctx.layout.checkout_path(&ctx.db, label)?;

        let outcome = match label.tag() {
            tag::CHECKED_OUT => {
                if dir.exists() {
                    debug!("{label}: {} already exists, not checking out", dir.display());
                    Ok(())
                } else {
                    if let Some(parent) = dir.parent() {
                        std::fs::create_dir_all(parent)
                            .map_err(|e| MuddleError::io(parent, e))?;
                    }
                    self.adapter.checkout(
                        &info.repo,
                        &dir,
                        info.branch.as_deref(),
                        info.revision.as_deref(),
                    )
                }
            }
            tag::PULLED => self.adapter.pull(&dir),
            tag::MERGED => self.adapter.merge(&dir),
            tag::CHANGES_COMMITTED => self.adapter.commit(&dir),
            tag::CHANGES_PUSHED => self.adapter.push(&dir),
            // The distribution planner produces /Distributed itself.
            tag::DISTRIBUTED => Ok(()),
            other => {
                return Err(MuddleError::Bug(format!(
                    "VCS action asked to build unknown tag '{other}' of {label}"
                )))
            }
        };

        outcome.map_err(|e| match e {
            VcsError::NotSupported { vcs, operation } => MuddleError::Unsupported {
                label: label.clone(),
                reason: format!("{vcs} does not support {operation}"),
            },
            other => MuddleError::GiveUp(other.to_string()),
        })
    }
}

/// Register `checkout:<name>` at `src/<name>`.
pub fn simple(
    ruleset: &mut RuleSet,
    ctx: &mut BuildContext,
    adapter: Arc<dyn VcsAdapter>,
    label: &Label,
    info: muddle_core::CheckoutInfo,
) -> Result<()> {
    register(ruleset, ctx, adapter, label, info)
}

/// Register `checkout:<name>` at `src/<dir>/<name>`.
pub fn twolevel(
    ruleset: &mut RuleSet,
    ctx: &mut BuildContext,
    adapter: Arc<dyn VcsAdapter>,
    label: &Label,
    co_dir: &str,
    mut info: muddle_core::CheckoutInfo,
) -> Result<()> {
    let leaf = info.co_leaf.clone().unwrap_or_else(|| label.name().to_string());
    info.dir = Some(format!("{co_dir}/{leaf}"));
    register(ruleset, ctx, adapter, label, info)
}

/// Register a checkout at an arbitrary directory under `src/`. The
/// checkout's name and its directory are fully independent here.
pub fn multilevel(
    ruleset: &mut RuleSet,
    ctx: &mut BuildContext,
    adapter: Arc<dyn VcsAdapter>,
    label: &Label,
    co_dir: &str,
    mut info: muddle_core::CheckoutInfo,
) -> Result<()> {
    info.dir = Some(co_dir.to_string());
    register(ruleset, ctx, adapter, label, info)
}

/// The common wiring: remember the checkout in the database and thread
/// its lifecycle through the rule set.
pub fn register(
    ruleset: &mut RuleSet,
    ctx: &mut BuildContext,
    adapter: Arc<dyn VcsAdapter>,
    label: &Label,
    info: muddle_core::CheckoutInfo,
) -> Result<()> {
    ctx.db.register_checkout(label, info);

    let action: Arc<dyn Action> = Arc::new(VcsCheckoutAction::new(adapter));
    let checked_out = label.with_tag(tag::CHECKED_OUT);
    ruleset.add(Rule::new(checked_out.clone(), Some(action.clone())));

    // Pull, merge and commit each need a checked-out tree; pushing needs
    // the changes committed first.
    for t in [tag::PULLED, tag::MERGED, tag::CHANGES_COMMITTED] {
        ruleset.add(depend_one(
            Some(action.clone()),
            &label.with_tag(t),
            checked_out.clone(),
        ));
    }
    ruleset.add(depend_one(
        Some(action.clone()),
        &label.with_tag(tag::CHANGES_PUSHED),
        label.with_tag(tag::CHANGES_COMMITTED),
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use muddle_core::{CheckoutInfo, Database, Layout};
    use muddle_vcs::Git;

    fn lbl(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    fn fresh_ctx() -> BuildContext {
        BuildContext::new(Layout::new("/build"), Database::new("/build"))
    }

    #[test]
    fn register_wires_the_lifecycle_chain() {
        let mut rs = RuleSet::new();
        let mut ctx = fresh_ctx();
        register(
            &mut rs,
            &mut ctx,
            Arc::new(Git),
            &lbl("checkout:hello/*"),
            CheckoutInfo {
                vcs: "git".into(),
                repo: "file:///srv/hello".into(),
                ..Default::default()
            },
        )
        .unwrap();

        let pulled = rs.rule_for(&lbl("checkout:hello/Pulled")).unwrap();
        assert!(pulled.deps.contains(&lbl("checkout:hello/CheckedOut")));
        assert!(pulled.action.is_some());
        let pushed = rs.rule_for(&lbl("checkout:hello/ChangesPushed")).unwrap();
        assert!(pushed.deps.contains(&lbl("checkout:hello/ChangesCommitted")));
        assert!(ctx.db.checkout_info(&lbl("checkout:hello/*")).is_ok());
    }

    #[test]
    fn twolevel_checkouts_live_under_their_directory() {
        let mut rs = RuleSet::new();
        let mut ctx = fresh_ctx();
        twolevel(
            &mut rs,
            &mut ctx,
            Arc::new(Git),
            &lbl("checkout:checkout2/*"),
            "twolevel",
            CheckoutInfo {
                vcs: "git".into(),
                repo: "file:///srv/twolevel/checkout2".into(),
                ..Default::default()
            },
        )
        .unwrap();

        let rel = ctx.db.checkout_rel(&lbl("checkout:checkout2/*")).unwrap();
        assert_eq!(rel, std::path::PathBuf::from("src/twolevel/checkout2"));
    }

    #[test]
    fn multilevel_checkout_name_and_directory_differ() {
        let mut rs = RuleSet::new();
        let mut ctx = fresh_ctx();
        multilevel(
            &mut rs,
            &mut ctx,
            Arc::new(Git),
            &lbl("checkout:platform_build/*"),
            "android/platform/build",
            CheckoutInfo {
                vcs: "git".into(),
                repo: "file:///srv/android/platform/build".into(),
                ..Default::default()
            },
        )
        .unwrap();

        let rel = ctx
            .db
            .checkout_rel(&lbl("checkout:platform_build/*"))
            .unwrap();
        assert_eq!(rel, std::path::PathBuf::from("src/android/platform/build"));
    }
}
