//! The build driver: advance labels to their tags by running rule
//! actions, consulting and updating the tag database as it goes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::debug;

use crate::db::Database;
use crate::env::{self, EnvBuilder, EnvStore};
use crate::error::{MuddleError, Result};
use crate::label::{Label, LabelKind};
use crate::rules::{Rule, RuleSet};
use crate::solver;
use crate::workspace::Layout;

/// Pluggable per-rule work. Implementations dispatch on the label's tag:
/// the same action object typically serves a whole lifecycle chain.
///
/// This is the engine's open registration point: anything implementing
/// `Action` can be attached to a rule by the build description.
pub trait Action: Send + Sync {
    /// A short name for reports and ambiguity errors.
    fn name(&self) -> &str;

    /// Do whatever is needed so that `label` can be considered reached.
    /// `env` is the composed child environment for any subprocess.
    fn build_label(&self, ctx: &BuildContext, label: &Label, env: &BTreeMap<String, String>)
        -> Result<()>;
}

/// Everything an action may consult while running: the tree layout, the
/// tag database (with its checkout registry) and the per-label
/// environment store. Mutation of the working tree is the action's own
/// business.
pub struct BuildContext {
    pub layout: Layout,
    pub db: Database,
    pub env_store: EnvStore,
    /// The build's name, as given by the build description.
    pub build_name: String,
    /// Roles a bare package name expands into.
    pub default_roles: Vec<String>,
    /// Labels built when no arguments are given at the top level.
    pub default_labels: Vec<Label>,
}

impl BuildContext {
    pub fn new(layout: Layout, db: Database) -> Self {
        BuildContext {
            layout,
            db,
            env_store: EnvStore::new(),
            build_name: String::new(),
            default_roles: Vec::new(),
            default_labels: Vec::new(),
        }
    }
}

/// Only definite, non-transient labels get marker files: a wildcard tag
/// would go stale the moment a new matching target appeared.
fn persistable(label: &Label) -> bool {
    !label.transient && label.is_definite()
}

/// The state machine that drives labels to their tags.
pub struct Builder {
    pub ruleset: RuleSet,
    pub ctx: BuildContext,
}

impl Builder {
    pub fn new(ctx: BuildContext, ruleset: RuleSet) -> Self {
        Builder { ruleset, ctx }
    }

    /// Drive `label` to its tag: ensure every dependency has been driven
    /// to its own tag first, then run the label's action (if any), then
    /// record the tag. Already-recorded labels return immediately.
    pub fn build_label(&self, label: &Label) -> Result<()> {
        let mut in_progress = BTreeSet::new();
        self.build_label_inner(label, &mut in_progress)
    }

    fn build_label_inner(&self, label: &Label, in_progress: &mut BTreeSet<Label>) -> Result<()> {
        if persistable(label) && self.ctx.db.has_tag(label) {
            return Ok(());
        }
        if !in_progress.insert(label.clone()) {
            return Err(MuddleError::CircularOrIncomplete {
                target: label.clone(),
                pending: format!("{{ {label} }}"),
                partial: "[ ]".to_string(),
            });
        }

        let result = self.build_label_rules(label, in_progress);
        in_progress.remove(label);
        result
    }

    fn build_label_rules(&self, label: &Label, in_progress: &mut BTreeSet<Label>) -> Result<()> {
        let rules: Vec<Rule> = self
            .ruleset
            .rules_for_target(label, true, true)
            .into_iter()
            .cloned()
            .collect();
        if rules.is_empty() {
            return Err(MuddleError::NoRuleFor(label.clone()));
        }

        // The effective dependency set is the union over every matching
        // rule, not just the most specific one.
        let deps: BTreeSet<&Label> = rules.iter().flat_map(|r| r.deps.iter()).collect();
        for dep in deps.iter() {
            self.build_label_inner(dep, in_progress)?;
        }

        // At most one distinct action may apply to a concrete target.
        let mut actions: Vec<&Arc<dyn Action>> = Vec::new();
        for rule in &rules {
            if let Some(action) = &rule.action {
                if !actions.iter().any(|a| Arc::ptr_eq(a, action)) {
                    actions.push(action);
                }
            }
        }
        if actions.len() > 1 {
            return Err(MuddleError::Configuration(format!(
                "multiple rules with actions ({}) apply to {label}",
                actions
                    .iter()
                    .map(|a| a.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        if let Some(action) = actions.first() {
            debug!("building {label} with action {}", action.name());
            let env = self.environment_for(label, &deps);
            action
                .build_label(&self.ctx, label, &env)
                .map_err(|e| e.for_label(label))?;
        }

        if persistable(label) {
            self.ctx.db.set_tag(label)?;
        }
        Ok(())
    }

    /// Compose the child environment for a label's action: the muddle
    /// variables, per-label store entries, and search-path prefixes
    /// accumulated from already-built package dependencies.
    fn environment_for(&self, label: &Label, deps: &BTreeSet<&Label>) -> BTreeMap<String, String> {
        let mut builder = EnvBuilder::new();
        builder.set(env::MUDDLE_LABEL, label.to_string());

        if label.kind() == &LabelKind::Package {
            builder.set(
                env::MUDDLE_OBJ,
                self.ctx.layout.package_obj_path(label).display().to_string(),
            );
            builder.set(
                env::MUDDLE_INSTALL,
                self.ctx
                    .layout
                    .package_install_path(label)
                    .display()
                    .to_string(),
            );
            // The package's source tree is its first checkout dependency.
            if let Some(src) = deps
                .iter()
                .filter(|d| d.kind() == &LabelKind::Checkout)
                .find_map(|d| self.ctx.layout.checkout_path(&self.ctx.db, d).ok())
            {
                builder.set(env::MUDDLE_SRC, src.display().to_string());
            }
        }

        // Search paths derived from dependencies that install things.
        let mut roles_seen = BTreeSet::new();
        for dep in deps {
            if dep.kind() == &LabelKind::Package {
                if let Some(role) = dep.role() {
                    if role != crate::label::WILDCARD
                        && roles_seen.insert((dep.domain().map(str::to_string), role.to_string()))
                    {
                        let install = self.ctx.layout.role_install_path(role, dep.domain());
                        builder.prepend("PATH", install.join("bin").display().to_string());
                        builder.prepend(
                            "LD_LIBRARY_PATH",
                            install.join("lib").display().to_string(),
                        );
                        builder.prepend(
                            "PKG_CONFIG_PATH",
                            install.join("lib/pkgconfig").display().to_string(),
                        );
                    }
                }
            }
        }

        builder.merge(&self.ctx.env_store.effective(label));
        builder.build()
    }

    /// Retract a label: clear its tag and, transitively, the tag of
    /// everything that depends on it.
    pub fn kill_label(&self, label: &Label) -> Result<()> {
        let mut to_clear: BTreeSet<Label> = BTreeSet::new();
        to_clear.insert(label.clone());
        match solver::required_by(&self.ruleset, label, true, true) {
            Ok(dependents) => to_clear.extend(dependents),
            // A label nothing depends on still gets its own tag cleared.
            Err(MuddleError::NoRuleFor(_)) => {}
            Err(e) => return Err(e),
        }
        for l in &to_clear {
            if !l.transient {
                self.ctx.db.clear_tag(l)?;
            }
        }
        Ok(())
    }

}
