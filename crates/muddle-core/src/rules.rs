//! Rules and rule sets: how you get from A to B.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::builder::Action;
use crate::label::Label;

/// A dependency set: to reach `target`, first reach every member of
/// `deps`, then run `action` (if any).
///
/// `deps` really is a set - adding the same label twice has no effect.
#[derive(Clone)]
pub struct Rule {
    pub target: Label,
    pub action: Option<Arc<dyn Action>>,
    pub deps: BTreeSet<Label>,
}

impl Rule {
    pub fn new(target: Label, action: Option<Arc<dyn Action>>) -> Self {
        Rule {
            target,
            action,
            deps: BTreeSet::new(),
        }
    }

    /// Add a dependency on the given label.
    pub fn add(&mut self, dep: Label) {
        self.deps.insert(dep);
    }

    /// Merge another rule into this one: union the dependencies, and let a
    /// non-null action override a null one. Empty rules registered early
    /// must be overridable by later real ones.
    pub fn merge(&mut self, other: Rule) {
        self.deps.extend(other.deps);
        if other.action.is_some() {
            self.action = other.action;
        }
    }

    /// Render as `target <- [ dep, dep, ... ]`, optionally filtering
    /// system-flagged or user dependencies out.
    pub fn render(&self, show_system: bool, show_user: bool) -> String {
        let deps: Vec<String> = self
            .deps
            .iter()
            .filter(|d| if d.system { show_system } else { show_user })
            .map(Label::to_string)
            .collect();
        format!("{} <- [ {} ]", self.target, deps.join(", "))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(true, true))
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("target", &self.target)
            .field("action", &self.action.as_ref().map(|a| a.name()))
            .field("deps", &self.deps)
            .finish()
    }
}

/// A mapping from target label to the rule that produces it. Adding a rule
/// for an existing target merges the two.
#[derive(Clone, Default)]
pub struct RuleSet {
    map: BTreeMap<Label, Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        RuleSet::default()
    }

    pub fn add(&mut self, rule: Rule) {
        match self.map.get_mut(&rule.target) {
            Some(existing) => existing.merge(rule),
            None => {
                self.map.insert(rule.target.clone(), rule);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Exact lookup, no wildcard expansion.
    pub fn rule_for(&self, target: &Label) -> Option<&Rule> {
        self.map.get(target)
    }

    /// Exact lookup, inserting an empty rule if the target is new. Used by
    /// registration helpers that accrete onto a rule over time.
    pub fn rule_for_mut(&mut self, target: &Label) -> &mut Rule {
        self.map
            .entry(target.clone())
            .or_insert_with(|| Rule::new(target.clone(), None))
    }

    /// Every rule whose key is compatible with `query`.
    ///
    /// With `use_match`, keys are compared under the wildcard relation;
    /// otherwise with `use_tags` the lookup is exact, and without either
    /// the tag is ignored entirely.
    pub fn rules_for_target(&self, query: &Label, use_tags: bool, use_match: bool) -> Vec<&Rule> {
        if use_match {
            self.map
                .values()
                .filter(|r| query.matches(&r.target).is_some())
                .collect()
        } else if use_tags {
            self.map.get(query).into_iter().collect()
        } else {
            self.map
                .values()
                .filter(|r| r.target.matches_without_tag(query))
                .collect()
        }
    }

    /// The target labels (keys, not rules) compatible with `query`. Without
    /// `use_match` the query is returned as the only candidate.
    pub fn targets_matching(&self, query: &Label, use_match: bool) -> BTreeSet<Label> {
        if use_match {
            self.map
                .keys()
                .filter(|k| k.matches(query).is_some())
                .cloned()
                .collect()
        } else {
            BTreeSet::from([query.clone()])
        }
    }

    /// Is there any rule whose key matches `query`?
    pub fn target_exists(&self, query: &Label) -> bool {
        self.map.keys().any(|k| k.matches(query).is_some())
    }

    /// The rules having at least one dependency compatible with `query`
    /// under the selected relation.
    pub fn rules_depending_on(&self, query: &Label, use_tags: bool, use_match: bool) -> Vec<&Rule> {
        self.map
            .values()
            .filter(|r| {
                r.deps.iter().any(|dep| {
                    if use_match {
                        dep.matches(query).is_some()
                    } else if use_tags {
                        dep == query
                    } else {
                        dep.matches_without_tag(query)
                    }
                })
            })
            .collect()
    }

    pub fn merge(&mut self, other: RuleSet) {
        for (_, rule) in other.map {
            self.add(rule);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.map.values()
    }

    /// Render every rule, one per line, optionally filtered by a matching
    /// label and by the system flag of the target.
    pub fn render(
        &self,
        match_label: Option<&Label>,
        show_user: bool,
        show_system: bool,
        ignore_empty: bool,
    ) -> String {
        let mut out = String::from("-----\n");
        for rule in self.map.values() {
            if ignore_empty && rule.deps.is_empty() {
                continue;
            }
            if let Some(filter) = match_label {
                if filter.matches(&rule.target).is_none() {
                    continue;
                }
            }
            if if rule.target.system {
                show_system
            } else {
                show_user
            } {
                out.push_str(&rule.render(show_system, show_user));
                out.push('\n');
            }
        }
        out.push_str("-----\n");
        out
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(None, true, true, false))
    }
}

/// Thread `label` through a sequence of tags, each depending on the
/// previous, all sharing the same action.
pub fn depend_chain(
    action: Option<Arc<dyn Action>>,
    label: &Label,
    tags: &[&str],
    ruleset: &mut RuleSet,
) {
    let mut last = label.clone();
    ruleset.add(Rule::new(last.clone(), action.clone()));
    for tag in tags {
        let next = last.with_tag(tag);
        let mut rule = Rule::new(next.clone(), action.clone());
        rule.add(last);
        ruleset.add(rule);
        last = next;
    }
}

/// A rule making `label` depend on nothing at all.
pub fn depend_none(action: Option<Arc<dyn Action>>, label: &Label) -> Rule {
    Rule::new(label.clone(), action)
}

/// A rule making `label` depend only on `dep`.
pub fn depend_one(action: Option<Arc<dyn Action>>, label: &Label, dep: Label) -> Rule {
    let mut rule = Rule::new(label.clone(), action);
    rule.add(dep);
    rule
}

/// A rule making `label` depend on itself at an earlier tag.
pub fn depend_self(action: Option<Arc<dyn Action>>, label: &Label, old_tag: &str) -> Rule {
    let mut rule = Rule::new(label.clone(), action);
    rule.add(label.with_tag(old_tag));
    rule
}

/// Re-tag every label in a list.
pub fn retag_label_list(labels: &[Label], new_tag: &str) -> Vec<Label> {
    labels.iter().map(|l| l.with_tag(new_tag)).collect()
}

/// Of a set of rules, the one with the fewest direct dependencies. Only
/// meaningful as a tie-break; usually called with a single-element slice.
pub fn rule_with_least_dependencies<'a>(rules: &[&'a Rule]) -> Option<&'a Rule> {
    rules.iter().min_by_key(|r| r.deps.len()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BuildContext;
    use crate::error::Result;

    fn lbl(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    struct NullAction(&'static str);

    impl Action for NullAction {
        fn name(&self) -> &str {
            self.0
        }

        fn build_label(
            &self,
            _ctx: &BuildContext,
            _label: &Label,
            _env: &std::collections::BTreeMap<String, String>,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn add_merges_rules_with_the_same_target() {
        let mut rs = RuleSet::new();
        rs.add(depend_one(
            None,
            &lbl("package:fred{x86}/Built"),
            lbl("checkout:fred/CheckedOut"),
        ));
        rs.add(depend_one(
            Some(Arc::new(NullAction("make"))),
            &lbl("package:fred{x86}/Built"),
            lbl("package:libc{x86}/PostInstalled"),
        ));

        let rule = rs.rule_for(&lbl("package:fred{x86}/Built")).unwrap();
        assert_eq!(rule.deps.len(), 2);
        assert_eq!(rule.action.as_ref().map(|a| a.name()), Some("make"));

        // A later null action must not displace the real one.
        rs.add(depend_none(None, &lbl("package:fred{x86}/Built")));
        let rule = rs.rule_for(&lbl("package:fred{x86}/Built")).unwrap();
        assert!(rule.action.is_some());
    }

    #[test]
    fn rules_for_target_honours_the_three_relations() {
        let mut rs = RuleSet::new();
        rs.add(depend_none(None, &lbl("package:fred{x86}/Built")));
        rs.add(depend_none(None, &lbl("package:fred{x86}/Installed")));
        rs.add(depend_none(None, &lbl("package:*{x86}/Built")));

        // Wildcard match: both the exact key and the wildcard key apply.
        let matched = rs.rules_for_target(&lbl("package:fred{x86}/Built"), true, true);
        assert_eq!(matched.len(), 2);

        // Exact: only the identical key.
        let exact = rs.rules_for_target(&lbl("package:fred{x86}/Built"), true, false);
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].target, lbl("package:fred{x86}/Built"));

        // Tag-blind: every tag of the exact entity.
        let tagless = rs.rules_for_target(&lbl("package:fred{x86}/Clean"), false, false);
        assert_eq!(tagless.len(), 2);
    }

    #[test]
    fn rules_depending_on_matches_deps() {
        let mut rs = RuleSet::new();
        rs.add(depend_one(
            None,
            &lbl("package:fred{x86}/PreConfig"),
            lbl("checkout:fred/CheckedOut"),
        ));
        rs.add(depend_one(
            None,
            &lbl("deployment:all/Deployed"),
            lbl("package:*{x86}/PostInstalled"),
        ));

        let direct = rs.rules_depending_on(&lbl("checkout:fred/CheckedOut"), true, true);
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].target, lbl("package:fred{x86}/PreConfig"));

        // The wildcard dep of the deployment matches any x86 package.
        let via_wild = rs.rules_depending_on(&lbl("package:fred{x86}/PostInstalled"), true, true);
        assert_eq!(via_wild.len(), 1);
        assert_eq!(via_wild[0].target, lbl("deployment:all/Deployed"));

        // Exact comparison does not see through the wildcard dep.
        let exact = rs.rules_depending_on(&lbl("package:fred{x86}/PostInstalled"), true, false);
        assert!(exact.is_empty());
    }

    #[test]
    fn depend_chain_threads_tags() {
        let mut rs = RuleSet::new();
        let co = lbl("checkout:fred/CheckedOut");
        depend_chain(None, &co, &["Pulled", "Merged"], &mut rs);

        assert!(rs.rule_for(&co).unwrap().deps.is_empty());
        let pulled = rs.rule_for(&lbl("checkout:fred/Pulled")).unwrap();
        assert!(pulled.deps.contains(&co));
        let merged = rs.rule_for(&lbl("checkout:fred/Merged")).unwrap();
        assert!(merged.deps.contains(&lbl("checkout:fred/Pulled")));
    }

    #[test]
    fn quick_rule_helpers() {
        let built = lbl("package:fred{x86}/Built");
        let selfish = depend_self(None, &built, "Configured");
        assert!(selfish.deps.contains(&lbl("package:fred{x86}/Configured")));

        let retagged = retag_label_list(
            &[built.clone(), lbl("package:bob{x86}/Built")],
            "Installed",
        );
        assert_eq!(
            retagged,
            [
                lbl("package:fred{x86}/Installed"),
                lbl("package:bob{x86}/Installed"),
            ]
        );

        let small = depend_none(None, &built);
        let big = depend_one(None, &built, lbl("checkout:fred/CheckedOut"));
        let best = rule_with_least_dependencies(&[&big, &small]).unwrap();
        assert!(best.deps.is_empty());
    }

    #[test]
    fn render_hides_system_targets_on_request() {
        let mut rs = RuleSet::new();
        rs.add(depend_none(None, &lbl("package:fred{x86}/Built")));
        rs.add(depend_none(
            None,
            &lbl("package:sys{x86}/Built[S]").with_system(true),
        ));

        let all = rs.render(None, true, true, false);
        assert!(all.contains("package:sys{x86}/Built"));
        let user_only = rs.render(None, true, false, false);
        assert!(!user_only.contains("package:sys{x86}/Built"));
        assert!(user_only.contains("package:fred{x86}/Built"));
    }
}
