//! The dependency solver: forward ("what must run to reach this label")
//! and reverse ("what depends on this label") transitive closure.

use std::collections::BTreeSet;

use itertools::Itertools;

use crate::error::{MuddleError, Result};
use crate::label::Label;
use crate::rules::{Rule, RuleSet};

/// Compute a complete, ordered list of rules whose actions, run in
/// sequence, suffice to reach `target` (and every stored target it
/// matches under wildcards).
///
/// With `use_tags` false the search is tag-blind, i.e. effectively a
/// wildcard tag. Iteration is over sorted sets throughout, so the order
/// of the result is deterministic.
pub fn needed_to_build(
    ruleset: &RuleSet,
    target: &Label,
    use_tags: bool,
    use_match: bool,
) -> Result<Vec<Rule>> {
    // Rules already emitted, identified by their stored target.
    let mut rule_list: Vec<Rule> = Vec::new();
    let mut emitted: BTreeSet<Label> = BTreeSet::new();
    // Labels known to be satisfied by obeying `rule_list` so far.
    let mut satisfied: BTreeSet<Label> = BTreeSet::new();

    // The labels we would like to see asserted.
    let mut targets: BTreeSet<Label> = ruleset.targets_matching(target, use_match);

    loop {
        targets.retain(|t| !satisfied.contains(t));
        if targets.is_empty() {
            return Ok(rule_list);
        }

        let mut new_targets: BTreeSet<Label> = BTreeSet::new();
        let mut done_something = false;

        for tgt in &targets {
            let rules = ruleset.rules_for_target(tgt, use_tags, true);
            if rules.is_empty() {
                return Err(MuddleError::NoRuleFor(tgt.clone()));
            }

            // In the presence of wildcard rules several rules can build one
            // target; we must satisfy every one of them.
            let mut can_build = true;
            for rule in &rules {
                for dep in &rule.deps {
                    if !satisfied.contains(dep) {
                        can_build = false;
                        if !new_targets.contains(dep) && !targets.contains(dep) {
                            new_targets.insert(dep.clone());
                            done_something = true;
                        }
                    }
                }
            }

            if can_build {
                for rule in rules {
                    if emitted.insert(rule.target.clone()) {
                        rule_list.push(rule.clone());
                    }
                }
                satisfied.insert(tgt.clone());
                done_something = true;
            } else {
                new_targets.insert(tgt.clone());
            }
        }

        if !done_something {
            return Err(MuddleError::CircularOrIncomplete {
                target: target.clone(),
                pending: format!("{{ {} }}", targets.iter().join(", ")),
                partial: format!(
                    "[ {} ]",
                    rule_list.iter().map(|r| r.target.to_string()).join(", ")
                ),
            });
        }
        targets = new_targets;
    }
}

/// The set of labels that directly or indirectly depend on `label`,
/// including the stored targets `label` itself matches.
///
/// Deliberately a set, not an ordered rule list: callers wanting a usable
/// order re-run [`needed_to_build`] per member so that all the other
/// prerequisites get satisfied too.
pub fn required_by(
    ruleset: &RuleSet,
    label: &Label,
    use_tags: bool,
    use_match: bool,
) -> Result<BTreeSet<Label>> {
    let seed = ruleset.rules_for_target(label, use_tags, use_match);
    if seed.is_empty() {
        return Err(MuddleError::NoRuleFor(label.clone()));
    }

    let mut depends: BTreeSet<Label> = seed.into_iter().map(|r| r.target.clone()).collect();

    loop {
        let mut extra: BTreeSet<Label> = BTreeSet::new();
        for dep in &depends {
            for rule in ruleset.rules_depending_on(dep, use_tags, use_match) {
                if !depends.contains(&rule.target) {
                    extra.insert(rule.target.clone());
                }
            }
        }
        if extra.is_empty() {
            return Ok(depends);
        }
        depends.extend(extra);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{depend_none, depend_one};

    fn lbl(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    /// a <- b <- c, with d on the side.
    fn diamondless_ruleset() -> RuleSet {
        let mut rs = RuleSet::new();
        rs.add(depend_one(
            None,
            &lbl("package:a{x86}/Built"),
            lbl("package:b{x86}/Built"),
        ));
        rs.add(depend_one(
            None,
            &lbl("package:b{x86}/Built"),
            lbl("checkout:c/CheckedOut"),
        ));
        rs.add(depend_none(None, &lbl("checkout:c/CheckedOut")));
        rs.add(depend_none(None, &lbl("checkout:d/CheckedOut")));
        rs
    }

    #[test]
    fn builds_in_dependency_order() {
        let rs = diamondless_ruleset();
        let rules = needed_to_build(&rs, &lbl("package:a{x86}/Built"), true, true).unwrap();
        let order: Vec<String> = rules.iter().map(|r| r.target.to_string()).collect();
        assert_eq!(
            order,
            [
                "checkout:c/CheckedOut",
                "package:b{x86}/Built",
                "package:a{x86}/Built",
            ]
        );
    }

    #[test]
    fn soundness_every_dep_precedes_its_dependent() {
        let rs = diamondless_ruleset();
        let rules = needed_to_build(&rs, &lbl("package:a{x86}/Built"), true, true).unwrap();
        let mut seen: BTreeSet<Label> = BTreeSet::new();
        for rule in &rules {
            for dep in &rule.deps {
                assert!(seen.contains(dep), "{} ran before its dep {dep}", rule.target);
            }
            seen.insert(rule.target.clone());
        }
    }

    #[test]
    fn wildcard_query_builds_all_matching_targets() {
        let rs = diamondless_ruleset();
        let rules = needed_to_build(&rs, &lbl("checkout:*/CheckedOut"), true, true).unwrap();
        let targets: BTreeSet<String> = rules.iter().map(|r| r.target.to_string()).collect();
        assert!(targets.contains("checkout:c/CheckedOut"));
        assert!(targets.contains("checkout:d/CheckedOut"));
    }

    #[test]
    fn union_of_wildcard_rules_applies() {
        // A wildcard rule adds an extra dependency to every x86 package.
        let mut rs = diamondless_ruleset();
        rs.add(depend_one(
            None,
            &lbl("package:*{x86}/Built"),
            lbl("checkout:d/CheckedOut"),
        ));

        let rules = needed_to_build(&rs, &lbl("package:a{x86}/Built"), true, true).unwrap();
        let order: Vec<String> = rules.iter().map(|r| r.target.to_string()).collect();
        let pos = |t: &str| order.iter().position(|x| x == t).unwrap();
        // The extra dep must come before anything the wildcard rule covers.
        assert!(pos("checkout:d/CheckedOut") < pos("package:b{x86}/Built"));
        assert!(pos("checkout:c/CheckedOut") < pos("package:b{x86}/Built"));
        assert!(pos("package:b{x86}/Built") < pos("package:a{x86}/Built"));
    }

    #[test]
    fn missing_rule_is_reported() {
        let mut rs = RuleSet::new();
        rs.add(depend_one(
            None,
            &lbl("package:a{x86}/Built"),
            lbl("checkout:absent/CheckedOut"),
        ));
        let err = needed_to_build(&rs, &lbl("package:a{x86}/Built"), true, true).unwrap_err();
        assert!(matches!(err, MuddleError::NoRuleFor(l)
            if l == lbl("checkout:absent/CheckedOut")));
    }

    #[test]
    fn cycle_is_reported_with_residual() {
        let mut rs = RuleSet::new();
        rs.add(depend_one(
            None,
            &lbl("package:a{x86}/Built"),
            lbl("package:b{x86}/Built"),
        ));
        rs.add(depend_one(
            None,
            &lbl("package:b{x86}/Built"),
            lbl("package:a{x86}/Built"),
        ));
        let err = needed_to_build(&rs, &lbl("package:a{x86}/Built"), true, true).unwrap_err();
        match err {
            MuddleError::CircularOrIncomplete { pending, .. } => {
                assert!(pending.contains("package:a{x86}/Built"));
                assert!(pending.contains("package:b{x86}/Built"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn reverse_closure_walks_dependents() {
        let rs = diamondless_ruleset();
        let result = required_by(&rs, &lbl("checkout:c/CheckedOut"), true, true).unwrap();
        assert!(result.contains(&lbl("checkout:c/CheckedOut")));
        assert!(result.contains(&lbl("package:b{x86}/Built")));
        assert!(result.contains(&lbl("package:a{x86}/Built")));
        assert!(!result.contains(&lbl("checkout:d/CheckedOut")));
    }

    #[test]
    fn reverse_closure_duality() {
        // q is in required_by(d) iff a chain of rules runs from q down to d.
        let rs = diamondless_ruleset();
        let down = needed_to_build(&rs, &lbl("package:a{x86}/Built"), true, true).unwrap();
        assert!(down
            .iter()
            .any(|r| r.target == lbl("checkout:c/CheckedOut")));
        let up = required_by(&rs, &lbl("checkout:c/CheckedOut"), true, true).unwrap();
        assert!(up.contains(&lbl("package:a{x86}/Built")));
    }
}
