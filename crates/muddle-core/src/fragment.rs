//! Turning command-line fragments into label sets.
//!
//! Users rarely type full labels. A fragment like `hello`, `hello{x86}`,
//! `(arm)hello` or `package:hello/Built` is completed from the command's
//! context: the kind defaults to the command's category, the tag is forced
//! to the command's required tag, and a missing role fans out across the
//! default roles.

use std::collections::BTreeSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::builder::Builder;
use crate::error::{MuddleError, Result};
use crate::label::{Label, LabelKind, WILDCARD};
use crate::solver;
use crate::workspace::{classify_dir, DirType};

/// The literal argument meaning "everything this command could touch".
pub const ALL: &str = "_all";

static FRAGMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^(?: (?P<kind>[A-Za-z0-9._+-]+|\*) : )?
        (?: \( (?P<domain>[A-Za-z0-9._+-]+|\*) \) )?
        (?P<name>[A-Za-z0-9._+-]+|\*)
        (?: \{ (?P<role>[A-Za-z0-9._+-]+|\*)? \} )?
        (?: / (?P<tag>[A-Za-z0-9._+-]+|\*) )?$",
    )
    .unwrap()
});

/// Which sort of command is interpreting the arguments. Determines the
/// default kind and how labels of other kinds are converted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Checkout,
    Package,
    Deployment,
    /// Commands taking any label; no conversion, order preserved.
    AnyLabel,
}

impl Category {
    fn default_kind(&self) -> LabelKind {
        match self {
            Category::Checkout => LabelKind::Checkout,
            Category::Package | Category::AnyLabel => LabelKind::Package,
            Category::Deployment => LabelKind::Deployment,
        }
    }

    fn target_kind(&self) -> LabelKind {
        match self {
            Category::Checkout => LabelKind::Checkout,
            Category::Package | Category::AnyLabel => LabelKind::Package,
            Category::Deployment => LabelKind::Deployment,
        }
    }
}

/// Expand one fragment into candidate labels, without checking whether any
/// of them exists. A missing role on a package fans out across the default
/// roles (or becomes a wildcard when there are none); a missing tag
/// becomes a wildcard, to be forced to the command's required tag later.
pub fn labels_from_fragment(
    fragment: &str,
    default_kind: &LabelKind,
    default_roles: &[String],
) -> Result<Vec<Label>> {
    let caps = FRAGMENT_RE.captures(fragment).ok_or_else(|| {
        MuddleError::BadLabel(format!("'{fragment}' is not a valid label fragment"))
    })?;

    let kind = caps
        .name("kind")
        .map(|m| LabelKind::from(m.as_str()))
        .unwrap_or_else(|| default_kind.clone());
    let domain = caps.name("domain").map(|m| m.as_str());
    let name = caps.name("name").unwrap().as_str();
    let role = caps.name("role").map(|m| m.as_str());
    let tag = caps.name("tag").map(|m| m.as_str()).unwrap_or(WILDCARD);

    let roles: Vec<Option<&str>> = match (&kind, role) {
        (_, Some(r)) => vec![Some(r)],
        (LabelKind::Package, None) => {
            if default_roles.is_empty() {
                vec![Some(WILDCARD)]
            } else {
                default_roles.iter().map(|r| Some(r.as_str())).collect()
            }
        }
        // A kind-wildcard fragment must be able to match roleful keys too.
        (LabelKind::Wildcard, None) => vec![Some(WILDCARD)],
        (_, None) => vec![None],
    };

    roles
        .into_iter()
        .map(|r| Label::new(kind.clone(), domain, name, r, tag))
        .collect()
}

/// Resolve command arguments to a sorted list of labels of the category's
/// kind, every one forced to `required_tag`.
pub fn resolve_args(
    builder: &Builder,
    category: Category,
    required_tag: &str,
    args: &[String],
) -> Result<Vec<Label>> {
    let initial = initial_labels(builder, category, required_tag, args)?;
    let mut result: BTreeSet<Label> = BTreeSet::new();

    for label in &initial {
        if label.kind() == &category.target_kind() || category == Category::AnyLabel {
            result.insert(force_tag(label, required_tag));
            continue;
        }
        match category {
            // A package or deployment argument to a checkout command names
            // every checkout needed to build it, at any depth.
            Category::Checkout => {
                for rule in solver::needed_to_build(&builder.ruleset, label, true, true)? {
                    if rule.target.kind() == &LabelKind::Checkout {
                        result.insert(force_tag(&rule.target, required_tag));
                    }
                }
            }
            Category::Package => match label.kind() {
                // A checkout argument names the default-role packages that
                // depend on it, directly or not.
                LabelKind::Checkout => {
                    for l in solver::required_by(&builder.ruleset, label, true, true)? {
                        if l.kind() == &LabelKind::Package
                            && l.role()
                                .is_some_and(|r| builder.ctx.default_roles.iter().any(|d| d == r))
                        {
                            result.insert(force_tag(&l, required_tag));
                        }
                    }
                }
                // A deployment argument names every package it pulls in.
                _ => {
                    for rule in solver::needed_to_build(&builder.ruleset, label, true, true)? {
                        if rule.target.kind() == &LabelKind::Package {
                            result.insert(force_tag(&rule.target, required_tag));
                        }
                    }
                }
            },
            // A checkout or package argument to a deployment command names
            // the deployments that (transitively) consume it.
            Category::Deployment => {
                for l in solver::required_by(&builder.ruleset, label, true, true)? {
                    if l.kind() == &LabelKind::Deployment {
                        result.insert(force_tag(&l, required_tag));
                    }
                }
            }
            Category::AnyLabel => unreachable!("handled above"),
        }
    }

    Ok(result.into_iter().collect())
}

/// The first step of resolution: each argument becomes the labels it
/// denotes, kept only if they exist in the rule set.
fn initial_labels(
    builder: &Builder,
    category: Category,
    required_tag: &str,
    args: &[String],
) -> Result<Vec<Label>> {
    let mut initial = Vec::new();
    for word in args {
        if word == ALL {
            if category == Category::AnyLabel {
                return Err(MuddleError::GiveUp(format!(
                    "'{ALL}' is not allowed here"
                )));
            }
            initial.extend(all_labels_of_kind(
                builder,
                &category.target_kind(),
                required_tag,
            ));
            continue;
        }

        let candidates = labels_from_fragment(
            word,
            &category.default_kind(),
            &builder.ctx.default_roles,
        )?;
        let used: Vec<Label> = candidates
            .iter()
            .filter(|l| builder.ruleset.target_exists(l))
            .cloned()
            .collect();
        if used.is_empty() {
            return Err(MuddleError::NoSuchLabel {
                fragment: word.clone(),
                label: candidates
                    .iter()
                    .map(Label::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        initial.extend(used);
    }
    Ok(initial)
}

/// Every concrete label of `kind` present in the rule set, at the given
/// tag. Wildcard-keyed rules name no entity of their own and are skipped.
pub fn all_labels_of_kind(builder: &Builder, kind: &LabelKind, tag: &str) -> Vec<Label> {
    let query = Label::new(
        kind.clone(),
        Some(WILDCARD),
        WILDCARD,
        Some(WILDCARD),
        WILDCARD,
    )
    .expect("wildcard query label");

    let mut labels: BTreeSet<Label> = BTreeSet::new();
    for key in builder.ruleset.targets_matching(&query, true) {
        if key.name() == WILDCARD
            || key.domain() == Some(WILDCARD)
            || key.role() == Some(WILDCARD)
        {
            continue;
        }
        labels.insert(force_tag(&key, tag));
    }
    labels.into_iter().collect()
}

fn force_tag(label: &Label, required_tag: &str) -> Label {
    if label.tag() == required_tag {
        label.clone()
    } else {
        label.with_tag(required_tag)
    }
}

/// When no arguments are given, infer labels from the current directory.
pub fn default_args(
    builder: &Builder,
    category: Category,
    required_tag: &str,
    current_dir: &Path,
) -> Result<Vec<Label>> {
    let place = classify_dir(&builder.ctx.db, current_dir);
    let words: Vec<String> = match (category, place) {
        (Category::Checkout, Some(DirType::Checkout(label))) => vec![label.to_string()],
        (Category::Checkout, Some(DirType::Root | DirType::Src | DirType::DomainRoot(_))) => {
            vec![ALL.to_string()]
        }
        (Category::Package, Some(DirType::Object(label))) => vec![label.to_string()],
        (Category::Package, Some(DirType::Checkout(label))) => vec![label.to_string()],
        (Category::Package, Some(DirType::Install(role))) => {
            vec![format!("package:*{{{role}}}/*")]
        }
        (Category::Deployment, Some(DirType::Deployed(name))) => {
            vec![format!("deployment:{name}/*")]
        }
        (Category::Deployment, _) => {
            // Fall back to the default deployments named by the build
            // description.
            let defaults: Vec<String> = builder
                .ctx
                .default_labels
                .iter()
                .filter(|l| l.kind() == &LabelKind::Deployment)
                .map(Label::to_string)
                .collect();
            if defaults.is_empty() {
                return Err(MuddleError::AmbiguousContext);
            }
            defaults
        }
        _ => return Err(MuddleError::AmbiguousContext),
    };
    resolve_args(builder, category, required_tag, &words)
}
