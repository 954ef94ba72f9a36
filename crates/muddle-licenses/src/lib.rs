//! Checkout licenses and the "implicit GPL" propagation analysis.
//!
//! Each checkout may declare at most one license. GPL-ish licenses
//! propagate: a checkout gets implicitly GPL-licensed when some package
//! builds it together with GPL-licensed code, unless a `not_built_against`
//! exception or a `with_exception` license variant suppresses the edge.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use muddle_core::{Label, LabelKind, RuleSet, WILDCARD};

/// A checkout's declared license.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum License {
    /// An open license without GPL propagation (Apache, BSD, MPL, ...).
    Open(String),
    Gpl { name: String, with_exception: bool },
    Lgpl { name: String, with_exception: bool },
    /// Distributed in binary form only.
    Binary(String),
    /// Not distributed at all.
    Secret(String),
}

impl License {
    pub fn gpl(name: &str) -> Self {
        License::Gpl {
            name: name.to_string(),
            with_exception: false,
        }
    }

    pub fn lgpl(name: &str) -> Self {
        License::Lgpl {
            name: name.to_string(),
            with_exception: false,
        }
    }

    /// Any GPL or LGPL variant, with or without exception.
    pub fn is_gpl_ish(&self) -> bool {
        matches!(self, License::Gpl { .. } | License::Lgpl { .. })
    }

    /// GPL-ish and propagating: the `with_exception` variants do not
    /// force their license onto users.
    pub fn propagates(&self) -> bool {
        matches!(
            self,
            License::Gpl {
                with_exception: false,
                ..
            } | License::Lgpl {
                with_exception: false,
                ..
            }
        )
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, License::Binary(_))
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, License::Secret(_))
    }

    pub fn is_open(&self) -> bool {
        matches!(self, License::Open(_))
    }
}

impl fmt::Display for License {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            License::Open(name) => write!(f, "LicenseOpen('{name}')"),
            License::Gpl {
                name,
                with_exception,
            } => {
                if *with_exception {
                    write!(f, "LicenseGPL('{name}', with_exception=True)")
                } else {
                    write!(f, "LicenseGPL('{name}')")
                }
            }
            License::Lgpl {
                name,
                with_exception,
            } => {
                if *with_exception {
                    write!(f, "LicenseLGPL('{name}', with_exception=True)")
                } else {
                    write!(f, "LicenseLGPL('{name}')")
                }
            }
            License::Binary(name) => write!(f, "LicenseBinary('{name}')"),
            License::Secret(name) => write!(f, "LicenseSecret('{name}')"),
        }
    }
}

/// The licenses build descriptions can name by shorthand.
pub fn standard_licenses() -> BTreeMap<&'static str, License> {
    BTreeMap::from([
        ("apache", License::Open("Apache".into())),
        ("bsd-new", License::Open("BSD 3-clause".into())),
        ("gpl2", License::gpl("GPL v2")),
        (
            "gpl2-except",
            License::Gpl {
                name: "GPL v2".into(),
                with_exception: true,
            },
        ),
        ("gpl2plus", License::gpl("GPL v2 and above")),
        ("gpl3", License::gpl("GPL v3")),
        ("lgpl", License::lgpl("LGPL")),
        (
            "lgpl-except",
            License::Lgpl {
                name: "LGPL".into(),
                with_exception: true,
            },
        ),
        ("mpl", License::Open("MPL 1.1".into())),
        ("mpl1_1", License::Open("MPL 1.1".into())),
        ("ukogl", License::Open("UK Open Government License".into())),
        ("zlib", License::Open("zlib".into())),
        ("code-nightmare-green", License::Secret("Code Nightmare Green".into())),
    ])
}

/// Normalise a label to its entity: the same checkout/package at tag `*`.
fn entity(label: &Label) -> Label {
    label.with_tag(WILDCARD)
}

/// Per-checkout licenses plus the `not_built_against` exception edges.
#[derive(Clone, Debug, Default)]
pub struct LicenseRegistry {
    licenses: BTreeMap<Label, License>,
    not_built_against: BTreeSet<(Label, Label)>,
}

impl LicenseRegistry {
    pub fn new() -> Self {
        LicenseRegistry::default()
    }

    /// Declare the license of a checkout. At most one; later declarations
    /// replace earlier ones.
    pub fn set_license(&mut self, checkout: &Label, license: License) {
        self.licenses.insert(entity(checkout), license);
    }

    pub fn license(&self, checkout: &Label) -> Option<&License> {
        self.licenses.get(&entity(checkout))
    }

    /// Assert that `package` does not link against or ship with
    /// `checkout`, suppressing GPL propagation across that edge.
    pub fn set_not_built_against(&mut self, package: &Label, checkout: &Label) {
        self.not_built_against
            .insert((entity(package), entity(checkout)));
    }

    /// Is propagation from `checkout` into `package` suppressed?
    pub fn is_not_built_against(&self, package: &Label, checkout: &Label) -> bool {
        self.not_built_against
            .iter()
            .any(|(p, c)| p.matches(package).is_some() && c.matches(checkout).is_some())
    }

    pub fn exceptions(&self) -> impl Iterator<Item = &(Label, Label)> {
        self.not_built_against.iter()
    }
}

/// Why a checkout is implicitly GPL: the packages that use it and the
/// GPL-ish checkouts those packages are built against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImplicitGpl {
    pub was: Option<License>,
    /// `(package, gpl_checkout)` pairs, sorted.
    pub reasons: Vec<(Label, Label)>,
}

/// The result of a license propagation analysis, ready for reporting.
#[derive(Clone, Debug, Default)]
pub struct LicenseAnalysis {
    /// Declared licenses, by checkout.
    pub licensed: BTreeMap<Label, License>,
    /// Checkouts with no declared license.
    pub unlicensed: Vec<Label>,
    /// Checkouts whose declared license is any GPL/LGPL variant.
    pub gpl_ish: BTreeMap<Label, License>,
    /// The `not_built_against` exception edges.
    pub exceptions: Vec<(Label, Label)>,
    /// Implicitly GPL checkouts and the reasons why.
    pub implicit: BTreeMap<Label, ImplicitGpl>,
    /// Implicitly GPL checkouts whose declared license forbids it.
    pub clashes: BTreeMap<Label, License>,
}

impl LicenseAnalysis {
    /// Checkouts that are GPL-licensed either explicitly or by
    /// propagation (the `_just_gpl` distribution's selection).
    pub fn all_gpl(&self) -> BTreeSet<Label> {
        let mut set: BTreeSet<Label> = self.gpl_ish.keys().cloned().collect();
        set.extend(self.implicit.keys().cloned());
        set
    }
}

/// The set of checkouts a package is built against: every checkout
/// transitively reachable through the rule graph, minus those its
/// `not_built_against` edges block.
pub fn uses(ruleset: &RuleSet, registry: &LicenseRegistry, package: &Label) -> BTreeSet<Label> {
    let package = entity(package);
    let mut checkouts = BTreeSet::new();
    let mut visited: BTreeSet<Label> = BTreeSet::new();
    let mut stack = vec![package.clone()];
    visited.insert(package.clone());

    while let Some(pkg) = stack.pop() {
        for rule in ruleset.rules_for_target(&pkg, true, true) {
            for dep in &rule.deps {
                match dep.kind() {
                    LabelKind::Checkout => {
                        let co = entity(dep);
                        if !registry.is_not_built_against(&package, &co) {
                            checkouts.insert(co);
                        }
                    }
                    LabelKind::Package => {
                        let next = entity(dep);
                        if visited.insert(next.clone()) {
                            stack.push(next);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    checkouts
}

/// The checkouts a package consumes directly (depth one).
fn direct_checkouts(
    ruleset: &RuleSet,
    registry: &LicenseRegistry,
    package: &Label,
) -> BTreeSet<Label> {
    let package = entity(package);
    let mut checkouts = BTreeSet::new();
    for rule in ruleset.rules_for_target(&package, true, true) {
        for dep in &rule.deps {
            if dep.kind() == &LabelKind::Checkout {
                let co = entity(dep);
                if !registry.is_not_built_against(&package, &co) {
                    checkouts.insert(co);
                }
            }
        }
    }
    checkouts
}

/// Every concrete package entity named by the rule set.
fn package_entities(ruleset: &RuleSet) -> BTreeSet<Label> {
    ruleset
        .iter()
        .filter(|r| {
            r.target.kind() == &LabelKind::Package
                && r.target.name() != WILDCARD
                && r.target.role() != Some(WILDCARD)
                && r.target.domain() != Some(WILDCARD)
        })
        .map(|r| entity(&r.target))
        .collect()
}

/// Run the full analysis over the rule graph. `all_checkouts` is the set
/// of checkout entities to report on (typically everything the build
/// description registered).
pub fn analyze(
    ruleset: &RuleSet,
    registry: &LicenseRegistry,
    all_checkouts: &[Label],
) -> LicenseAnalysis {
    let mut analysis = LicenseAnalysis::default();

    for co in all_checkouts {
        let co = entity(co);
        match registry.license(&co) {
            Some(license) => {
                if license.is_gpl_ish() {
                    analysis.gpl_ish.insert(co.clone(), license.clone());
                }
                analysis.licensed.insert(co, license.clone());
            }
            None => analysis.unlicensed.push(co),
        }
    }
    analysis.unlicensed.sort();

    analysis.exceptions = registry.exceptions().cloned().collect();
    analysis
        .exceptions
        .sort_by_key(|(p, c)| (p.to_string(), c.to_string()));

    // A checkout is implicitly GPL when some package using it directly is
    // also built against a propagating GPL-ish checkout other than the
    // checkout itself.
    for pkg in package_entities(ruleset) {
        let used = uses(ruleset, registry, &pkg);
        let triggers: Vec<&Label> = used
            .iter()
            .filter(|co| {
                registry
                    .license(co)
                    .is_some_and(|license| license.propagates())
            })
            .collect();
        if triggers.is_empty() {
            continue;
        }
        for co in direct_checkouts(ruleset, registry, &pkg) {
            let reasons: Vec<(Label, Label)> = triggers
                .iter()
                .filter(|g| ***g != co)
                .map(|g| (pkg.clone(), (*g).clone()))
                .collect();
            if reasons.is_empty() {
                continue;
            }
            let record = analysis.implicit.entry(co.clone()).or_insert_with(|| ImplicitGpl {
                was: registry.license(&co).cloned(),
                reasons: Vec::new(),
            });
            for reason in reasons {
                if !record.reasons.contains(&reason) {
                    record.reasons.push(reason);
                }
            }
        }
    }
    for record in analysis.implicit.values_mut() {
        record
            .reasons
            .sort_by_key(|(p, c)| (p.to_string(), c.to_string()));
    }

    for (co, record) in &analysis.implicit {
        if let Some(license) = &record.was {
            if license.is_binary() || license.is_secret() {
                analysis.clashes.insert(co.clone(), license.clone());
            }
        }
    }

    analysis
}

/// Render the analysis the way `muddle query checkout-licenses` prints it.
pub fn render_report(analysis: &LicenseAnalysis) -> String {
    let width = analysis
        .licensed
        .keys()
        .map(|l| l.to_string().len())
        .max()
        .unwrap_or(0);
    let mut out = String::new();

    out.push_str("Checkout licenses are:\n\n");
    for (co, license) in &analysis.licensed {
        out.push_str(&format!("* {:<width$} {license}\n", co.to_string()));
    }

    out.push_str("\nThe following checkouts do not have a license:\n\n");
    for co in &analysis.unlicensed {
        out.push_str(&format!("* {co}\n"));
    }

    out.push_str("\nThe following checkouts have some sort of GPL license:\n\n");
    for (co, license) in &analysis.gpl_ish {
        out.push_str(&format!("* {:<width$} {license}\n", co.to_string()));
    }

    out.push_str("\nExceptions to \"implicit\" GPL licensing are:\n\n");
    for (pkg, co) in &analysis.exceptions {
        out.push_str(&format!("* {pkg} is not built against {co}\n"));
    }

    out.push_str("\nThe following are \"implicitly\" GPL licensed for the given reasons:\n\n");
    for (co, record) in &analysis.implicit {
        let was = match &record.was {
            Some(license) => license.to_string(),
            None => "None".to_string(),
        };
        out.push_str(&format!("* {co}  (was {was})\n"));
        for (pkg, gpl) in &record.reasons {
            out.push_str(&format!("  - {pkg} depends on {gpl}\n"));
        }
    }

    out.push_str("\nThis means that the following have irreconcilable clashes:\n\n");
    for (co, license) in &analysis.clashes {
        out.push_str(&format!("* {:<width$} {license}\n", co.to_string()));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use muddle_core::rules::{depend_none, depend_one};

    fn lbl(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    /// make.medium-style wiring: one checkout per package, package deps
    /// expressed PreConfig <- dep/PostInstalled.
    fn add_package(rs: &mut RuleSet, name: &str, deps: &[&str]) {
        let co = lbl(&format!("checkout:{name}/CheckedOut"));
        rs.add(depend_none(None, &co));
        let pre = lbl(&format!("package:{name}{{x86}}/PreConfig"));
        let mut rule = depend_one(None, &pre, co);
        for dep in deps {
            rule.add(lbl(&format!("package:{dep}{{x86}}/PostInstalled")));
        }
        rs.add(rule);
        rs.add(depend_one(
            None,
            &lbl(&format!("package:{name}{{x86}}/PostInstalled")),
            pre,
        ));
    }

    /// The shape of the multilicense test build: secrets over GPL code.
    fn clash_build() -> (RuleSet, LicenseRegistry, Vec<Label>) {
        let mut rs = RuleSet::new();
        let mut reg = LicenseRegistry::new();
        let std = standard_licenses();

        for (name, license, deps) in [
            ("apache", Some("apache"), vec![]),
            ("gpl2", Some("gpl2"), vec![]),
            ("gpl2plus", Some("gpl2plus"), vec![]),
            ("gpl3", Some("gpl3"), vec![]),
            ("lgpl", Some("lgpl"), vec![]),
            ("gnulibc", Some("lgpl-except"), vec![]),
            ("ukogl", Some("ukogl"), vec!["lgpl"]),
            ("secret1", None, vec!["gnulibc"]),
            ("secret2", None, vec!["gnulibc", "gpl2plus"]),
            ("secret3", None, vec!["secret2"]),
            ("not_licensed1", None, vec!["gpl2", "gpl3"]),
        ] {
            add_package(&mut rs, name, &deps);
            if let Some(shorthand) = license {
                reg.set_license(
                    &lbl(&format!("checkout:{name}/*")),
                    std[shorthand].clone(),
                );
            }
        }
        for name in ["secret1", "secret2", "secret3"] {
            reg.set_license(
                &lbl(&format!("checkout:{name}/*")),
                License::Secret("Shh".into()),
            );
        }

        let checkouts: Vec<Label> = [
            "apache",
            "gpl2",
            "gpl2plus",
            "gpl3",
            "lgpl",
            "gnulibc",
            "ukogl",
            "secret1",
            "secret2",
            "secret3",
            "not_licensed1",
        ]
        .iter()
        .map(|n| lbl(&format!("checkout:{n}/*")))
        .collect();

        (rs, reg, checkouts)
    }

    #[test]
    fn uses_is_transitive() {
        let (rs, reg, _) = clash_build();
        let used = uses(&rs, &reg, &lbl("package:secret3{x86}/*"));
        assert!(used.contains(&lbl("checkout:secret3/*")));
        assert!(used.contains(&lbl("checkout:secret2/*")));
        assert!(used.contains(&lbl("checkout:gpl2plus/*")));
        assert!(used.contains(&lbl("checkout:gnulibc/*")));
        assert!(!used.contains(&lbl("checkout:apache/*")));
    }

    #[test]
    fn not_built_against_blocks_the_edge() {
        let (rs, mut reg, _) = clash_build();
        reg.set_not_built_against(
            &lbl("package:secret2{x86}/*"),
            &lbl("checkout:gpl2plus/*"),
        );
        let used = uses(&rs, &reg, &lbl("package:secret2{x86}/*"));
        assert!(!used.contains(&lbl("checkout:gpl2plus/*")));
        // secret3 has no exception of its own, so it still sees gpl2plus.
        let used = uses(&rs, &reg, &lbl("package:secret3{x86}/*"));
        assert!(used.contains(&lbl("checkout:gpl2plus/*")));
    }

    #[test]
    fn implicit_gpl_derivation_and_clashes() {
        let (rs, reg, checkouts) = clash_build();
        let analysis = analyze(&rs, &reg, &checkouts);

        // ukogl picks up LGPL by propagation; the lgpl checkout itself
        // does not become "implicit".
        assert!(analysis.implicit.contains_key(&lbl("checkout:ukogl/*")));
        assert!(!analysis.implicit.contains_key(&lbl("checkout:lgpl/*")));

        // lgpl-with-exception does not propagate.
        assert!(!analysis.implicit.contains_key(&lbl("checkout:secret1/*")));

        // The unlicensed checkout over gpl2+gpl3 lists both reasons.
        let record = &analysis.implicit[&lbl("checkout:not_licensed1/*")];
        assert_eq!(record.was, None);
        assert_eq!(
            record.reasons,
            vec![
                (lbl("package:not_licensed1{x86}/*"), lbl("checkout:gpl2/*")),
                (lbl("package:not_licensed1{x86}/*"), lbl("checkout:gpl3/*")),
            ]
        );

        // Secret checkouts built against GPL code clash.
        assert!(analysis.clashes.contains_key(&lbl("checkout:secret2/*")));
        assert!(analysis.clashes.contains_key(&lbl("checkout:secret3/*")));
        // An open checkout can be implicitly GPL without clashing.
        assert!(!analysis.clashes.contains_key(&lbl("checkout:ukogl/*")));
    }

    #[test]
    fn exception_removes_derivation_and_clash() {
        let (rs, mut reg, checkouts) = clash_build();
        reg.set_not_built_against(
            &lbl("package:secret2{x86}/*"),
            &lbl("checkout:gpl2plus/*"),
        );
        reg.set_not_built_against(
            &lbl("package:secret3{x86}/*"),
            &lbl("checkout:gpl2plus/*"),
        );
        let analysis = analyze(&rs, &reg, &checkouts);
        assert!(!analysis.implicit.contains_key(&lbl("checkout:secret2/*")));
        assert!(!analysis.implicit.contains_key(&lbl("checkout:secret3/*")));
        assert!(analysis.clashes.is_empty());
    }

    #[test]
    fn adding_a_dependency_is_monotonic() {
        // Adding a dependency never removes an implicit-GPL derivation.
        let (rs, reg, checkouts) = clash_build();
        let before = analyze(&rs, &reg, &checkouts);

        let mut rs2 = rs.clone();
        rs2.add(depend_one(
            None,
            &lbl("package:secret1{x86}/PreConfig"),
            lbl("package:gpl3{x86}/PostInstalled"),
        ));
        let after = analyze(&rs2, &reg, &checkouts);

        for co in before.implicit.keys() {
            assert!(after.implicit.contains_key(co), "{co} lost its derivation");
        }
        // And the new dependency creates a fresh one.
        assert!(after.implicit.contains_key(&lbl("checkout:secret1/*")));
    }

    #[test]
    fn report_layout() {
        let mut rs = RuleSet::new();
        let mut reg = LicenseRegistry::new();
        add_package(&mut rs, "hello", &[]);
        add_package(&mut rs, "gpllib", &[]);
        rs.add(depend_one(
            None,
            &lbl("package:hello{x86}/PreConfig"),
            lbl("package:gpllib{x86}/PostInstalled"),
        ));
        reg.set_license(&lbl("checkout:gpllib/*"), License::gpl("GPL v2"));
        reg.set_license(&lbl("checkout:hello/*"), License::Secret("Shh".into()));

        let checkouts = vec![lbl("checkout:hello/*"), lbl("checkout:gpllib/*")];
        let report = render_report(&analyze(&rs, &reg, &checkouts));
        assert_eq!(
            report,
            "\
Checkout licenses are:

* checkout:gpllib/* LicenseGPL('GPL v2')
* checkout:hello/*  LicenseSecret('Shh')

The following checkouts do not have a license:


The following checkouts have some sort of GPL license:

* checkout:gpllib/* LicenseGPL('GPL v2')

Exceptions to \"implicit\" GPL licensing are:


The following are \"implicitly\" GPL licensed for the given reasons:

* checkout:hello/*  (was LicenseSecret('Shh'))
  - package:hello{x86}/* depends on checkout:gpllib/*

This means that the following have irreconcilable clashes:

* checkout:hello/*  LicenseSecret('Shh')
"
        );
    }
}
