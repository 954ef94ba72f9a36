//! Labels - the identities of everything the engine can work on.
//!
//! A label names an entity and a position in that entity's lifecycle:
//!
//! ```text
//!     <kind>:<name>{<role>}/<tag>
//!     <kind>:(<domain>)<name>{<role>}/<tag>[<flags>]
//! ```
//!
//! Each part is drawn from `[A-Za-z0-9._+-]` or is the wildcard `*`. The
//! domain, role and flags are optional; `kind:name/tag` and
//! `kind:name{}/tag[]` denote the same label. The `+` is allowed so that
//! names like `g++` work.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MuddleError;

/// The wildcard part, matching any value in the same position.
pub const WILDCARD: &str = "*";

/// The three standard label kinds. Further kinds can be introduced through
/// [`LabelKind::Other`]; the engine itself only dispatches on these three.
#[derive(Clone, Debug)]
pub enum LabelKind {
    Checkout,
    Package,
    Deployment,
    /// The wildcard kind, `*`.
    Wildcard,
    Other(String),
}

impl LabelKind {
    pub fn as_str(&self) -> &str {
        match self {
            LabelKind::Checkout => "checkout",
            LabelKind::Package => "package",
            LabelKind::Deployment => "deployment",
            LabelKind::Wildcard => WILDCARD,
            LabelKind::Other(s) => s,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, LabelKind::Wildcard)
    }
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for LabelKind {
    fn from(s: &str) -> Self {
        match s {
            "checkout" => LabelKind::Checkout,
            "package" => LabelKind::Package,
            "deployment" => LabelKind::Deployment,
            WILDCARD => LabelKind::Wildcard,
            other => LabelKind::Other(other.to_string()),
        }
    }
}

// Kinds compare, order and hash as their string forms, so that
// `Other("checkout")` and `Checkout` cannot disagree and label ordering
// matches the rendered report ordering.
impl PartialEq for LabelKind {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for LabelKind {}

impl Ord for LabelKind {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for LabelKind {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::hash::Hash for LabelKind {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

/// Standard lifecycle tags, by kind.
pub mod tag {
    // Checkout lifecycle.
    pub const CHECKED_OUT: &str = "CheckedOut";
    pub const PULLED: &str = "Pulled";
    pub const MERGED: &str = "Merged";
    pub const CHANGES_COMMITTED: &str = "ChangesCommitted";
    pub const CHANGES_PUSHED: &str = "ChangesPushed";

    // Package lifecycle.
    pub const PRE_CONFIG: &str = "PreConfig";
    pub const CONFIGURED: &str = "Configured";
    pub const BUILT: &str = "Built";
    pub const INSTALLED: &str = "Installed";
    pub const POST_INSTALLED: &str = "PostInstalled";
    pub const CLEAN: &str = "Clean";
    pub const DIST_CLEAN: &str = "DistClean";

    // Deployment lifecycle.
    pub const DEPLOYED: &str = "Deployed";

    // Common to all kinds.
    pub const DISTRIBUTED: &str = "Distributed";
}

static LABEL_PART_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9._+-]+|\*)$").unwrap());

static LABEL_STRING_RE: Lazy<Regex> = Lazy::new(|| {
    // <kind>:[(<domain>)]<name>[{<role>}]/<tag>[[<flags>]]
    Regex::new(
        r"(?x)
        ^(?P<kind>[A-Za-z0-9._+-]+|\*) :
        (?: \( (?P<domain>[A-Za-z0-9._+-]+|\*) \) )?
        (?P<name>[A-Za-z0-9._+-]+|\*)
        (?: \{ (?P<role>[A-Za-z0-9._+-]+|\*)? \} )?
        / (?P<tag>[A-Za-z0-9._+-]+|\*)
        (?: \[ (?P<flags>[A-Za-z0-9]*) \] )?$",
    )
    .unwrap()
});

/// A label. Equality, ordering and hashing ignore the `transient` and
/// `system` flags; see [`Label::as_key`].
#[derive(Clone, Debug)]
pub struct Label {
    kind: LabelKind,
    domain: Option<String>,
    name: String,
    role: Option<String>,
    tag: String,
    /// Changes to this label's tag are not recorded in the tag database.
    pub transient: bool,
    /// Synthesized by the engine itself; hidden from default reports.
    pub system: bool,
}

impl Label {
    /// Make a new label, validating every part.
    pub fn new(
        kind: LabelKind,
        domain: Option<&str>,
        name: &str,
        role: Option<&str>,
        tag: &str,
    ) -> Result<Self, MuddleError> {
        check_part("name", name)?;
        check_part("tag", tag)?;
        if let Some(d) = domain {
            check_part("domain", d)?;
        }
        if let Some(r) = role {
            check_part("role", r)?;
        }
        if let LabelKind::Other(k) = &kind {
            check_part("kind", k)?;
        }
        Ok(Label {
            kind,
            domain: domain.map(str::to_string),
            name: name.to_string(),
            role: role.map(str::to_string),
            tag: tag.to_string(),
            transient: false,
            system: false,
        })
    }

    /// A `checkout:` label. Checkouts never carry a role.
    pub fn checkout(domain: Option<&str>, name: &str, tag: &str) -> Result<Self, MuddleError> {
        Label::new(LabelKind::Checkout, domain, name, None, tag)
    }

    /// A `package:` label.
    pub fn package(
        domain: Option<&str>,
        name: &str,
        role: Option<&str>,
        tag: &str,
    ) -> Result<Self, MuddleError> {
        Label::new(LabelKind::Package, domain, name, role, tag)
    }

    /// A `deployment:` label. Deployments never carry a role.
    pub fn deployment(domain: Option<&str>, name: &str, tag: &str) -> Result<Self, MuddleError> {
        Label::new(LabelKind::Deployment, domain, name, None, tag)
    }

    pub fn kind(&self) -> &LabelKind {
        &self.kind
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// A copy of this label with a different tag. Flags are preserved.
    pub fn with_tag(&self, new_tag: &str) -> Self {
        let mut copy = self.clone();
        copy.tag = new_tag.to_string();
        copy
    }

    /// A copy of this label with a different domain (used when embedding a
    /// sub-build's labels into the enclosing build).
    pub fn with_domain(&self, domain: Option<&str>) -> Self {
        let mut copy = self.clone();
        copy.domain = domain.map(str::to_string);
        copy
    }

    pub fn with_transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }

    pub fn with_system(mut self, system: bool) -> Self {
        self.system = system;
        self
    }

    /// The flag-free identity of this label: equality, ordering and hashing
    /// all go through this key.
    pub fn as_key(&self) -> (&LabelKind, Option<&str>, &str, Option<&str>, &str) {
        (
            &self.kind,
            self.domain.as_deref(),
            &self.name,
            self.role.as_deref(),
            &self.tag,
        )
    }

    /// True if no part of this label is a wildcard.
    pub fn is_definite(&self) -> bool {
        !self.kind.is_wildcard()
            && self.domain.as_deref() != Some(WILDCARD)
            && self.name != WILDCARD
            && self.role.as_deref() != Some(WILDCARD)
            && self.tag != WILDCARD
    }

    /// Wildcard-aware comparison. Two parts conflict iff they differ and
    /// neither is `*`. Returns `-wildcards` when compatible (so a higher
    /// score means a more specific match), `None` otherwise.
    pub fn matches(&self, other: &Label) -> Option<i32> {
        let mut wildcards = 0;
        let pairs = [
            (Some(self.kind.as_str()), Some(other.kind.as_str())),
            (self.domain.as_deref(), other.domain.as_deref()),
            (Some(self.name.as_str()), Some(other.name.as_str())),
            (self.role.as_deref(), other.role.as_deref()),
            (Some(self.tag.as_str()), Some(other.tag.as_str())),
        ];
        for (a, b) in pairs {
            if a != b {
                if a == Some(WILDCARD) || b == Some(WILDCARD) {
                    wildcards += 1;
                } else {
                    return None;
                }
            }
        }
        Some(-wildcards)
    }

    /// Do the two labels have identical kind, domain, name and role?
    pub fn matches_without_tag(&self, other: &Label) -> bool {
        self.kind == other.kind
            && self.domain == other.domain
            && self.name == other.name
            && self.role == other.role
    }

    /// Parse a label from its string form.
    pub fn parse(s: &str) -> Result<Self, MuddleError> {
        let caps = LABEL_STRING_RE
            .captures(s)
            .ok_or_else(|| MuddleError::BadLabel(format!("'{s}' is not a valid label")))?;

        let mut label = Label {
            kind: LabelKind::from(caps.name("kind").unwrap().as_str()),
            domain: caps.name("domain").map(|m| m.as_str().to_string()),
            name: caps.name("name").unwrap().as_str().to_string(),
            role: caps.name("role").map(|m| m.as_str().to_string()),
            tag: caps.name("tag").unwrap().as_str().to_string(),
            transient: false,
            system: false,
        };
        if let Some(flags) = caps.name("flags") {
            // Unrecognised flag characters are ignored.
            label.transient = flags.as_str().contains('T');
            label.system = flags.as_str().contains('S');
        }
        Ok(label)
    }
}

fn check_part(what: &str, value: &str) -> Result<(), MuddleError> {
    if LABEL_PART_RE.is_match(value) {
        Ok(())
    } else {
        Err(MuddleError::BadLabel(format!(
            "label {what} '{value}' is not allowed"
        )))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.kind)?;
        if let Some(domain) = &self.domain {
            write!(f, "({domain})")?;
        }
        f.write_str(&self.name)?;
        if let Some(role) = &self.role {
            write!(f, "{{{role}}}")?;
        }
        write!(f, "/{}", self.tag)?;
        if self.transient || self.system {
            write!(
                f,
                "[{}{}]",
                if self.transient { "T" } else { "" },
                if self.system { "S" } else { "" }
            )?;
        }
        Ok(())
    }
}

impl FromStr for Label {
    type Err = MuddleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::parse(s)
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.as_key() == other.as_key()
    }
}

impl Eq for Label {}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_key().cmp(&other.as_key())
    }
}

impl std::hash::Hash for Label {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_key().hash(state)
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Label::parse(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let l = Label::parse("package:busybox/Installed").unwrap();
        assert_eq!(l.kind(), &LabelKind::Package);
        assert_eq!(l.name(), "busybox");
        assert_eq!(l.role(), None);
        assert_eq!(l.domain(), None);
        assert_eq!(l.tag(), "Installed");
        assert!(!l.transient);
        assert!(!l.system);
    }

    #[test]
    fn parse_full() {
        let l = Label::parse("package:(arm.hello)busybox{firmware}/Installed[T]").unwrap();
        assert_eq!(l.domain(), Some("arm.hello"));
        assert_eq!(l.role(), Some("firmware"));
        assert!(l.transient);
        assert!(!l.system);
    }

    #[test]
    fn parse_wildcards() {
        let l = Label::parse("*:(*)*{*}/*").unwrap();
        assert!(l.kind().is_wildcard());
        assert_eq!(l.domain(), Some("*"));
        assert_eq!(l.name(), "*");
        assert_eq!(l.role(), Some("*"));
        assert_eq!(l.tag(), "*");
        assert!(!l.is_definite());
    }

    #[test]
    fn parse_rejects_bad_strings() {
        for bad in [
            "package:busybox",     // no tag
            "package:()busybox/*", // empty domain
            "busybox/*",           // no kind
            "package:busy box/*",  // bad character
            "",
        ] {
            assert!(Label::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn empty_role_and_flags_normalise_away() {
        let a = Label::parse("package:busybox{}/Built[]").unwrap();
        let b = Label::parse("package:busybox/Built").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "package:busybox/Built");
    }

    #[test]
    fn print_parse_round_trip() {
        for s in [
            "checkout:hello/CheckedOut",
            "package:busybox{rootfs}/Installed",
            "package:(arm.helloworld)busybox{rootfs}/Installed",
            "deployment:everything/Deployed",
            "*:*/*",
            "foo:bar{baz}/wombat[T]",
            "foo:(ick)bar{baz}/wombat[TS]",
            "package:g++/Built",
        ] {
            assert_eq!(Label::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn match_counts_wildcards() {
        let concrete = Label::parse("package:busybox{rootfs}/Built").unwrap();
        let exact = Label::parse("package:busybox{rootfs}/Built").unwrap();
        let any_role = Label::parse("package:busybox{*}/Built").unwrap();
        let anything = Label::parse("*:*{*}/*").unwrap();
        let other = Label::parse("package:dropbear{rootfs}/Built").unwrap();

        assert_eq!(concrete.matches(&exact), Some(0));
        assert_eq!(concrete.matches(&any_role), Some(-1));
        assert_eq!(concrete.matches(&anything), Some(-4));
        assert_eq!(concrete.matches(&other), None);
    }

    #[test]
    fn match_is_symmetric() {
        let a = Label::parse("package:busybox{*}/Built").unwrap();
        let b = Label::parse("package:*{rootfs}/Built").unwrap();
        assert_eq!(a.matches(&b), b.matches(&a));
        assert_eq!(a.matches(&b), Some(-2));
    }

    #[test]
    fn wildcard_matches_absent_domain() {
        let with = Label::parse("package:(*)busybox/Built").unwrap();
        let without = Label::parse("package:busybox/Built").unwrap();
        assert_eq!(with.matches(&without), Some(-1));
    }

    #[test]
    fn absent_role_conflicts_with_concrete_role() {
        let bare = Label::parse("package:busybox/Built").unwrap();
        let with_role = Label::parse("package:busybox{rootfs}/Built").unwrap();
        assert_eq!(bare.matches(&with_role), None);
        assert!(!bare.matches_without_tag(&with_role));
    }

    #[test]
    fn equality_ignores_flags() {
        let plain = Label::parse("package:busybox/Built").unwrap();
        let flagged = Label::parse("package:busybox/Built[TS]").unwrap();
        assert_eq!(plain, flagged);
        assert_eq!(plain.as_key(), flagged.as_key());
        assert_eq!(plain.cmp(&flagged), Ordering::Equal);
    }

    #[test]
    fn ordering_puts_absent_parts_first() {
        let no_domain = Label::parse("checkout:aaa/CheckedOut").unwrap();
        let domain = Label::parse("checkout:(aa)aaa/CheckedOut").unwrap();
        assert!(no_domain < domain);

        let no_role = Label::parse("package:aaa/Built").unwrap();
        let role = Label::parse("package:aaa{a}/Built").unwrap();
        assert!(no_role < role);
    }

    #[test]
    fn with_tag_preserves_everything_else() {
        let l = Label::parse("package:(dom)busybox{rootfs}/PreConfig[T]").unwrap();
        let re = l.with_tag(tag::BUILT);
        assert_eq!(re.to_string(), "package:(dom)busybox{rootfs}/Built[T]");
        assert!(re.transient);
    }
}
