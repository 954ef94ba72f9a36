//! Environment composition for build actions.
//!
//! Nothing here mutates the parent process environment: an [`EnvBuilder`]
//! accumulates variables and path-style prefixes and then yields a fresh
//! child environment for the subprocess about to be spawned.

use std::collections::BTreeMap;

use crate::label::Label;

pub const MUDDLE_LABEL: &str = "MUDDLE_LABEL";
pub const MUDDLE_SRC: &str = "MUDDLE_SRC";
pub const MUDDLE_OBJ: &str = "MUDDLE_OBJ";
pub const MUDDLE_INSTALL: &str = "MUDDLE_INSTALL";
pub const MUDDLE_TARGET_LOCATION: &str = "MUDDLE_TARGET_LOCATION";

/// Per-label environment settings registered by the build description,
/// e.g. `MUDDLE_TARGET_LOCATION` for every package in a role. Patterns
/// are labels (usually wildcarded); a concrete label picks up every
/// matching entry, in registration order.
#[derive(Clone, Debug, Default)]
pub struct EnvStore {
    entries: Vec<(Label, BTreeMap<String, String>)>,
}

impl EnvStore {
    pub fn new() -> Self {
        EnvStore::default()
    }

    pub fn set(&mut self, pattern: &Label, key: &str, value: &str) {
        if let Some((_, map)) = self.entries.iter_mut().find(|(p, _)| p == pattern) {
            map.insert(key.to_string(), value.to_string());
        } else {
            let mut map = BTreeMap::new();
            map.insert(key.to_string(), value.to_string());
            self.entries.push((pattern.clone(), map));
        }
    }

    /// Everything registered for patterns matching `label`.
    pub fn effective(&self, label: &Label) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        for (pattern, map) in &self.entries {
            if pattern.matches(label).is_some() {
                for (k, v) in map {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        merged
    }
}

/// Builds one child environment. Prefixes prepend (most recent first),
/// matching the usual `PATH=new:$PATH` convention.
#[derive(Clone, Debug, Default)]
pub struct EnvBuilder {
    vars: BTreeMap<String, String>,
    prefixes: BTreeMap<String, Vec<String>>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        EnvBuilder::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    pub fn prepend(&mut self, key: &str, dir: impl Into<String>) -> &mut Self {
        self.prefixes.entry(key.to_string()).or_default().push(dir.into());
        self
    }

    pub fn merge(&mut self, vars: &BTreeMap<String, String>) -> &mut Self {
        for (k, v) in vars {
            self.vars.insert(k.clone(), v.clone());
        }
        self
    }

    /// The finished environment: the current process env, overlaid with
    /// the explicit variables, with prefixes prepended to any inherited
    /// value.
    pub fn build(&self) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = std::env::vars().collect();
        for (k, v) in &self.vars {
            env.insert(k.clone(), v.clone());
        }
        for (key, dirs) in &self.prefixes {
            let mut parts: Vec<String> = dirs.iter().rev().cloned().collect();
            if let Some(existing) = env.get(key) {
                if !existing.is_empty() {
                    parts.push(existing.clone());
                }
            }
            env.insert(key.clone(), parts.join(":"));
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lbl(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    #[test]
    fn store_merges_matching_patterns() {
        let mut store = EnvStore::new();
        store.set(&lbl("package:*{arm}/*"), MUDDLE_TARGET_LOCATION, "/rootfs");
        store.set(&lbl("package:kernel{arm}/*"), "KBUILD", "1");

        let kernel = store.effective(&lbl("package:kernel{arm}/Built"));
        assert_eq!(kernel.get(MUDDLE_TARGET_LOCATION).unwrap(), "/rootfs");
        assert_eq!(kernel.get("KBUILD").unwrap(), "1");

        let other = store.effective(&lbl("package:busybox{arm}/Built"));
        assert_eq!(other.get(MUDDLE_TARGET_LOCATION).unwrap(), "/rootfs");
        assert!(!other.contains_key("KBUILD"));

        assert!(store.effective(&lbl("package:kernel{x86}/Built")).is_empty());
    }

    #[test]
    fn later_settings_override_earlier_ones() {
        let mut store = EnvStore::new();
        store.set(&lbl("package:*{arm}/*"), MUDDLE_TARGET_LOCATION, "/a");
        store.set(&lbl("package:kernel{arm}/*"), MUDDLE_TARGET_LOCATION, "/b");
        let env = store.effective(&lbl("package:kernel{arm}/Built"));
        assert_eq!(env.get(MUDDLE_TARGET_LOCATION).unwrap(), "/b");
    }

    #[test]
    fn builder_prepends_prefixes() {
        let mut builder = EnvBuilder::new();
        builder.set("MUDDLE_LABEL", "package:x{r}/Built");
        builder.prepend("MUDDLE_TEST_PATH", "/install/r/bin");
        builder.prepend("MUDDLE_TEST_PATH", "/install/s/bin");

        let env = builder.build();
        assert_eq!(env.get("MUDDLE_LABEL").unwrap(), "package:x{r}/Built");
        // Most recently prepended comes first; no inherited value for this
        // variable, so the prefix list is the whole value.
        assert_eq!(
            env.get("MUDDLE_TEST_PATH").unwrap(),
            "/install/s/bin:/install/r/bin"
        );
    }
}
