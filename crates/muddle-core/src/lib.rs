//! The muddle dependency engine.
//!
//! Everything a build can work on is named by a [`Label`]; a [`RuleSet`]
//! records how labels depend on each other and which [`Action`] produces
//! each one; the [`Builder`] drives labels to their tags, consulting the
//! durable [`Database`] so re-invocations do minimal work.

pub mod builder;
pub mod db;
pub mod env;
pub mod error;
pub mod fragment;
pub mod label;
pub mod rules;
pub mod solver;
pub mod workspace;

pub use builder::{Action, BuildContext, Builder};
pub use db::{CheckoutInfo, Database};
pub use env::{EnvBuilder, EnvStore};
pub use error::{MuddleError, Result};
pub use label::{tag, Label, LabelKind, WILDCARD};
pub use rules::{Rule, RuleSet};
pub use solver::{needed_to_build, required_by};
pub use workspace::{classify_dir, find_root, DirType, Layout};
