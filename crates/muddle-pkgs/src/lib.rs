//! The standard muddle actions and the build-description loader.
//!
//! `muddle-core` knows nothing about version control, make or
//! deployments; this crate supplies the concrete [`Action`]s a build
//! description wires into the rule set, and the loader that reads a
//! description file and produces a ready-to-run [`Builder`].
//!
//! [`Action`]: muddle_core::Action
//! [`Builder`]: muddle_core::Builder

pub mod checkouts;
pub mod collect;
pub mod cpio;
pub mod desc;
pub mod make;

pub use checkouts::VcsCheckoutAction;
pub use collect::CollectDeployment;
pub use cpio::{CpioDeployment, CpioWriter, NewcCpioWriter, VirtualTree};
pub use desc::{init_tree, load_build, DomainInfo, Loaded};
pub use make::MakePackageAction;
