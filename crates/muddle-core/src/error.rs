use std::path::PathBuf;

use thiserror::Error;

use crate::label::Label;

/// Everything that can go wrong inside the engine.
///
/// `GiveUp` is the "stop now, tell the user" escape hatch available to
/// actions; `Bug` marks violated internal invariants and is never caught.
#[derive(Debug, Error)]
pub enum MuddleError {
    #[error("label {0}")]
    BadLabel(String),

    #[error("label {label}, from argument '{fragment}', is not a target")]
    NoSuchLabel { fragment: String, label: String },

    #[error("unable to determine a label from the current directory")]
    AmbiguousContext,

    #[error("no rule found for target {0}")]
    NoRuleFor(Label),

    #[error(
        "dependency graph is circular or incomplete\n  building {target}\n  targets {pending}\n  so far {partial}"
    )]
    CircularOrIncomplete {
        target: Label,
        /// Targets the solver could not make progress on.
        pending: String,
        /// The partial order established before progress stopped.
        partial: String,
    },

    #[error("failure building {label}: {cause}")]
    ActionFailed {
        label: Label,
        #[source]
        cause: Box<MuddleError>,
    },

    #[error("{label}: operation not supported: {reason}")]
    Unsupported { label: Label, reason: String },

    #[error("build description error: {0}")]
    Configuration(String),

    #[error("{0}")]
    GiveUp(String),

    #[error("INTERNAL ERROR: {0}")]
    Bug(String),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MuddleError {
    /// Wrap an I/O error with the path it concerned.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MuddleError::Io {
            path: path.into(),
            source,
        }
    }

    /// Attribute a failure to the label whose action raised it.
    pub fn for_label(self, label: &Label) -> Self {
        match self {
            e @ (MuddleError::ActionFailed { .. } | MuddleError::Bug(_)) => e,
            cause => MuddleError::ActionFailed {
                label: label.clone(),
                cause: Box::new(cause),
            },
        }
    }

    /// True for errors that should only ever be reported, never collected
    /// and retried (see the `--stop` handling in the command layer).
    pub fn is_unsupported(&self) -> bool {
        matches!(self, MuddleError::Unsupported { .. })
    }
}

pub type Result<T, E = MuddleError> = std::result::Result<T, E>;
