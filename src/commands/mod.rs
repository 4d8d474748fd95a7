// Plan, apply and destroy
pub mod declarative;

// Read-only views of recorded state
pub mod outputs;
pub mod state;

use std::process::ExitCode;

/// How a command finished when it did not hit a fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The pass ran but some nodes failed
    NodeFailures,
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => Self::SUCCESS,
            Outcome::NodeFailures => Self::from(2),
        }
    }
}
