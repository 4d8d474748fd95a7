//! Terminal front end for the reconciliation engine
//!
//! The `declarative` crate plans and executes; this module shows the plan,
//! asks before changing anything and reports what happened.

pub mod differ;
pub mod executor;

pub use differ::display_plan;
pub use executor::{DialoguerConfirm, print_json, print_report};
