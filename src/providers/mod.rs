//! Providers shipped with the CLI

pub mod exec;
pub mod simulated;

pub use exec::ExecProvider;
pub use simulated::SimulatedProvider;
