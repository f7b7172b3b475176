//! Consumer-side action runtime: discovers hooks on disk and runs them for
//! incoming events.

pub mod executor;
pub mod hooks;

pub use executor::{ExecutionLimits, HookExecutor};
pub use hooks::HookRegistry;
