//! monoflow CI - running module units as local processes
//!
//! Provides a [`monoflow_core::JobBackend`] that:
//! - Spawns each module's unit command in the module's directory
//! - Exports `MONOFLOW_MODULE` and `MONOFLOW_REF` to the child
//! - Maps exit status to a job outcome, killing units that exceed their timeout

pub mod backend;
pub mod runner;

pub use backend::ProcessJobBackend;
pub use runner::{spawn_unit, RunningUnit, UnitResult, MODULE_ENV, REF_ENV};
