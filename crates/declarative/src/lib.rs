//! # Declarative
//!
//! Desired host state and the engine that converges a host toward it.
//!
//! ## Core Concepts
//!
//! - **Scenario**: the desired state, loaded from YAML ([`Scenario`])
//! - **Resource**: one package, file or service restart that can be converged
//! - **ExecutionPlan**: the scenario's resources grouped into fixed phases
//! - **Executor**: runs the phases over a [`CommandChannel`], check-act-verify
//!   for file copies, and coalesces service restarts until the end
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{ExecutionPlan, Scenario, execute_simple};
//!
//! let scenario = Scenario::load(Path::new("web.yaml"))?;
//! let plan = ExecutionPlan::from_scenario(&scenario, false);
//! let summary = execute_simple(&plan, &mut session)?;
//! println!("{} error(s)", summary.errors());
//! ```
//!
//! ## Provider Traits
//!
//! - [`CommandChannel`]: carries commands to one host's dispatcher
//! - [`ProgressCallback`]: receives progress updates
//!
//! This allows the crate to be used without hard dependencies on a
//! transport or a UI.

pub mod context;
pub mod executor;
pub mod planner;
pub mod resource;
pub mod scenario;
pub mod types;

// Re-export main types at crate root
pub use context::{CommandChannel, NoProgress, ProgressCallback};
pub use executor::{execute, execute_simple};
pub use planner::{ExecutionPlan, RestartQueue};
pub use resource::{BoxedResource, Resource, ServiceRestart};
pub use scenario::{
    FileAction, FileContent, FileSpec, PackageAction, PackageSpec, Scenario, ScenarioError,
};
pub use types::{ApplyResult, ExecuteSummary, Phase};
