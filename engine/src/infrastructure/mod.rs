//! Infrastructure Layer
//!
//! Driven adapters implementing the ports defined in the domain layer.
//!
//! - `TokioProcessExecutor`: spawns programs with tokio and signals them with nix
//! - `YamlProgramStore`: desired program list in `programs.yml`
//! - `InMemoryProgramStore`: store for tests and embedding
//! - `logging`: tracing subscriber setup for the daemon

pub mod environment_file;
pub mod in_memory_store;
pub mod logging;
pub mod tokio_executor;
pub mod yaml_store;

pub use environment_file::parse_environment_file;
pub use in_memory_store::InMemoryProgramStore;
pub use tokio_executor::TokioProcessExecutor;
pub use yaml_store::YamlProgramStore;
