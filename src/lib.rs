//! skillgate
//!
//! Validation gate and hot-reloading registry for third-party agent skills.
//!
//! # Features
//!
//! - **Safety Scanner**: tree-sitter parsing of Python, JavaScript and shell code
//! - **Schema Validation**: tool declarations checked against the function-tool format
//! - **Dynamic Probing**: every handler called once with dummy arguments under a timeout
//! - **Partial Admission**: a crashing tool is dropped, its siblings still load
//! - **Atomic Registry**: readers always see a complete snapshot
//! - **Hot Reload**: changed files are re-validated, unchanged ones reused
//! - **JS Skills**: structural checks for browser-side skills
//!
//! # Example
//!
//! ```no_run
//! use skillgate::skills::{FileSkillLoader, SkillRegistry};
//!
//! # async fn run() {
//! let registry = SkillRegistry::new("/path/to/skills").with_loader(FileSkillLoader::default());
//! let snapshot = registry.load().await;
//! for tool in snapshot.tools() {
//!     println!("{}", tool.name);
//! }
//! # }
//! ```

pub mod config;
pub mod error;
pub mod skills;

pub use config::GateConfig;
pub use error::{GateError, Result};
pub use skills::{ReloadSummary, SkillRegistry, SkillStatus, SkillWatcher, ValidationReport};
