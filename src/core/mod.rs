//! Core data structures for Architect.
//!
//! This module contains the foundational types used throughout the runtime:
//! - Target addresses and their string form
//! - Option objects and the merge algorithm
//! - Job-name wire formats
//! - Builder wire types (info, input, output, progress)
//! - The workspace definition

pub mod builder_types;
pub mod job_name;
pub mod options;
pub mod target;
pub mod workspace;

pub use builder_types::{
    BuilderInfo, BuilderInput, BuilderOutput, BuilderProgressReport, BuilderProgressState,
};
pub use options::{merge_options, JsonObject};
pub use target::{target_from_target_string, target_string_from_target, Target, TargetError};
pub use workspace::{find_workspace_file, WorkspaceDefinition, WORKSPACE_FILE_NAME};
