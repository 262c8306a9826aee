//! Workspace-wide helpers shared by the mosaic library and its demo programs.

pub mod log_setup;
pub mod test_utils;
