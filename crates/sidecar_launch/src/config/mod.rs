//! Sidecar configuration parsing and environment templating

mod env_subst;
mod sidecar_file;

pub use env_subst::*;
pub use sidecar_file::*;
