//! Runtime components for process orchestration

pub mod factory;
pub mod launcher;
pub mod process;
pub mod supervisor;

pub use factory::*;
pub use launcher::*;
pub use process::*;
pub use supervisor::*;
