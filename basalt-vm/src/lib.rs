pub mod config;
pub mod disasm;
pub mod error;
pub mod image;
pub mod isa;
pub mod runtime;

pub use config::VmConfig;
pub use error::{ImageError, VmError};
pub use image::Program;
pub use runtime::machine::Machine;
