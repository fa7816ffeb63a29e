pub mod flags;
pub mod format;
pub mod host;
pub mod machine;
pub mod memory;
