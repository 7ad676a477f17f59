pub mod archive;
pub mod audit_log;
pub mod family;
pub mod file_meta;
pub mod identity;
pub mod setting;
pub mod task;
