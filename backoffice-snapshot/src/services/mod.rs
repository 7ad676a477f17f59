pub mod exporter;
pub mod manifest;
pub mod packager;
pub mod payload;
pub mod restore;
pub mod retention;
