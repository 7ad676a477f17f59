pub mod bulk;
pub mod connection;
pub mod migrate;
