pub mod encryption;
pub mod format;
pub mod persistence;
pub mod record_store;
