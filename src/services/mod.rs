pub mod backend;
pub mod geocoding;
pub mod store;
