pub mod connection;
pub mod models;
pub mod service;

pub use connection::{acquire, get_connection, DbPool};
pub use models::*;
