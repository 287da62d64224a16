pub mod connection;

pub use connection::{establish_connection, get_database_url};
