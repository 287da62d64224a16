pub mod db;
pub mod fixtures;

pub use db::TestDb;
