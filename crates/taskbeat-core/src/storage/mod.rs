pub mod broker;

pub use broker::{JobQueue, ResultStore, database_path, open_database, same_database};
