pub mod db_pool;
pub mod descriptions;
pub mod execution;
pub mod introspect;
pub mod schema_manager;
