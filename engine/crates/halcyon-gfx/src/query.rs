pub mod query_pool;
