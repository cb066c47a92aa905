mod memory_store;
mod pg_job_store;
mod pg_tree_store;

pub use memory_store::MemoryMetadataStore;
pub use pg_job_store::PgJobStore;
pub use pg_tree_store::PgTreeStore;
