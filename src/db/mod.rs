pub mod etf_queries;
pub mod job_store;
pub mod portfolio_queries;
pub mod schema;
pub mod upload_queries;

pub use job_store::JobStore;
