mod etf;
mod job;
mod portfolio;
pub mod response;
mod upload;

pub use etf::{EtfHoldingRecord, EtfMetadata, EtfStats, HoldingsSnapshot};
pub use job::{Job, JobKind, JobProgress, JobStatus, SubmitJob};
pub use portfolio::{CreatePortfolio, FundStatistics, Holding, IsinHolding, Portfolio};
pub use upload::WorkbookUpload;
