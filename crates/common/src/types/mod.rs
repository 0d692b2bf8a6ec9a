mod candidate;
mod company;
mod page;
mod similar;
mod task;

pub use candidate::{Candidate, CandidateSet, UrlSource};
pub use company::{normalize_name, CompanyRecord, Leader};
pub use page::{ExtractionMethod, PageContent};
pub use similar::{SimilarCompany, SimilaritySource};
pub use task::{EmbeddingTask, LlmResult, LlmTask, TaskContent, TaskKind};
