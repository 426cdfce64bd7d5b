pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod filter;
pub mod generator;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod selection;

pub use error::{ReportError, Result};
pub use pipeline::{PreparedReport, ReportOutcome, ReportPipeline};
pub use selection::{AgeRange, AnalysisTopic, FilterSelection, Language};
