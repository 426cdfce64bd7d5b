//! Report Generator
//!
//! One opaque call to the text-generation capability per prompt. No retry,
//! no timeout and no inspection of the returned text. `spawn` runs the call
//! as a tokio task so an interactive caller can abort it.

use crate::error::{ReportError, Result};
use crate::llm::TextGenerator;
use crate::prompt::Prompt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Model output, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub text: String,
}

#[derive(Clone)]
pub struct ReportGenerator {
    generator: Arc<dyn TextGenerator>,
}

impl ReportGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn generate(&self, prompt: Prompt) -> Result<Report> {
        info!("Submitting {} byte prompt for generation", prompt.len());
        let text = self.generator.generate(prompt.as_str()).await.map_err(|e| {
            warn!("Report generation failed: {}", e);
            match e {
                ReportError::Generation { .. } => e,
                other => ReportError::generation_with("Text generation failed", other),
            }
        })?;
        info!("Received {} byte report", text.len());
        Ok(Report { text })
    }

    /// Start generation in the background. Dropping the returned handle
    /// does not stop the call; use `PendingReport::abort`.
    pub fn spawn(&self, prompt: Prompt) -> PendingReport {
        let generator = self.clone();
        PendingReport {
            handle: tokio::spawn(async move { generator.generate(prompt).await }),
        }
    }
}

pub struct PendingReport {
    handle: JoinHandle<Result<Report>>,
}

impl PendingReport {
    /// Cancel the in-flight call. `wait` then yields `Cancelled`.
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(self) -> Result<Report> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(ReportError::Cancelled),
            Err(e) => Err(ReportError::generation_with("Generation task panicked", e)),
        }
    }

    /// Wait for the report unless `cancel` completes first, in which case
    /// the call is aborted and `Cancelled` is returned.
    pub async fn wait_or_cancel<F: Future>(self, cancel: F) -> Result<Report> {
        let abort = self.handle.abort_handle();
        tokio::select! {
            result = self.wait() => result,
            _ = cancel => {
                abort.abort();
                warn!("Pending report generation aborted");
                Err(ReportError::Cancelled)
            }
        }
    }
}
