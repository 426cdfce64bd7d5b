//! Report pipeline: load → filter → compose → generate.
//!
//! `ReportPipeline` is the composition root. It owns the dataset cache for
//! the life of the process and runs every request straight through; any
//! error stops the request before the next stage, and the external call is
//! only made once a prompt has been composed.

use crate::cache::DatasetCache;
use crate::config::{AppConfig, DataSettings};
use crate::dataset::{FileTableSource, Table, TableKind, TableSource};
use crate::error::{ReportError, Result};
use crate::filter::{FilterEngine, FilterOptions, JoinedView};
use crate::generator::{PendingReport, Report, ReportGenerator};
use crate::llm::{LlmClient, TextGenerator};
use crate::prompt::{customers_preview, purchases_preview, Prompt, PromptComposer, ReportTemplate};
use crate::selection::FilterSelection;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Which workbook and sheets a pipeline reports on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLocation {
    pub source_id: String,
    pub purchases_table: String,
    pub customers_table: String,
}

impl From<&DataSettings> for DatasetLocation {
    fn from(data: &DataSettings) -> Self {
        Self {
            source_id: data.source.clone(),
            purchases_table: data.purchases_table.clone(),
            customers_table: data.customers_table.clone(),
        }
    }
}

/// Everything up to, but not including, the external call.
#[derive(Debug, Clone)]
pub struct PreparedReport {
    pub view: JoinedView,
    pub prompt: Prompt,
}

#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub report: Report,
    pub matched_rows: usize,
}

pub struct ReportPipeline {
    cache: Arc<DatasetCache>,
    generator: ReportGenerator,
    template: ReportTemplate,
    location: DatasetLocation,
    preview_rows: usize,
}

impl ReportPipeline {
    pub fn new(
        cache: Arc<DatasetCache>,
        generator: Arc<dyn TextGenerator>,
        template: ReportTemplate,
        location: DatasetLocation,
        preview_rows: usize,
    ) -> Self {
        Self {
            cache,
            generator: ReportGenerator::new(generator),
            template,
            location,
            preview_rows,
        }
    }

    /// Wire the file-backed store and HTTP client described by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let source: Arc<dyn TableSource> = Arc::new(FileTableSource::new(config.data.root.clone()));
        let llm: Arc<dyn TextGenerator> =
            Arc::new(LlmClient::new(config.api_key().to_string(), config.llm.clone()));
        let template = match &config.template_path {
            Some(path) => ReportTemplate::from_file(path)?,
            None => ReportTemplate::v1()?,
        };
        info!("Using report template {}", template.version());

        Ok(Self::new(
            Arc::new(DatasetCache::new(source)),
            llm,
            template,
            DatasetLocation::from(&config.data),
            config.data.preview_rows,
        ))
    }

    pub fn cache(&self) -> &DatasetCache {
        &self.cache
    }

    async fn tables(&self) -> Result<(Arc<Table>, Arc<Table>)> {
        let purchases = self
            .cache
            .load(&self.location.source_id, &self.location.purchases_table, TableKind::Purchases)
            .await?;
        let customers = self
            .cache
            .load(&self.location.source_id, &self.location.customers_table, TableKind::Customers)
            .await?;
        Ok((purchases, customers))
    }

    /// Distinct departments and regions for the selection widgets.
    pub async fn options(&self) -> Result<FilterOptions> {
        let purchases = self
            .cache
            .load(&self.location.source_id, &self.location.purchases_table, TableKind::Purchases)
            .await?;
        Ok(FilterOptions::from_purchases(purchases.purchases()?))
    }

    /// Load, filter and compose without calling the model.
    pub async fn prepare(&self, selection: &FilterSelection) -> Result<PreparedReport> {
        let (purchases, customers) = self.tables().await?;
        let purchases = purchases.purchases()?;
        let customers = customers.customers()?;

        let engine = FilterEngine;
        let selected = engine.filter_purchases(purchases, selection);
        let view = engine.join(&selected, customers, selection.age_range)?;
        info!(
            "Selection matched {} purchases, {} joined rows",
            selected.len(),
            view.len()
        );

        let purchases_table = purchases_preview(&selected, self.preview_rows)?;
        let customers_table = customers_preview(customers, self.preview_rows)?;
        let prompt = PromptComposer::compose(&self.template, selection, &purchases_table, &customers_table)?;

        Ok(PreparedReport { view, prompt })
    }

    /// Run the full pipeline and wait for the report.
    pub async fn run(&self, selection: &FilterSelection) -> Result<ReportOutcome> {
        let span = info_span!("report", request_id = %Uuid::new_v4());
        async {
            let prepared = self.prepare(selection).await?;
            let matched_rows = prepared.view.len();
            let report = self.generator.generate(prepared.prompt).await?;
            Ok::<_, ReportError>(ReportOutcome { report, matched_rows })
        }
        .instrument(span)
        .await
    }

    /// Like `run`, but hands back an abortable handle for the external call.
    pub async fn start(&self, selection: &FilterSelection) -> Result<(JoinedView, PendingReport)> {
        let span = info_span!("report", request_id = %Uuid::new_v4());
        let prepared = self.prepare(selection).instrument(span).await?;
        Ok((prepared.view, self.generator.spawn(prepared.prompt)))
    }
}
