use async_trait::async_trait;
use polars::prelude::*;
use sales_report::cache::DatasetCache;
use sales_report::dataset::FileTableSource;
use sales_report::llm::TextGenerator;
use sales_report::pipeline::DatasetLocation;
use sales_report::prompt::ReportTemplate;
use sales_report::{
    AgeRange, AnalysisTopic, FilterSelection, Language, ReportError, ReportPipeline, Result,
};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SOURCE: &str = "data_base_ecommerce";
const PURCHASES: &str = "base compra";
const CUSTOMERS: &str = "Base cliente";

/// Records every prompt it is asked to complete.
#[derive(Default)]
struct RecordingGenerator {
    prompts: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log poisoned").clone()
    }
}

#[async_trait]
impl TextGenerator for RecordingGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .expect("prompt log poisoned")
            .push(prompt.to_string());
        Ok("## Sales report\nElectronics led sales in SP.".to_string())
    }
}

/// Purchases as CSV and customers as Parquet, both keyed by integer ids.
fn write_workbook(root: &Path) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let workbook = root.join(SOURCE);
    std::fs::create_dir_all(&workbook)?;

    let mut purchases = df!(
        "cliente_Log" => [1i64, 2, 3, 4, 5, 1, 9],
        "Nome_Departamento" => ["Electronics", "Electronics", "Books", "Electronics", "Books", "Electronics", "Electronics"],
        "estado" => ["SP", "RJ", "SP", "SP", "RJ", "SP", "SP"],
        "valor_compra" => [1200.0, 850.0, 45.0, 300.0, 60.0, 99.9, 10.0],
        "valor_frete" => [30.0, 25.0, 5.0, 12.0, 8.0, 0.0, 1.0]
    )?;
    let mut file = std::fs::File::create(workbook.join(format!("{}.csv", PURCHASES)))?;
    CsvWriter::new(&mut file).finish(&mut purchases)?;

    let mut customers = df!(
        "cliente_Log" => [1i64, 2, 3, 4, 5],
        "idade" => [30i64, 45, 22, 70, 17],
        "renda" => [5200.0, 7300.0, 2100.0, 9800.0, 0.0],
        "estado_nascimento" => ["MG", "BA", "PR", "SC", "GO"]
    )?;
    let mut file = std::fs::File::create(workbook.join(format!("{}.parquet", CUSTOMERS)))?;
    ParquetWriter::new(&mut file).finish(&mut customers)?;

    Ok(())
}

fn pipeline(root: &Path, generator: Arc<RecordingGenerator>) -> ReportPipeline {
    let cache = Arc::new(DatasetCache::new(Arc::new(FileTableSource::new(root))));
    ReportPipeline::new(
        cache,
        generator,
        ReportTemplate::v1().unwrap(),
        DatasetLocation {
            source_id: SOURCE.to_string(),
            purchases_table: PURCHASES.to_string(),
            customers_table: CUSTOMERS.to_string(),
        },
        5,
    )
}

fn electronics_in_sp(topics: Vec<AnalysisTopic>) -> FilterSelection {
    FilterSelection::new(
        ["Electronics"],
        ["SP"],
        AgeRange::new(18, 65).unwrap(),
        Language::English,
        topics,
    )
}

#[tokio::test]
async fn test_end_to_end_report() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_workbook(dir.path())?;
    let generator = Arc::new(RecordingGenerator::default());
    let pipeline = pipeline(dir.path(), generator.clone());

    let selection = electronics_in_sp(vec![AnalysisTopic::SalesByDepartment]);
    let outcome = pipeline.run(&selection).await?;

    // Customer 1 twice; customer 4 is too old and customer 9 has no record.
    assert_eq!(outcome.matched_rows, 2);
    assert_eq!(outcome.report.text, "## Sales report\nElectronics led sales in SP.");

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    let prompt = &prompts[0];
    assert!(prompt.contains("SP"));
    assert!(prompt.contains("- Sales performance by department"));
    assert!(prompt.contains("Ensure the report is written in English."));
    assert!(!prompt.contains("Books"));
    assert!(!prompt.contains("{purchases_table}"));

    Ok(())
}

#[tokio::test]
async fn test_prepared_view_matches_selection() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_workbook(dir.path())?;
    let generator = Arc::new(RecordingGenerator::default());
    let pipeline = pipeline(dir.path(), generator.clone());

    let prepared = pipeline.prepare(&electronics_in_sp(AnalysisTopic::defaults())).await?;

    assert!(prepared
        .view
        .rows
        .iter()
        .all(|r| r.region == "SP" && r.department == "Electronics" && (18..=65).contains(&r.age)));
    let amounts: Vec<f64> = prepared.view.rows.iter().map(|r| r.amount).collect();
    assert_eq!(amounts, vec![1200.0, 99.9]);
    assert!(prepared.prompt.as_str().contains("- Revenue analysis by state"));
    assert!(generator.prompts().is_empty(), "prepare must not call the model");

    Ok(())
}

#[tokio::test]
async fn test_tables_are_read_once_across_requests() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_workbook(dir.path())?;
    let pipeline = pipeline(dir.path(), Arc::new(RecordingGenerator::default()));

    pipeline.run(&electronics_in_sp(AnalysisTopic::defaults())).await?;
    let other = FilterSelection::new(
        ["Books"],
        ["RJ", "SP"],
        AgeRange::default(),
        Language::Portuguese,
        vec![AnalysisTopic::CustomerDemographics],
    );
    pipeline.run(&other).await?;
    pipeline.options().await?;

    assert_eq!(pipeline.cache().backing_reads(), 2);
    assert_eq!(pipeline.cache().len(), 2);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_first_load() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_workbook(dir.path())?;
    let generator = Arc::new(RecordingGenerator::default());
    let pipeline = Arc::new(pipeline(dir.path(), generator.clone()));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline
                    .run(&electronics_in_sp(AnalysisTopic::defaults()))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await??;
    }

    assert_eq!(pipeline.cache().backing_reads(), 2);
    assert_eq!(generator.prompts().len(), 6);

    Ok(())
}

#[tokio::test]
async fn test_missing_sheet_halts_before_generation() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_workbook(dir.path())?;
    std::fs::remove_file(dir.path().join(SOURCE).join(format!("{}.parquet", CUSTOMERS)))?;
    let generator = Arc::new(RecordingGenerator::default());
    let pipeline = pipeline(dir.path(), generator.clone());

    let err = pipeline
        .run(&electronics_in_sp(AnalysisTopic::defaults()))
        .await
        .unwrap_err();

    assert!(matches!(err, ReportError::DataLoad(_)), "got {:?}", err);
    assert!(generator.prompts().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_no_topics_blocks_generation() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_workbook(dir.path())?;
    let generator = Arc::new(RecordingGenerator::default());
    let pipeline = pipeline(dir.path(), generator.clone());

    let err = pipeline.run(&electronics_in_sp(vec![])).await.unwrap_err();

    assert!(matches!(err, ReportError::Template(_)));
    assert!(err.is_user_correctable());
    assert!(generator.prompts().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_empty_region_selection_matches_nothing() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_workbook(dir.path())?;
    let pipeline = pipeline(dir.path(), Arc::new(RecordingGenerator::default()));

    let selection = FilterSelection::new(
        ["Electronics", "Books"],
        Vec::<String>::new(),
        AgeRange::default(),
        Language::French,
        AnalysisTopic::defaults(),
    );
    let prepared = pipeline.prepare(&selection).await?;

    assert!(prepared.view.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_options_list_distinct_values() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    write_workbook(dir.path())?;
    let pipeline = pipeline(dir.path(), Arc::new(RecordingGenerator::default()));

    let options = pipeline.options().await?;

    assert_eq!(options.departments, vec!["Electronics", "Books"]);
    assert_eq!(options.regions, vec!["SP", "RJ"]);

    Ok(())
}
