use anyhow::Result;
use clap::Parser;
use sales_report::config::{AppConfig, DEFAULT_CONFIG_PATH};
use sales_report::{AgeRange, AnalysisTopic, FilterSelection, Language, ReportPipeline};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sales-report")]
#[command(about = "Generate natural-language sales reports from the e-commerce workbook")]
struct Args {
    /// Department to include (repeat for several; none selects nothing)
    #[arg(short, long = "department")]
    departments: Vec<String>,

    /// Brazilian state code to include (repeat for several; none selects nothing)
    #[arg(short, long = "region")]
    regions: Vec<String>,

    /// Youngest customer age to include
    #[arg(long, default_value_t = AgeRange::SLIDER_MIN)]
    age_min: i64,

    /// Oldest customer age to include
    #[arg(long, default_value_t = AgeRange::SLIDER_MAX)]
    age_max: i64,

    /// Report language: English, Portuguese, Spanish, French or German
    #[arg(short, long, default_value = "English")]
    language: String,

    /// Analysis topic (repeat for several; defaults to the first two in the catalog)
    #[arg(short, long = "analysis")]
    analyses: Vec<String>,

    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the data directory from the configuration
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// List selectable departments, regions, languages and topics, then exit
    #[arg(long)]
    list_options: bool,

    /// Print the composed prompt instead of calling the model
    #[arg(long)]
    print_prompt: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)?;
    if let Some(root) = args.data_root.clone() {
        config.data.root = root;
    }
    let pipeline = ReportPipeline::from_config(&config)?;

    if args.list_options {
        let options = pipeline.options().await?;
        println!("Departments: {}", options.departments.join(", "));
        println!("Regions:     {}", options.regions.join(", "));
        println!("Languages:   {}", Language::ALL.map(|l| l.name()).join(", "));
        println!("Analyses:");
        for topic in AnalysisTopic::CATALOG {
            println!("  - {}", topic);
        }
        return Ok(());
    }

    let topics = if args.analyses.is_empty() {
        AnalysisTopic::defaults()
    } else {
        args.analyses
            .iter()
            .map(|a| a.parse::<AnalysisTopic>())
            .collect::<std::result::Result<Vec<_>, _>>()?
    };
    let selection = FilterSelection::new(
        args.departments,
        args.regions,
        AgeRange::new(args.age_min, args.age_max)?,
        args.language.parse::<Language>()?,
        topics,
    );

    if args.print_prompt {
        let prepared = pipeline.prepare(&selection).await?;
        info!("{} joined rows match the selection", prepared.view.len());
        println!("{}", prepared.prompt);
        return Ok(());
    }

    info!("Generating report...");
    let (view, pending) = pipeline.start(&selection).await?;
    info!("{} joined rows match the selection", view.len());

    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let report = pending.wait_or_cancel(interrupted).await?;

    println!("\n=== Generated Sales Report ===\n");
    println!("{}", report.text);

    Ok(())
}
