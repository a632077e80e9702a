use ccf_estimator::config::{ConfigWorkbook, ParameterDescription};
use ccf_estimator::engine::EstimationEngine;
use ccf_estimator::extraction::{extract_batches, ExtractionSettings, LlmExtractionClient};
use ccf_estimator::ingest::{load_predictors, load_reported};
use ccf_estimator::output::{write_predictors, write_report, write_reported, OutputFormat};
use ccf_estimator::preprocess::{batch_pages, reporting_year_from_heading, DEFAULT_TOKEN_LIMIT};
use ccf_estimator::records::Scope;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ccf-estimator")]
#[command(about = "Corporate carbon footprint estimation from climate disclosures")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate and reconcile reported emissions
    Estimate {
        /// Reported records CSV (Year, Scope, Parameter, Activity, Unit, Value)
        #[arg(long)]
        reported: PathBuf,

        /// Predictor CSV (Year, Parameter, Value, Unit)
        #[arg(long)]
        predictors: PathBuf,

        /// Configuration directory (default: ./config)
        #[arg(short, long, default_value = "config")]
        config: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Company name used in explanations
        #[arg(long)]
        company: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,
    },
    /// Extract reported values, or predictor metrics with --annual, from
    /// plain-text reports (pages split by form feeds)
    Extract {
        /// Report text files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Configuration directory (default: ./config)
        #[arg(short, long, default_value = "config")]
        config: PathBuf,

        /// Reporting year, when the documents do not state it
        #[arg(long)]
        year: Option<i32>,

        /// Only extract parameters of this scope (e.g. "Scope 1")
        #[arg(long, conflicts_with = "annual")]
        scope: Option<String>,

        /// Treat the files as annual reports and extract the predictor catalog
        #[arg(long)]
        annual: bool,

        /// Output CSV of reported (or, with --annual, predictor) records
        #[arg(short, long, default_value = "reported.csv")]
        output: PathBuf,

        #[arg(long, env = "OPEN_API_KEY", hide_env_values = true)]
        api_key: String,

        #[arg(long, env = "API_VERSION")]
        api_version: String,

        #[arg(long, env = "AZURE_ENDPOINT")]
        endpoint: String,

        #[arg(long, env = "DEPLOYMENT")]
        deployment: String,

        #[arg(long, default_value_t = DEFAULT_TOKEN_LIMIT)]
        token_limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Estimate {
            reported,
            predictors,
            config,
            output,
            company,
            format,
        } => run_estimate(reported, predictors, config, output, company, format),
        Commands::Extract {
            files,
            config,
            year,
            scope,
            annual,
            output,
            api_key,
            api_version,
            endpoint,
            deployment,
            token_limit,
        } => {
            let mut settings = ExtractionSettings::new(api_key, api_version, endpoint, deployment);
            settings.token_limit = token_limit;
            let target = if annual {
                ExtractTarget::Predictors
            } else {
                ExtractTarget::Reported { scope }
            };
            run_extract(files, config, year, target, output, settings).await
        }
    }
}

fn run_estimate(
    reported: PathBuf,
    predictors: PathBuf,
    config: PathBuf,
    output: PathBuf,
    company: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    info!("Loading configuration from {:?}", config);
    let mut workbook = ConfigWorkbook::load(&config).context("Failed to load configuration")?;
    if let Some(company) = company {
        workbook.settings.company = company;
    }

    let records = load_reported(&reported).context("Failed to load reported records")?;
    let predictor_records = load_predictors(&predictors).context("Failed to load predictors")?;

    let report = EstimationEngine::new()
        .run(&records, &predictor_records, &workbook)
        .context("Estimation failed")?;

    let written = write_report(&report, &output, format).context("Failed to write results")?;
    for path in &written {
        println!("{}", path.display());
    }
    Ok(())
}

enum ExtractTarget {
    /// Climate disclosures against the parameter catalog
    Reported { scope: Option<String> },
    /// Annual reports against the predictor catalog
    Predictors,
}

async fn run_extract(
    files: Vec<PathBuf>,
    config: PathBuf,
    year: Option<i32>,
    target: ExtractTarget,
    output: PathBuf,
    settings: ExtractionSettings,
) -> Result<()> {
    let workbook = ConfigWorkbook::load(&config).context("Failed to load configuration")?;
    let catalog: Vec<ParameterDescription> = match &target {
        ExtractTarget::Reported { scope: Some(raw) } => {
            let wanted: Scope = raw.parse()?;
            workbook
                .parameters
                .iter()
                .filter(|p| p.scope.parse::<Scope>().map(|s| s == wanted).unwrap_or(false))
                .cloned()
                .collect()
        }
        _ => workbook.parameters.clone(),
    };
    let context = match target {
        ExtractTarget::Reported { .. } => catalog
            .iter()
            .map(|p| format!("{} | {} | {}", p.scope, p.parameter, p.description))
            .collect::<Vec<_>>()
            .join("\n"),
        ExtractTarget::Predictors => workbook
            .predictors
            .iter()
            .map(|p| format!("{} | {} | {}", p.parameter, p.description, p.unit.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join("\n"),
    };

    let token_limit = settings.token_limit;
    let client = LlmExtractionClient::new(settings);
    let mut reported = Vec::new();
    let mut predictors = Vec::new();

    for file in &files {
        let text = std::fs::read_to_string(file).with_context(|| format!("Failed to read {:?}", file))?;
        let pages: Vec<&str> = text.split('\x0c').collect();
        let batches = batch_pages(&pages, token_limit);
        info!("{:?}: {} pages in {} batches", file, pages.len(), batches.len());

        let mut extracted = extract_batches(&client, &batches, &context, None)
            .await
            .with_context(|| format!("Extraction failed for {:?}", file))?;
        // --year wins, then the model's answer, then the document's <h1>
        if year.is_some() {
            extracted.reporting_year = year;
        } else if extracted.reporting_year.is_none() {
            extracted.reporting_year = reporting_year_from_heading(&text);
        }
        if extracted.parameter_list.is_empty() {
            warn!("No data extracted from {:?}", file);
            continue;
        }
        match target {
            ExtractTarget::Reported { .. } => reported.extend(extracted.into_records(&catalog)?),
            ExtractTarget::Predictors => {
                predictors.extend(extracted.into_predictor_records(&workbook.predictors)?)
            }
        }
    }

    let count = match target {
        ExtractTarget::Reported { .. } => {
            write_reported(&reported, &output).context("Failed to write extracted records")?;
            reported.len()
        }
        ExtractTarget::Predictors => {
            write_predictors(&predictors, &output).context("Failed to write extracted predictors")?;
            predictors.len()
        }
    };
    println!("{} records written to {}", count, output.display());
    Ok(())
}
