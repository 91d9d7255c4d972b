use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{ArgGroup, Parser};
use indicatif::{ProgressBar, ProgressStyle};

use parts_chatbot::config::Settings;
use parts_chatbot::indexer::sheet::Spreadsheet;
use parts_chatbot::indexer::source::load_sheet_url;
use parts_chatbot::indexer::{ingest, validate, IngestOptions, STABLE_ID_NAMESPACE};
use parts_chatbot::logger;
use parts_chatbot::proxy::http_client;
use parts_chatbot::rag::DocumentStore;
use parts_chatbot::retry::RetryPolicy;

#[derive(Parser, Debug)]
#[command(name = "catalog-indexer")]
#[command(about = "Embed a product catalog sheet into the vector store")]
#[command(group(ArgGroup::new("input").required(true).args(["url", "file"])))]
struct Args {
    /// Published Google Sheets URL (must carry a gid)
    #[arg(long)]
    url: Option<String>,

    /// Local .csv or .xlsx file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Column embedded as document contents
    #[arg(long)]
    content_column: Option<String>,

    /// Column copied into metadata; repeat for several
    #[arg(long = "metadata-column")]
    metadata_columns: Vec<String>,

    /// Embedding requests in flight at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Derive ids from contents so re-indexing overwrites instead of duplicating
    #[arg(long)]
    stable_ids: bool,

    /// Drop and recreate the table before indexing
    #[arg(long)]
    recreate: bool,
}

impl Args {
    fn ingest_options(&self, settings: &Settings) -> IngestOptions {
        let mut options = IngestOptions::from(&settings.ingest);
        if let Some(column) = &self.content_column {
            options.content_column = column.clone();
        }
        if !self.metadata_columns.is_empty() {
            options.metadata_columns = self.metadata_columns.clone();
        }
        if let Some(concurrency) = self.concurrency {
            options.concurrency = concurrency.max(1);
        }
        if self.stable_ids {
            options.id_namespace = Some(STABLE_ID_NAMESPACE);
        }
        options
    }
}

fn read_file(path: &Path) -> Result<Spreadsheet> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => Ok(Spreadsheet::from_csv_reader(std::fs::File::open(path)?)?),
        "xlsx" => Ok(Spreadsheet::from_xlsx_path(path)?),
        other => anyhow::bail!("Unsupported file type '{}': expected .csv or .xlsx", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let settings = Settings::load()?;
    logger::init(&settings.logging)?;

    let client = http_client(&settings.openai)?;
    let retry = RetryPolicy::from(&settings.retry);

    let sheet = match (&args.url, &args.file) {
        (Some(url), _) => {
            println!("Downloading sheet {}...", url);
            load_sheet_url(url, &client, &retry).await?
        }
        (None, Some(path)) => {
            if !path.exists() {
                anyhow::bail!("File does not exist: {}", path.display());
            }
            println!("Reading {}...", path.display());
            read_file(path)?
        }
        (None, None) => unreachable!("clap requires one input"),
    };
    println!("Found {} rows", sheet.len());

    if sheet.is_empty() {
        println!("No rows found. Exiting.");
        return Ok(());
    }

    let options = args.ingest_options(&settings);
    validate(&sheet, &options)?;

    println!("Connecting to {:?} store...", settings.store.backend);
    let store = DocumentStore::from_settings(&settings, client).await?;

    if args.recreate && store.schema_exists().await? {
        println!("Dropping table {}...", settings.database.table);
        store.drop_schema().await?;
    }
    store.ensure_schema().await?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(format!("Embedding '{}'", options.content_column));

    let report = ingest(&store, &sheet, &options).await;
    pb.finish_and_clear();
    let report = report?;

    println!("\nIndexing complete!");
    println!("  Rows:            {}", report.rows_total);
    println!("  Ingested:        {}", report.ingested());
    println!("  Empty content:   {}", report.rows_empty);
    println!("  Embed failures:  {}", report.rows_failed);
    println!("  Skipped total:   {}", report.skipped());
    println!("  Table:           {}", settings.database.table);

    if report.nothing_to_do() {
        println!("\nNo valid data to upsert.");
    }

    Ok(())
}
