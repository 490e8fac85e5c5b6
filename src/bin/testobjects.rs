//! testobjects - command line access to Test Object ingestion
//!
//! Uses the configuration at `$HOME/.etf/ingest.json` (or `ETF_INGEST_CONFIG`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use testobjects_lib::config::load_config;
use testobjects_lib::models::{
    CreateReusableTestObjectRequest, UploadFile, PROP_REGEX, RESOURCE_DATA,
    RESOURCE_SERVICE_ENDPOINT,
};
use testobjects_lib::store::{SqliteStore, StoreFilter};
use testobjects_lib::{Export, TestObjectService};

const EXAMPLES_HELP: &str = r##"EXAMPLES:
  testobjects upload ./roads.gml ./rivers.gml --label "Hydro"
  testobjects add https://example.org/data/roads.zip --regex ".*\.gml"
  testobjects add "https://example.org/ows?service=WFS" --endpoint --type ows-service
  testobjects export EID0b6e... ./out.zip
  testobjects sweep
"##;

/// Command line interface for Test Object ingestion
#[derive(Parser)]
#[command(name = "testobjects")]
#[command(author, version)]
#[command(about = "Ingest, inspect and export Test Objects")]
#[command(after_help = EXAMPLES_HELP)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: json, pretty, plain
    #[arg(short, long, default_value = "pretty", global = true)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    /// JSON output (compact)
    Json,
    /// JSON output (pretty-printed)
    #[default]
    Pretty,
    /// Plain text output
    Plain,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload local files or directories as a new Test Object
    Upload {
        /// Files or directories to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[arg(long, default_value = "")]
        label: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Create a temporary object (lives only as long as this process)
        #[arg(long)]
        ad_hoc: bool,

        #[arg(long)]
        user: Option<String>,
    },

    /// Add an object referencing a URL or a directory in the test data root
    Add {
        /// Remote URL or path relative to the test data directory
        uri: String,

        /// Treat the URL as a service endpoint instead of downloadable data
        #[arg(long)]
        endpoint: bool,

        #[arg(long, default_value = "")]
        label: String,

        /// Only files whose name matches this expression are used
        #[arg(long)]
        regex: Option<String>,

        /// Acceptable type ids (repeatable)
        #[arg(long = "type")]
        types: Vec<String>,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        password: Option<String>,
    },

    /// List persisted objects
    List {
        #[arg(long, default_value = "0")]
        offset: usize,

        /// 0 lists everything
        #[arg(long, default_value = "0")]
        limit: usize,
    },

    /// Show one object
    Get { id: String },

    /// Delete one object (its data stays on disk)
    Delete { id: String },

    /// Write the resources of an object to a file
    Export { id: String, output: PathBuf },

    /// Remove expired temporary objects now
    Sweep,

    /// List the directories of the test data root
    Dirs,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(output) => {
            print_output(&output, cli.format);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(command: Commands) -> Result<Value> {
    let config = load_config().map_err(anyhow::Error::msg)?;
    let store = SqliteStore::open(&config.store_path)
        .await
        .with_context(|| format!("Failed to open store at {:?}", config.store_path))?;
    let service = TestObjectService::open(config, Arc::new(store))
        .context("Failed to initialize test object directories")?;

    match command {
        Commands::Upload {
            paths,
            label,
            description,
            ad_hoc,
            user,
        } => {
            let uploads = read_uploads(&paths)?;
            let response = if ad_hoc {
                service.create_ad_hoc(&uploads, user.as_deref()).await?
            } else {
                let request = CreateReusableTestObjectRequest {
                    label,
                    description,
                    ..Default::default()
                };
                service
                    .create_reusable(&request, &uploads, user.as_deref())
                    .await?
            };
            Ok(serde_json::to_value(response)?)
        }
        Commands::Add {
            uri,
            endpoint,
            label,
            regex,
            types,
            username,
            password,
        } => {
            let name = if endpoint {
                RESOURCE_SERVICE_ENDPOINT
            } else {
                RESOURCE_DATA
            };
            let request = CreateReusableTestObjectRequest {
                label,
                resources: BTreeMap::from([(name.to_string(), uri)]),
                username,
                password,
                ..Default::default()
            };
            let mut object = request.to_test_object()?;
            if let Some(regex) = regex {
                object.set_property(PROP_REGEX, regex);
            }

            let acceptable: BTreeSet<String> = types.into_iter().collect();
            let acceptable = (!acceptable.is_empty()).then_some(&acceptable);
            let object = service.init_resources_and_add(object, acceptable).await?;
            Ok(serde_json::to_value(object)?)
        }
        Commands::List { offset, limit } => {
            let objects = service.list(StoreFilter::new(offset, limit)).await?;
            Ok(serde_json::to_value(objects)?)
        }
        Commands::Get { id } => Ok(serde_json::to_value(service.get_by_id(&id).await?)?),
        Commands::Delete { id } => {
            service.delete(&id).await?;
            Ok(json!({ "deleted": id }))
        }
        Commands::Export { id, output } => export(&service, &id, &output).await,
        Commands::Sweep => Ok(json!({ "removed": service.sweep_now().await })),
        Commands::Dirs => Ok(serde_json::to_value(service.list_test_data_dirs()?)?),
    }
}

async fn export(service: &TestObjectService, id: &str, output: &Path) -> Result<Value> {
    let file = File::create(output).with_context(|| format!("Failed to create {:?}", output))?;
    let mut out = BufWriter::new(file);

    let export = service.get_resources(id, &mut out).await;
    drop(out);
    match export {
        Ok(Export::Denied { status, message }) => {
            let _ = fs::remove_file(output);
            anyhow::bail!("{} ({})", message, status)
        }
        Ok(Export::Archive { file_name, .. }) => Ok(json!({
            "output": output,
            "fileName": file_name,
        })),
        Ok(Export::Streamed { bytes }) => Ok(json!({
            "output": output,
            "bytes": bytes,
        })),
        Err(e) => {
            let _ = fs::remove_file(output);
            Err(e.into())
        }
    }
}

/// Read files and directory contents into upload parts.
fn read_uploads(paths: &[PathBuf]) -> Result<Vec<UploadFile>> {
    let mut uploads = Vec::new();
    for path in paths {
        for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to read {:?}", path))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let data = fs::read(entry.path())
                .with_context(|| format!("Failed to read {:?}", entry.path()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            uploads.push(UploadFile::new(name, None, data));
        }
    }
    Ok(uploads)
}

// ============================================================================
// Output Formatting
// ============================================================================

fn print_output(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(value).unwrap_or_default());
        }
        OutputFormat::Pretty => {
            println!(
                "{}",
                serde_json::to_string_pretty(value).unwrap_or_default()
            );
        }
        OutputFormat::Plain => print_plain(value, 0),
    }
}

fn print_plain(value: &Value, indent: usize) {
    let prefix = "  ".repeat(indent);
    match value {
        Value::Null => println!("{prefix}null"),
        Value::Bool(b) => println!("{prefix}{b}"),
        Value::Number(n) => println!("{prefix}{n}"),
        Value::String(s) => println!("{prefix}{s}"),
        Value::Array(items) => {
            for item in items {
                print_plain(item, indent);
            }
        }
        Value::Object(fields) => {
            for (key, val) in fields {
                if val.is_object() || val.is_array() {
                    println!("{prefix}{key}:");
                    print_plain(val, indent + 1);
                } else {
                    print!("{prefix}{key}: ");
                    print_plain(val, 0);
                }
            }
        }
    }
}
