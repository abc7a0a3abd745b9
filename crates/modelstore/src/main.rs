//! Model Store harvester
//!
//! - `harvest`: one incremental harvest of a project/region
//! - `serve`: HTTP trigger for schedulers
//! - `schema`: show the declared reporting table schema

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use modelstore::{build_harvester, AppConfig, AppState, LiveBackend, SinkKind};
use modelstore_harvest::HarvestOptions;
use modelstore_logging::{init_logging, LogConfig};
use modelstore_protocol::defaults::{DEFAULT_CONFIG_PATH, DEFAULT_HTTP_ADDR};
use modelstore_protocol::{Cursor, Scope};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "modelstore", version, about = "Harvest completed pipeline runs into a reporting table")]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "MODELSTORE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured sink (bigquery or duckdb)
    #[arg(long, global = true, env = "MODELSTORE_SINK")]
    sink: Option<SinkKind>,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Also log to a rotated file under $MODELSTORE_HOME/logs
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Harvest runs of one project/region updated since the last harvest
    Harvest {
        #[arg(long, env = "MODELSTORE_PROJECT")]
        project: String,

        #[arg(long, env = "MODELSTORE_REGION")]
        region: String,

        /// Build records and the snapshot, but do not append to the sink
        #[arg(long)]
        no_output: bool,

        /// Harvest runs updated after this UTC time instead of the stored cursor
        /// (e.g. 2023-05-02T01:02:03)
        #[arg(long)]
        last_update: Option<Cursor>,
    },

    /// Run the HTTP trigger
    Serve {
        #[arg(long, env = "MODELSTORE_ADDR", default_value = DEFAULT_HTTP_ADDR)]
        addr: SocketAddr,
    },

    /// Print the reporting table schema
    Schema {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "modelstore",
        verbose: cli.verbose,
        file_logging: cli.log_file,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let explicit_config = std::env::var_os("MODELSTORE_CONFIG").is_some()
        || cli.config != PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut config = AppConfig::load(&cli.config, explicit_config)?;
    if let Some(kind) = cli.sink {
        config.sink.kind = kind;
    }

    match cli.command {
        Commands::Harvest {
            project,
            region,
            no_output,
            last_update,
        } => cmd_harvest(&config, Scope::new(project, region), no_output, last_update),
        Commands::Serve { addr } => cmd_serve(config, addr),
        Commands::Schema { json } => cmd_schema(&config, json),
    }
}

fn cmd_harvest(
    config: &AppConfig,
    scope: Scope,
    no_output: bool,
    last_update: Option<Cursor>,
) -> Result<()> {
    let mut harvester = build_harvester(config)?;
    let options = HarvestOptions {
        output_to_sink: !no_output,
        last_update_override: last_update,
    };
    let report = harvester
        .harvest(&scope, &options)
        .with_context(|| format!("Harvest of {} failed", scope))?;

    println!("scope:        {}", report.scope);
    println!(
        "cursor:       {}",
        report
            .cursor
            .map(|c| c.to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!("harvested:    {}", report.harvested);
    println!("rows written: {}", report.rows_written);
    if let Some(path) = &report.snapshot {
        println!("snapshot:     {}", path.display());
    }
    Ok(())
}

fn cmd_serve(config: AppConfig, addr: SocketAddr) -> Result<()> {
    info!(
        "Starting HTTP trigger ({} sink, table {})",
        config.sink.kind.as_str(),
        config.output
    );
    let state = AppState::new(Arc::new(LiveBackend::new(config)?));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("modelstore-http")
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(modelstore::serve(addr, state))
}

fn cmd_schema(config: &AppConfig, json: bool) -> Result<()> {
    let schema = config.schema_source().load()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Column", "Type", "Mode", "Description"]);
    for column in schema.columns() {
        table.add_row(vec![
            column.name.clone(),
            column.column_type.to_string(),
            column.mode.to_string(),
            column.description.clone().unwrap_or_default(),
        ]);
    }
    println!("{}", table);
    println!("{} columns, table {}", schema.len(), config.output);
    Ok(())
}
