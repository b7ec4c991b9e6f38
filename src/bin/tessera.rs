//! Binary entry point for the Tessera administrative CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tessera::repository::{Repository, RepositoryConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "tessera",
    version,
    about = "Inspect databases the way a Tessera repository sees them",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "TESSERA_CONFIG",
        help = "Repository configuration (TOML)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Show the dialect, savepoint support and tables")]
    Inspect {
        #[arg(value_name = "DB")]
        db_path: Option<PathBuf>,
    },

    #[command(about = "List the columns of a table")]
    Columns {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
        #[arg(value_name = "TABLE")]
        table: String,
    },

    #[command(about = "Count the rows of a table")]
    Count {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
        #[arg(value_name = "TABLE")]
        table: String,
    },

    #[command(about = "Print the effective configuration")]
    Config,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct InspectReport {
    repository: String,
    product: String,
    dialect: String,
    slice_support: String,
    savepoints: bool,
    tables: Vec<TableEntry>,
}

#[derive(Serialize)]
struct TableEntry {
    name: String,
    kind: String,
}

#[derive(Serialize)]
struct ColumnEntry {
    name: String,
    sql_type: String,
    type_name: String,
    size: Option<u32>,
    nullable: bool,
    auto_increment: bool,
}

#[derive(Serialize)]
struct CountReport {
    table: String,
    rows: u64,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = RepositoryConfig::discover(cli.config.as_deref())?;

    match cli.command {
        Command::Inspect { db_path } => {
            let repo = open(&config, db_path)?;
            let report = InspectReport {
                repository: repo.name().to_owned(),
                product: repo.product_name().to_owned(),
                dialect: repo.dialect().name.to_owned(),
                slice_support: format!("{:?}", repo.dialect().slice),
                savepoints: repo.supports_savepoints(),
                tables: repo
                    .tables()?
                    .into_iter()
                    .map(|t| TableEntry {
                        name: t.qualified_name(),
                        kind: t.kind,
                    })
                    .collect(),
            };
            emit(cli.format, &report, || print_inspect_text(&report))?;
        }
        Command::Columns { db_path, table } => {
            let repo = open(&config, Some(db_path))?;
            let (_, columns) = repo
                .describe(&table)?
                .ok_or_else(|| format!("no table named '{table}'"))?;
            let columns: Vec<ColumnEntry> = columns
                .into_iter()
                .map(|c| ColumnEntry {
                    name: c.name,
                    sql_type: format!("{:?}", c.sql_type),
                    type_name: c.type_name,
                    size: c.size,
                    nullable: c.nullable,
                    auto_increment: c.auto_increment,
                })
                .collect();
            emit(cli.format, &columns, || print_columns_text(&columns))?;
        }
        Command::Count { db_path, table } => {
            let repo = open(&config, Some(db_path))?;
            let (info, _) = repo
                .describe(&table)?
                .ok_or_else(|| format!("no table named '{table}'"))?;
            let report = CountReport {
                rows: repo.count_rows(&info)?,
                table: info.qualified_name(),
            };
            emit(cli.format, &report, || {
                println!("{} rows in {}", report.rows, report.table)
            })?;
        }
        Command::Config => match cli.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
            OutputFormat::Text => print!("{}", config.to_toml_string()?),
        },
    }
    Ok(())
}

fn open(config: &RepositoryConfig, db_path: Option<PathBuf>) -> Result<Repository, Box<dyn Error>> {
    let mut config = config.clone();
    if let Some(path) = db_path {
        config.database = Some(path);
    }
    match &config.database {
        Some(path) if !path.exists() => {
            return Err(format!("database {} does not exist", path.display()).into())
        }
        Some(_) => {}
        None => return Err("no database given; pass DB or set `database` in the config".into()),
    }
    Ok(Repository::open(config)?)
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_inspect_text(report: &InspectReport) {
    println!("Repository: {}", report.repository);
    println!(
        "Product: {} (dialect={} slice={} savepoints={})",
        report.product, report.dialect, report.slice_support, report.savepoints
    );
    println!("Tables:");
    if report.tables.is_empty() {
        println!("  (none)");
    }
    for table in &report.tables {
        println!("  {} [{}]", table.name, table.kind);
    }
}

fn print_columns_text(columns: &[ColumnEntry]) {
    for column in columns {
        let mut flags = Vec::new();
        if !column.nullable {
            flags.push("not null");
        }
        if column.auto_increment {
            flags.push("auto increment");
        }
        println!("  {} {} {}", column.name, column.type_name, flags.join(", "));
    }
}
