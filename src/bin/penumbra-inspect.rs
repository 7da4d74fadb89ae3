//! Read-only inspector for stored penumbra graphs.
#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use penumbra::storage::value_codec::{decode_value, Cursor, DecodeContext, NodeResolver};
use penumbra::storage::{OverflowStorage, StringInterner, STORAGE_FORMAT_VERSION};
use penumbra::{GraphError, NodeId, NodeRef, Result, Value};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "penumbra-inspect",
    version,
    about = "Inspect a stored penumbra graph without modifying it"
)]
struct Cli {
    #[arg(value_name = "DB")]
    db_path: PathBuf,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for reports"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show storage metadata and run history
    Info,
    /// Count stored nodes per label
    Labels,
    /// List stored property indexes
    Indexes,
    /// Decode one stored node record
    Record {
        #[arg(value_name = "ID")]
        id: NodeId,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct InfoReport {
    path: PathBuf,
    file_size: u64,
    format_version: Option<u32>,
    supported_version: u32,
    records: u64,
    strings: usize,
    indexes: usize,
    runs: Vec<BTreeMap<String, String>>,
}

#[derive(Serialize)]
struct IndexReport {
    name: String,
    values: usize,
    nodes: usize,
}

#[derive(Serialize)]
struct EdgeReport {
    direction: &'static str,
    label: String,
    adjacent: Vec<AdjacentReport>,
}

#[derive(Serialize)]
struct AdjacentReport {
    node: NodeId,
    properties: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct RecordReport {
    id: NodeId,
    label: String,
    size: usize,
    properties: BTreeMap<String, String>,
    edges: Vec<EdgeReport>,
}

/// Turns stored node ids into placeholder handles for display.
struct Placeholder;

impl NodeResolver for Placeholder {
    fn resolve(&self, id: NodeId) -> Result<NodeRef> {
        Ok(NodeRef::evicted(id, Arc::from("?")))
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn print_header(title: &str) {
    let width = 60;
    let padding = (width - title.len() - 2) / 2;
    println!();
    println!("╔{}╗", "═".repeat(width));
    println!(
        "║{}{title}{}║",
        " ".repeat(padding),
        " ".repeat(width - padding - title.len())
    );
    println!("╚{}╝", "═".repeat(width));
    println!();
}

fn print_section(title: &str) {
    println!();
    println!("─── {} {}", title, "─".repeat(55usize.saturating_sub(title.len())));
}

fn print_field(name: &str, value: impl Display) {
    println!("  {:.<30} {}", name, value);
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> std::result::Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(&T),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(value),
    }
    Ok(())
}

fn info(path: &Path, storage: &OverflowStorage) -> Result<InfoReport> {
    Ok(InfoReport {
        path: path.to_path_buf(),
        file_size: std::fs::metadata(path)?.len(),
        format_version: storage.format_version()?,
        supported_version: STORAGE_FORMAT_VERSION,
        records: storage.record_count()?,
        strings: storage.string_count(),
        indexes: storage.index_names()?.len(),
        runs: storage.all_library_versions()?,
    })
}

fn print_info(report: &InfoReport) {
    print_header("STORAGE INFO");

    print_section("General");
    print_field("Storage Path", report.path.display());
    print_field("File Size", format_bytes(report.file_size));
    match report.format_version {
        Some(version) => print_field("Format Version", version),
        None => print_field("Format Version", "missing"),
    }
    print_field("Supported Version", report.supported_version);

    print_section("Contents");
    print_field("Node Records", report.records);
    print_field("Dictionary Strings", report.strings);
    print_field("Property Indexes", report.indexes);

    print_section("Runs");
    if report.runs.is_empty() {
        print_field("Recorded Runs", "None");
    }
    for (run, libraries) in report.runs.iter().enumerate() {
        let versions: Vec<String> = libraries
            .iter()
            .map(|(name, version)| format!("{name} {version}"))
            .collect();
        print_field(&format!("Run {run}"), versions.join(", "));
    }
    println!();
}

fn labels(storage: &OverflowStorage) -> Result<BTreeMap<String, u64>> {
    let mut counts = BTreeMap::new();
    for (_, bytes) in storage.all_records()? {
        let mut cursor = Cursor::new(&bytes);
        cursor.read_i64()?;
        let label = read_string(storage, &mut cursor)?;
        *counts.entry(label.to_string()).or_default() += 1;
    }
    Ok(counts)
}

fn print_labels(counts: &BTreeMap<String, u64>) {
    print_header("NODE LABELS");
    if counts.is_empty() {
        print_field("Nodes", 0);
    }
    for (label, count) in counts {
        print_field(label, count);
    }
    println!();
}

fn indexes(storage: &OverflowStorage) -> Result<Vec<IndexReport>> {
    let mut reports = Vec::new();
    for name in storage.index_names()? {
        let entries = storage.index_entries(&name)?;
        let nodes = entries
            .iter()
            .map(|(_, ids)| ids.len() / std::mem::size_of::<NodeId>())
            .sum();
        reports.push(IndexReport {
            name,
            values: entries.len(),
            nodes,
        });
    }
    Ok(reports)
}

fn print_indexes(reports: &Vec<IndexReport>) {
    print_header("PROPERTY INDEXES");
    if reports.is_empty() {
        print_field("Indexes", "None");
    }
    for report in reports {
        print_field(
            &report.name,
            format!("{} values, {} nodes", report.values, report.nodes),
        );
    }
    println!();
}

fn record(storage: &OverflowStorage, id: NodeId) -> Result<RecordReport> {
    let bytes = storage
        .get_record(id)?
        .ok_or_else(|| GraphError::NotFound(format!("node {id}")))?;
    let interner = StringInterner::new();
    let ctx = DecodeContext {
        interner: &interner,
        resolver: &Placeholder,
    };
    let mut cursor = Cursor::new(&bytes);
    let stored_id = cursor.read_i64()?;
    let label = read_string(storage, &mut cursor)?;
    let properties = read_properties(storage, &mut cursor, &ctx)?;

    let mut edges = Vec::new();
    for direction in ["OUT", "IN"] {
        let kinds = cursor.read_count()?;
        for _ in 0..kinds {
            let label = read_string(storage, &mut cursor)?;
            let count = cursor.read_count()?;
            let mut adjacent = Vec::with_capacity(count.min(cursor.remaining()));
            for _ in 0..count {
                let node = cursor.read_i64()?;
                let properties = read_properties(storage, &mut cursor, &ctx)?;
                adjacent.push(AdjacentReport { node, properties });
            }
            edges.push(EdgeReport {
                direction,
                label: label.to_string(),
                adjacent,
            });
        }
    }
    cursor.ensure_consumed()?;
    Ok(RecordReport {
        id: stored_id,
        label: label.to_string(),
        size: bytes.len(),
        properties,
        edges,
    })
}

fn print_record(report: &RecordReport) {
    print_header("NODE RECORD");
    print_field("Node Id", report.id);
    print_field("Label", &report.label);
    print_field("Record Size", format_bytes(report.size as u64));

    print_section("Properties");
    for (key, value) in &report.properties {
        print_field(key, value);
    }

    print_section("Edges");
    for edge in &report.edges {
        let adjacent: Vec<String> = edge
            .adjacent
            .iter()
            .map(|adjacent| {
                if adjacent.properties.is_empty() {
                    return adjacent.node.to_string();
                }
                let rendered: Vec<String> = adjacent
                    .properties
                    .iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect();
                format!("{} {{{}}}", adjacent.node, rendered.join(", "))
            })
            .collect();
        print_field(&format!("{} {}", edge.direction, edge.label), adjacent.join(", "));
    }
    println!();
}

fn read_string(storage: &OverflowStorage, cursor: &mut Cursor<'_>) -> Result<Arc<str>> {
    let id = cursor.read_i32()?;
    storage
        .resolve_string_id(id)
        .ok_or_else(|| GraphError::Corruption(format!("unknown string id {id}")))
}

fn read_properties(
    storage: &OverflowStorage,
    cursor: &mut Cursor<'_>,
    ctx: &DecodeContext<'_>,
) -> Result<BTreeMap<String, String>> {
    let count = cursor.read_count()?;
    let mut properties = BTreeMap::new();
    for _ in 0..count {
        let key = read_string(storage, cursor)?;
        let value = decode_value(cursor, ctx)?;
        properties.insert(key.to_string(), render(&value));
    }
    Ok(properties)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{s:?}"),
        Value::Node(node) => format!("node {}", node.id()),
        other => format!("{other:?}"),
    }
}

fn run(cli: Cli) -> std::result::Result<(), Box<dyn Error>> {
    let storage = OverflowStorage::inspect(&cli.db_path)?;
    match cli.command {
        Command::Info => {
            let report = info(&cli.db_path, &storage)?;
            emit(cli.format, &report, print_info)?;
        }
        Command::Labels => {
            let report = labels(&storage)?;
            emit(cli.format, &report, print_labels)?;
        }
        Command::Indexes => {
            let report = indexes(&storage)?;
            emit(cli.format, &report, print_indexes)?;
        }
        Command::Record { id } => {
            let report = record(&storage, id)?;
            emit(cli.format, &report, print_record)?;
        }
    }
    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        process::exit(1);
    }
}
