//! docflat: flatten nested clinical documents into wide rows
//!
//! Usage:
//!   # Incremental run over an NDJSON document store
//!   docflat run --metadata catalog.json --documents docs.ndjson \
//!       --watermarks state/watermarks.db --output-dir ./tables --config run.json
//!
//!   # Flatten one document to stdout
//!   docflat flatten --metadata catalog.json --source-entity ccda_raw \
//!       --target-entity results --document-type ccd --component Results doc.json
//!
//!   # Show the validated section tree
//!   docflat inspect --metadata catalog.json --source-entity ccda_raw \
//!       --target-entity results --document-type ccd

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use docflat::melt::{
    ArrayPolicy, FlattenOptions, Flattener, JsonlSink, RowAssembler, Sink, StreamSink,
    TransformRegistry,
};
use docflat::pipeline::{
    DocumentIdentifier, DocumentType, FixedIdentifier, NdjsonSource, Pipeline, RuleIdentifier,
    RunConfig, SqliteWatermarkStore,
};
use docflat::schema::{MappingKey, MetadataCatalog, MetadataStore, SchemaTree, SectionId};
use docflat::value::Value;
use std::io::{BufRead, BufReader, BufWriter, Read};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "docflat")]
#[command(about = "Flatten nested clinical documents into wide rows", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info", env = "DOCFLAT_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Flatten every document inserted since the last run and advance the watermark
    Run(RunArgs),
    /// Flatten documents from a file or stdin and print rows as NDJSON
    Flatten(FlattenArgs),
    /// Print the validated section tree and its columns
    Inspect(InspectArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum PolicyArg {
    Normalize,
    Anomaly,
}

impl From<PolicyArg> for ArrayPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Normalize => ArrayPolicy::Normalize,
            PolicyArg::Anomaly => ArrayPolicy::Anomaly,
        }
    }
}

#[derive(Args, Debug)]
struct MappingArgs {
    /// Metadata catalog (JSON)
    #[arg(long, env = "DOCFLAT_METADATA")]
    metadata: PathBuf,

    #[arg(long, env = "DOCFLAT_SOURCE_ENTITY")]
    source_entity: Option<String>,

    #[arg(long, env = "DOCFLAT_TARGET_ENTITY")]
    target_entity: Option<String>,

    #[arg(long, env = "DOCFLAT_DOCUMENT_TYPE")]
    document_type: Option<String>,
}

impl MappingArgs {
    fn key(&self) -> Result<MappingKey> {
        match (&self.source_entity, &self.target_entity, &self.document_type) {
            (Some(source), Some(target), Some(doc_type)) => {
                Ok(MappingKey::new(source.clone(), target.clone(), doc_type.clone()))
            }
            _ => bail!("--source-entity, --target-entity and --document-type are required"),
        }
    }

    fn catalog(&self) -> Result<MetadataCatalog> {
        MetadataCatalog::from_file(&self.metadata)
            .with_context(|| format!("loading metadata from {}", self.metadata.display()))
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    mapping: MappingArgs,

    /// Run description (JSON); replaces the individual mapping flags
    #[arg(long, env = "DOCFLAT_CONFIG")]
    config: Option<PathBuf>,

    /// Top-level component to flatten
    #[arg(long, env = "DOCFLAT_COMPONENT")]
    component: Option<String>,

    /// Defaults to the target entity
    #[arg(long, env = "DOCFLAT_TARGET_TABLE")]
    target_table: Option<String>,

    /// Raw documents as NDJSON `{"id", "inserted_at", "document"}` records
    #[arg(long, env = "DOCFLAT_DOCUMENTS")]
    documents: PathBuf,

    /// SQLite watermark database, created on first run
    #[arg(long, env = "DOCFLAT_WATERMARKS")]
    watermarks: PathBuf,

    /// Directory receiving one .jsonl file per target table
    #[arg(long, short = 'o', env = "DOCFLAT_OUTPUT_DIR")]
    output_dir: PathBuf,

    #[arg(long, value_enum)]
    array_policy: Option<PolicyArg>,

    /// Sections at this level or deeper are not expanded (default: 64)
    #[arg(long)]
    max_depth: Option<usize>,
}

#[derive(Args, Debug)]
struct FlattenArgs {
    #[command(flatten)]
    mapping: MappingArgs,

    #[arg(long, env = "DOCFLAT_COMPONENT")]
    component: String,

    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// One JSON document per line
    #[arg(long)]
    ndjson: bool,

    #[arg(long, value_enum, default_value = "normalize")]
    array_policy: PolicyArg,
}

#[derive(Args, Debug)]
struct InspectArgs {
    #[command(flatten)]
    mapping: MappingArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Command::Run(args) => run(args),
        Command::Flatten(args) => flatten(args),
        Command::Inspect(args) => inspect(args),
    }
}

/// `RUST_LOG` overrides `--log-level`. Logs go to stderr; stdout carries output.
fn init_logging(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_config(args: &RunArgs) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_file(path)?,
        None => {
            let key = args.mapping.key()?;
            let Some(component) = &args.component else {
                bail!("--component is required without --config");
            };
            RunConfig::new(
                key.source_entity,
                key.target_entity,
                key.document_type,
                component.clone(),
            )
        }
    };

    if let Some(table) = &args.target_table {
        config = config.with_target_table(table.clone());
    }
    if let Some(policy) = args.array_policy {
        config = config.with_array_policy(policy.into());
    }
    Ok(config)
}

fn run(args: RunArgs) -> Result<()> {
    let config = run_config(&args)?;
    let catalog = args.mapping.catalog()?;

    let rules = RuleIdentifier::new(catalog.identification_rules()?);
    let identifier: Box<dyn DocumentIdentifier> = if rules.is_empty() {
        info!(
            document_type = %config.document_type,
            "no identification rules, tagging every document"
        );
        Box::new(FixedIdentifier(DocumentType::new(config.document_type.clone())))
    } else {
        Box::new(rules)
    };

    let source = NdjsonSource::new(&args.documents);
    let watermarks = SqliteWatermarkStore::open(&args.watermarks)
        .with_context(|| format!("opening watermarks {}", args.watermarks.display()))?;
    let mut sink = JsonlSink::new(&args.output_dir)
        .with_context(|| format!("creating output directory {}", args.output_dir.display()))?;

    let mut pipeline = Pipeline::new(&catalog, &source, identifier.as_ref(), &watermarks);
    if let Some(depth) = args.max_depth {
        pipeline = pipeline.with_max_depth(depth);
    }

    let report = pipeline
        .run(&config, &mut sink)
        .with_context(|| format!("run for {} failed", config.mapping_key()))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn flatten(args: FlattenArgs) -> Result<()> {
    let key = args.mapping.key()?;
    let catalog = args.mapping.catalog()?;
    let schema = SchemaTree::load(&catalog, &key)?;

    let options = FlattenOptions {
        array_policy: args.array_policy.into(),
        ..FlattenOptions::default()
    };
    let flattener = Flattener::new(&schema, &args.component, options)?;
    let assembler = RowAssembler::new(&schema, &TransformRegistry::new())?;

    let reader: Box<dyn Read> = match &args.input {
        Some(path) => Box::new(
            std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Box::new(std::io::stdin()),
    };
    let documents = read_documents(BufReader::new(reader), args.ndjson)?;

    let mut sink = StreamSink::new(BufWriter::new(std::io::stdout()));
    for (idx, document) in documents.iter().enumerate() {
        let id = idx.to_string();
        let flat = flattener.flatten(&id, document);
        let assembled = assembler.assemble(document, &flat.instances);
        sink.write(&key.target_entity, &assembled.rows)?;

        let mut diagnostics = flat.diagnostics;
        diagnostics.merge(assembled.diagnostics);
        if !diagnostics.is_clean() {
            eprintln!("document {}: {}", id, serde_json::to_string(&diagnostics)?);
        }
    }
    Ok(())
}

fn read_documents<R: BufRead>(mut reader: R, ndjson: bool) -> Result<Vec<Value>> {
    let mut documents = Vec::new();
    if ndjson {
        for (idx, line) in reader.lines().enumerate() {
            let line = line.context("Failed to read line")?;
            if line.trim().is_empty() {
                continue;
            }
            let mut bytes = line.into_bytes();
            let value: Value = simd_json::serde::from_slice(&mut bytes)
                .with_context(|| format!("Failed to parse JSON on line {}", idx + 1))?;
            documents.push(value);
        }
    } else {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let value: Value =
            simd_json::serde::from_slice(&mut bytes).context("Failed to parse JSON")?;
        documents.push(value);
    }
    Ok(documents)
}

fn inspect(args: InspectArgs) -> Result<()> {
    let key = args.mapping.key()?;
    let catalog = args.mapping.catalog()?;
    let schema = SchemaTree::load(&catalog, &key)?;

    println!("{}", schema.key());
    if let Some(container) = schema.component_container() {
        println!("components in: {}", container);
    }
    for &root in schema.roots() {
        print_section(&schema, root, 0);
    }
    for id in schema.columnless_sections() {
        println!("no columns below: {}", schema.section(id).name);
    }
    Ok(())
}

fn print_section(schema: &SchemaTree, id: SectionId, depth: usize) {
    let indent = "  ".repeat(depth);
    let def = schema.section(id);
    let kind = match def.kind {
        docflat::schema::SectionKind::Struct => "struct",
        docflat::schema::SectionKind::Array => "array",
    };
    println!("{}{} [{}] <- {}", indent, def.name, kind, def.path);
    if !def.join_keys.is_empty() {
        println!("{}  join keys: {}", indent, def.join_keys.join(", "));
    }

    for col in schema.columns(id) {
        let mut line = format!(
            "{}  .{} = {:?}:{} ({})",
            indent,
            col.column_name,
            col.path_context,
            col.path,
            col.target_type.as_str()
        );
        if let Some(transform) = &col.transform {
            line.push_str(&format!(" | {}", transform));
        }
        println!("{}", line);
    }
    for &child in schema.children(id) {
        print_section(schema, child, depth + 1);
    }
}
