use crate::tools;
use amem_core::contracts::{
    AdminRequest, FetchRequest, IdSelector, SearchRequest, SyncRequest, TimelineRequest,
};
use amem_core::{MemoryConfig, NewObservation, ObservationId, ObservationType};
use amem_storage::MemoryStore;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::io::Read;

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum MemoryCommand {
    /// Record an observation
    #[command(alias = "add")]
    Create(CreateArgs),
    /// Full-text search
    Search(SearchArgs),
    /// Load observations by id
    Fetch(FetchArgs),
    /// Observations around an id
    Timeline(TimelineArgs),
    /// Newest observations of one type or linked to one task
    List(ListArgs),
    /// Tag an observation with a concept
    Concept(ConceptArgs),
    /// Print a file from the memory directory
    Read(ReadArgs),
    /// Maintenance: status, archive, checkpoint, vacuum, migrate
    Admin(AdminArgs),
    /// Task store sync: sync_to_memory, sync_from_memory, link, status
    Sync(SyncArgs),
    /// Run a tool with a JSON request from the argument or stdin
    Call(CallArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[arg(long = "type")]
    pub kind: ObservationType,
    pub narrative: String,
    #[arg(long = "fact")]
    pub facts: Vec<String>,
    #[arg(long)]
    pub confidence: Option<f64>,
    #[arg(long, value_delimiter = ',')]
    pub files_read: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    pub files_modified: Vec<String>,
    #[arg(long = "concept")]
    pub concepts: Vec<String>,
    #[arg(long)]
    pub bead_id: Option<String>,
    #[arg(long)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    pub query: String,
    #[arg(long = "type")]
    pub kind: Option<ObservationType>,
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Comma separated ids
    pub ids: String,
}

#[derive(Args, Debug)]
pub struct TimelineArgs {
    pub id: ObservationId,
    #[arg(long)]
    pub before: Option<usize>,
    #[arg(long)]
    pub after: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long = "type", conflicts_with = "bead_id")]
    pub kind: Option<ObservationType>,
    #[arg(long)]
    pub bead_id: Option<String>,
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct ConceptArgs {
    pub id: ObservationId,
    pub concept: String,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    pub path: String,
}

#[derive(Args, Debug)]
pub struct AdminArgs {
    pub operation: String,
    #[arg(long)]
    pub older_than_days: Option<u32>,
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    pub operation: String,
    #[arg(long)]
    pub bead_id: Option<String>,
    #[arg(long)]
    pub observation_id: Option<ObservationId>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    pub tool: String,
    /// Request JSON; read from stdin when omitted
    pub request: Option<String>,
}

pub fn handle_memory_command(command: MemoryCommand, config: &MemoryConfig) -> Result<()> {
    match command {
        MemoryCommand::Create(args) => create(config, args),
        MemoryCommand::Search(args) => search(config, args),
        MemoryCommand::Fetch(args) => fetch(config, args),
        MemoryCommand::Timeline(args) => timeline(config, args),
        MemoryCommand::List(args) => list(config, &args),
        MemoryCommand::Concept(args) => link_concept(config, &args),
        MemoryCommand::Read(args) => read_memory_file(config, &args),
        MemoryCommand::Admin(args) => admin(config, args),
        MemoryCommand::Sync(args) => sync(config, args),
        MemoryCommand::Call(args) => call(config, args),
    }
}

fn create(config: &MemoryConfig, args: CreateArgs) -> Result<()> {
    let mut observation = NewObservation::new(args.kind, args.narrative)
        .with_facts(args.facts)
        .with_files(args.files_read, args.files_modified)
        .with_concepts(args.concepts);
    observation.confidence = args.confidence;
    observation.bead_id = args.bead_id;
    observation.expires_at = args.expires_at;

    let created = tools::create(config, &observation).context("Failed to create observation")?;
    print_json(&created)
}

fn search(config: &MemoryConfig, args: SearchArgs) -> Result<()> {
    let request = SearchRequest {
        query: args.query,
        kind: args.kind,
        limit: args.limit,
    };
    let hits = tools::search(config, &request).context("Search failed")?;
    print_json(&hits)
}

fn fetch(config: &MemoryConfig, args: FetchArgs) -> Result<()> {
    let request = FetchRequest {
        ids: IdSelector::Text(args.ids),
    };
    let observations = tools::fetch(config, &request).context("Fetch failed")?;
    print_json(&observations)
}

fn timeline(config: &MemoryConfig, args: TimelineArgs) -> Result<()> {
    let request = TimelineRequest {
        id: args.id,
        before: args.before,
        after: args.after,
    };
    let window = tools::timeline(config, &request).context("Timeline failed")?;
    print_json(&window)
}

fn list(config: &MemoryConfig, args: &ListArgs) -> Result<()> {
    let store = MemoryStore::open_config(config)?;
    let observations = match (args.kind, args.bead_id.as_deref()) {
        (Some(kind), _) => store.observations_by_type(kind, args.limit)?,
        (None, Some(bead_id)) => {
            let mut linked = store.observations_by_bead(bead_id)?;
            linked.truncate(args.limit);
            linked
        }
        (None, None) => bail!("list needs --type or --bead-id"),
    };
    print_json(&observations)
}

fn link_concept(config: &MemoryConfig, args: &ConceptArgs) -> Result<()> {
    let store = MemoryStore::open_config(config)?;
    let changed = store
        .link_concept(args.id, &args.concept)
        .with_context(|| format!("Failed to link concept to observation {}", args.id))?;
    print_json(&serde_json::json!({ "id": args.id, "changed": changed }))
}

fn read_memory_file(config: &MemoryConfig, args: &ReadArgs) -> Result<()> {
    let store = MemoryStore::open_config(config)?;
    let content = store
        .read_memory_file(&args.path)?
        .ok_or_else(|| anyhow!("{} not found in {}", args.path, config.memory_dir.display()))?;
    print!("{content}");
    Ok(())
}

fn admin(config: &MemoryConfig, args: AdminArgs) -> Result<()> {
    let request = AdminRequest {
        operation: args.operation,
        older_than_days: args.older_than_days,
        dry_run: args.dry_run,
    };
    let report = tools::admin(config, &request);
    print_json(&report)?;
    if !report.success {
        bail!("admin {} failed", report.operation);
    }
    Ok(())
}

fn sync(config: &MemoryConfig, args: SyncArgs) -> Result<()> {
    let request = SyncRequest {
        operation: args.operation,
        bead_id: args.bead_id,
        observation_id: args.observation_id,
    };
    let report = tools::sync(config, &request);
    print_json(&report)?;
    if !report.success {
        bail!("sync {} failed", report.operation);
    }
    Ok(())
}

fn call(config: &MemoryConfig, args: CallArgs) -> Result<()> {
    let raw = match args.request {
        Some(request) => request,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read request from stdin")?;
            buffer
        }
    };
    let payload = if raw.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(&raw).context("Request is not valid JSON")?
    };

    print_json(&tools::call(&args.tool, payload, config))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
