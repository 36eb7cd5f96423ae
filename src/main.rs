use std::{fs, net::SocketAddr, path::PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use flowboard::{
    color::derive_color,
    config::{ClientConfig, DEFAULT_NAMESPACE, ENV_NONCE},
    flow::DocumentId,
    label::parse_label,
    logger::{init_tracing, LogConfig},
    schema::write_schema,
    server,
    store::MemoryBackingStore,
    FlowClient,
};
use serde_json::Value;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "flowboard", about = "Flow diagrams stored on a REST backing store", version)]
struct Cli {
    /// Log level or filter directive (e.g. error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Write rolling log files here instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// `.env` file read before the environment
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a stored document
    Fetch { id: DocumentId },

    /// Save a document read from a JSON file and print what was stored
    Save { id: DocumentId, file: PathBuf },

    /// Run an in-memory backing store over HTTP
    Serve(ServeArgs),

    /// Print the colors derived from a base color
    Color {
        hex: String,
        #[arg(long, default_value_t = 1.0)]
        alpha: f64,
    },

    /// Print a label parsed into styled lines
    Label { text: String },

    /// Emit JSON-Schema
    Schema {
        #[arg(long, default_value = "schemas")]
        out: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    #[arg(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Published documents to create; repeat for several
    #[arg(long = "document", default_value = "1")]
    documents: Vec<DocumentId>,

    /// Token granting edit rights; falls back to FLOWBOARD_NONCE
    #[arg(long)]
    editor_token: Option<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&LogConfig::new(cli.log_level.clone(), cli.log_dir.clone()))?;

    let result = run(cli).await;
    if let Err(err) = &result {
        error!("{:#}", err);
    }
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Fetch { id } => {
            let client = FlowClient::new(ClientConfig::from_env(Some(&cli.env_file))?)?;
            let doc = client.fetch_document(id).await?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Commands::Save { id, file } => {
            let raw = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let payload: Value =
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;
            let client = FlowClient::new(ClientConfig::from_env(Some(&cli.env_file))?)?;
            let saved = client.save_document(id, &payload).await?;
            println!("{}", serde_json::to_string_pretty(&saved)?);
        }
        Commands::Serve(args) => {
            if cli.env_file.exists() {
                dotenvy::from_path(&cli.env_file)?;
            }
            let store = MemoryBackingStore::new();
            for id in &args.documents {
                store.create_document(*id, true);
            }
            match args.editor_token.or_else(|| std::env::var(ENV_NONCE).ok()) {
                Some(token) => store.grant_editor(token),
                None => info!("no editor token configured; documents are read-only"),
            }
            server::serve(args.addr, store, &args.namespace).await?;
        }
        Commands::Color { hex, alpha } => {
            let color = derive_color(&hex, alpha)?;
            println!("{}", serde_json::to_string_pretty(&color)?);
        }
        Commands::Label { text } => {
            let lines = parse_label(Some(&text));
            println!("{}", serde_json::to_string_pretty(&lines)?);
        }
        Commands::Schema { out } => {
            let path = write_schema(&out)?;
            println!("Schemas written to {}", path.display());
        }
    }
    Ok(())
}
