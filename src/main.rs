use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use snowcast::api::{ErrorResponse, ModelStatusResponse, RunModelResponse};
use snowcast::config::ServiceConfig;
use snowcast::service::Service;
use snowcast::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "snowcast")]
#[command(version)]
#[command(about = "Queued lake-effect snow model runs")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the run service and its HTTP API
    Serve(ServeArgs),

    /// Model run commands
    Run {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: RunCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Port to listen on for HTTP
    #[arg(long, default_value = "5000")]
    port: u16,

    /// Number of model workers (maximum concurrent runs)
    #[arg(long, default_value = "1")]
    workers: usize,

    /// Directory model outputs are written to
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Base URL of the data-preparation service
    #[arg(long, default_value = "http://localhost:5001")]
    remote_url: String,

    /// Model program, followed by any fixed arguments
    /// Example: --model-program python3 --model-arg run_model.py
    #[arg(long, default_value = "python3")]
    model_program: String,

    /// Fixed argument passed to the model program (repeatable)
    #[arg(long = "model-arg")]
    model_args: Vec<String>,

    /// Device handed to the model
    #[arg(long, default_value = "cpu")]
    device: String,

    /// File listing run names with known-missing input data
    #[arg(long, default_value = "splits/missing.txt")]
    missing_list: PathBuf,

    /// UTC hour the data directory is emptied each day
    #[arg(long, default_value = "6")]
    cleanup_hour: u32,

    /// Disable the daily data directory cleanup
    #[arg(long)]
    no_cleanup: bool,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:5000")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum RunCommands {
    /// Queue a model run
    Submit {
        /// Lake name (erie, michigan, ontario, superior)
        lake: String,
        /// Run time, "YYYY-MM-DD HH:00" UTC
        date: String,
    },
    /// Get status of a run
    Status {
        /// The run ID (e.g. run_0)
        run_id: String,
    },
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    lake: &'a str,
    date: &'a str,
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;

    let mut config = ServiceConfig::new(listen_addr, args.data_dir)
        .with_workers(args.workers)
        .with_remote_url(args.remote_url)
        .with_missing_list(args.missing_list);
    config.model.program = args.model_program;
    if !args.model_args.is_empty() {
        config.model.args = args.model_args;
    }
    config.model.device = args.device;
    config.retention.janitor_hour_utc = if args.no_cleanup {
        None
    } else {
        Some(args.cleanup_hour)
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        workers = config.max_concurrent_runs,
        remote_url = %config.remote.base_url,
        model = %config.model.program,
        "Starting snowcast"
    );

    let service = Service::from_config(config);
    install_shutdown_handler(service.shutdown_token());
    service.run(listen_addr).await
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_run_submit(
    http: &reqwest::Client,
    args: &ClientArgs,
    lake: &str,
    date: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = http
        .post(format!("{}/run_model", args.addr.trim_end_matches('/')))
        .json(&SubmitBody { lake, date })
        .send()
        .await?;

    if !response.status().is_success() {
        let err: ErrorResponse = response.json().await?;
        eprintln!("Error: Run submission failed: {}", err.error);
        std::process::exit(1);
    }

    let resp: RunModelResponse = response.json().await?;
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&resp)?),
        OutputFormat::Table => {
            println!("Run queued.");
            println!("Run ID:         {}", resp.run_id);
            println!("Queue Position: {}", resp.queue_position);
            println!("Active Runs:    {}/{}", resp.active_runs, resp.max_runs);
        }
    }
    Ok(())
}

async fn handle_run_status(
    http: &reqwest::Client,
    args: &ClientArgs,
    run_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = http
        .get(format!(
            "{}/model_status/{}",
            args.addr.trim_end_matches('/'),
            run_id
        ))
        .send()
        .await?;

    if !response.status().is_success() {
        let err: ErrorResponse = response.json().await?;
        eprintln!("Error: {}", err.error);
        std::process::exit(1);
    }

    let resp: ModelStatusResponse = response.json().await?;
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&resp)?),
        OutputFormat::Table => {
            println!("Run ID:          {}", resp.run_id);
            println!("Status:          {}", resp.status);
            if let Some(position) = resp.queue_position {
                println!("Queue Position:  {}", position);
            }
            if let (Some(active), Some(max)) = (resp.active_runs, resp.max_runs) {
                println!("Active Runs:     {}/{}", active, max);
            }
            if let Some(result) = resp.result {
                if let Some(folder) = result.folder_name {
                    println!("Output Folder:   {}", folder);
                }
                if let Some(path) = result.data_path {
                    println!("Data Path:       {}", path);
                }
                if let Some(error) = result.error {
                    println!("Error:");
                    for line in error.lines() {
                        println!("  {}", line);
                    }
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => {
            run_server(serve_args).await?;
        }
        Commands::Run { client, command } => {
            let http = reqwest::Client::new();
            match command {
                RunCommands::Submit { lake, date } => {
                    handle_run_submit(&http, &client, &lake, &date).await?;
                }
                RunCommands::Status { run_id } => {
                    handle_run_status(&http, &client, &run_id).await?;
                }
            }
        }
    }

    Ok(())
}
