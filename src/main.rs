//! bioflow CLI entry point

use anyhow::{Context, Result};
use bioflow::core::{validate_with_catalog, Graph, RunEvent};
use bioflow::remote::{self, format_size, OutputChunk, RemoteChannel, UploadItem};
use bioflow::{Engine, EngineConfig, ExecutionReport, MemoryChannel, RemoteCredential, SshChannel};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bioflow", version)]
#[command(about = "Validate, order and run bioinformatics workflow graphs on a remote host")]
struct Cli {
    /// Config file (default: ./bioflow.yml, then ~/.bioflow/config.yml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Tool catalog file, overriding the config
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow graph (JSON or YAML snapshot)
    Validate { graph: PathBuf },

    /// Print the execution order of a workflow graph
    Order { graph: PathBuf },

    /// Run a workflow graph
    Run {
        graph: PathBuf,

        /// Print commands against an in-memory host instead of connecting
        #[arg(long)]
        dry_run: bool,

        /// Save the run report under the configured reports directory
        #[arg(long)]
        save: bool,
    },

    /// List a remote directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Print a remote text file
    Cat { path: String },

    /// Delete remote files
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Upload local files into a remote directory
    Put {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(long)]
        to: String,
    },

    /// Download remote files into a local directory
    Get {
        #[arg(required = true)]
        paths: Vec<String>,

        #[arg(long, default_value = ".")]
        to: PathBuf,
    },

    /// Check that the remote host is reachable
    Check,

    /// List saved run reports
    Reports,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::auto_load()?,
    };
    if let Some(catalog) = cli.catalog {
        config.catalog = Some(catalog);
    }

    match cli.command {
        Commands::Validate { graph } => {
            let graph = Graph::from_file(&graph)
                .with_context(|| format!("Failed to load graph {}", graph.display()))?;
            let catalog = config.load_catalog()?;
            let report = validate_with_catalog(&graph, &catalog);
            print!("{}", report);
            if !report.valid {
                anyhow::bail!("{} validation error(s)", report.errors.len());
            }
            println!();
        }

        Commands::Order { graph } => {
            let snapshot = Graph::from_file(&graph)?.snapshot();
            let engine = engine(&config, Arc::new(MemoryChannel::new()))?;
            for id in engine.order(&snapshot)? {
                println!("{}", id);
            }
        }

        Commands::Run {
            graph,
            dry_run,
            save,
        } => {
            let snapshot = Graph::from_file(&graph)
                .with_context(|| format!("Failed to load graph {}", graph.display()))?
                .snapshot();

            let dry = MemoryChannel::new();
            let channel: Arc<dyn RemoteChannel> = if dry_run {
                Arc::new(dry.clone())
            } else {
                ssh_channel(&config)?
            };

            let report = run(&config, channel, snapshot).await?;
            if dry_run {
                for command in dry.executed_commands() {
                    println!("$ {}", command);
                }
            }
            if save {
                let path = report.save_to(&config.reports_dir)?;
                log::info!("Saved run report to {}", path.display());
            }
            if !report.is_success() {
                anyhow::bail!("run {} did not succeed ({:?})", report.run_id(), report.state());
            }
        }

        Commands::Ls { path } => {
            let channel = ssh_channel(&config)?;
            for entry in remote::list_directory(channel.as_ref(), &path).await? {
                let modified = entry
                    .modified
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{} {:>10} {:16} {}",
                    entry.permissions_string(),
                    format_size(entry.size),
                    modified,
                    entry.display_name()
                );
            }
        }

        Commands::Cat { path } => {
            let channel = ssh_channel(&config)?;
            print!(
                "{}",
                remote::read_text_file(channel.as_ref(), &path, config.encoding()?).await?
            );
        }

        Commands::Rm { paths } => {
            let channel = ssh_channel(&config)?;
            let report = remote::delete_files(channel.as_ref(), &paths, None).await?;
            print_batch("Deleted", &report)?;
        }

        Commands::Put { files, to } => {
            let channel = ssh_channel(&config)?;
            let mut items = Vec::with_capacity(files.len());
            for file in &files {
                let name = file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("Not a file name: {}", file.display()))?;
                items.push(UploadItem {
                    remote_path: remote::join_path(&to, name),
                    bytes: std::fs::read(file)
                        .with_context(|| format!("Failed to read {}", file.display()))?,
                });
            }
            let report = remote::upload_files(channel.as_ref(), items, None).await?;
            print_batch("Uploaded", &report)?;
        }

        Commands::Get { paths, to } => {
            let channel = ssh_channel(&config)?;
            let (report, files) = remote::download_files(channel.as_ref(), &paths, None).await?;
            std::fs::create_dir_all(&to)?;
            for file in files {
                std::fs::write(to.join(remote::file_name(&file.path)), &file.bytes)?;
            }
            print_batch("Downloaded", &report)?;
        }

        Commands::Check => {
            let channel = ssh_channel(&config)?;
            remote::check_connection(channel.as_ref()).await?;
            println!("ok");
        }

        Commands::Reports => {
            for id in ExecutionReport::list_all(&config.reports_dir)? {
                println!("{}", id);
            }
        }
    }

    Ok(())
}

fn engine(config: &EngineConfig, channel: Arc<dyn RemoteChannel>) -> Result<Engine> {
    let catalog = config.load_catalog()?;
    log::debug!("Loaded {} tools from catalog", catalog.len());
    Ok(Engine::new(channel, Arc::new(catalog), config))
}

fn ssh_channel(config: &EngineConfig) -> Result<Arc<dyn RemoteChannel>> {
    let credential = RemoteCredential::from_env()?;
    Ok(Arc::new(SshChannel::new(credential, config.ssh_settings()?)))
}

/// Run with live output, returning the report (partial on connection loss)
async fn run(
    config: &EngineConfig,
    channel: Arc<dyn RemoteChannel>,
    snapshot: bioflow::GraphSnapshot,
) -> Result<ExecutionReport> {
    let engine = engine(config, channel)?;
    let (executor, mut events) = engine.executor();

    let cancel = executor.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling run");
            cancel.cancel();
        }
    });

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                RunEvent::NodeStarted { node_id, kind } => {
                    eprintln!("==> {} ({})", node_id, kind);
                }
                RunEvent::Output { chunk, .. } => match chunk {
                    OutputChunk::Stdout(text) => print!("{}", text),
                    OutputChunk::Stderr(text) => eprint!("{}", text),
                },
                RunEvent::NodeFinished { entry } => {
                    eprintln!("<== {} {:?}: {}", entry.node_id, entry.outcome, entry.detail);
                }
                RunEvent::RunFinished { state } => {
                    eprintln!("run finished: {:?}", state);
                }
            }
        }
    });

    let result = executor.run(Graph::from_snapshot(snapshot)).await;
    drop(executor);
    let _ = printer.await;

    match result {
        Ok(report) => Ok(report),
        Err(bioflow::RunError::Connection { source, partial }) => {
            let _ = partial.save_to(&config.reports_dir);
            Err(anyhow::Error::new(source).context(format!(
                "connection lost after {} node(s); partial report saved as {}",
                partial.entries().len(),
                partial.run_id()
            )))
        }
        Err(e) => Err(e.into()),
    }
}

fn print_batch(verb: &str, report: &remote::BatchReport) -> Result<()> {
    for path in &report.completed {
        println!("{} {}", verb, path);
    }
    for failure in &report.failures {
        eprintln!("failed: {}: {}", failure.path, failure.message);
    }
    if !report.is_clean() {
        anyhow::bail!("{} of {} file(s) failed", report.failures.len(), report.total);
    }
    Ok(())
}
