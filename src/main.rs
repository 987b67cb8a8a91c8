// herringbone/src/main.rs

mod cli;

use clap::Parser;
use cli::{Cli, Commands, CorrelateArgs, IncidentCommands, IngestArgs};
use herringbone::error::{HerringboneError, Result};
use herringbone::logging::init_logging;
use herringbone::pipeline::{
    load_cards_from_directory, load_rules_from_directory, now_timestamp, Event, Incident,
    IncidentOrchestrator, PipelineConfig, PipelineRunner, PipelineStorage, Priority,
    SledPipelineStorage, SourceDescriptor, StorageConfig,
};
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to 'info'",
                cli.log_level
            );
            LevelFilter::Info
        }
    };

    if let Err(e) = init_logging(log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let outcome = match &cli.command {
        Commands::Version => {
            println!("Herringbone v{}", env!("CARGO_PKG_VERSION"));
            println!("Security event pipeline: parse, detect, correlate, triage");
            Ok(())
        }
        Commands::Init => cmd_init(),
        Commands::Ingest(args) => cmd_ingest(args).await,
        Commands::Correlate(args) => cmd_correlate(args).await,
        Commands::Incidents { command } => cmd_incidents(command).await,
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

const DEFAULT_CARD: &str = r#"# Default parse card: firewall authentication logs
name: firewall-auth
selector:
  type: raw
  value: "login"
mode: regex
rules:
  - field: source_ip
    pattern: "from (([0-9]{1,3}\\.){3}[0-9]{1,3})"
  - field: username
    pattern: "by (\\w+)"
"#;

const DEFAULT_RULE: &str = r#"# Default detection rule
id: rule-failed-login
name: Suspicious Login Attempt
severity: 75
description: Detected a failed login from an IP address
rule:
  key: raw
  regex: "Failed login from ([0-9]{1,3}\\.){3}[0-9]{1,3}"
"#;

fn cmd_init() -> Result<()> {
    println!("Initializing pipeline environment...");

    for dir in ["cards", "rules", "data"] {
        std::fs::create_dir_all(dir)?;
        println!("  created {} directory", dir);
    }

    for (path, content) in [
        ("cards/firewall-auth.yaml", DEFAULT_CARD),
        ("rules/failed-login.yaml", DEFAULT_RULE),
    ] {
        if Path::new(path).exists() {
            println!("  {} already exists, leaving it alone", path);
        } else {
            std::fs::write(path, content)?;
            println!("  created {}", path);
        }
    }

    println!("Done. Ingest events with: herringbone ingest --file <path>");
    Ok(())
}

async fn cmd_ingest(args: &IngestArgs) -> Result<()> {
    let cards = load_cards_from_directory(&args.cards)?;
    let rules = load_rules_from_directory(&args.rules)?;

    let raw_lines: Vec<String> = if let Some(file) = &args.file {
        std::fs::read_to_string(file)?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(String::from)
            .collect()
    } else if let Some(message) = &args.message {
        vec![message.clone()]
    } else {
        return Err(HerringboneError::InputError(
            "nothing to ingest: pass --file or --message".to_string(),
        ));
    };

    let storage: Arc<dyn PipelineStorage> = Arc::new(open_storage(&args.data)?);
    let runner = PipelineRunner::new(PipelineConfig::default(), cards, rules, storage);

    let mut matched = 0usize;
    let mut failed = 0usize;
    for raw in &raw_lines {
        let now = now_timestamp();
        let event = Event::new(
            raw.clone(),
            SourceDescriptor {
                kind: args.source_kind.clone(),
                address: args.source_address.clone(),
            },
            now,
        );
        let event = runner.ingest(event, now).await?;
        match runner.process_event(&event, now).await {
            Ok(outcome) => {
                if outcome.analysis.detection {
                    matched += outcome.detections.len();
                }
            }
            // one bad event never stops the batch; the failure is recorded
            // on its state record
            Err(e) => {
                log::warn!("event {} failed processing: {}", event.id, e);
                runner.fail_event(&event.id, &e.to_string(), now).await?;
                failed += 1;
            }
        }
    }

    println!(
        "Ingested {} event(s), {} detection(s), {} failure(s)",
        raw_lines.len(),
        matched,
        failed
    );
    if matched > 0 {
        println!("Run `herringbone correlate` to group detections into incidents");
    }
    Ok(())
}

async fn cmd_correlate(args: &CorrelateArgs) -> Result<()> {
    let storage: Arc<dyn PipelineStorage> = Arc::new(open_storage(&args.data)?);

    let config = PipelineConfig {
        correlator: herringbone::pipeline::CorrelatorConfig {
            window_seconds: args.window,
        },
        ..Default::default()
    };
    let runner = PipelineRunner::new(config, Vec::new(), Vec::new(), Arc::clone(&storage));

    // rehydrate open incidents so candidates attach instead of duplicating
    for incident in storage.list_incidents().await {
        runner.orchestrator().import(incident);
    }

    let incidents = runner.run_correlation_pass(now_timestamp()).await?;
    if incidents.is_empty() {
        println!("No detections inside the {}s window", args.window);
    } else {
        println!("Touched {} incident(s):", incidents.len());
        for incident in &incidents {
            print_incident_line(incident);
        }
    }
    Ok(())
}

async fn cmd_incidents(command: &IncidentCommands) -> Result<()> {
    match command {
        IncidentCommands::List { data } => {
            let storage = open_storage(data)?;
            let incidents = storage.list_incidents().await;
            if incidents.is_empty() {
                println!("No incidents stored");
            } else {
                for incident in &incidents {
                    print_incident_line(incident);
                }
                println!("Total: {} incident(s)", incidents.len());
            }
        }
        IncidentCommands::Show { id, data } => {
            let storage = open_storage(data)?;
            match storage.get_incident(id).await {
                Some(incident) => {
                    println!("{}", serde_json::to_string_pretty(&incident)?);
                }
                None => {
                    return Err(HerringboneError::InputError(format!(
                        "unknown incident: {}",
                        id
                    )))
                }
            }
        }
        IncidentCommands::Assign { id, owner, data } => {
            let (storage, orchestrator) = rehydrate(data).await?;
            let incident = orchestrator.assign(id, owner, now_timestamp())?;
            storage.store_incident(&incident).await?;
            println!("Assigned {} to {}", incident.id, owner);
        }
        IncidentCommands::Close { id, data } => {
            let (storage, orchestrator) = rehydrate(data).await?;
            let incident = orchestrator.close(id, now_timestamp())?;
            storage.store_incident(&incident).await?;
            println!("Closed {}", incident.id);
        }
        IncidentCommands::Escalate { id, priority, data } => {
            let priority = parse_priority(priority)?;
            let (storage, orchestrator) = rehydrate(data).await?;
            let incident = orchestrator.escalate(id, priority, now_timestamp())?;
            storage.store_incident(&incident).await?;
            println!("Escalated {} to {:?}", incident.id, priority);
        }
    }
    Ok(())
}

fn open_storage(path: &PathBuf) -> Result<SledPipelineStorage> {
    SledPipelineStorage::new(StorageConfig {
        storage_path: path.clone(),
        temporary: false,
    })
}

/// Load every stored incident into a fresh orchestrator so analyst actions
/// see current state.
async fn rehydrate(data: &PathBuf) -> Result<(SledPipelineStorage, IncidentOrchestrator)> {
    let storage = open_storage(data)?;
    let orchestrator = IncidentOrchestrator::default();
    for incident in storage.list_incidents().await {
        orchestrator.import(incident);
    }
    Ok((storage, orchestrator))
}

fn parse_priority(value: &str) -> Result<Priority> {
    match value.to_lowercase().as_str() {
        "low" => Ok(Priority::Low),
        "medium" => Ok(Priority::Medium),
        "high" => Ok(Priority::High),
        "critical" => Ok(Priority::Critical),
        other => Err(HerringboneError::InputError(format!(
            "unknown priority '{}', expected low, medium, high or critical",
            other
        ))),
    }
}

fn print_incident_line(incident: &Incident) {
    println!(
        "  {}  [{:?}/{:?}] severity {}  {}  ({} detections)",
        incident.id,
        incident.status,
        incident.priority,
        incident.severity,
        incident.title,
        incident.detections.len()
    );
}
