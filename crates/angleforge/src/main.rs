use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};
use serde::Serialize;

use angleforge::billing::{Biller, CreditPolicy, LogLedger};
use angleforge::config::Config;
use angleforge::db::job_repo::JobFilter;
use angleforge::db::{default_database_path, Database};
use angleforge::reconciler::{SweepScheduler, SweepSettings};
use angleforge::upstream::{ClientCredentials, HttpGenerationClient, UpstreamTimeouts};
use angleforge::{
    load_config, resolve_secret, telemetry, AngleforgeError, Avatar, ConfigError,
    JobProgressBroadcaster, JobRequest, JobService, JobStatus, LayoutRegistry, Reconciler,
    TargetApproach, TemplateInjector,
};

#[derive(Parser, Debug)]
#[command(name = "angleforge", version, about = "Submit, track and materialize generation jobs")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "ANGLEFORGE_CONFIG", default_value = "angleforge.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the periodic sweep until interrupted
    Serve,
    /// Create a job and submit it
    Submit {
        #[arg(long)]
        title: String,
        #[arg(long)]
        brief: String,
        #[arg(long)]
        source_url: Option<String>,
        #[arg(long, value_enum, default_value_t = ApproachArg::Explore)]
        approach: ApproachArg,
        /// Persona name; append `:researched` to flag it as researched
        #[arg(long = "avatar")]
        avatars: Vec<String>,
        #[arg(long)]
        job_type: Option<String>,
        #[arg(long)]
        layout: Option<String>,
    },
    /// Retry submission of a pending draft
    Resubmit { id: String },
    /// Check a job's status (runs one reconciliation attempt)
    Status { id: String },
    /// Show a job in full
    Get { id: String },
    /// List jobs
    List {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        #[arg(long)]
        job_type: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u64,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// List a job's materialized templates
    Templates {
        id: String,
        /// Print only the rendered HTML
        #[arg(long)]
        html: bool,
    },
    /// Rebuild a job's templates from its stored result
    Rematerialize {
        id: String,
        #[arg(long)]
        layout: Option<String>,
    },
    /// Stop reconciling a job
    Cancel { id: String },
    /// Delete a job and its templates
    Delete { id: String },
    /// Run a single sweep and print the report
    Sweep,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ApproachArg {
    Explore,
    Refine,
    Expand,
}

impl From<ApproachArg> for TargetApproach {
    fn from(value: ApproachArg) -> Self {
        match value {
            ApproachArg::Explore => TargetApproach::Explore,
            ApproachArg::Refine => TargetApproach::Refine,
            ApproachArg::Expand => TargetApproach::Expand,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StatusArg {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl From<StatusArg> for JobStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => JobStatus::Pending,
            StatusArg::Processing => JobStatus::Processing,
            StatusArg::Completed => JobStatus::Completed,
            StatusArg::Failed => JobStatus::Failed,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), AngleforgeError> {
    let config = load_config(&cli.config)?;
    telemetry::init(&config.logging)?;

    let reconciler = Arc::new(build_reconciler(&config)?);
    if let Commands::Serve = cli.command {
        return serve(reconciler, &config);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let service = JobService::new(reconciler);
    runtime.block_on(execute(&service, &config, cli.command))
}

fn build_reconciler(config: &Config) -> Result<Reconciler, AngleforgeError> {
    let db_path = match &config.database.path {
        Some(path) => PathBuf::from(angleforge::secrets::expand_home(&path.to_string_lossy())),
        None => default_database_path().ok_or_else(|| {
            ConfigError::validation("database.path is unset and no home directory was found")
        })?,
    };
    let db = Database::open(&db_path)?;

    let upstream = &config.upstream;
    let credentials = ClientCredentials {
        token_url: upstream.token_url.clone(),
        client_id: upstream.client_id.clone(),
        client_secret: resolve_secret(upstream)?,
        scope: upstream.scope.clone(),
    };
    let client = HttpGenerationClient::new(
        upstream.base_url.as_str(),
        credentials,
        UpstreamTimeouts::from(upstream),
    )?;

    let layouts = LayoutRegistry::from_config(&config.layouts)?;

    let biller = Biller::new(
        db.clone(),
        CreditPolicy::new(config.billing.clone()),
        Arc::new(LogLedger),
    );

    Ok(Reconciler::new(
        db,
        Arc::new(client),
        Arc::new(layouts),
        TemplateInjector::new(config.layouts.sanitize),
        biller,
        JobProgressBroadcaster::default(),
    ))
}

fn serve(reconciler: Arc<Reconciler>, config: &Config) -> Result<(), AngleforgeError> {
    let settings = SweepSettings {
        interval: Duration::from_secs(config.reconciler.sweep_interval_secs),
        concurrency: config.reconciler.sweep_concurrency,
        stuck_after_secs: config.reconciler.stuck_after_secs,
    };
    let scheduler = SweepScheduler::new(reconciler, settings);
    let (trigger_tx, trigger_rx) = tokio::sync::broadcast::channel(4);
    let handle = scheduler.start(trigger_rx);

    let (stop_tx, stop_rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    info!(
        "Sweeping every {}s with concurrency {}; press Ctrl-C to stop",
        config.reconciler.sweep_interval_secs, settings.concurrency
    );
    let _ = stop_rx.recv();

    info!("Shutting down");
    scheduler.stop();
    let _ = trigger_tx.send(());
    if handle.join().is_err() {
        error!("Sweep thread panicked");
    }
    Ok(())
}

async fn execute(
    service: &JobService,
    config: &Config,
    command: Commands,
) -> Result<(), AngleforgeError> {
    match command {
        Commands::Serve => unreachable!("serve runs outside the command runtime"),
        Commands::Submit {
            title,
            brief,
            source_url,
            approach,
            avatars,
            job_type,
            layout,
        } => {
            let request = JobRequest {
                title,
                brief,
                source_url,
                target_approach: approach.into(),
                avatars: avatars.iter().map(String::as_str).map(parse_avatar).collect(),
                job_type,
                layout_template_id: layout,
            };
            print_json(&service.submit_job(request).await?);
        }
        Commands::Resubmit { id } => print_json(&service.resubmit_job(&id).await?),
        Commands::Status { id } => print_json(&service.get_job_status(&id).await?),
        Commands::Get { id } => print_json(&service.get_job(&id)?),
        Commands::List {
            status,
            job_type,
            limit,
            offset,
        } => {
            let filter = JobFilter {
                status: status.map(JobStatus::from),
                job_type,
                limit: Some(limit),
                offset: Some(offset),
            };
            let (jobs, total) = service.list_jobs(&filter)?;
            print_json(&serde_json::json!({ "total": total, "jobs": jobs }));
        }
        Commands::Templates { id, html } => {
            let templates = service.list_materialized_templates(&id)?;
            if html {
                for template in &templates {
                    println!("<!-- {} #{} -->", template.angle_label, template.angle_index);
                    println!("{}", template.html_content);
                }
            } else {
                print_json(&templates);
            }
        }
        Commands::Rematerialize { id, layout } => {
            let templates = service.rematerialize_job(&id, layout.as_deref()).await?;
            println!("{} template(s) rebuilt for job {}", templates.len(), id);
        }
        Commands::Cancel { id } => print_json(&service.cancel_job(&id)?),
        Commands::Delete { id } => {
            service.delete_job(&id)?;
            println!("deleted");
        }
        Commands::Sweep => {
            let report = service
                .reconciler()
                .sweep(
                    config.reconciler.sweep_concurrency,
                    config.reconciler.stuck_after_secs,
                )
                .await?;
            print_json(&report);
        }
    }
    Ok(())
}

fn parse_avatar(raw: &str) -> Avatar {
    match raw.strip_suffix(":researched") {
        Some(name) => Avatar {
            name: name.to_string(),
            researched: true,
        },
        None => Avatar {
            name: raw.to_string(),
            researched: false,
        },
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to render output: {}", e),
    }
}
