use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use spot_tracker::config::TrackerConfig;
use spot_tracker::metrics::{EnhancedSummary, PlainSummary};
use spot_tracker::service::TrackerService;
use spot_tracker::shutdown::install_shutdown_handler;
use spot_tracker::store::JobStore;
use spot_tracker::tracker::{JobEvent, JobRecord};

#[derive(Parser, Debug)]
#[command(name = "spot-tracker")]
#[command(version)]
#[command(about = "Tracks spot-fleet jobs and reports savings against on-demand pricing")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API (event ingestion and metrics)
    Serve {
        #[command(flatten)]
        common: CommonArgs,

        /// Port to listen on (overrides the config file)
        #[arg(long)]
        port: Option<u16>,

        /// Seconds a looked-up price is reused (0 disables caching)
        #[arg(long)]
        cache_ttl_secs: Option<u64>,
    },

    /// Apply a single job state-change event read from a JSON file
    Reconcile {
        #[command(flatten)]
        common: CommonArgs,

        /// Path to the event JSON (envelope or bare detail object)
        event: PathBuf,

        /// Output format
        #[arg(long, short = 'o', default_value = "json")]
        output: OutputFormat,
    },

    /// Compute a cost summary over all stored jobs
    Metrics {
        #[command(flatten)]
        common: CommonArgs,

        /// Which summary to compute
        #[arg(long, default_value = "plain")]
        mode: MetricsMode,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

// =============================================================================
// Shared Arguments
// =============================================================================

#[derive(clap::Args, Debug)]
struct CommonArgs {
    /// JSON config file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Directory holding job records (in-memory when omitted)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON price table (region -> instance type -> prices)
    #[arg(long)]
    price_table: Option<PathBuf>,

    /// JSON resolver table (container locators and instance types)
    #[arg(long)]
    resolver_table: Option<PathBuf>,

    /// Region to price instances in
    #[arg(long)]
    region: Option<String>,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, ValueEnum)]
enum MetricsMode {
    /// On-demand vs spot, longest job per instance
    Plain,
    /// Spot with and without recovered time, summed jobs per instance
    Enhanced,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn build_config(common: &CommonArgs) -> Result<TrackerConfig, Box<dyn std::error::Error>> {
    let mut config = match &common.config {
        Some(path) => TrackerConfig::from_file(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(dir) = &common.data_dir {
        config = config.with_data_dir(dir.clone());
    }
    if let Some(path) = &common.price_table {
        config.pricing.table_path = Some(path.clone());
    }
    if let Some(path) = &common.resolver_table {
        config.resolver.table_path = Some(path.clone());
    }
    if let Some(region) = &common.region {
        config = config.with_region(region.clone());
    }
    Ok(config)
}

fn format_usd(value: f64) -> String {
    format!("${:.4}", value)
}

fn print_plain(summary: &PlainSummary) {
    println!("Plain Metrics");
    println!("{}", "=".repeat(40));
    println!("Jobs:              {}", summary.number_of_jobs);
    println!("Retries:           {}", summary.number_of_retries);
    println!("Total run time:    {}s", summary.total_run_time);
    println!("Job queues:        {}", summary.job_queue_names.join(", "));
    println!("On-demand cost:    {}", format_usd(summary.total_on_demand_cost));
    println!("Spot cost:         {}", format_usd(summary.total_spot_cost));
    println!("Estimated savings: {}", format_usd(summary.estimated_savings));
}

fn print_enhanced(summary: &EnhancedSummary) {
    println!("Spot Metrics");
    println!("{}", "=".repeat(40));
    println!("Jobs:                 {}", summary.number_of_jobs);
    println!("Retries:              {}", summary.total_retries);
    println!("Spot run time:        {}s", summary.total_run_time_spot);
    println!("Run time with rescue: {}s", summary.total_run_time_with_rescue_spot);
    println!("Time wasted:          {}s", summary.total_time_wasted_spot);
    println!("Job queues:           {}", summary.job_queue_names.join(", "));
    println!("Cost without rescue:  {}", format_usd(summary.cost_without_rescue));
    println!("Cost with rescue:     {}", format_usd(summary.cost_with_rescue));
    println!("Savings:              {}", format_usd(summary.savings_with_rescue));
}

fn print_record(record: &JobRecord) {
    println!("Job ID:          {}", record.job_id);
    println!("Queue:           {}", record.queue_name);
    println!("Status:          {}", record.status);
    println!("Instance:        {}", record.current_instance_id);
    if !record.previous_instance_ids.is_empty() {
        println!("Previous:        {}", record.previous_instance_ids.join(", "));
    }
    println!("Attempts:        {}", record.attempts);
    println!("Run duration:    {}s", record.run_duration_seconds);
    if let Some(start) = record.start_time {
        println!("Running since:   {}", start.to_rfc3339());
    }
    if let Some(interrupted) = record.interruption_time {
        println!("Interrupted at:  {}", interrupted.to_rfc3339());
    }
    if !record.instance_map.is_empty() {
        println!("Instances:");
        for (id, ty) in &record.instance_map {
            println!("  {:<24} {}", id, ty);
        }
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_server(
    common: CommonArgs,
    port: Option<u16>,
    cache_ttl_secs: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = build_config(&common)?;
    if let Some(port) = port {
        let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
        config.listen_addr = addr;
    }
    if let Some(ttl) = cache_ttl_secs {
        config.pricing.cache_ttl_secs = ttl;
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        region = %config.pricing.region,
        data_dir = ?config.store.data_dir,
        price_cache_ttl_secs = config.pricing.cache_ttl_secs,
        "Starting spot-tracker"
    );

    let shutdown = install_shutdown_handler()?;
    let service = TrackerService::from_config(config).await?;
    service.run(shutdown).await?;
    Ok(())
}

async fn handle_reconcile(
    common: CommonArgs,
    event_path: PathBuf,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(&common)?;
    let raw = tokio::fs::read_to_string(&event_path).await?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let event = JobEvent::from_value(&value)?;

    let service = TrackerService::from_config(config).await?;
    let record = service.reconciler.reconcile(&event).await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
        OutputFormat::Table => print_record(&record),
    }
    Ok(())
}

async fn handle_metrics(
    common: CommonArgs,
    mode: MetricsMode,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(&common)?;
    let service = TrackerService::from_config(config).await?;
    let records = service.store.scan().await?;

    match mode {
        MetricsMode::Plain => {
            let region = service.aggregator.region().to_string();
            let summary = service
                .aggregator
                .compute_plain_metrics(&records, &region)
                .await;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Table => print_plain(&summary),
            }
        }
        MetricsMode::Enhanced => {
            let summary = service.aggregator.compute_enhanced_metrics(&records).await;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Table => print_enhanced(&summary),
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

    // Logs go to stderr so JSON output on stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Serve {
            common,
            port,
            cache_ttl_secs,
        } => {
            run_server(common, port, cache_ttl_secs).await?;
        }
        Commands::Reconcile {
            common,
            event,
            output,
        } => {
            handle_reconcile(common, event, output).await?;
        }
        Commands::Metrics {
            common,
            mode,
            output,
        } => {
            handle_metrics(common, mode, output).await?;
        }
    }

    Ok(())
}
