//! vigil server binary.
//!
//! `vigil start` brings the modules up in dependency order (metrics, event
//! queue, KVDB, store, builder registry, router, endpoints) and serves
//! until killed. `vigil validate` compiles a named policy against the store
//! and reports, without starting anything.

mod server;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use vigil_policy::{
    register_builders, BuilderDeps, FileDriver, KvdbManager, PolicyBuilder, Registry,
};
use vigil_router::{ConcurrentQueue, MetricsManager, Router};

use crate::server::{Server, ServerConfig};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Security-event processing engine")]
#[command(version)]
struct Cli {
    /// Log level filter (overridden by RUST_LOG when set).
    #[arg(long = "log_level", global = true, default_value = "info",
          env = "VIGIL_LOG_LEVEL",
          value_parser = ["trace", "debug", "info", "warn", "error", "off"])]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an engine instance
    Start(StartArgs),

    /// Compile a policy from the store and report the result
    Validate {
        /// Name of the policy document in the store
        policy: String,

        #[command(flatten)]
        collaborators: CollaboratorArgs,
    },
}

#[derive(Args)]
struct CollaboratorArgs {
    /// Folder holding the asset store
    #[arg(long = "store_path", default_value = "/var/lib/vigil/store",
          env = "VIGIL_STORE_PATH")]
    store_path: PathBuf,

    /// Folder holding the key-value databases
    #[arg(long = "kvdb_path", default_value = "/var/lib/vigil/kvdb",
          env = "VIGIL_KVDB_PATH")]
    kvdb_path: PathBuf,

    /// Agent-database socket used by the wdb_update helper
    #[arg(long = "wdb_socket", default_value = "/run/vigil/wdb.sock",
          env = "VIGIL_WDB_SOCK")]
    wdb_socket: PathBuf,
}

#[derive(Args)]
struct StartArgs {
    #[command(flatten)]
    collaborators: CollaboratorArgs,

    /// Server worker pool size
    #[arg(long = "server_threads", default_value_t = 4,
          env = "VIGIL_SRV_THREADS",
          value_parser = clap::value_parser!(u32).range(1..=1024))]
    server_threads: u32,

    /// Event endpoint socket address
    #[arg(long = "event_socket", default_value = "/run/vigil/event.sock",
          env = "VIGIL_EVENT_SOCK")]
    event_socket: PathBuf,

    /// Event endpoint task queue depth (0 = process inline)
    #[arg(long = "event_queue_tasks", default_value_t = 0,
          env = "VIGIL_EVENT_QUEUE_TASKS")]
    event_queue_tasks: u32,

    /// API endpoint socket address
    #[arg(long = "api_socket", default_value = "/run/vigil/api.sock",
          env = "VIGIL_API_SOCK")]
    api_socket: PathBuf,

    /// API endpoint task queue depth
    #[arg(long = "api_queue_tasks", default_value_t = 8,
          env = "VIGIL_API_QUEUE_TASKS")]
    api_queue_tasks: u32,

    /// API socket timeout in milliseconds
    #[arg(long = "api_timeout", default_value_t = 1000, env = "VIGIL_API_TIMEOUT")]
    api_timeout: u64,

    /// Router worker pool size
    #[arg(long = "router_threads", default_value_t = 1,
          env = "VIGIL_ROUTER_THREADS",
          value_parser = clap::value_parser!(u32).range(1..))]
    router_threads: u32,

    /// Event queue capacity
    #[arg(long = "queue_size", default_value_t = 10000,
          env = "VIGIL_QUEUE_SIZE",
          value_parser = clap::value_parser!(u32).range(1..))]
    queue_size: u32,

    /// File receiving spilled events when the queue cannot accept more
    #[arg(long = "queue_flood_file", default_value = "/var/lib/vigil/flood.ndjson",
          env = "VIGIL_QUEUE_FLOOD_FILE")]
    queue_flood_file: PathBuf,

    /// Push attempts before spilling an event
    #[arg(long = "queue_flood_attempts", default_value_t = 3,
          env = "VIGIL_QUEUE_FLOOD_ATTEMPTS",
          value_parser = clap::value_parser!(u32).range(1..))]
    queue_flood_attempts: u32,

    /// Microseconds slept between push attempts
    #[arg(long = "queue_flood_sleep", default_value_t = 100,
          env = "VIGIL_QUEUE_FLOOD_SLEEP",
          value_parser = clap::value_parser!(u64).range(1..))]
    queue_flood_sleep: u64,

    /// Initial route as name:priority:filter:policy
    #[arg(long = "policy", env = "VIGIL_POLICY", value_parser = parse_route_spec)]
    policy: Option<RouteSpec>,

    /// Replace an existing route table with the --policy route
    #[arg(long = "force_router_arg", default_value_t = false)]
    force_router_arg: bool,
}

#[derive(Debug, Clone)]
struct RouteSpec {
    name: String,
    priority: i32,
    filter: String,
    policy: String,
}

fn parse_route_spec(raw: &str) -> Result<RouteSpec, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 4 {
        return Err("expected name:priority:filter:policy".to_owned());
    }
    let priority: i32 = parts[1]
        .parse()
        .map_err(|_| format!("invalid route priority '{}'", parts[1]))?;
    Ok(RouteSpec {
        name: parts[0].to_owned(),
        priority,
        filter: parts[2].to_owned(),
        policy: parts[3].to_owned(),
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Start(args) => cmd_start(args),
        Commands::Validate {
            policy,
            collaborators,
        } => cmd_validate(&policy, &collaborators),
    }
}

fn build_policy_builder(
    collaborators: &CollaboratorArgs,
) -> Result<PolicyBuilder, Box<dyn std::error::Error>> {
    let kvdb = Arc::new(KvdbManager::new(&collaborators.kvdb_path)?);
    debug!(path = %collaborators.kvdb_path.display(), "kvdb initialized");

    let mut registry = Registry::new();
    register_builders(
        &mut registry,
        &BuilderDeps::new(kvdb, &collaborators.wdb_socket),
    )?;
    debug!(builders = registry.len(), "helper builders registered");

    let store = Arc::new(FileDriver::new(&collaborators.store_path));
    info!(path = %collaborators.store_path.display(), "store initialized");

    Ok(PolicyBuilder::new(store, Arc::new(registry)))
}

fn cmd_validate(policy: &str, collaborators: &CollaboratorArgs) -> ExitCode {
    let builder = match build_policy_builder(collaborators) {
        Ok(builder) => builder,
        Err(e) => {
            error!(error = %e, "cannot initialize the collaborators");
            return ExitCode::FAILURE;
        }
    };
    match builder.build_policy(policy) {
        Ok(policy) => {
            println!("policy \"{}\": ok", policy.name);
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("policy \"{policy}\": {e}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_start(args: StartArgs) -> ExitCode {
    let metrics = Arc::new(MetricsManager::new());

    let queue = match ConcurrentQueue::with_flood(
        args.queue_size as usize,
        &metrics.scope("eventQueue"),
        &metrics.scope("eventQueueDelta"),
        &args.queue_flood_file,
        args.queue_flood_attempts,
        args.queue_flood_sleep,
    ) {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            error!(error = %e, "cannot create the event queue");
            return ExitCode::FAILURE;
        }
    };
    debug!(capacity = args.queue_size, "event queue created");

    let builder = match build_policy_builder(&args.collaborators) {
        Ok(builder) => builder,
        Err(e) => {
            error!(error = %e, "cannot initialize the collaborators");
            return ExitCode::FAILURE;
        }
    };

    let router = Arc::new(Router::new(
        builder.clone(),
        Arc::clone(&queue),
        args.router_threads as usize,
    ));
    router.run();
    info!(threads = args.router_threads, "router initialized");

    // Seed the route table from the command line: always when empty,
    // unconditionally under --force_router_arg.
    if let Some(spec) = &args.policy {
        if args.force_router_arg {
            router.clear();
        }
        if router.route_table().is_empty() {
            if let Err(e) =
                router.add_route(&spec.name, spec.priority, &spec.filter, &spec.policy)
            {
                error!(route = %spec.name, error = %e, "cannot install the initial route");
                router.stop();
                return ExitCode::FAILURE;
            }
        }
    }

    let config = ServerConfig {
        event_socket: args.event_socket,
        api_socket: args.api_socket,
        api_timeout: Duration::from_millis(args.api_timeout),
        server_threads: args.server_threads as usize,
        api_queue_tasks: args.api_queue_tasks as usize,
        event_queue_tasks: args.event_queue_tasks as usize,
    };
    let server = match Server::start(
        config,
        Arc::clone(&router),
        builder,
        metrics.scope("endpointEvent"),
        metrics.scope("endpointApi"),
    ) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "cannot start the server endpoints");
            router.stop();
            return ExitCode::FAILURE;
        }
    };

    info!("vigil is running");
    server.join();
    router.stop();
    ExitCode::SUCCESS
}
