//! ha-ws: Home Assistant WebSocket client CLI.
//!
//! Queries entity state, services, history, statistics, logs, registries
//! and traces, and streams entity changes and live template renders, all
//! over one multiplexed WebSocket connection.

mod batch;
mod commands;
mod config;
mod output;
mod window;

use clap::{Parser, Subcommand};
use tracing::error;

use commands::split_trailing_number;
use config::{Config, Overrides, Settings};
use output::{Format, Output};
use window::TimeFilter;

/// ha-ws: Home Assistant WebSocket client
#[derive(Parser)]
#[command(
    name = "ha-ws",
    version,
    about = "Query and watch a Home Assistant hub over its WebSocket API"
)]
struct Cli {
    /// Hub URL, e.g. http://homeassistant.local:8123 (overrides HASS_SERVER)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Long-lived access token (overrides HASS_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Per-call timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Default)]
    output: Format,

    /// Shorthand for --output json
    #[arg(long, global = true, conflicts_with = "compact")]
    json: bool,

    /// Shorthand for --output compact
    #[arg(long, global = true)]
    compact: bool,

    /// Show at most N list items (0 = all)
    #[arg(long, global = true, default_value_t = 0)]
    max_items: usize,

    /// Hide titles and summaries
    #[arg(long, global = true)]
    no_headers: bool,

    /// Hide timestamps in timeline output
    #[arg(long, global = true)]
    no_timestamps: bool,

    /// Show last_updated ages in states-filter output
    #[arg(long, global = true)]
    show_age: bool,

    /// Start of the time window (YYYY-MM-DD, YYYY-MM-DD HH:MM or RFC 3339)
    #[arg(long, global = true)]
    from: Option<String>,

    /// End of the time window (same forms as --from)
    #[arg(long, global = true)]
    to: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check the connection and measure round-trip latency
    Ping,

    /// Show one entity's state
    State {
        /// Entity id, e.g. light.kitchen
        entity_id: String,
    },

    /// List entity states
    States {
        /// Only this domain, e.g. light
        domain: Option<String>,
    },

    /// Print every state as JSON
    StatesJson,

    /// List states whose entity id matches a pattern (`*` wildcard)
    StatesFilter { pattern: String },

    /// Show hub configuration
    Config,

    /// List services
    Services {
        /// Only this domain
        domain: Option<String>,
    },

    /// Call a service
    Call {
        domain: String,
        service: String,
        /// Service data as a JSON object
        data: Option<String>,
    },

    /// Render a template (`-` reads it from stdin); with seconds > 0, keep
    /// printing re-renders
    Template {
        template: String,
        #[arg(default_value_t = 0)]
        seconds: u64,
    },

    /// Show an entity's state history
    History {
        entity_id: String,
        /// Window size in hours
        #[arg(default_value_t = 24)]
        hours: u32,
    },

    /// Show an entity's history with full attributes
    HistoryFull {
        entity_id: String,
        #[arg(default_value_t = 24)]
        hours: u32,
    },

    /// Show an entity's attribute changes
    Attrs {
        entity_id: String,
        #[arg(default_value_t = 24)]
        hours: u32,
    },

    /// Interleave several entities' history in time order
    Timeline {
        hours: u32,
        #[arg(required = true)]
        entity_ids: Vec<String>,
    },

    /// Show logbook entries for an entity
    Logbook {
        entity_id: String,
        #[arg(default_value_t = 24)]
        hours: u32,
    },

    /// Show hub system log warnings and errors
    Syslog,

    /// Show hourly statistics for a sensor
    Stats {
        entity_id: String,
        #[arg(default_value_t = 24)]
        hours: u32,
    },

    /// Summarize statistics for several sensors: <entity>... [hours]
    StatsMulti {
        #[arg(required = true)]
        args: Vec<String>,
    },

    /// Find states sharing a context: <entity_id|context_id>
    Context { id: String },

    /// Current state and state distribution over the last day
    Analyze { entity_id: String },

    /// List the entity registry
    Entities {
        /// Case-insensitive `*` pattern over ids and names
        pattern: Option<String>,
    },

    /// List the device registry
    Devices {
        /// Case-insensitive `*` pattern over ids, names and models
        pattern: Option<String>,
    },

    /// List areas
    Areas,

    /// List automation traces
    Traces {
        /// Automation id (not entity id)
        automation_id: Option<String>,
    },

    /// Show one automation run's full trace
    Trace { automation_id: String, run_id: String },

    /// Show the newest trace of an automation
    TraceLatest { automation_id: String },

    /// Summarize an automation's stored runs
    TraceSummary { automation_id: String },

    /// Show the variables a run set and changed
    TraceVars { automation_id: String, run_id: String },

    /// Show a run's steps in order
    TraceTimeline { automation_id: String, run_id: String },

    /// Show what triggered a run
    TraceTrigger { automation_id: String, run_id: String },

    /// Show each action's result in a run
    TraceActions { automation_id: String, run_id: String },

    /// Show a run's trace with its timeline and trigger variables
    TraceDebug { automation_id: String, run_id: String },

    /// Show an automation's configuration
    AutomationConfig { entity_id: String },

    /// Show the blueprint inputs of an automation
    BlueprintInputs { entity_id: String },

    /// Print an entity's state changes as they happen
    Watch {
        entity_id: String,
        /// How long to watch; 0 runs until Ctrl-C
        #[arg(default_value_t = 60)]
        seconds: u64,
    },

    /// Print numbered state changes of one entity
    Monitor {
        entity_id: String,
        #[arg(default_value_t = 60)]
        seconds: u64,
    },

    /// Monitor several entities at once: <entity>... [seconds]
    MonitorMulti {
        #[arg(required = true)]
        args: Vec<String>,
    },
}

impl Cli {
    fn output(&self) -> Output {
        let format = if self.json {
            Format::Json
        } else if self.compact {
            Format::Compact
        } else {
            self.output
        };
        Output {
            format,
            headers: !self.no_headers,
            timestamps: !self.no_timestamps,
            show_age: self.show_age,
            max_items: self.max_items,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing. The `ha_ws` prefix covers the library crates too.
    // Logs go to stderr; stdout carries command output.
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("ha_ws=debug")
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("ha_ws=warn")
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("ha-ws: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(config::default_path);
    let cfg = Config::load(&config_path)?;
    let settings = Settings::resolve(
        &cfg,
        |key| std::env::var(key).ok(),
        Overrides {
            url: cli.url.clone(),
            token: cli.token.clone(),
            timeout_secs: cli.timeout,
        },
    )?;
    let out = cli.output();
    let filter = TimeFilter::parse(cli.from.as_deref(), cli.to.as_deref())?;

    let client = commands::connect(&settings).await?;
    let result = dispatch(&client, &out, &filter, cli.command).await;

    client.close().await?;
    result
}

async fn dispatch(
    c: &ha_ws_client::HaClient,
    out: &Output,
    filter: &TimeFilter,
    command: Command,
) -> anyhow::Result<()> {
    use commands::{automation, basic, history, logs, registry, stats, watch};

    match command {
        Command::Ping => basic::ping(c, out).await,
        Command::State { entity_id } => basic::state(c, out, &entity_id).await,
        Command::States { domain } => basic::states(c, out, domain.as_deref()).await,
        Command::StatesJson => basic::states_json(c, out).await,
        Command::StatesFilter { pattern } => basic::states_filter(c, out, &pattern).await,
        Command::Config => basic::config(c, out).await,
        Command::Services { domain } => basic::services(c, out, domain.as_deref()).await,
        Command::Call {
            domain,
            service,
            data,
        } => basic::call(c, out, &domain, &service, data.as_deref()).await,
        Command::Template { template, seconds } => {
            watch::template(c, out, &template, seconds).await
        }
        Command::History { entity_id, hours } => {
            history::history(c, out, filter, &entity_id, hours).await
        }
        Command::HistoryFull { entity_id, hours } => {
            history::history_full(c, out, filter, &entity_id, hours).await
        }
        Command::Attrs { entity_id, hours } => {
            history::attrs(c, out, filter, &entity_id, hours).await
        }
        Command::Timeline { hours, entity_ids } => {
            history::timeline(c, out, filter, hours, &entity_ids).await
        }
        Command::Logbook { entity_id, hours } => {
            history::logbook(c, out, filter, &entity_id, hours).await
        }
        Command::Syslog => logs::syslog(c, out).await,
        Command::Stats { entity_id, hours } => {
            stats::stats(c, out, filter, &entity_id, hours).await
        }
        Command::StatsMulti { args } => {
            let (entity_ids, hours) = split_trailing_number(&args, 24);
            let hours = u32::try_from(hours)?;
            stats::stats_multi(c, out, filter, entity_ids, hours).await
        }
        Command::Context { id } => logs::context(c, out, &id).await,
        Command::Analyze { entity_id } => stats::analyze(c, out, filter, &entity_id).await,
        Command::Entities { pattern } => registry::entities(c, out, pattern.as_deref()).await,
        Command::Devices { pattern } => registry::devices(c, out, pattern.as_deref()).await,
        Command::Areas => registry::areas(c, out).await,
        Command::Traces { automation_id } => {
            automation::traces(c, out, filter, automation_id.as_deref()).await
        }
        Command::Trace {
            automation_id,
            run_id,
        } => automation::trace(c, out, &automation_id, &run_id).await,
        Command::TraceLatest { automation_id } => {
            automation::trace_latest(c, out, &automation_id).await
        }
        Command::TraceSummary { automation_id } => {
            automation::trace_summary(c, out, &automation_id).await
        }
        Command::TraceVars {
            automation_id,
            run_id,
        } => automation::trace_vars(c, out, &automation_id, &run_id).await,
        Command::TraceTimeline {
            automation_id,
            run_id,
        } => automation::trace_timeline(c, out, &automation_id, &run_id).await,
        Command::TraceTrigger {
            automation_id,
            run_id,
        } => automation::trace_trigger(c, out, &automation_id, &run_id).await,
        Command::TraceActions {
            automation_id,
            run_id,
        } => automation::trace_actions(c, out, &automation_id, &run_id).await,
        Command::TraceDebug {
            automation_id,
            run_id,
        } => automation::trace_debug(c, out, &automation_id, &run_id).await,
        Command::AutomationConfig { entity_id } => {
            automation::automation_config(c, out, &entity_id).await
        }
        Command::BlueprintInputs { entity_id } => {
            automation::blueprint_inputs(c, out, &entity_id).await
        }
        Command::Watch { entity_id, seconds } => {
            watch::watch(c, out, &entity_id, seconds).await
        }
        Command::Monitor { entity_id, seconds } => {
            watch::monitor(c, out, vec![entity_id], seconds).await
        }
        Command::MonitorMulti { args } => {
            let (entity_ids, seconds) = split_trailing_number(&args, 60);
            watch::monitor(c, out, entity_ids, seconds).await
        }
    }
}
