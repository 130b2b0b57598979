use clap::Parser;
use tracing::info;

use clrsnap_agent::{serve, AgentConfig, DebugAgent};
use clrsnap_runtime::harness::sample_debuggee;

/// Snapshot debugger agent serving the breakpoint channel on stdio.
///
/// Runs against the built-in sample debuggee; a live runtime attach embeds
/// the `clrsnap-agent` library and supplies its own process surface.
#[derive(Parser)]
#[command(name = "clrsnap-agent", version)]
struct Cli {
    /// Member depth captured per variable.
    #[arg(long, default_value_t = 5)]
    object_depth: i32,
    /// Array elements serialised per array.
    #[arg(long, default_value_t = 1000)]
    max_array_items: usize,
    /// Wall-clock budget for one managed evaluation, in seconds.
    #[arg(long, default_value_t = 60)]
    eval_timeout: u64,
    /// Disable property-getter evaluation.
    #[arg(long)]
    no_property_eval: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AgentConfig {
        object_depth: cli.object_depth,
        max_array_items: cli.max_array_items,
        eval_timeout_secs: cli.eval_timeout,
        property_eval: !cli.no_property_eval,
        ..AgentConfig::default()
    };

    let (process, _module) = sample_debuggee();
    let (agent, snapshots) = DebugAgent::new(process, config);
    info!("serving breakpoint channel on stdio");
    serve(&agent, std::io::stdin().lock(), std::io::stdout(), snapshots)?;
    Ok(())
}
