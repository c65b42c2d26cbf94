use anyhow::{Context as _, Result};
use clap::Parser;
use cosim::{Server, SimulationModel, VerbosityHook};
use std::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

#[derive(Parser)]
#[command(version, about)]
struct Command {
    /// address of the orchestrator, `host:port`
    #[arg(value_parser = parse_addr)]
    addr: String,

    /// wait for the orchestrator to connect on ADDR instead
    #[arg(long)]
    listen: bool,

    /// log filter until the orchestrator sets the verbosity, `RUST_LOG`
    /// takes precedence
    #[arg(long, default_value = "info")]
    log: String,
}

fn parse_addr(addr: &str) -> Result<String, String> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        return Err(format!("expecting `host:port', got `{addr}'"));
    };
    if host.is_empty() {
        return Err("missing host".to_owned());
    }
    port.parse::<u16>()
        .map_err(|error| format!("invalid port `{port}': {error}"))?;
    Ok(addr.to_owned())
}

fn directive(level: u8) -> &'static str {
    match level {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Applies the `verbose` parameter of `init` to the log filter, unless
/// the filter came from `RUST_LOG`.
struct ReloadVerbosity {
    handle: reload::Handle<EnvFilter, Registry>,
    pinned: bool,
}

impl VerbosityHook for ReloadVerbosity {
    fn set_verbosity(&self, level: u8) {
        if self.pinned {
            debug!(level, "RUST_LOG is set, verbosity left unchanged");
            return;
        }
        let directive = directive(level);
        if let Err(error) = self.handle.modify(|filter| *filter = EnvFilter::new(directive)) {
            warn!(%error, "cannot change the verbosity");
        }
    }
}

fn main() -> Result<()> {
    let cmd = Command::parse();

    let from_env = EnvFilter::try_from_default_env().ok();
    let pinned = from_env.is_some();
    let filter = from_env.unwrap_or_else(|| EnvFilter::new(&cmd.log));
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let model =
        SimulationModel::new().with_verbosity_hook(Box::new(ReloadVerbosity { handle, pinned }));

    let mut server = if cmd.listen {
        let listener = TcpListener::bind(&cmd.addr)
            .with_context(|| format!("Cannot listen on {}", cmd.addr))?;
        info!(addr = %cmd.addr, "waiting for the orchestrator");
        let (stream, peer) = listener
            .accept()
            .context("Cannot accept the orchestrator's connection")?;
        stream.set_nodelay(true)?;
        info!(%peer, "orchestrator connected");
        Server::new(stream, model)
    } else {
        Server::connect(cmd.addr.as_str(), model)?
    };

    server.run()
}
