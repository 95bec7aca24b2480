//! tournbuddy CLI: host a tournament, browse for hosts, or connect to one.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tournbuddy_daemon::config::Config;
use tournbuddy_daemon::{setup, Daemon, DaemonEvent, Session};
use tournbuddy_discovery::{Browser, BrowserEvent};
use tournbuddy_protocol::{connect, ConnectionEvent, ConnectionEvents, ConnectionHandle};
use tournbuddy_types::{AuthorizationCode, Endpoint, Message};
use tracing::{info, warn};

/// How long `connect` browses for an advertised name before giving up.
const NAME_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `browse --once` collects before printing.
const ONE_SHOT_BROWSE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(
    name = "tournbuddy",
    about = "Host and join tournament sessions on the local network",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a tournament host until interrupted.
    Host {
        /// Authorization code remotes must present.
        #[arg(long)]
        code: AuthorizationCode,

        /// Advertise on the network, under NAME or the configured identity.
        #[arg(long, value_name = "NAME")]
        publish: Option<Option<String>>,
    },

    /// List reachable hosts.
    Browse {
        /// Print the list once and exit.
        #[arg(long)]
        once: bool,

        /// Print endpoints as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Connect to a host and exchange messages over stdin and stdout.
    Connect {
        /// Socket path, host:port, or advertised name.
        target: String,

        /// Authorization code of the host.
        #[arg(long)]
        code: AuthorizationCode,
    },

    /// Print the local socket directory.
    Dir,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = setup::load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.daemon.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Host { code, publish } => host(config, code, publish).await,
        Commands::Browse { once, json } => browse(&config, once, json).await,
        Commands::Connect { target, code } => connect_to(&config, &target, code).await,
        Commands::Dir => {
            println!("{}", setup::socket_dir(&config)?.display());
            Ok(())
        }
    }
}

async fn host(
    config: Config,
    code: AuthorizationCode,
    publish: Option<Option<String>>,
) -> anyhow::Result<()> {
    let publish = publish.map(|name| name.unwrap_or_else(|| config.identity.name.clone()));
    let backend = if publish.is_some() && config.daemon.network {
        setup::mdns_backend()
    } else {
        None
    };

    let (mut daemon, mut events) = Daemon::new(config, backend);
    if let Some(name) = &publish {
        daemon.publish(name).await?;
    }
    let path = daemon.start(code).await?;
    println!("{}", path.display());
    if let Some(port) = daemon.port() {
        info!(port, "network listener up");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Some(DaemonEvent::SessionOpened(session)) => {
                    tokio::spawn(serve_session(session));
                }
                Some(DaemonEvent::HandshakeRejected { peer, reason }) => {
                    warn!(peer = %peer, reason = %reason, "rejected connection");
                }
                None => break,
            },
        }
    }

    daemon.stop().await?;
    Ok(())
}

async fn serve_session(mut session: Session) {
    let id = session.id();
    info!(session = %id, peer = %session.peer(), "session opened");
    while let Some(event) = session.recv().await {
        match event {
            ConnectionEvent::Message(msg) => {
                info!(session = %id, message = %String::from_utf8_lossy(msg.as_bytes()), "received");
            }
            ConnectionEvent::Closed => info!(session = %id, "session closed"),
            ConnectionEvent::Failed(e) => warn!(session = %id, error = %e, "session failed"),
            ConnectionEvent::Connected => {}
        }
    }
}

async fn start_browser(config: &Config) -> anyhow::Result<(Browser, tokio::sync::mpsc::Receiver<BrowserEvent>)> {
    let dir = setup::socket_dir(config)?;
    let backend = if config.browser.mdns {
        setup::mdns_backend()
    } else {
        None
    };
    let browser_config = config.browser.browser_config(dir);
    Ok(Browser::start(browser_config, backend).await?)
}

fn print_services(services: &[Endpoint], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(services)?);
        return Ok(());
    }
    if services.is_empty() {
        println!("(no hosts)");
    }
    for endpoint in services {
        let place = if endpoint.is_remote() { "remote" } else { "local" };
        println!("{place:<6} {:<24} {endpoint}", endpoint.name());
    }
    Ok(())
}

async fn browse(config: &Config, once: bool, json: bool) -> anyhow::Result<()> {
    let (mut browser, mut events) = start_browser(config).await?;

    if once {
        tokio::time::sleep(ONE_SHOT_BROWSE).await;
        print_services(&browser.service_list(), json)?;
        browser.stop().await;
        return Ok(());
    }

    print_services(&browser.service_list(), json)?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(BrowserEvent::ServicesChanged(services)) => {
                    if !json {
                        println!();
                    }
                    print_services(&services, json)?;
                }
                None => break,
            },
        }
    }
    browser.stop().await;
    Ok(())
}

/// Turn a target argument into an endpoint, browsing for it when it is an
/// advertised name.
async fn resolve_target(config: &Config, target: &str) -> anyhow::Result<Endpoint> {
    if let Ok(endpoint) = target.parse::<Endpoint>() {
        return Ok(endpoint);
    }

    let (mut browser, mut events) = start_browser(config).await?;
    let lookup = async {
        loop {
            if let Some(found) = browser
                .service_list()
                .into_iter()
                .find(|ep| ep.is_remote() && ep.name() == target)
            {
                return Some(found);
            }
            events.recv().await?;
        }
    };
    let found = tokio::time::timeout(NAME_LOOKUP_TIMEOUT, lookup).await.ok().flatten();
    browser.stop().await;
    found.with_context(|| format!("no host named {target:?} found"))
}

async fn connect_to(config: &Config, target: &str, code: AuthorizationCode) -> anyhow::Result<()> {
    let endpoint = resolve_target(config, target).await?;
    info!(endpoint = %endpoint, "connecting");

    let (handle, events) = connect(endpoint);
    exchange(handle, events, code, tokio::io::BufReader::new(tokio::io::stdin())).await
}

/// Send `code` once open, then each input line as a message, printing what
/// the host sends back. Ends when the connection does.
async fn exchange<R>(
    handle: ConnectionHandle,
    mut events: ConnectionEvents,
    code: AuthorizationCode,
    input: R,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut stdin = input.lines();
    let mut stdin_open = true;
    // Input waits in stdin until the code has been sent.
    let mut connected = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ConnectionEvent::Connected) => {
                    handle.send(Message::new(code.to_wire())?)?;
                    connected = true;
                    info!("connected");
                }
                Some(ConnectionEvent::Message(msg)) => {
                    println!("{}", String::from_utf8_lossy(msg.as_bytes()));
                }
                Some(ConnectionEvent::Closed) | None => {
                    info!("connection closed");
                    return Ok(());
                }
                Some(ConnectionEvent::Failed(e)) => return Err(e.into()),
            },
            line = stdin.next_line(), if stdin_open && connected => match line? {
                Some(line) => match Message::new(line) {
                    Ok(msg) => {
                        if let Err(e) = handle.send(msg) {
                            warn!(error = %e, "message not sent");
                        }
                    }
                    Err(e) => warn!(error = %e, "invalid message"),
                },
                None => {
                    stdin_open = false;
                    handle.close();
                }
            },
            _ = tokio::signal::ctrl_c() => {
                handle.close();
                stdin_open = false;
            }
        }
    }
}
