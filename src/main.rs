use clap::{Parser, Subcommand};
use serial_harvester::{
    list_ports, ConnectionManager, EngineConfig, EngineEvent, SessionState,
};
use tokio::signal;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "serial-harvester",
    version,
    about = "Auto-discover serial devices and stream classified telemetry from them."
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enumerate available serial ports.
    List,
    /// Probe one port for its baud rate and device identity.
    Detect {
        /// Port path, e.g. /dev/ttyUSB0 or COM3.
        port: String,
    },
    /// Detect every available port through a bounded worker pool.
    Scan {
        /// Worker pool size (overrides the config file).
        #[arg(short, long)]
        jobs: Option<usize>,
    },
    /// Connect to a port and print classified records as JSON lines.
    Stream {
        /// Port path, e.g. /dev/ttyUSB0 or COM3.
        port: String,
        /// Baud rate; omitted means auto-detect first.
        #[arg(short, long)]
        baud: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::load_or_default()?;

    match args.command {
        Command::List => {
            for port in list_ports()? {
                println!("{}\t{}", port.id, port.description);
            }
        }
        Command::Detect { port } => {
            let manager = ConnectionManager::with_system_ports(config);
            let result = manager.detect(&port)?;
            println!("{}", serde_json::to_string(&result)?);
        }
        Command::Scan { jobs } => {
            if let Some(jobs) = jobs {
                config.scan_pool_size = jobs;
            }
            let manager = ConnectionManager::with_system_ports(config);
            let ports = list_ports()?;
            for result in manager.scan_ports(&ports) {
                println!("{}", serde_json::to_string(&result)?);
            }
        }
        Command::Stream { port, baud } => {
            let manager = ConnectionManager::with_system_ports(config);
            let mut events = manager.subscribe();
            let info = manager.connect(&port, baud)?;
            eprintln!("connected to {} at {} baud", info.port, info.baud_rate);

            loop {
                tokio::select! {
                    _ = signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(EngineEvent::Record(record)) => {
                            println!("{}", serde_json::to_string(&record)?);
                        }
                        Ok(EngineEvent::SessionStateChanged {
                            state: SessionState::Error,
                            ..
                        }) => {
                            warn!(port = %port, "session entered error state");
                            break;
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(dropped = n, "subscriber lagging, records dropped");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }

            let snapshot = manager.stats(&port).unwrap_or_else(|_| {
                serial_harvester::StatsSnapshot {
                    port: port.clone(),
                    messages: 0,
                    bytes: 0,
                    errors: 0,
                    elapsed_seconds: 0.0,
                }
            });
            if let Err(e) = manager.shutdown() {
                warn!(error = %e, "shutdown reported a fault");
            }
            eprintln!(
                "{}: {} messages, {} bytes, {} errors in {:.1}s",
                snapshot.port, snapshot.messages, snapshot.bytes, snapshot.errors,
                snapshot.elapsed_seconds
            );
        }
    }

    Ok(())
}
