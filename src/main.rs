use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, Level};

use qos_ofp::decision::{FlowDecisionEngine, DEFAULT_HARD_TIMEOUT};
use qos_ofp::learning::SharedLearningTable;
use qos_ofp::ofp_controller::OfpController;
use qos_ofp::policy::PolicyRuleSet;
use qos_ofp::qos_switch::QosSwitch;

#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    /// JSON file holding the policy rules.
    #[clap(long)]
    policy: PathBuf,

    /// Address to accept switch connections on.
    #[clap(long, default_value = "127.0.0.1:6633")]
    listen: String,

    /// Seconds installed flows live for; 0 keeps them until removed.
    #[clap(long, default_value_t = DEFAULT_HARD_TIMEOUT)]
    hard_timeout: u16,

    /// Log every packet-in and decision.
    #[clap(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_max_level(level).init();

    let rules = Arc::new(PolicyRuleSet::load(&args.policy)?);
    let known_hosts = SharedLearningTable::new();
    let listener = TcpListener::bind(&args.listen)
        .with_context(|| format!("could not listen on {}", args.listen))?;
    info!("listening for switches on {}", args.listen);

    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                error!("accepting connection: {}", e);
                continue;
            }
        };
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_default();
        info!("connection from {}", peer);
        let engine = FlowDecisionEngine::new(rules.clone(), args.hard_timeout);
        let known_hosts = known_hosts.clone();
        std::thread::spawn(move || {
            let mut switch = QosSwitch::new(engine, known_hosts);
            if let Err(e) = switch.handle_client_connected(&mut stream) {
                error!("connection from {} failed: {}", peer, e);
            }
        });
    }
    Ok(())
}
