//! LSF Node - lighting fleet controller daemon
//!
//! Runs one controller: mDNS discovery of peers and lamps, leader election
//! and blob sync over UDP, client method calls over UDP, and a small stdin
//! console.

use clap::Parser;
use lsf_core::clock::MonotonicClock;
use lsf_core::discovery::Discovery;
use lsf_core::election::ControllerMessage;
use lsf_core::lamp::LampLink;
use lsf_core::lamp_link::UdpLampLink;
use lsf_core::service::run_controller_network;
use lsf_core::sim::SimLampLink;
use lsf_core::{ControllerConfig, ControllerService, MethodCall, Transport};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Lighting fleet controller node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON config file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node name/identifier
    #[arg(short, long)]
    name: Option<String>,

    /// Directory for the entity blob files
    #[arg(short, long)]
    storage_dir: Option<PathBuf>,

    /// UDP port for controller-to-controller messages
    #[arg(long)]
    controller_port: Option<u16>,

    /// UDP port for client method calls
    #[arg(long)]
    client_port: Option<u16>,

    /// Local UDP port of the lamp link
    #[arg(long)]
    lamp_port: Option<u16>,

    /// Simulate this many lamps in memory instead of using the network
    #[arg(long, default_value = "0")]
    sim_lamps: usize,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

enum Command {
    Lamps,
    Groups,
    Presets,
    Scenes,
    MasterScenes,
    Leader,
    Apply(String),
}

fn load_config(args: &Args) -> Result<ControllerConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::default(),
    };
    if let Some(name) = &args.name {
        config.node_id = name.clone();
    }
    if let Some(dir) = &args.storage_dir {
        config.storage_dir = dir.clone();
    }
    if let Some(port) = args.controller_port {
        config.controller_port = port;
    }
    if let Some(port) = args.client_port {
        config.client_port = port;
    }
    if let Some(port) = args.lamp_port {
        config.lamp_port = port;
    }
    Ok(config)
}

fn print_ids(kind: &str, ids: Result<Vec<String>, lsf_core::LsfError>) {
    match ids {
        Ok(ids) if ids.is_empty() => println!("No {}", kind),
        Ok(ids) => {
            for id in ids {
                println!("  {}", id);
            }
        }
        Err(e) => println!("Cannot list {}: {}", kind, e),
    }
}

async fn run_command(service: &ControllerService, command: Command) {
    match command {
        Command::Lamps => {
            for id in service.lamps().get_all_ids() {
                let state = service.lamp_clients().connection_state(&id);
                println!("  {} {:?}", id, state);
            }
        }
        Command::Groups => print_ids("lamp groups", service.lamp_groups().get_all_ids()),
        Command::Presets => print_ids("presets", service.presets().get_all_ids()),
        Command::Scenes => print_ids("scenes", service.scenes().get_all_ids()),
        Command::MasterScenes => print_ids("master scenes", service.master_scenes().get_all_ids()),
        Command::Leader => match service.leader().await {
            Some(leader) if &leader == service.node_id() => println!("This node is leader"),
            Some(leader) => println!("Leader: {}", leader),
            None => println!("No leader yet"),
        },
        Command::Apply(scene) => match service.scenes().apply(&[scene.clone()]).await {
            Ok(reply) => println!(
                "Applied {}: {} ({} ok, {} failed, {} not found)",
                scene,
                reply.code,
                reply.counter.success_count,
                reply.counter.fail_count,
                reply.counter.not_found_count
            ),
            Err(e) => println!("Apply {} failed: {}", scene, e),
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    info!("LSF node \"{}\" starting", config.node_id);

    // Lamp link
    let sim = Arc::new(SimLampLink::new());
    let link: Arc<dyn LampLink> = if args.sim_lamps > 0 {
        sim.clone() as Arc<dyn LampLink>
    } else {
        UdpLampLink::bind(config.lamp_port, config.fanout.method_timeout()).await? as Arc<dyn LampLink>
    };

    let service = Arc::new(ControllerService::new(
        config.clone(),
        link,
        Arc::new(MonotonicClock::new()),
    )?);
    let handle = service.start()?;

    for i in 0..args.sim_lamps {
        let id = format!("lamp{}", i + 1);
        let endpoint = sim.add_lamp(&id, &format!("Lamp {}", i + 1));
        service.lamp_clients().lamp_found(endpoint);
    }

    // Controller network
    let transport = Arc::new(Transport::<ControllerMessage>::new(config.controller_port).await?);
    info!("Controller messages on {}", transport.local_addr()?);
    let incoming = transport.start_receive(256);

    let discovery = Discovery::new(config.node_id.clone())?;
    discovery.announce(service.rank(), config.controller_port)?;
    let (discovery_tx, discovery_rx) = mpsc::channel(64);
    discovery.browse(discovery_tx)?;

    tokio::spawn(run_controller_network(
        transport,
        incoming,
        discovery_rx,
        handle,
        service.lamp_clients().clone(),
    ));

    // Client method calls
    let clients = Arc::new(Transport::<MethodCall>::new(config.client_port).await?);
    info!("Client methods on {}", clients.local_addr()?);
    let mut calls = clients.start_receive(256);
    let client_service = service.clone();
    tokio::spawn(async move {
        while let Some((call, src)) = calls.recv().await {
            let service = client_service.clone();
            let clients = clients.clone();
            tokio::spawn(async move {
                let reply = service.dispatch(call).await;
                if let Err(e) = clients.send(&reply, src).await {
                    warn!("Failed to reply to {}: {}", src, e);
                }
            });
        }
    });

    // Log every signal
    let mut signals = service.notifications().subscribe();
    tokio::spawn(async move {
        loop {
            match signals.recv().await {
                Ok(n) => info!("Signal {}: {:?}", n.signal_name(), n.ids),
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} signals", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Spawn stdin handler
    let (command_tx, mut command_rx) = mpsc::channel::<Command>(16);
    std::thread::spawn(move || {
        println!("\nCommands:");
        println!("  lamps | groups | presets | scenes | masterscenes");
        println!("  leader                 - Show the current leader");
        println!("  apply <scene>          - Apply a scene");
        println!("  quit                   - Exit\n");

        let stdin = io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let command = match parts.as_slice() {
                [] => continue,
                ["lamps"] => Command::Lamps,
                ["groups"] => Command::Groups,
                ["presets"] => Command::Presets,
                ["scenes"] => Command::Scenes,
                ["masterscenes"] => Command::MasterScenes,
                ["leader"] => Command::Leader,
                ["apply", scene] => Command::Apply(scene.to_string()),
                ["quit"] | ["exit"] => break,
                _ => {
                    println!("Unknown command. Try: lamps, groups, leader, apply <scene>");
                    continue;
                }
            };
            if command_tx.blocking_send(command).is_err() {
                break;
            }
        }
    });

    // Main loop: console commands until quit or Ctrl-C
    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(command) => run_command(&service, command).await,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("LSF node \"{}\" shutting down", config.node_id);
    if let Err(e) = discovery.shutdown() {
        warn!("mDNS shutdown failed: {}", e);
    }
    Ok(())
}
