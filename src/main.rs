use clap::{Parser, Subcommand};
use ringkv::client::{GetOutcome, KvClient};
use ringkv::config::{ClientConfig, DEFAULT_REPLICATION_FACTOR, EcsConfig, NodeConfig};
use ringkv::ecs::Coordinator;
use ringkv::node::KvNode;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ringkv")]
#[command(about = "Partitioned, replicated key-value store", long_about = None)]
struct Args {
    /// Maximum log level (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator.
    Ecs {
        #[arg(long, default_value = "127.0.0.1:5000")]
        listen: SocketAddr,
        /// Optional HTTP address for the read-only admin API.
        #[arg(long)]
        admin: Option<SocketAddr>,
        #[arg(long, default_value_t = DEFAULT_REPLICATION_FACTOR)]
        replication_factor: usize,
    },
    /// Run a storage node.
    Node {
        /// Client-facing address; also the node's identity on the ring. Must name a
        /// concrete interface.
        #[arg(long)]
        listen: SocketAddr,
        /// Coordinator address.
        #[arg(long)]
        bootstrap: SocketAddr,
    },
    /// Send one request through the client router.
    Client {
        /// Any reachable storage node.
        #[arg(long)]
        server: SocketAddr,
        #[command(subcommand)]
        op: ClientOp,
    },
}

#[derive(Subcommand)]
enum ClientOp {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    Keyrange,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    match args.command {
        Command::Ecs {
            listen,
            admin,
            replication_factor,
        } => {
            let config = EcsConfig {
                listen,
                admin,
                replication_factor,
                ..EcsConfig::default()
            };
            let coordinator = Coordinator::new(config);
            let addr = coordinator.clone().start().await?;

            tracing::info!("Coordinator listening on {}", addr);
            tracing::info!("Press Ctrl+C to shutdown");

            tokio::signal::ctrl_c().await?;
            coordinator.stop();
        }
        Command::Node { listen, bootstrap } => {
            let node = KvNode::start(NodeConfig::new(listen, bootstrap)).await?;

            tracing::info!("Press Ctrl+C to leave the ring");

            tokio::select! {
                _ = node.stopped() => {
                    tracing::info!("Node stopped by coordinator");
                }
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    node.leave(Duration::from_secs(60)).await?;
                }
            }
        }
        Command::Client { server, op } => {
            let mut client = KvClient::new(server, ClientConfig::default());

            match op {
                ClientOp::Put { key, value } => {
                    let outcome = client.put(&key, &value).await?;
                    println!("{:?} {}", outcome, key);
                }
                ClientOp::Get { key } => match client.get(&key).await? {
                    GetOutcome::Found(value) => println!("{}", value),
                    GetOutcome::NotFound => println!("not found: {}", key),
                },
                ClientOp::Delete { key } => {
                    let outcome = client.delete(&key).await?;
                    println!("{:?} {}", outcome, key);
                }
                ClientOp::Keyrange => {
                    for entry in client.keyrange().await?.entries {
                        println!("{} {} {}", entry.id, entry.range.start, entry.range.end);
                    }
                }
            }
        }
    }

    Ok(())
}
