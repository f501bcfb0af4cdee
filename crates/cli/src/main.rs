use clap::{Parser, Subcommand};
use lib::client::{ConversationAddress, RelayClient, RelayError, RelayPoller};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "pibot")]
#[command(about = "Pibot CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config record.
    Init {
        /// Config file path (default: PIBOT_CONFIG_PATH or ~/.pibot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway (HTTP API, Telegram relay, completion proxy).
    Serve {
        /// Config file path (default: PIBOT_CONFIG_PATH or ~/.pibot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 3000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Relay a Telegram conversation through a running gateway: type to send,
    /// replies are polled and printed. Ctrl+C to quit.
    Relay {
        /// Config file path (default: PIBOT_CONFIG_PATH or ~/.pibot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Chat id (default from the config record)
        #[arg(long, value_name = "ID")]
        chat: Option<String>,

        /// Topic id within the chat (default from the config record)
        #[arg(long, value_name = "ID")]
        topic: Option<String>,

        /// Gateway base URL (default built from the config record)
        #[arg(long, value_name = "URL")]
        gateway: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("pibot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("gateway failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Relay {
            config,
            chat,
            topic,
            gateway,
        }) => {
            if let Err(e) = run_relay(config, chat, topic, gateway).await {
                log::error!("relay failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{}",
        config.gateway.bind,
        config.gateway.port
    );
    lib::gateway::run_gateway(config, path).await
}

async fn run_relay(
    config_path: Option<std::path::PathBuf>,
    chat: Option<String>,
    topic: Option<String>,
    gateway: Option<String>,
) -> anyhow::Result<()> {
    let (config, _path) = lib::config::load_config(config_path)?;

    let address = match chat {
        Some(chat_id) => ConversationAddress {
            chat_id,
            topic_id: topic,
        },
        None => {
            let mut address = ConversationAddress::from_config(&config)?;
            if topic.is_some() {
                address.topic_id = topic;
            }
            address
        }
    };
    let base_url = gateway.unwrap_or_else(|| {
        format!("http://{}:{}", config.gateway.bind, config.gateway.port)
    });

    let client = RelayClient::new(base_url);
    let interval = Duration::from_millis(config.telegram.polling_interval_ms);
    let (display_tx, mut display_rx) = mpsc::channel(64);
    let handle = RelayPoller::new(client.clone(), address.clone(), interval).start(display_tx);

    match &address.topic_id {
        Some(topic) => println!(
            "relaying chat {} topic {}; type a message and press enter, Ctrl+C to quit",
            address.chat_id, topic
        ),
        None => println!(
            "relaying chat {}; type a message and press enter, Ctrl+C to quit",
            address.chat_id
        ),
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            maybe = display_rx.recv() => {
                match maybe {
                    Some(msg) => println!("(telegram) {}: {}", msg.sender, msg.content),
                    None => break,
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(text) => {
                        let text = text.trim();
                        if text.is_empty() {
                            continue;
                        }
                        match client.send(&address, text).await {
                            Ok(sent) => {
                                log::debug!("sent message {:?}", sent.message_id);
                            }
                            Err(e @ RelayError::Unavailable(_)) => eprintln!("{}", e),
                            Err(e @ RelayError::Rejected(_)) => eprintln!("delivery failed: {}", e),
                            Err(e @ RelayError::Network(_)) => eprintln!("{}", e),
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.stop().await;
    println!("relay stopped");
    Ok(())
}
