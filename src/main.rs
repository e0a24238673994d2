//! SHARP CLI Application
//!
//! Runs a SHARP mail node and talks to remote ones.

use clap::{Parser, Subcommand};
use sharp_mail::cli::{self, Draft};
use sharp_mail::config;
use sharp_mail::crypto::GOOD_BITS;
use sharp_mail::network::DEFAULT_DELIVERY_TIMEOUT;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sharp")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "A SHARP mail transfer node in Rust", long_about = None)]
struct Cli {
    /// TOML config file; SHARP_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the SHARP listener, HTTP API and scheduler
    Serve {
        /// Mail domain this node serves
        #[arg(long)]
        domain: Option<String>,

        /// SHARP listener port
        #[arg(short, long)]
        port: Option<u16>,

        /// HTTP API port (defaults to SHARP port + 1)
        #[arg(long)]
        http_port: Option<u16>,

        /// Data directory for mail storage
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Submit a message through a server's HTTP API
    Send {
        /// Base URL of the submitting server's HTTP API
        #[arg(short, long, default_value = "http://localhost:5001")]
        server: String,

        /// Bearer token identifying the sender
        #[arg(long)]
        token: String,

        #[command(flatten)]
        message: MessageArgs,

        /// Stamp difficulty in bits
        #[arg(short, long, default_value_t = GOOD_BITS)]
        bits: u32,

        /// Deliver at this RFC 3339 time instead of now
        #[arg(long)]
        at: Option<String>,
    },

    /// Deliver a message directly to the recipient's SHARP host
    Deliver {
        #[command(flatten)]
        message: MessageArgs,

        /// Deadline for connecting and completing the handshake
        #[arg(long, default_value_t = DEFAULT_DELIVERY_TIMEOUT.as_secs())]
        timeout: u64,
    },

    /// Hashcash stamp operations
    Hashcash {
        #[command(subcommand)]
        action: HashcashCommands,
    },

    /// Locate and validate the SHARP host for an address or domain
    Discover {
        /// `user#domain[:port]` or a bare domain
        target: String,
    },
}

#[derive(clap::Args)]
struct MessageArgs {
    /// Sender address (user#domain)
    #[arg(short, long)]
    from: String,

    /// Recipient address (user#domain[:port])
    #[arg(short, long)]
    to: String,

    #[arg(long, default_value = "")]
    subject: String,

    #[arg(long, default_value = "")]
    body: String,
}

impl From<MessageArgs> for Draft {
    fn from(args: MessageArgs) -> Self {
        Draft {
            from: args.from,
            to: args.to,
            subject: args.subject,
            body: args.body,
        }
    }
}

#[derive(Subcommand)]
enum HashcashCommands {
    /// Mint a stamp for a resource
    Mint {
        /// Resource, normally the recipient address
        resource: String,

        #[arg(short, long, default_value_t = GOOD_BITS)]
        bits: u32,
    },
    /// Score a stamp against a resource
    Check {
        /// Full stamp header
        header: String,

        /// Resource the stamp must name
        resource: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Hashcash commands are pure CPU and need no runtime
    if let Commands::Hashcash { action } = &cli.command {
        return match action {
            HashcashCommands::Mint { resource, bits } => cli::cmd_hashcash_mint(resource, *bits),
            HashcashCommands::Check { header, resource } => {
                cli::cmd_hashcash_check(header, resource)
            }
        };
    }

    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Hashcash { .. } => Ok(()),

        Commands::Serve {
            domain,
            port,
            http_port,
            data_dir,
        } => {
            let mut config = config::load(cli.config.as_deref())?;
            if let Some(domain) = domain {
                config.domain = domain;
            }
            if let Some(port) = port {
                config.sharp_port = port;
            }
            if http_port.is_some() {
                config.http_port = http_port;
            }
            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }
            rt.block_on(cli::cmd_serve(config))
        }

        Commands::Send {
            server,
            token,
            message,
            bits,
            at,
        } => rt.block_on(cli::cmd_send(
            &server,
            &token,
            message.into(),
            bits,
            at.as_deref(),
        )),

        Commands::Deliver { message, timeout } => {
            rt.block_on(cli::cmd_deliver(message.into(), timeout))
        }

        Commands::Discover { target } => rt.block_on(cli::cmd_discover(&target)),
    }
}
