//! # luix CLI Entry Point
//!
//! Main binary for the luix RPC runtime.
//!
//! ## Usage
//!
//! ```bash
//! # Start a server carrying the built-in service
//! luix serve --address 127.0.0.1:26010
//!
//! # Start it and register it with a registry
//! luix serve --address 127.0.0.1:26010 --registry keystore://127.0.0.1:2181/keystore
//!
//! # Make a generic call (outputs raw JSON)
//! luix call 'luix://127.0.0.1:20880/com.acme.OrderService?group=default' placeOrder \
//!     --types String,u32 --args '["sku-1", 3]'
//!
//! # Print host information of a server
//! luix info 127.0.0.1:26010
//! ```

use anyhow::Result;
use argh::FromArgs;
use luix_cli::commands::{self, CallRequest, ServeOptions};
use luix_server::Application;

#[derive(FromArgs)]
/// luix - RPC runtime with pluggable discovery
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

/// Available CLI subcommands.
///
/// - **Serve**: Start a server exposing the built-in service
/// - **Call**: Make a single generic call (unix-friendly JSON output)
/// - **Info**: Print a server's host information
#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Call(CallArgs),
    Info(InfoArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// start a luix server
struct ServeArgs {
    /// address to bind the server to, port 0 picks a free port
    #[argh(option, short = 'a', default = "\"127.0.0.1:26010\".into()")]
    address: String,

    /// registry url to register the server with, may be repeated
    #[argh(option, short = 'r', long = "registry")]
    registries: Vec<String>,

    /// application name reported by the built-in service
    #[argh(option, long = "name")]
    name: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// make a generic call and print the JSON result
struct CallArgs {
    /// provider url, e.g. luix://127.0.0.1:20880/com.acme.OrderService
    #[argh(positional)]
    url: String,

    /// method name
    #[argh(positional)]
    method: String,

    /// comma separated parameter types
    #[argh(option, short = 't', default = "String::new()")]
    types: String,

    /// JSON array of arguments, or a single JSON value
    #[argh(option, short = 'a', default = "\"[]\".into()")]
    args: String,

    /// request timeout in milliseconds
    #[argh(option, long = "timeout", default = "3000")]
    timeout_ms: u64,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "info")]
/// print the host information of a server
struct InfoArgs {
    /// server address as host:port
    #[argh(positional)]
    address: String,

    /// request timeout in milliseconds
    #[argh(option, long = "timeout", default = "3000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call and info print JSON only, so they stay quiet for piping to jq
    if !matches!(cli.command, Commands::Call(_) | Commands::Info(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => {
            let mut application = Application::default();
            if let Some(name) = args.name {
                application.name = name;
            }
            let options = ServeOptions {
                address: args.address,
                registries: args.registries,
                application,
            };
            commands::run_serve(options, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for ctrl-c: {}", e);
                }
            })
            .await
        }
        Commands::Call(args) => {
            let request = CallRequest {
                url: args.url,
                method: args.method,
                types: commands::parse_types(&args.types),
                args: commands::parse_arguments(&args.args)?,
                timeout_ms: args.timeout_ms,
            };
            let result = commands::run_call(request).await?;
            println!("{}", serde_json::to_string(&result)?);
            Ok(())
        }
        Commands::Info(args) => {
            let info = commands::run_info(&args.address, args.timeout_ms).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
    }
}
