//! Kernel example: launch the engine as a Jupyter kernel and run queries
//!
//! This example starts the engine with a generated connection file, runs
//! each query through an execution session, and prints the collected output.
//!
//! # Prerequisites
//!
//! - An engine binary that serves the Jupyter protocol, e.g.
//!   `sql-engine jupyter up --connection <file>`
//!
//! # Usage
//!
//! ```bash
//! cargo run --example kernel_session -- --engine target/debug/sql-engine "select 1 + 1" "select 1 + "
//! ```
//!
//! To attach to a kernel that is already running:
//! ```bash
//! cargo run --example kernel_session -- --connection ~/.local/share/jupyter/runtime/kernel-1.json "select 1"
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use kernelprobe::{KernelLauncher, SessionBuilder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let builder = SessionBuilder::new()
        .reply_timeout(Duration::from_secs(args.timeout))
        .poll_timeout(Duration::from_millis(100));

    let mut session = if let Some(connection) = &args.connection {
        println!("Connecting with {}...", connection.display());
        builder.connect_file(connection).await?
    } else {
        println!("Launching {} as a kernel...", args.engine);
        let launcher = KernelLauncher::new(&args.engine)
            .args(["jupyter", "up", "--connection", "{connection_file}"]);
        builder.launch(launcher).await?
    };
    println!("Kernel ready.");

    for query in &args.queries {
        println!("\n>>> {query}");
        match session.run(query).await {
            Ok(execution) => {
                println!("reply: {:?}", execution.reply.status);
                for item in &execution.batch {
                    println!(
                        "[{}] {}",
                        item.msg_type(),
                        item.text().unwrap_or_default()
                    );
                }
                for item in execution.batch.unrecognized() {
                    eprintln!("unrecognized notification: {}", item.msg_type());
                }
            }
            Err(e) => eprintln!("cycle failed: {e}"),
        }
    }

    println!("\nShutting down...");
    session.shutdown().await?;
    println!("Done!");

    Ok(())
}

/// Simple argument parser (avoiding external dependencies)
struct Args {
    engine: String,
    connection: Option<PathBuf>,
    timeout: u64,
    queries: Vec<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut engine = "sql-engine".to_string();
        let mut connection = None;
        let mut timeout = 5u64;
        let mut queries = Vec::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--engine" | "-e" => {
                    i += 1;
                    if i < args.len() {
                        engine = args[i].clone();
                    }
                }
                "--connection" | "-c" => {
                    i += 1;
                    if i < args.len() {
                        connection = Some(PathBuf::from(&args[i]));
                    }
                }
                "--timeout" | "-t" => {
                    i += 1;
                    if i < args.len() {
                        timeout = args[i].parse().unwrap_or(5);
                    }
                }
                "--help" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                query => queries.push(query.to_string()),
            }
            i += 1;
        }

        if queries.is_empty() {
            queries.push("select 1 + 1".to_string());
        }

        Self {
            engine,
            connection,
            timeout,
            queries,
        }
    }

    fn print_help() {
        println!(
            r#"kernelprobe kernel_session example

USAGE:
    cargo run --example kernel_session -- [OPTIONS] [QUERY]...

OPTIONS:
    -e, --engine <PATH>        Engine binary to launch [default: sql-engine]
    -c, --connection <FILE>    Attach to a running kernel instead of launching
    -t, --timeout <SECS>       Reply timeout [default: 5]
    --help                     Print this help message
"#
        );
    }
}
