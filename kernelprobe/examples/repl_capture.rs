//! REPL example: feed the engine's interactive mode and capture what it prints
//!
//! The interactive mode never exits on its own, so the run is killed after a
//! short settle period. Output is stripped of terminal escapes and version
//! strings are redacted, as a snapshot test would want.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example repl_capture -- --engine target/debug/sql-engine
//! ```

use std::env;
use std::time::Duration;

use kernelprobe::CliRunner;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let engine = parse_engine();
    let cli = CliRunner::new(&engine).settle(Duration::from_millis(500));

    println!("Executing: {engine} --version");
    let version = cli.command(["--version"]).redact().run().await?;
    println!("{}", version.stdout.trim_end());

    println!("\nExecuting: {engine} (interactive)");
    println!("{}", "-".repeat(50));
    let repl = cli
        .command(Vec::<String>::new())
        .communicate(".timer off\nselect 1 + 1;\n")
        .kill()
        .redact()
        .run()
        .await?;
    print!("{}", repl.stdout);
    println!("{}", "-".repeat(50));
    if !repl.stderr.is_empty() {
        eprintln!("stderr:\n{}", repl.stderr);
    }
    println!("success: {} (killed runs never succeed)", repl.success);

    Ok(())
}

fn parse_engine() -> String {
    let args: Vec<String> = env::args().collect();
    match args.iter().position(|arg| arg == "--engine" || arg == "-e") {
        Some(i) if i + 1 < args.len() => args[i + 1].clone(),
        _ => "sql-engine".to_string(),
    }
}
