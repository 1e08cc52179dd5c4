//! Build automation tasks for NAT1 Traversal
//!
//! Run with: cargo xtask <command>

use clap::{Parser, Subcommand};
use std::process::Command;

/// Fuzz targets under `fuzz/`
const FUZZ_TARGETS: &[&str] = &["fuzz_stun_message", "fuzz_stun_response"];

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "NAT1 Traversal build automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests, or one package's
    Test {
        /// Package to test
        #[arg(short, long)]
        package: Option<String>,
    },

    /// Run clippy lints
    Lint,

    /// Check formatting
    Fmt {
        /// Rewrite files instead of checking
        #[arg(long)]
        fix: bool,
    },

    /// Run all CI checks
    Ci,

    /// Run the codec benchmarks
    Bench,

    /// Run a fuzz target (requires cargo-fuzz and nightly)
    Fuzz {
        /// Target name
        #[arg(default_value = "fuzz_stun_message")]
        target: String,

        /// Time budget in seconds
        #[arg(short, long, default_value_t = 60)]
        seconds: u64,
    },

    /// Generate documentation
    Doc {
        /// Open in a browser when done
        #[arg(long)]
        open: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Test { package } => match package {
            Some(package) => run_command("cargo", &["test", "-p", &package])?,
            None => run_command("cargo", &["test", "--workspace"])?,
        },
        Commands::Lint => {
            run_command("cargo", &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?;
        }
        Commands::Fmt { fix } => {
            if fix {
                run_command("cargo", &["fmt", "--all"])?;
            } else {
                run_command("cargo", &["fmt", "--all", "--check"])?;
            }
        }
        Commands::Ci => {
            println!("Running CI checks...");
            run_command("cargo", &["fmt", "--all", "--check"])?;
            run_command("cargo", &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?;
            run_command("cargo", &["test", "--workspace"])?;
            println!("All CI checks passed!");
        }
        Commands::Bench => {
            run_command("cargo", &["bench", "-p", "nat1-integration-tests", "--bench", "stun_codec"])?;
        }
        Commands::Fuzz { target, seconds } => {
            if !FUZZ_TARGETS.contains(&target.as_str()) {
                anyhow::bail!("unknown fuzz target {target}; expected one of {}", FUZZ_TARGETS.join(", "));
            }
            let budget = format!("-max_total_time={seconds}");
            run_command("cargo", &["+nightly", "fuzz", "run", &target, "--", &budget])?;
        }
        Commands::Doc { open } => {
            let mut args = vec!["doc", "--workspace", "--no-deps"];
            if open {
                args.push("--open");
            }
            run_command("cargo", &args)?;
        }
    }

    Ok(())
}

fn run_command(program: &str, args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new(program).args(args).status()?;

    if !status.success() {
        anyhow::bail!("{} {:?} failed", program, args);
    }

    Ok(())
}
