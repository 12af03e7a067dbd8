use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the workspace tests
    Test,
    /// Run the CLI against a simulated bottle
    Simulate {
        /// Stream level sensor notifications
        #[arg(long)]
        notify: bool,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building project...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"], "Test")?;
        }
        Commands::Simulate { notify } => {
            println!("Running simulation...");
            let mut args = vec!["run", "-p", "drinkon-cli", "--", "simulate"];
            if *notify {
                args.push("--notify");
            }
            cargo(&args, "Simulation")?;
        }
    }

    Ok(())
}
