use clap::{Parser, Subcommand};
use colored::Colorize;
use env_logger::Env;

mod sync;

#[derive(Parser)]
#[command(name = "ksync")]
#[command(about = "Bidirectional sync between a declared circuit model and KiCad schematics")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long = "debug", global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync a declared circuit IR into a KiCad project
    #[command(alias = "s")]
    Sync(sync::SyncArgs),
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {e}", "Error:".red());
        for cause in e.chain().skip(1) {
            eprintln!("  {cause}");
        }
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env = if cli.debug { Env::default().default_filter_or("debug") } else { Env::default().default_filter_or("error") };
    env_logger::Builder::from_env(env).init();

    match cli.command {
        Commands::Sync(args) => sync::execute(args),
    }
}
