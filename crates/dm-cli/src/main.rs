mod error;
mod options;
mod store;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgMatches, Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use dm_driver::flags::create_flags;
use dm_driver::{Driver, FlagKind};
use tracing_subscriber::EnvFilter;

use crate::error::Result;
use crate::options::{MatchesOptions, driver_args};

#[derive(Parser)]
#[command(name = "docker-machine-driver-hetzner", version)]
#[command(about = "Docker Machine driver for Hetzner Cloud", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Machine {
    /// Name of the machine
    #[arg(long)]
    machine_name: String,

    /// Directory holding machine records and keys
    #[arg(long, env = "MACHINE_STORAGE_PATH")]
    storage_path: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// List the driver options with their environment variables
    Flags,
    /// Provision a new machine
    Create(Machine),
    /// Print the machine state
    State(Machine),
    Start(Machine),
    /// Shut the machine down gracefully
    Stop(Machine),
    Restart(Machine),
    /// Power the machine off
    Kill(Machine),
    /// Delete the server and the keys created for it
    Remove(Machine),
    /// Print the machine address
    Ip(Machine),
    /// Print the Docker daemon URL
    Url(Machine),
}

fn command() -> clap::Command {
    Cli::command().mut_subcommand("create", |create| create.args(driver_args()))
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let matches = command().get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    match run(cli, &matches).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, matches: &ArgMatches) -> Result<()> {
    let mut driver = match &cli.command {
        Command::Flags => {
            print_flags();
            return Ok(());
        }
        Command::Create(machine) => {
            let create = matches.subcommand_matches("create").unwrap_or(matches);
            return create_machine(machine, create).await;
        }
        Command::State(m)
        | Command::Start(m)
        | Command::Stop(m)
        | Command::Restart(m)
        | Command::Kill(m)
        | Command::Remove(m)
        | Command::Ip(m)
        | Command::Url(m) => store::load(&m.storage_path, &m.machine_name).await?,
    };

    match cli.command {
        Command::State(_) => println!("{}", driver.state().await?),
        Command::Start(_) => driver.start().await?,
        Command::Stop(_) => driver.stop().await?,
        Command::Restart(_) => driver.restart().await?,
        Command::Kill(_) => driver.kill().await?,
        Command::Remove(_) => {
            driver.remove().await?;
            return store::delete(&driver).await;
        }
        Command::Ip(_) => println!("{}", driver.ip()?),
        Command::Url(_) => println!("{}", driver.url().await?),
        Command::Flags | Command::Create(_) => {}
    }
    store::save(&driver).await
}

async fn create_machine(machine: &Machine, create: &ArgMatches) -> Result<()> {
    let mut driver = Driver::new(&machine.machine_name, &machine.storage_path)
        .with_version(env!("CARGO_PKG_VERSION"));
    driver.set_config_from_flags(&MatchesOptions::new(create))?;
    driver.pre_create_check().await?;

    let created = driver.create().await;
    // keep whatever was recorded, a server may exist even on failure
    store::save(&driver).await?;
    created?;

    tracing::info!(
        machine = %driver.machine_name(),
        server_id = ?driver.remote.server_id,
        ip = %driver.base.ip_address,
        "machine created"
    );
    Ok(())
}

fn print_flags() {
    for flag in create_flags() {
        let default = match &flag.kind {
            FlagKind::String(d) if !d.is_empty() => format!(" (default {d:?})"),
            FlagKind::Int(d) => format!(" (default {d})"),
            _ => String::new(),
        };
        println!("--{:<36} ${:<36} {}{default}", flag.name, flag.env_var, flag.usage);
    }
}
