use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;

use commands::{app, command, db, host, sigil};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "datacenter")]
#[command(version = VERSION)]
#[command(about = "Run commands, lifecycle scripts and SQL against managed servers")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config root (defaults to $DATACENTER_HOME or ~/.config/datacenter)
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage hosts and run commands on them
    #[command(visible_alias = "server")]
    Host(host::HostArgs),
    /// Manage applications and drive their lifecycle
    App(app::AppArgs),
    /// Manage databases and run SQL batches
    Db(db::DbArgs),
    /// Manage command templates and dispatch them at targets
    Command(command::CommandArgs),
    /// Render sigil templates
    Sigil(sigil::SigilArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .parse_default_env()
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .init();

    let global = GlobalArgs {
        config_dir: cli.config_dir,
    };

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    if let Err(err) = output::print_json_result(json_result) {
        eprintln!("{}", err);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
