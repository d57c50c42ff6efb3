use crate::demo::{run_demo, run_rules, DemoArgs, RulesArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use gigflow::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "gigflow",
    about = "Run and inspect the gig job lifecycle service from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Print the effective penalty rule table and its escalation ladder
    Rules(RulesArgs),
    /// Walk a job through staffing, a no-show, cancellation and completion in memory
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Penalty rule table (JSON); defaults to PENALTY_RULES_PATH or the built-in table
    #[arg(long)]
    pub(crate) rules: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Rules(args) => run_rules(args),
        Command::Demo(args) => run_demo(args),
    }
}
