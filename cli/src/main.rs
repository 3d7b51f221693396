mod commands;
mod terminal;

use std::process::ExitCode;

use commands::{CommandLine, Commands, ping, trace};
use terminal::{logging, print};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let commands = CommandLine::parse_args();
    let cfg = commands.config();

    logging::init_logging(&cfg, commands.verbose);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted, stopping");
            on_interrupt.cancel();
        }
    });

    let answered = match &commands.command {
        Commands::Ping(args) => ping::ping(args, &cfg, &cancel).await?,
        Commands::Trace(args) => trace::trace(args, &cfg, &cancel).await?,
    };

    if !cfg.is_json() {
        print::end_of_program(cfg.quiet);
    }

    Ok(if answered {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
