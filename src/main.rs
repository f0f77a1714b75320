use clap::Parser;
use std::process::ExitCode;
use tidykit::cli::{Cli, run_cli_with_config};
use tidykit::output::OutputFormatter;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run_cli_with_config(&cli.command, cli.config.as_deref(), cli.output_format()) {
        Ok(outcome) if outcome.is_clean() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            OutputFormatter::error(&e);
            ExitCode::from(2)
        }
    }
}
