use clap::{crate_name, Parser};
use sysimaged::Cli;

/// Binary entrypoint.
fn main() {
    let exit_code = run_cli();
    std::process::exit(exit_code);
}

fn run_cli() -> i32 {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .format_module_path(false)
        .filter(Some(crate_name!()), cli.loglevel())
        .init();

    log::trace!("executing sysimaged");

    let config = match cli.into_config().validate() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return 1;
        }
    };

    match sysimaged::run(config) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {:#}", e);
            1
        }
    }
}
