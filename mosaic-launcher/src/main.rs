use clap::Parser;
use mosaic_launcher::tracing_support::init_subscriber_with_config;
use mosaic_launcher::{run, Cli, EXIT_SYSTEM};

fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_subscriber_with_config(cli.tracing_config()) {
        eprintln!("warning: logging unavailable: {e}");
    }

    let code = match run(&cli, &mut std::io::stdout().lock()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            EXIT_SYSTEM
        }
    };
    std::process::exit(code);
}
