//! weightcache CLI binary

// CLI binary needs to output to stdout/stderr - this is intentional
#![allow(clippy::print_stdout, clippy::print_stderr)]

use weightcache::cli::{self, Cli, EXIT_OK, OkEnvelope, exit_code_for, render_error};
use weightcache::commands::{self, Outcome};
use weightcache::tracing::{TracingConfig, correlation_id, init_tracing};

fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();

    let tracing_config = TracingConfig {
        format: cli.log_format,
        level: cli.level.into(),
    };
    // Ignore error if tracing already initialized
    let _ = init_tracing(tracing_config);

    std::process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    let span = tracing::info_span!("weightcache", correlation_id = %correlation_id());
    let _guard = span.enter();

    match commands::run(cli) {
        Ok(outcome) => {
            print_outcome(&outcome, cli.json);
            EXIT_OK
        }
        Err(err) => {
            tracing::debug!(code = err.code(), "Command failed");
            render_error(&err, cli.json);
            exit_code_for(&err)
        }
    }
}

fn print_outcome(outcome: &Outcome, json: bool) {
    if json {
        match serde_json::to_string(&OkEnvelope::new(outcome)) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("Error serializing response: {e}"),
        }
    } else {
        println!("{}", outcome.text());
        for warning in outcome.warnings() {
            eprintln!("{warning}");
        }
    }
}
