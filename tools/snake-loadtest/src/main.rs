use clap::Parser;

use snake_loadtest::report::{EXIT_FAIL, EXIT_USAGE};
use snake_loadtest::{Cli, LoadTestConfig, run_load_test, trace};

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = Cli::parse();
    let output_json = cli.json;

    if let Err(err) = trace::init(&cli.log, cli.log_format) {
        eprintln!("failed to initialize logging: {err:#}");
        return EXIT_USAGE;
    }
    let config = match LoadTestConfig::try_from(cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            return EXIT_USAGE;
        }
    };

    let report = match run_load_test(config).await {
        Ok(report) => report,
        Err(err) => {
            eprintln!("run failed: {err:#}");
            return EXIT_FAIL;
        }
    };
    match report.render(output_json) {
        Ok(output) => println!("{output}"),
        Err(err) => {
            eprintln!("failed to serialize report: {err:#}");
            return EXIT_USAGE;
        }
    }
    report.exit_code()
}
