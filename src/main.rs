mod cli;

use dockerhub_exporter::config::{self, Credentials};
use dockerhub_exporter::http::RateLimitFetcher;
use dockerhub_exporter::metrics::MetricsAdapter;
use dockerhub_exporter::server;
use log::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli::build_cli().get_matches();
    if matches.get_flag("version") {
        println!("dockerhub-exporter {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let opts = cli::raw_options(&matches);
    cli::init_logging(opts.verbose);

    let cfg = match config::validate(&opts) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Error validating arguments: {}", e);
            std::process::exit(1);
        }
    };
    let credentials = match Credentials::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let fetcher = RateLimitFetcher::new()?;
    let adapter = MetricsAdapter::new(fetcher, credentials, cfg.timeout);
    if let Err(e) = server::run(&cfg, adapter).await {
        error!("Exporter stopped: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
