use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use dockerhub_exporter::config::{RawOptions, DEFAULT_LISTEN};
use std::path::PathBuf;

pub fn build_cli() -> Command {
    Command::new("dockerhub-exporter")
        .about("Prometheus collector for Docker Hub rate limits")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .num_args(1)
                .value_parser(value_parser!(i64))
                .default_value("8000")
                .allow_negative_numbers(true)
                .help("Port to expose metrics to"),
        )
        .arg(
            Arg::new("listen")
                .short('l')
                .long("listen")
                .num_args(1)
                .default_value(DEFAULT_LISTEN)
                .help("Address to listen from"),
        )
        .arg(
            Arg::new("tls-crt")
                .long("tls-crt")
                .num_args(1)
                .value_parser(value_parser!(PathBuf))
                .help("TLS certificate file for HTTPS"),
        )
        .arg(
            Arg::new("tls-key")
                .long("tls-key")
                .num_args(1)
                .value_parser(value_parser!(PathBuf))
                .help("TLS private key file for HTTPS"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .num_args(1)
                .value_parser(value_parser!(i64))
                .default_value("15")
                .allow_negative_numbers(true)
                .help("Timeout of requests in seconds towards Docker Hub"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logs")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("version")
                .long("version")
                .help("Print version and exit")
                .action(ArgAction::SetTrue),
        )
}

pub fn raw_options(matches: &ArgMatches) -> RawOptions {
    let defaults = RawOptions::default();
    RawOptions {
        port: matches.get_one::<i64>("port").copied().unwrap_or(defaults.port),
        listen: matches
            .get_one::<String>("listen")
            .cloned()
            .unwrap_or(defaults.listen),
        tls_crt: matches.get_one::<PathBuf>("tls-crt").cloned(),
        tls_key: matches.get_one::<PathBuf>("tls-key").cloned(),
        timeout_secs: matches
            .get_one::<i64>("timeout")
            .copied()
            .unwrap_or(defaults.timeout_secs),
        verbose: matches.get_flag("verbose"),
    }
}

pub fn init_logging(verbose: bool) {
    // --verbose wins; otherwise RUST_LOG, falling back to info.
    let env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(env);
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
}
