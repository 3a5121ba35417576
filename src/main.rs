use std::{
    io::{self, Error, ErrorKind},
    path::PathBuf,
    time::Duration,
};

use clap::{crate_version, value_parser, Arg, ArgMatches, Command};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

pub mod change;
pub mod clock;
pub mod config;
pub mod convergence;
pub mod errors;
pub mod probe;
pub mod resolve;
pub mod stack;
pub mod writer;
pub mod zone;

const APP_NAME: &str = "dns-propagation-probe";

#[tokio::main]
async fn main() -> io::Result<()> {
    let matches = Command::new(APP_NAME)
        .version(crate_version!())
        .about("Measures DNS record propagation and provisions CloudFormation stacks")
        .arg(
            Arg::new("LOG_LEVEL")
                .long("log-level")
                .short('l')
                .help("Sets the log level")
                .required(false)
                .global(true)
                .num_args(1)
                .value_parser(["debug", "info"])
                .default_value("info"),
        )
        .subcommand_required(true)
        .subcommands(vec![probe_command(), stack_command()])
        .get_matches();

    let log_level = matches
        .get_one::<String>("LOG_LEVEL")
        .cloned()
        .unwrap_or_else(|| String::from("info"));
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, log_level),
    );

    match matches.subcommand() {
        Some(("probe", sub_matches)) => execute_probe(sub_matches).await,
        Some(("stack", sub_matches)) => execute_stack(sub_matches).await,
        _ => Err(Error::new(ErrorKind::InvalidInput, "unknown subcommand")),
    }
}

fn probe_command() -> Command {
    Command::new("probe")
        .about("Repeatedly changes a record and logs how long it takes to propagate")
        .arg(
            Arg::new("CONFIG_FILE_PATH")
                .long("config")
                .short('c')
                .help("The probe configuration file to load")
                .required(false)
                .num_args(1)
                .value_parser(value_parser!(PathBuf))
                .default_value("./probe.yaml"),
        )
}

fn stack_command() -> Command {
    Command::new("stack")
        .about("Submits CloudFormation templates and waits for them to settle")
        .subcommand_required(true)
        .subcommands(vec![
            Command::new("create")
                .about("Creates the stack and polls until it completes")
                .arg(stack_name_arg())
                .arg(region_arg())
                .arg(
                    Arg::new("TEMPLATE_FILE_PATH")
                        .long("template-file")
                        .short('t')
                        .help("The template body to submit")
                        .required(true)
                        .num_args(1)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("INTERVAL_SECS")
                        .long("interval-secs")
                        .help("Seconds between status checks")
                        .required(false)
                        .num_args(1)
                        .value_parser(value_parser!(u64))
                        .default_value("10"),
                )
                .arg(
                    Arg::new("TIMEOUT_SECS")
                        .long("timeout-secs")
                        .help("Gives up waiting after this many seconds")
                        .required(false)
                        .num_args(1)
                        .value_parser(value_parser!(u64)),
                ),
            Command::new("outputs")
                .about("Prints the stack outputs as JSON")
                .arg(stack_name_arg())
                .arg(region_arg()),
        ])
}

fn stack_name_arg() -> Arg {
    Arg::new("STACK_NAME")
        .long("stack-name")
        .short('n')
        .help("The stack name")
        .required(true)
        .num_args(1)
}

fn region_arg() -> Arg {
    Arg::new("REGION")
        .long("region")
        .short('r')
        .help("The region (defaults to the provider chain)")
        .required(false)
        .num_args(1)
}

async fn execute_probe(matches: &ArgMatches) -> io::Result<()> {
    let config_path = matches
        .get_one::<PathBuf>("CONFIG_FILE_PATH")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("./probe.yaml"));
    let config = config::parse(&config_path).map_err(other)?;
    info!("loaded probe configuration from {}", config_path.display());

    let sdk_config = config::sdk_config(config.region.clone()).await;
    let zone = zone::Route53Zone::new(&sdk_config);
    let resolver = resolve::TrustDnsResolver::from_system_conf().map_err(other)?;

    let strategy = match config.strategy {
        config::StrategyKind::Status => convergence::ConvergenceStrategy::StatusPolling,
        config::StrategyKind::Replica => {
            probe::replica_strategy(&resolver, &config.replicas, config.replica_mode)
                .await
                .map_err(other)?
        }
    };

    let log = writer::ProbeLog::open(&config.log_file)?;
    let settings = probe::ProbeSettings {
        zone_id: config.zone_id.clone(),
        comment: config.comment.clone(),
        record: config.record.clone(),
        strategy,
        policy: config.poll_policy(),
        cadence: config.cadence(),
        delay_first_iteration: config.delay_first_iteration,
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, stopping probe"),
            Err(e) => warn!("unable to listen for interrupt: {}", e),
        }
        signal_cancel.cancel();
    });

    let mut propagation_probe = probe::PropagationProbe::new(
        zone,
        resolver,
        clock::SystemClock,
        log,
        settings,
        cancel,
    );
    propagation_probe.run().await.map_err(other)
}

async fn execute_stack(matches: &ArgMatches) -> io::Result<()> {
    let (action, sub_matches) = match matches.subcommand() {
        Some(subcommand) => subcommand,
        None => return Err(Error::new(ErrorKind::InvalidInput, "missing stack subcommand")),
    };
    let stack_name = sub_matches
        .get_one::<String>("STACK_NAME")
        .cloned()
        .unwrap_or_default();
    let region = sub_matches.get_one::<String>("REGION").cloned();
    let sdk_config = config::sdk_config(region).await;
    let stack = stack::Stack::new(stack_name, &sdk_config);

    let outputs = match action {
        "create" => {
            let template_file = sub_matches
                .get_one::<PathBuf>("TEMPLATE_FILE_PATH")
                .cloned()
                .unwrap_or_default();
            let interval = Duration::from_secs(
                sub_matches
                    .get_one::<u64>("INTERVAL_SECS")
                    .copied()
                    .unwrap_or(10),
            );
            let timeout = sub_matches
                .get_one::<u64>("TIMEOUT_SECS")
                .map(|secs| Duration::from_secs(*secs));

            stack.create(&template_file).await.map_err(other)?;
            info!("waiting for stack '{}' creation", stack.stack_name);
            stack.wait(interval, timeout).await.map_err(other)?
        }
        "outputs" => stack.get_outputs().await.map_err(other)?,
        _ => return Err(Error::new(ErrorKind::InvalidInput, "unknown stack subcommand")),
    };

    println!("{}", stack::outputs_json(&outputs).map_err(other)?);
    Ok(())
}

fn other<E: std::fmt::Display>(e: E) -> Error {
    Error::new(ErrorKind::Other, e.to_string())
}
