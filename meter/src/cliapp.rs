//! The definition of the command line app.
use std::path::PathBuf;

use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, Command, value_parser};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Collects system metrics and aggregates them on a central collector.";

/// Flags that configure the signature and encryption, shared by the server and the agent.
fn auth_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("key")
                .long("key")
                .short('k')
                .value_name("SECRET")
                .env("KEY")
                .hide_env_values(true)
                .help("The shared secret for payload signatures."),
        )
        .arg(
            Arg::new("crypto_key")
                .long("crypto-key")
                .value_name("PATH")
                .env("CRYPTO_KEY")
                .help(
                    "The PEM encoded RSA key. The server expects the private key, the agent the \
                     public key.",
                ),
        )
}

fn server_command() -> Command {
    let command = Command::new("server")
        .about("Run the collector")
        .after_help(
            "This runs the collector in the foreground until it receives SIGINT or SIGTERM. \
             It serves the HTTP API and, if configured, the gRPC services.",
        )
        .arg(
            Arg::new("address")
                .long("address")
                .short('a')
                .value_name("ADDR")
                .env("ADDRESS")
                .help("The address of the HTTP listener, for example 127.0.0.1:8080."),
        )
        .arg(
            Arg::new("grpc_address")
                .long("grpc-address")
                .value_name("ADDR")
                .env("GRPC_ADDRESS")
                .help("The address of the gRPC listener. Empty disables gRPC."),
        )
        .arg(
            Arg::new("store_interval")
                .long("store-interval")
                .short('i')
                .value_name("SECONDS")
                .env("STORE_INTERVAL")
                .help("Seconds between snapshot dumps, 0 writes after every update."),
        )
        .arg(
            Arg::new("file_storage_path")
                .long("file-storage-path")
                .short('f')
                .value_name("PATH")
                .env("FILE_STORAGE_PATH")
                .help("The snapshot file of the file storage."),
        )
        .arg(
            Arg::new("restore")
                .long("restore")
                .short('r')
                .value_name("BOOL")
                .env("RESTORE")
                .help("Whether to load the snapshot file on startup."),
        )
        .arg(
            Arg::new("database_dsn")
                .long("database-dsn")
                .short('d')
                .value_name("DSN")
                .env("DATABASE_DSN")
                .help("The database connection string. Takes precedence over the snapshot file."),
        )
        .arg(
            Arg::new("trusted_subnet")
                .long("trusted-subnet")
                .short('t')
                .value_name("CIDR")
                .env("TRUSTED_SUBNET")
                .help("Reject requests whose X-Real-IP is outside of this network."),
        );

    auth_args(command)
}

fn agent_command() -> Command {
    let command = Command::new("agent")
        .about("Run the reporting agent")
        .after_help(
            "This samples system statistics on the poll interval and reports them to the \
             collector on the report interval until it receives SIGINT or SIGTERM.",
        )
        .arg(
            Arg::new("address")
                .long("address")
                .short('a')
                .value_name("URL")
                .env("ADDRESS")
                .help("The collector to report to, for example http://127.0.0.1:8080."),
        )
        .arg(
            Arg::new("transport")
                .long("transport")
                .value_name("PROTOCOL")
                .env("TRANSPORT")
                .value_parser(PossibleValuesParser::new(["http", "grpc"]))
                .help("The delivery protocol."),
        )
        .arg(
            Arg::new("batch")
                .long("batch")
                .value_name("BOOL")
                .env("BATCH")
                .help("Whether all metrics of a report are sent in one request."),
        )
        .arg(
            Arg::new("report_interval")
                .long("report-interval")
                .short('r')
                .value_name("SECONDS")
                .env("REPORT_INTERVAL")
                .help("Seconds between two reports."),
        )
        .arg(
            Arg::new("poll_interval")
                .long("poll-interval")
                .short('p')
                .value_name("SECONDS")
                .env("POLL_INTERVAL")
                .help("Seconds between two samples."),
        )
        .arg(
            Arg::new("rate_limit")
                .long("rate-limit")
                .short('l')
                .value_name("WORKERS")
                .env("RATE_LIMIT")
                .help("The number of concurrent delivery workers."),
        );

    auth_args(command)
}

fn keys_command() -> Command {
    Command::new("keys")
        .about("Manage the encryption keys")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("generate")
                .about("Generate a new RSA key pair")
                .after_help(
                    "This writes private.pem and public.pem into the output folder. Deploy the \
                     private key on the collector and the public key on every agent.",
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .short('o')
                        .value_name("DIR")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("The folder to write the keys to."),
                )
                .arg(
                    Arg::new("bits")
                        .long("bits")
                        .value_name("N")
                        .value_parser(value_parser!(usize))
                        .default_value("4096")
                        .help("The size of the RSA modulus."),
                )
                .arg(
                    Arg::new("overwrite")
                        .long("overwrite")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite existing keys instead of failing."),
                ),
        )
}

fn config_command() -> Command {
    Command::new("config")
        .about("Manage the config")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("show")
                .about("Show the entire config for debugging purposes")
                .after_help(
                    "This dumps out the entire config including the values which are not in \
                     the config file but filled in from defaults and the environment.",
                )
                .arg(
                    Arg::new("format")
                        .short('f')
                        .long("format")
                        .value_parser(PossibleValuesParser::new(["debug", "yaml"]))
                        .default_value("yaml")
                        .help("The output format"),
                ),
        )
}

pub fn make_app() -> Command {
    Command::new("meter")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .propagate_version(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("The path to the config folder."),
        )
        .subcommand(server_command())
        .subcommand(agent_command())
        .subcommand(keys_command())
        .subcommand(config_command())
}
