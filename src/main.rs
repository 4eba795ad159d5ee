#![allow(clippy::multiple_crate_versions)]

use clap::{Arg, ArgAction, Command};

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit status conventions: 0 resolved, 10 escalated, 20 blocked by policy,
/// 30 killed, 40 internal error.
pub mod exit_codes {
    pub const RESOLVED: i32 = 0;
    pub const ESCALATED: i32 = 10;
    pub const BLOCKED: i32 = 20;
    pub const KILLED: i32 = 30;
    pub const INTERNAL_ERROR: i32 = 40;
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let matches = Command::new("opshield")
        .version(VERSION)
        .about("OpShield - autonomous, policy-gated incident remediation")
        .subcommand(
            Command::new("run")
                .about("Drive an incident through the autonomy loop (dry-run harness)")
                .arg(
                    Arg::new("incident")
                        .short('i')
                        .long("incident")
                        .value_name("INCIDENT_ID")
                        .help("Incident identifier")
                        .required(true),
                )
                .arg(
                    Arg::new("observations")
                        .short('o')
                        .long("observations")
                        .value_name("FILE")
                        .help("JSON file with an array of observations")
                        .required(true),
                )
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("Runtime configuration (TOML)"),
                )
                .arg(
                    Arg::new("fail-tools")
                        .long("fail-tools")
                        .value_name("TOOLS")
                        .help("Comma-separated tool ids the dry-run executor should fail"),
                ),
        )
        .subcommand(
            Command::new("approve")
                .about("Approve a suspended incident via the legacy file token")
                .arg(
                    Arg::new("incident")
                        .value_name("INCIDENT_ID")
                        .help("Incident to approve")
                        .required(true),
                )
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("Runtime configuration (TOML)"),
                )
                .arg(
                    Arg::new("approver")
                        .long("approver")
                        .value_name("NAME")
                        .help("Who is approving")
                        .default_value("operator"),
                ),
        )
        .subcommand(
            Command::new("status")
                .about("Show memory, playbook, and budget state")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("Runtime configuration (TOML)"),
                ),
        )
        .subcommand(
            Command::new("distill")
                .about("Compress resolved incidents into semantic rules")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("Runtime configuration (TOML)"),
                ),
        )
        .subcommand(
            Command::new("ledger")
                .about("Trust ledger operations")
                .subcommand(
                    Command::new("verify").about("Verify the ledger hash chain").arg(
                        Arg::new("config")
                            .short('c')
                            .long("config")
                            .value_name("FILE")
                            .help("Runtime configuration (TOML)"),
                    ),
                )
                .subcommand_required(true),
        )
        .subcommand(
            Command::new("dna")
                .about("Threat-DNA exchange with peers")
                .arg(
                    Arg::new("export")
                        .long("export")
                        .action(ArgAction::SetTrue)
                        .help("Export high-confidence semantic facts"),
                )
                .arg(
                    Arg::new("import")
                        .long("import")
                        .action(ArgAction::SetTrue)
                        .help("Import peer bundles from the import directory"),
                )
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("Runtime configuration (TOML)"),
                ),
        )
        .get_matches();

    let code = match matches.subcommand() {
        Some(("run", sub)) => commands::run::run(sub).await,
        Some(("approve", sub)) => commands::approve::run(sub),
        Some(("status", sub)) => commands::status::run(sub),
        Some(("distill", sub)) => commands::distill::run(sub),
        Some(("ledger", sub)) => match sub.subcommand() {
            Some(("verify", verify)) => commands::ledger::verify(verify),
            _ => exit_codes::INTERNAL_ERROR,
        },
        Some(("dna", sub)) => commands::dna::run(sub),
        _ => {
            println!("OpShield v{}", VERSION);
            println!("Use --help for available commands");
            exit_codes::RESOLVED
        }
    };

    std::process::exit(code);
}
