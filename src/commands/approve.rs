//! `opshield approve` - drop the legacy approval token for an incident.
//!
//! The approval queue is authoritative, but a suspended loop also polls
//! `approvals/<incident>.approve`; writing that file from a shell is the
//! lowest-friction way for an operator to release a waiting action.

use opshield_runtime::ledger::{EntryType, TrustLedger};

use crate::exit_codes;

pub fn run(matches: &clap::ArgMatches) -> i32 {
    let config = match super::load_config(matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return exit_codes::INTERNAL_ERROR;
        }
    };

    let incident = matches
        .get_one::<String>("incident")
        .map(String::as_str)
        .unwrap_or_default();
    let approver = matches
        .get_one::<String>("approver")
        .map(String::as_str)
        .unwrap_or("operator");

    let approvals_dir = config.storage.approvals_dir();
    if let Err(e) = std::fs::create_dir_all(&approvals_dir) {
        eprintln!("incident {}: cannot create approvals directory: {}", incident, e);
        return exit_codes::INTERNAL_ERROR;
    }

    let token = approvals_dir.join(format!("{}.approve", incident));
    if let Err(e) = std::fs::write(&token, approver) {
        eprintln!("incident {}: cannot write approval token: {}", incident, e);
        return exit_codes::INTERNAL_ERROR;
    }

    // Record the approval in the audit chain as well.
    match TrustLedger::open(config.storage.ledger_path()) {
        Ok(ledger) => {
            if let Err(e) = ledger.append(
                EntryType::Approval,
                approver,
                "approved",
                incident,
                serde_json::json!({"method": "legacy_file_token"}),
            ) {
                eprintln!("incident {}: ledger append failed: {}", incident, e);
                return exit_codes::INTERNAL_ERROR;
            }
        }
        Err(e) => {
            eprintln!("incident {}: ledger unavailable: {}", incident, e);
            return exit_codes::INTERNAL_ERROR;
        }
    }

    println!("incident {}: approval token written ({})", incident, token.display());
    exit_codes::RESOLVED
}
