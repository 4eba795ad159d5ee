//! `opshield ledger verify` - verify the audit chain.

use opshield_runtime::ledger::TrustLedger;

use crate::exit_codes;

pub fn verify(matches: &clap::ArgMatches) -> i32 {
    let config = match super::load_config(matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return exit_codes::INTERNAL_ERROR;
        }
    };

    // `open` verifies the chain while loading.
    match TrustLedger::open(config.storage.ledger_path()) {
        Ok(ledger) => {
            println!("ledger OK: {} entries, chain intact", ledger.len());
            exit_codes::RESOLVED
        }
        Err(e) => {
            eprintln!("ledger verification failed: {}", e);
            exit_codes::INTERNAL_ERROR
        }
    }
}
