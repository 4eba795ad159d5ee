//! `opshield dna` - exchange distilled knowledge with peers.

use opshield_runtime::memory::{SemanticStore, ThreatDnaExchange};

use crate::exit_codes;

const EXPORT_MIN_CONFIDENCE: f64 = 0.8;

pub fn run(matches: &clap::ArgMatches) -> i32 {
    let config = match super::load_config(matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return exit_codes::INTERNAL_ERROR;
        }
    };

    let semantic = match SemanticStore::new(config.storage.semantic_dir()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("storage error: {}", e);
            return exit_codes::INTERNAL_ERROR;
        }
    };

    let exchange = match ThreatDnaExchange::new(
        config.storage.threat_dna_export_dir(),
        config.storage.threat_dna_import_dir(),
        "opshield",
    ) {
        Ok(exchange) => exchange,
        Err(e) => {
            eprintln!("exchange error: {}", e);
            return exit_codes::INTERNAL_ERROR;
        }
    };

    let do_export = matches.get_flag("export");
    let do_import = matches.get_flag("import");
    if !do_export && !do_import {
        eprintln!("nothing to do: pass --export and/or --import");
        return exit_codes::INTERNAL_ERROR;
    }

    if do_export {
        match exchange.export(&semantic, EXPORT_MIN_CONFIDENCE) {
            Ok(count) => println!("exported {} facts", count),
            Err(e) => {
                eprintln!("export failed: {}", e);
                return exit_codes::INTERNAL_ERROR;
            }
        }
    }

    if do_import {
        match exchange.import(&semantic) {
            Ok(count) => println!("imported {} facts", count),
            Err(e) => {
                eprintln!("import failed: {}", e);
                return exit_codes::INTERNAL_ERROR;
            }
        }
    }

    exit_codes::RESOLVED
}
