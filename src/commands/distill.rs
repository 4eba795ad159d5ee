//! `opshield distill` - compress episodic memories into semantic rules.

use opshield_runtime::memory::{EpisodicStore, KnowledgeDistiller, SemanticStore};

use crate::exit_codes;

pub fn run(matches: &clap::ArgMatches) -> i32 {
    let config = match super::load_config(matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return exit_codes::INTERNAL_ERROR;
        }
    };

    let episodic = match EpisodicStore::new(config.storage.episodic_dir()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("storage error: {}", e);
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

    match KnowledgeDistiller::new(&episodic, &semantic).distill() {
        Ok(report) => {
            println!(
                "Distilled {} incidents into {} new or reinforced rules",
                report.incidents_analyzed, report.facts_created
            );
            exit_codes::RESOLVED
        }
        Err(e) => {
            eprintln!("distillation failed: {}", e);
            exit_codes::INTERNAL_ERROR
        }
    }
}
