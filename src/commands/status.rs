//! `opshield status` - summarize memory, playbook, policy, and budget state.

use opshield_runtime::config::LearningConfig;
use opshield_runtime::learning::PlaybookEngine;
use opshield_runtime::memory::MemoryLayers;

use crate::exit_codes;

pub fn run(matches: &clap::ArgMatches) -> i32 {
    let config = match super::load_config(matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return exit_codes::INTERNAL_ERROR;
        }
    };

    let memories = match MemoryLayers::open(&config.storage) {
        Ok(memories) => memories,
        Err(e) => {
            eprintln!("storage error: {}", e);
            return exit_codes::INTERNAL_ERROR;
        }
    };

    let patterns = memories.episodic.success_patterns();
    println!("Incidents resolved: {}", patterns.success_count);
    println!(
        "Average resolution time: {:.0}s",
        patterns.avg_resolution_time_seconds
    );
    for (tool, uses) in &patterns.most_used_tools {
        println!("  {} ({} uses)", tool, uses);
    }

    println!(
        "Semantic memory: {} facts, {} tool patterns",
        memories.semantic.fact_count(),
        memories.semantic.pattern_count()
    );

    let records = memories.policy.all_records();
    let applied: u32 = records.iter().map(|r| r.times_applied).sum();
    println!(
        "Policy memory: {} rules tracked, {} applications",
        records.len(),
        applied
    );
    for suggestion in memories.policy.suggest_changes() {
        println!(
            "  {}: {} ({})",
            suggestion.policy_id, suggestion.action, suggestion.reason
        );
    }

    let playbooks = PlaybookEngine::new(
        LearningConfig::default(),
        Some(config.storage.playbooks_dir()),
    );
    let stats = playbooks.stats();
    println!(
        "Playbooks: {} total ({} high confidence, {} finding types)",
        stats.total_playbooks, stats.high_confidence, stats.finding_types_covered
    );

    println!(
        "Spend (retained history): ${:.2}",
        memories.economic.total_spend()
    );

    exit_codes::RESOLVED
}
