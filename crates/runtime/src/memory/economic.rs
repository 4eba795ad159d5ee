//! Economic memory
//!
//! Cost-aware autonomy: per-tenant budgets with daily/monthly rollover,
//! per-action cost records, and ROI scoring. The afford-check and the cost
//! record run inside one critical section so concurrent incidents cannot
//! oversubscribe a budget.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{MemoryError, Severity};

/// Cost record for one executed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCost {
    pub action_id: String,
    pub tool: String,
    pub compute_cost: f64,
    pub api_cost: f64,
    pub human_time_cost: f64,
    pub incident_severity: Severity,
    /// How much this action contributed to resolution, in [0, 1].
    pub resolution_contribution: f64,
    pub timestamp: DateTime<Utc>,
}

impl ActionCost {
    pub fn total_cost(&self) -> f64 {
        self.compute_cost + self.api_cost + self.human_time_cost
    }

    /// Value delivered divided by cost. Zero-cost actions have no ROI.
    pub fn roi(&self) -> f64 {
        let total = self.total_cost();
        if total == 0.0 {
            return 0.0;
        }
        self.incident_severity.resolution_value() * self.resolution_contribution / total
    }
}

/// Budget for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostBudget {
    pub budget_id: String,
    pub tenant_id: String,
    pub daily_limit: f64,
    pub monthly_limit: f64,
    pub daily_used: f64,
    pub monthly_used: f64,
    /// Anchor for the monthly window.
    pub period_start: DateTime<Utc>,
    /// Anchor for the daily window.
    pub last_reset: DateTime<Utc>,
}

impl CostBudget {
    fn new(tenant_id: &str, daily_limit: f64, monthly_limit: f64) -> Self {
        Self {
            budget_id: format!("budget_{}", tenant_id),
            tenant_id: tenant_id.to_string(),
            daily_limit,
            monthly_limit,
            daily_used: 0.0,
            monthly_used: 0.0,
            period_start: Utc::now(),
            last_reset: Utc::now(),
        }
    }

    pub fn daily_remaining(&self) -> f64 {
        (self.daily_limit - self.daily_used).max(0.0)
    }

    pub fn monthly_remaining(&self) -> f64 {
        (self.monthly_limit - self.monthly_used).max(0.0)
    }

    pub fn is_over_budget(&self) -> bool {
        self.daily_used >= self.daily_limit || self.monthly_used >= self.monthly_limit
    }

    /// Roll the usage counters when the day or month has changed.
    fn roll_periods(&mut self, now: DateTime<Utc>) {
        if now.date_naive() > self.last_reset.date_naive() {
            self.daily_used = 0.0;
            self.last_reset = now;
        }
        if now.month() != self.period_start.month() || now.year() != self.period_start.year() {
            self.monthly_used = 0.0;
            self.period_start = now;
        }
    }
}

/// Base cost table per tool, with a conservative default for unknown tools.
fn builtin_tool_costs() -> HashMap<String, (f64, f64, f64)> {
    // (compute, api, human)
    let table = [
        ("restart_service", (0.01, 0.0, 0.0)),
        ("scale_pod", (0.02, 0.0, 0.0)),
        ("rollback_deploy", (0.05, 0.0, 0.0)),
        ("get_logs", (0.001, 0.0, 0.0)),
        ("run_diagnostic", (0.01, 0.0, 0.0)),
        ("apply_patch", (0.02, 0.0, 0.0)),
        ("update_config", (0.01, 0.0, 0.0)),
        ("escalate", (0.0, 0.0, 10.0)),
        ("llm_call_small", (0.0, 0.001, 0.0)),
        ("llm_call_large", (0.0, 0.03, 0.0)),
    ];
    table
        .into_iter()
        .map(|(tool, costs)| (tool.to_string(), costs))
        .collect()
}

const DEFAULT_COMPUTE_COST: f64 = 0.01;

/// Per-tenant budget and cost store, persisted as `budgets.json`.
pub struct EconomicMemory {
    storage_path: PathBuf,
    inner: Mutex<Inner>,
    tool_costs: HashMap<String, (f64, f64, f64)>,
}

struct Inner {
    budgets: HashMap<String, CostBudget>,
    action_costs: Vec<ActionCost>,
}

impl EconomicMemory {
    pub fn new(storage_path: PathBuf) -> Result<Self, MemoryError> {
        std::fs::create_dir_all(&storage_path)?;
        let memory = Self {
            storage_path,
            inner: Mutex::new(Inner {
                budgets: HashMap::new(),
                action_costs: Vec::new(),
            }),
            tool_costs: builtin_tool_costs(),
        };
        memory.load();
        Ok(memory)
    }

    /// Set (or replace) a tenant's budget.
    pub fn set_budget(
        &self,
        tenant_id: &str,
        daily_limit: f64,
        monthly_limit: f64,
    ) -> Result<CostBudget, MemoryError> {
        let budget = CostBudget::new(tenant_id, daily_limit, monthly_limit);
        self.inner
            .lock()
            .budgets
            .insert(tenant_id.to_string(), budget.clone());
        self.persist()?;
        Ok(budget)
    }

    pub fn get_budget(&self, tenant_id: &str) -> Option<CostBudget> {
        self.inner.lock().budgets.get(tenant_id).cloned()
    }

    /// Estimated cost of running a tool once.
    pub fn estimate_action_cost(&self, tool: &str) -> f64 {
        match self.tool_costs.get(tool) {
            Some((compute, api, human)) => compute + api + human,
            None => DEFAULT_COMPUTE_COST,
        }
    }

    /// Read-only affordability preview. The authoritative check happens in
    /// [`charge_action`](Self::charge_action).
    pub fn can_afford_action(&self, tenant_id: &str, tool: &str) -> (bool, String) {
        let mut inner = self.inner.lock();
        let Some(budget) = inner.budgets.get_mut(tenant_id) else {
            return (true, "No budget set".to_string());
        };
        budget.roll_periods(Utc::now());
        let estimated = self.estimate_action_cost(tool);
        Self::check_budget(budget, estimated)
    }

    fn check_budget(budget: &CostBudget, estimated: f64) -> (bool, String) {
        if budget.daily_remaining() < estimated {
            return (
                false,
                format!(
                    "Daily budget exhausted ({:.2}/{:.2})",
                    budget.daily_used, budget.daily_limit
                ),
            );
        }
        if budget.monthly_remaining() < estimated {
            return (
                false,
                format!(
                    "Monthly budget exhausted ({:.2}/{:.2})",
                    budget.monthly_used, budget.monthly_limit
                ),
            );
        }
        (true, "Within budget".to_string())
    }

    /// Atomically check affordability and record the cost of an action.
    ///
    /// Returns the recorded cost, or an error without recording anything
    /// when the tenant cannot afford the action. Holding the lock across
    /// both halves is what prevents budget oversubscription under
    /// concurrent incidents.
    #[allow(clippy::too_many_arguments)]
    pub fn charge_action(
        &self,
        tenant_id: &str,
        action_id: &str,
        tool: &str,
        human_time_cost: f64,
        incident_severity: Severity,
        resolution_contribution: f64,
    ) -> Result<ActionCost, MemoryError> {
        let cost = {
            let mut inner = self.inner.lock();

            let (compute, api, _) = self
                .tool_costs
                .get(tool)
                .copied()
                .unwrap_or((DEFAULT_COMPUTE_COST, 0.0, 0.0));

            let cost = ActionCost {
                action_id: action_id.to_string(),
                tool: tool.to_string(),
                compute_cost: compute,
                api_cost: api,
                human_time_cost,
                incident_severity,
                resolution_contribution,
                timestamp: Utc::now(),
            };

            if let Some(budget) = inner.budgets.get_mut(tenant_id) {
                budget.roll_periods(Utc::now());
                let (affordable, reason) = Self::check_budget(budget, cost.total_cost());
                if !affordable {
                    return Err(MemoryError::BudgetExhausted {
                        tenant: tenant_id.to_string(),
                        reason,
                    });
                }
                budget.daily_used += cost.total_cost();
                budget.monthly_used += cost.total_cost();
            }

            inner.action_costs.push(cost.clone());
            if inner.action_costs.len() > 1000 {
                let excess = inner.action_costs.len() - 1000;
                inner.action_costs.drain(..excess);
            }
            cost
        };

        tracing::info!(
            tool,
            cost = cost.total_cost(),
            roi = cost.roi(),
            "recorded action cost"
        );
        self.persist()?;
        Ok(cost)
    }

    /// Tools ranked by average ROI, best first.
    pub fn tool_roi_rankings(&self) -> Vec<(String, f64, u32)> {
        let inner = self.inner.lock();
        let mut stats: HashMap<String, (f64, u32)> = HashMap::new();
        for cost in &inner.action_costs {
            let entry = stats.entry(cost.tool.clone()).or_insert((0.0, 0));
            entry.0 += cost.roi();
            entry.1 += 1;
        }
        let mut rankings: Vec<(String, f64, u32)> = stats
            .into_iter()
            .map(|(tool, (total_roi, count))| (tool, total_roi / count.max(1) as f64, count))
            .collect();
        rankings.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        rankings
    }

    /// Total spend over the retained history window.
    pub fn total_spend(&self) -> f64 {
        self.inner
            .lock()
            .action_costs
            .iter()
            .map(ActionCost::total_cost)
            .sum()
    }

    /// Cost report over the last `days` of retained history.
    pub fn cost_report(&self, days: i64) -> CostReport {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let inner = self.inner.lock();
        let recent: Vec<&ActionCost> = inner
            .action_costs
            .iter()
            .filter(|c| c.timestamp > cutoff)
            .collect();

        let mut cost_by_tool: HashMap<String, f64> = HashMap::new();
        for cost in &recent {
            *cost_by_tool.entry(cost.tool.clone()).or_insert(0.0) += cost.total_cost();
        }

        let total_cost: f64 = recent.iter().map(|c| c.total_cost()).sum();
        let total_value: f64 = recent
            .iter()
            .map(|c| c.incident_severity.resolution_value() * c.resolution_contribution)
            .sum();

        CostReport {
            period_days: days,
            total_cost,
            total_value,
            overall_roi: total_value / total_cost.max(0.01),
            action_count: recent.len(),
            cost_by_tool,
        }
    }

    fn path(&self) -> PathBuf {
        self.storage_path.join("budgets.json")
    }

    fn persist(&self) -> Result<(), MemoryError> {
        let inner = self.inner.lock();
        std::fs::write(self.path(), serde_json::to_string_pretty(&inner.budgets)?)?;
        Ok(())
    }

    fn load(&self) {
        if let Ok(raw) = std::fs::read_to_string(self.path()) {
            match serde_json::from_str(&raw) {
                Ok(budgets) => self.inner.lock().budgets = budgets,
                Err(e) => tracing::warn!(error = %e, "failed to load budgets"),
            }
        }
    }
}

/// Aggregated spend and value over a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostReport {
    pub period_days: i64,
    pub total_cost: f64,
    pub total_value: f64,
    pub overall_roi: f64,
    pub action_count: usize,
    pub cost_by_tool: HashMap<String, f64>,
}
