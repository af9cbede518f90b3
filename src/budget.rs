//! `BudgetManager`: tracks LLM spend against rolling hourly/daily budgets
//! and degrades callers gracefully rather than erroring once exhausted.
use crate::error::RecallResult;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BudgetPeriod {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub model: String,
    pub success: bool,
}

/// Conservative defaults for a single-tenant deployment with no external cost feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub daily_budget: f64,
    pub hourly_budget: f64,
    pub warning_threshold: f64,
    pub auto_degrade: bool,
    pub price_per_1k_input: f64,
    pub price_per_1k_output: f64,
    pub reserved_budget: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_budget: 1.0,
            hourly_budget: 0.1,
            warning_threshold: 0.8,
            auto_degrade: true,
            price_per_1k_input: 0.0015,
            price_per_1k_output: 0.006,
            reserved_budget: 0.1,
        }
    }
}

/// Model-specific per-1k-token pricing, consulted by `estimate_cost` before
/// falling back to `BudgetConfig`'s generic price.
fn model_price(model: &str) -> Option<(f64, f64)> {
    match model {
        "gpt-4o-mini" => Some((0.00015, 0.0006)),
        "gpt-4o" => Some((0.005, 0.015)),
        "gpt-4-turbo" => Some((0.01, 0.03)),
        "gpt-3.5-turbo" => Some((0.0005, 0.0015)),
        "deepseek-chat" => Some((0.00014, 0.00028)),
        "qwen-turbo" => Some((0.0002, 0.0006)),
        _ => None,
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedUsage {
    records: Vec<UsageRecord>,
}

struct State {
    records: Vec<UsageRecord>,
    daily_cost: f64,
    hourly_cost: f64,
    current_day: u32,
    current_hour: u32,
}

pub struct BudgetManager {
    path: std::path::PathBuf,
    config: BudgetConfig,
    state: Mutex<State>,
}

impl BudgetManager {
    pub fn open(data_root: &std::path::Path, config: BudgetConfig) -> RecallResult<Self> {
        let dir = data_root.join("budget");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("usage.json");

        let now = Utc::now();
        let today = now.ordinal();
        let hour = now.hour();

        let mut records = Vec::new();
        let mut daily_cost = 0.0;
        let mut hourly_cost = 0.0;
        if let Some(persisted) = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str::<PersistedUsage>(&s).ok())
        {
            for record in persisted.records {
                if record.timestamp.ordinal() == today && record.timestamp.year() == now.year() {
                    daily_cost += record.cost;
                    if record.timestamp.hour() == hour {
                        hourly_cost += record.cost;
                    }
                    records.push(record);
                }
            }
        }

        Ok(Self {
            path,
            config,
            state: Mutex::new(State {
                records,
                daily_cost,
                hourly_cost,
                current_day: today,
                current_hour: hour,
            }),
        })
    }

    fn refresh_period(&self, state: &mut State) {
        let now = Utc::now();
        let today = now.ordinal();
        let hour = now.hour();
        if today != state.current_day {
            state.daily_cost = 0.0;
            state.hourly_cost = 0.0;
            state.current_day = today;
            state.current_hour = hour;
            state.records.retain(|r| r.timestamp.ordinal() == today && r.timestamp.year() == now.year());
        } else if hour != state.current_hour {
            state.hourly_cost = 0.0;
            state.current_hour = hour;
        }
    }

    pub fn estimate_cost(&self, tokens_in: u64, tokens_out: u64, model: Option<&str>) -> f64 {
        let (price_in, price_out) = model
            .and_then(model_price)
            .unwrap_or((self.config.price_per_1k_input, self.config.price_per_1k_output));
        (tokens_in as f64 / 1000.0) * price_in + (tokens_out as f64 / 1000.0) * price_out
    }

    pub fn can_afford(&self, estimated_cost: f64, use_reserved: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        self.refresh_period(&mut state);

        let mut available_daily = self.config.daily_budget - state.daily_cost;
        if use_reserved {
            available_daily += self.config.reserved_budget;
        }
        let available_hourly = self.config.hourly_budget - state.hourly_cost;

        estimated_cost <= available_daily && estimated_cost <= available_hourly
    }

    pub fn get_remaining(&self, period: BudgetPeriod) -> f64 {
        let mut state = self.state.lock().unwrap();
        self.refresh_period(&mut state);
        match period {
            BudgetPeriod::Hourly => (self.config.hourly_budget - state.hourly_cost).max(0.0),
            _ => (self.config.daily_budget - state.daily_cost).max(0.0),
        }
    }

    pub fn get_usage_pct(&self, period: BudgetPeriod) -> f64 {
        let mut state = self.state.lock().unwrap();
        self.refresh_period(&mut state);
        match period {
            BudgetPeriod::Hourly => {
                if self.config.hourly_budget <= 0.0 {
                    0.0
                } else {
                    state.hourly_cost / self.config.hourly_budget
                }
            }
            _ => {
                if self.config.daily_budget <= 0.0 {
                    0.0
                } else {
                    state.daily_cost / self.config.daily_budget
                }
            }
        }
    }

    /// Record a completed call's usage, persisting the rolling 7-day log.
    pub fn record_usage(
        &self,
        operation: &str,
        tokens_in: u64,
        tokens_out: u64,
        model: &str,
    ) -> RecallResult<UsageRecord> {
        let cost = self.estimate_cost(tokens_in, tokens_out, Some(model));
        let record = UsageRecord {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            tokens_in,
            tokens_out,
            cost,
            model: model.to_string(),
            success: true,
        };

        let mut state = self.state.lock().unwrap();
        self.refresh_period(&mut state);
        state.records.push(record.clone());
        state.daily_cost += cost;
        state.hourly_cost += cost;

        let cutoff = Utc::now() - chrono::Duration::days(7);
        state.records.retain(|r| r.timestamp > cutoff);
        let snapshot = PersistedUsage {
            records: state.records.clone(),
        };
        drop(state);

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(&snapshot)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(record)
    }

    /// "lite" (switch fully to local extraction), "cloud" (LLM allowed but
    /// budget nearly gone), or "local" (plenty of headroom).
    pub fn suggest_degradation(&self) -> &'static str {
        let remaining = self.get_remaining(BudgetPeriod::Daily);
        if remaining <= 0.0 {
            "lite"
        } else if remaining < 0.1 {
            "cloud"
        } else {
            "local"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_manager_can_afford_within_hourly_and_daily_budget() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BudgetManager::open(dir.path(), BudgetConfig::default()).unwrap();
        assert!(manager.can_afford(0.01, false));
    }

    #[test]
    fn recording_usage_past_hourly_budget_blocks_further_spend() {
        let dir = tempfile::tempdir().unwrap();
        let config = BudgetConfig {
            hourly_budget: 0.05,
            daily_budget: 10.0,
            ..BudgetConfig::default()
        };
        let manager = BudgetManager::open(dir.path(), config).unwrap();
        manager.record_usage("extraction", 100_000, 10_000, "gpt-4o").unwrap();
        assert!(!manager.can_afford(0.01, false));
    }

    #[test]
    fn reserved_budget_only_helps_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let config = BudgetConfig {
            daily_budget: 0.05,
            hourly_budget: 10.0,
            reserved_budget: 0.2,
            ..BudgetConfig::default()
        };
        let manager = BudgetManager::open(dir.path(), config).unwrap();
        manager.record_usage("extraction", 100_000, 10_000, "gpt-4o").unwrap();
        assert!(!manager.can_afford(0.1, false));
        assert!(manager.can_afford(0.1, true));
    }

    #[test]
    fn suggest_degradation_tracks_remaining_budget() {
        let dir = tempfile::tempdir().unwrap();
        let config = BudgetConfig {
            daily_budget: 0.2,
            hourly_budget: 10.0,
            ..BudgetConfig::default()
        };
        let manager = BudgetManager::open(dir.path(), config).unwrap();
        assert_eq!(manager.suggest_degradation(), "local");
        manager.record_usage("extraction", 1_000_000, 100_000, "gpt-4o").unwrap();
        assert_eq!(manager.suggest_degradation(), "lite");
    }

    #[test]
    fn usage_log_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let manager = BudgetManager::open(dir.path(), BudgetConfig::default()).unwrap();
            manager.record_usage("extraction", 1000, 200, "gpt-4o-mini").unwrap();
        }
        let manager = BudgetManager::open(dir.path(), BudgetConfig::default()).unwrap();
        assert!(manager.get_remaining(BudgetPeriod::Daily) < BudgetConfig::default().daily_budget);
    }
}
