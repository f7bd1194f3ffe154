pub mod combination;
pub mod deadline;
pub mod error;
pub mod experiment;
pub mod group_combination;
pub mod logging;
pub mod partition;
pub mod rebalance;
pub mod swapper;
pub mod types;
pub mod validator;

pub use error::{RebalanceError, ValidationError};
pub use partition::run_partition_search;
pub use rebalance::{RebalanceReport, RebalanceResponse, Rebalancer};
pub use types::*;
pub use validator::{CompositionValidator, RuleValidator};

use wasm_bindgen::prelude::*;

/// Initialize panic hook for better error messages; debug builds also
/// send `tracing` events to the console
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    #[cfg(feature = "debug")]
    logging::install(tracing::Level::DEBUG);
}

/// WASM-exposed rebalancer wrapper
#[wasm_bindgen]
pub struct RebalanceEngine {
    rebalancer: Rebalancer,
    verbose: bool,
}

#[wasm_bindgen]
impl RebalanceEngine {
    /// Create a new engine with default config
    #[wasm_bindgen(constructor)]
    pub fn new() -> RebalanceEngine {
        RebalanceEngine {
            rebalancer: Rebalancer::default(),
            verbose: false,
        }
    }

    /// Create with custom config
    pub fn new_with_config(config_json: &str) -> Result<RebalanceEngine, JsValue> {
        let config: RebalanceConfig = serde_json::from_str(config_json)
            .map_err(|e| JsValue::from_str(&format!("Config parse error: {}", e)))?;
        Ok(RebalanceEngine {
            rebalancer: Rebalancer::new(config),
            verbose: false,
        })
    }

    /// Rebalance a lobby; returns teams plus a report as JSON
    pub fn rebalance(&self, request_json: &str) -> Result<String, JsValue> {
        let request: RebalanceRequest = serde_json::from_str(request_json)
            .map_err(|e| JsValue::from_str(&format!("Request parse error: {}", e)))?;
        let response = self.rebalancer.rebalance_request(&request);

        if self.verbose {
            if let Some(report) = &response.report {
                web_sys::console::log_1(&JsValue::from_str(&format!(
                    "rebalance {:?}: spread {:.4} -> {:.4}, count diff {} -> {}, {:.1} ms{}",
                    report.strategy,
                    report.spread_before,
                    report.spread_after,
                    report.count_diff_before,
                    report.count_diff_after,
                    report.elapsed_ms,
                    if report.timed_out { " (timed out)" } else { "" },
                )));
            }
        }

        serde_json::to_string(&response).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    /// Even out player counts only
    pub fn rebalance_member_count(&self, request_json: &str) -> Result<String, JsValue> {
        self.rebalancer
            .rebalance_member_count_json(request_json)
            .map_err(|e| JsValue::from_str(&format!("Rebalance error: {}", e)))
    }

    /// Party-index combinations that can fill one team
    pub fn generate_combinations(&self, request_json: &str) -> Result<String, JsValue> {
        self.rebalancer
            .generate_combinations_json(request_json)
            .map_err(|e| JsValue::from_str(&format!("Combination error: {}", e)))
    }

    /// Get current config as JSON
    pub fn get_config(&self) -> String {
        serde_json::to_string(self.rebalancer.config()).unwrap_or_default()
    }

    /// Get default config as JSON
    pub fn get_default_config() -> String {
        serde_json::to_string(&RebalanceConfig::default()).unwrap_or_default()
    }

    /// Update rebalance config
    pub fn update_config(&mut self, config_json: &str) -> Result<(), JsValue> {
        let config: RebalanceConfig = serde_json::from_str(config_json)
            .map_err(|e| JsValue::from_str(&format!("Config parse error: {}", e)))?;
        self.rebalancer.set_config(config);
        Ok(())
    }

    /// Log a one-line summary to the console after each rebalance
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }
}

impl Default for RebalanceEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Run every strategy over the same seeded random lobbies
#[wasm_bindgen]
pub fn run_experiment(base_config_json: &str, lobby_config_json: &str, seed: u64) -> Result<String, JsValue> {
    experiment::compare_strategies_json(base_config_json, lobby_config_json, seed)
        .map_err(|e| JsValue::from_str(&format!("Experiment error: {}", e)))
}
