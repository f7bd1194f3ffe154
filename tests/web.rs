//! Browser tests for the wasm surface; run with `wasm-pack test --headless --firefox`
#![cfg(target_arch = "wasm32")]

use party_rebalancer::{RebalanceEngine, RebalanceResponse};
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

const REQUEST: &str = r#"{
    "teams": [
        {"parties": [
            {"id": 1, "members": [{"id": 1, "attributes": {"mmr": 10.0}}]},
            {"id": 2, "members": [{"id": 2, "attributes": {"mmr": 8.0}}]},
            {"id": 3, "members": [{"id": 3, "attributes": {"mmr": 9.0}}]}
        ]},
        {"parties": [{"id": 4, "members": [{"id": 4, "attributes": {"mmr": 7.0}}]}]}
    ],
    "rule": {"team_count": 2, "min_players": 2, "max_players": 2},
    "matching_rule": {"attributes": [{"name": "mmr"}]}
}"#;

#[wasm_bindgen_test]
fn test_rebalance_in_browser() {
    let mut engine = RebalanceEngine::new();
    engine.set_verbose(true);
    let json = engine.rebalance(REQUEST).unwrap();
    let response: RebalanceResponse = serde_json::from_str(&json).unwrap();
    let report = response.report.unwrap();
    assert!(report.improved);
    assert_eq!(report.spread_after, 0.0);
}

#[wasm_bindgen_test]
fn test_config_round_trip() {
    let mut engine = RebalanceEngine::new();
    let defaults = RebalanceEngine::get_default_config();
    engine.update_config(&defaults).unwrap();
    assert_eq!(engine.get_config(), defaults);
    assert!(engine.update_config("{").is_err());
}

#[wasm_bindgen_test]
fn test_run_experiment() {
    let base = RebalanceEngine::get_default_config();
    let lobby = r#"{"lobbies": 3, "team_count": 2, "team_size": 3, "party_player_fraction": 0.4,
        "locked_fraction": 0.0, "skill_mean": 1500.0, "skill_spread": 500.0}"#;
    let json = party_rebalancer::run_experiment(&base, lobby, 7).unwrap();
    assert!(json.starts_with('['));
}
