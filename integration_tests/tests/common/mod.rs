#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Once};

use market_core::{load_simulation_config_from_env, SimulationConfig};

static INIT: Once = Once::new();

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("test_simulation_config.json");

        debug_assert!(
            config_path.exists(),
            "missing test simulation config at {}",
            config_path.display()
        );

        std::env::set_var("SIM_CONFIG_PATH", &config_path);

        // RUST_LOG=market_core=debug shows the per-tick events
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// The fixture config, loaded the way a host would load it.
pub fn fixture_config() -> Arc<SimulationConfig> {
    ensure_test_config();
    let (config, metadata) = load_simulation_config_from_env();
    assert!(
        metadata.path().is_some(),
        "fixture config should load from SIM_CONFIG_PATH"
    );
    config
}

/// The fixture with edits applied on top.
pub fn fixture_with(edit: impl FnOnce(&mut SimulationConfig)) -> Arc<SimulationConfig> {
    let mut config = (*fixture_config()).clone();
    edit(&mut config);
    Arc::new(config)
}
