#![no_main]
use libfuzzer_sys::fuzz_target;
use vanetsim_core::config::ScenarioSpec;
use vanetsim_core::test_utils::*;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Arbitrary text must never panic the parser or the loader.
    if let Ok(scenario) = ScenarioSpec::from_toml_str(text) {
        let graph = test_graph();
        let _ = graph.load_scenario(&scenario);
        assert!(graph.build_model_tree().is_ok());
    }
});
