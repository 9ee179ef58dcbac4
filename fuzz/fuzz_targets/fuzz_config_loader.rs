#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse, validate and resolve must reject bad input without panicking.
    let Ok(cfg) = evolver_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_err() {
        return;
    }
    if let Ok(controller) = evolver_core::conversions::controller_config(&cfg, None) {
        for v in &controller.vessels {
            let _ = evolver_core::ladder::check_min_concentration(v);
            let _ = evolver_core::ladder::levels_for(&v.selection.ladder);
        }
    }
});
