#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|points: Vec<(f64, f64)>| {
    let _ = labscan_config::check_guess_table(&points);
});
