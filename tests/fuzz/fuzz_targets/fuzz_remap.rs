#![no_main]
use std::collections::BTreeMap;

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Whatever edit scripts the diff parser produces, remapping either
    // succeeds or reports an error; it never panics.
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(delta) = covdelta::diff::parse_diff(s) else {
        return;
    };
    let reference: BTreeMap<u32, u32> = (1..=64).map(|line| (line, line)).collect();
    for changes in delta.files.values() {
        let _ = covdelta::remap::remap_coverage_per_line(&reference, changes);
    }
});
