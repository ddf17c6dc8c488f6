#![no_main]

use libfuzzer_sys::fuzz_target;
use sqlsift_core::{LayoutConfig, MarkerCatalog, PageLayoutAnalyzer};

fuzz_target!(|data: &[u8]| {
    let catalog = MarkerCatalog::builtin();
    let report = PageLayoutAnalyzer::new(LayoutConfig::default(), &catalog).analyze(data, &[]);
    if let Some(size) = report.detected_page_size() {
        assert!(size.is_power_of_two());
    }
});
