#![no_main]

use libfuzzer_sys::fuzz_target;
use sqlsift_core::candidates::{CandidateExtractor, MarkerAdjacentStrategy};
use sqlsift_core::{MarkerCatalog, ScanInput};

fuzz_target!(|data: &[u8]| {
    let catalog = MarkerCatalog::builtin();
    for hit in catalog.scan(data) {
        assert!(hit.offset < data.len());
    }
    let set = CandidateExtractor::new()
        .with_strategy(MarkerAdjacentStrategy::new())
        .extract(&ScanInput {
            buffer: data,
            origin: "fuzz",
            catalog: &catalog,
        });
    assert!(set.iter().all(|c| !c.value().is_empty()));
});
