#![no_main]

use libfuzzer_sys::fuzz_target;
use sqlsift_core::scanner::sliding_entropy_scan;

fuzz_target!(|data: &[u8]| {
    let Some((&window, rest)) = data.split_first() else {
        return;
    };
    let window = usize::from(window).max(1);
    for (offset, entropy) in sliding_entropy_scan(rest, window, 4) {
        assert!(offset + window <= rest.len());
        assert!((0.0..=1.0).contains(&entropy));
    }
});
