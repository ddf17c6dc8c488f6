#![no_main]

use libfuzzer_sys::fuzz_target;
use sqlsift_core::sqlite::{self, DatabaseHeader};

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = DatabaseHeader::parse(data) {
        let _ = header.is_sane();
    }
    let _ = sqlite::header_page_size(data);
});
