#![no_main]

use loghit::builder::HitBuilder;
use loghit::config::ExtractionConfig;
use loghit::formats::{FormatCatalog, W3cOptions};
use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;

const MAX_LINE_LEN: usize = 4096;

static CATALOG: Lazy<FormatCatalog> = Lazy::new(|| {
    FormatCatalog::builtin(&W3cOptions::default()).expect("built-in formats compile")
});

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let Ok(line) = std::str::from_utf8(&rest[..rest.len().min(MAX_LINE_LEN)]) else {
        return;
    };

    let entries = CATALOG.entries();
    let format = &entries[selector as usize % entries.len()];
    let Some(matched) = format.matches_line(line) else {
        return;
    };

    let config = ExtractionConfig::default();
    let builder = HitBuilder::new(&config);
    if let Ok(pending) = builder.build(format, matched, "fuzz.log", 0) {
        let _ = builder.finish(format, pending);
    }
});
