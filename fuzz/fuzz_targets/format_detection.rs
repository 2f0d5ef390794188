#![no_main]

use loghit::detection::{DetectOutcome, FormatDetector};
use loghit::formats::{FormatCatalog, W3cOptions};
use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;

const MAX_LINES: usize = 64;

static CATALOG: Lazy<FormatCatalog> = Lazy::new(|| {
    FormatCatalog::builtin(&W3cOptions::default()).expect("built-in formats compile")
});

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let sample: Vec<String> = text.lines().take(MAX_LINES).map(str::to_string).collect();

    if let DetectOutcome::Found(format) = FormatDetector::new(&CATALOG).detect(&sample) {
        // A detected format must accept at least one of the lines it was detected from
        assert!(sample.iter().any(|line| format.matches_line(line).is_some()));
    }
});
