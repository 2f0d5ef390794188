use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use loghit::builder::HitBuilder;
use loghit::config::ExtractionConfig;
use loghit::detection::FormatDetector;
use loghit::formats::{FormatCatalog, W3cOptions};

const COMBINED_LINE: &str = "1.2.3.4 - - [10/Feb/2012:16:42:07 +0100] \"GET /blog/2012/02/post.html?utm_source=feed HTTP/1.1\" 200 5432 \"http://example.com/\" \"Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/10.0\"";

fn catalog() -> FormatCatalog {
    FormatCatalog::builtin(&W3cOptions::default()).expect("built-in formats compile")
}

fn bench_match_combined(c: &mut Criterion) {
    let catalog = catalog();
    let format = catalog.by_name("ncsa_extended").expect("format exists");
    c.bench_function("match_ncsa_extended", |b| {
        b.iter(|| {
            black_box(format.matches_line(black_box(COMBINED_LINE)));
        });
    });
}

fn bench_detect_combined(c: &mut Criterion) {
    let catalog = catalog();
    let sample = vec![COMBINED_LINE.to_string(); 8];
    c.bench_function("detect_ncsa_extended", |b| {
        b.iter(|| {
            black_box(FormatDetector::new(&catalog).detect(black_box(&sample)));
        });
    });
}

fn bench_detect_w3c_header(c: &mut Criterion) {
    let catalog = catalog();
    let sample: Vec<String> = [
        "#Software: Microsoft Internet Information Services 8.5",
        "#Version: 1.0",
        "#Fields: date time s-ip cs-method cs-uri-stem cs-uri-query s-port cs-username c-ip cs(User-Agent) cs(Referer) sc-status sc-substatus sc-win32-status time-taken",
        "2012-04-01 00:00:13 10.0.0.1 GET /index.html a=1 80 - 1.2.3.4 Mozilla/5.0 - 200 0 0 15",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    c.bench_function("detect_iis_header", |b| {
        b.iter(|| {
            black_box(FormatDetector::new(&catalog).detect(black_box(&sample)));
        });
    });
}

fn bench_build_hit(c: &mut Criterion) {
    let catalog = catalog();
    let format = catalog.by_name("ncsa_extended").expect("format exists");
    let config = ExtractionConfig::default();
    let builder = HitBuilder::new(&config);
    c.bench_function("build_hit_ncsa_extended", |b| {
        b.iter(|| {
            let matched = format.matches_line(COMBINED_LINE).expect("line matches");
            let pending = builder
                .build(format, matched, "access.log", 0)
                .expect("hit builds");
            black_box(builder.finish(format, pending).ok());
        });
    });
}

criterion_group!(
    benches,
    bench_match_combined,
    bench_detect_combined,
    bench_detect_w3c_header,
    bench_build_hit
);
criterion_main!(benches);
