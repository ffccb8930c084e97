use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use county_provider_map::prelude::*;
use std::sync::OnceLock;

const COUNTY_NAMES: &[&str] = &[
    "Appling", "Atkinson", "Bacon", "Baker", "Baldwin", "Banks", "Barrow", "Bartow", "Ben Hill", "Berrien",
    "Bibb", "Bleckley", "Brantley", "Brooks", "Bryan", "Bulloch", "Burke", "Butts", "Calhoun", "Camden",
    "Candler", "Carroll", "Catoosa", "Charlton", "Chatham", "Chattahoochee", "Chattooga", "Cherokee", "Clarke",
    "Clay", "Clayton", "Clinch", "Cobb", "Coffee", "Colquitt", "Columbia", "Cook", "Coweta", "Crawford",
    "Crisp", "Dade", "Dawson", "Decatur", "DeKalb", "Dodge", "Dooly", "Dougherty", "Douglas", "Early",
    "Echols", "Effingham", "Elbert", "Emanuel", "Evans", "Fannin", "Fayette", "Floyd", "Forsyth", "Franklin",
    "Fulton", "Gilmer", "Glascock", "Glynn", "Gordon", "Grady", "Greene", "Gwinnett",
];

const PROVIDER_TYPES: &[&str] = &["NP", "MD", "DO", "PA", "CNM"];

struct Fixture {
    features: Vec<BoundaryFeature>,
    records: Vec<ProviderRecord>,
    index: NameIndex,
}

static FIXTURE: OnceLock<Fixture> = OnceLock::new();

// Synthetic statewide data: one feature per county, messy provider names
fn fixture() -> &'static Fixture {
    FIXTURE.get_or_init(|| {
        let features: Vec<BoundaryFeature> = COUNTY_NAMES
            .iter()
            .enumerate()
            .map(|(i, name)| BoundaryFeature::new(name, &format!("{:03}", 2 * i + 1)))
            .collect();

        let records: Vec<ProviderRecord> = (0..100_000)
            .map(|i| {
                let name = COUNTY_NAMES[i % COUNTY_NAMES.len()];
                let raw = match i % 4 {
                    0 => name.to_string(),
                    1 => name.to_uppercase(),
                    2 => format!("{} County", name),
                    _ => format!("  {}. ", name.to_lowercase()),
                };
                let raw = if i % 97 == 0 { "Unknown".to_string() } else { raw };
                ProviderRecord::new(Some(&raw), Some(PROVIDER_TYPES[i % PROVIDER_TYPES.len()]))
            })
            .collect();

        let index = NameIndex::build(&features, "13", 3).expect("fixture index");
        Fixture { features, records, index }
    })
}

fn benchmark_normalize(c: &mut Criterion) {
    c.bench_function("normalize_county_name", |b| {
        b.iter(|| normalize(black_box(Some("  St. Mary's   Parish County "))))
    });
}

fn benchmark_index_building(c: &mut Criterion) {
    let fx = fixture();
    c.bench_function("name_index_build", |b| {
        b.iter(|| NameIndex::build(black_box(&fx.features), "13", 3).unwrap())
    });
}

fn benchmark_aggregation(c: &mut Criterion) {
    let fx = fixture();
    let mut group = c.benchmark_group("aggregation");

    for size in [1_000usize, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::new("strip_suffix", size), &size, |b, &size| {
            b.iter(|| aggregate(black_box(&fx.records[..size]), &fx.index, MatchStrategy::StripCountySuffix))
        });
    }
    group.bench_function("exact_100k", |b| {
        b.iter(|| aggregate(black_box(&fx.records), &fx.index, MatchStrategy::Exact))
    });

    group.finish();
}

fn benchmark_filter_pass(c: &mut Criterion) {
    let fx = fixture();
    let engine = FilterEngine::new(&fx.index, JoinOptions::default());
    let rates = Default::default();
    let mut group = c.benchmark_group("filter_pass");
    group.sample_size(20);

    let filters = [
        ("all", FilterState::all()),
        ("provider_type", FilterState::all().with_provider_type("NP")),
        (
            "type_and_county",
            FilterState::all()
                .with_provider_type("MD")
                .with_county(fx.index.resolve(Some("Fulton"), MatchStrategy::Exact).unwrap().clone()),
        ),
    ];

    for (label, filter) in &filters {
        group.bench_function(*label, |b| {
            b.iter(|| engine.run(&fx.records, &fx.features, black_box(filter), &rates).aggregation)
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_normalize,
    benchmark_index_building,
    benchmark_aggregation,
    benchmark_filter_pass
);
criterion_main!(benches);
