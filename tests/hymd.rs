use hymd::inferrer::RecordPairInferrer;
use hymd::lattice::FullLattice;
use hymd::measure::{EqualityMeasure, FnMeasure, LevenshteinMeasure, SimilarityMeasure};
use hymd::validator::{Recommendation, Recommendations};
use hymd::{
    ColumnMatchSpec, CompressedRecords, ConfigError, DataError, DictionaryCompressor, Error, HyMd,
    HyMdConfig, Md, RecordSource, SimilarityData, VecSource,
};
use rayon::ThreadPoolBuilder;

fn exact() -> impl SimilarityMeasure {
    FnMeasure::new("exact", 0.0, |a: &str, b: &str| if a == b { 1.0 } else { 0.0 }).unwrap()
}

fn run(config: HyMdConfig, left: &mut VecSource, right: Option<&mut VecSource>) -> Vec<Md> {
    let hymd = match right {
        Some(right) => {
            HyMd::load(config.threads(1), left, Some(right as &mut dyn RecordSource)).unwrap()
        }
        None => HyMd::load(config.threads(1), left, None).unwrap(),
    };
    hymd.execute().unwrap().into_mds()
}

fn grocery() -> (VecSource, VecSource) {
    (
        VecSource::new("left", &["name", "price"], &[&["meat", "1"], &["bread", "2"]]),
        VecSource::new("right", &["name", "price"], &[&["mead", "1"], &["bread", "2"]]),
    )
}

fn grocery_config() -> HyMdConfig {
    HyMdConfig::new()
        .column_match(ColumnMatchSpec::new("name", "name", LevenshteinMeasure::new(0.5).unwrap()))
        .column_match(ColumnMatchSpec::new("price", "price", EqualityMeasure::new(1.0).unwrap()))
}

#[test]
fn identical_values_give_perfect_empty_lhs_md() {
    let mut table = VecSource::new("t", &["a"], &[&["x"], &["x"], &["x"], &["x"]]);
    let config = HyMdConfig::new()
        .min_support(1)
        .column_match(ColumnMatchSpec::new("a", "a", exact()));
    let mds = run(config, &mut table, None);

    assert_eq!(mds.len(), 1);
    assert_eq!(mds[0].cardinality(), 0);
    assert_eq!(mds[0].rhs(), (0, 1.0));
}

#[test]
fn one_edit_apart_gives_three_quarters() {
    let (mut left, mut right) = grocery();
    let mds = run(grocery_config(), &mut left, Some(&mut right));

    let name_decides_price = mds
        .iter()
        .find(|md| md.lhs_bounds() == [0.75, 0.0] && md.rhs().0 == 1)
        .expect("name >= 0.75 should decide the price");
    assert_eq!(name_decides_price.rhs().1, 1.0);
    assert_eq!(name_decides_price.lhs()[0].max_disproved_bound, Some(0.6));

    let price_decides_name = mds
        .iter()
        .find(|md| md.lhs_bounds() == [0.0, 1.0])
        .expect("equal prices should bound the name");
    assert_eq!(price_decides_name.rhs(), (0, 0.75));

    // bread and mead are 0.6 alike but differ in price
    assert!(!mds.iter().any(|md| md.lhs_bounds() == [0.6, 0.0] && md.rhs().0 == 1));

    assert_eq!(
        name_decides_price.to_string(),
        "[ levenshtein(left:name, right:name)>=0.75(>0.6) ] -> equality(left:price, right:price)>=1"
    );
}

#[test]
fn too_much_support_leaves_only_the_empty_lhs() {
    let rows: &[&[&str]] = &[&["a", "1"], &["b", "2"], &["c", "3"], &["d", "4"]];
    let mut table = VecSource::new("t", &["x", "y"], rows);
    let config = HyMdConfig::new()
        .min_support(rows.len() + 1)
        .column_match(ColumnMatchSpec::new("x", "x", EqualityMeasure::new(1.0).unwrap()))
        .column_match(ColumnMatchSpec::new("y", "y", EqualityMeasure::new(1.0).unwrap()));
    let hymd = HyMd::load(config.threads(1), &mut table, None).unwrap();
    let output = hymd.execute().unwrap();

    assert!(output.mds().iter().all(|md| md.cardinality() == 0));
    assert!(output.diagnostics().validations > 0);
}

#[test]
fn pruned_mds_keep_lhs_and_rhs_apart() {
    let rows: &[&[&str]] = &[
        &["anna", "berlin", "10115"],
        &["anne", "berlin", "10117"],
        &["hanna", "bern", "3001"],
        &["bob", "paris", "75001"],
        &["rob", "paris", "75002"],
        &["bobby", "pariss", "75001"],
    ];
    let levenshtein = |column: &str| {
        ColumnMatchSpec::new(column, column, LevenshteinMeasure::new(0.3).unwrap())
    };
    let config = || {
        HyMdConfig::new()
            .column_match(levenshtein("name"))
            .column_match(levenshtein("city"))
            .column_match(levenshtein("zip"))
    };

    let mut table = VecSource::new("people", &["name", "city", "zip"], rows);
    let mds = run(config(), &mut table, None);
    assert!(!mds.is_empty());
    for md in &mds {
        let (rhs_index, rhs_bound) = md.rhs();
        assert_eq!(md.lhs_bounds()[rhs_index], 0.0, "{}", md);
        assert!(rhs_bound > 0.0);
    }

    // results come out level by level
    let levels: Vec<usize> = mds.iter().map(Md::cardinality).collect();
    assert!(levels.windows(2).all(|w| w[0] <= w[1]));

    let mut table = VecSource::new("people", &["name", "city", "zip"], rows);
    let mds = run(config().prune_nondisjoint(false), &mut table, None);
    for md in &mds {
        let (rhs_index, rhs_bound) = md.rhs();
        // an RHS never claims less than its own LHS entry already demands
        assert!(rhs_bound > md.lhs_bounds()[rhs_index], "{}", md);
    }
}

#[test]
fn recommended_pair_retracts_claim() {
    let (mut left, mut right) = grocery();
    let records = CompressedRecords::pair(
        DictionaryCompressor::from_source(&mut left).unwrap(),
        DictionaryCompressor::from_source(&mut right).unwrap(),
    );
    let name = LevenshteinMeasure::new(0.5).unwrap();
    let price = EqualityMeasure::new(1.0).unwrap();
    let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();
    let data = SimilarityData::create_from(
        records,
        &[
            (0, 0, &name as &dyn SimilarityMeasure),
            (1, 1, &price as &dyn SimilarityMeasure),
        ],
        true,
        &pool,
    )
    .unwrap();

    let mut lattice = FullLattice::new(2);
    let root = lattice.md().root();
    assert_eq!(lattice.rhs(root), [1.0, 1.0]);

    // meat and bread: nothing alike
    let mut recommendations = Recommendations::new();
    recommendations.insert(Recommendation {
        left: &data.left().records()[0],
        right: &data.right().records()[1],
    });
    let mut inferrer = RecordPairInferrer::new(&data, true);
    inferrer.infer_from_record_pairs(&mut lattice, &mut recommendations);

    assert_eq!(lattice.rhs(root), [0.0, 0.0]);
    assert!(inferrer.mds_refined() >= 2);
}

#[test]
fn bad_minimum_similarity_is_rejected() {
    assert!(matches!(
        LevenshteinMeasure::new(1.5),
        Err(ConfigError::MinSimilarityOutOfRange { .. })
    ));
    assert!(matches!(
        EqualityMeasure::new(-0.1),
        Err(ConfigError::MinSimilarityOutOfRange { .. })
    ));
}

#[test]
fn out_of_range_similarity_aborts_the_run() {
    let mut table = VecSource::new("t", &["a"], &[&["x"], &["y"]]);
    let broken = FnMeasure::new("broken", 0.0, |_: &str, _: &str| 2.0).unwrap();
    let config = HyMdConfig::new().column_match(ColumnMatchSpec::new("a", "a", broken));
    let hymd = HyMd::load(config, &mut table, None).unwrap();
    assert!(matches!(
        hymd.execute(),
        Err(Error::Config(ConfigError::SimilarityOutOfRange { .. }))
    ));
}

#[test]
fn empty_table_is_fatal() {
    let mut table = VecSource::new("nothing", &["a"], &[]);
    let result = HyMd::load(HyMdConfig::new(), &mut table, None);
    assert!(matches!(result, Err(Error::Data(DataError::EmptyDataset(name))) if name == "nothing"));
}

#[test]
fn malformed_rows_are_skipped_and_counted() {
    let mut table = VecSource::new("t", &["a", "b"], &[&["x", "1"], &["y"], &["z", "2"]]);
    let config = HyMdConfig::new()
        .threads(1)
        .column_match(ColumnMatchSpec::new("a", "a", EqualityMeasure::new(1.0).unwrap()));
    let hymd = HyMd::load(config, &mut table, None).unwrap();
    assert_eq!(hymd.records().left().number_of_records(), 2);
    let output = hymd.execute().unwrap();
    assert_eq!(output.diagnostics().skipped_rows, 1);
}
