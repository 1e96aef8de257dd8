use hymd::inferrer::RecordPairInferrer;
use hymd::lattice::{FullLattice, ValidationInfo};
use hymd::measure::{EqualityMeasure, LevenshteinMeasure, SimilarityMeasure};
use hymd::traverser::LatticeTraverser;
use hymd::validator::{Recommendations, Validator};
use hymd::{
    is_generalization, satisfies, ColumnMatchSpec, CompressedRecords, DictionaryCompressor, HyMd,
    HyMdConfig, Md, RecordSource, SimilarityData, VecSource,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::ThreadPoolBuilder;

const WORDS: [&str; 7] = ["a", "ab", "abc", "b", "ba", "bab", "cab"];
const NUMBERS: [&str; 3] = ["1", "2", "3"];

/// One randomly generated run.
struct Case {
    columns: Vec<String>,
    left: Vec<Vec<String>>,
    right: Option<Vec<Vec<String>>>,
    min_support: usize,
    prune_nondisjoint: bool,
}

impl Case {
    fn generate(seed: u64) -> Case {
        let mut rng = StdRng::seed_from_u64(seed);
        let width = rng.random_range(2..=3);
        let columns = (0..width).map(|c| format!("c{}", c)).collect();
        let left = random_rows(&mut rng, width);
        let right = if rng.random_bool(0.5) {
            Some(random_rows(&mut rng, width))
        } else {
            None
        };
        Case {
            columns,
            left,
            right,
            min_support: rng.random_range(0..=3),
            prune_nondisjoint: rng.random_bool(0.7),
        }
    }

    fn width(&self) -> usize {
        self.columns.len()
    }

    fn right_rows(&self) -> &[Vec<String>] {
        self.right.as_deref().unwrap_or(&self.left)
    }

    fn source(&self, name: &str, rows: &[Vec<String>]) -> VecSource {
        VecSource::from_rows(name.to_string(), self.columns.clone(), rows.to_vec())
    }

    /// The last column holds numbers compared exactly; the rest hold words compared by edit
    /// distance.
    fn measure(&self, column: usize) -> Box<dyn SimilarityMeasure> {
        if column + 1 == self.width() {
            Box::new(EqualityMeasure::new(1.0).unwrap())
        } else {
            Box::new(LevenshteinMeasure::new(0.3).unwrap())
        }
    }

    /// Similarity vectors of every record pair, computed without any index.
    fn brute_force(&self) -> Vec<Vec<f64>> {
        let measures: Vec<Box<dyn SimilarityMeasure>> =
            (0..self.width()).map(|c| self.measure(c)).collect();
        let mut sims = Vec::new();
        for left in &self.left {
            for right in self.right_rows() {
                sims.push(
                    measures
                        .iter()
                        .enumerate()
                        .map(|(c, m)| {
                            let sim = m.similarity(&left[c], &right[c]);
                            if sim > 0.0 && sim >= m.min_similarity() {
                                sim
                            } else {
                                0.0
                            }
                        })
                        .collect(),
                );
            }
        }
        sims
    }

    fn config(&self) -> HyMdConfig {
        let mut config = HyMdConfig::new()
            .min_support(self.min_support)
            .prune_nondisjoint(self.prune_nondisjoint)
            .threads(1);
        for (c, name) in self.columns.iter().enumerate() {
            config = config.column_match(ColumnMatchSpec::boxed(name, name, self.measure(c)));
        }
        config
    }

    fn run(&self) -> Vec<Md> {
        let mut left = self.source("left", &self.left);
        let hymd = match &self.right {
            Some(rows) => {
                let mut right = self.source("right", rows);
                HyMd::load(self.config(), &mut left, Some(&mut right as &mut dyn RecordSource))
            }
            None => HyMd::load(self.config(), &mut left, None),
        };
        hymd.unwrap().execute().unwrap().into_mds()
    }

    fn records(&self) -> CompressedRecords {
        let left = DictionaryCompressor::from_source(&mut self.source("left", &self.left)).unwrap();
        match &self.right {
            Some(rows) => CompressedRecords::pair(
                left,
                DictionaryCompressor::from_source(&mut self.source("right", rows)).unwrap(),
            ),
            None => CompressedRecords::single(left),
        }
    }
}

fn random_rows(rng: &mut StdRng, width: usize) -> Vec<Vec<String>> {
    let count = rng.random_range(2..=5);
    (0..count)
        .map(|_| {
            (0..width)
                .map(|c| {
                    let pool: &[&str] = if c + 1 == width { &NUMBERS } else { &WORDS };
                    pool[rng.random_range(0..pool.len())].to_string()
                })
                .collect()
        })
        .collect()
}

#[test]
fn discovered_mds_hold_and_are_minimal() {
    for seed in 0..40 {
        let case = Case::generate(seed);
        let sims = case.brute_force();
        let mds = case.run();

        for md in &mds {
            let lhs = md.lhs_bounds();
            let (rhs_index, rhs_bound) = md.rhs();
            let matching: Vec<&Vec<f64>> = sims.iter().filter(|sim| satisfies(sim, &lhs)).collect();

            assert!(matching.len() >= case.min_support, "seed {}: {} lacks support", seed, md);
            for sim in &matching {
                assert!(sim[rhs_index] >= rhs_bound, "seed {}: {} violated by {:?}", seed, md, sim);
            }
            assert!(rhs_bound > lhs[rhs_index], "seed {}: {}", seed, md);
            if case.prune_nondisjoint {
                assert_eq!(lhs[rhs_index], 0.0, "seed {}: {}", seed, md);
            }

            for other in &mds {
                let other_lhs = other.lhs_bounds();
                let (other_index, other_bound) = other.rhs();
                if other_index == rhs_index && other_lhs != lhs {
                    assert!(
                        !(is_generalization(&other_lhs, &lhs) && other_bound >= rhs_bound),
                        "seed {}: {} is implied by {}",
                        seed,
                        md,
                        other
                    );
                }
            }
        }
    }
}

#[test]
fn empty_lhs_claims_lowest_similarity() {
    for seed in 100..140 {
        let case = Case::generate(seed);
        let sims = case.brute_force();
        let mds = case.run();

        // at least four pairs, so the empty LHS always has enough support
        for index in 0..case.width() {
            let lowest = sims.iter().map(|sim| sim[index]).fold(1.0, f64::min);
            let found: Vec<f64> = mds
                .iter()
                .filter(|md| md.cardinality() == 0 && md.rhs().0 == index)
                .map(|md| md.rhs().1)
                .collect();
            if lowest > 0.0 {
                assert_eq!(found, [lowest], "seed {}", seed);
            } else {
                assert!(found.is_empty(), "seed {}", seed);
            }
        }
    }
}

#[test]
fn validating_again_changes_nothing() {
    let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();
    for seed in 200..230 {
        let case = Case::generate(seed);
        let measures: Vec<Box<dyn SimilarityMeasure>> =
            (0..case.width()).map(|c| case.measure(c)).collect();
        let matches: Vec<(usize, usize, &dyn SimilarityMeasure)> = measures
            .iter()
            .enumerate()
            .map(|(c, m)| (c, c, m.as_ref()))
            .collect();
        let data = SimilarityData::create_from(case.records(), &matches, true, &pool).unwrap();

        let mut lattice = FullLattice::new(data.column_match_count());
        let mut recommendations = Recommendations::new();
        let mut traverser = LatticeTraverser::new(&data, case.min_support, case.prune_nondisjoint);
        let mut inferrer = RecordPairInferrer::new(&data, case.prune_nondisjoint);
        loop {
            let inferred_all = inferrer.infer_from_record_pairs(&mut lattice, &mut recommendations);
            if traverser.traverse_lattice(&mut lattice, &mut recommendations, inferred_all)
                && inferred_all
            {
                break;
            }
        }

        let validator = Validator::new(&data, case.min_support);
        for level in 0..=lattice.max_level() {
            for node_info in lattice.get_level(level) {
                let rhs_indices = lattice
                    .rhs(node_info.node)
                    .iter()
                    .enumerate()
                    .filter(|&(_, &bound)| bound != 0.0)
                    .map(|(index, _)| index)
                    .collect();
                let info = ValidationInfo {
                    node_info,
                    rhs_indices,
                };
                let result = validator.validate(&lattice, &info);
                assert!(!result.is_unsupported, "seed {}: {:?}", seed, info.node_info.lhs);
                assert!(result.to_lower.is_empty(), "seed {}: {:?}", seed, result.to_lower);
            }
        }
    }
}
