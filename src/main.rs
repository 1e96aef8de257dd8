use clap::{ArgAction, Parser};
use hymd::measure::measure_by_name;
use hymd::{ColumnMatchSpec, CsvSource, HyMd, HyMdConfig, RecordSource};
use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Discovers matching dependencies between two delimited text tables
#[derive(Parser, Debug)]
#[command(name = "hymd", version, long_about = None)]
struct Args {
    /// Left table
    #[arg(long)]
    left: PathBuf,

    /// Right table; the left table is compared with itself if omitted
    #[arg(long)]
    right: Option<PathBuf>,

    /// Field delimiter, a single ASCII character or "tab"
    #[arg(long, default_value = ",", value_parser = parse_delimiter)]
    delimiter: u8,

    /// The first row holds data, not column names
    #[arg(long)]
    no_header: bool,

    /// Column match as LEFT:RIGHT:MEASURE[:MIN_SIM]; repeatable. Measures: equality,
    /// levenshtein, monge_elkan, number
    #[arg(long = "match", value_parser = parse_match)]
    matches: Vec<MatchArg>,

    /// Record pairs an LHS must cover
    #[arg(long, default_value_t = 0)]
    min_support: usize,

    /// Whether two NULL values are equal
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    null_equal_null: bool,

    /// Let an LHS constrain the column match its RHS is about
    #[arg(long)]
    allow_nondisjoint: bool,

    /// Threads for building similarity indexes, 0 for one per core
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Debug)]
struct MatchArg {
    left: String,
    right: String,
    measure: String,
    min_similarity: f64,
}

fn parse_delimiter(arg: &str) -> Result<u8, String> {
    match arg {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        _ if arg.len() == 1 && arg.is_ascii() => Ok(arg.as_bytes()[0]),
        _ => Err(format!("expected one ASCII character, got {:?}", arg)),
    }
}

fn parse_match(arg: &str) -> Result<MatchArg, String> {
    let parts: Vec<&str> = arg.split(':').collect();
    let min_similarity = match parts.get(3) {
        Some(min) => min
            .parse()
            .map_err(|e| format!("bad minimum similarity {:?}: {}", min, e))?,
        None => 0.0,
    };
    match parts[..] {
        [left, right, measure] | [left, right, measure, _] => Ok(MatchArg {
            left: left.to_string(),
            right: right.to_string(),
            measure: measure.to_string(),
            min_similarity,
        }),
        _ => Err(format!("expected LEFT:RIGHT:MEASURE[:MIN_SIM], got {:?}", arg)),
    }
}

fn open_table(path: &Path, args: &Args) -> Result<CsvSource<BufReader<File>>, Box<dyn Error>> {
    let name = path
        .file_stem()
        .map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned());
    let file = BufReader::new(File::open(path)?);
    Ok(CsvSource::new(&name, file, args.delimiter, !args.no_header)?)
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&args.log_level))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = HyMdConfig::new()
        .min_support(args.min_support)
        .null_equal_null(args.null_equal_null)
        .prune_nondisjoint(!args.allow_nondisjoint)
        .threads(args.threads);
    for m in &args.matches {
        let measure = measure_by_name(&m.measure, m.min_similarity)?;
        config = config.column_match(ColumnMatchSpec::boxed(&m.left, &m.right, measure));
    }

    let mut left = open_table(&args.left, &args)?;
    let hymd = match &args.right {
        Some(path) => {
            let mut right = open_table(path, &args)?;
            HyMd::load(config, &mut left, Some(&mut right as &mut dyn RecordSource))?
        }
        None => HyMd::load(config, &mut left, None)?,
    };

    let output = hymd.execute()?;
    for md in output.mds() {
        println!("{}", md);
    }

    let diagnostics = output.diagnostics();
    info!(
        mds = output.mds().len(),
        validations = diagnostics.validations,
        levels = diagnostics.levels,
        pairs_inferred = diagnostics.pairs_inferred,
        mds_refined = diagnostics.mds_refined,
        nodes_visited = diagnostics.nodes_visited,
        skipped_rows = diagnostics.skipped_rows,
        "done"
    );
    Ok(())
}
