use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use insight_engine::{
    CancelToken, ColumnRef, DataModel, Deviation, DrillConfig, DrillPath, FilterContext,
    ModelDefinition, Predicate, RangeBound, TableBackend, TableDef, Value,
};
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(name = "insight")]
#[command(about = "Evaluate measures and drill into deviations of a star-schema model.")]
struct Cli {
    /// Model definition (JSON). Table `source` paths are resolved relative to this file.
    #[arg(long, short = 'm')]
    model: PathBuf,

    /// Abort queries that run longer than this many milliseconds.
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Emit compact instead of pretty-printed JSON.
    #[arg(long)]
    compact: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Summarize facts, dimensions, relationships, anchors and measures.
    Describe,
    /// Evaluate one measure under a filter context.
    Evaluate(EvaluateArgs),
    /// Evaluate one measure per distinct combination of grouping columns.
    Grouped(GroupedArgs),
    /// Search for the combination of dimension values explaining a deviation.
    Drill(DrillArgs),
    /// Referential integrity reports for the relationships of a fact (all facts by default).
    Integrity(IntegrityArgs),
    /// Anchor date and freshness profile of a fact date column.
    Anchor(AnchorArgs),
}

#[derive(Debug, Parser)]
struct ContextArgs {
    /// Column filter: `Table[Column]=v`, `=a|b|c`, `<=v` or `>=v`. An empty value selects blanks.
    #[arg(long = "filter", short = 'f')]
    filters: Vec<String>,

    /// Relationship to use for its (fact, dimension) pair.
    #[arg(long = "use-relationship")]
    relationships: Vec<String>,

    /// Filter context as JSON, applied before `--filter`.
    #[arg(long = "context")]
    context: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct EvaluateArgs {
    #[arg(long)]
    measure: String,

    #[command(flatten)]
    context: ContextArgs,
}

#[derive(Debug, Parser)]
struct GroupedArgs {
    #[arg(long)]
    measure: String,

    /// Grouping column (`Table[Column]`), repeatable.
    #[arg(long = "by", required = true)]
    group_by: Vec<String>,

    #[command(flatten)]
    context: ContextArgs,
}

#[derive(Debug, Parser)]
struct DrillArgs {
    #[arg(long)]
    measure: String,

    /// Drill path column (`Table[Column]`), in order, repeatable.
    #[arg(long = "path", required = true)]
    path: Vec<String>,

    /// Score branches as `(rate - goal) * sample` against this goal.
    #[arg(long, conflicts_with = "reference_filters")]
    goal: Option<f64>,

    /// Score branches against the measure under this filter instead (e.g. the previous week).
    #[arg(long = "reference-filter")]
    reference_filters: Vec<String>,

    /// Drill configuration as JSON; flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    coverage: Option<f64>,

    #[arg(long = "min-sample")]
    min_sample: Option<f64>,

    #[arg(long)]
    marginal: Option<f64>,

    /// Fallback columns: `Table[Column]=Alt[Column],Other[Column]`, repeatable.
    #[arg(long = "fallback")]
    fallbacks: Vec<String>,

    /// Measure giving the sample size of a branch.
    #[arg(long = "sample-measure")]
    sample_measure: Option<String>,

    #[command(flatten)]
    context: ContextArgs,
}

#[derive(Debug, Parser)]
struct IntegrityArgs {
    #[arg(long)]
    fact: Option<String>,
}

#[derive(Debug, Parser)]
struct AnchorArgs {
    #[arg(long)]
    table: String,

    /// Date column; defaults to the fact's declared anchor column.
    #[arg(long)]
    column: Option<String>,
}

#[derive(Debug, Serialize)]
struct EvaluateOutput<'a> {
    measure: &'a str,
    value: Value,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let model = load_model(&cli.model)?;
    let cancel = match cli.timeout_ms {
        Some(ms) => CancelToken::with_timeout(Duration::from_millis(ms)),
        None => CancelToken::new(),
    };

    let output = match &cli.command {
        Command::Describe => serde_json::to_value(model.describe())?,
        Command::Evaluate(args) => {
            let ctx = build_context(&model, &args.context)?;
            let value = model.evaluate_with(&args.measure, &ctx, &cancel)?;
            serde_json::to_value(EvaluateOutput {
                measure: &args.measure,
                value,
            })?
        }
        Command::Grouped(args) => {
            let ctx = build_context(&model, &args.context)?;
            let group_by = parse_columns(&args.group_by)?;
            let result = model.evaluate_grouped_with(&args.measure, &group_by, &ctx, &cancel)?;
            serde_json::to_value(result)?
        }
        Command::Drill(args) => {
            let baseline = build_context(&model, &args.context)?;
            let path = DrillPath::new(parse_columns(&args.path)?);
            let deviation = match args.goal {
                Some(goal) => Deviation::RateAboveGoal { goal },
                None if !args.reference_filters.is_empty() => Deviation::ExcessOverReference {
                    reference: apply_filters(&model, baseline.clone(), &args.reference_filters)?,
                },
                None => bail!("drill needs --goal or at least one --reference-filter"),
            };
            let config = drill_config(args)?;
            serde_json::to_value(model.drill_with(
                &args.measure,
                &baseline,
                &path,
                &deviation,
                &config,
                &cancel,
            )?)?
        }
        Command::Integrity(args) => match &args.fact {
            Some(fact) => serde_json::to_value(model.check_integrity_with(fact, &cancel)?)?,
            None => serde_json::to_value(model.integrity_on_load())?,
        },
        Command::Anchor(args) => {
            serde_json::to_value(model.anchor_profile(&args.table, args.column.as_deref())?)?
        }
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if cli.compact {
        serde_json::to_writer(&mut out, &output)?;
    } else {
        serde_json::to_writer_pretty(&mut out, &output)?;
    }
    writeln!(out)?;
    Ok(())
}

fn load_model(path: &Path) -> Result<DataModel> {
    let file = File::open(path).with_context(|| format!("open model {}", path.display()))?;
    let definition = ModelDefinition::from_reader(BufReader::new(file))
        .with_context(|| format!("parse model {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let model = definition
        .build_with(|table| load_csv(base, table))
        .with_context(|| format!("load model {}", path.display()))?;
    log::info!("loaded model from {}", path.display());
    Ok(model)
}

fn load_csv(base: &Path, table: &TableDef) -> Result<Arc<dyn TableBackend>> {
    let source = table
        .source
        .as_ref()
        .with_context(|| format!("table {} has neither inline rows nor a source", table.name))?;
    let path = base.join(source);
    let mut reader =
        csv::Reader::from_path(&path).with_context(|| format!("open {}", path.display()))?;
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let records = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("read {}", path.display()))?;
    let data = table
        .table_from_text_rows(&header, records.iter().map(|r| r.iter().collect::<Vec<&str>>()))
        .with_context(|| format!("load {}", path.display()))?;
    log::debug!("{}: {} rows from {}", table.name, records.len(), path.display());
    Ok(Arc::new(data))
}

fn parse_columns(columns: &[String]) -> Result<Vec<ColumnRef>> {
    columns
        .iter()
        .map(|c| ColumnRef::parse(c).with_context(|| format!("expected Table[Column], got {c:?}")))
        .collect()
}

fn build_context(model: &DataModel, args: &ContextArgs) -> Result<FilterContext> {
    let mut ctx = match &args.context {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("parse filter context {}", path.display()))?
        }
        None => FilterContext::empty(),
    };
    for relationship in &args.relationships {
        ctx = ctx.with_relationship(relationship.as_str());
    }
    apply_filters(model, ctx, &args.filters)
}

fn apply_filters(
    model: &DataModel,
    ctx: FilterContext,
    filters: &[String],
) -> Result<FilterContext> {
    filters.iter().try_fold(ctx, |ctx, raw| {
        let (column, predicate) = parse_filter(model, raw)?;
        Ok(ctx.with(column, predicate))
    })
}

/// Parse `Table[Column]<op>value` where `<op>` is `=`, `<=` or `>=`. Values are read with the
/// declared type of the column.
fn parse_filter(model: &DataModel, raw: &str) -> Result<(ColumnRef, Predicate)> {
    let (column, op, value) = split_filter(raw)
        .with_context(|| format!("expected Table[Column]=value, got {raw:?}"))?;
    let column = ColumnRef::parse(column)
        .with_context(|| format!("expected Table[Column], got {column:?}"))?;
    let column_type = model
        .schema()
        .column(&column.table, &column.column)
        .with_context(|| format!("unknown column {column}"))?
        .column_type;
    let parse = |text: &str| -> Result<Value> {
        column_type
            .parse_text(text)
            .with_context(|| format!("{text:?} is not a valid {column_type:?} value for {column}"))
    };

    let predicate = match op {
        "<=" => Predicate::range(None, Some(RangeBound::inclusive(parse(value)?))),
        ">=" => Predicate::range(Some(RangeBound::inclusive(parse(value)?)), None),
        _ if value.contains('|') => {
            Predicate::one_of(value.split('|').map(parse).collect::<Result<Vec<_>>>()?)
        }
        _ => Predicate::equals(parse(value)?),
    };
    Ok((column, predicate))
}

fn split_filter(raw: &str) -> Option<(&str, &str, &str)> {
    let close = raw.find(']')?;
    let (column, rest) = raw.split_at(close + 1);
    for op in ["<=", ">=", "="] {
        if let Some(value) = rest.strip_prefix(op) {
            return Some((column.trim(), op, value.trim()));
        }
    }
    None
}

fn drill_config(args: &DrillArgs) -> Result<DrillConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("parse drill config {}", path.display()))?
        }
        None => DrillConfig::default(),
    };
    if let Some(coverage) = args.coverage {
        config = config.with_coverage_threshold(coverage);
    }
    if let Some(min_sample) = args.min_sample {
        config = config.with_min_sample(min_sample);
    }
    if let Some(marginal) = args.marginal {
        config = config.with_marginal_threshold(marginal);
    }
    for raw in &args.fallbacks {
        let (column, alternates) = raw
            .split_once('=')
            .with_context(|| format!("expected Table[Column]=Alt[Column],..., got {raw:?}"))?;
        let column = parse_columns(&[column.trim().to_string()])?.remove(0);
        let alternates: Vec<String> = alternates.split(',').map(|s| s.trim().to_string()).collect();
        config = config.with_fallback(column, parse_columns(&alternates)?);
    }
    if let Some(measure) = &args.sample_measure {
        config = config.with_sample_measure(measure.clone());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_filters_on_the_first_operator_after_the_column() {
        assert_eq!(
            split_filter("DimGeo[Country]=US"),
            Some(("DimGeo[Country]", "=", "US"))
        );
        assert_eq!(
            split_filter("FactSurvey[CsatScore]<=2"),
            Some(("FactSurvey[CsatScore]", "<=", "2"))
        );
        assert_eq!(
            split_filter("Fact[Note]=a=b"),
            Some(("Fact[Note]", "=", "a=b"))
        );
        assert_eq!(split_filter("DimGeo[Country]"), None);
        assert_eq!(split_filter("Country=US"), None);
    }

    #[test]
    fn parses_repeated_columns() {
        let columns = parse_columns(&["DimGeo[Country]".to_string(), "Fact.Week".to_string()])
            .unwrap();
        assert_eq!(
            columns,
            vec![ColumnRef::new("DimGeo", "Country"), ColumnRef::new("Fact", "Week")]
        );
        assert!(parse_columns(&["Country".to_string()]).is_err());
    }
}
