//! Root-cause drill-down: a greedy, single-branch walk along a path of dimension columns that
//! looks for the narrowest combination of values explaining a deviation of a measure.
//!
//! At each level the current branch is split by the level's column and every value is scored by
//! its *excess*, the part of the deviation it carries. Values whose sample is below `min_sample`,
//! or whose excess is not positive, are dropped; the rest are ranked by excess (descending, ties
//! by value ascending) and checked in a fixed order:
//!
//! 1. Coverage: the top value, followed by every next value that alone carries at least
//!    `marginal_threshold` of the branch deviation, is accumulated until the combined share
//!    reaches `coverage_threshold`. The accumulated values are recorded as steps of the same
//!    depth and the search stops with [`Termination::CoverageReached`].
//! 2. Marginal gain: otherwise the search descends into the top value alone. Below the first
//!    level this needs the value's share of its branch to exceed the previous step's share of
//!    the branch above by at least `marginal_threshold`; the two shares have different bases,
//!    so the difference reads as "how much more concentrated the deviation got by splitting
//!    once more". A level where it falls short fails.
//!
//! A failed level (including one without any qualifying value) is retried with the column's
//! configured fallbacks, in order. When every option fails the search stops with
//! [`Termination::BacktrackExhausted`] and keeps the steps taken so far.
//!
//! The sample of a branch is the denominator of a ratio measure (responses, not rows), the
//! configured `sample_measure`, or otherwise the row count of the measure's primary table.
use crate::engine::Evaluator;
use crate::error::{EngineError, EngineResult};
use crate::filter::{ColumnRef, FilterContext, Predicate};
use crate::measure::MeasureExpr;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Deviations at or below this are treated as zero.
const EPSILON: f64 = 1e-9;

/// Ordered dimension columns to split by, e.g. week, country, product, queue.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrillPath(Vec<ColumnRef>);

impl DrillPath {
    pub fn new(columns: Vec<ColumnRef>) -> Self {
        Self(columns)
    }

    /// Parse `Table[Column]` references.
    pub fn parse<S: AsRef<str>>(columns: &[S]) -> Option<Self> {
        columns
            .iter()
            .map(|c| ColumnRef::parse(c.as_ref()))
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }

    pub fn columns(&self) -> &[ColumnRef] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ColumnRef> for DrillPath {
    fn from_iter<T: IntoIterator<Item = ColumnRef>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrillConfig {
    /// Share of the branch deviation that ends the search.
    pub coverage_threshold: f64,
    /// Smallest sample a chosen value may have.
    pub min_sample: f64,
    /// Smallest improvement in share that justifies descending one more level, and the smallest
    /// share a value needs to join the values accumulated towards coverage.
    pub marginal_threshold: f64,
    /// Alternate columns tried, in order, when a path column yields no acceptable value.
    pub fallbacks: BTreeMap<ColumnRef, Vec<ColumnRef>>,
    /// Measure giving the sample size of a branch. Defaults to the denominator of a ratio
    /// measure, then to the row count of the measure's primary table.
    pub sample_measure: Option<String>,
}

impl Default for DrillConfig {
    fn default() -> Self {
        Self {
            coverage_threshold: 0.8,
            min_sample: 30.0,
            marginal_threshold: 0.05,
            fallbacks: BTreeMap::new(),
            sample_measure: None,
        }
    }
}

impl DrillConfig {
    pub fn with_coverage_threshold(mut self, threshold: f64) -> Self {
        self.coverage_threshold = threshold;
        self
    }

    pub fn with_min_sample(mut self, min_sample: f64) -> Self {
        self.min_sample = min_sample;
        self
    }

    pub fn with_marginal_threshold(mut self, threshold: f64) -> Self {
        self.marginal_threshold = threshold;
        self
    }

    pub fn with_fallback(mut self, column: ColumnRef, alternates: Vec<ColumnRef>) -> Self {
        self.fallbacks.insert(column, alternates);
        self
    }

    pub fn with_sample_measure(mut self, measure: impl Into<String>) -> Self {
        self.sample_measure = Some(measure.into());
        self
    }
}

/// How the deviation of a branch is measured.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "basis", rename_all = "snake_case")]
pub enum Deviation {
    /// For rate measures: `(rate - goal) * sample`, the number of sample units above goal.
    RateAboveGoal { goal: f64 },
    /// `value(branch) - value(reference ∧ branch values)`, e.g. this week against last week.
    /// Blank values count as zero.
    ExcessOverReference { reference: FilterContext },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Nothing to explain at the baseline.
    NoDeviation,
    CoverageReached,
    PathExhausted,
    /// A level and all of its fallbacks failed.
    BacktrackExhausted,
}

/// One chosen value. Several steps share a depth when their values together reached coverage.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DrillStep {
    /// 1 for the first split.
    pub depth: usize,
    pub column: ColumnRef,
    pub value: Value,
    /// Share of the total deviation carried by the branch this step selects.
    pub contribution: f64,
    /// Share of the parent branch's deviation.
    pub local_share: f64,
    pub excess: f64,
    pub sample_size: f64,
    /// The path column this step's column replaced, if a fallback was used.
    pub substituted_for: Option<ColumnRef>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DrillOutcome {
    pub measure: String,
    pub total_deviation: f64,
    pub steps: Vec<DrillStep>,
    pub termination: Termination,
    /// Combined contribution of the steps at the deepest depth; 0 without steps.
    pub coverage: f64,
}

impl DrillOutcome {
    /// The filter context selecting the final combination: one predicate per depth, admitting
    /// every value chosen at that depth.
    pub fn context(&self, baseline: &FilterContext) -> FilterContext {
        let mut levels: BTreeMap<usize, (&ColumnRef, Vec<Value>)> = BTreeMap::new();
        for step in &self.steps {
            levels
                .entry(step.depth)
                .or_insert_with(|| (&step.column, Vec::new()))
                .1
                .push(step.value.clone());
        }
        levels
            .into_values()
            .fold(baseline.clone(), |ctx, (column, values)| {
                ctx.with(column.clone(), Predicate::one_of(values))
            })
    }
}

fn coverage_of(steps: &[DrillStep]) -> f64 {
    let Some(last) = steps.last() else {
        return 0.0;
    };
    steps
        .iter()
        .filter(|s| s.depth == last.depth)
        .map(|s| s.contribution)
        .sum()
}

struct Candidate {
    value: Value,
    excess: f64,
    sample: f64,
}

struct Search<'e, 'a> {
    evaluator: &'e Evaluator<'a>,
    measure: &'e str,
    primary: &'e str,
    /// Measure (or ratio denominator) giving the sample of a branch.
    sample: Option<MeasureExpr>,
    baseline: &'e FilterContext,
    deviation: &'e Deviation,
    config: &'e DrillConfig,
}

impl Search<'_, '_> {
    fn branch(ctx: &FilterContext, fixed: &[(ColumnRef, Value)]) -> FilterContext {
        fixed.iter().fold(ctx.clone(), |acc, (column, value)| {
            acc.with(column.clone(), Predicate::equals(value.clone()))
        })
    }

    fn sample(&self, ctx: &FilterContext) -> EngineResult<f64> {
        match &self.sample {
            Some(expr) => Ok(self
                .evaluator
                .evaluate_expr(expr, ctx)?
                .as_f64()
                .unwrap_or(0.0)),
            None => Ok(self.evaluator.count_rows(self.primary, ctx)? as f64),
        }
    }

    /// Excess and sample of the branch fixing `fixed` on top of the baseline.
    fn score(&self, fixed: &[(ColumnRef, Value)]) -> EngineResult<(f64, f64)> {
        let ctx = Self::branch(self.baseline, fixed);
        let sample = self.sample(&ctx)?;
        let value = self.evaluator.evaluate(self.measure, &ctx)?.as_f64();
        let excess = match self.deviation {
            Deviation::RateAboveGoal { goal } => value.map_or(0.0, |v| (v - goal) * sample),
            Deviation::ExcessOverReference { reference } => {
                let reference = Self::branch(reference, fixed);
                let reference = self
                    .evaluator
                    .evaluate(self.measure, &reference)?
                    .as_f64()
                    .unwrap_or(0.0);
                value.unwrap_or(0.0) - reference
            }
        };
        Ok((excess, sample))
    }

    fn candidates(
        &self,
        fixed: &[(ColumnRef, Value)],
        column: &ColumnRef,
    ) -> EngineResult<Vec<Candidate>> {
        let ctx = Self::branch(self.baseline, fixed);
        let values = self.evaluator.distinct_values(self.primary, column, &ctx)?;

        let score_value = |value: &Value| -> EngineResult<Candidate> {
            let mut with_value = fixed.to_vec();
            with_value.push((column.clone(), value.clone()));
            let (excess, sample) = self.score(&with_value)?;
            Ok(Candidate {
                value: value.clone(),
                excess,
                sample,
            })
        };

        #[cfg(feature = "parallel")]
        let mut scored = values
            .par_iter()
            .map(score_value)
            .collect::<EngineResult<Vec<_>>>()?;
        #[cfg(not(feature = "parallel"))]
        let mut scored = values
            .iter()
            .map(score_value)
            .collect::<EngineResult<Vec<_>>>()?;

        scored.sort_by(|a, b| {
            b.excess
                .partial_cmp(&a.excess)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.value.cmp(&b.value))
        });
        Ok(scored)
    }
}

/// Search for the combination of `path` values explaining the deviation of `measure` under
/// `baseline`.
pub fn drill(
    evaluator: &Evaluator<'_>,
    measure: &str,
    baseline: &FilterContext,
    path: &DrillPath,
    deviation: &Deviation,
    config: &DrillConfig,
) -> EngineResult<DrillOutcome> {
    let model = evaluator.model();
    let definition = model.measures().get(measure)?;
    if let Some(sample) = &config.sample_measure {
        model.measures().get(sample)?;
    }
    let primary = model
        .measures()
        .primary_table(&definition.expression)
        .ok_or_else(|| EngineError::InvalidMeasure {
            measure: definition.name.clone(),
            reason: "drill-down needs a measure that scans a table".to_string(),
        })?;

    let sample = match &config.sample_measure {
        Some(name) => Some(MeasureExpr::measure(name.clone())),
        None => model.measures().ratio_denominator(&definition.expression),
    };
    let search = Search {
        evaluator,
        measure: &definition.name,
        primary,
        sample,
        baseline,
        deviation,
        config,
    };

    let (total, _) = search.score(&[])?;
    let finish = |steps: Vec<DrillStep>, termination: Termination| {
        let coverage = coverage_of(&steps);
        log::info!(
            "drill of {} stopped after {} steps: {termination:?}, coverage {coverage:.3}",
            definition.name,
            steps.len()
        );
        DrillOutcome {
            measure: definition.name.clone(),
            total_deviation: total,
            steps,
            termination,
            coverage,
        }
    };
    if total <= EPSILON {
        return Ok(finish(Vec::new(), Termination::NoDeviation));
    }

    let mut steps: Vec<DrillStep> = Vec::new();
    let mut fixed: Vec<(ColumnRef, Value)> = Vec::new();
    let mut branch_excess = total;
    let mut prev_share = 0.0;

    for path_column in path.columns() {
        evaluator.cancel_token().check()?;
        let depth = fixed.len() + 1;
        let alternates = config
            .fallbacks
            .get(path_column)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut accepted = false;
        for (attempt, column) in std::iter::once(path_column).chain(alternates).enumerate() {
            let substituted_for = (attempt > 0).then(|| path_column.clone());
            let ranked: Vec<Candidate> = search
                .candidates(&fixed, column)?
                .into_iter()
                .filter(|c| c.sample >= config.min_sample && c.excess > EPSILON)
                .collect();
            let Some(top) = ranked.first() else {
                log::debug!("{column}: no value with enough sample and positive excess");
                continue;
            };

            let step_for = |candidate: &Candidate| DrillStep {
                depth,
                column: column.clone(),
                value: candidate.value.clone(),
                contribution: candidate.excess / total,
                local_share: candidate.excess / branch_excess,
                excess: candidate.excess,
                sample_size: candidate.sample,
                substituted_for: substituted_for.clone(),
            };

            let mut selected = Vec::new();
            let mut covered = 0.0;
            for (rank, candidate) in ranked.iter().enumerate() {
                let share = candidate.excess / branch_excess;
                if rank > 0 && share < config.marginal_threshold {
                    break;
                }
                selected.push(step_for(candidate));
                covered += share;
                if covered >= config.coverage_threshold {
                    log::debug!(
                        "{column}: {} values cover {covered:.3} of the branch",
                        selected.len()
                    );
                    steps.extend(selected);
                    return Ok(finish(steps, Termination::CoverageReached));
                }
            }

            let local_share = top.excess / branch_excess;
            if depth > 1 && local_share - prev_share < config.marginal_threshold {
                log::debug!("{column}: improvement below marginal threshold");
                continue;
            }
            log::debug!(
                "{column} = {}: excess {:.3}, local share {local_share:.3}",
                top.value,
                top.excess
            );

            steps.push(step_for(top));
            fixed.push((column.clone(), top.value.clone()));
            branch_excess = top.excess;
            prev_share = local_share;
            accepted = true;
            break;
        }

        if !accepted {
            return Ok(finish(steps, Termination::BacktrackExhausted));
        }
    }

    Ok(finish(steps, Termination::PathExhausted))
}
