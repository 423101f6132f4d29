//! Series catalog: the panel of related series trained and forecast together.
//!
//! Every entry is keyed by a [`SeriesId`] and positioned on the catalog's
//! shared [`Calendar`] by integer step offsets. The catalog is read-only once
//! built; training and prediction only borrow it.

mod table;

pub use table::{Column, ColumnRoles, Table};

use crate::core::Calendar;
use crate::error::{ForecastError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Identity of a series: the target column plus its identifier values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesId {
    target: String,
    identifiers: Vec<(String, String)>,
}

impl SeriesId {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            identifiers: Vec::new(),
        }
    }

    pub fn with_identifier(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.identifiers.push((column.into(), value.into()));
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn identifiers(&self) -> &[(String, String)] {
        &self.identifiers
    }

    pub fn identifier(&self, column: &str) -> Option<&str> {
        self.identifiers
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target)?;
        if !self.identifiers.is_empty() {
            let pairs: Vec<String> = self
                .identifiers
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, "[{}]", pairs.join(","))?;
        }
        Ok(())
    }
}

/// A static categorical feature and its vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalFeature {
    pub name: String,
    pub levels: Vec<String>,
}

impl CategoricalFeature {
    pub fn new(name: impl Into<String>, levels: Vec<String>) -> Self {
        Self {
            name: name.into(),
            levels,
        }
    }

    pub fn cardinality(&self) -> usize {
        self.levels.len()
    }

    pub fn code_of(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == level)
    }
}

/// Shapes and names of the features every series in a catalog carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub static_categorical: Vec<CategoricalFeature>,
    pub static_real: Vec<String>,
    pub dynamic_real: Vec<String>,
}

impl FeatureSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_static_categorical(mut self, name: impl Into<String>, levels: Vec<String>) -> Self {
        self.static_categorical
            .push(CategoricalFeature::new(name, levels));
        self
    }

    pub fn with_static_real(mut self, name: impl Into<String>) -> Self {
        self.static_real.push(name.into());
        self
    }

    pub fn with_dynamic_real(mut self, name: impl Into<String>) -> Self {
        self.dynamic_real.push(name.into());
        self
    }

    pub fn has_dynamic(&self) -> bool {
        !self.dynamic_real.is_empty()
    }

    pub fn has_static_categorical(&self) -> bool {
        !self.static_categorical.is_empty()
    }

    pub fn num_dynamic(&self) -> usize {
        self.dynamic_real.len()
    }

    /// Targets are univariate per series.
    pub fn target_dim(&self) -> usize {
        1
    }

    pub fn cardinalities(&self) -> Vec<usize> {
        self.static_categorical
            .iter()
            .map(CategoricalFeature::cardinality)
            .collect()
    }

    /// Every difference that would make parameters trained on `self` invalid
    /// for data shaped like `other`.
    ///
    /// Categorical levels are compared by name: `other` may use a prefix of
    /// `self`'s vocabulary, but every code it assigns must name the same level.
    pub fn differences(&self, other: &FeatureSchema) -> Vec<String> {
        let mut out = Vec::new();
        let names = |s: &FeatureSchema| -> Vec<String> {
            s.static_categorical.iter().map(|c| c.name.clone()).collect()
        };
        if names(self) != names(other) {
            out.push(format!(
                "static categorical features {:?} != {:?}",
                names(self),
                names(other)
            ));
        } else {
            for (a, b) in self.static_categorical.iter().zip(&other.static_categorical) {
                let unknown: Vec<&String> =
                    b.levels.iter().filter(|l| a.code_of(l).is_none()).collect();
                if !unknown.is_empty() {
                    out.push(format!(
                        "static categorical '{}' has levels {:?} the artifact does not know",
                        a.name, unknown
                    ));
                } else if !a.levels.starts_with(&b.levels) {
                    out.push(format!(
                        "static categorical '{}' encodes levels {:?}, artifact encodes {:?}",
                        a.name, b.levels, a.levels
                    ));
                }
            }
        }
        if self.static_real != other.static_real {
            out.push(format!(
                "static real features {:?} != {:?}",
                self.static_real, other.static_real
            ));
        }
        if self.dynamic_real != other.dynamic_real {
            out.push(format!(
                "dynamic features {:?} != {:?}",
                self.dynamic_real, other.dynamic_real
            ));
        }
        out
    }
}

/// Per-series static feature values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticFeatures {
    /// Level codes, one per categorical feature.
    pub categorical: Vec<usize>,
    pub real: Vec<f64>,
}

impl StaticFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_categorical(mut self, code: usize) -> Self {
        self.categorical.push(code);
        self
    }

    pub fn with_real(mut self, value: f64) -> Self {
        self.real.push(value);
        self
    }
}

/// Time-varying features for registration: one row per calendar step from
/// `start`. Rows may extend past the end of the target.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicFeatures {
    pub start: DateTime<Utc>,
    pub rows: Vec<Vec<f64>>,
}

impl DynamicFeatures {
    pub fn new(start: DateTime<Utc>, rows: Vec<Vec<f64>>) -> Self {
        Self { start, rows }
    }
}

/// One series of the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesEntry {
    id: SeriesId,
    start_step: i64,
    target: Vec<f64>,
    statics: StaticFeatures,
    dynamic_start: i64,
    dynamic_rows: Vec<Vec<f64>>,
}

impl SeriesEntry {
    pub fn id(&self) -> &SeriesId {
        &self.id
    }

    pub fn start_step(&self) -> i64 {
        self.start_step
    }

    /// One past the last target step.
    pub fn end_step(&self) -> i64 {
        self.start_step + self.target.len() as i64
    }

    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    /// Target values; NaN marks a missing observation.
    pub fn target(&self) -> &[f64] {
        &self.target
    }

    /// Target at an absolute step, NaN outside the series.
    pub fn value_at(&self, step: i64) -> f64 {
        let offset = step - self.start_step;
        if offset < 0 {
            return f64::NAN;
        }
        self.target
            .get(offset as usize)
            .copied()
            .unwrap_or(f64::NAN)
    }

    pub fn observed_count(&self) -> usize {
        self.target.iter().filter(|v| !v.is_nan()).count()
    }

    pub fn statics(&self) -> &StaticFeatures {
        &self.statics
    }

    pub fn has_dynamic(&self) -> bool {
        !self.dynamic_rows.is_empty()
    }

    /// Half-open step range covered by dynamic features.
    pub fn dynamic_range(&self) -> Option<(i64, i64)> {
        if self.dynamic_rows.is_empty() {
            None
        } else {
            Some((
                self.dynamic_start,
                self.dynamic_start + self.dynamic_rows.len() as i64,
            ))
        }
    }

    pub fn dynamic_row(&self, step: i64) -> Option<&[f64]> {
        let offset = step - self.dynamic_start;
        if offset < 0 {
            return None;
        }
        self.dynamic_rows.get(offset as usize).map(Vec::as_slice)
    }
}

/// Minimum data each series must provide for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRequirements {
    /// Steps past the target end that dynamic features must cover.
    pub horizon: usize,
    /// Minimum target length; shorter series are reported.
    pub min_length: usize,
}

impl HistoryRequirements {
    pub fn new(horizon: usize, min_length: usize) -> Self {
        Self {
            horizon,
            min_length,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaSource {
    Unset,
    Inferred,
    Declared,
}

/// The panel of series for a run.
#[derive(Debug, Clone)]
pub struct SeriesCatalog {
    calendar: Calendar,
    schema: FeatureSchema,
    schema_source: SchemaSource,
    series: Vec<SeriesEntry>,
    index: HashMap<SeriesId, usize>,
}

impl SeriesCatalog {
    /// Empty catalog whose schema is taken from the first registration.
    pub fn new(calendar: Calendar) -> Self {
        Self {
            calendar,
            schema: FeatureSchema::default(),
            schema_source: SchemaSource::Unset,
            series: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Declare the feature schema up front.
    pub fn with_schema(mut self, schema: FeatureSchema) -> Self {
        self.schema = schema;
        self.schema_source = SchemaSource::Declared;
        self
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeriesEntry> {
        self.series.iter()
    }

    pub fn get(&self, index: usize) -> Option<&SeriesEntry> {
        self.series.get(index)
    }

    pub fn find(&self, id: &SeriesId) -> Option<&SeriesEntry> {
        self.index.get(id).map(|&i| &self.series[i])
    }

    pub fn series_ids(&self) -> Vec<SeriesId> {
        self.series.iter().map(|s| s.id.clone()).collect()
    }

    /// Add a series.
    ///
    /// Fails with `DuplicateSeries` when the identity is taken and with
    /// `SchemaMismatch` listing every shape problem when the features do not
    /// match the catalog schema.
    pub fn register(
        &mut self,
        id: SeriesId,
        start: DateTime<Utc>,
        target: &[f64],
        statics: Option<&StaticFeatures>,
        dynamic: Option<&DynamicFeatures>,
    ) -> Result<()> {
        let start_step = self.calendar.to_step(start)?;
        let (dynamic_start, dynamic_rows) = match dynamic {
            Some(d) => (self.calendar.to_step(d.start)?, d.rows.clone()),
            None => (start_step, Vec::new()),
        };
        self.insert(SeriesEntry {
            id,
            start_step,
            target: target.to_vec(),
            statics: statics.cloned().unwrap_or_default(),
            dynamic_start,
            dynamic_rows,
        })
    }

    fn insert(&mut self, entry: SeriesEntry) -> Result<()> {
        if self.index.contains_key(&entry.id) {
            return Err(ForecastError::DuplicateSeries {
                series_id: entry.id.to_string(),
            });
        }
        if self.schema_source == SchemaSource::Unset {
            self.schema = infer_schema(&entry);
            self.schema_source = SchemaSource::Inferred;
        }

        let violations = self.schema_violations(&entry);
        if !violations.is_empty() {
            return Err(ForecastError::SchemaMismatch {
                series_id: entry.id.to_string(),
                violations,
            });
        }

        if self.schema_source == SchemaSource::Inferred {
            for (feature, &code) in self
                .schema
                .static_categorical
                .iter_mut()
                .zip(&entry.statics.categorical)
            {
                while feature.levels.len() <= code {
                    feature.levels.push(feature.levels.len().to_string());
                }
            }
        }

        self.index.insert(entry.id.clone(), self.series.len());
        self.series.push(entry);
        Ok(())
    }

    fn schema_violations(&self, entry: &SeriesEntry) -> Vec<String> {
        let schema = &self.schema;
        let mut v = Vec::new();

        if entry.target.is_empty() {
            v.push("target is empty".to_string());
        }

        let cats = &entry.statics.categorical;
        if cats.len() != schema.static_categorical.len() {
            v.push(format!(
                "expected {} static categorical features, got {}",
                schema.static_categorical.len(),
                cats.len()
            ));
        } else if self.schema_source == SchemaSource::Declared {
            for (feature, &code) in schema.static_categorical.iter().zip(cats) {
                if code >= feature.cardinality() {
                    v.push(format!(
                        "static categorical '{}' code {} exceeds cardinality {}",
                        feature.name,
                        code,
                        feature.cardinality()
                    ));
                }
            }
        }

        let reals = &entry.statics.real;
        if reals.len() != schema.static_real.len() {
            v.push(format!(
                "expected {} static real features, got {}",
                schema.static_real.len(),
                reals.len()
            ));
        }
        if reals.iter().any(|x| !x.is_finite()) {
            v.push("static real features contain non-finite values".to_string());
        }

        let width = schema.num_dynamic();
        match (width, entry.dynamic_rows.is_empty()) {
            (0, false) => v.push(format!(
                "unexpected dynamic features ({} per step)",
                entry.dynamic_rows[0].len()
            )),
            (w, true) if w > 0 => v.push(format!("missing dynamic features (expected {w})")),
            _ => {}
        }
        if width > 0 {
            let bad: Vec<usize> = entry
                .dynamic_rows
                .iter()
                .enumerate()
                .filter(|(_, row)| row.len() != width)
                .map(|(i, _)| i)
                .collect();
            if let Some(first) = bad.first() {
                v.push(format!(
                    "{} dynamic rows do not have {} values (first at row {})",
                    bad.len(),
                    width,
                    first
                ));
            }
            if entry
                .dynamic_rows
                .iter()
                .flatten()
                .any(|x| !x.is_finite())
            {
                v.push("dynamic features contain non-finite values".to_string());
            }
        }
        v
    }

    /// Check every series against the run's requirements and report all
    /// problems at once.
    pub fn validate(&self, requirements: &HistoryRequirements) -> Result<()> {
        let mut uncovered = Vec::new();
        let mut short = Vec::new();

        for entry in &self.series {
            if self.schema.has_dynamic() {
                let needed_end = entry.end_step() + requirements.horizon as i64;
                let covered = matches!(
                    entry.dynamic_range(),
                    Some((start, end)) if start <= entry.start_step && end >= needed_end
                );
                if !covered {
                    uncovered.push(entry.id.to_string());
                }
            }
            if entry.len() < requirements.min_length || entry.observed_count() == 0 {
                short.push(entry.id.to_string());
            }
        }

        let mut errors = Vec::new();
        if !uncovered.is_empty() {
            errors.push(ForecastError::InsufficientFeatureCoverage {
                series_ids: uncovered,
            });
        }
        if !short.is_empty() {
            errors.push(ForecastError::InsufficientHistory {
                needed: requirements.min_length,
                series_ids: short,
            });
        }
        match ForecastError::collect(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Copy of the catalog with the last `steps` target values of every series
    /// removed. Dynamic features are kept whole.
    pub fn truncated(&self, steps: usize) -> Self {
        let mut out = self.clone();
        for entry in &mut out.series {
            let keep = entry.target.len().saturating_sub(steps);
            entry.target.truncate(keep);
        }
        out
    }

    /// Build a catalog from the host's table.
    ///
    /// Rows are grouped by the identifier columns; each group yields one series
    /// per target column. Dynamic features come from `features` when given
    /// (keyed by the same identifier and time columns), otherwise from the
    /// main table. Categorical vocabularies are the sorted distinct values of
    /// each static column.
    pub fn from_table(
        table: &Table,
        roles: &ColumnRoles,
        calendar: Calendar,
        features: Option<&Table>,
    ) -> Result<Self> {
        Self::build_from_table(table, roles, calendar, features, None)
    }

    /// Build a catalog whose static categoricals are encoded with the
    /// vocabularies of `known`, typically a trained artifact's schema.
    ///
    /// Values outside a known vocabulary are reported per series rather than
    /// given a new code.
    pub fn from_table_with_schema(
        table: &Table,
        roles: &ColumnRoles,
        calendar: Calendar,
        features: Option<&Table>,
        known: &FeatureSchema,
    ) -> Result<Self> {
        Self::build_from_table(table, roles, calendar, features, Some(known))
    }

    fn build_from_table(
        table: &Table,
        roles: &ColumnRoles,
        calendar: Calendar,
        features: Option<&Table>,
        known: Option<&FeatureSchema>,
    ) -> Result<Self> {
        if roles.targets.is_empty() {
            return Err(ForecastError::InvalidParameter(
                "at least one target column is required".to_string(),
            ));
        }
        if table.num_rows() == 0 {
            return Err(ForecastError::EmptyData);
        }

        let times = table.timestamps(&roles.time)?;
        let targets = roles
            .targets
            .iter()
            .map(|name| table.real(name))
            .collect::<Result<Vec<_>>>()?;

        let mut schema = FeatureSchema::new();
        for name in &roles.static_categorical {
            let column = table.column(name)?;
            let vocabulary = known.and_then(|k| {
                k.static_categorical
                    .iter()
                    .find(|c| &c.name == name)
                    .map(|c| c.levels.clone())
            });
            let levels = match vocabulary {
                Some(levels) => levels,
                None => {
                    let mut levels: Vec<String> = (0..table.num_rows())
                        .filter_map(|r| column.display_value(r))
                        .collect();
                    levels.sort();
                    levels.dedup();
                    levels
                }
            };
            schema = schema.with_static_categorical(name.clone(), levels);
        }
        let static_real = roles
            .static_real
            .iter()
            .map(|name| table.real(name))
            .collect::<Result<Vec<_>>>()?;
        schema.static_real = roles.static_real.clone();
        schema.dynamic_real = roles.dynamic_real.clone();

        let dynamic_source = features.unwrap_or(table);
        let (dynamic_times, dynamic_columns, dynamic_groups) = if roles.dynamic_real.is_empty() {
            (&[][..], Vec::new(), HashMap::new())
        } else {
            let columns = roles
                .dynamic_real
                .iter()
                .map(|name| dynamic_source.real(name))
                .collect::<Result<Vec<_>>>()?;
            let groups: HashMap<Vec<String>, Vec<usize>> =
                group_rows(dynamic_source, &roles.identifiers)?
                    .into_iter()
                    .collect();
            (dynamic_source.timestamps(&roles.time)?, columns, groups)
        };

        let mut catalog = Self::new(calendar).with_schema(schema.clone());
        let mut discontinuous = Vec::new();
        let mut errors = Vec::new();

        for (key, mut rows) in group_rows(table, &roles.identifiers)? {
            let identifiers: Vec<(String, String)> =
                roles.identifiers.iter().cloned().zip(key.iter().cloned()).collect();
            let ids: Vec<SeriesId> = roles
                .targets
                .iter()
                .map(|t| SeriesId {
                    target: t.clone(),
                    identifiers: identifiers.clone(),
                })
                .collect();

            rows.sort_by_key(|&r| times[r]);
            let steps = match catalog.steps_of(rows.iter().map(|&r| times[r])) {
                Ok(steps) => steps,
                Err(err) => {
                    errors.push(off_calendar(&ids, err));
                    continue;
                }
            };
            if !is_continuous(&steps) {
                discontinuous.extend(ids.iter().map(ToString::to_string));
                continue;
            }

            let mut violations = Vec::new();
            let mut statics = StaticFeatures::new();
            for feature in &schema.static_categorical {
                let column = table.column(&feature.name)?;
                let values: Vec<String> =
                    rows.iter().filter_map(|&r| column.display_value(r)).collect();
                if values.windows(2).any(|w| w[0] != w[1]) {
                    violations.push(format!(
                        "static column '{}' is not constant",
                        feature.name
                    ));
                }
                match values.first().map(|v| (v, feature.code_of(v))) {
                    Some((_, Some(code))) => statics.categorical.push(code),
                    Some((value, None)) => violations.push(format!(
                        "static column '{}' has level '{value}' outside its vocabulary",
                        feature.name
                    )),
                    None => violations.push(format!(
                        "static column '{}' has no value",
                        feature.name
                    )),
                }
            }
            for (name, column) in roles.static_real.iter().zip(&static_real) {
                let first = column[rows[0]];
                if rows.iter().any(|&r| column[r].to_bits() != first.to_bits()) {
                    violations.push(format!("static column '{name}' is not constant"));
                }
                statics.real.push(first);
            }

            let (dynamic_start, dynamic_rows) = if roles.dynamic_real.is_empty() {
                (steps[0], Vec::new())
            } else {
                let mut feature_rows = match features {
                    Some(_) => dynamic_groups.get(&key).cloned().unwrap_or_default(),
                    None => rows.clone(),
                };
                feature_rows.sort_by_key(|&r| dynamic_times[r]);
                let feature_steps =
                    match catalog.steps_of(feature_rows.iter().map(|&r| dynamic_times[r])) {
                        Ok(steps) => steps,
                        Err(err) => {
                            errors.push(off_calendar(&ids, err));
                            continue;
                        }
                    };
                if !is_continuous(&feature_steps) {
                    discontinuous.extend(ids.iter().map(ToString::to_string));
                    continue;
                }
                let values = feature_rows
                    .iter()
                    .map(|&r| dynamic_columns.iter().map(|c| c[r]).collect())
                    .collect();
                (feature_steps.first().copied().unwrap_or(steps[0]), values)
            };

            for (id, target) in ids.into_iter().zip(&targets) {
                if !violations.is_empty() {
                    errors.push(ForecastError::SchemaMismatch {
                        series_id: id.to_string(),
                        violations: violations.clone(),
                    });
                    continue;
                }
                let entry = SeriesEntry {
                    id,
                    start_step: steps[0],
                    target: rows.iter().map(|&r| target[r]).collect(),
                    statics: statics.clone(),
                    dynamic_start,
                    dynamic_rows: dynamic_rows.clone(),
                };
                if let Err(err) = catalog.insert(entry) {
                    errors.push(err);
                }
            }
        }

        if !discontinuous.is_empty() {
            errors.insert(
                0,
                ForecastError::DiscontinuousTimeIndex {
                    series_ids: discontinuous,
                },
            );
        }
        if let Some(err) = ForecastError::collect(errors) {
            return Err(err);
        }

        debug!(
            series = catalog.len(),
            frequency = %catalog.calendar.frequency(),
            "built series catalog from table"
        );
        Ok(catalog)
    }

    fn steps_of(&self, times: impl Iterator<Item = DateTime<Utc>>) -> Result<Vec<i64>> {
        times.map(|t| self.calendar.to_step(t)).collect()
    }
}

/// Attach the affected series to a calendar error.
fn off_calendar(ids: &[SeriesId], err: ForecastError) -> ForecastError {
    let names: Vec<String> = ids.iter().map(ToString::to_string).collect();
    let detail = match err {
        ForecastError::TimestampError(msg) => msg,
        other => other.to_string(),
    };
    ForecastError::TimestampError(format!("series {}: {detail}", names.join(", ")))
}

/// Group row indices by identifier values, in order of first appearance.
fn group_rows(table: &Table, identifiers: &[String]) -> Result<Vec<(Vec<String>, Vec<usize>)>> {
    let columns = identifiers
        .iter()
        .map(|name| table.column(name))
        .collect::<Result<Vec<_>>>()?;
    let mut positions: HashMap<Vec<String>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<String>, Vec<usize>)> = Vec::new();
    for row in 0..table.num_rows() {
        let key: Vec<String> = columns
            .iter()
            .map(|c| c.display_value(row).unwrap_or_default())
            .collect();
        match positions.get(&key) {
            Some(&i) => groups[i].1.push(row),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push((key, vec![row]));
            }
        }
    }
    Ok(groups)
}

fn is_continuous(steps: &[i64]) -> bool {
    steps.windows(2).all(|w| w[1] == w[0] + 1)
}

fn infer_schema(entry: &SeriesEntry) -> FeatureSchema {
    let mut schema = FeatureSchema::new();
    for (i, &code) in entry.statics.categorical.iter().enumerate() {
        let levels = (0..=code).map(|c| c.to_string()).collect();
        schema = schema.with_static_categorical(format!("static_cat_{i}"), levels);
    }
    for i in 0..entry.statics.real.len() {
        schema = schema.with_static_real(format!("static_real_{i}"));
    }
    let width = entry.dynamic_rows.first().map(Vec::len).unwrap_or(0);
    for i in 0..width {
        schema = schema.with_dynamic_real(format!("dynamic_real_{i}"));
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Calendar, OffCalendarPolicy};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn daily() -> Calendar {
        Calendar::new("D".parse().unwrap(), t0(), OffCalendarPolicy::Reject).unwrap()
    }

    fn make_timestamps(n: usize) -> Vec<DateTime<Utc>> {
        (0..n).map(|i| t0() + Duration::days(i as i64)).collect()
    }

    #[test]
    fn series_id_display_lists_identifiers() {
        let id = SeriesId::new("sales")
            .with_identifier("store", "1")
            .with_identifier("item", "a");
        assert_eq!(id.to_string(), "sales[store=1,item=a]");
        assert_eq!(id.identifier("item"), Some("a"));
        assert_eq!(SeriesId::new("y").to_string(), "y");
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut catalog = SeriesCatalog::new(daily());
        catalog
            .register(SeriesId::new("y"), t0(), &[1.0, 2.0], None, None)
            .unwrap();
        let err = catalog
            .register(SeriesId::new("y"), t0(), &[3.0], None, None)
            .unwrap_err();
        assert_eq!(
            err,
            ForecastError::DuplicateSeries {
                series_id: "y".into()
            }
        );
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn schema_from_first_registration_is_enforced() {
        let mut catalog = SeriesCatalog::new(daily());
        let statics = StaticFeatures::new().with_categorical(2).with_real(0.5);
        let dynamic = DynamicFeatures::new(t0(), vec![vec![1.0, 2.0]; 4]);
        catalog
            .register(
                SeriesId::new("a"),
                t0(),
                &[1.0, 2.0, 3.0],
                Some(&statics),
                Some(&dynamic),
            )
            .unwrap();
        assert_eq!(catalog.schema().num_dynamic(), 2);
        assert_eq!(catalog.schema().cardinalities(), vec![3]);

        let bad_dynamic = DynamicFeatures::new(t0(), vec![vec![1.0]; 4]);
        let err = catalog
            .register(SeriesId::new("b"), t0(), &[1.0], None, Some(&bad_dynamic))
            .unwrap_err();
        match err {
            ForecastError::SchemaMismatch {
                series_id,
                violations,
            } => {
                assert_eq!(series_id, "b");
                assert_eq!(violations.len(), 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn declared_schema_checks_category_codes() {
        let schema = FeatureSchema::new().with_static_categorical("store", vec!["x".into()]);
        let mut catalog = SeriesCatalog::new(daily()).with_schema(schema);
        let statics = StaticFeatures::new().with_categorical(1);
        let err = catalog
            .register(SeriesId::new("a"), t0(), &[1.0], Some(&statics), None)
            .unwrap_err();
        assert!(matches!(err, ForecastError::SchemaMismatch { .. }));
    }

    #[test]
    fn register_does_not_mutate_inputs() {
        let mut catalog = SeriesCatalog::new(daily());
        let target = vec![1.0, f64::NAN, 3.0];
        catalog
            .register(SeriesId::new("a"), t0(), &target, None, None)
            .unwrap();
        assert_eq!(target.len(), 3);
        let entry = catalog.find(&SeriesId::new("a")).unwrap();
        assert_eq!(entry.observed_count(), 2);
        assert!(entry.value_at(1).is_nan());
        assert!(entry.value_at(-1).is_nan());
        assert_eq!(entry.value_at(2), 3.0);
    }

    #[test]
    fn validate_collects_all_problems() {
        let mut catalog = SeriesCatalog::new(daily());
        // Target 10, features 8: coverage short for a horizon of 5.
        let dynamic = DynamicFeatures::new(t0(), vec![vec![0.0]; 8]);
        catalog
            .register(SeriesId::new("a"), t0(), &[1.0; 10], None, Some(&dynamic))
            .unwrap();
        let long = DynamicFeatures::new(t0(), vec![vec![0.0]; 20]);
        catalog
            .register(SeriesId::new("b"), t0(), &[1.0; 3], None, Some(&long))
            .unwrap();

        let err = catalog
            .validate(&HistoryRequirements::new(5, 6))
            .unwrap_err();
        match err {
            ForecastError::Multiple(errors) => {
                assert_eq!(
                    errors[0],
                    ForecastError::InsufficientFeatureCoverage {
                        series_ids: vec!["a".into()]
                    }
                );
                assert_eq!(
                    errors[1],
                    ForecastError::InsufficientHistory {
                        needed: 6,
                        series_ids: vec!["b".into()]
                    }
                );
            }
            other => panic!("unexpected error {other:?}"),
        }

        let single = catalog.validate(&HistoryRequirements::new(5, 1)).unwrap_err();
        assert!(matches!(
            single,
            ForecastError::InsufficientFeatureCoverage { .. }
        ));
    }

    #[test]
    fn truncated_keeps_features() {
        let mut catalog = SeriesCatalog::new(daily());
        let dynamic = DynamicFeatures::new(t0(), vec![vec![0.0]; 12]);
        catalog
            .register(SeriesId::new("a"), t0(), &[1.0; 10], None, Some(&dynamic))
            .unwrap();
        let short = catalog.truncated(4);
        let entry = short.get(0).unwrap();
        assert_eq!(entry.len(), 6);
        assert_eq!(entry.dynamic_range(), Some((0, 12)));
        assert_eq!(catalog.get(0).unwrap().len(), 10);
    }

    fn panel_table(times: Vec<DateTime<Utc>>, stores: Vec<&str>, values: Vec<f64>) -> Table {
        let n = times.len();
        Table::new()
            .with_column("date", Column::Timestamp(times))
            .unwrap()
            .with_column(
                "store",
                Column::Text(stores.into_iter().map(String::from).collect()),
            )
            .unwrap()
            .with_column("region", Column::Text(vec!["north".into(); n]))
            .unwrap()
            .with_column("sales", Column::Real(values))
            .unwrap()
    }

    #[test]
    fn from_table_groups_by_identifiers() {
        let ts = make_timestamps(3);
        // Rows deliberately out of order within a store.
        let table = panel_table(
            vec![ts[1], ts[0], ts[2], ts[0], ts[1], ts[2]],
            vec!["a", "a", "a", "b", "b", "b"],
            vec![2.0, 1.0, 3.0, 10.0, 20.0, 30.0],
        );
        let roles = ColumnRoles::new("date")
            .with_target("sales")
            .with_identifier("store")
            .with_static_categorical("region");

        let catalog = SeriesCatalog::from_table(&table, &roles, daily(), None).unwrap();
        assert_eq!(catalog.len(), 2);
        let a = catalog
            .find(&SeriesId::new("sales").with_identifier("store", "a"))
            .unwrap();
        assert_eq!(a.target(), &[1.0, 2.0, 3.0]);
        assert_eq!(a.statics().categorical, vec![0]);
        assert_eq!(
            catalog.schema().static_categorical[0].levels,
            vec!["north".to_string()]
        );
    }

    #[test]
    fn from_table_reports_every_gap() {
        let ts = make_timestamps(4);
        let table = panel_table(
            vec![ts[0], ts[2], ts[0], ts[3], ts[0], ts[1]],
            vec!["a", "a", "b", "b", "c", "c"],
            vec![1.0; 6],
        );
        let roles = ColumnRoles::new("date")
            .with_target("sales")
            .with_identifier("store");
        let err = SeriesCatalog::from_table(&table, &roles, daily(), None).unwrap_err();
        assert_eq!(
            err,
            ForecastError::DiscontinuousTimeIndex {
                series_ids: vec!["sales[store=a]".into(), "sales[store=b]".into()]
            }
        );
    }

    fn region_table(stores: &[&str], regions: &[&str]) -> Table {
        let ts = make_timestamps(2);
        let mut times = Vec::new();
        let mut store_col = Vec::new();
        let mut region_col = Vec::new();
        for (store, region) in stores.iter().zip(regions) {
            for t in &ts {
                times.push(*t);
                store_col.push(store.to_string());
                region_col.push(region.to_string());
            }
        }
        let n = times.len();
        Table::new()
            .with_column("date", Column::Timestamp(times))
            .unwrap()
            .with_column("store", Column::Text(store_col))
            .unwrap()
            .with_column("region", Column::Text(region_col))
            .unwrap()
            .with_column("sales", Column::Real(vec![1.0; n]))
            .unwrap()
    }

    fn region_roles() -> ColumnRoles {
        ColumnRoles::new("date")
            .with_target("sales")
            .with_identifier("store")
            .with_static_categorical("region")
    }

    #[test]
    fn differences_compare_levels_by_name() {
        let trained = FeatureSchema::new()
            .with_static_categorical("region", vec!["north".into(), "south".into()]);
        let prefix = FeatureSchema::new().with_static_categorical("region", vec!["north".into()]);
        assert!(trained.differences(&prefix).is_empty());

        let subset = FeatureSchema::new().with_static_categorical("region", vec!["south".into()]);
        let diffs = trained.differences(&subset);
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].contains("encodes levels"), "{diffs:?}");

        let reordered = FeatureSchema::new()
            .with_static_categorical("region", vec!["south".into(), "north".into()]);
        assert_eq!(trained.differences(&reordered).len(), 1);

        let unknown = FeatureSchema::new()
            .with_static_categorical("region", vec!["east".into(), "north".into()]);
        let diffs = trained.differences(&unknown);
        assert!(diffs[0].contains("\"east\""), "{diffs:?}");
    }

    #[test]
    fn from_table_with_schema_reuses_known_codes() {
        let trained = SeriesCatalog::from_table(
            &region_table(&["a", "b"], &["north", "south"]),
            &region_roles(),
            daily(),
            None,
        )
        .unwrap();

        // Alone, a south-only table would encode south as code 0.
        let south = region_table(&["b"], &["south"]);
        let naive = SeriesCatalog::from_table(&south, &region_roles(), daily(), None).unwrap();
        assert_eq!(naive.get(0).unwrap().statics().categorical, vec![0]);
        assert!(!trained.schema().differences(naive.schema()).is_empty());

        let encoded = SeriesCatalog::from_table_with_schema(
            &south,
            &region_roles(),
            daily(),
            None,
            trained.schema(),
        )
        .unwrap();
        assert_eq!(encoded.get(0).unwrap().statics().categorical, vec![1]);
        assert!(trained.schema().differences(encoded.schema()).is_empty());
    }

    #[test]
    fn from_table_with_schema_rejects_unknown_levels() {
        let known = FeatureSchema::new()
            .with_static_categorical("region", vec!["north".into(), "south".into()]);
        let table = region_table(&["a", "b"], &["north", "east"]);
        let err =
            SeriesCatalog::from_table_with_schema(&table, &region_roles(), daily(), None, &known)
                .unwrap_err();
        match err {
            ForecastError::SchemaMismatch {
                series_id,
                violations,
            } => {
                assert_eq!(series_id, "sales[store=b]");
                assert!(violations[0].contains("'east'"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn from_table_reports_every_off_calendar_series() {
        let ts = make_timestamps(2);
        let noon = Duration::hours(12);
        let table = panel_table(
            vec![ts[0] + noon, ts[1], ts[0], ts[1], ts[0], ts[1] + noon],
            vec!["a", "a", "b", "b", "c", "c"],
            vec![1.0; 6],
        );
        let roles = ColumnRoles::new("date")
            .with_target("sales")
            .with_identifier("store");
        match SeriesCatalog::from_table(&table, &roles, daily(), None).unwrap_err() {
            ForecastError::Multiple(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].to_string().contains("sales[store=a]"));
                assert!(errors[1].to_string().contains("sales[store=c]"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn from_table_reads_separate_feature_table() {
        let ts = make_timestamps(5);
        let table = panel_table(ts[..3].to_vec(), vec!["a"; 3], vec![1.0, 2.0, 3.0]);
        let features = Table::new()
            .with_column("date", Column::Timestamp(ts.clone()))
            .unwrap()
            .with_column("store", Column::Text(vec!["a".into(); 5]))
            .unwrap()
            .with_column("promo", Column::Real(vec![0.0, 1.0, 0.0, 1.0, 1.0]))
            .unwrap();
        let roles = ColumnRoles::new("date")
            .with_target("sales")
            .with_identifier("store")
            .with_dynamic_real("promo");

        let catalog = SeriesCatalog::from_table(&table, &roles, daily(), Some(&features)).unwrap();
        let entry = catalog.get(0).unwrap();
        assert_eq!(entry.dynamic_range(), Some((0, 5)));
        assert_eq!(entry.dynamic_row(4), Some(&[1.0][..]));
        catalog.validate(&HistoryRequirements::new(2, 1)).unwrap();
    }
}
