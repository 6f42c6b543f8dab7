use lazy_static::lazy_static;
use polars::prelude::*;

use crate::error::AnalysisError;
use crate::records::{
    BINARY_COLUMNS, BINARY_LEVELS, BP_CATEGORY_LEVELS, DROPPED_COLUMNS, GENDER_LEVELS,
    ORDINAL_COLUMNS, ORDINAL_LEVELS, RAW_SCHEMA, REQUIRED_COLUMNS,
};

lazy_static! {
    /// Physiological bounds applied to the cleaned table. A row failing any
    /// bound is dropped.
    static ref PHYSIOLOGICAL_BOUNDS: Vec<(&'static str, f64, f64)> = vec![
        ("height", 120.0, 220.0),
        ("weight", 30.0, 250.0),
        ("bmi", 10.0, 70.0),
        ("ap_hi", 90.0, 240.0),
        ("ap_lo", 60.0, 140.0),
    ];
}

/// Fetch a column, surfacing a missing one as a schema violation.
pub fn require_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Series, AnalysisError> {
    df.column(name)
        .map_err(|_| AnalysisError::schema(format!("required column {name:?} is missing")))
}

fn ensure_schema(df: &DataFrame) -> Result<(), AnalysisError> {
    for name in REQUIRED_COLUMNS {
        let series = require_column(df, name)?;
        if let Some(expected) = RAW_SCHEMA.get(name) {
            if series.dtype() != expected {
                return Err(AnalysisError::schema(format!(
                    "column {name:?} has dtype {}, expected {expected}",
                    series.dtype()
                )));
            }
        }
    }
    Ok(())
}

/// Clean the raw table: prune redundant columns, recode categorical codes
/// into their labels, then drop rows violating physiological bounds.
///
/// Returns a new table; the raw input is left untouched so callers can keep
/// it around for comparison.
pub fn clean(raw: &DataFrame) -> Result<DataFrame, AnalysisError> {
    ensure_schema(raw)?;

    let mut table = raw.clone();
    for name in DROPPED_COLUMNS {
        table = table.drop(name)?;
    }

    let recoded = recode_categoricals(table)?;
    let cleaned = filter_physiological(&recoded)?;
    if cleaned.height() == 0 {
        return Err(AnalysisError::EmptyResult);
    }
    Ok(cleaned)
}

fn recode_categoricals(table: DataFrame) -> Result<DataFrame, AnalysisError> {
    let mut df = table.lazy();

    df = df.with_column(
        col("gender")
            .alias("gender")
            .apply(recode_gender, GetOutput::from_type(DataType::Utf8)),
    );
    for name in BINARY_COLUMNS {
        df = df.with_column(
            col(name)
                .alias(name)
                .apply(recode_binary, GetOutput::from_type(DataType::Utf8)),
        );
    }
    for name in ORDINAL_COLUMNS {
        df = df.with_column(
            col(name)
                .alias(name)
                .apply(recode_ordinal, GetOutput::from_type(DataType::Utf8)),
        );
    }
    df = df.with_column(
        col("bp_category")
            .alias("bp_category")
            .apply(validate_bp_category, GetOutput::from_type(DataType::Utf8)),
    );

    Ok(df.collect()?)
}

/// Keep only rows satisfying every physiological bound and ap_hi >= ap_lo.
/// The predicate is a pure row filter, so applying it twice yields the same
/// row set as applying it once.
pub fn filter_physiological(df: &DataFrame) -> Result<DataFrame, AnalysisError> {
    Ok(df.clone().lazy().filter(physiological_predicate()).collect()?)
}

fn physiological_predicate() -> Expr {
    let mut predicate = col("ap_hi").gt_eq(col("ap_lo"));
    for &(name, lower, upper) in PHYSIOLOGICAL_BOUNDS.iter() {
        predicate = predicate
            .and(col(name).gt_eq(lit(lower)))
            .and(col(name).lt_eq(lit(upper)));
    }
    predicate
}

fn recode_gender(column: Series) -> Result<Option<Series>, PolarsError> {
    recode_codes(column, &[(1, GENDER_LEVELS[0]), (2, GENDER_LEVELS[1])])
}

fn recode_binary(column: Series) -> Result<Option<Series>, PolarsError> {
    recode_codes(column, &[(0, BINARY_LEVELS[0]), (1, BINARY_LEVELS[1])])
}

fn recode_ordinal(column: Series) -> Result<Option<Series>, PolarsError> {
    // Codes 1/2/3 map onto the declared levels in order.
    let mapping: Vec<(i32, &str)> = ORDINAL_LEVELS
        .iter()
        .enumerate()
        .map(|(index, level)| (index as i32 + 1, *level))
        .collect();
    recode_codes(column, &mapping)
}

fn recode_codes(column: Series, mapping: &[(i32, &str)]) -> Result<Option<Series>, PolarsError> {
    let codes = column.cast(&DataType::Int32)?;
    let codes = codes.i32()?;

    let mut labels: Vec<&str> = Vec::with_capacity(codes.len());
    for code in codes.into_iter() {
        let code = code.ok_or_else(|| {
            PolarsError::ComputeError(format!("null code in column {:?}", column.name()).into())
        })?;
        let label = mapping
            .iter()
            .find(|(candidate, _)| *candidate == code)
            .map(|(_, label)| *label)
            .ok_or_else(|| {
                PolarsError::ComputeError(
                    format!("unexpected code {code} in column {:?}", column.name()).into(),
                )
            })?;
        labels.push(label);
    }

    Ok(Some(Series::new(column.name(), labels)))
}

fn validate_bp_category(column: Series) -> Result<Option<Series>, PolarsError> {
    let labels = column.utf8()?;
    for label in labels.into_iter() {
        let label = label.ok_or_else(|| {
            PolarsError::ComputeError("null blood-pressure category".into())
        })?;
        if !BP_CATEGORY_LEVELS.contains(&label) {
            return Err(PolarsError::ComputeError(
                format!("unknown blood-pressure category {label:?}").into(),
            ));
        }
    }
    Ok(Some(column))
}
