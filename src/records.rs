use lazy_static::lazy_static;
use polars::prelude::{DataType, Field, Schema};

/// Columns the raw CSV must carry.
pub const REQUIRED_COLUMNS: [&str; 17] = [
    "id",
    "age",
    "age_years",
    "gender",
    "height",
    "weight",
    "ap_hi",
    "ap_lo",
    "cholesterol",
    "gluc",
    "smoke",
    "alco",
    "active",
    "cardio",
    "bmi",
    "bp_category",
    "bp_category_encoded",
];

/// Columns dropped during cleaning: identifier, raw age-in-days and the
/// pre-encoded blood-pressure category duplicate.
pub const DROPPED_COLUMNS: [&str; 3] = ["id", "age", "bp_category_encoded"];

pub const GENDER_LEVELS: [&str; 2] = ["Female", "Male"];

pub const BINARY_LEVELS: [&str; 2] = ["No", "Yes"];

/// Binary 0/1 flags recoded to [`BINARY_LEVELS`].
pub const BINARY_COLUMNS: [&str; 4] = ["smoke", "alco", "active", "cardio"];

/// Ordinal level labels in their declared order. Downstream tests build
/// contingency rows and ANOVA groups in exactly this order.
pub const ORDINAL_LEVELS: [&str; 3] = ["Normal", "Above", "WellAbove"];

/// Columns carrying 1/2/3 codes recoded to [`ORDINAL_LEVELS`].
pub const ORDINAL_COLUMNS: [&str; 2] = ["cholesterol", "gluc"];

/// Known nominal levels of the blood-pressure category column.
pub const BP_CATEGORY_LEVELS: [&str; 4] = [
    "Normal",
    "Elevated",
    "Hypertension Stage 1",
    "Hypertension Stage 2",
];

pub struct CardioRecord {}

impl CardioRecord {
    pub fn raw_schema() -> Schema {
        Schema::from_iter(vec![
            Field::new("id", DataType::Int32),
            Field::new("age", DataType::Int32),
            Field::new("age_years", DataType::Int32),
            Field::new("gender", DataType::Int32),
            Field::new("height", DataType::Int32),
            Field::new("weight", DataType::Float64),
            Field::new("ap_hi", DataType::Int32),
            Field::new("ap_lo", DataType::Int32),
            Field::new("cholesterol", DataType::Int32),
            Field::new("gluc", DataType::Int32),
            Field::new("smoke", DataType::Int32),
            Field::new("alco", DataType::Int32),
            Field::new("active", DataType::Int32),
            Field::new("cardio", DataType::Int32),
            Field::new("bmi", DataType::Float64),
            Field::new("bp_category", DataType::Utf8),
            Field::new("bp_category_encoded", DataType::Utf8),
        ])
    }
}

lazy_static! {
    /// Materialized raw schema, shared by the CSV reader and the tests.
    pub static ref RAW_SCHEMA: Schema = CardioRecord::raw_schema();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_schema_covers_every_required_column() {
        let schema = CardioRecord::raw_schema();
        assert_eq!(schema.len(), REQUIRED_COLUMNS.len());
        for name in REQUIRED_COLUMNS {
            assert!(schema.get(name).is_some(), "missing field {name}");
        }
    }

    #[test]
    fn ordinal_levels_keep_declared_order() {
        assert_eq!(ORDINAL_LEVELS, ["Normal", "Above", "WellAbove"]);
    }
}
