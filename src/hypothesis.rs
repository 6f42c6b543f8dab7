use polars::prelude::*;
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, StudentsT};

use crate::assumptions::{
    bartlett_test, levene_test, normality_diagnostic, validate_groups, NormalityDiagnostic,
    VarianceDecision, VarianceTestResult,
};
use crate::cleaning::require_column;
use crate::describe::{mean, sample_variance};
use crate::error::AnalysisError;
use crate::records::{BINARY_LEVELS, ORDINAL_LEVELS};

/// Significance level the pipeline runs at.
pub const DEFAULT_ALPHA: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    RejectNull,
    FailToRejectNull,
}

fn decide(p_value: f64, alpha: f64) -> Decision {
    if p_value < alpha {
        Decision::RejectNull
    } else {
        Decision::FailToRejectNull
    }
}

/// Common surface of the three test results.
pub trait HypothesisTest {
    fn p_value(&self) -> f64;

    fn decision_at(&self, alpha: f64) -> Decision {
        decide(self.p_value(), alpha)
    }
}

/// Split a numeric column by the labels of a categorical column, keeping the
/// declared level order. Levels with no observations are dropped.
pub fn partition_by_level(
    df: &DataFrame,
    value_column: &str,
    group_column: &str,
    levels: &[&str],
) -> Result<Vec<(String, Vec<f64>)>, AnalysisError> {
    let values = require_column(df, value_column)?.cast(&DataType::Float64)?;
    let values = values.f64()?;
    let labels = require_column(df, group_column)?;
    let labels = labels.utf8().map_err(|_| {
        AnalysisError::schema(format!("column {group_column:?} is not categorical"))
    })?;

    let mut groups: Vec<(String, Vec<f64>)> = levels
        .iter()
        .map(|level| (level.to_string(), Vec::new()))
        .collect();
    for (label, value) in labels.into_iter().zip(values.into_iter()) {
        if let (Some(label), Some(value)) = (label, value) {
            let slot = groups
                .iter_mut()
                .find(|(level, _)| level.as_str() == label)
                .ok_or_else(|| {
                    AnalysisError::schema(format!(
                        "unexpected level {label:?} in column {group_column:?}"
                    ))
                })?;
            slot.1.push(value);
        }
    }
    groups.retain(|(_, values)| !values.is_empty());
    Ok(groups)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TTestVariant {
    Student,
    Welch,
}

#[derive(Debug, Clone, Serialize)]
pub struct TTestResult {
    pub test_name: String,
    pub variant: TTestVariant,
    pub statistic: f64,
    pub p_value: f64,
    pub degrees_of_freedom: f64,
    /// Mean of the first declared group minus mean of the second.
    pub mean_difference: f64,
    pub confidence_interval: (f64, f64),
    pub alpha: f64,
    pub decision: Decision,
    pub variance_check: VarianceTestResult,
}

impl HypothesisTest for TTestResult {
    fn p_value(&self) -> f64 {
        self.p_value
    }
}

/// T1: mean BMI across cardiovascular-disease groups. Levene's test picks
/// the t-test variant; null hypothesis is equal population means.
pub fn bmi_by_cardio(df: &DataFrame, alpha: f64) -> Result<TTestResult, AnalysisError> {
    let groups = partition_by_level(df, "bmi", "cardio", &BINARY_LEVELS)?;
    let variance_check = levene_test(&groups, alpha)?;
    run_t_test(
        "bmi by cardiovascular disease",
        &groups[0].1,
        &groups[1].1,
        variance_check,
        alpha,
    )
}

/// Two-sample t-test dispatcher: the variance-equality conclusion selects
/// the pooled (Student) or separate-variance (Welch) variant.
pub fn run_t_test(
    test_name: &str,
    first: &[f64],
    second: &[f64],
    variance_check: VarianceTestResult,
    alpha: f64,
) -> Result<TTestResult, AnalysisError> {
    for (label, values) in [("first", first), ("second", second)] {
        if values.len() < 2 {
            return Err(AnalysisError::InsufficientData {
                group: label.to_string(),
                observed: values.len(),
                required: 2,
            });
        }
    }

    let n1 = first.len() as f64;
    let n2 = second.len() as f64;
    let m1 = mean(first);
    let m2 = mean(second);
    let v1 = sample_variance(first, m1);
    let v2 = sample_variance(second, m2);

    let (variant, standard_error, degrees_of_freedom) = match variance_check.conclusion {
        VarianceDecision::Equal => {
            let pooled = ((n1 - 1.0) * v1 + (n2 - 1.0) * v2) / (n1 + n2 - 2.0);
            (
                TTestVariant::Student,
                (pooled * (1.0 / n1 + 1.0 / n2)).sqrt(),
                n1 + n2 - 2.0,
            )
        }
        VarianceDecision::Unequal => {
            // Welch-Satterthwaite degrees of freedom.
            let a = v1 / n1;
            let b = v2 / n2;
            let dof = (a + b).powi(2) / (a.powi(2) / (n1 - 1.0) + b.powi(2) / (n2 - 1.0));
            (TTestVariant::Welch, (a + b).sqrt(), dof)
        }
    };

    let mean_difference = m1 - m2;
    let statistic = mean_difference / standard_error;
    let reference = StudentsT::new(0.0, 1.0, degrees_of_freedom)?;
    let p_value = (2.0 * reference.cdf(-statistic.abs())).clamp(0.0, 1.0);
    let critical = reference.inverse_cdf(1.0 - alpha / 2.0);
    let confidence_interval = (
        mean_difference - critical * standard_error,
        mean_difference + critical * standard_error,
    );

    Ok(TTestResult {
        test_name: test_name.to_string(),
        variant,
        statistic,
        p_value,
        degrees_of_freedom,
        mean_difference,
        confidence_interval,
        alpha,
        decision: decide(p_value, alpha),
        variance_check,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct LowExpectedFrequencyWarning {
    /// (row, column) indices of cells with expected frequency below 5.
    pub cells: Vec<(usize, usize)>,
    pub min_expected: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChiSquareResult {
    pub test_name: String,
    pub statistic: f64,
    pub p_value: f64,
    pub degrees_of_freedom: f64,
    pub alpha: f64,
    pub decision: Decision,
    pub row_labels: Vec<String>,
    pub column_labels: Vec<String>,
    pub observed: Vec<Vec<u64>>,
    pub expected: Vec<Vec<f64>>,
    /// Present when any expected cell frequency is below 5; the consumer
    /// decides whether to trust the p-value or fall back to an exact test.
    pub warning: Option<LowExpectedFrequencyWarning>,
}

impl HypothesisTest for ChiSquareResult {
    fn p_value(&self) -> f64 {
        self.p_value
    }
}

/// T2: association between cholesterol level and cardiovascular disease.
pub fn cholesterol_by_cardio(
    df: &DataFrame,
    alpha: f64,
) -> Result<ChiSquareResult, AnalysisError> {
    let observed = contingency_table(df, "cholesterol", &ORDINAL_LEVELS, "cardio", &BINARY_LEVELS)?;
    chi_square_independence(
        "cholesterol by cardiovascular disease",
        observed,
        &ORDINAL_LEVELS,
        &BINARY_LEVELS,
        alpha,
    )
}

/// Cross-tabulate two categorical columns into joint frequencies, rows and
/// columns in declared level order.
pub fn contingency_table(
    df: &DataFrame,
    row_column: &str,
    row_levels: &[&str],
    col_column: &str,
    col_levels: &[&str],
) -> Result<Vec<Vec<u64>>, AnalysisError> {
    let rows = require_column(df, row_column)?;
    let rows = rows
        .utf8()
        .map_err(|_| AnalysisError::schema(format!("column {row_column:?} is not categorical")))?;
    let cols = require_column(df, col_column)?;
    let cols = cols
        .utf8()
        .map_err(|_| AnalysisError::schema(format!("column {col_column:?} is not categorical")))?;

    let mut counts = vec![vec![0u64; col_levels.len()]; row_levels.len()];
    for (row_label, col_label) in rows.into_iter().zip(cols.into_iter()) {
        if let (Some(row_label), Some(col_label)) = (row_label, col_label) {
            let row_index = row_levels
                .iter()
                .position(|level| *level == row_label)
                .ok_or_else(|| {
                    AnalysisError::schema(format!(
                        "unexpected level {row_label:?} in column {row_column:?}"
                    ))
                })?;
            let col_index = col_levels
                .iter()
                .position(|level| *level == col_label)
                .ok_or_else(|| {
                    AnalysisError::schema(format!(
                        "unexpected level {col_label:?} in column {col_column:?}"
                    ))
                })?;
            counts[row_index][col_index] += 1;
        }
    }
    Ok(counts)
}

/// Pearson chi-square test of independence over a contingency table.
/// Expected frequencies below 5 do not fail the test; they annotate the
/// result with [`LowExpectedFrequencyWarning`].
pub fn chi_square_independence(
    test_name: &str,
    observed: Vec<Vec<u64>>,
    row_labels: &[&str],
    column_labels: &[&str],
    alpha: f64,
) -> Result<ChiSquareResult, AnalysisError> {
    let rows = observed.len();
    let cols = observed.first().map(|row| row.len()).unwrap_or(0);

    let mut row_totals = vec![0.0; rows];
    let mut col_totals = vec![0.0; cols];
    let mut total = 0.0;
    for (i, row) in observed.iter().enumerate() {
        for (j, &count) in row.iter().enumerate() {
            let count = count as f64;
            row_totals[i] += count;
            col_totals[j] += count;
            total += count;
        }
    }
    if total <= 0.0 {
        return Err(AnalysisError::InsufficientData {
            group: "contingency table".to_string(),
            observed: 0,
            required: 1,
        });
    }

    let mut expected = vec![vec![0.0; cols]; rows];
    let mut statistic = 0.0;
    let mut low_cells = Vec::new();
    let mut min_expected = f64::INFINITY;
    for i in 0..rows {
        for j in 0..cols {
            let e = row_totals[i] * col_totals[j] / total;
            expected[i][j] = e;
            min_expected = min_expected.min(e);
            if e < 5.0 {
                low_cells.push((i, j));
            }
            if e > 0.0 {
                let d = observed[i][j] as f64 - e;
                statistic += d * d / e;
            }
        }
    }

    let degrees_of_freedom = ((rows - 1) * (cols - 1)) as f64;
    let reference = ChiSquared::new(degrees_of_freedom)?;
    let p_value = (1.0 - reference.cdf(statistic)).clamp(0.0, 1.0);

    let warning = if low_cells.is_empty() {
        None
    } else {
        Some(LowExpectedFrequencyWarning {
            cells: low_cells,
            min_expected,
        })
    };

    Ok(ChiSquareResult {
        test_name: test_name.to_string(),
        statistic,
        p_value,
        degrees_of_freedom,
        alpha,
        decision: decide(p_value, alpha),
        row_labels: row_labels.iter().map(|l| l.to_string()).collect(),
        column_labels: column_labels.iter().map(|l| l.to_string()).collect(),
        observed,
        expected,
        warning,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct AnovaResult {
    pub test_name: String,
    pub statistic: f64,
    pub p_value: f64,
    pub df_between: f64,
    pub df_within: f64,
    pub alpha: f64,
    pub decision: Decision,
    pub group_means: Vec<(String, f64)>,
    /// Advisory precondition: Bartlett across the groups.
    pub variance_check: VarianceTestResult,
    /// Advisory precondition: diagnostics over observed minus group mean.
    pub residual_normality: NormalityDiagnostic,
}

impl HypothesisTest for AnovaResult {
    fn p_value(&self) -> f64 {
        self.p_value
    }
}

/// T3: mean age across glucose-level groups.
pub fn age_by_glucose(df: &DataFrame, alpha: f64) -> Result<AnovaResult, AnalysisError> {
    let groups = partition_by_level(df, "age_years", "gluc", &ORDINAL_LEVELS)?;
    one_way_anova("age by glucose level", &groups, alpha)
}

/// Classic one-way ANOVA. The variance and normality preconditions are
/// computed and attached to the result but never block the F-test.
pub fn one_way_anova(
    test_name: &str,
    groups: &[(String, Vec<f64>)],
    alpha: f64,
) -> Result<AnovaResult, AnalysisError> {
    validate_groups(groups)?;

    let variance_check = bartlett_test(groups, alpha)?;

    let k = groups.len();
    let n_total: usize = groups.iter().map(|(_, values)| values.len()).sum();
    let grand_mean =
        groups.iter().flat_map(|(_, values)| values.iter()).sum::<f64>() / n_total as f64;
    let group_means: Vec<(String, f64)> = groups
        .iter()
        .map(|(label, values)| (label.clone(), mean(values)))
        .collect();

    let between: f64 = groups
        .iter()
        .zip(&group_means)
        .map(|((_, values), (_, center))| values.len() as f64 * (*center - grand_mean).powi(2))
        .sum();
    let within: f64 = groups
        .iter()
        .zip(&group_means)
        .map(|((_, values), (_, center))| {
            values.iter().map(|v| (v - center).powi(2)).sum::<f64>()
        })
        .sum();

    let residuals: Vec<f64> = groups
        .iter()
        .zip(&group_means)
        .flat_map(|((_, values), (_, center))| values.iter().map(move |v| v - center))
        .collect();
    let residual_normality = normality_diagnostic(&residuals)?;

    let df_between = (k - 1) as f64;
    let df_within = (n_total - k) as f64;
    let (statistic, p_value) = if within > 0.0 {
        let statistic = (between / df_between) / (within / df_within);
        let reference = FisherSnedecor::new(df_between, df_within)?;
        (statistic, (1.0 - reference.cdf(statistic)).clamp(0.0, 1.0))
    } else if between > 0.0 {
        (f64::INFINITY, 0.0)
    } else {
        (0.0, 1.0)
    };

    Ok(AnovaResult {
        test_name: test_name.to_string(),
        statistic,
        p_value,
        df_between,
        df_within,
        alpha,
        decision: decide(p_value, alpha),
        group_means,
        variance_check,
        residual_normality,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    #[test]
    fn equal_variances_select_students_variant() {
        let df = df!(
            "bmi" => &[29.0, 30.0, 31.0, 29.5, 30.5, 21.0, 22.0, 23.0, 21.5, 22.5],
            "cardio" => &["Yes", "Yes", "Yes", "Yes", "Yes", "No", "No", "No", "No", "No"],
        )
        .unwrap();
        let result = bmi_by_cardio(&df, 0.05).unwrap();

        assert_eq!(result.variant, TTestVariant::Student);
        assert_eq!(result.variance_check.conclusion, VarianceDecision::Equal);
        assert!((result.degrees_of_freedom - 8.0).abs() < 1e-12);
        // mean(No) - mean(Yes) = 22 - 30
        assert!((result.mean_difference + 8.0).abs() < 1e-9);
        assert!(result.p_value < 0.01);
        assert_eq!(result.decision, Decision::RejectNull);
        assert!(result.confidence_interval.0 < -8.0);
        assert!(result.confidence_interval.1 > -8.0);
        assert!(result.confidence_interval.1 < 0.0);
    }

    #[test]
    fn unequal_variances_select_welch_variant() {
        let df = df!(
            "bmi" => &[10.0, 10.1, 9.9, 10.05, 9.95, 0.0, 20.0, -20.0, 30.0, -30.0],
            "cardio" => &["No", "No", "No", "No", "No", "Yes", "Yes", "Yes", "Yes", "Yes"],
        )
        .unwrap();
        let result = bmi_by_cardio(&df, 0.05).unwrap();

        assert_eq!(result.variant, TTestVariant::Welch);
        assert_eq!(result.variance_check.conclusion, VarianceDecision::Unequal);
        // Welch degrees of freedom stay below the pooled n1 + n2 - 2.
        assert!(result.degrees_of_freedom < 8.0);
    }

    #[test]
    fn undersized_group_fails_the_t_test_only() {
        let df = df!(
            "bmi" => &[25.0, 26.0, 27.0],
            "cardio" => &["No", "No", "Yes"],
        )
        .unwrap();
        match bmi_by_cardio(&df, 0.05) {
            Err(AnalysisError::InsufficientData { group, observed, .. }) => {
                assert_eq!(group, "Yes");
                assert_eq!(observed, 1);
            }
            other => panic!("expected insufficient data, got {other:?}"),
        }
    }

    #[test]
    fn chi_square_matches_manual_calculation() {
        let observed = vec![vec![30u64, 10], vec![5, 25], vec![2, 8]];
        let result = chi_square_independence(
            "cholesterol by cardiovascular disease",
            observed,
            &ORDINAL_LEVELS,
            &BINARY_LEVELS,
            0.05,
        )
        .unwrap();

        assert!((result.statistic - 26.6331).abs() < 1e-4);
        assert!((result.degrees_of_freedom - 2.0).abs() < 1e-12);
        assert!((result.expected[0][0] - 18.5).abs() < 1e-12);
        assert!((result.expected[0][1] - 21.5).abs() < 1e-12);
        assert!((result.expected[2][0] - 4.625).abs() < 1e-12);
        assert_eq!(result.decision, Decision::RejectNull);

        // The 4.625 expected cell sits under the threshold.
        let warning = result.warning.as_ref().unwrap();
        assert!(warning.cells.contains(&(2, 0)));
        assert!((warning.min_expected - 4.625).abs() < 1e-12);
    }

    #[test]
    fn chi_square_preserves_marginal_totals() {
        let observed = vec![vec![30u64, 10], vec![5, 25], vec![2, 8]];
        let result = chi_square_independence(
            "cholesterol by cardiovascular disease",
            observed.clone(),
            &ORDINAL_LEVELS,
            &BINARY_LEVELS,
            0.05,
        )
        .unwrap();

        for (i, row) in observed.iter().enumerate() {
            let observed_total: u64 = row.iter().sum();
            let expected_total: f64 = result.expected[i].iter().sum();
            assert!((expected_total - observed_total as f64).abs() < 1e-9);
        }
        for j in 0..2 {
            let observed_total: u64 = observed.iter().map(|row| row[j]).sum();
            let expected_total: f64 = result.expected.iter().map(|row| row[j]).sum();
            assert!((expected_total - observed_total as f64).abs() < 1e-9);
        }
    }

    #[test]
    fn chi_square_with_ample_counts_carries_no_warning() {
        let observed = vec![vec![30u64, 10], vec![20, 25], vec![10, 8]];
        let result = chi_square_independence(
            "cholesterol by cardiovascular disease",
            observed,
            &ORDINAL_LEVELS,
            &BINARY_LEVELS,
            0.05,
        )
        .unwrap();
        assert!(result.warning.is_none());
    }

    #[test]
    fn contingency_table_counts_joint_frequencies_in_level_order() {
        let df = df!(
            "cholesterol" => &["Normal", "Normal", "Above", "WellAbove", "WellAbove", "Above"],
            "cardio" => &["No", "Yes", "No", "Yes", "No", "Yes"],
        )
        .unwrap();
        let observed =
            contingency_table(&df, "cholesterol", &ORDINAL_LEVELS, "cardio", &BINARY_LEVELS)
                .unwrap();
        assert_eq!(observed, vec![vec![1, 1], vec![1, 1], vec![1, 1]]);
    }

    #[test]
    fn anova_on_identical_groups_keeps_the_null() {
        let shared = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let groups: Vec<(String, Vec<f64>)> = ORDINAL_LEVELS
            .iter()
            .map(|level| (level.to_string(), shared.clone()))
            .collect();
        let result = one_way_anova("age by glucose level", &groups, 0.05).unwrap();

        assert!(result.statistic.abs() < 1e-12);
        assert!(result.p_value > 0.999);
        assert_eq!(result.decision, Decision::FailToRejectNull);
        assert!((result.df_between - 2.0).abs() < 1e-12);
        assert!((result.df_within - 12.0).abs() < 1e-12);
    }

    #[test]
    fn anova_detects_separated_group_means() {
        let df = df!(
            "age_years" => &[41.0, 42.0, 43.0, 51.0, 52.0, 53.0, 61.0, 62.0, 63.0],
            "gluc" => &[
                "Normal", "Normal", "Normal",
                "Above", "Above", "Above",
                "WellAbove", "WellAbove", "WellAbove",
            ],
        )
        .unwrap();
        let result = age_by_glucose(&df, 0.05).unwrap();

        assert!((result.statistic - 300.0).abs() < 1e-9);
        assert!(result.p_value < 1e-3);
        assert_eq!(result.decision, Decision::RejectNull);
        assert_eq!(
            result.group_means,
            vec![
                ("Normal".to_string(), 42.0),
                ("Above".to_string(), 52.0),
                ("WellAbove".to_string(), 62.0),
            ]
        );
        assert_eq!(result.residual_normality.sample_size, 9);
        // Alternative thresholds stay available through the trait.
        assert_eq!(result.decision_at(1e-12), Decision::FailToRejectNull);
    }

    #[test]
    fn anova_requires_at_least_two_groups() {
        let df = df!(
            "age_years" => &[41.0, 42.0, 43.0],
            "gluc" => &["Normal", "Normal", "Normal"],
        )
        .unwrap();
        assert!(matches!(
            age_by_glucose(&df, 0.05),
            Err(AnalysisError::InsufficientData { .. })
        ));
    }

    #[test]
    fn unknown_group_level_is_a_schema_violation() {
        let df = df!(
            "bmi" => &[25.0, 26.0],
            "cardio" => &["No", "Maybe"],
        )
        .unwrap();
        assert!(matches!(
            bmi_by_cardio(&df, 0.05),
            Err(AnalysisError::Schema { .. })
        ));
    }
}
