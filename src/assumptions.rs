use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, Normal};

use crate::describe::{mean, sample_variance};
use crate::error::AnalysisError;

/// Outcome of a variance-equality check. Consumed by the t-test dispatcher
/// to pick the pooled or the Welch variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VarianceDecision {
    Equal,
    Unequal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VarianceMethod {
    Levene,
    Bartlett,
}

#[derive(Debug, Clone, Serialize)]
pub struct VarianceTestResult {
    pub method: VarianceMethod,
    pub statistic: f64,
    pub p_value: f64,
    pub alpha: f64,
    pub conclusion: VarianceDecision,
}

/// Levene's test for equality of variances: a one-way analysis of the
/// absolute deviations from each group mean, F-distributed under the null.
pub fn levene_test(
    groups: &[(String, Vec<f64>)],
    alpha: f64,
) -> Result<VarianceTestResult, AnalysisError> {
    validate_groups(groups)?;

    let k = groups.len();
    let n_total: usize = groups.iter().map(|(_, values)| values.len()).sum();

    let deviations: Vec<Vec<f64>> = groups
        .iter()
        .map(|(_, values)| {
            let center = mean(values);
            values.iter().map(|v| (v - center).abs()).collect()
        })
        .collect();

    let group_means: Vec<f64> = deviations.iter().map(|z| mean(z)).collect();
    let grand_mean = deviations.iter().flatten().sum::<f64>() / n_total as f64;

    let between: f64 = deviations
        .iter()
        .zip(&group_means)
        .map(|(z, &center)| z.len() as f64 * (center - grand_mean).powi(2))
        .sum();
    let within: f64 = deviations
        .iter()
        .zip(&group_means)
        .map(|(z, &center)| z.iter().map(|v| (v - center).powi(2)).sum::<f64>())
        .sum();

    let df_between = (k - 1) as f64;
    let df_within = (n_total - k) as f64;

    let (statistic, p_value) = if within > 0.0 {
        let statistic = (df_within / df_between) * between / within;
        let reference = FisherSnedecor::new(df_between, df_within)?;
        (statistic, (1.0 - reference.cdf(statistic)).clamp(0.0, 1.0))
    } else if between > 0.0 {
        (f64::INFINITY, 0.0)
    } else {
        (0.0, 1.0)
    };

    Ok(VarianceTestResult {
        method: VarianceMethod::Levene,
        statistic,
        p_value,
        alpha,
        conclusion: conclude(p_value, alpha),
    })
}

/// Bartlett's test for equality of variances, chi-square distributed with
/// k - 1 degrees of freedom under the null.
pub fn bartlett_test(
    groups: &[(String, Vec<f64>)],
    alpha: f64,
) -> Result<VarianceTestResult, AnalysisError> {
    validate_groups(groups)?;

    let k = groups.len();
    let n_total: usize = groups.iter().map(|(_, values)| values.len()).sum();
    let df_within = (n_total - k) as f64;
    let df = (k - 1) as f64;

    let group_sizes_and_variances: Vec<(f64, f64)> = groups
        .iter()
        .map(|(_, values)| {
            let center = mean(values);
            (values.len() as f64, sample_variance(values, center))
        })
        .collect();

    let (statistic, p_value) = if group_sizes_and_variances
        .iter()
        .any(|&(_, variance)| variance <= 0.0)
    {
        // A zero-variance group makes the log-ratio degenerate.
        if group_sizes_and_variances
            .iter()
            .all(|&(_, variance)| variance == 0.0)
        {
            (0.0, 1.0)
        } else {
            (f64::INFINITY, 0.0)
        }
    } else {
        let pooled = group_sizes_and_variances
            .iter()
            .map(|&(n, variance)| (n - 1.0) * variance)
            .sum::<f64>()
            / df_within;
        let correction = 1.0
            + (group_sizes_and_variances
                .iter()
                .map(|&(n, _)| 1.0 / (n - 1.0))
                .sum::<f64>()
                - 1.0 / df_within)
                / (3.0 * df);
        let numerator = df_within * pooled.ln()
            - group_sizes_and_variances
                .iter()
                .map(|&(n, variance)| (n - 1.0) * variance.ln())
                .sum::<f64>();
        let statistic = (numerator / correction).max(0.0);
        let reference = ChiSquared::new(df)?;
        (statistic, (1.0 - reference.cdf(statistic)).clamp(0.0, 1.0))
    };

    Ok(VarianceTestResult {
        method: VarianceMethod::Bartlett,
        statistic,
        p_value,
        alpha,
        conclusion: conclude(p_value, alpha),
    })
}

fn conclude(p_value: f64, alpha: f64) -> VarianceDecision {
    if p_value < alpha {
        VarianceDecision::Unequal
    } else {
        VarianceDecision::Equal
    }
}

/// Reject groupings the tests cannot work with: fewer than two groups, or
/// any group with fewer than two observations.
pub(crate) fn validate_groups(groups: &[(String, Vec<f64>)]) -> Result<(), AnalysisError> {
    if groups.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            group: "grouping".to_string(),
            observed: groups.len(),
            required: 2,
        });
    }
    for (label, values) in groups {
        if values.len() < 2 {
            return Err(AnalysisError::InsufficientData {
                group: label.clone(),
                observed: values.len(),
                required: 2,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QqPoint {
    pub theoretical: f64,
    pub sample: f64,
}

/// Descriptive normality diagnostics: histogram-ready binned counts and
/// ordered sample values paired with normal quantiles for Q-Q inspection.
/// Normality is judged visually by the reporting side; there is no
/// automated pass/fail here.
#[derive(Debug, Clone, Serialize)]
pub struct NormalityDiagnostic {
    pub sample_size: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub histogram: Vec<HistogramBin>,
    pub qq: Vec<QqPoint>,
}

pub fn normality_diagnostic(values: &[f64]) -> Result<NormalityDiagnostic, AnalysisError> {
    if values.len() < 3 {
        return Err(AnalysisError::InsufficientData {
            group: "residuals".to_string(),
            observed: values.len(),
            required: 3,
        });
    }

    let n = values.len();
    let center = mean(values);
    let std_dev = sample_variance(values, center).sqrt();

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let min = sorted[0];
    let max = sorted[n - 1];

    // Sturges' rule for the bin count.
    let bin_count = (n as f64).log2().ceil() as usize + 1;
    let histogram = if max > min {
        let width = (max - min) / bin_count as f64;
        let mut counts = vec![0usize; bin_count];
        for &v in &sorted {
            let mut index = ((v - min) / width) as usize;
            if index >= bin_count {
                index = bin_count - 1;
            }
            counts[index] += 1;
        }
        counts
            .iter()
            .enumerate()
            .map(|(i, &count)| HistogramBin {
                lower: min + i as f64 * width,
                upper: min + (i + 1) as f64 * width,
                count,
            })
            .collect()
    } else {
        vec![HistogramBin {
            lower: min,
            upper: max,
            count: n,
        }]
    };

    let reference = Normal::new(0.0, 1.0)?;
    let qq = sorted
        .iter()
        .enumerate()
        .map(|(i, &sample)| {
            let p = (i as f64 + 0.5) / n as f64;
            QqPoint {
                theoretical: center + std_dev * reference.inverse_cdf(p),
                sample,
            }
        })
        .collect();

    Ok(NormalityDiagnostic {
        sample_size: n,
        mean: center,
        std_dev,
        histogram,
        qq,
    })
}
