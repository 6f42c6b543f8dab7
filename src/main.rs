mod assumptions;
mod cleaning;
mod describe;
mod error;
mod hypothesis;
mod records;

use std::fs;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use env_logger::{Builder, Env};
use log::{error, info, warn, LevelFilter};
use polars::prelude::*;
use polars_io::parquet::{ParquetReader, ParquetWriter};
use serde::Serialize;
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};

use crate::error::AnalysisError;
use crate::hypothesis::{
    age_by_glucose, bmi_by_cardio, cholesterol_by_cardio, AnovaResult, ChiSquareResult,
    TTestResult, DEFAULT_ALPHA,
};
use crate::records::CardioRecord;

static DATASET_PATH: &str = "data/cardio_data_processed.csv";
static RAW_PATH: &str = "data/output/raw/";
static CLEAN_PATH: &str = "data/output/clean/";
static RESULTS_PATH: &str = "data/output/results/";
static CARDIO_FILE_NAME: &str = "cardio.parquet";
static REPORT_FILE_NAME: &str = "analysis.json";

pub async fn read_csv<P: AsRef<Path>>(path: P) -> PolarsResult<DataFrame> {
    let file = File::open(path)?;

    CsvReader::new(file)
        .has_header(true)
        .with_dtypes(Option::from(Arc::new(CardioRecord::raw_schema())))
        .finish()
}

pub async fn read_parquet<P: AsRef<Path>>(path: P) -> PolarsResult<DataFrame> {
    let file = File::open(path)?;

    ParquetReader::new(file).finish()
}

pub async fn write_csv(file_name: &str, df: &mut DataFrame) -> Result<(), AnalysisError> {
    let mut file = File::create(file_name)?;

    CsvWriter::new(&mut file).finish(df)?;

    Ok(())
}

pub async fn write_parquet(file_name: &str, df: &mut DataFrame) -> Result<(), AnalysisError> {
    let mut file = File::create(file_name)?;

    ParquetWriter::new(&mut file).finish(df)?;

    Ok(())
}

/// Per-test results handed to the reporting side. A test that failed on its
/// own data is absent; its error has already been logged.
#[derive(Debug, Serialize)]
struct AnalysisReport {
    alpha: f64,
    bmi_t_test: Option<TTestResult>,
    cholesterol_chi_square: Option<ChiSquareResult>,
    age_glucose_anova: Option<AnovaResult>,
}

async fn process_raw() -> Result<(), AnalysisError> {
    let mut df = read_csv(DATASET_PATH).await?;
    info!(
        "loaded raw table: {} rows x {} columns",
        df.height(),
        df.width()
    );

    write_parquet(
        format!("{}{}", RAW_PATH, CARDIO_FILE_NAME).as_str(),
        &mut df,
    )
    .await?;

    Ok(())
}

async fn process_clean() -> Result<(), AnalysisError> {
    let raw = read_parquet(format!("{}{}", RAW_PATH, CARDIO_FILE_NAME).as_str()).await?;

    let mut cleaned = cleaning::clean(&raw)?;
    info!(
        "cleaned table: {} of {} rows kept",
        cleaned.height(),
        raw.height()
    );

    write_csv(
        format!("{}{}", CLEAN_PATH, "debug.csv").as_str(),
        &mut cleaned,
    )
    .await?;
    write_parquet(
        format!("{}{}", CLEAN_PATH, CARDIO_FILE_NAME).as_str(),
        &mut cleaned,
    )
    .await?;

    Ok(())
}

async fn run_analysis() -> Result<(), AnalysisError> {
    let df_clean = read_parquet(format!("{}{}", CLEAN_PATH, CARDIO_FILE_NAME).as_str()).await?;

    // Each test reads the same immutable table; a failure is isolated to the
    // test that raised it.
    let bmi_t_test = match bmi_by_cardio(&df_clean, DEFAULT_ALPHA) {
        Ok(result) => {
            info!(
                "{}: {:?} t = {:.4}, p = {:.6}, {:?}",
                result.test_name, result.variant, result.statistic, result.p_value, result.decision
            );
            Some(result)
        }
        Err(e) => {
            error!("bmi t-test failed: {e}");
            None
        }
    };

    let cholesterol_chi_square = match cholesterol_by_cardio(&df_clean, DEFAULT_ALPHA) {
        Ok(result) => {
            if let Some(warning) = &result.warning {
                warn!(
                    "chi-square expected frequency below 5 in {} cell(s), minimum {:.3}",
                    warning.cells.len(),
                    warning.min_expected
                );
            }
            info!(
                "{}: chi2 = {:.4}, dof = {}, p = {:.6}, {:?}",
                result.test_name,
                result.statistic,
                result.degrees_of_freedom,
                result.p_value,
                result.decision
            );
            Some(result)
        }
        Err(e) => {
            error!("cholesterol chi-square failed: {e}");
            None
        }
    };

    let age_glucose_anova = match age_by_glucose(&df_clean, DEFAULT_ALPHA) {
        Ok(result) => {
            info!(
                "{}: F = {:.4}, dof = ({}, {}), p = {:.6}, {:?} (variances {:?})",
                result.test_name,
                result.statistic,
                result.df_between,
                result.df_within,
                result.p_value,
                result.decision,
                result.variance_check.conclusion
            );
            Some(result)
        }
        Err(e) => {
            error!("age anova failed: {e}");
            None
        }
    };

    let report = AnalysisReport {
        alpha: DEFAULT_ALPHA,
        bmi_t_test,
        cholesterol_chi_square,
        age_glucose_anova,
    };
    let report_path = format!("{}{}", RESULTS_PATH, REPORT_FILE_NAME);
    let file = File::create(report_path.as_str())?;
    serde_json::to_writer_pretty(file, &report)?;
    info!("wrote analysis report to {report_path}");

    Ok(())
}

fn monitor_memory() -> u64 {
    let mut system = System::new();
    let pid = Pid::from_u32(std::process::id());
    system.refresh_process(pid);
    system
        .process(pid)
        .map(|process| process.memory())
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<(), AnalysisError> {
    let env = Env::new().filter("CARDIO_LOG");
    Builder::new()
        .filter(Some("cardio_analysis"), LevelFilter::Info)
        .parse_env(env)
        .init();

    let start_time = Instant::now();
    let start_memory = monitor_memory();

    for path in [RAW_PATH, CLEAN_PATH, RESULTS_PATH] {
        fs::create_dir_all(path)?;
    }

    process_raw().await?;
    process_clean().await?;
    run_analysis().await?;

    let end_memory = monitor_memory();
    info!("pipeline finished in {:?}", start_time.elapsed());
    info!(
        "resident memory delta: {} KiB",
        end_memory.saturating_sub(start_memory) / 1024
    );

    Ok(())
}
