use ccf_estimator::assemble::EstimateRow;
use ccf_estimator::confidence::Confidence;
use ccf_estimator::config::ConfigWorkbook;
use ccf_estimator::engine::{EstimationEngine, EstimationReport};
use ccf_estimator::ingest::{load_predictors, load_reported};
use ccf_estimator::output::{write_report, OutputFormat};
use ccf_estimator::records::{ColumnKey, Scope, TONNES_CO2E};
use std::fs;
use std::path::Path;

const CLIMATE_REPORTS: &str = "\
Scope,Parameter,Description
Scope 1,Mobile combustion,emissions from company vehicles.
Scope 1,Stationary combustion,emissions from boilers and kilns.
Scope 1,Total scope 1 emission,all direct emissions.
Scope 2,Energy Use Total,total energy consumed.
Scope 2,Total Renewable Energy,energy from renewable sources.
Scope 2,Location-based emissions,grid-average emissions from purchased energy.
";

const ANNUAL_REPORTS: &str = "\
Parameter,Description,Unit
Fleet size,Number of vehicles,count
Fleet km,Kilometres driven,km
Revenue,Annual revenue,USD m
";

const DEPENDENCY_MATRIX: &str = "\
Scope,Parameter,Fleet size,Fleet km,Revenue
Scope 1,Mobile combustion,1,1,0
Scope 1,Stationary combustion,0,0,1
Scope 2,Location-based emissions,0,0,0
";

const REPORTED: &str = "\
Year,Scope,Parameter,Activity,Unit,Value
2018,Scope 1,Mobile combustion,Total,tCO2e,10
2019,Scope 1,Mobile combustion,Total,tCO2e,20
2020,Scope 1,Mobile combustion,Total,tCO2e,30
2021,Scope 1,Mobile combustion,Total,tCO2e,
2022,Scope 1,Mobile combustion,Total,tCO2e,
2018,Scope 1,Stationary combustion,Boilers,tCO2e,5
2019,Scope 1,Stationary combustion,Boilers,tCO2e,0
2020,Scope 1,Stationary combustion,Boilers,tCO2e,7
2021,Scope 1,Stationary combustion,Boilers,tCO2e,8
2022,Scope 1,Stationary combustion,Boilers,tCO2e,9
2018,Scope 1,Stationary combustion,Kilns,tCO2e,1
2019,Scope 1,Stationary combustion,Kilns,tCO2e,1
2020,Scope 1,Stationary combustion,Kilns,tCO2e,1
2021,Scope 1,Stationary combustion,Kilns,tCO2e,1
2022,Scope 1,Stationary combustion,Kilns,tCO2e,1
2018,Scope 2,Energy Use Total,Total,MWh,500
2019,Scope 2,Energy Use Total,Total,MWh,600
2020,Scope 2,Energy Use Total,Total,MWh,700
2021,Scope 2,Energy Use Total,Total,MWh,800
2022,Scope 2,Energy Use Total,Total,MWh,900
2018,Scope 2,Total Renewable Energy,Total,MWh,100
2019,Scope 2,Total Renewable Energy,Total,MWh,100
2020,Scope 2,Total Renewable Energy,Total,MWh,100
2021,Scope 2,Total Renewable Energy,Total,MWh,100
2022,Scope 2,Total Renewable Energy,Total,MWh,100
2018,Scope 2,Location-based emissions,Total,tCO2e,40
2019,Scope 2,Location-based emissions,Total,tCO2e,50
2020,Scope 2,Location-based emissions,Total,tCO2e,60
";

const PREDICTORS: &str = "\
Year,Parameter,Value,Unit
2018,Fleet size,20,count
2019,Fleet size,40,count
2020,Fleet size,60,count
2021,Fleet size,80,count
2022,Fleet size,100,count
2018,Fleet km,20,km
2019,Fleet km,40,km
2020,Fleet km,60,km
2021,Fleet km,80,km
2022,Fleet km,100,km
2018,Revenue,100,USD m
2019,Revenue,120,USD m
2020,Revenue,140,USD m
2021,Revenue,160,USD m
2022,Revenue,180,USD m
2010,Revenue,50,USD m
";

fn write_inputs(dir: &Path) {
    let config = dir.join("config");
    fs::create_dir_all(&config).unwrap();
    fs::write(config.join("climate_reports.csv"), CLIMATE_REPORTS).unwrap();
    fs::write(config.join("annual_reports.csv"), ANNUAL_REPORTS).unwrap();
    fs::write(config.join("dependency_matrix.csv"), DEPENDENCY_MATRIX).unwrap();
    fs::write(config.join("settings.json"), r#"{"company": "Acme Beverages"}"#).unwrap();
    fs::write(dir.join("reported.csv"), REPORTED).unwrap();
    fs::write(dir.join("predictors.csv"), PREDICTORS).unwrap();
}

fn run_pipeline(dir: &Path) -> EstimationReport {
    write_inputs(dir);
    let workbook = ConfigWorkbook::load(dir.join("config")).unwrap();
    let reported = load_reported(dir.join("reported.csv")).unwrap();
    let predictors = load_predictors(dir.join("predictors.csv")).unwrap();
    EstimationEngine::new().run(&reported, &predictors, &workbook).unwrap()
}

fn find<'a>(rows: &'a [EstimateRow], year: i32, parameter: &str, activity: &str) -> Option<&'a EstimateRow> {
    rows.iter()
        .find(|r| r.year == year && r.parameter == parameter && r.activity == activity)
}

fn estimated(rows: &[EstimateRow], year: i32, parameter: &str, activity: &str) -> f64 {
    find(rows, year, parameter, activity)
        .and_then(|r| r.estimated)
        .unwrap_or_else(|| panic!("no estimate for {} {} {}", year, parameter, activity))
}

#[test]
fn test_missing_years_follow_fitted_line() {
    let dir = tempfile::tempdir().unwrap();
    let report = run_pipeline(dir.path());
    let rows = &report.estimates;

    assert_eq!(estimated(rows, 2021, "Mobile combustion", "Total"), 40.0);
    assert_eq!(estimated(rows, 2022, "Mobile combustion", "Total"), 50.0);
    let gap = find(rows, 2021, "Mobile combustion", "Total").unwrap();
    assert_eq!(gap.reported, None);
    assert_eq!(gap.confidence, Confidence::NotApplicable);
    let known = find(rows, 2019, "Mobile combustion", "Total").unwrap();
    assert_eq!(known.confidence, Confidence::High);
}

#[test]
fn test_tied_predictors_keep_first_listed() {
    let dir = tempfile::tempdir().unwrap();
    let report = run_pipeline(dir.path());
    let key = ColumnKey::new(Scope::Scope1, "Mobile combustion", "Total", TONNES_CO2E);
    let fit = report.column(&key).unwrap().fit.as_ref().unwrap();
    assert_eq!(fit.predictor, "Fleet size");
}

#[test]
fn test_reported_zero_is_not_training_data() {
    let dir = tempfile::tempdir().unwrap();
    let report = run_pipeline(dir.path());
    let row = find(&report.estimates, 2019, "Stationary combustion", "Boilers").unwrap();

    assert_eq!(row.reported, Some(0.0));
    assert_eq!(row.estimated, Some(6.0));
    assert_eq!(row.confidence, Confidence::High);

    let key = ColumnKey::new(Scope::Scope1, "Stationary combustion", "Boilers", TONNES_CO2E);
    let fit = report.column(&key).unwrap().fit.as_ref().unwrap();
    assert_eq!(fit.training_years, 4);
}

#[test]
fn test_based_parameter_uses_derived_energy_predictor() {
    let dir = tempfile::tempdir().unwrap();
    let report = run_pipeline(dir.path());

    assert_eq!(estimated(&report.estimates, 2021, "Location-based emissions", "Total"), 70.0);
    assert_eq!(estimated(&report.estimates, 2022, "Location-based emissions", "Total"), 80.0);
    let key = ColumnKey::new(Scope::Scope2, "Location-based emissions", "Total", TONNES_CO2E);
    assert_eq!(report.column(&key).unwrap().fit.as_ref().unwrap().predictor, "energy_use");
}

#[test]
fn test_estimate_present_whenever_reported() {
    let dir = tempfile::tempdir().unwrap();
    let report = run_pipeline(dir.path());
    for row in &report.estimates {
        assert!(
            row.estimated.is_some() || row.reported.is_none(),
            "missing estimate for {:?}",
            row
        );
    }
}

#[test]
fn test_totals_and_parents_are_reconciled() {
    let dir = tempfile::tempdir().unwrap();
    let report = run_pipeline(dir.path());
    let rows = &report.estimates;

    for year in 2018..=2022 {
        let boilers = estimated(rows, year, "Stationary combustion", "Boilers");
        let kilns = estimated(rows, year, "Stationary combustion", "Kilns");
        let stationary = estimated(rows, year, "Stationary combustion", "Total");
        assert_eq!(stationary, boilers + kilns, "stationary total in {}", year);

        let mobile = estimated(rows, year, "Mobile combustion", "Total");
        let scope1 = estimated(rows, year, "Total scope 1 emission", "Total");
        assert_eq!(scope1, mobile + stationary, "scope 1 total in {}", year);
    }
    assert!(report.reconciliation.parent_totals >= 1);
}

#[test]
fn test_rows_are_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let report = run_pipeline(dir.path());
    let keys: Vec<_> = report
        .estimates
        .iter()
        .map(|r| (r.year, r.scope, r.unit.clone(), r.parameter.clone(), r.activity.clone()))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    // predictor years outside the reported range add no rows
    assert!(report.estimates.iter().all(|r| r.year >= 2018));
}

#[test]
fn test_explanations_cover_dependency_entries() {
    let dir = tempfile::tempdir().unwrap();
    let report = run_pipeline(dir.path());
    let explanations = &report.explanations;

    assert_eq!(explanations.predictors, vec!["Fleet size", "Fleet km", "Revenue"]);
    assert_eq!(explanations.len(), 4);
    let mobile = explanations
        .rows
        .iter()
        .find(|r| r.parameter == "Mobile combustion")
        .unwrap();
    assert_eq!(mobile.flags, vec![true, true, false]);
    assert!(mobile.explanation.contains("reported by Acme Beverages"));
    assert!(mobile.explanation.contains(" Fleet km: Kilometres driven"));
}

#[test]
fn test_report_files_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let report = run_pipeline(dir.path());
    let out = dir.path().join("out");

    let written = write_report(&report, &out, OutputFormat::Csv).unwrap();
    assert_eq!(written.len(), 3);
    assert!(written.iter().all(|p| p.exists()));

    let mut reader = csv::Reader::from_path(out.join("estimates.csv")).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(
        headers,
        vec!["Year", "Scope", "Parameter", "Activity", "Unit", "Company Reported", "Ongil Estimated", "Confidence"]
    );
    assert_eq!(reader.records().count(), report.estimates.len());

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("report.json")).unwrap()).unwrap();
    assert_eq!(json["company"], "Acme Beverages");
    assert_eq!(json["run_id"], report.run_id.to_string());

    let parquet = write_report(&report, &dir.path().join("pq"), OutputFormat::Parquet).unwrap();
    assert!(parquet[0].extension().unwrap() == "parquet");
}

#[test]
fn test_failed_report_write_leaves_no_partial_files() {
    let dir = tempfile::tempdir().unwrap();
    let report = run_pipeline(dir.path());
    let out = dir.path().join("out");
    // a directory squatting on report.json makes the last write fail
    fs::create_dir_all(out.join("report.json")).unwrap();

    assert!(write_report(&report, &out, OutputFormat::Csv).is_err());
    assert!(!out.join("estimates.csv").exists());
    assert!(!out.join("explanations.csv").exists());
    assert!(out.join("report.json").is_dir());
}
