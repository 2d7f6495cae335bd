//! CSV results and the run manifest.
//!
//! Layout under the output directory:
//! `data/<target>.csv` per target, `rpki_summary.csv`, and `run.json`.

use anyhow::Result;
use classify::RunReport;
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracer_core::{HopRow, PerTargetRecord};

pub const SUMMARY_FILE: &str = "rpki_summary.csv";
pub const MANIFEST_FILE: &str = "run.json";

const SUMMARY_HEADER: [&str; 8] = [
    "destination",
    "destination_ip",
    "num_unique_prefixes",
    "num_valid",
    "num_invalid",
    "num_notfound",
    "hops",
    "completed",
];

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub version: &'static str,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    pub targets: usize,
    pub trace_command: String,
    pub whois_server: String,
    pub validator: String,
}

/// Keeps target strings usable as file names.
pub fn detail_file_name(target: &str) -> String {
    let safe: String = target
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') { '_' } else { c })
        .collect();
    format!("{}.csv", safe)
}

pub fn write_detail(dir: &Path, record: &PerTargetRecord) -> Result<PathBuf> {
    let path = dir.join(detail_file_name(&record.target));
    let mut wtr = csv::Writer::from_writer(File::create(&path)?);
    wtr.write_record(HopRow::HEADER)?;
    for row in &record.rows {
        wtr.write_record(row.to_record())?;
    }
    wtr.flush()?;
    Ok(path)
}

/// The header is written even when the run has no targets.
pub fn write_summary(path: &Path, report: &RunReport) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(File::create(path)?);
    wtr.write_record(SUMMARY_HEADER)?;
    for row in report.summary() {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_report(out: &Path, report: &RunReport, manifest: &Manifest) -> Result<()> {
    let data = out.join("data");
    fs::create_dir_all(&data)?;
    for record in &report.records {
        write_detail(&data, record)?;
    }
    write_summary(&out.join(SUMMARY_FILE), report)?;
    fs::write(out.join(MANIFEST_FILE), serde_json::to_string_pretty(manifest)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracer_core::{Tally, ValidationStatus};

    fn record() -> PerTargetRecord {
        PerTargetRecord {
            target: "example.net".into(),
            destination: "93.184.216.34".into(),
            rows: vec![
                HopRow { hop: 1, address: "10.0.0.1".into(), prefix: None, asn: None, status: None },
                HopRow {
                    hop: 2,
                    address: "93.184.216.34".into(),
                    prefix: Some("93.184.216.0/24".parse().unwrap()),
                    asn: Some(15133),
                    status: Some(ValidationStatus::Valid),
                },
            ],
            tally: Tally { unique_prefixes: 1, valid: 1, invalid: 0, not_found: 0 },
            completed: true,
        }
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rpki-tracer-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(detail_file_name("8.8.8.8"), "8.8.8.8.csv");
        assert_eq!(detail_file_name("2001:db8::1"), "2001_db8__1.csv");
    }

    #[test]
    fn report_layout_and_columns() {
        let out = scratch("output");
        let report = RunReport { records: vec![record()] };
        let manifest = Manifest {
            version: tracer_core::version(),
            started_at: now_rfc3339(),
            ended_at: now_rfc3339(),
            duration_ms: 0,
            targets: 1,
            trace_command: "tracert -d -h 30 <target>".into(),
            whois_server: as_lookup::DEFAULT_SERVER.into(),
            validator: rpki_validate::RIPE_STAT_URL.into(),
        };
        write_report(&out, &report, &manifest).unwrap();

        let detail = fs::read_to_string(out.join("data").join("example.net.csv")).unwrap();
        assert_eq!(
            detail,
            "hop,ip,prefix,asn,status\n1,10.0.0.1,-,-,-\n2,93.184.216.34,93.184.216.0/24,15133,Valid\n"
        );
        let summary = fs::read_to_string(out.join(SUMMARY_FILE)).unwrap();
        assert_eq!(
            summary,
            "destination,destination_ip,num_unique_prefixes,num_valid,num_invalid,num_notfound,hops,completed\n\
             example.net,93.184.216.34,1,1,0,0,2,true\n"
        );
        let manifest: serde_json::Value = serde_json::from_str(&fs::read_to_string(out.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest["targets"], 1);
        fs::remove_dir_all(&out).unwrap();
    }

    #[test]
    fn empty_run_still_has_a_summary_header() {
        let out = scratch("empty");
        fs::create_dir_all(&out).unwrap();
        write_summary(&out.join(SUMMARY_FILE), &RunReport { records: vec![] }).unwrap();
        let summary = fs::read_to_string(out.join(SUMMARY_FILE)).unwrap();
        assert_eq!(summary.lines().count(), 1);
        assert!(summary.starts_with("destination,destination_ip,"));
        fs::remove_dir_all(&out).unwrap();
    }
}
