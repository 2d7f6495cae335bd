//! Domain types flowing between pipeline stages.

use ipnet::IpNet;
use serde::Serialize;
use std::collections::HashMap;

/// One answered hop: the raw timing field and the address that replied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub timing: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceResult {
    /// Literal target echoed by the trace utility's header.
    pub target: String,
    pub hops: Vec<Hop>,
    /// Address the utility actually resolved the target to.
    pub destination: String,
    pub completed: bool,
}

impl TraceResult {
    pub fn new(target: String, hops: Vec<Hop>, destination: String) -> Self {
        let completed = hops.last().map(|h| h.address == destination).unwrap_or(false);
        TraceResult { target, hops, destination, completed }
    }
}

/// AS and BGP prefix announcing one address. `None` means the service had no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AsMapping {
    pub asn: Option<u32>,
    pub prefix: Option<IpNet>,
}

pub type AsTable = HashMap<String, AsMapping>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValidationStatus {
    Valid,
    /// Keeps the service's sub-variant, e.g. `invalid_asn`.
    Invalid(String),
    NotFound,
}

impl ValidationStatus {
    /// Capitalized status as shown in detail rows.
    pub fn label(&self) -> String {
        match self {
            ValidationStatus::Valid => "Valid".to_string(),
            ValidationStatus::Invalid(variant) => capitalize(variant),
            ValidationStatus::NotFound => "Unknown".to_string(),
        }
    }
}

fn capitalize(s: &str) -> String {
    let lower = s.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopRow {
    /// 1-based position in the answered-hop sequence.
    pub hop: usize,
    pub address: String,
    pub prefix: Option<IpNet>,
    pub asn: Option<u32>,
    pub status: Option<ValidationStatus>,
}

impl HopRow {
    pub const HEADER: [&'static str; 5] = ["hop", "ip", "prefix", "asn", "status"];

    pub fn to_record(&self) -> [String; 5] {
        [
            self.hop.to_string(),
            self.address.clone(),
            self.prefix.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            self.asn.map(|a| a.to_string()).unwrap_or_else(|| "-".into()),
            self.status.as_ref().map(|s| s.label()).unwrap_or_else(|| "-".into()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub unique_prefixes: usize,
    pub valid: usize,
    pub invalid: usize,
    pub not_found: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerTargetRecord {
    pub target: String,
    pub destination: String,
    pub rows: Vec<HopRow>,
    pub tally: Tally,
    pub completed: bool,
}

impl PerTargetRecord {
    pub fn summary(&self) -> SummaryRow {
        SummaryRow {
            destination: self.target.clone(),
            destination_ip: self.destination.clone(),
            num_unique_prefixes: self.tally.unique_prefixes,
            num_valid: self.tally.valid,
            num_invalid: self.tally.invalid,
            num_notfound: self.tally.not_found,
            hops: self.rows.len(),
            completed: self.completed,
        }
    }
}

/// Field names are the run summary's column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub destination: String,
    pub destination_ip: String,
    pub num_unique_prefixes: usize,
    pub num_valid: usize,
    pub num_invalid: usize,
    pub num_notfound: usize,
    pub hops: usize,
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(addr: &str) -> Hop {
        Hop { timing: "1 ms 1 ms 1 ms".into(), address: addr.into() }
    }

    #[test]
    fn completed_requires_last_hop_to_match() {
        let t = TraceResult::new("x".into(), vec![hop("10.0.0.1"), hop("8.8.8.8")], "8.8.8.8".into());
        assert!(t.completed);
        let t = TraceResult::new("x".into(), vec![hop("8.8.8.8"), hop("10.0.0.1")], "8.8.8.8".into());
        assert!(!t.completed);
        let t = TraceResult::new("x".into(), vec![], "8.8.8.8".into());
        assert!(!t.completed);
    }

    #[test]
    fn status_labels() {
        assert_eq!(ValidationStatus::Valid.label(), "Valid");
        assert_eq!(ValidationStatus::NotFound.label(), "Unknown");
        assert_eq!(ValidationStatus::Invalid("invalid_asn".into()).label(), "Invalid_asn");
    }

    #[test]
    fn row_record_uses_dash_for_nulls() {
        let row = HopRow { hop: 1, address: "10.0.0.1".into(), prefix: None, asn: None, status: None };
        assert_eq!(row.to_record(), ["1", "10.0.0.1", "-", "-", "-"].map(String::from));
        let row = HopRow {
            hop: 2,
            address: "93.184.216.34".into(),
            prefix: Some("93.184.216.0/24".parse().unwrap()),
            asn: Some(15133),
            status: Some(ValidationStatus::Valid),
        };
        assert_eq!(row.to_record(), ["2", "93.184.216.34", "93.184.216.0/24", "15133", "Valid"].map(String::from));
    }
}
