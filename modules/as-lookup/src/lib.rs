//! Bulk address to AS/prefix resolution over the whois bulk protocol.
//!
//! One TCP session per run: `begin`, `verbose`, one address per line, `end`.
//! The server answers with a banner line and then one record per address:
//! `AS | IP | BGP Prefix | CC | Registry | Allocated | AS Name`.

use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracer_core::error::stage;
use tracer_core::{log_debug, log_info, AsLookup, AsMapping, AsTable, Logger, PipelineError, Result};

pub const DEFAULT_SERVER: &str = "whois.cymru.com:43";

/// Placeholder the service uses for an absent value.
const ABSENT: &str = "NA";
const FIELDS: usize = 7;

#[derive(Debug, Clone)]
pub struct BulkWhois {
    pub server: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for BulkWhois {
    fn default() -> Self {
        BulkWhois {
            server: DEFAULT_SERVER.into(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
        }
    }
}

impl BulkWhois {
    pub fn new(server: impl Into<String>) -> Self {
        BulkWhois { server: server.into(), ..Self::default() }
    }

    /// Sends the framed query and reads the banner plus one line per address.
    async fn session(&self, addresses: &BTreeSet<String>) -> Result<String> {
        let ctx = || format!("bulk lookup via {}", self.server);
        let mut stream = match timeout(self.connect_timeout, TcpStream::connect(self.server.as_str())).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(PipelineError::service(stage::RESOLVE, ctx(), e)),
            Err(_) => return Err(PipelineError::service(stage::RESOLVE, ctx(), "connect timed out")),
        };
        let query = build_query(addresses.iter().map(String::as_str));
        stream
            .write_all(query.as_bytes())
            .await
            .map_err(|e| PipelineError::service(stage::RESOLVE, ctx(), e))?;

        let expected = addresses.len() + 1;
        let read = async move {
            let mut reader = BufReader::new(stream);
            let mut collected = String::new();
            let mut line = String::new();
            let mut got = 0usize;
            while got < expected {
                line.clear();
                if reader.read_line(&mut line).await? == 0 {
                    break;
                }
                if line.trim().is_empty() {
                    continue;
                }
                collected.push_str(line.trim_end_matches(&['\r', '\n'][..]));
                collected.push('\n');
                got += 1;
            }
            Ok::<_, std::io::Error>(collected)
        };
        match timeout(self.read_timeout, read).await {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(e)) => Err(PipelineError::service(stage::RESOLVE, ctx(), e)),
            Err(_) => Err(PipelineError::service(stage::RESOLVE, ctx(), "read timed out")),
        }
    }
}

#[async_trait]
impl AsLookup for BulkWhois {
    async fn resolve(&self, addresses: &BTreeSet<String>, logger: &dyn Logger) -> Result<AsTable> {
        if addresses.is_empty() {
            return Ok(AsTable::new());
        }
        log_info!(logger, "Mapping hops ({}) to ASes via {}", addresses.len(), self.server);
        let raw = self.session(addresses).await?;
        let table = parse_bulk_response(&raw, addresses)?;
        log_debug!(
            logger,
            "resolved {} addresses, {} without a BGP prefix",
            table.len(),
            table.values().filter(|m| m.prefix.is_none()).count()
        );
        Ok(table)
    }
}

pub fn build_query<'a>(addresses: impl IntoIterator<Item = &'a str>) -> String {
    let mut q = String::from("begin\nverbose\n");
    for a in addresses {
        q.push_str(a);
        q.push('\n');
    }
    q.push_str("end\n");
    q
}

fn present(field: &str) -> Option<&str> {
    if field.is_empty() || field == ABSENT {
        None
    } else {
        Some(field)
    }
}

/// Parses one record into the queried address and its mapping.
pub fn parse_record(line: &str) -> Result<(String, AsMapping)> {
    let bad = |detail: &str| PipelineError::malformed(stage::RESOLVE, detail, line);
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    if fields.len() != FIELDS {
        return Err(bad(&format!("expected {} fields, found {}", FIELDS, fields.len())));
    }
    let asn = match present(fields[0]) {
        Some(a) => Some(a.parse::<u32>().map_err(|_| bad("AS number is not numeric"))?),
        None => None,
    };
    let address = fields[1];
    if address.parse::<IpAddr>().is_err() {
        return Err(bad("queried address is not an IP address"));
    }
    let prefix = match present(fields[2]) {
        Some(p) => Some(p.parse::<IpNet>().map_err(|_| bad("BGP prefix is not a CIDR block"))?),
        None => None,
    };
    Ok((address.to_string(), AsMapping { asn, prefix }))
}

/// Parses a whole bulk response. The first non-blank line is the banner.
///
/// The table must hold exactly the `submitted` addresses.
pub fn parse_bulk_response(raw: &str, submitted: &BTreeSet<String>) -> Result<AsTable> {
    let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
    let mut table = AsTable::with_capacity(submitted.len());
    if lines.next().is_none() {
        if submitted.is_empty() {
            return Ok(table);
        }
        return Err(PipelineError::malformed(stage::RESOLVE, "empty response", raw));
    }
    for line in lines {
        let (address, mapping) = parse_record(line)?;
        if !submitted.contains(&address) {
            return Err(PipelineError::malformed(stage::RESOLVE, format!("record for unsubmitted address {}", address), line));
        }
        if table.insert(address.clone(), mapping).is_some() {
            return Err(PipelineError::malformed(stage::RESOLVE, format!("duplicate record for {}", address), line));
        }
    }
    if table.len() != submitted.len() {
        let missing: Vec<&str> = submitted.iter().filter(|a| !table.contains_key(*a)).map(String::as_str).collect();
        return Err(PipelineError::malformed(
            stage::RESOLVE,
            format!("expected {} records, got {} (missing: {})", submitted.len(), table.len(), missing.join(",")),
            raw,
        ));
    }
    Ok(table)
}
