use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG: &str = "rpki-tracer.yaml";

#[derive(Debug, Default, Deserialize, Clone)]
pub struct TraceConfig {
    pub program: Option<String>,
    pub no_dns_flag: Option<String>,
    pub max_hops_flag: Option<String>,
    pub max_hops: Option<u8>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct LookupConfig {
    pub server: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ValidateConfig {
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub qps: Option<u32>,
    pub cache: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct RunConfig {
    pub concurrency: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub out: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub trace: Option<TraceConfig>,
    pub lookup: Option<LookupConfig>,
    pub validate: Option<ValidateConfig>,
    pub run: Option<RunConfig>,
}

/// Loads `path`, or `./rpki-tracer.yaml` when present. A named file that
/// cannot be read or parsed is an error.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).map_err(|e| anyhow!("reading {}: {}", path.display(), e))?;
    parse_config(&s).map(Some).map_err(|e| anyhow!("{}: {}", path.display(), e))
}

pub fn parse_config(s: &str) -> Result<Config> {
    Ok(serde_yaml::from_str(s)?)
}

/// Command-line values; `None` means the flag was not given.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub program: Option<String>,
    pub max_hops: Option<u8>,
    pub trace_timeout_ms: Option<u64>,
    pub whois: Option<String>,
    pub qps: Option<u32>,
    pub no_cache: bool,
    pub concurrency: Option<usize>,
    pub no_parallel: bool,
    pub out: Option<PathBuf>,
}

/// Effective run settings after merging flags, config and defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub trace: path_trace::TraceCommand,
    pub lookup: as_lookup::BulkWhois,
    pub validate: rpki_validate::ValidatorOptions,
    pub cache: bool,
    pub concurrency: Option<usize>,
    pub poll_interval: Duration,
    pub out: PathBuf,
}

impl Settings {
    /// Flags win over the config file, which wins over built-in defaults.
    pub fn resolve(cli: &Overrides, cfg: Option<&Config>) -> Settings {
        let tc = cfg.and_then(|c| c.trace.clone()).unwrap_or_default();
        let lc = cfg.and_then(|c| c.lookup.clone()).unwrap_or_default();
        let vc = cfg.and_then(|c| c.validate.clone()).unwrap_or_default();
        let rc = cfg.and_then(|c| c.run.clone()).unwrap_or_default();

        let mut trace = path_trace::TraceCommand::default();
        if let Some(p) = cli.program.clone().or(tc.program) { trace.program = p; }
        if let Some(f) = tc.no_dns_flag { trace.no_dns_flag = if f.is_empty() { None } else { Some(f) }; }
        if let Some(f) = tc.max_hops_flag { trace.max_hops_flag = f; }
        if let Some(h) = cli.max_hops.or(tc.max_hops) { trace.max_hops = h; }
        trace.timeout = cli.trace_timeout_ms.or(tc.timeout_ms).map(Duration::from_millis);

        let mut lookup = as_lookup::BulkWhois::default();
        if let Some(s) = cli.whois.clone().or(lc.server) { lookup.server = s; }
        if let Some(ms) = lc.connect_timeout_ms { lookup.connect_timeout = Duration::from_millis(ms); }
        if let Some(ms) = lc.read_timeout_ms { lookup.read_timeout = Duration::from_millis(ms); }

        let mut validate = rpki_validate::ValidatorOptions::default();
        if let Some(u) = vc.base_url { validate.base_url = u; }
        if let Some(ms) = vc.timeout_ms { validate.timeout_ms = ms; }
        validate.qps = cli.qps.or(vc.qps).filter(|q| *q > 0);
        let cache = !cli.no_cache && vc.cache.unwrap_or(true);

        let concurrency = if cli.no_parallel { Some(1) } else { cli.concurrency.or(rc.concurrency) };
        let poll_interval = rc
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(tracer_core::pool::DEFAULT_POLL_INTERVAL);
        let out = cli.out.clone().or(rc.out).unwrap_or_else(|| PathBuf::from("output"));

        Settings { trace, lookup, validate, cache, concurrency, poll_interval, out }
    }
}
