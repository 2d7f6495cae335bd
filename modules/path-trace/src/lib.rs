//! Path tracing through an external trace utility, plus parsing of its report.

use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracer_core::error::stage;
use tracer_core::{log_debug, log_info, Hop, Logger, PipelineError, Result, TraceResult, TraceSource, WorkerPool};

/// How to launch the trace utility. Defaults to `tracert -d -h 30 <target>`.
#[derive(Debug, Clone)]
pub struct TraceCommand {
    pub program: String,
    /// Flag disabling reverse DNS on hop addresses.
    pub no_dns_flag: Option<String>,
    pub max_hops_flag: String,
    pub max_hops: u8,
    /// Wall-clock limit for one invocation; `None` waits for the utility.
    pub timeout: Option<Duration>,
}

impl Default for TraceCommand {
    fn default() -> Self {
        TraceCommand {
            program: "tracert".into(),
            no_dns_flag: Some("-d".into()),
            max_hops_flag: "-h".into(),
            max_hops: 30,
            timeout: None,
        }
    }
}

impl TraceCommand {
    pub fn args(&self, target: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(f) = &self.no_dns_flag {
            args.push(f.clone());
        }
        args.push(self.max_hops_flag.clone());
        args.push(self.max_hops.to_string());
        args.push(target.to_string());
        args
    }

    pub fn command_line(&self, target: &str) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args(target));
        parts.join(" ")
    }
}

#[async_trait]
impl TraceSource for TraceCommand {
    async fn run(&self, target: &str) -> Result<String> {
        let fail = |reason: String| PipelineError::ExternalToolFailure { target: target.to_string(), reason };
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args(target))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(|e| fail(format!("failed to spawn {}: {}", self.program, e)))?;
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| fail(format!("timed out after {} ms", limit.as_millis())))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| fail(format!("failed to collect output: {}", e)))?;

        // tracert writes in the console code page; keep what is readable
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(fail(format!("{} produced no output ({}): {}", self.program, output.status, stderr.trim())));
        }
        Ok(stdout)
    }
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*Tracing route to (\S+)(?:\s+\[([^\]\s]+)\])?").expect("header pattern"))
}

fn hop_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // with name lookups the address follows the host name in brackets
        Regex::new(r"^\s*(\d+)\s+((?:(?:<?\d+\s*ms|\*)\s+){1,3})(?:\S+\s+\[([^\]\s]+)\]|(\S.*?))\s*$")
            .expect("hop pattern")
    })
}

/// Parses a full trace report. Hops with a timed-out reading are dropped.
pub fn parse_trace_output(raw: &str) -> Result<TraceResult> {
    let lines: Vec<&str> = raw.lines().collect();
    let (header_idx, caps) = lines
        .iter()
        .enumerate()
        .find_map(|(i, l)| header_re().captures(l).map(|c| (i, c)))
        .ok_or_else(|| PipelineError::malformed(stage::TRACE, "missing 'Tracing route to' header", raw))?;
    let literal = caps[1].to_string();
    let destination = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_else(|| literal.clone());

    let mut hops = Vec::new();
    for line in &lines[header_idx + 1..] {
        let Some(c) = hop_re().captures(line) else { continue };
        let timing = c[2].trim();
        if timing.contains('*') {
            continue;
        }
        let Some(address) = c.get(3).or_else(|| c.get(4)) else { continue };
        hops.push(Hop { timing: timing.to_string(), address: address.as_str().to_string() });
    }
    Ok(TraceResult::new(literal, hops, destination))
}

/// Traces one target through `source`.
pub async fn trace(target: &str, source: &dyn TraceSource, logger: &dyn Logger) -> Result<TraceResult> {
    log_info!(logger, "Performing traceroute for \"{}\"", target);
    let raw = source.run(target).await?;
    let result = parse_trace_output(&raw)?;
    log_debug!(
        logger,
        "{}: {} answered hops to {} (completed: {})",
        target,
        result.hops.len(),
        result.destination,
        result.completed
    );
    Ok(result)
}

/// Traces every target under the worker pool; results follow `targets` order.
pub async fn trace_all(
    targets: &[String],
    source: Arc<dyn TraceSource>,
    pool: &WorkerPool,
    cancel: &CancellationToken,
    logger: Arc<dyn Logger>,
) -> Result<Vec<TraceResult>> {
    let unit_logger = logger.clone();
    pool.run(targets.to_vec(), cancel, &*logger, move |_, target, _| {
        let source = source.clone();
        let logger = unit_logger.clone();
        async move { trace(&target, &*source, &*logger).await }
    })
    .await
}
