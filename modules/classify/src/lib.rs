//! Per-target classification of traced paths, and the run driver that wires
//! tracing, bulk AS resolution and route validation together.

use ipnet::IpNet;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracer_core::error::stage;
use tracer_core::{
    log_debug, log_error, log_info, AsLookup, AsTable, HopRow, Logger, PerTargetRecord, PipelineError, Result,
    RouteValidator, SummaryRow, Tally, TraceResult, TraceSource, ValidationStatus, WorkerPool,
};

/// Walks one target's hops in order and tallies its unique prefixes.
///
/// A prefix counts once per target, the first time it appears; only those hops
/// move a tally. Hops whose address is absent from `table` abort the run, and
/// so does cancelling `cancel`, even mid-request.
pub async fn classify_target(
    target: &str,
    trace: &TraceResult,
    table: &AsTable,
    validator: &dyn RouteValidator,
    cancel: &CancellationToken,
    logger: &dyn Logger,
) -> Result<PerTargetRecord> {
    let mut seen: HashSet<IpNet> = HashSet::new();
    let mut tally = Tally::default();
    let mut rows = Vec::with_capacity(trace.hops.len());

    for (i, hop) in trace.hops.iter().enumerate() {
        let mapping = table.get(&hop.address).ok_or_else(|| PipelineError::MissingAsMapping {
            target: target.to_string(),
            address: hop.address.clone(),
        })?;
        let unique = mapping.prefix.map(|p| seen.insert(p)).unwrap_or(false);

        let status = match (mapping.asn, mapping.prefix) {
            (Some(asn), Some(prefix)) => Some(tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                res = validator.validate(asn, &prefix, logger) => res?,
            }),
            // announced but without an origin AS: nothing to validate against
            (None, Some(prefix)) => {
                log_debug!(logger, "{}: prefix {} at {} has no origin AS", target, prefix, hop.address);
                Some(ValidationStatus::NotFound)
            }
            _ => None,
        };

        if unique {
            tally.unique_prefixes += 1;
            match &status {
                Some(ValidationStatus::Valid) => tally.valid += 1,
                Some(ValidationStatus::Invalid(_)) => tally.invalid += 1,
                Some(ValidationStatus::NotFound) => tally.not_found += 1,
                None => {}
            }
        }

        rows.push(HopRow {
            hop: i + 1,
            address: hop.address.clone(),
            prefix: mapping.prefix,
            asn: mapping.asn,
            status,
        });
    }
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    Ok(PerTargetRecord {
        target: target.to_string(),
        destination: trace.destination.clone(),
        rows,
        tally,
        completed: trace.completed,
    })
}

/// Deduplicated union of every hop address across all traces.
pub fn collect_hop_addresses(traces: &[TraceResult]) -> BTreeSet<String> {
    traces.iter().flat_map(|t| t.hops.iter().map(|h| h.address.clone())).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// One record per target, in submission order.
    pub records: Vec<PerTargetRecord>,
}

impl RunReport {
    pub fn summary(&self) -> Vec<SummaryRow> {
        self.records.iter().map(PerTargetRecord::summary).collect()
    }
}

pub struct Pipeline {
    pub tracer: Arc<dyn TraceSource>,
    pub lookup: Arc<dyn AsLookup>,
    pub validator: Arc<dyn RouteValidator>,
    pub pool: WorkerPool,
}

impl Pipeline {
    /// Runs every stage for `targets`. Any failure abandons the whole run.
    pub async fn run(&self, targets: &[String], cancel: &CancellationToken, logger: Arc<dyn Logger>) -> Result<RunReport> {
        let started = Instant::now();
        let traces = path_trace::trace_all(targets, self.tracer.clone(), &self.pool, cancel, logger.clone())
            .await
            .map_err(|e| stage_failed(&*logger, stage::TRACE, e))?;
        log_info!(logger, "Finished tracing {} target(s), time elapsed: {:?}", targets.len(), started.elapsed());

        let addresses = collect_hop_addresses(&traces);
        let table = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            res = self.lookup.resolve(&addresses, &*logger) => res.map_err(|e| stage_failed(&*logger, stage::RESOLVE, e))?,
        };

        log_info!(logger, "Beginning calculations");
        let mut records = Vec::with_capacity(targets.len());
        for (target, trace) in targets.iter().zip(&traces) {
            let record = classify_target(target, trace, &table, &*self.validator, cancel, &*logger)
                .await
                .map_err(|e| stage_failed(&*logger, stage::CLASSIFY, e))?;
            records.push(record);
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        log_info!(
            logger,
            "Finished tracing and validating list of {} target(s) in {:?}",
            targets.len(),
            started.elapsed()
        );
        Ok(RunReport { records })
    }
}

fn stage_failed(logger: &dyn Logger, stage: &str, err: PipelineError) -> PipelineError {
    if !err.is_cancelled() {
        log_error!(logger, "{} stage failed: {}", stage, err);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tracer_core::{AsMapping, Hop, NoOpLogger};

    struct Fixed(HashMap<IpNet, ValidationStatus>);

    #[async_trait::async_trait]
    impl RouteValidator for Fixed {
        async fn validate(&self, _asn: u32, prefix: &IpNet, _logger: &dyn Logger) -> Result<ValidationStatus> {
            Ok(self.0.get(prefix).cloned().unwrap_or(ValidationStatus::NotFound))
        }
    }

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn trace_of(addrs: &[&str]) -> TraceResult {
        let hops = addrs.iter().map(|a| Hop { timing: "1 ms    1 ms    1 ms".into(), address: a.to_string() }).collect();
        TraceResult::new("t".into(), hops, addrs.last().unwrap().to_string())
    }

    #[tokio::test]
    async fn repeated_and_null_prefixes_are_not_tallied() {
        // prefixes along the path: P1, P1, P2, null, P2
        let trace = trace_of(&["1.0.0.1", "1.0.0.2", "2.0.0.1", "10.0.0.1", "2.0.0.2"]);
        let p1 = Some(net("1.0.0.0/24"));
        let p2 = Some(net("2.0.0.0/24"));
        let mut table = AsTable::new();
        table.insert("1.0.0.1".into(), AsMapping { asn: Some(1), prefix: p1 });
        table.insert("1.0.0.2".into(), AsMapping { asn: Some(1), prefix: p1 });
        table.insert("2.0.0.1".into(), AsMapping { asn: Some(2), prefix: p2 });
        table.insert("10.0.0.1".into(), AsMapping { asn: None, prefix: None });
        table.insert("2.0.0.2".into(), AsMapping { asn: Some(2), prefix: p2 });
        let mut statuses = HashMap::new();
        statuses.insert(net("1.0.0.0/24"), ValidationStatus::Valid);
        statuses.insert(net("2.0.0.0/24"), ValidationStatus::Invalid("invalid_asn".into()));

        let rec = classify_target("t", &trace, &table, &Fixed(statuses), &CancellationToken::new(), &NoOpLogger).await.unwrap();
        assert_eq!(rec.tally, Tally { unique_prefixes: 2, valid: 1, invalid: 1, not_found: 0 });
        assert_eq!(rec.tally.valid + rec.tally.invalid + rec.tally.not_found, 2);
        assert_eq!(rec.rows.len(), 5);
        assert_eq!(rec.rows[3].status, None);
        assert_eq!(rec.rows[4].status, Some(ValidationStatus::Invalid("invalid_asn".into())));
        assert_eq!(rec.rows.iter().map(|r| r.hop).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn missing_mapping_is_fatal() {
        let trace = trace_of(&["1.0.0.1", "9.9.9.9"]);
        let mut table = AsTable::new();
        table.insert("1.0.0.1".into(), AsMapping::default());
        let err = classify_target("t", &trace, &table, &Fixed(HashMap::new()), &CancellationToken::new(), &NoOpLogger).await.unwrap_err();
        match err {
            PipelineError::MissingAsMapping { target, address } => {
                assert_eq!(target, "t");
                assert_eq!(address, "9.9.9.9");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn prefix_without_origin_counts_as_not_found() {
        let trace = trace_of(&["198.28.137.80"]);
        let mut table = AsTable::new();
        table.insert("198.28.137.80".into(), AsMapping { asn: None, prefix: Some(net("198.28.137.0/24")) });
        let rec = classify_target("t", &trace, &table, &Fixed(HashMap::new()), &CancellationToken::new(), &NoOpLogger).await.unwrap();
        assert_eq!(rec.tally, Tally { unique_prefixes: 1, valid: 0, invalid: 0, not_found: 1 });
    }

    #[test]
    fn hop_addresses_are_deduplicated() {
        let a = trace_of(&["10.0.0.1", "1.1.1.1"]);
        let b = trace_of(&["10.0.0.1", "8.8.8.8"]);
        let set = collect_hop_addresses(&[a, b]);
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec!["1.1.1.1", "10.0.0.1", "8.8.8.8"]);
    }
}
