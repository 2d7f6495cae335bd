//! Splits a batch of regional work units into contiguous groups so several
//! machines can share one run, and decides which regions a worker still owes.

use serde::Deserialize;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracer_core::{log_info, Logger, PipelineError, Result};

/// One worker's share: a contiguous run of indices plus the trailing
/// remainder appended to the last group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkGroup {
    pub index: usize,
    pub span: Range<usize>,
    pub extra: Range<usize>,
}

impl WorkGroup {
    pub fn contains(&self, i: usize) -> bool {
        self.span.contains(&i) || self.extra.contains(&i)
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.span.clone().chain(self.extra.clone())
    }

    pub fn len(&self) -> usize {
        self.span.len() + self.extra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partitions `n` items into `groups` contiguous groups of `n / groups` items.
///
/// The last group is extended by `n % base` indices. When that is smaller
/// than `n % groups`, the tail of the batch belongs to no group.
pub fn partition(n: usize, groups: usize) -> Result<Vec<WorkGroup>> {
    if groups == 0 {
        return Err(PipelineError::InvalidPartition("group count must be positive".into()));
    }
    let base = n / groups;
    if base == 0 {
        return Err(PipelineError::InvalidPartition(format!("{} item(s) cannot fill {} group(s)", n, groups)));
    }
    let remainder = n % base;
    let mut out: Vec<WorkGroup> = (0..groups)
        .map(|g| WorkGroup { index: g, span: g * base..(g + 1) * base, extra: 0..0 })
        .collect();
    let tail = groups * base;
    if let Some(last) = out.last_mut() {
        last.extra = tail..(tail + remainder).min(n);
    }
    Ok(out)
}

/// Picks worker `index`'s group out of a partition of `n` items.
pub fn select_group(n: usize, groups: usize, index: usize) -> Result<WorkGroup> {
    if index >= groups {
        return Err(PipelineError::InvalidPartition(format!("worker index {} out of range for {} group(s)", index, groups)));
    }
    let mut all = partition(n, groups)?;
    Ok(all.swap_remove(index))
}

/// A labelled batch of trace targets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "(String, Vec<String>)")]
pub struct Region {
    pub label: String,
    pub addresses: Vec<String>,
}

impl From<(String, Vec<String>)> for Region {
    fn from((label, addresses): (String, Vec<String>)) -> Self {
        Region { label, addresses }
    }
}

/// Parses `[[label, [address, ...]], ...]`.
pub fn parse_regions(raw: &str) -> Result<Vec<Region>> {
    serde_json::from_str(raw).map_err(|e| PipelineError::InvalidPartition(format!("region list: {}", e)))
}

/// A region assigned to this worker and where its outputs go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub region: Region,
    pub out_dir: PathBuf,
}

/// Regions in `group` whose output directory under `root` does not exist yet.
/// With `force` every region of the group is returned.
pub fn pending(regions: &[Region], group: &WorkGroup, root: &Path, force: bool, logger: &dyn Logger) -> Vec<Assignment> {
    let mut out = Vec::new();
    for (i, region) in regions.iter().enumerate() {
        if !group.contains(i) {
            continue;
        }
        let out_dir = root.join(&region.label);
        if out_dir.exists() && !force {
            log_info!(logger, "Output for region {} already exists, skipping", region.label);
            continue;
        }
        out.push(Assignment { region: region.clone(), out_dir });
    }
    out
}
