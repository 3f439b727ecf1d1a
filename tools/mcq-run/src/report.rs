//! Completion report printed at the end of a run.

use std::collections::BTreeMap;
use std::fmt;

use mcq::{Completion, CoreId, PoolStats, RecoveryCounts, ResultTag};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoreReport {
    pub core: u8,
    pub completed: usize,
    pub aborts: u32,
    pub resets: u32,
    pub escalations: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub submitted: usize,
    pub completed: usize,
    /// Completions per result tag, keyed by the tag's wire name.
    pub tags: BTreeMap<String, usize>,
    pub cores: Vec<CoreReport>,
    pub pool_min_free: usize,
    pub pool_total: usize,
    pub elapsed_ms: u128,
    /// Set when the run was cut short by Ctrl-C.
    pub interrupted: bool,
}

impl Report {
    pub fn new(cores: usize) -> Self {
        Self {
            cores: (0..cores)
                .map(|core| CoreReport {
                    core: core as u8,
                    ..CoreReport::default()
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, completion: &Completion) {
        self.completed += 1;
        *self.tags.entry(completion.tag.as_str().to_owned()).or_default() += 1;
        if let Some(entry) = completion
            .core
            .and_then(|core| self.cores.get_mut(core.index()))
        {
            entry.completed += 1;
        }
    }

    pub fn record_recovery(&mut self, core: CoreId, counts: RecoveryCounts) {
        if let Some(entry) = self.cores.get_mut(core.index()) {
            entry.aborts = counts.abort;
            entry.resets = counts.reset;
            entry.escalations = counts.escalated;
        }
    }

    pub fn record_pool(&mut self, stats: PoolStats) {
        self.pool_total = stats.total;
        self.pool_min_free = stats.min_free;
    }

    pub fn count(&self, tag: ResultTag) -> usize {
        self.tags.get(tag.as_str()).copied().unwrap_or(0)
    }

    /// Merges the per-session tallies of one client thread.
    pub fn merge(&mut self, other: &Report) {
        self.submitted += other.submitted;
        self.completed += other.completed;
        for (tag, n) in &other.tags {
            *self.tags.entry(tag.clone()).or_default() += n;
        }
        for (mine, theirs) in self.cores.iter_mut().zip(&other.cores) {
            mine.completed += theirs.completed;
        }
        self.interrupted |= other.interrupted;
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} of {} buffers completed in {} ms{}",
            self.completed,
            self.submitted,
            self.elapsed_ms,
            if self.interrupted { " (interrupted)" } else { "" }
        )?;
        writeln!(f, "results:")?;
        for (tag, n) in &self.tags {
            writeln!(f, "  {tag:<16} {n}")?;
        }
        writeln!(f, "cores:")?;
        for core in &self.cores {
            writeln!(
                f,
                "  core{:<3} {:>6} done  abort {} reset {} escalated {}",
                core.core, core.completed, core.aborts, core.resets, core.escalations
            )?;
        }
        write!(
            f,
            "pool: {} slots, low-water {} free",
            self.pool_total, self.pool_min_free
        )
    }
}
