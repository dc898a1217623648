//! Fixed-width histogram over `[0, total_span]` and the growing event buffer
//! a scan step fills.

use serde::Serialize;

use crate::error::{BuildError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramSpec {
    bin_width: f64,
    total_span: f64,
}

impl HistogramSpec {
    /// Upper limit on `total_span / bin_width`.
    pub const MAX_BINS: usize = labscan_config::MAX_HISTOGRAM_BINS;

    pub fn new(bin_width: f64, total_span: f64) -> Result<Self> {
        if !(bin_width.is_finite() && bin_width > 0.0) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "histogram bin width must be > 0",
            )));
        }
        if !(total_span.is_finite() && total_span >= bin_width) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "histogram span must be at least one bin wide",
            )));
        }
        if total_span / bin_width > Self::MAX_BINS as f64 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "histogram has too many bins; widen the bin or shorten the span",
            )));
        }
        Ok(Self {
            bin_width,
            total_span,
        })
    }

    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    pub fn total_span(&self) -> f64 {
        self.total_span
    }

    /// `floor(total_span / bin_width) + 1`.
    pub fn num_edges(&self) -> usize {
        (self.total_span / self.bin_width).floor() as usize + 1
    }

    pub fn edges(&self) -> Vec<f64> {
        (0..self.num_edges())
            .map(|i| i as f64 * self.bin_width)
            .collect()
    }
}

/// Counts per bin. `edges.len() == counts.len() + 1`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    edges: Vec<f64>,
    counts: Vec<u64>,
}

impl Histogram {
    /// Bin `timestamps` without modifying them.
    ///
    /// Bins are half-open `[e_i, e_{i+1})` except the last, which also takes
    /// values equal to the final edge. Values outside the edges are dropped.
    pub fn from_timestamps(spec: &HistogramSpec, timestamps: &[f64]) -> Self {
        let edges = spec.edges();
        let nbins = edges.len() - 1;
        let mut counts = vec![0u64; nbins];
        let first = edges[0];
        let last = edges[nbins];
        for &t in timestamps {
            if !(t >= first && t <= last) {
                continue;
            }
            let mut idx = ((t / spec.bin_width).floor() as usize).min(nbins - 1);
            // float division can land one bin off the literal edges
            while idx > 0 && t < edges[idx] {
                idx -= 1;
            }
            while idx + 1 < nbins && t >= edges[idx + 1] {
                idx += 1;
            }
            counts[idx] += 1;
        }
        Self { edges, counts }
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Sum of bins whose left edge `e` satisfies `lower <= e < upper`.
    pub fn sum_left_edges_in(&self, lower: f64, upper: f64) -> u64 {
        self.edges
            .iter()
            .zip(&self.counts)
            .filter(|(e, _)| **e >= lower && **e < upper)
            .map(|(_, c)| *c)
            .sum()
    }
}

/// Raw timestamps of one scan step plus an optional display histogram.
///
/// The display copy is rebuilt every `refresh_every` new events. Rebuilding
/// only reads the raw list, so the final extraction does not depend on how
/// often it happened.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    spec: HistogramSpec,
    timestamps: Vec<f64>,
    refresh_every: usize,
    since_refresh: usize,
    refreshes: usize,
    display: Option<Histogram>,
}

impl EventBuffer {
    /// `refresh_every == 0` disables display refreshes.
    pub fn new(spec: HistogramSpec, refresh_every: usize) -> Self {
        Self {
            spec,
            timestamps: Vec::new(),
            refresh_every,
            since_refresh: 0,
            refreshes: 0,
            display: None,
        }
    }

    pub fn spec(&self) -> &HistogramSpec {
        &self.spec
    }

    /// Replace the binning, e.g. when a scanned timing anchor moves the detection span.
    pub fn set_spec(&mut self, spec: HistogramSpec) {
        self.spec = spec;
        self.display = None;
    }

    pub fn extend(&mut self, events: &[f64]) {
        self.timestamps.extend_from_slice(events);
        if self.refresh_every == 0 {
            return;
        }
        self.since_refresh += events.len();
        while self.since_refresh >= self.refresh_every {
            self.since_refresh -= self.refresh_every;
            self.refresh();
        }
    }

    /// Recompute the display histogram from the raw list.
    pub fn refresh(&mut self) {
        self.display = Some(Histogram::from_timestamps(&self.spec, &self.timestamps));
        self.refreshes += 1;
        tracing::trace!(events = self.timestamps.len(), refreshes = self.refreshes, "display histogram refreshed");
    }

    /// Drop everything collected so far; used when a step is re-issued.
    pub fn clear(&mut self) {
        self.timestamps.clear();
        self.since_refresh = 0;
        self.display = None;
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn display(&self) -> Option<&Histogram> {
        self.display.as_ref()
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_count_follows_floor_rule() {
        let s = HistogramSpec::new(1.0, 10.5).unwrap();
        assert_eq!(s.num_edges(), 11);
        assert_eq!(*s.edges().last().unwrap(), 10.0);
    }

    #[test]
    fn rejects_bad_width_and_span() {
        assert!(HistogramSpec::new(0.0, 10.0).is_err());
        assert!(HistogramSpec::new(-1.0, 10.0).is_err());
        assert!(HistogramSpec::new(2.0, 1.0).is_err());
        assert!(HistogramSpec::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn bin_count_is_capped() {
        let max = HistogramSpec::MAX_BINS as f64;
        let s = HistogramSpec::new(1.0, max).unwrap();
        assert_eq!(s.num_edges(), HistogramSpec::MAX_BINS + 1);
        assert!(HistogramSpec::new(1.0, max + 1.0).is_err());
        assert!(HistogramSpec::new(1e-300, 100.0).is_err());
        assert!(HistogramSpec::new(1e-7, 150.0).is_err());
    }

    #[test]
    fn last_edge_goes_to_last_bin_and_outliers_drop() {
        let s = HistogramSpec::new(1.0, 3.0).unwrap();
        let h = Histogram::from_timestamps(&s, &[-0.1, 0.0, 1.0, 2.5, 3.0, 3.1, f64::NAN]);
        assert_eq!(h.counts(), &[1, 1, 2]);
        assert_eq!(h.total(), 4);
    }

    #[test]
    fn left_edge_sum_is_half_open() {
        let s = HistogramSpec::new(1.0, 5.0).unwrap();
        let h = Histogram::from_timestamps(&s, &[0.5, 1.5, 2.5, 3.5, 4.5]);
        assert_eq!(h.sum_left_edges_in(1.0, 3.0), 2);
        assert_eq!(h.sum_left_edges_in(3.0, 1.0), 0);
    }

    #[test]
    fn refresh_does_not_touch_raw_events() {
        let s = HistogramSpec::new(1.0, 10.0).unwrap();
        let mut buf = EventBuffer::new(s, 2);
        buf.extend(&[5.0, 1.0, 3.0]);
        buf.extend(&[2.0]);
        assert_eq!(buf.refreshes(), 2);
        assert_eq!(buf.timestamps(), &[5.0, 1.0, 3.0, 2.0]);
        assert_eq!(
            buf.display().unwrap(),
            &Histogram::from_timestamps(&s, buf.timestamps())
        );
        buf.clear();
        assert!(buf.is_empty());
        assert!(buf.display().is_none());
    }
}
