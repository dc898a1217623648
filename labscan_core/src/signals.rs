//! Windowed count signals derived from one step's event timestamps.

use labscan_traits::SequenceParams;
use serde::{Serialize, Serializer};

use crate::error::Result;
use crate::histogram::{Histogram, HistogramSpec};

/// Which bound closes the `lost` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LostEnd {
    /// Whichever of pulse end and cutoff comes first.
    #[default]
    Narrower,
    PulseEnd,
    Cutoff,
}

/// Window placement relative to the sequence anchors, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiLayout {
    pub loading_start_us: f64,
    pub loading_end_offset_us: f64,
    pub trapped_before_us: f64,
    pub trapped_after_us: f64,
    pub lost_start_offset_us: f64,
    pub lost_cutoff_us: f64,
    pub lost_end: LostEnd,
}

impl Default for RoiLayout {
    fn default() -> Self {
        Self {
            loading_start_us: 0.0,
            loading_end_offset_us: 0.0,
            trapped_before_us: 1.0,
            trapped_after_us: 1.0,
            lost_start_offset_us: 0.0,
            lost_cutoff_us: 5.0,
            lost_end: LostEnd::Narrower,
        }
    }
}

/// Half-open time window `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Roi {
    pub lower: f64,
    pub upper: f64,
}

impl Roi {
    pub fn sum(&self, h: &Histogram) -> u64 {
        h.sum_left_edges_in(self.lower, self.upper)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoiSet {
    pub loading: Roi,
    pub trapped: Roi,
    pub lost: Roi,
}

impl RoiLayout {
    pub fn windows(&self, p: &SequenceParams) -> RoiSet {
        let load = p.load_time_us;
        let extraction = load + p.wait_time_us;
        let pulse_end = load + p.pulse_length_us;
        let cutoff = load + self.lost_cutoff_us;
        let lost_upper = match self.lost_end {
            LostEnd::Narrower => pulse_end.min(cutoff),
            LostEnd::PulseEnd => pulse_end,
            LostEnd::Cutoff => cutoff,
        };
        RoiSet {
            loading: Roi {
                lower: self.loading_start_us,
                upper: load + self.loading_end_offset_us,
            },
            trapped: Roi {
                lower: extraction - self.trapped_before_us,
                upper: extraction + self.trapped_after_us,
            },
            lost: Roi {
                lower: load + self.lost_start_offset_us,
                upper: lost_upper,
            },
        }
    }
}

/// A ratio that is explicitly undefined when its denominator is zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ratio {
    Value(f64),
    Undefined,
}

impl Ratio {
    pub fn of(num: u64, den: u64) -> Self {
        if den == 0 {
            Ratio::Undefined
        } else {
            Ratio::Value(num as f64 / den as f64)
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Ratio::Value(v) => Some(v),
            Ratio::Undefined => None,
        }
    }

    pub fn is_undefined(self) -> bool {
        matches!(self, Ratio::Undefined)
    }
}

impl Serialize for Ratio {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Ratio::Value(v) => s.serialize_f64(*v),
            Ratio::Undefined => s.serialize_str("undefined"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalSet {
    pub loading: u64,
    pub trapped: u64,
    pub lost: u64,
    pub ratio_trapped: Ratio,
    pub ratio_lost: Ratio,
}

impl SignalSet {
    pub fn new(loading: u64, trapped: u64, lost: u64) -> Self {
        Self {
            loading,
            trapped,
            lost,
            ratio_trapped: Ratio::of(trapped, loading),
            ratio_lost: Ratio::of(lost, loading),
        }
    }
}

/// Everything computed for one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    pub histogram: Histogram,
    pub rois: RoiSet,
    pub signals: SignalSet,
}

/// Histogram binning plus ROI layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalPipeline {
    pub bin_width_us: f64,
    pub margin_us: f64,
    pub layout: RoiLayout,
}

impl SignalPipeline {
    /// `max(load + wait, load + pulse) + margin`.
    pub fn detection_span(&self, p: &SequenceParams) -> f64 {
        let load = p.load_time_us;
        (load + p.wait_time_us).max(load + p.pulse_length_us) + self.margin_us
    }

    pub fn histogram_spec(&self, p: &SequenceParams) -> Result<HistogramSpec> {
        HistogramSpec::new(self.bin_width_us, self.detection_span(p))
    }

    /// Pure function of its inputs: the same timestamps always give the same result.
    pub fn extract(&self, timestamps: &[f64], p: &SequenceParams) -> Result<Extraction> {
        let spec = self.histogram_spec(p)?;
        let histogram = Histogram::from_timestamps(&spec, timestamps);
        let rois = self.layout.windows(p);
        let signals = SignalSet::new(
            rois.loading.sum(&histogram),
            rois.trapped.sum(&histogram),
            rois.lost.sum(&histogram),
        );
        Ok(Extraction {
            histogram,
            rois,
            signals,
        })
    }
}
