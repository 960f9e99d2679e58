//! Temperature bins for exposure stratification

use serde::Serialize;

use crate::config::BinningConfig;

/// Half-open temperature interval `[lower, upper)`; None edges are open
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureBin {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub label: String,
    pub is_reference: bool,
}

impl TemperatureBin {
    pub fn contains(&self, value: f64) -> bool {
        self.lower.map_or(true, |l| value >= l) && self.upper.map_or(true, |u| value < u)
    }
}

/// Partition of the real line into a reference bin, fixed-width bins and an
/// optional top-coded bin
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureBinning {
    width: f64,
    reference_upper: f64,
    top_code: Option<f64>,
}

impl TemperatureBinning {
    pub fn new(config: &BinningConfig) -> Self {
        Self {
            width: config.width,
            reference_upper: config.reference_upper,
            top_code: config.top_code,
        }
    }

    pub fn reference_bin(&self) -> TemperatureBin {
        TemperatureBin {
            lower: None,
            upper: Some(self.reference_upper),
            label: format!("<{}°C", format_edge(self.reference_upper)),
            is_reference: true,
        }
    }

    /// Bin containing `value`; None for non-finite values
    pub fn assign(&self, value: f64) -> Option<TemperatureBin> {
        if !value.is_finite() {
            return None;
        }
        if value < self.reference_upper {
            return Some(self.reference_bin());
        }
        if let Some(top) = self.top_code {
            if value >= top {
                return Some(TemperatureBin {
                    lower: Some(top),
                    upper: None,
                    label: format!(">={}°C", format_edge(top)),
                    is_reference: false,
                });
            }
        }

        let k = ((value - self.reference_upper) / self.width).floor();
        let mut lower = self.reference_upper + k * self.width;
        // Rounding can leave the value just outside the computed bin
        if value < lower {
            lower -= self.width;
        } else if value >= lower + self.width {
            lower += self.width;
        }
        let mut upper = lower + self.width;
        if let Some(top) = self.top_code {
            upper = upper.min(top);
        }

        Some(TemperatureBin {
            lower: Some(lower),
            upper: Some(upper),
            label: format!("[{},{})", format_edge(lower), format_edge(upper)),
            is_reference: false,
        })
    }

    /// Contiguous bins spanning the observed range of finite values
    pub fn bins_for(&self, values: &[f64]) -> Vec<TemperatureBin> {
        let finite = values.iter().copied().filter(|v| v.is_finite());
        let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        let (Some(first), Some(last)) = (self.assign(min), self.assign(max)) else {
            return Vec::new();
        };

        let mut bins = vec![first];
        while bins.last().map(|b| b.label != last.label).unwrap_or(false) {
            let Some(next_lower) = bins.last().and_then(|b| b.upper) else {
                break;
            };
            match self.assign(next_lower) {
                Some(bin) => bins.push(bin),
                None => break,
            }
        }
        bins
    }
}

/// Render a bin edge without trailing zeros (26 -> "26", 26.5 -> "26.5")
fn format_edge(edge: f64) -> String {
    let rounded = (edge * 1e6).round() / 1e6;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    }
}
