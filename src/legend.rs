/*!
 * Legend classification for cluster badges and choropleth fills
 */

use serde::{Deserialize, Serialize};

/// Sequential fill palette, lightest first
pub const CHOROPLETH_PALETTE: [&str; 7] = [
    "#FFEDA0", "#FED976", "#FEB24C", "#FD8D3C", "#FC4E2A", "#E31A1C", "#BD0026",
];

/// Count thresholds separating the density bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandThresholds {
    /// Counts below this are `Low`
    pub low: u64,
    /// Counts below this (and not low) are `Medium`
    pub high: u64,
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self { low: 10, high: 30 }
    }
}

/// Density band of a marker cluster or county count
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DensityBand {
    Low,
    Medium,
    High,
}

impl DensityBand {
    pub fn classify(count: u64, thresholds: &BandThresholds) -> Self {
        if count < thresholds.low {
            DensityBand::Low
        } else if count < thresholds.high {
            DensityBand::Medium
        } else {
            DensityBand::High
        }
    }

    /// Badge color; sparse coverage is flagged red
    pub fn color(&self) -> &'static str {
        match self {
            DensityBand::Low => "#F44336",
            DensityBand::Medium => "#FFEB3B",
            DensityBand::High => "#4CAF50",
        }
    }

    pub fn label(&self, thresholds: &BandThresholds) -> String {
        match self {
            DensityBand::Low => format!("< {}", thresholds.low),
            DensityBand::Medium => format!("{} – {}", thresholds.low, thresholds.high.saturating_sub(1)),
            DensityBand::High => format!("≥ {}", thresholds.high),
        }
    }
}

/// One class of a choropleth legend, `[lower, upper]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendClass {
    pub lower: f64,
    pub upper: f64,
    pub color: String,
}

/// Equal-interval choropleth legend
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Legend {
    pub classes: Vec<LegendClass>,
}

impl Legend {
    /// Split `[min, max]` of the finite values into equal-width classes
    ///
    /// The class count is clamped to `1..=CHOROPLETH_PALETTE.len()`. No finite
    /// values give an empty legend; a constant series gives a single class.
    pub fn equal_interval<I>(values: I, classes: usize) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let (min, max) = values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));

        if min > max {
            return Legend::default();
        }

        if min == max {
            return Legend {
                classes: vec![LegendClass { lower: min, upper: max, color: CHOROPLETH_PALETTE[palette_slot(0, 1)].to_string() }],
            };
        }

        let n = classes.clamp(1, CHOROPLETH_PALETTE.len());
        let step = (max - min) / n as f64;
        let classes = (0..n)
            .map(|i| LegendClass {
                lower: min + step * i as f64,
                upper: if i + 1 == n { max } else { min + step * (i + 1) as f64 },
                color: CHOROPLETH_PALETTE[palette_slot(i, n)].to_string(),
            })
            .collect();

        Legend { classes }
    }

    /// Index of the class containing `value`; values outside the range clamp to the ends
    pub fn class_index(&self, value: f64) -> Option<usize> {
        if self.classes.is_empty() || !value.is_finite() {
            return None;
        }
        let last = self.classes.len() - 1;
        Some(
            self.classes
                .iter()
                .position(|c| value < c.upper)
                .unwrap_or(last),
        )
    }

    pub fn color_for(&self, value: f64) -> Option<&str> {
        self.class_index(value).map(|i| self.classes[i].color.as_str())
    }
}

// n classes run from the lightest to the darkest color; a single class takes the lightest
fn palette_slot(i: usize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    i * (CHOROPLETH_PALETTE.len() - 1) / (n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_density_bands() {
        let t = BandThresholds::default();
        assert_eq!(DensityBand::classify(0, &t), DensityBand::Low);
        assert_eq!(DensityBand::classify(9, &t), DensityBand::Low);
        assert_eq!(DensityBand::classify(10, &t), DensityBand::Medium);
        assert_eq!(DensityBand::classify(29, &t), DensityBand::Medium);
        assert_eq!(DensityBand::classify(30, &t), DensityBand::High);
        assert_eq!(DensityBand::Low.color(), "#F44336");
        assert_eq!(DensityBand::Medium.label(&t), "10 – 29");
    }

    #[test]
    fn test_equal_interval() {
        let legend = Legend::equal_interval([0.0, 10.0, 5.0, f64::NAN], 5);
        assert_eq!(legend.classes.len(), 5);
        assert_eq!(legend.classes[0].lower, 0.0);
        assert_eq!(legend.classes[4].upper, 10.0);
        assert_eq!(legend.class_index(0.0), Some(0));
        assert_eq!(legend.class_index(1.99), Some(0));
        assert_eq!(legend.class_index(2.0), Some(1));
        assert_eq!(legend.class_index(10.0), Some(4));
        assert_eq!(legend.color_for(10.0), Some(CHOROPLETH_PALETTE[6]));
        assert_eq!(legend.color_for(f64::NAN), None);
    }

    #[test]
    fn test_degenerate_legends() {
        assert!(Legend::equal_interval(Vec::<f64>::new(), 5).classes.is_empty());
        let constant = Legend::equal_interval([4.0, 4.0], 5);
        assert_eq!(constant.classes.len(), 1);
        assert_eq!(constant.class_index(4.0), Some(0));
        let one_class = Legend::equal_interval([1.0, 3.0], 1);
        assert_eq!(one_class.classes.len(), 1);
        assert_eq!(constant.classes[0].color, one_class.classes[0].color);
        assert_eq!(constant.color_for(4.0), Some(CHOROPLETH_PALETTE[0]));
        assert_eq!(Legend::equal_interval([1.0, 2.0], 99).classes.len(), CHOROPLETH_PALETTE.len());
    }
}
