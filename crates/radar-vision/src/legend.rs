use serde::{Deserialize, Serialize};

/// Maximum Euclidean RGB distance accepted as a legend match.
pub const DEFAULT_TOLERANCE: f64 = 60.0;

/// One reference color of the radar legend and its precipitation label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub color: [u8; 3],
    pub label: String,
}

impl LegendEntry {
    pub fn new(color: [u8; 3], label: impl Into<String>) -> Self {
        Self {
            color,
            label: label.into(),
        }
    }
}

/// Ordered color legend. Entry order decides ties between equidistant colors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Legend {
    entries: Vec<LegendEntry>,
}

impl Legend {
    pub fn new(entries: Vec<LegendEntry>) -> Self {
        Self { entries }
    }

    /// Windy radar legend, lightest to heaviest.
    pub fn windy() -> Self {
        Self::new(vec![
            LegendEntry::new([42, 88, 142], "1.5 mm - Blue"),
            LegendEntry::new([49, 152, 158], "2 mm - Cyan"),
            LegendEntry::new([58, 190, 140], "3 mm - Aqua Green"),
            LegendEntry::new([109, 207, 102], "7 mm - Lime"),
            LegendEntry::new([192, 222, 72], "10 mm - Yellow Green"),
            LegendEntry::new([241, 86, 59], "20 mm - Red"),
            LegendEntry::new([172, 64, 112], "30 mm - Purple"),
        ])
    }

    pub fn entries(&self) -> &[LegendEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Closest legend entry to `rgb`, if it lies within `tolerance`.
    ///
    /// On an exact distance tie the earliest entry wins.
    pub fn match_color(&self, rgb: [u8; 3], tolerance: f64) -> Option<&LegendEntry> {
        let mut best: Option<(&LegendEntry, f64)> = None;
        for entry in &self.entries {
            let d = color_distance(rgb, entry.color);
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((entry, d));
            }
        }
        best.filter(|&(_, d)| d <= tolerance).map(|(entry, _)| entry)
    }
}

impl Default for Legend {
    fn default() -> Self {
        Self::windy()
    }
}

/// Euclidean distance in RGB space.
pub fn color_distance(a: [u8; 3], b: [u8; 3]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x as f64 - y as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}
