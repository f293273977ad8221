// Soft-binned color histograms: the per-image signature the grouping
// engine compares.

use crate::config::ConfigError;
use crate::core::image::{FeatureError, Image};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MIN_STEPS: u16 = 2;
pub const MAX_STEPS: u16 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramConfig {
    /// Lattice points per channel.
    pub steps: u16,
    /// Number of heaviest bins kept per histogram.
    pub top_k: usize,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            steps: 16,
            top_k: 128,
        }
    }
}

impl HistogramConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_STEPS..=MAX_STEPS).contains(&self.steps) {
            return Err(ConfigError::StepsOutOfRange {
                steps: self.steps,
                min: MIN_STEPS,
                max: MAX_STEPS,
            });
        }
        if self.top_k == 0 {
            return Err(ConfigError::ZeroTopK);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorBin {
    pub index: u32,
    /// Lattice point color, per channel in 0..=255.
    pub color: [f32; 3],
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorHistogram {
    steps: u16,
    /// Sorted by ascending bin index.
    bins: Vec<ColorBin>,
    /// Share of the pixel mass that survived the top-K cap.
    retained_mass: f64,
}

impl ColorHistogram {
    /// Build a histogram from raw `(bin index, weight)` pairs. Zero weights
    /// are dropped, the heaviest `top_k` bins are kept (lower index wins a
    /// tie) and the survivors are rescaled to sum to 1. Repeated indices are
    /// summed, indices outside the `steps`³ lattice are dropped.
    pub(crate) fn from_weights<I>(steps: u16, weights: I, top_k: usize) -> Self
    where
        I: IntoIterator<Item = (u32, f64)>,
    {
        debug_assert!((MIN_STEPS..=MAX_STEPS).contains(&steps));
        let bin_count = lattice_size(steps);

        let mut merged: HashMap<u32, f64> = HashMap::new();
        for (index, weight) in weights {
            if index >= bin_count {
                log::debug!("Dropping bin {} outside a {}-step lattice", index, steps);
                continue;
            }
            *merged.entry(index).or_insert(0.0) += weight;
        }

        let mut ranked: Vec<(u32, f64)> = merged.into_iter().filter(|&(_, w)| w > 0.0).collect();

        // Sum in index order so the result does not depend on map iteration.
        ranked.sort_unstable_by_key(|&(index, _)| index);
        let total: f64 = ranked.iter().map(|&(_, w)| w).sum();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(top_k);
        ranked.sort_unstable_by_key(|&(index, _)| index);

        let kept: f64 = ranked.iter().map(|&(_, w)| w).sum();
        let retained_mass = if total > 0.0 { kept / total } else { 0.0 };

        let bins = ranked
            .into_iter()
            .map(|(index, weight)| ColorBin {
                index,
                color: lattice_color(steps, index),
                weight: weight / kept,
            })
            .collect();

        Self {
            steps,
            bins,
            retained_mass,
        }
    }

    pub fn steps(&self) -> u16 {
        self.steps
    }

    pub fn bins(&self) -> &[ColorBin] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&ColorBin> {
        self.bins
            .binary_search_by_key(&index, |bin| bin.index)
            .ok()
            .map(|pos| &self.bins[pos])
    }

    pub fn total_weight(&self) -> f64 {
        self.bins.iter().map(|bin| bin.weight).sum()
    }

    pub fn retained_mass(&self) -> f64 {
        self.retained_mass
    }
}

/// Number of bins in a `steps`-per-channel lattice.
pub(crate) fn lattice_size(steps: u16) -> u32 {
    let n = steps as u32;
    n * n * n
}

/// Color of the lattice point behind `index` for a `steps`-per-channel
/// lattice. `steps` must be at least [`MIN_STEPS`] and `index` inside the
/// lattice.
pub(crate) fn lattice_color(steps: u16, index: u32) -> [f32; 3] {
    let n = steps as u32;
    let spacing = 255.0 / (n - 1) as f32;
    let r = index % n;
    let g = (index / n) % n;
    let b = index / (n * n);
    [r as f32 * spacing, g as f32 * spacing, b as f32 * spacing]
}

/// Output of the feature extractor for one source.
#[derive(Debug, Clone)]
pub struct FeatureRecord {
    pub source_id: String,
    pub histogram: ColorHistogram,
    /// Downsampled image kept for rendering, when previews are requested.
    pub preview: Option<Image>,
}

pub struct FeatureExtractor {
    config: HistogramConfig,
}

impl FeatureExtractor {
    pub fn new(config: HistogramConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &HistogramConfig {
        &self.config
    }

    /// Spread every pixel over the 8 surrounding lattice cells and normalize
    /// by pixel count.
    pub fn extract(&self, image: &Image) -> Result<ColorHistogram, FeatureError> {
        let channels = image.channels();
        if !matches!(channels, 1 | 3 | 4) {
            return Err(FeatureError::UnsupportedChannelLayout { channels });
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(FeatureError::DegenerateDimensions {
                width: image.width(),
                height: image.height(),
            });
        }

        let n = self.config.steps as u32;
        let mut weights: HashMap<u32, f64> = HashMap::new();

        for px in image.data().chunks_exact(channels as usize) {
            let (r, g, b) = if channels == 1 {
                (px[0], px[0], px[0])
            } else {
                (px[0], px[1], px[2])
            };

            let (r0, fr) = self.axis(r);
            let (g0, fg) = self.axis(g);
            let (b0, fb) = self.axis(b);

            for (dr, cr) in [(0, 1.0 - fr), (1, fr)] {
                if cr == 0.0 {
                    continue;
                }
                for (dg, cg) in [(0, 1.0 - fg), (1, fg)] {
                    if cg == 0.0 {
                        continue;
                    }
                    for (db, cb) in [(0, 1.0 - fb), (1, fb)] {
                        if cb == 0.0 {
                            continue;
                        }
                        let index = (r0 + dr) + n * (g0 + dg) + n * n * (b0 + db);
                        *weights.entry(index).or_insert(0.0) += cr * cg * cb;
                    }
                }
            }
        }

        let coef = 1.0 / image.pixel_count() as f64;
        Ok(ColorHistogram::from_weights(
            self.config.steps,
            weights.into_iter().map(|(index, w)| (index, w * coef)),
            self.config.top_k,
        ))
    }

    /// Lower lattice point and the fractional offset towards the next one.
    /// 255 maps onto the last point with offset 1.
    fn axis(&self, value: u8) -> (u32, f64) {
        let last = (self.config.steps - 1) as f64;
        let pos = value as f64 * last / 255.0;
        let lower = (pos.floor() as u32).min(self.config.steps as u32 - 2);
        (lower, pos - lower as f64)
    }
}
