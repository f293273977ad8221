use crate::core::histogram::ColorHistogram;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::OnceLock;

/// Score of two identical signatures.
pub const IDENTICAL: f64 = 1.0;
/// Score of a record that was never compared against a peer.
pub const NO_MATCH: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColorDistance {
    /// Plain Euclidean distance in RGB.
    Euclidean,
    /// Red and blue terms weighted by the mean red value ("redmean").
    #[default]
    Redmean,
}

impl ColorDistance {
    pub fn distance(self, a: [f32; 3], b: [f32; 3]) -> f64 {
        let mean_red = (a[0] as f64 + b[0] as f64) / 2.0;
        self.offset_distance(
            mean_red,
            a[0] as f64 - b[0] as f64,
            a[1] as f64 - b[1] as f64,
            a[2] as f64 - b[2] as f64,
        )
    }

    /// Distance from per-channel differences; `mean_red` only matters for
    /// [`ColorDistance::Redmean`].
    fn offset_distance(self, mean_red: f64, dr: f64, dg: f64, db: f64) -> f64 {
        match self {
            ColorDistance::Euclidean => (dr * dr + dg * dg + db * db).sqrt(),
            ColorDistance::Redmean => {
                let wr = 2.0 + mean_red / 256.0;
                let wb = 2.0 + (255.0 - mean_red) / 256.0;
                (wr * dr * dr + 4.0 * dg * dg + wb * db * db).sqrt()
            }
        }
    }
}

/// Largest lattice offset table kept in memory (8 bytes per entry).
const MAX_TABLE_ENTRIES: usize = 1 << 21;

/// Lattice coordinates of two bins, reduced to what the similarity of their
/// colors depends on.
#[derive(Debug, Clone, Copy)]
struct LatticeOffset {
    red_sum: u32,
    dr: u32,
    dg: u32,
    db: u32,
}

impl LatticeOffset {
    fn between(steps: u32, a: u32, b: u32) -> Self {
        let (ra, ga, ba) = (a % steps, (a / steps) % steps, a / (steps * steps));
        let (rb, gb, bb) = (b % steps, (b / steps) % steps, b / (steps * steps));
        Self {
            red_sum: ra + rb,
            dr: ra.abs_diff(rb),
            dg: ga.abs_diff(gb),
            db: ba.abs_diff(bb),
        }
    }
}

/// Per-color similarity for every offset on one lattice, so the kernel
/// never recomputes a distance.
#[derive(Debug, Clone)]
struct OffsetTable {
    steps: u32,
    red_sums: u32,
    values: Vec<f64>,
}

impl OffsetTable {
    fn slot(&self, offset: LatticeOffset) -> usize {
        let n = self.steps as usize;
        let red_sum = if self.red_sums == 1 { 0 } else { offset.red_sum as usize };
        ((red_sum * n + offset.dr as usize) * n + offset.dg as usize) * n + offset.db as usize
    }
}

/// Histogram paired with its self-kernel, so repeated comparisons skip the
/// O(K²) self term.
#[derive(Debug, Clone, Copy)]
pub struct PreparedHistogram<'a> {
    histogram: &'a ColorHistogram,
    self_kernel: f64,
}

impl<'a> PreparedHistogram<'a> {
    pub fn histogram(&self) -> &'a ColorHistogram {
        self.histogram
    }
}

/// Similarity convention: 1.0 for identical histograms, 0.0 for nothing in
/// common; records group when `score >= threshold`.
///
/// `score(A, B) = K(A, B) / sqrt(K(A, A) * K(B, B))` where
/// `K(A, B) = Σ w_a * w_b * s(c_a, c_b)` over every pair of bins and `s` is
/// [`SimilarityMetric::color_similarity`] evaluated on lattice offsets.
#[derive(Debug, Clone)]
pub struct SimilarityMetric {
    distance: ColorDistance,
    power: u32,
    max_distance: f64,
    /// Built for the lattice of the first histogram scored.
    table: OnceLock<Option<OffsetTable>>,
}

impl PartialEq for SimilarityMetric {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.power == other.power
    }
}

impl SimilarityMetric {
    pub fn new(distance: ColorDistance, power: u32) -> Self {
        Self {
            distance,
            power,
            max_distance: distance.distance([0.0; 3], [255.0; 3]),
            table: OnceLock::new(),
        }
    }

    pub fn distance(&self) -> ColorDistance {
        self.distance
    }

    pub fn power(&self) -> u32 {
        self.power
    }

    /// Distance scaled against black-vs-white, inverted and sharpened.
    pub fn color_similarity(&self, a: [f32; 3], b: [f32; 3]) -> f64 {
        self.sharpen(self.distance.distance(a, b))
    }

    fn sharpen(&self, distance: f64) -> f64 {
        let d = distance / self.max_distance;
        (1.0 - d).clamp(0.0, 1.0).powi(self.power as i32)
    }

    fn offset_similarity(&self, steps: u32, offset: LatticeOffset) -> f64 {
        let spacing = 255.0 / (steps - 1) as f64;
        self.sharpen(self.distance.offset_distance(
            offset.red_sum as f64 * spacing / 2.0,
            offset.dr as f64 * spacing,
            offset.dg as f64 * spacing,
            offset.db as f64 * spacing,
        ))
    }

    fn build_table(&self, steps: u32) -> Option<OffsetTable> {
        let n = steps as usize;
        let red_sums = match self.distance {
            ColorDistance::Euclidean => 1,
            ColorDistance::Redmean => 2 * steps - 1,
        };
        if red_sums as usize * n * n * n > MAX_TABLE_ENTRIES {
            log::debug!("Lattice of {} steps too large for an offset table", steps);
            return None;
        }

        let mut values = Vec::with_capacity(red_sums as usize * n * n * n);
        for red_sum in 0..red_sums {
            for dr in 0..steps {
                for dg in 0..steps {
                    for db in 0..steps {
                        let offset = LatticeOffset { red_sum, dr, dg, db };
                        values.push(self.offset_similarity(steps, offset));
                    }
                }
            }
        }

        Some(OffsetTable {
            steps,
            red_sums,
            values,
        })
    }

    /// Similarity of the colors behind two bins of the same lattice.
    fn bin_similarity(&self, steps: u32, a: u32, b: u32) -> f64 {
        let offset = LatticeOffset::between(steps, a, b);
        match self.table.get_or_init(|| self.build_table(steps)) {
            Some(table) if table.steps == steps => table.values[table.slot(offset)],
            _ => self.offset_similarity(steps, offset),
        }
    }

    pub fn prepare<'a>(&self, histogram: &'a ColorHistogram) -> PreparedHistogram<'a> {
        PreparedHistogram {
            histogram,
            self_kernel: self.kernel(histogram, histogram),
        }
    }

    pub fn score(&self, a: &ColorHistogram, b: &ColorHistogram) -> f64 {
        self.score_prepared(&self.prepare(a), &self.prepare(b))
    }

    pub fn score_prepared(&self, a: &PreparedHistogram<'_>, b: &PreparedHistogram<'_>) -> f64 {
        let denom = (a.self_kernel * b.self_kernel).sqrt();
        if denom.is_nan() || denom <= 0.0 {
            return NO_MATCH;
        }
        let cross = self.kernel(a.histogram, b.histogram);
        (cross / denom).clamp(NO_MATCH, IDENTICAL)
    }

    fn kernel(&self, a: &ColorHistogram, b: &ColorHistogram) -> f64 {
        // Accumulate in one canonical order so K(A, B) and K(B, A) are the
        // same bits.
        let (a, b) = match canonical_cmp(a, b) {
            Ordering::Greater => (b, a),
            _ => (a, b),
        };

        let same_lattice = a.steps() == b.steps();
        let steps = a.steps() as u32;

        let mut sum = 0.0;
        for x in a.bins() {
            let mut row = 0.0;
            for y in b.bins() {
                let s = if same_lattice {
                    self.bin_similarity(steps, x.index, y.index)
                } else {
                    self.color_similarity(x.color, y.color)
                };
                row += y.weight * s;
            }
            sum += x.weight * row;
        }
        sum
    }
}

impl Default for SimilarityMetric {
    fn default() -> Self {
        Self::new(ColorDistance::default(), 3)
    }
}

fn canonical_cmp(a: &ColorHistogram, b: &ColorHistogram) -> Ordering {
    a.steps()
        .cmp(&b.steps())
        .then_with(|| a.len().cmp(&b.len()))
        .then_with(|| {
            a.bins()
                .iter()
                .zip(b.bins())
                .map(|(x, y)| {
                    x.index
                        .cmp(&y.index)
                        .then_with(|| x.weight.total_cmp(&y.weight))
                })
                .find(|ord| ord.is_ne())
                .unwrap_or(Ordering::Equal)
        })
}
