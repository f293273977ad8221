// Greedy seed-based grouping.
//
// Each unconsumed record in turn becomes a seed and claims every later,
// still unconsumed record that scores at or above the threshold against it.
// Membership means "matched the seed directly"; there is no transitive
// closure. Seeds that claim nothing fall through to the remainder group.

use crate::config::ConfigError;
use crate::core::histogram::FeatureRecord;
use crate::core::image::Image;
use crate::core::similarity::{NO_MATCH, PreparedHistogram, SimilarityMetric};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Histogram of {source_id} uses {found} lattice steps, expected {expected}")]
    MixedBinLayout {
        source_id: String,
        expected: u16,
        found: u16,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupMember {
    pub source_id: String,
    /// Score against the seed, or for the seed and for remainder members the
    /// best score found while scanning.
    pub score: f64,
    #[serde(skip)]
    pub preview: Option<Image>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Group {
    pub members: Vec<GroupMember>,
    pub remainder: bool,
}

impl Group {
    fn remainder() -> Self {
        Self {
            members: Vec::new(),
            remainder: true,
        }
    }

    pub fn is_remainder(&self) -> bool {
        self.remainder
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.source_id.as_str())
    }

    /// Best score first; equal scores keep their scan order.
    fn sort_by_score(&mut self) {
        self.members.sort_by(|a, b| b.score.total_cmp(&a.score));
    }
}

pub struct Clusterer {
    metric: SimilarityMetric,
    threshold: f64,
}

impl Clusterer {
    pub fn new(metric: SimilarityMetric, threshold: f64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::ThresholdOutOfRange(threshold));
        }
        Ok(Self { metric, threshold })
    }

    pub fn metric(&self) -> &SimilarityMetric {
        &self.metric
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Partition `records` into groups. The result always ends with the
    /// remainder group, which may be empty.
    pub fn cluster(&self, records: Vec<FeatureRecord>) -> Result<Vec<Group>, ClusterError> {
        self.check_layout(&records)?;

        let plan = {
            let prepared: Vec<PreparedHistogram<'_>> = records
                .iter()
                .map(|record| self.metric.prepare(&record.histogram))
                .collect();
            self.plan(&prepared)
        };

        // Records are distributed in index order, which is also the order the
        // pass attached them: seed first, then members as they were claimed.
        let total = records.len();
        let mut groups: Vec<Group> = (0..plan.group_count).map(|_| Group::default()).collect();
        let mut remainder = Group::remainder();

        for (record, (slot, score)) in records.into_iter().zip(plan.assignments) {
            let member = GroupMember {
                source_id: record.source_id,
                score,
                preview: record.preview,
            };
            match slot {
                Some(group) => groups[group].members.push(member),
                None => remainder.members.push(member),
            }
        }

        for group in &mut groups {
            group.sort_by_score();
        }
        remainder.sort_by_score();

        log::info!(
            "Clustered {} record(s) into {} group(s), {} left in remainder",
            total,
            groups.len(),
            remainder.len()
        );

        groups.push(remainder);
        Ok(groups)
    }

    fn check_layout(&self, records: &[FeatureRecord]) -> Result<(), ClusterError> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        let expected = first.histogram.steps();

        match records
            .iter()
            .find(|record| record.histogram.steps() != expected)
        {
            Some(record) => Err(ClusterError::MixedBinLayout {
                source_id: record.source_id.clone(),
                expected,
                found: record.histogram.steps(),
            }),
            None => Ok(()),
        }
    }

    /// Single forward pass over a fixed index array with a consumed marker.
    fn plan(&self, prepared: &[PreparedHistogram<'_>]) -> Plan {
        let n = prepared.len();
        let mut consumed = vec![false; n];
        let mut assignments = vec![(None, NO_MATCH); n];
        let mut group_count = 0;

        for seed in 0..n {
            if consumed[seed] {
                continue;
            }
            consumed[seed] = true;

            let mut best = NO_MATCH;
            let mut claimed = 0;

            for candidate in (seed + 1)..n {
                if consumed[candidate] {
                    continue;
                }

                let score = self
                    .metric
                    .score_prepared(&prepared[seed], &prepared[candidate]);
                if score > best {
                    best = score;
                }
                if score >= self.threshold {
                    consumed[candidate] = true;
                    assignments[candidate] = (Some(group_count), score);
                    claimed += 1;
                }
            }

            if claimed == 0 {
                assignments[seed] = (None, best);
            } else {
                log::debug!(
                    "Seed #{} claimed {} member(s), best score {:.4}",
                    seed,
                    claimed,
                    best
                );
                assignments[seed] = (Some(group_count), best);
                group_count += 1;
            }
        }

        Plan {
            assignments,
            group_count,
        }
    }
}

/// Index-level outcome of a pass: per record, its group (`None` for the
/// remainder) and score.
struct Plan {
    assignments: Vec<(Option<usize>, f64)>,
    group_count: usize,
}
