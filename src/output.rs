use crate::config::GroupingConfig;
use crate::core::cluster::Group;
use crate::core::pipeline::ExtractionFailure;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const REMAINDER_DIR: &str = "remainder";

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Source has no file name: {0}")]
    NoFileName(String),

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to place {from} → {to}: {source}")]
    Transfer {
        from: String,
        to: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write report {path}: {source}")]
    Report {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    Move,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedFile {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Directory name for each group in output order: `group_0001`, ... and
/// `remainder` for the final group.
pub fn group_dir_names(groups: &[Group]) -> Vec<String> {
    let mut next = 0;
    groups
        .iter()
        .map(|group| {
            if group.is_remainder() {
                REMAINDER_DIR.to_string()
            } else {
                next += 1;
                format!("group_{:04}", next)
            }
        })
        .collect()
}

/// Where every member of `groups` would land under `dest`, without touching
/// the filesystem beyond checking for existing names.
pub fn plan_placements(groups: &[Group], dest: &Path) -> Result<Vec<PlacedFile>, OutputError> {
    let mut placements = Vec::new();

    for (group, dir_name) in groups.iter().zip(group_dir_names(groups)) {
        let dir = dest.join(dir_name);
        let mut taken = HashSet::new();

        for source_id in group.source_ids() {
            let source = PathBuf::from(source_id);
            let destination = free_destination(&dir, &source, &mut taken)?;
            placements.push(PlacedFile {
                source,
                destination,
            });
        }
    }

    Ok(placements)
}

/// Copy or move every grouped file into its group directory under `dest`.
/// Empty groups produce no directory.
pub fn materialize(
    groups: &[Group],
    dest: &Path,
    mode: TransferMode,
) -> Result<Vec<PlacedFile>, OutputError> {
    let placements = plan_placements(groups, dest)?;

    for placed in &placements {
        if let Some(dir) = placed.destination.parent() {
            fs::create_dir_all(dir).map_err(|source| OutputError::CreateDir {
                path: dir.display().to_string(),
                source,
            })?;
        }

        transfer(&placed.source, &placed.destination, mode).map_err(|source| {
            OutputError::Transfer {
                from: placed.source.display().to_string(),
                to: placed.destination.display().to_string(),
                source,
            }
        })?;
        log::debug!("Placed {} → {}", placed.source.display(), placed.destination.display());
    }

    log::info!("Placed {} file(s) under {}", placements.len(), dest.display());
    Ok(placements)
}

fn transfer(from: &Path, to: &Path, mode: TransferMode) -> io::Result<()> {
    match mode {
        TransferMode::Copy => fs::copy(from, to).map(|_| ()),
        TransferMode::Move => {
            // rename fails across filesystems
            if fs::rename(from, to).is_ok() {
                return Ok(());
            }
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

fn free_destination(
    dir: &Path,
    source: &Path,
    taken: &mut HashSet<PathBuf>,
) -> Result<PathBuf, OutputError> {
    let file_name = source
        .file_name()
        .ok_or_else(|| OutputError::NoFileName(source.display().to_string()))?;

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut candidate = dir.join(file_name);
    let mut suffix = 0;
    while taken.contains(&candidate) || candidate.exists() {
        suffix += 1;
        candidate = dir.join(format!("{}_{}{}", stem, suffix, extension));
    }

    taken.insert(candidate.clone());
    Ok(candidate)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMember {
    pub path: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportGroup {
    pub name: String,
    pub remainder: bool,
    pub members: Vec<ReportMember>,
}

/// JSON summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub generated_at: String,
    pub threshold: f64,
    pub config: GroupingConfig,
    pub groups: Vec<ReportGroup>,
    pub failures: Vec<ExtractionFailure>,
}

impl GroupReport {
    pub fn new(config: &GroupingConfig, groups: &[Group], failures: &[ExtractionFailure]) -> Self {
        let groups = groups
            .iter()
            .zip(group_dir_names(groups))
            .map(|(group, name)| ReportGroup {
                name,
                remainder: group.is_remainder(),
                members: group
                    .members
                    .iter()
                    .map(|m| ReportMember {
                        path: m.source_id.clone(),
                        score: m.score,
                    })
                    .collect(),
            })
            .collect();

        Self {
            generated_at: Utc::now().to_rfc3339(),
            threshold: config.threshold,
            config: config.clone(),
            groups,
            failures: failures.to_vec(),
        }
    }

    pub fn write_report(&self, path: &Path) -> Result<(), OutputError> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| OutputError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        fs::write(path, json).map_err(|source| OutputError::Report {
            path: path.display().to_string(),
            source,
        })
    }
}
