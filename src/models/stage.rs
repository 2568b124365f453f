use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::Error;

/// Investigation phase. The declaration order is the workflow order.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NotStarted,
    DataCollection,
    Analysis,
    Recommendations,
    Review,
    Completed,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::NotStarted,
        Stage::DataCollection,
        Stage::Analysis,
        Stage::Recommendations,
        Stage::Review,
        Stage::Completed,
    ];

    pub fn index(self) -> usize {
        match self {
            Stage::NotStarted => 0,
            Stage::DataCollection => 1,
            Stage::Analysis => 2,
            Stage::Recommendations => 3,
            Stage::Review => 4,
            Stage::Completed => 5,
        }
    }
    pub fn from_index(index: usize) -> Option<Stage> {
        Stage::ALL.get(index).copied()
    }
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::NotStarted => "not_started",
            Stage::DataCollection => "data_collection",
            Stage::Analysis => "analysis",
            Stage::Recommendations => "recommendations",
            Stage::Review => "review",
            Stage::Completed => "completed",
        }
    }
    pub fn label(self) -> &'static str {
        match self {
            Stage::NotStarted => "Not Started",
            Stage::DataCollection => "Data Collection",
            Stage::Analysis => "Analysis",
            Stage::Recommendations => "Recommendations",
            Stage::Review => "Review",
            Stage::Completed => "Completed",
        }
    }
    pub fn icon(self) -> &'static str {
        match self {
            Stage::NotStarted | Stage::DataCollection => "document",
            Stage::Analysis => "alert-circle",
            Stage::Recommendations => "message-square",
            Stage::Review => "book-open",
            Stage::Completed => "check-circle",
        }
    }
    pub fn progress_fraction(self) -> f64 {
        progress_fraction(self.index())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == value)
            .ok_or_else(|| Error::Validation(format!("UNKNOWN_STAGE: {value}")))
    }
}

/// Fill of the progress bar for a zero-based stage position.
pub fn progress_fraction(position: usize) -> f64 {
    let last = Stage::ALL.len() - 1;
    match position {
        0 => 0.0,
        p if p >= last => 1.0,
        p => p as f64 / last as f64,
    }
}

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Completed,
    Current,
    Upcoming,
}

#[derive(Serialize, Debug)]
pub struct ProgressStep {
    pub stage: Stage,
    pub label: &'static str,
    pub icon: &'static str,
    pub state: StepState,
}

/// The six-step tracker shown on investigation and occurrence pages.
#[derive(Serialize, Debug)]
pub struct ProgressTracker {
    pub current_stage: Stage,
    pub current_index: usize,
    pub current_label: &'static str,
    pub fill_percent: f64,
    pub steps: Vec<ProgressStep>,
}

impl ProgressTracker {
    pub fn new(current: Stage) -> Self {
        let current_index = current.index();
        let steps = Stage::ALL
            .into_iter()
            .map(|stage| ProgressStep {
                stage,
                label: stage.label(),
                icon: stage.icon(),
                state: match stage.index() {
                    i if i < current_index => StepState::Completed,
                    i if i == current_index => StepState::Current,
                    _ => StepState::Upcoming,
                },
            })
            .collect();

        ProgressTracker {
            current_stage: current,
            current_index,
            current_label: current.label(),
            fill_percent: current.progress_fraction() * 100.0,
            steps,
        }
    }
}
