//! Shared domain enumerations aligned with persisted job state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Done,
    Failed,
    Killed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::Running => "Running",
            JobState::Done => "Done",
            JobState::Failed => "Failed",
            JobState::Killed => "Killed",
        }
    }
}

impl TryFrom<&str> for JobState {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "Pending" | "Latest" | "Scheduled" => Ok(JobState::Pending),
            "Running" => Ok(JobState::Running),
            "Done" => Ok(JobState::Done),
            "Failed" => Ok(JobState::Failed),
            "Killed" => Ok(JobState::Killed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    FanoutBatch,
}

impl JobType {
    /// Queue namespace used by the job storage.
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::FanoutBatch => "fanout_batch",
        }
    }
}

impl TryFrom<&str> for JobType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "fanout_batch" => Ok(JobType::FanoutBatch),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_round_trips_through_namespace() {
        let name = JobType::FanoutBatch.as_str();
        assert_eq!(JobType::try_from(name), Ok(JobType::FanoutBatch));
        assert!(JobType::try_from("unknown_job").is_err());
    }

    #[test]
    fn scheduled_jobs_read_as_pending() {
        assert_eq!(JobState::try_from("Scheduled"), Ok(JobState::Pending));
        assert_eq!(JobState::try_from("Done"), Ok(JobState::Done));
    }
}
