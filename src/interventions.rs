//! Mentor interventions. These are tracked on their own and only associated
//! with students by display name.

use std::fmt;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::InterventionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionStatus {
    Pending,
    InProgress,
    Completed,
}

impl InterventionStatus {
    pub fn next(self) -> Option<Self> {
        match self {
            InterventionStatus::Pending => Some(InterventionStatus::InProgress),
            InterventionStatus::InProgress => Some(InterventionStatus::Completed),
            InterventionStatus::Completed => None,
        }
    }

    pub fn can_transition_to(self, to: Self) -> bool {
        self.next() == Some(to)
    }
}

impl fmt::Display for InterventionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InterventionStatus::Pending => "pending",
            InterventionStatus::InProgress => "in_progress",
            InterventionStatus::Completed => "completed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionAction {
    pub id: Uuid,
    pub student_name: String,
    pub mentor: String,
    pub action: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub status: InterventionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct InterventionLog {
    actions: Vec<InterventionAction>,
}

impl InterventionLog {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read interventions from {}", path.display()))?;
        let actions: Vec<InterventionAction> = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse interventions in {}", path.display()))?;
        Ok(Self { actions })
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(&self.actions)?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write interventions to {}", path.display()))?;
        Ok(())
    }

    pub fn actions(&self) -> &[InterventionAction] {
        &self.actions
    }

    pub fn create(
        &mut self,
        student_name: &str,
        mentor: &str,
        action: &str,
        due_date: Option<NaiveDate>,
    ) -> Result<&InterventionAction, InterventionError> {
        let student_name = student_name.trim();
        let action = action.trim();
        if student_name.is_empty() {
            return Err(InterventionError::MissingField("student_name"));
        }
        if action.is_empty() {
            return Err(InterventionError::MissingField("action"));
        }

        let now = Utc::now();
        let created = InterventionAction {
            id: Uuid::new_v4(),
            student_name: student_name.to_string(),
            mentor: mentor.trim().to_string(),
            action: action.to_string(),
            notes: None,
            due_date,
            status: InterventionStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        info!(
            intervention_id = %created.id,
            student = %created.student_name,
            "intervention created"
        );
        self.actions.push(created);

        let index = self.actions.len() - 1;
        Ok(&self.actions[index])
    }

    pub fn transition(
        &mut self,
        id: Uuid,
        to: InterventionStatus,
        note: Option<&str>,
    ) -> Result<&InterventionAction, InterventionError> {
        let action = self
            .actions
            .iter_mut()
            .find(|action| action.id == id)
            .ok_or(InterventionError::NotFound(id))?;

        if !action.status.can_transition_to(to) {
            return Err(InterventionError::InvalidTransition {
                from: action.status,
                to,
            });
        }

        info!(
            intervention_id = %id,
            from = %action.status,
            to = %to,
            "intervention status changed"
        );
        action.status = to;
        action.updated_at = Utc::now();
        if let Some(note) = note.map(str::trim).filter(|note| !note.is_empty()) {
            action.notes = Some(match action.notes.take() {
                Some(existing) => format!("{existing}\n{note}"),
                None => note.to_string(),
            });
        }

        Ok(action)
    }

    /// Moves an action one step forward, appending `note` when given.
    pub fn advance(
        &mut self,
        id: Uuid,
        note: Option<&str>,
    ) -> Result<&InterventionAction, InterventionError> {
        let current = self
            .actions
            .iter()
            .find(|action| action.id == id)
            .map(|action| action.status)
            .ok_or(InterventionError::NotFound(id))?;

        match current.next() {
            Some(next) => self.transition(id, next, note),
            None => Err(InterventionError::InvalidTransition {
                from: current,
                to: current,
            }),
        }
    }

    pub fn for_student(&self, student_name: &str) -> Vec<&InterventionAction> {
        let wanted = student_name.trim().to_lowercase();
        self.actions
            .iter()
            .filter(|action| action.student_name.to_lowercase() == wanted)
            .collect()
    }

    pub fn open(&self) -> impl Iterator<Item = &InterventionAction> {
        self.actions
            .iter()
            .filter(|action| action.status != InterventionStatus::Completed)
    }

    pub fn overdue(&self, today: NaiveDate) -> Vec<&InterventionAction> {
        self.open()
            .filter(|action| action.due_date.is_some_and(|due| due < today))
            .collect()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for action in &self.actions {
            match action.status {
                InterventionStatus::Pending => counts.pending += 1,
                InterventionStatus::InProgress => counts.in_progress += 1,
                InterventionStatus::Completed => counts.completed += 1,
            }
        }
        counts
    }
}
