//! Checklist tasks and their append-only note log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reference::{match_reference, Reference};

/// One entry of a task's note log.
///
/// Entries are never mutated. An edit appends a new entry whose `supersedes`
/// points at the root of the chain it revises and whose `version` is one
/// higher than the latest entry in that chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEvent {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<Uuid>,
    #[serde(default = "first_version")]
    pub version: u32,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

fn first_version() -> u32 {
    1
}

impl NoteEvent {
    /// Id of the note chain this entry belongs to.
    pub fn root_id(&self) -> Uuid {
        self.supersedes.unwrap_or(self.id)
    }
}

/// A single checklist item within a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub completed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_time_minutes: Option<u32>,

    /// Service interval this task applies to; `None` means every interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,

    #[serde(default)]
    pub is_indented: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<NoteEvent>,
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            completed: false,
            completed_at: None,
            actual_time_minutes: None,
            service_type: None,
            is_indented: false,
            notes: Vec::new(),
        }
    }

    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = Some(service_type.into());
        self
    }

    /// Structured document reference parsed from the description.
    pub fn reference(&self) -> Option<Reference> {
        match_reference(&self.description)
    }

    pub fn has_reference(&self) -> bool {
        self.reference().is_some()
    }

    /// Set the completion flag, stamping or clearing `completed_at`.
    pub fn set_completed(&mut self, completed: bool, now: DateTime<Utc>) {
        self.completed = completed;
        self.completed_at = completed.then_some(now);
    }

    /// Append a new note and return its id.
    pub fn append_note(
        &mut self,
        text: impl Into<String>,
        author: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Uuid, NoteError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(NoteError::EmptyText);
        }
        let id = Uuid::new_v4();
        self.notes.push(NoteEvent {
            id,
            supersedes: None,
            version: 1,
            text,
            author: author.map(str::to_string),
            recorded_at: now,
        });
        Ok(id)
    }

    /// Record a revision of an existing note.
    ///
    /// `note_id` may name the original entry or any revision of it. The log
    /// keeps every prior version.
    pub fn edit_note(
        &mut self,
        note_id: Uuid,
        text: impl Into<String>,
        author: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Uuid, NoteError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(NoteError::EmptyText);
        }
        let root = self
            .notes
            .iter()
            .find(|n| n.id == note_id)
            .map(NoteEvent::root_id)
            .ok_or(NoteError::NotFound(note_id))?;
        let latest = self
            .notes
            .iter()
            .filter(|n| n.root_id() == root)
            .map(|n| n.version)
            .max()
            .unwrap_or(1);
        let id = Uuid::new_v4();
        self.notes.push(NoteEvent {
            id,
            supersedes: Some(root),
            version: latest + 1,
            text,
            author: author.map(str::to_string),
            recorded_at: now,
        });
        Ok(id)
    }

    /// Latest version of each note chain, in the order the chains were started.
    pub fn current_notes(&self) -> Vec<&NoteEvent> {
        let mut current: Vec<&NoteEvent> = Vec::new();
        for note in &self.notes {
            match current.iter_mut().find(|c| c.root_id() == note.root_id()) {
                Some(slot) => {
                    if note.version >= slot.version {
                        *slot = note;
                    }
                }
                None => current.push(note),
            }
        }
        current
    }

    /// Every version of one note chain, oldest first.
    pub fn note_history(&self, note_id: Uuid) -> Vec<&NoteEvent> {
        let Some(root) = self
            .notes
            .iter()
            .find(|n| n.id == note_id)
            .map(NoteEvent::root_id)
        else {
            return Vec::new();
        };
        let mut history: Vec<&NoteEvent> =
            self.notes.iter().filter(|n| n.root_id() == root).collect();
        history.sort_by_key(|n| n.version);
        history
    }
}

/// Errors from note log operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NoteError {
    #[error("Note text cannot be empty")]
    EmptyText,

    #[error("Note {0} not found")]
    NotFound(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_completed_stamps_and_clears() {
        let now = Utc::now();
        let mut task = Task::new("t1", "4.1 Check oil");
        task.set_completed(true, now);
        assert!(task.completed);
        assert_eq!(task.completed_at, Some(now));
        task.set_completed(false, now);
        assert!(!task.completed);
        assert_eq!(task.completed_at, None);
    }

    #[test]
    fn reference_detection() {
        assert!(Task::new("t1", "13.5.1 Lift check").has_reference());
        assert!(!Task::new("t2", "Clean up the work area").has_reference());
    }

    #[test]
    fn edits_append_versions_without_mutating() {
        let now = Utc::now();
        let mut task = Task::new("t1", "4.1 Check oil");
        let original = task.append_note("Level low", Some("jd"), now).unwrap();
        let other = task.append_note("Filter replaced", None, now).unwrap();
        let v2 = task.edit_note(original, "Level low, topped up", Some("jd"), now).unwrap();
        task.edit_note(v2, "Level low, topped up 0.5l", None, now).unwrap();

        assert_eq!(task.notes.len(), 4);
        assert_eq!(task.notes[0].text, "Level low");

        let current = task.current_notes();
        assert_eq!(current.len(), 2);
        assert_eq!(current[0].text, "Level low, topped up 0.5l");
        assert_eq!(current[0].version, 3);
        assert_eq!(current[1].id, other);

        let history = task.note_history(v2);
        let versions: Vec<u32> = history.iter().map(|n| n.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn note_errors() {
        let now = Utc::now();
        let mut task = Task::new("t1", "General");
        assert_eq!(task.append_note("  ", None, now), Err(NoteError::EmptyText));
        let missing = Uuid::new_v4();
        assert_eq!(
            task.edit_note(missing, "text", None, now),
            Err(NoteError::NotFound(missing))
        );
    }
}
