//! Structured document references embedded in task descriptions.
//!
//! A task description that starts with a dotted numeric path, optionally a
//! range, followed by a separator and a label is a checklist item tied to a
//! section of the service documentation:
//!
//! ```text
//! 13.5.1 Lift check          -> reference "13.5.1", label "Lift check"
//! 4.2-4.4. Torque bolts      -> reference "4.2-4.4", label "Torque bolts"
//! Sweep the floor            -> general task (no reference)
//! ```
//!
//! Only reference-bearing tasks gate step completion; general tasks still
//! count toward progress totals.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::procedure::Task;

// Prefix match: the label starts on the separator's line and runs to the end
// of the description, newlines included.
static REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+(?:\.[0-9]+)*(?:-[0-9]+(?:\.[0-9]+)*)?)[.\s]+(.)")
        .expect("reference pattern is valid")
});

/// A document reference parsed from a task description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    /// The full leading numeric path, including any range.
    pub reference: String,
    pub label: String,
}

impl Reference {
    /// First group of the path (`"13"` for `"13.5.1"`).
    pub fn section(&self) -> &str {
        self.start().split('.').next().unwrap_or_default()
    }

    /// Start of the range, or the whole path when there is no range.
    pub fn start(&self) -> &str {
        self.reference
            .split_once('-')
            .map_or(self.reference.as_str(), |(start, _)| start)
    }

    /// End of the range, if the reference is a range.
    pub fn end(&self) -> Option<&str> {
        self.reference.split_once('-').map(|(_, end)| end)
    }
}

/// Parse the leading structured reference of `description`, if any.
pub fn match_reference(description: &str) -> Option<Reference> {
    let captures = REFERENCE_PATTERN.captures(description)?;
    let reference = captures.get(1)?.as_str().to_string();
    let label = description[captures.get(2)?.start()..].trim().to_string();
    Some(Reference { reference, label })
}

/// One checklist line in the section-grouped view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChecklistItem {
    pub task_id: String,
    pub reference: Option<String>,
    pub label: String,
    pub completed: bool,
    pub indented: bool,
}

/// Checklist items sharing a documentation section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionGroup {
    pub section: String,
    pub items: Vec<ChecklistItem>,
}

/// A step's tasks grouped by documentation section.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChecklistView {
    /// Sections in order of first appearance.
    pub sections: Vec<SectionGroup>,
    /// Tasks without a reference.
    pub general: Vec<ChecklistItem>,
}

impl ChecklistView {
    pub fn reference_count(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }
}

/// Group tasks by the section of their reference.
pub fn group_by_section(tasks: &[Task]) -> ChecklistView {
    let mut view = ChecklistView::default();
    for task in tasks {
        match task.reference() {
            Some(reference) => {
                let section = reference.section().to_string();
                let item = ChecklistItem {
                    task_id: task.id.clone(),
                    label: reference.label.clone(),
                    reference: Some(reference.reference),
                    completed: task.completed,
                    indented: task.is_indented,
                };
                match view.sections.iter_mut().find(|g| g.section == section) {
                    Some(group) => group.items.push(item),
                    None => view.sections.push(SectionGroup {
                        section,
                        items: vec![item],
                    }),
                }
            }
            None => view.general.push(ChecklistItem {
                task_id: task.id.clone(),
                reference: None,
                label: task.description.trim().to_string(),
                completed: task.completed,
                indented: task.is_indented,
            }),
        }
    }
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn matches_dotted_paths() {
        let r = match_reference("13.5.1 Lift check").unwrap();
        assert_eq!(r.reference, "13.5.1");
        assert_eq!(r.label, "Lift check");
        assert_eq!(r.section(), "13");

        let r = match_reference("7. Remove cover").unwrap();
        assert_eq!(r.reference, "7");
        assert_eq!(r.label, "Remove cover");

        let r = match_reference("13.5.1 Lift check\nsee torque table").unwrap();
        assert_eq!(r.reference, "13.5.1");
        assert_eq!(r.label, "Lift check\nsee torque table");
    }

    #[test]
    fn matches_ranges() {
        let r = match_reference("4.2-4.4. Torque bolts").unwrap();
        assert_eq!(r.reference, "4.2-4.4");
        assert_eq!(r.start(), "4.2");
        assert_eq!(r.end(), Some("4.4"));
        assert_eq!(r.section(), "4");
    }

    #[test]
    fn general_tasks_have_no_reference() {
        for text in [
            "Sweep the floor",
            "",
            "v1.2 firmware",
            " 1.2 leading space",
            "12",
            "7 \n",
            "7.\n\n",
        ] {
            assert_eq!(match_reference(text), None, "{text:?}");
        }
    }

    #[test]
    fn groups_by_section_in_document_order() {
        let mut done = Task::new("c", "4.1 Drain oil");
        done.completed = true;
        let tasks = vec![
            Task::new("a", "13.1 Inspect"),
            Task::new("b", "Note serial number"),
            done,
            Task::new("d", "13.2-13.4 Lubricate"),
        ];
        let view = group_by_section(&tasks);
        let sections: Vec<&str> = view.sections.iter().map(|s| s.section.as_str()).collect();
        assert_eq!(sections, vec!["13", "4"]);
        assert_eq!(view.sections[0].items.len(), 2);
        assert_eq!(view.sections[0].items[1].reference.as_deref(), Some("13.2-13.4"));
        assert!(view.sections[1].items[0].completed);
        assert_eq!(view.general.len(), 1);
        assert_eq!(view.general[0].label, "Note serial number");
        assert_eq!(view.reference_count(), 3);
    }

    proptest! {
        #[test]
        fn leading_path_is_extracted(
            groups in prop::collection::vec(0u32..1000, 1..5),
            range in prop::option::of(prop::collection::vec(0u32..1000, 1..4)),
            sep in prop::sample::select(vec![" ", ". ", ".  ", "\t", "."]),
            label in "[A-Za-z][A-Za-z0-9 \n]{0,20}",
        ) {
            let join = |g: &[u32]| g.iter().map(u32::to_string).collect::<Vec<_>>().join(".");
            let mut path = join(&groups[..]);
            if let Some(end) = &range {
                path = format!("{}-{}", path, join(&end[..]));
            }
            let description = format!("{}{}{}", path, sep, label);
            let reference = match_reference(&description).expect("should match");
            prop_assert_eq!(reference.reference, path);
            prop_assert_eq!(reference.label, label.trim());
        }

        #[test]
        fn text_without_leading_digit_never_matches(text in "[A-Za-z ][A-Za-z0-9 .-]{0,30}") {
            prop_assert!(match_reference(&text).is_none());
        }
    }
}
