use serde::{Deserialize, Serialize};

use crate::tutor::prompt::TutorMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Correction,
    Hint,
    Encouragement,
    Step,
    Answer,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(rename = "type")]
    pub kind: AnnotationKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Feedback {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// Returns the first balanced top-level `{...}` in `text`, ignoring braces inside strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

impl Feedback {
    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty() && self.annotations.is_empty()
    }
}

/// Parses a model reply into feedback. Never fails: replies that do not contain
/// a JSON object with a summary or annotations become a single annotation
/// holding the raw text.
pub fn parse_feedback(text: &str, mode: TutorMode) -> Feedback {
    if let Some(json) = extract_json_object(text) {
        if let Ok(feedback) = serde_json::from_str::<Feedback>(json) {
            if !feedback.is_empty() {
                return feedback;
            }
        }
    }

    let kind = match mode {
        TutorMode::Answer => AnnotationKind::Answer,
        TutorMode::Feedback | TutorMode::Suggest => AnnotationKind::Hint,
    };
    let content = text.trim().to_string();

    Feedback {
        summary: String::new(),
        annotations: if content.is_empty() {
            Vec::new()
        } else {
            vec![Annotation {
                kind,
                content,
                position: None,
            }]
        },
    }
}
