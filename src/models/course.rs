use serde::{Deserialize, Serialize};

/// A clickable DOM element that might be a course lesson.
///
/// `candidate_id` is the position in the collected list and only means
/// something within a single selection pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Candidate {
    pub candidate_id: usize,
    pub frame_id: usize,
    pub frame_url: String,
    pub dom_index: usize,
    pub text: String,
    pub href: String,
    pub resource_id: String,
    pub data_key: String,
    pub tag: String,
    #[serde(rename = "id")]
    pub element_id: String,
    pub class_name: String,
    pub context: String,
    pub reason: String,
}

impl Candidate {
    /// The most stable identifier available; `None` when only text is known.
    pub fn stable_key(&self) -> Option<&str> {
        [&self.resource_id, &self.href, &self.data_key]
            .into_iter()
            .map(|s| s.as_str())
            .find(|s| !s.is_empty())
    }

    pub fn has_identifier(&self) -> bool {
        self.stable_key().is_some()
    }

    /// Ordering used when handing items back: frame first, then DOM position.
    pub fn dom_order(&self) -> (usize, usize) {
        (self.frame_id, self.dom_index)
    }
}
