pub mod candidates;
pub mod selection;

pub use candidates::{candidate_script, collect_candidates, sanitize_text};
pub use selection::{
    parse_selection, CourseSelectionSettings, FallbackSelector, HeuristicSelection, LlmSelection, SelectionStrategy,
};

use crate::browser_ai::PageDriver;
use crate::config::CourseConfig;
use crate::error::Result;
use crate::llm::ChatCompletion;
use crate::models::Candidate;
use tracing::info;

/// Scans the open course page and returns the lesson entries in DOM order.
pub async fn select_course_items(
    page: &dyn PageDriver,
    llm: &dyn ChatCompletion,
    settings: CourseSelectionSettings,
    config: &CourseConfig,
) -> Result<Vec<Candidate>> {
    let candidates = collect_candidates(page, config.max_candidates).await?;
    info!("[llm] candidates={}", candidates.len());
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let selector = FallbackSelector::new(LlmSelection::new(llm, settings), HeuristicSelection, config.llm_fallback);
    let selected = selector.select(&candidates).await?;
    info!("Selected {} of {} candidates", selected.len(), candidates.len());
    Ok(selected)
}
