//! Page tasks, page results and the chapter outcome rule.

use crate::catalog::ChapterDescriptor;

/// Reason recorded for pages never fetched because the run was interrupted.
pub const CANCELLED_REASON: &str = "cancelled";

/// One image to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTask {
    /// Owning chapter.
    pub chapter_id: String,
    /// 1-based position within the chapter.
    pub page_index: usize,
    /// Image URL.
    pub source_url: String,
}

impl PageTask {
    /// Builds the contiguous, 1-based task list for a chapter's image URLs.
    #[must_use]
    pub fn for_chapter(chapter_id: &str, urls: Vec<String>) -> Vec<Self> {
        urls.into_iter()
            .enumerate()
            .map(|(i, source_url)| Self {
                chapter_id: chapter_id.to_string(),
                page_index: i + 1,
                source_url,
            })
            .collect()
    }
}

/// The terminal result of one page task.
#[derive(Debug, Clone)]
pub struct PageResult {
    /// The task this result answers.
    pub task: PageTask,
    /// Image bytes, or the reason the page failed after retries.
    pub payload: Result<Vec<u8>, String>,
    /// Attempts made.
    pub attempts: u32,
}

impl PageResult {
    /// Successful result.
    #[must_use]
    pub fn success(task: PageTask, bytes: Vec<u8>, attempts: u32) -> Self {
        Self {
            task,
            payload: Ok(bytes),
            attempts,
        }
    }

    /// Failed result.
    #[must_use]
    pub fn failure(task: PageTask, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            task,
            payload: Err(reason.into()),
            attempts,
        }
    }

    /// Image bytes when the page succeeded.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        self.payload.as_deref().ok()
    }

    /// Failure reason when the page failed.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        self.payload.as_ref().err().map(String::as_str)
    }

    /// True when bytes are present.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.payload.is_ok()
    }
}

/// How a chapter ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterOutcome {
    /// Every page fetched.
    Complete,
    /// Some pages missing, still written and flagged incomplete.
    Partial {
        /// 1-based indexes of the missing pages.
        missing: Vec<usize>,
    },
    /// Too many failures (or no pages); not written.
    Failed {
        /// Why.
        reason: String,
    },
    /// Never started.
    Skipped {
        /// Why.
        reason: String,
    },
}

impl ChapterOutcome {
    /// Short label for summaries.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial { .. } => "partial",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }

    /// Whether the chapter should be handed to the assembler.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Complete | Self::Partial { .. })
    }
}

/// A chapter with all of its page results, in page order.
#[derive(Debug, Clone)]
pub struct ChapterDownload {
    /// The chapter.
    pub chapter: ChapterDescriptor,
    /// One result per page task, sorted by `page_index`.
    pub pages: Vec<PageResult>,
    /// Outcome under the failure-ratio rule.
    pub outcome: ChapterOutcome,
}

impl ChapterDownload {
    /// A chapter that never ran.
    #[must_use]
    pub fn skipped(chapter: ChapterDescriptor, reason: impl Into<String>) -> Self {
        Self {
            chapter,
            pages: Vec::new(),
            outcome: ChapterOutcome::Skipped {
                reason: reason.into(),
            },
        }
    }

    /// A chapter that failed before any page was fetched.
    #[must_use]
    pub fn failed(chapter: ChapterDescriptor, reason: impl Into<String>) -> Self {
        Self {
            chapter,
            pages: Vec::new(),
            outcome: ChapterOutcome::Failed {
                reason: reason.into(),
            },
        }
    }

    /// Successfully fetched pages, in order.
    pub fn fetched_pages(&self) -> impl Iterator<Item = &PageResult> {
        self.pages.iter().filter(|p| p.is_success())
    }

    /// 1-based indexes of missing pages.
    #[must_use]
    pub fn missing_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| !p.is_success())
            .map(|p| p.task.page_index)
            .collect()
    }
}

/// Applies the failure-ratio rule to a chapter's page results.
///
/// A chapter fails when it has no pages or when strictly more than
/// `max_failure_ratio` of its pages failed; otherwise any failure makes it partial.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn evaluate_outcome(pages: &[PageResult], max_failure_ratio: f64) -> ChapterOutcome {
    if pages.is_empty() {
        return ChapterOutcome::Failed {
            reason: "chapter has no pages".to_string(),
        };
    }

    let failed: Vec<&PageResult> = pages.iter().filter(|p| !p.is_success()).collect();
    if failed.is_empty() {
        return ChapterOutcome::Complete;
    }

    let ratio = failed.len() as f64 / pages.len() as f64;
    if ratio > max_failure_ratio {
        let first = failed
            .first()
            .and_then(|p| p.failure_reason())
            .unwrap_or_default();
        return ChapterOutcome::Failed {
            reason: format!(
                "{} of {} pages failed (first: {first})",
                failed.len(),
                pages.len()
            ),
        };
    }

    ChapterOutcome::Partial {
        missing: failed.iter().map(|p| p.task.page_index).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(failures: &[usize], total: usize) -> Vec<PageResult> {
        let urls = (1..=total).map(|i| format!("https://a.test/{i}.jpg")).collect();
        PageTask::for_chapter("chapter-1", urls)
            .into_iter()
            .map(|task| {
                if failures.contains(&task.page_index) {
                    PageResult::failure(task, "HTTP 404", 1)
                } else {
                    PageResult::success(task, vec![1, 2, 3], 1)
                }
            })
            .collect()
    }

    #[test]
    fn test_tasks_are_one_based_and_contiguous() {
        let tasks = PageTask::for_chapter("c", vec!["a".into(), "b".into(), "c".into()]);
        let indexes: Vec<usize> = tasks.iter().map(|t| t.page_index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }

    #[test]
    fn test_all_pages_is_complete() {
        assert_eq!(evaluate_outcome(&results(&[], 10), 0.5), ChapterOutcome::Complete);
    }

    #[test]
    fn test_one_of_ten_failed_is_partial() {
        assert_eq!(
            evaluate_outcome(&results(&[4], 10), 0.5),
            ChapterOutcome::Partial { missing: vec![4] }
        );
    }

    #[test]
    fn test_exactly_half_failed_is_partial() {
        let outcome = evaluate_outcome(&results(&[1, 2, 3, 4, 5], 10), 0.5);
        assert_eq!(outcome.label(), "partial");
    }

    #[test]
    fn test_six_of_ten_failed_is_failed() {
        let outcome = evaluate_outcome(&results(&[1, 2, 3, 4, 5, 6], 10), 0.5);
        match outcome {
            ChapterOutcome::Failed { reason } => {
                assert!(reason.contains("6 of 10"), "got: {reason}");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_no_pages_is_failed() {
        assert!(matches!(
            evaluate_outcome(&[], 0.5),
            ChapterOutcome::Failed { .. }
        ));
    }

    #[test]
    fn test_writable_outcomes() {
        assert!(ChapterOutcome::Complete.is_writable());
        assert!(ChapterOutcome::Partial { missing: vec![1] }.is_writable());
        assert!(!ChapterOutcome::Failed { reason: String::new() }.is_writable());
        assert!(!ChapterOutcome::Skipped { reason: String::new() }.is_writable());
    }
}
