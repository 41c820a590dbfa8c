//! `ComicInfo.xml` for CBZ archives.

use std::fmt::Write as _;

use super::OutputJob;

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn element(xml: &mut String, name: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        let _ = writeln!(xml, "  <{name}>{}</{name}>", xml_escape(value));
    }
}

/// Renders ComicInfo for `job` with `page_count` pages in the archive.
pub(crate) fn render(job: &OutputJob, page_count: usize) -> String {
    let chapter = &job.chapter.chapter;
    let metadata = &job.metadata;

    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <ComicInfo xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" \
         xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\n",
    );

    element(&mut xml, "Series", Some(&job.series_title));
    element(&mut xml, "Number", Some(&chapter.number_label()));
    element(
        &mut xml,
        "Title",
        Some(chapter.subtitle.as_deref().unwrap_or(&chapter.title)),
    );
    element(&mut xml, "Web", Some(&chapter.url));
    element(&mut xml, "Writer", metadata.author.as_deref());
    element(&mut xml, "Penciller", metadata.artist.as_deref());
    element(&mut xml, "Summary", metadata.summary.as_deref());
    let genres = metadata.genres.join(", ");
    element(&mut xml, "Genre", Some(&genres));
    if !metadata.status.is_unknown() {
        element(&mut xml, "Status", Some(metadata.status.label()));
    }
    element(&mut xml, "Year", metadata.year.map(|y| y.to_string()).as_deref());
    element(&mut xml, "PageCount", Some(&page_count.to_string()));

    let missing = job.chapter.missing_pages();
    if !missing.is_empty() {
        let list = missing
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        element(
            &mut xml,
            "Notes",
            Some(&format!("Incomplete chapter: missing pages {list}")),
        );
    }

    xml.push_str("</ComicInfo>\n");
    xml
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::assemble::OutputFormat;
    use crate::catalog::ChapterDescriptor;
    use crate::download::{ChapterDownload, ChapterOutcome, PageResult, PageTask};
    use crate::metadata::{CompletionStatus, SeriesMetadata};

    fn job(metadata: SeriesMetadata, failed: &[usize]) -> OutputJob {
        let mut chapter =
            ChapterDescriptor::new(5.0, "Chapter 5", "https://a.test/bleach/chapter-5");
        chapter.subtitle = Some("Tom & Jerry <3".to_string());
        let urls = (1..=3).map(|i| format!("https://a.test/{i}.jpg")).collect();
        let pages = PageTask::for_chapter(&chapter.chapter_id, urls)
            .into_iter()
            .map(|t| {
                if failed.contains(&t.page_index) {
                    PageResult::failure(t, "HTTP 404", 3)
                } else {
                    PageResult::success(t, vec![0xFF, 0xD8, 0xFF], 1)
                }
            })
            .collect();
        OutputJob {
            series_title: "Bleach".to_string(),
            series_url: "https://a.test/bleach".to_string(),
            chapter: ChapterDownload {
                chapter,
                pages,
                outcome: ChapterOutcome::Complete,
            },
            metadata: Arc::new(metadata),
            format: OutputFormat::Cbz,
        }
    }

    #[test]
    fn test_escapes_and_includes_core_fields() {
        let xml = render(&job(SeriesMetadata::default(), &[]), 3);
        assert!(xml.contains("<Series>Bleach</Series>"));
        assert!(xml.contains("<Number>5</Number>"));
        assert!(xml.contains("<Title>Tom &amp; Jerry &lt;3</Title>"));
        assert!(xml.contains("<PageCount>3</PageCount>"));
    }

    #[test]
    fn test_empty_metadata_fields_are_omitted() {
        let xml = render(&job(SeriesMetadata::default(), &[]), 3);
        for tag in ["Writer", "Penciller", "Summary", "Genre", "Year", "Status", "Notes"] {
            assert!(!xml.contains(&format!("<{tag}>")), "unexpected {tag} in {xml}");
        }
    }

    #[test]
    fn test_metadata_and_incomplete_note() {
        let metadata = SeriesMetadata {
            author: Some("Tite Kubo".to_string()),
            artist: Some("Tite Kubo".to_string()),
            genres: vec!["Action".to_string(), "Supernatural".to_string()],
            status: CompletionStatus::Completed,
            year: Some(2001),
            ..SeriesMetadata::default()
        };
        let xml = render(&job(metadata, &[2]), 2);
        assert!(xml.contains("<Writer>Tite Kubo</Writer>"));
        assert!(xml.contains("<Genre>Action, Supernatural</Genre>"));
        assert!(xml.contains("<Status>Completed</Status>"));
        assert!(xml.contains("<Year>2001</Year>"));
        assert!(xml.contains("<Notes>Incomplete chapter: missing pages 2</Notes>"));
    }
}
