//! File and directory names for series, chapters and pages.

use url::Url;

use crate::catalog::ChapterDescriptor;

const MAX_COMPONENT_CHARS: usize = 120;

/// Makes `value` safe as a single path component on common filesystems.
///
/// Reserved characters become spaces, runs of whitespace collapse, leading and
/// trailing dots/spaces are dropped. An empty result becomes `untitled`.
pub(crate) fn sanitize_component(value: &str) -> String {
    let mapped: String = value
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    let collapsed = mapped.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed: String = collapsed
        .trim_matches(|c: char| c == '.' || c == ' ')
        .chars()
        .take(MAX_COMPONENT_CHARS)
        .collect();
    let trimmed = trimmed.trim_end().to_string();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed
    }
}

/// `Chapter <number>` plus ` - <subtitle>` when the chapter has one.
pub(crate) fn chapter_name(chapter: &ChapterDescriptor) -> String {
    let base = format!("Chapter {}", chapter.number_label());
    match chapter.subtitle.as_deref().map(str::trim) {
        Some(subtitle) if !subtitle.is_empty() => {
            sanitize_component(&format!("{base} - {subtitle}"))
        }
        _ => sanitize_component(&base),
    }
}

/// `NNN.<ext>` for a 1-based page index.
pub(crate) fn page_file_name(page_index: usize, bytes: &[u8], source_url: &str) -> String {
    let ext = sniff_extension(bytes)
        .or_else(|| extension_from_url(source_url))
        .unwrap_or("jpg");
    format!("{page_index:03}.{ext}")
}

/// Image type from magic bytes.
pub(crate) fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some("jpg"),
        [0x89, b'P', b'N', b'G', ..] => Some("png"),
        [b'G', b'I', b'F', b'8', ..] => Some("gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("webp"),
        _ => None,
    }
}

fn extension_from_url(url: &str) -> Option<&'static str> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?.to_lowercase();
    let (_, ext) = last.rsplit_once('.')?;
    match ext {
        "jpg" | "jpeg" => Some("jpg"),
        "png" => Some("png"),
        "webp" => Some("webp"),
        "gif" => Some("gif"),
        _ => None,
    }
}

/// True for names this crate writes as pages (`001.jpg`, `012.webp`).
pub(crate) fn is_page_file_name(name: &str) -> bool {
    name.split_once('.').is_some_and(|(stem, ext)| {
        !stem.is_empty()
            && stem.bytes().all(|b| b.is_ascii_digit())
            && matches!(ext, "jpg" | "png" | "webp" | "gif")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("Bleach"), "Bleach");
        assert_eq!(sanitize_component("Re:Zero / Part 2?"), "Re Zero Part 2");
        assert_eq!(sanitize_component("  ..hidden.. "), "hidden");
        assert_eq!(sanitize_component("???"), "untitled");
        assert_eq!(sanitize_component(&"x".repeat(300)).len(), MAX_COMPONENT_CHARS);
    }

    #[test]
    fn test_chapter_name_with_and_without_subtitle() {
        let mut chapter = ChapterDescriptor::new(12.5, "Chapter 12.5", "https://a.test/c/12.5");
        assert_eq!(chapter_name(&chapter), "Chapter 12.5");
        chapter.subtitle = Some("The End: Part 1".to_string());
        assert_eq!(chapter_name(&chapter), "Chapter 12.5 - The End Part 1");
    }

    #[test]
    fn test_page_file_name_prefers_magic_bytes() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A];
        assert_eq!(page_file_name(1, &png, "https://a.test/p/1.jpg"), "001.png");
        assert_eq!(page_file_name(12, b"????", "https://a.test/p/12.WEBP?x=1"), "012.webp");
        assert_eq!(page_file_name(3, b"????", "https://a.test/p/3"), "003.jpg");
    }

    #[test]
    fn test_sniff_webp_and_gif() {
        assert_eq!(sniff_extension(b"RIFF\0\0\0\0WEBPVP8 "), Some("webp"));
        assert_eq!(sniff_extension(b"GIF89a"), Some("gif"));
        assert_eq!(sniff_extension(b""), None);
    }

    #[test]
    fn test_is_page_file_name() {
        assert!(is_page_file_name("001.jpg"));
        assert!(is_page_file_name("120.webp"));
        assert!(!is_page_file_name("details.json"));
        assert!(!is_page_file_name(".incomplete"));
        assert!(!is_page_file_name("cover.jpg"));
    }
}
