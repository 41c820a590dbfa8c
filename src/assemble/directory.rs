//! Folder output and the series `details.json`.

use std::collections::HashSet;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, trace};

use super::naming::{chapter_name, is_page_file_name};
use super::{AssembleError, OutputJob, PageFile, WrittenChapter, write_atomic};

/// Marker file present while a folder chapter is incomplete.
pub(crate) const INCOMPLETE_MARKER: &str = ".incomplete";

const DETAILS_FILE: &str = "details.json";

const STATUS_VALUES: [&str; 7] = [
    "0 = Unknown",
    "1 = Ongoing",
    "2 = Completed",
    "3 = Licensed",
    "4 = Publishing finished",
    "5 = Cancelled",
    "6 = On hiatus",
];

/// Mihon/Tachiyomi local-source series file.
#[derive(Debug, Serialize)]
struct Details<'a> {
    title: &'a str,
    author: &'a str,
    artist: &'a str,
    description: &'a str,
    genre: &'a [String],
    status: &'a str,
    #[serde(rename = "_status values")]
    status_values: [&'static str; 7],
}

/// Writes `<series>/details.json`.
pub(crate) fn write_details(series_dir: &Path, job: &OutputJob) -> io::Result<()> {
    let metadata = &job.metadata;
    let details = Details {
        title: &job.series_title,
        author: metadata.author.as_deref().unwrap_or_default(),
        artist: metadata.artist.as_deref().unwrap_or_default(),
        description: metadata.summary.as_deref().unwrap_or_default(),
        genre: &metadata.genres,
        status: metadata.status.mihon_code(),
        status_values: STATUS_VALUES,
    };
    let json = serde_json::to_vec_pretty(&details).map_err(io::Error::other)?;
    write_atomic(&series_dir.join(DETAILS_FILE), &json)
}

/// Writes pages into `<series>/<chapter>/`.
///
/// The marker goes down first and is removed only once every page is in place,
/// so an interrupted write is visibly incomplete. Page files from earlier runs
/// that are not part of the current page set are removed.
pub(crate) fn write_folder(
    series_dir: &Path,
    job: &OutputJob,
    pages: &[PageFile<'_>],
) -> Result<WrittenChapter, AssembleError> {
    let dir = series_dir.join(chapter_name(&job.chapter.chapter));
    fs::create_dir_all(&dir).map_err(|e| AssembleError::failed(&dir, e))?;

    let marker = dir.join(INCOMPLETE_MARKER);
    fs::write(&marker, "writing\n").map_err(|e| AssembleError::failed(&dir, e))?;

    for page in pages {
        write_atomic(&dir.join(&page.name), page.bytes)
            .map_err(|e| AssembleError::failed(&dir, format!("{}: {e}", page.name)))?;
    }

    let keep: HashSet<&str> = pages.iter().map(|p| p.name.as_str()).collect();
    remove_stale(&dir, &keep).map_err(|e| AssembleError::failed(&dir, e))?;

    let missing = job.chapter.missing_pages();
    if missing.is_empty() {
        match fs::remove_file(&marker) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(AssembleError::failed(&dir, e)),
        }
    } else {
        let list = missing
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        fs::write(&marker, format!("missing pages: {list}\n"))
            .map_err(|e| AssembleError::failed(&dir, e))?;
        debug!(dir = %dir.display(), missing = %list, "chapter folder flagged incomplete");
    }

    Ok(WrittenChapter {
        path: dir,
        pages_written: pages.len(),
        incomplete: !missing.is_empty(),
    })
}

/// Removes page files and `.part` leftovers not in `keep`.
fn remove_stale(dir: &Path, keep: &HashSet<&str>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let stale_page = is_page_file_name(name) && !keep.contains(name);
        let leftover = Path::new(name).extension().is_some_and(|ext| ext == "part");
        if stale_page || leftover {
            trace!(file = name, "removing stale file");
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
