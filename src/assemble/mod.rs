//! Container writers: plain folders, PDF documents and CBZ archives.
//!
//! Layout under the output directory:
//!
//! ```text
//! <output_dir>/<Series>/details.json
//! <output_dir>/<Series>/Chapter 12 - Subtitle/001.jpg    (folder)
//! <output_dir>/<Series>/Chapter 12 - Subtitle.pdf        (pdf)
//! <output_dir>/<Series>/Chapter 12 - Subtitle.cbz        (cbz)
//! ```
//!
//! Containers are written to `<name>.part` and renamed into place, so a file
//! with the final name is always complete. Folder chapters carry an
//! `.incomplete` marker while being written and when pages are missing.

mod archive;
mod comic_info;
mod directory;
mod document;
mod error;
mod naming;

pub use error::AssembleError;

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::download::ChapterDownload;
use crate::metadata::SeriesMetadata;

/// Container format for written chapters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// One directory of page images per chapter.
    #[default]
    Folder,
    /// One PDF per chapter.
    Pdf,
    /// One comic-book zip per chapter.
    Cbz,
}

impl OutputFormat {
    /// Lowercase name as accepted on the command line.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::Pdf => "pdf",
            Self::Cbz => "cbz",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "folder" | "dir" | "directory" => Ok(Self::Folder),
            "pdf" => Ok(Self::Pdf),
            "cbz" => Ok(Self::Cbz),
            other => Err(format!(
                "unknown output format '{other}' (expected folder, pdf or cbz)"
            )),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chapter ready to be written.
#[derive(Debug, Clone)]
pub struct OutputJob {
    /// Series name used for the output directory and container metadata.
    pub series_title: String,
    /// Series page URL.
    pub series_url: String,
    /// The downloaded chapter with its ordered page results.
    pub chapter: ChapterDownload,
    /// Series metadata, possibly empty.
    pub metadata: Arc<SeriesMetadata>,
    /// Target container.
    pub format: OutputFormat,
}

/// Where a chapter ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenChapter {
    /// The chapter directory or container file.
    pub path: PathBuf,
    /// Pages actually written.
    pub pages_written: usize,
    /// True when pages were missing.
    pub incomplete: bool,
}

/// A page as it will be named inside the container.
#[derive(Debug)]
pub(crate) struct PageFile<'a> {
    pub(crate) name: String,
    pub(crate) bytes: &'a [u8],
}

/// Writes chapters under an output directory.
#[derive(Debug, Clone)]
pub struct Assembler {
    output_dir: PathBuf,
}

impl Assembler {
    /// Creates an assembler rooted at `output_dir`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Root output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Directory that holds a series' chapters.
    #[must_use]
    pub fn series_dir(&self, series_title: &str) -> PathBuf {
        self.output_dir.join(naming::sanitize_component(series_title))
    }

    /// Writes one chapter in its requested format.
    ///
    /// # Errors
    ///
    /// Returns [`AssembleError::AssemblyFailed`] if the chapter is not writable
    /// (failed or skipped, or no page succeeded) or on any I/O or encoding
    /// failure. A `.part` file left behind is reported in `partial`.
    #[instrument(
        skip(self, job),
        fields(chapter = %job.chapter.chapter.chapter_id, format = %job.format)
    )]
    pub fn write(&self, job: &OutputJob) -> Result<WrittenChapter, AssembleError> {
        let series_dir = self.series_dir(&job.series_title);

        if !job.chapter.outcome.is_writable() {
            return Err(AssembleError::failed(
                &series_dir,
                format!("chapter is {}", job.chapter.outcome.label()),
            ));
        }

        let pages: Vec<PageFile<'_>> = job
            .chapter
            .fetched_pages()
            .filter_map(|page| {
                page.bytes().map(|bytes| PageFile {
                    name: naming::page_file_name(
                        page.task.page_index,
                        bytes,
                        &page.task.source_url,
                    ),
                    bytes,
                })
            })
            .collect();
        if pages.is_empty() {
            return Err(AssembleError::failed(&series_dir, "no pages to write"));
        }

        fs::create_dir_all(&series_dir).map_err(|e| AssembleError::failed(&series_dir, e))?;
        directory::write_details(&series_dir, job).map_err(|e| {
            AssembleError::failed(&series_dir, format!("could not write details.json: {e}"))
        })?;

        let written = match job.format {
            OutputFormat::Folder => directory::write_folder(&series_dir, job, &pages)?,
            OutputFormat::Cbz => archive::write_cbz(&series_dir, job, &pages)?,
            OutputFormat::Pdf => document::write_pdf(&series_dir, job, &pages)?,
        };
        debug!(path = %written.path.display(), pages = written.pages_written, "chapter written");
        Ok(written)
    }

    /// Runs [`Assembler::write`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`Assembler::write`], plus a failure if the blocking task dies.
    pub async fn write_async(&self, job: OutputJob) -> Result<WrittenChapter, AssembleError> {
        let assembler = self.clone();
        let fallback = self.series_dir(&job.series_title);
        tokio::task::spawn_blocking(move || assembler.write(&job))
            .await
            .map_err(|e| AssembleError::failed(fallback, format!("writer task failed: {e}")))?
    }
}

/// `<path>.part`, the in-progress name for `path`.
pub(crate) fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Writes `bytes` next to `path` and renames it into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let part = part_path(path);
    fs::write(&part, bytes)?;
    fs::rename(&part, path).inspect_err(|_| {
        let _ = fs::remove_file(&part);
    })
}
