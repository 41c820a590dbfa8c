//! CBZ (comic-book zip) output.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use super::naming::chapter_name;
use super::{AssembleError, OutputJob, PageFile, WrittenChapter, comic_info, part_path};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const COMIC_INFO: &str = "ComicInfo.xml";

/// Writes `<series>/<chapter>.cbz` through a `.part` file.
///
/// Pages are stored uncompressed (images are already compressed);
/// `ComicInfo.xml` is deflated.
pub(crate) fn write_cbz(
    series_dir: &Path,
    job: &OutputJob,
    pages: &[PageFile<'_>],
) -> Result<WrittenChapter, AssembleError> {
    let path = series_dir.join(format!("{}.cbz", chapter_name(&job.chapter.chapter)));
    let part = part_path(&path);

    build(&part, job, pages).map_err(|e| AssembleError::with_partial(&path, &part, e))?;
    fs::rename(&part, &path).map_err(|e| AssembleError::with_partial(&path, &part, e))?;

    Ok(WrittenChapter {
        path,
        pages_written: pages.len(),
        incomplete: !job.chapter.missing_pages().is_empty(),
    })
}

fn build(part: &Path, job: &OutputJob, pages: &[PageFile<'_>]) -> Result<(), BoxError> {
    let file = File::create(part)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for page in pages {
        zip.start_file(page.name.as_str(), stored)?;
        zip.write_all(page.bytes)?;
    }

    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(COMIC_INFO, deflated)?;
    zip.write_all(comic_info::render(job, pages.len()).as_bytes())?;

    let writer = zip.finish()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}
