//! PDF output built with `lopdf`.
//!
//! A title page (series and chapter in Helvetica) comes first, then one page
//! per image sized to the image in points. JPEG data is embedded unchanged as
//! `DCTDecode`; other formats are decoded and re-encoded as JPEG.

use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use image::{ColorType, DynamicImage, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};
use tracing::warn;

use super::naming::chapter_name;
use super::{AssembleError, OutputJob, PageFile, WrittenChapter, part_path};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A4 portrait, in points.
const TITLE_PAGE_SIZE: (i64, i64) = (595, 842);

/// Writes `<series>/<chapter>.pdf` through a `.part` file.
pub(crate) fn write_pdf(
    series_dir: &Path,
    job: &OutputJob,
    pages: &[PageFile<'_>],
) -> Result<WrittenChapter, AssembleError> {
    let name = chapter_name(&job.chapter.chapter);
    let path = series_dir.join(format!("{name}.pdf"));
    let part = part_path(&path);

    let embedded = build(&part, job, &name, pages)
        .map_err(|e| AssembleError::with_partial(&path, &part, e))?;
    if embedded == 0 {
        return Err(AssembleError::with_partial(
            &path,
            &part,
            "no page image could be decoded",
        ));
    }
    fs::rename(&part, &path).map_err(|e| AssembleError::with_partial(&path, &part, e))?;

    Ok(WrittenChapter {
        path,
        pages_written: embedded,
        incomplete: embedded < pages.len() || !job.chapter.missing_pages().is_empty(),
    })
}

/// Image data ready for embedding.
struct Embeddable {
    width: u32,
    height: u32,
    color_space: &'static str,
    jpeg: Vec<u8>,
}

fn embeddable(bytes: &[u8]) -> Result<Embeddable, BoxError> {
    let format = image::guess_format(bytes)?;
    let decoded = image::load_from_memory_with_format(bytes, format)?;
    let (width, height) = (decoded.width(), decoded.height());

    if format == ImageFormat::Jpeg {
        match decoded.color() {
            ColorType::Rgb8 => {
                return Ok(Embeddable {
                    width,
                    height,
                    color_space: "DeviceRGB",
                    jpeg: bytes.to_vec(),
                });
            }
            ColorType::L8 => {
                return Ok(Embeddable {
                    width,
                    height,
                    color_space: "DeviceGray",
                    jpeg: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
    let mut jpeg = Cursor::new(Vec::new());
    rgb.write_to(&mut jpeg, ImageFormat::Jpeg)?;
    Ok(Embeddable {
        width,
        height,
        color_space: "DeviceRGB",
        jpeg: jpeg.into_inner(),
    })
}

/// Helvetica's built-in encoding covers ASCII reliably; anything else becomes `?`.
fn pdf_text(text: &str) -> Object {
    let ascii: String = text
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect();
    Object::string_literal(ascii)
}

fn add_title_page(
    doc: &mut Document,
    pages_id: ObjectId,
    series: &str,
    chapter: &str,
) -> Result<ObjectId, BoxError> {
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), Object::Integer(24)]),
            Operation::new(
                "Td",
                vec![Object::Integer(72), Object::Integer(TITLE_PAGE_SIZE.1 - 144)],
            ),
            Operation::new("Tj", vec![pdf_text(series)]),
            Operation::new("Tf", vec!["F1".into(), Object::Integer(16)]),
            Operation::new("Td", vec![Object::Integer(0), Object::Integer(-36)]),
            Operation::new("Tj", vec![pdf_text(chapter)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().map_err(|e| e.to_string())?,
    ));
    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(TITLE_PAGE_SIZE.0),
            Object::Integer(TITLE_PAGE_SIZE.1),
        ],
    }))
}

fn add_image_page(
    doc: &mut Document,
    pages_id: ObjectId,
    image: Embeddable,
) -> Result<ObjectId, BoxError> {
    let width = i64::from(image.width);
    let height = i64::from(image.height);

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width,
            "Height" => height,
            "ColorSpace" => image.color_space,
            "BitsPerComponent" => Object::Integer(8),
            "Filter" => "DCTDecode",
        },
        image.jpeg,
    ));
    let resources_id = doc.add_object(dictionary! {
        "XObject" => dictionary! { "Im1" => image_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Integer(width),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(height),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec!["Im1".into()]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().map_err(|e| e.to_string())?,
    ));
    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(width),
            Object::Integer(height),
        ],
    }))
}

/// Builds the document at `part`; returns how many images were embedded.
fn build(
    part: &Path,
    job: &OutputJob,
    chapter_title: &str,
    pages: &[PageFile<'_>],
) -> Result<usize, BoxError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let title_page = add_title_page(&mut doc, pages_id, &job.series_title, chapter_title)?;
    let mut kids: Vec<Object> = vec![title_page.into()];
    let mut embedded = 0usize;
    for page in pages {
        match embeddable(page.bytes) {
            Ok(image) => {
                kids.push(add_image_page(&mut doc, pages_id, image)?.into());
                embedded += 1;
            }
            Err(error) => {
                warn!(page = %page.name, error = %error, "skipping undecodable page image");
            }
        }
    }

    let count = i64::try_from(kids.len())?;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => pdf_text(&format!("{} - {chapter_title}", job.series_title)),
        "Producer" => Object::string_literal("yomi"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut writer = BufWriter::new(File::create(part)?);
    doc.save_to(&mut writer).map_err(|e| e.to_string())?;
    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(embedded)
}
