//! Compose stage: embed the screenshot into the first slide of a presentation.
//!
//! A `.pptx` is an OOXML package. Every part of the template is read into memory,
//! the slide, its relationships and `[Content_Types].xml` are patched as text at
//! positions found with `roxmltree`, and the package is written out again. Parts we
//! do not touch are copied byte for byte.

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::{EmuRect, Placement};
use crate::error::ComposeError;

const P_NS: &str = "http://schemas.openxmlformats.org/presentationml/2006/main";
const A_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const IMAGE_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";

const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const PRESENTATION_PART: &str = "ppt/presentation.xml";
const PRESENTATION_RELS_PART: &str = "ppt/_rels/presentation.xml.rels";

/// The document written by a successful compose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedDocument {
    pub path: PathBuf,
    /// Always 0: the picture goes on the first slide.
    pub slide_index: usize,
    pub slide_part: String,
    pub media_part: String,
    pub relationship_id: String,
    pub rect: EmuRect,
}

/// A picture found on a slide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureFrame {
    pub name: String,
    /// Relationship id of the embedded image.
    pub embed: String,
    pub rect: EmuRect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideSummary {
    pub slide_count: usize,
    /// Pictures on the first slide, in document order.
    pub pictures: Vec<PictureFrame>,
}

/// Copy `template` to `output` with `image` added to the first slide at `placement`.
///
/// Nothing is written unless the placement is a positive rectangle and the template
/// and the image both load.
pub fn compose(
    template: &Path,
    image: &Path,
    placement: &Placement,
    output: &Path,
) -> Result<ComposedDocument, ComposeError> {
    placement.validate().map_err(|e| ComposeError::image(image, e))?;
    let mut package = Package::read(template)?;
    let slide_part = package
        .first_slide()
        .map_err(|reason| ComposeError::load(template, reason))?;
    tracing::debug!(template = %template.display(), slide = %slide_part, "template loaded");

    let picture = SlideImage::load(image)?;
    let rect = placement.to_emu();

    let inserted = insert_picture(&mut package, &slide_part, &picture, rect)
        .map_err(|reason| ComposeError::load(template, reason))?;

    let bytes = package.to_bytes().map_err(|e| ComposeError::save(output, e))?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ComposeError::save(output, e))?;
    }
    fs::write(output, bytes).map_err(|e| ComposeError::save(output, e))?;

    tracing::info!(
        output = %output.display(),
        media = %inserted.media_part,
        width = picture.width,
        height = picture.height,
        "presentation written"
    );
    Ok(ComposedDocument {
        path: output.to_path_buf(),
        slide_index: 0,
        slide_part,
        media_part: inserted.media_part,
        relationship_id: inserted.relationship_id,
        rect,
    })
}

/// Slide count and the pictures on the first slide of a presentation.
pub fn inspect(path: &Path) -> Result<SlideSummary, ComposeError> {
    let package = Package::read(path)?;
    let fail = |reason: String| ComposeError::load(path, reason);

    let slide_count = package.slide_relationship_ids().map_err(fail)?.len();
    if slide_count == 0 {
        return Ok(SlideSummary {
            slide_count,
            pictures: Vec::new(),
        });
    }
    let slide_part = package.first_slide().map_err(fail)?;
    let xml = package.text(&slide_part).map_err(fail)?;
    let doc = Document::parse(xml).map_err(|e| fail(format!("{slide_part}: {e}")))?;

    let pictures = doc
        .descendants()
        .filter(|n| is_element(n, P_NS, "pic"))
        .map(picture_frame)
        .collect();
    Ok(SlideSummary {
        slide_count,
        pictures,
    })
}

fn picture_frame(pic: Node) -> PictureFrame {
    let name = pic
        .descendants()
        .find(|n| is_element(n, P_NS, "cNvPr"))
        .and_then(|n| n.attribute("name"))
        .unwrap_or_default()
        .to_string();
    let embed = pic
        .descendants()
        .find(|n| is_element(n, A_NS, "blip"))
        .and_then(|n| n.attribute((R_NS, "embed")))
        .unwrap_or_default()
        .to_string();
    let attr = |local: &str, key: &str| -> i64 {
        pic.descendants()
            .find(|n| is_element(n, A_NS, local))
            .and_then(|n| n.attribute(key))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    };
    PictureFrame {
        name,
        embed,
        rect: EmuRect {
            x: attr("off", "x"),
            y: attr("off", "y"),
            cx: attr("ext", "cx"),
            cy: attr("ext", "cy"),
        },
    }
}

/// A validated image ready to be stored in the package.
struct SlideImage {
    bytes: Vec<u8>,
    extension: &'static str,
    content_type: &'static str,
    width: u32,
    height: u32,
    file_name: String,
}

impl SlideImage {
    fn load(path: &Path) -> Result<Self, ComposeError> {
        let bytes = fs::read(path).map_err(|e| ComposeError::image(path, e))?;
        let format = image::guess_format(&bytes).map_err(|e| ComposeError::image(path, e))?;
        let (extension, content_type) = match format {
            image::ImageFormat::Png => ("png", "image/png"),
            image::ImageFormat::Jpeg => ("jpeg", "image/jpeg"),
            other => {
                return Err(ComposeError::image(
                    path,
                    format!("unsupported image format {other:?}"),
                ))
            }
        };
        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| ComposeError::image(path, e))?;
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(ComposeError::image(path, "image has zero size"));
        }
        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            bytes,
            extension,
            content_type,
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        })
    }
}

struct Inserted {
    media_part: String,
    relationship_id: String,
}

fn insert_picture(
    package: &mut Package,
    slide_part: &str,
    picture: &SlideImage,
    rect: EmuRect,
) -> Result<Inserted, String> {
    let media_part = package.free_media_name(picture.extension);
    let rels_part = rels_part_for(slide_part);
    let target = relative_target(slide_part, &media_part);

    let (rels_xml, relationship_id) = match package.get(&rels_part) {
        Some(_) => {
            let xml = package.text(&rels_part)?;
            add_relationship(xml, &target).map_err(|e| format!("{rels_part}: {e}"))?
        }
        None => {
            let id = "rId1".to_string();
            (empty_relationships_with(&id, &target), id)
        }
    };

    let slide_xml = package.text(slide_part)?;
    let slide_xml = add_picture_element(slide_xml, &relationship_id, &picture.file_name, rect)
        .map_err(|e| format!("{slide_part}: {e}"))?;

    let types_xml = package.text(CONTENT_TYPES_PART)?;
    let types_xml = ensure_default_content_type(types_xml, picture.extension, picture.content_type)
        .map_err(|e| format!("{CONTENT_TYPES_PART}: {e}"))?;

    package.put(&media_part, picture.bytes.clone());
    package.put(&rels_part, rels_xml.into_bytes());
    package.put(slide_part, slide_xml.into_bytes());
    package.put(CONTENT_TYPES_PART, types_xml.into_bytes());

    Ok(Inserted {
        media_part,
        relationship_id,
    })
}

/// All parts of a package, in archive order.
struct Package {
    parts: Vec<(String, Vec<u8>)>,
}

impl Package {
    fn read(path: &Path) -> Result<Self, ComposeError> {
        let file = fs::File::open(path).map_err(|e| ComposeError::load(path, e))?;
        let mut archive = ZipArchive::new(file).map_err(|e| ComposeError::load(path, e))?;
        let mut parts = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).map_err(|e| ComposeError::load(path, e))?;
            if entry.is_dir() {
                continue;
            }
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut data)
                .map_err(|e| ComposeError::load(path, e))?;
            parts.push((entry.name().to_string(), data));
        }
        let package = Self { parts };
        for required in [CONTENT_TYPES_PART, PRESENTATION_PART, PRESENTATION_RELS_PART] {
            if package.get(required).is_none() {
                return Err(ComposeError::load(path, format!("not a presentation: missing {required}")));
            }
        }
        Ok(package)
    }

    fn get(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|(part, _)| part == name)
            .map(|(_, data)| data.as_slice())
    }

    fn text(&self, name: &str) -> Result<&str, String> {
        let data = self.get(name).ok_or_else(|| format!("missing part {name}"))?;
        let text = std::str::from_utf8(data).map_err(|e| format!("{name} is not UTF-8: {e}"))?;
        Ok(text.trim_start_matches('\u{feff}'))
    }

    fn put(&mut self, name: &str, data: Vec<u8>) {
        match self.parts.iter_mut().find(|(part, _)| part == name) {
            Some((_, existing)) => *existing = data,
            None => self.parts.push((name.to_string(), data)),
        }
    }

    /// `r:id` values of `p:sldIdLst`, in presentation order.
    fn slide_relationship_ids(&self) -> Result<Vec<String>, String> {
        let xml = self.text(PRESENTATION_PART)?;
        let doc = Document::parse(xml).map_err(|e| format!("{PRESENTATION_PART}: {e}"))?;
        let ids = doc
            .descendants()
            .find(|n| is_element(n, P_NS, "sldIdLst"))
            .map(|list| {
                list.children()
                    .filter(|n| is_element(n, P_NS, "sldId"))
                    .filter_map(|n| n.attribute((R_NS, "id")).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    /// Part name of the first slide.
    fn first_slide(&self) -> Result<String, String> {
        let ids = self.slide_relationship_ids()?;
        let first = ids.first().ok_or_else(|| "presentation has no slides".to_string())?;

        let rels = self.text(PRESENTATION_RELS_PART)?;
        let doc = Document::parse(rels).map_err(|e| format!("{PRESENTATION_RELS_PART}: {e}"))?;
        let target = doc
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "Relationship")
            .find(|n| n.attribute("Id") == Some(first.as_str()))
            .and_then(|n| n.attribute("Target"))
            .ok_or_else(|| format!("slide relationship {first} not found"))?;

        let part = resolve_target("ppt", target);
        if self.get(&part).is_none() {
            return Err(format!("slide part {part} missing from package"));
        }
        Ok(part)
    }

    /// First `ppt/media/imageN.<ext>` whose number is not used by any extension.
    fn free_media_name(&self, extension: &str) -> String {
        let taken = |n: usize| {
            let prefix = format!("ppt/media/image{n}.");
            self.parts.iter().any(|(part, _)| part.starts_with(&prefix))
        };
        let n = (1..).find(|n| !taken(*n)).unwrap_or(1);
        format!("ppt/media/image{n}.{extension}")
    }

    fn to_bytes(&self) -> zip::result::ZipResult<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in &self.parts {
            writer.start_file(name.as_str(), options)?;
            writer.write_all(data)?;
        }
        Ok(writer.finish()?.into_inner())
    }
}

fn is_element(node: &Node, namespace: &str, local: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local
        && node.tag_name().namespace() == Some(namespace)
}

/// Resolve a relationship target against the folder of its source part.
fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// `ppt/slides/slide1.xml` -> `ppt/slides/_rels/slide1.xml.rels`
fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Target of `to` as written in the relationships of `from`.
fn relative_target(from: &str, to: &str) -> String {
    let from_dir: Vec<&str> = from.split('/').collect();
    let from_dir = &from_dir[..from_dir.len().saturating_sub(1)];
    let to_parts: Vec<&str> = to.split('/').collect();
    let common = from_dir
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();
    let mut out: Vec<&str> = vec![".."; from_dir.len() - common];
    out.extend(&to_parts[common..]);
    out.join("/")
}

fn add_relationship(xml: &str, target: &str) -> Result<(String, String), String> {
    let doc = Document::parse(xml).map_err(|e| e.to_string())?;
    let root = doc.root_element();
    let next = root
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "Relationship")
        .filter_map(|n| n.attribute("Id"))
        .filter_map(|id| id.strip_prefix("rId").and_then(|n| n.parse::<u32>().ok()))
        .max()
        .unwrap_or(0)
        + 1;
    let id = format!("rId{next}");
    let fragment = relationship_element(&id, target);
    Ok((insert_before_close(xml, root, &fragment), id))
}

fn empty_relationships_with(id: &str, target: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">{}</Relationships>",
        relationship_element(id, target)
    )
}

fn relationship_element(id: &str, target: &str) -> String {
    format!(
        r#"<Relationship Id="{}" Type="{IMAGE_REL_TYPE}" Target="{}"/>"#,
        xml_escape(id),
        xml_escape(target)
    )
}

fn add_picture_element(xml: &str, embed: &str, description: &str, rect: EmuRect) -> Result<String, String> {
    let doc = Document::parse(xml).map_err(|e| e.to_string())?;
    let tree = doc
        .descendants()
        .find(|n| is_element(n, P_NS, "spTree"))
        .ok_or_else(|| "slide has no shape tree".to_string())?;
    let shape_id = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "cNvPr")
        .filter_map(|n| n.attribute("id").and_then(|id| id.parse::<u32>().ok()))
        .max()
        .unwrap_or(1)
        + 1;
    let fragment = picture_element(shape_id, embed, description, rect);

    // `p:extLst` must stay the last child of the shape tree.
    let ext_list = tree.children().find(|n| is_element(n, P_NS, "extLst"));
    match ext_list {
        Some(ext) => {
            let at = ext.range().start;
            Ok(format!("{}{fragment}{}", &xml[..at], &xml[at..]))
        }
        None => Ok(insert_before_close(xml, tree, &fragment)),
    }
}

fn picture_element(shape_id: u32, embed: &str, description: &str, rect: EmuRect) -> String {
    format!(
        concat!(
            r#"<p:pic xmlns:p="{p}" xmlns:a="{a}" xmlns:r="{r}">"#,
            r#"<p:nvPicPr><p:cNvPr id="{id}" name="Picture {id}" descr="{descr}"/>"#,
            r#"<p:cNvPicPr><a:picLocks noChangeAspect="1"/></p:cNvPicPr><p:nvPr/></p:nvPicPr>"#,
            r#"<p:blipFill><a:blip r:embed="{embed}"/><a:stretch><a:fillRect/></a:stretch></p:blipFill>"#,
            r#"<p:spPr><a:xfrm><a:off x="{x}" y="{y}"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm>"#,
            r#"<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></p:spPr>"#,
            r#"</p:pic>"#
        ),
        p = P_NS,
        a = A_NS,
        r = R_NS,
        id = shape_id,
        descr = xml_escape(description),
        embed = xml_escape(embed),
        x = rect.x,
        y = rect.y,
        cx = rect.cx,
        cy = rect.cy,
    )
}

fn ensure_default_content_type(xml: &str, extension: &str, content_type: &str) -> Result<String, String> {
    let doc = Document::parse(xml).map_err(|e| e.to_string())?;
    let root = doc.root_element();
    let present = root
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "Default")
        .filter_map(|n| n.attribute("Extension"))
        .any(|ext| ext.eq_ignore_ascii_case(extension));
    if present {
        return Ok(xml.to_string());
    }
    let fragment = format!(
        r#"<Default Extension="{}" ContentType="{}"/>"#,
        xml_escape(extension),
        xml_escape(content_type)
    );
    Ok(insert_before_close(xml, root, &fragment))
}

/// Append `fragment` as the last child of `element`, expanding `<x/>` when needed.
fn insert_before_close(xml: &str, element: Node, fragment: &str) -> String {
    let range = element.range();
    let source = &xml[range.clone()];
    let mut out = String::with_capacity(xml.len() + fragment.len() + 32);
    if source.ends_with("/>") {
        let qname: String = source[1..]
            .chars()
            .take_while(|c| !c.is_whitespace() && *c != '/' && *c != '>')
            .collect();
        out.push_str(&xml[..range.end - 2]);
        out.push('>');
        out.push_str(fragment);
        out.push_str(&format!("</{qname}>"));
    } else {
        let close = source.rfind("</").map_or(range.end, |i| range.start + i);
        out.push_str(&xml[..close]);
        out.push_str(fragment);
        out.push_str(&xml[close..range.end]);
    }
    out.push_str(&xml[range.end..]);
    out
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
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
