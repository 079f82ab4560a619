#![allow(dead_code)]

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub const P_NS: &str = "http://schemas.openxmlformats.org/presentationml/2006/main";
pub const A_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
pub const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Shape of a generated template presentation.
#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub slides: usize,
    /// Write `ppt/slides/_rels/slide1.xml.rels`.
    pub slide_rels: bool,
    /// Put one picture (`rId2` -> `ppt/media/image1.png`) on the first slide.
    pub existing_picture: bool,
    /// End the first slide's shape tree with a `p:extLst`.
    pub ext_list: bool,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            slides: 1,
            slide_rels: true,
            existing_picture: false,
            ext_list: false,
        }
    }
}

impl Template {
    pub fn write(&self, path: &Path) {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        let mut add = |name: &str, data: &[u8]| {
            zip.start_file(name, options).unwrap();
            zip.write_all(data).unwrap();
        };

        add("[Content_Types].xml", self.content_types().as_bytes());
        add(
            "_rels/.rels",
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="ppt/presentation.xml"/></Relationships>"#,
        );
        add("ppt/presentation.xml", self.presentation().as_bytes());
        add("ppt/_rels/presentation.xml.rels", self.presentation_rels().as_bytes());
        for n in 1..=self.slides {
            let picture = self.existing_picture && n == 1;
            let ext_list = self.ext_list && n == 1;
            add(&format!("ppt/slides/slide{n}.xml"), slide_xml(picture, ext_list).as_bytes());
            if self.slide_rels {
                add(&format!("ppt/slides/_rels/slide{n}.xml.rels"), slide_rels(picture).as_bytes());
            }
        }
        if self.existing_picture {
            add("ppt/media/image1.png", &png_bytes(4, 4));
        }
        add("docProps/app.xml", b"<Properties/>");

        let bytes = zip.finish().unwrap().into_inner();
        fs::write(path, bytes).unwrap();
    }

    fn content_types(&self) -> String {
        let mut overrides = String::new();
        for n in 1..=self.slides {
            overrides.push_str(&format!(
                r#"<Override PartName="/ppt/slides/slide{n}.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slide+xml"/>"#
            ));
        }
        let png = if self.existing_picture {
            r#"<Default Extension="png" ContentType="image/png"/>"#
        } else {
            ""
        };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/>{png}<Override PartName="/ppt/presentation.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml"/>{overrides}</Types>"#
        )
    }

    fn presentation(&self) -> String {
        let ids: String = (1..=self.slides)
            .map(|n| format!(r#"<p:sldId id="{}" r:id="rId{}"/>"#, 255 + n, 10 + n))
            .collect();
        let list = if self.slides == 0 {
            String::new()
        } else {
            format!("<p:sldIdLst>{ids}</p:sldIdLst>")
        };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:presentation xmlns:a="{A_NS}" xmlns:r="{R_NS}" xmlns:p="{P_NS}">{list}<p:sldSz cx="9144000" cy="6858000"/><p:notesSz cx="6858000" cy="9144000"/></p:presentation>"#
        )
    }

    fn presentation_rels(&self) -> String {
        let rels: String = (1..=self.slides)
            .map(|n| {
                format!(
                    r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide" Target="slides/slide{n}.xml"/>"#,
                    10 + n
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{rels}</Relationships>"#
        )
    }
}

fn slide_xml(picture: bool, ext_list: bool) -> String {
    let pic = if picture {
        r#"<p:pic><p:nvPicPr><p:cNvPr id="3" name="Logo"/><p:cNvPicPr/><p:nvPr/></p:nvPicPr><p:blipFill><a:blip r:embed="rId2"/><a:stretch><a:fillRect/></a:stretch></p:blipFill><p:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="360000" cy="360000"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom></p:spPr></p:pic>"#
    } else {
        ""
    };
    let ext = if ext_list {
        r#"<p:extLst><p:ext uri="{BB962C8B-B14F-4D97-AF65-F5344CB8AC3E}"><p14:creationId xmlns:p14="http://schemas.microsoft.com/office/powerpoint/2010/main" val="2512389467"/></p:ext></p:extLst>"#
    } else {
        ""
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sld xmlns:a="{A_NS}" xmlns:r="{R_NS}" xmlns:p="{P_NS}"><p:cSld><p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/><a:chOff x="0" y="0"/><a:chExt cx="0" cy="0"/></a:xfrm></p:grpSpPr><p:sp><p:nvSpPr><p:cNvPr id="2" name="Title 1"/><p:cNvSpPr/><p:nvPr/></p:nvSpPr><p:spPr/><p:txBody><a:bodyPr/><a:p><a:r><a:t>Weather</a:t></a:r></a:p></p:txBody></p:sp>{pic}{ext}</p:spTree></p:cSld></p:sld>"#
    )
}

fn slide_rels(picture: bool) -> String {
    let image = if picture {
        r#"<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="../media/image1.png"/>"#
    } else {
        ""
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideLayout" Target="../slideLayouts/slideLayout1.xml"/>{image}</Relationships>"#
    )
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, image::ImageFormat::Png)
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, image::ImageFormat::Jpeg)
}

fn encode(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 2) as u8, (y * 2) as u8, 128])
    });
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

/// A 100x100 PNG screenshot stand-in.
pub fn write_png(path: &Path) {
    fs::write(path, png_bytes(100, 100)).unwrap();
}

pub fn part_names(path: &Path) -> Vec<String> {
    let archive = ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    archive.file_names().map(str::to_string).collect()
}

pub fn read_part(path: &Path, name: &str) -> Option<Vec<u8>> {
    let mut archive = ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    let mut entry = archive.by_name(name).ok()?;
    let mut data = Vec::new();
    entry.read_to_end(&mut data).unwrap();
    Some(data)
}

pub fn read_text(path: &Path, name: &str) -> String {
    String::from_utf8(read_part(path, name).unwrap_or_default()).unwrap()
}
