mod common;

use std::fs;

use common::Template;
use slidecast::compose::{compose, inspect};
use slidecast::config::{EmuRect, Placement};
use slidecast::ComposeError;

#[test]
fn adds_exactly_one_picture_at_the_placement() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.pptx");
    let image = dir.path().join("shot.png");
    let output = dir.path().join("updated.pptx");
    Template {
        existing_picture: true,
        ..Template::default()
    }
    .write(&template);
    common::write_png(&image);

    let placement = Placement::new(4.18, 1.29, 17.03, 11.69);
    let doc = compose(&template, &image, &placement, &output).unwrap();

    let before = inspect(&template).unwrap();
    let after = inspect(&output).unwrap();
    assert_eq!(after.slide_count, 1);
    assert_eq!(after.pictures.len(), before.pictures.len() + 1);
    assert_eq!(after.pictures[..before.pictures.len()], before.pictures[..]);

    let added = after.pictures.last().unwrap();
    let expected = EmuRect {
        x: 1_504_800,
        y: 464_400,
        cx: 6_130_800,
        cy: 4_208_400,
    };
    assert_eq!(added.rect, expected);
    assert_eq!(doc.rect, expected);
    assert_eq!(added.embed, "rId3");
    assert_eq!(added.name, "Picture 4");
    assert_eq!(doc.slide_index, 0);
    assert_eq!(doc.media_part, "ppt/media/image2.png");

    let stored = common::read_part(&output, "ppt/media/image2.png").unwrap();
    assert_eq!(stored, fs::read(&image).unwrap());
    let rels = common::read_text(&output, "ppt/slides/_rels/slide1.xml.rels");
    assert!(rels.contains(r#"Id="rId3""#));
    assert!(rels.contains(r#"Target="../media/image2.png""#));
}

#[test]
fn untouched_parts_are_copied_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.pptx");
    let image = dir.path().join("shot.png");
    let output = dir.path().join("updated.pptx");
    Template::default().write(&template);
    common::write_png(&image);
    let template_bytes = fs::read(&template).unwrap();

    compose(&template, &image, &Placement::default(), &output).unwrap();

    for part in ["_rels/.rels", "ppt/presentation.xml", "ppt/_rels/presentation.xml.rels", "docProps/app.xml"] {
        assert_eq!(
            common::read_part(&output, part),
            common::read_part(&template, part),
            "{part} changed"
        );
    }
    assert_eq!(fs::read(&template).unwrap(), template_bytes, "template modified");

    let types = common::read_text(&output, "[Content_Types].xml");
    assert_eq!(types.matches(r#"Extension="png""#).count(), 1);
}

#[test]
fn slide_relationships_are_created_when_absent() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.pptx");
    let image = dir.path().join("shot.png");
    let output = dir.path().join("updated.pptx");
    Template {
        slide_rels: false,
        ..Template::default()
    }
    .write(&template);
    common::write_png(&image);

    let doc = compose(&template, &image, &Placement::default(), &output).unwrap();

    assert_eq!(doc.relationship_id, "rId1");
    assert!(common::part_names(&output).contains(&"ppt/slides/_rels/slide1.xml.rels".to_string()));
    assert_eq!(inspect(&output).unwrap().pictures.len(), 1);
}

#[test]
fn only_the_first_slide_changes() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.pptx");
    let image = dir.path().join("shot.png");
    let output = dir.path().join("updated.pptx");
    Template {
        slides: 3,
        ..Template::default()
    }
    .write(&template);
    common::write_png(&image);

    compose(&template, &image, &Placement::default(), &output).unwrap();

    assert_eq!(inspect(&output).unwrap().slide_count, 3);
    for part in ["ppt/slides/slide2.xml", "ppt/slides/slide3.xml"] {
        assert_eq!(common::read_part(&output, part), common::read_part(&template, part));
    }
    assert_ne!(
        common::read_part(&output, "ppt/slides/slide1.xml"),
        common::read_part(&template, "ppt/slides/slide1.xml")
    );
}

#[test]
fn jpeg_screenshots_are_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.pptx");
    let image = dir.path().join("shot.jpg");
    let output = dir.path().join("updated.pptx");
    Template::default().write(&template);
    fs::write(&image, common::jpeg_bytes(40, 30)).unwrap();

    let doc = compose(&template, &image, &Placement::default(), &output).unwrap();

    assert_eq!(doc.media_part, "ppt/media/image1.jpeg");
    let types = common::read_text(&output, "[Content_Types].xml");
    assert!(types.contains(r#"<Default Extension="jpeg" ContentType="image/jpeg"/>"#));
}

#[test]
fn existing_output_is_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.pptx");
    let image = dir.path().join("shot.png");
    let output = dir.path().join("updated.pptx");
    Template::default().write(&template);
    common::write_png(&image);
    fs::write(&output, b"previous run").unwrap();

    compose(&template, &image, &Placement::default(), &output).unwrap();
    assert_eq!(inspect(&output).unwrap().pictures.len(), 1);
}

#[test]
fn missing_template_is_a_load_error_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("shot.png");
    let output = dir.path().join("updated.pptx");
    common::write_png(&image);

    let err = compose(&dir.path().join("nope.pptx"), &image, &Placement::default(), &output).unwrap_err();

    assert!(matches!(err, ComposeError::DocumentLoad { .. }), "{err}");
    assert!(!output.exists());
}

#[test]
fn missing_image_is_an_insert_error_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.pptx");
    let output = dir.path().join("updated.pptx");
    Template::default().write(&template);

    let err = compose(&template, &dir.path().join("nope.png"), &Placement::default(), &output).unwrap_err();

    assert!(matches!(err, ComposeError::ImageInsert { .. }), "{err}");
    assert!(!output.exists());
}

#[test]
fn picture_is_inserted_before_shape_tree_extensions() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.pptx");
    let image = dir.path().join("shot.png");
    let output = dir.path().join("updated.pptx");
    Template {
        ext_list: true,
        ..Template::default()
    }
    .write(&template);
    common::write_png(&image);

    compose(&template, &image, &Placement::default(), &output).unwrap();

    let slide = common::read_text(&output, "ppt/slides/slide1.xml");
    let doc = roxmltree::Document::parse(&slide).unwrap();
    let tree = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "spTree")
        .unwrap();
    let order: Vec<&str> = tree
        .children()
        .filter(|n| n.is_element())
        .map(|n| n.tag_name().name())
        .collect();
    assert_eq!(order.last(), Some(&"extLst"));
    assert_eq!(order[order.len() - 2], "pic");
    assert_eq!(inspect(&output).unwrap().pictures.len(), 1);
}

#[test]
fn non_positive_placement_is_an_insert_error_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.pptx");
    let image = dir.path().join("shot.png");
    let output = dir.path().join("updated.pptx");
    Template::default().write(&template);
    common::write_png(&image);

    let placement = Placement::new(-1.0, 1.29, 17.03, 11.69);
    let err = compose(&template, &image, &placement, &output).unwrap_err();

    assert!(matches!(err, ComposeError::ImageInsert { .. }), "{err}");
    assert!(err.to_string().contains("placement left"));
    assert!(!output.exists());
}

#[test]
fn corrupt_image_is_an_insert_error() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.pptx");
    let image = dir.path().join("shot.png");
    let output = dir.path().join("updated.pptx");
    Template::default().write(&template);
    fs::write(&image, b"<html>not an image</html>").unwrap();

    let err = compose(&template, &image, &Placement::default(), &output).unwrap_err();

    assert!(matches!(err, ComposeError::ImageInsert { .. }), "{err}");
    assert!(!output.exists());
}

#[test]
fn template_without_slides_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.pptx");
    let image = dir.path().join("shot.png");
    let output = dir.path().join("updated.pptx");
    Template {
        slides: 0,
        ..Template::default()
    }
    .write(&template);
    common::write_png(&image);

    let err = compose(&template, &image, &Placement::default(), &output).unwrap_err();

    assert!(err.to_string().contains("no slides"), "{err}");
    assert!(matches!(err, ComposeError::DocumentLoad { .. }));
    assert!(!output.exists());
    assert_eq!(inspect(&template).unwrap().slide_count, 0);
}

#[test]
fn non_package_template_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.pptx");
    let image = dir.path().join("shot.png");
    fs::write(&template, b"plain text, not a zip").unwrap();
    common::write_png(&image);

    let err = compose(&template, &image, &Placement::default(), &dir.path().join("o.pptx")).unwrap_err();
    assert!(matches!(err, ComposeError::DocumentLoad { .. }));
}

#[test]
fn unwritable_output_is_a_save_error() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.pptx");
    let image = dir.path().join("shot.png");
    Template::default().write(&template);
    common::write_png(&image);
    // A directory where the file should go.
    let output = dir.path().join("taken");
    fs::create_dir(&output).unwrap();

    let err = compose(&template, &image, &Placement::default(), &output).unwrap_err();
    assert!(matches!(err, ComposeError::DocumentSave { .. }), "{err}");
}
