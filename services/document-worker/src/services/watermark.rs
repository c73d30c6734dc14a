//! Text overlay stamped on every page of a PDF.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId};

const FONT_NAME: &str = "DWWatermark";

/// Stamp `text` diagonally across every page.
///
/// # Errors
///
/// Returns error if the input is not a readable PDF.
pub fn watermark_pdf(pdf: &[u8], text: &str) -> Result<Vec<u8>, lopdf::Error> {
    let mut doc = Document::load_mem(pdf)?;
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
    });

    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    for page_id in pages {
        register_font(&mut doc, page_id, font_id)?;
        doc.add_page_contents(page_id, overlay(text).encode()?)?;
    }

    let mut out = Vec::with_capacity(pdf.len());
    doc.save_to(&mut out)?;
    Ok(out)
}

fn register_font(doc: &mut Document, page_id: ObjectId, font_id: ObjectId) -> Result<(), lopdf::Error> {
    let shared_fonts = {
        let resources = doc.get_or_create_resources(page_id)?.as_dict_mut()?;
        let shared = match resources.get(b"Font").ok() {
            Some(Object::Reference(id)) => Some(*id),
            Some(Object::Dictionary(_)) => None,
            _ => {
                resources.set("Font", lopdf::Dictionary::new());
                None
            }
        };
        if let Ok(Object::Dictionary(fonts)) = resources.get_mut(b"Font") {
            fonts.set(FONT_NAME, font_id);
        }
        shared
    };
    if let Some(id) = shared_fonts {
        doc.get_object_mut(id)?.as_dict_mut()?.set(FONT_NAME, font_id);
    }
    Ok(())
}

fn overlay(text: &str) -> Content {
    // 45 degree rotation.
    let (cos, sin) = (0.7071_f32, 0.7071_f32);
    Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new("rg", vec![Object::Real(0.75), Object::Real(0.75), Object::Real(0.75)]),
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(FONT_NAME.as_bytes().to_vec()), Object::Integer(72)]),
            Operation::new(
                "Tm",
                vec![
                    Object::Real(cos),
                    Object::Real(sin),
                    Object::Real(-sin),
                    Object::Real(cos),
                    Object::Integer(150),
                    Object::Integer(250),
                ],
            ),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
            Operation::new("Q", vec![]),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::Stream;

    fn pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.4");
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            b"BT /F1 12 Tf 100 700 Td (Plan) Tj ET".to_vec(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => Object::Integer(1),
        });
        if let Ok(Object::Dictionary(page)) = doc.get_object_mut(page_id) {
            page.set("Parent", pages_id);
        }
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn test_every_page_gets_the_overlay() {
        let stamped = watermark_pdf(&pdf(), "DEMO").unwrap();

        let doc = Document::load_mem(&stamped).unwrap();
        let (_, page_id) = doc.get_pages().into_iter().next().unwrap();
        let content = String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).to_string();
        assert!(content.contains("(Plan)"));
        assert!(content.contains("(DEMO)"));

        let fonts = doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .and_then(|page| page.get(b"Resources"))
            .and_then(Object::as_dict)
            .and_then(|resources| resources.get(b"Font"))
            .and_then(Object::as_dict)
            .unwrap();
        assert!(fonts.has(FONT_NAME.as_bytes()));
        assert!(fonts.has(b"F1"));
    }

    #[test]
    fn test_rejects_non_pdf() {
        assert!(watermark_pdf(b"<html/>", "DEMO").is_err());
    }
}
