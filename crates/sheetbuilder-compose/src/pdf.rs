//! Low-level PDF object-model glue built on `lopdf`.
//!
//! This module is the only place in the workspace that touches PDF internals
//! directly: opening a source document, reading each page's declared size,
//! producing a reversed-page-order intermediate, copying a page into the
//! output document as a reusable form XObject, and writing the final file.
//! Everything above this module (packing math, LRU eviction, progress
//! reporting) is pure Rust and PDF-library-agnostic.

use std::collections::HashMap;
use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, content::{Content, Operation}};
use sheetbuilder_core::Error;

/// Opens a PDF document from disk.
pub fn open_document(path: &Path) -> sheetbuilder_core::Result<Document> {
    Document::load(path).map_err(|e| Error::processing(format!("failed to open PDF: {e}")).with_source(e))
}

/// Returns the ids of every page in the document, in page-number order.
pub fn ordered_page_ids(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().into_values().collect()
}

/// Resolves a page's declared `(width, height)` in points from its
/// `/MediaBox`, walking up `/Parent` references when a page inherits its box
/// from an ancestor in the page tree (a common PDF authoring pattern).
pub fn page_dimensions(doc: &Document, page_id: ObjectId) -> sheetbuilder_core::Result<(f32, f32)> {
    let mut current = page_id;
    loop {
        let dict = doc
            .get_object(current)
            .and_then(Object::as_dict)
            .map_err(|e| Error::processing(format!("malformed page object: {e}")))?;

        if let Ok(array) = dict.get(b"MediaBox").and_then(Object::as_array) {
            return media_box_to_dimensions(array);
        }

        match dict.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => current = parent,
            Err(_) => {
                return Err(Error::processing(format!(
                    "page {current:?} has no MediaBox and no parent to inherit one from"
                )));
            }
        }
    }
}

fn media_box_to_dimensions(array: &[Object]) -> sheetbuilder_core::Result<(f32, f32)> {
    if array.len() != 4 {
        return Err(Error::processing("MediaBox does not have 4 entries"));
    }
    let nums: Vec<f32> = array
        .iter()
        .map(|o| o.as_float().or_else(|_| o.as_int().map(|i| i as f32)))
        .collect::<Result<_, _>>()
        .map_err(|e| Error::processing(format!("MediaBox entry is not numeric: {e}")))?;
    let (llx, lly, urx, ury) = (nums[0], nums[1], nums[2], nums[3]);
    Ok(((urx - llx).abs(), (ury - lly).abs()))
}

/// Builds an intermediate document whose pages are the source document's
/// pages in reverse order (spec.md §4.D step 1, the `order == REV` path).
///
/// This reorders the root `/Pages` node's `/Kids` array rather than
/// recopying page content; it assumes a flat (non-nested) page tree, which
/// holds for the overwhelming majority of real-world PDFs and is the
/// documented limitation recorded in DESIGN.md.
pub fn write_reversed_copy(source: &Document, dest_path: &Path) -> sheetbuilder_core::Result<()> {
    let mut doc = source.clone();
    let pages_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();

    let catalog_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|e| Error::processing(format!("trailer missing /Root: {e}")))?;
    let pages_root = doc
        .get_object(catalog_id)
        .and_then(Object::as_dict)
        .and_then(|d| d.get(b"Pages"))
        .and_then(Object::as_reference)
        .map_err(|e| Error::processing(format!("catalog missing /Pages: {e}")))?;

    let reversed: Vec<Object> = pages_ids.into_iter().rev().map(Object::Reference).collect();
    if let Ok(pages_dict) = doc.get_object_mut(pages_root).and_then(Object::as_dict_mut) {
        pages_dict.set("Kids", Object::Array(reversed));
    }

    doc.save(dest_path)
        .map_err(|e| Error::storage(format!("failed to write reversed copy: {e}")).with_source(e))?;
    Ok(())
}

/// Copies a source page's content and resources into `dest` as a reusable
/// form XObject and returns its object id. Import is transitive: any object
/// the page's resources reference is imported too, memoized in `imported` so
/// repeated references across pages within one build are not duplicated.
pub fn import_page_as_form_xobject(
    dest: &mut Document,
    source: &Document,
    page_id: ObjectId,
    bbox: (f32, f32),
    imported: &mut HashMap<ObjectId, ObjectId>,
) -> sheetbuilder_core::Result<ObjectId> {
    let page_dict = source
        .get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(|e| Error::processing(format!("malformed page object: {e}")))?;

    let content_bytes = source
        .get_page_content(page_id)
        .map_err(|e| Error::processing(format!("failed to read page content stream: {e}")))?;

    let resources = match page_dict.get(b"Resources") {
        Ok(res) => import_object(dest, source, res.clone(), imported)?,
        Err(_) => Object::Dictionary(Dictionary::new()),
    };

    let mut xobject_dict = Dictionary::new();
    xobject_dict.set("Type", Object::Name(b"XObject".to_vec()));
    xobject_dict.set("Subtype", Object::Name(b"Form".to_vec()));
    xobject_dict.set(
        "BBox",
        Object::Array(vec![
            Object::Real(0.0),
            Object::Real(0.0),
            Object::Real(bbox.0),
            Object::Real(bbox.1),
        ]),
    );
    xobject_dict.set("Resources", resources);

    let stream = Stream::new(xobject_dict, content_bytes);
    Ok(dest.add_object(Object::Stream(stream)))
}

/// Recursively imports `object` (and, transitively, anything it references)
/// from `source` into `dest`, returning the equivalent object with any
/// `Object::Reference` rewritten to point at the newly imported copy.
fn import_object(
    dest: &mut Document,
    source: &Document,
    object: Object,
    imported: &mut HashMap<ObjectId, ObjectId>,
) -> sheetbuilder_core::Result<Object> {
    match object {
        Object::Reference(id) => {
            if let Some(&new_id) = imported.get(&id) {
                return Ok(Object::Reference(new_id));
            }
            let resolved = source
                .get_object(id)
                .map_err(|e| Error::processing(format!("dangling reference {id:?}: {e}")))?
                .clone();

            // Reserve the new id before recursing so a self/mutually
            // referential object graph terminates.
            let new_id = dest.new_object_id();
            imported.insert(id, new_id);
            let imported_value = import_object(dest, source, resolved, imported)?;
            dest.objects.insert(new_id, imported_value);
            Ok(Object::Reference(new_id))
        }
        Object::Dictionary(dict) => {
            let mut new_dict = Dictionary::new();
            for (key, value) in dict.iter() {
                new_dict.set(key.clone(), import_object(dest, source, value.clone(), imported)?);
            }
            Ok(Object::Dictionary(new_dict))
        }
        Object::Array(items) => {
            let mut new_items = Vec::with_capacity(items.len());
            for item in items {
                new_items.push(import_object(dest, source, item, imported)?);
            }
            Ok(Object::Array(new_items))
        }
        Object::Stream(stream) => {
            let mut new_dict = Dictionary::new();
            for (key, value) in stream.dict.iter() {
                new_dict.set(key.clone(), import_object(dest, source, value.clone(), imported)?);
            }
            Ok(Object::Stream(Stream::new(new_dict, stream.content.clone())))
        }
        other => Ok(other),
    }
}

/// Builds the content stream that places every packed form XObject on one
/// output sheet, applying a rotation matrix about each page's own center
/// when `rotation_degrees != 0`.
pub fn build_sheet_content(
    placements: &[(ObjectId, &str, f32, f32, f32, f32)],
    rotation_degrees: u16,
    rotation: (f32, f32),
) -> Content {
    let mut operations = Vec::new();
    let (cos, sin) = rotation;

    for &(_, name, x_offset, y, width, height) in placements {
        operations.push(Operation::new("q", vec![]));

        if rotation_degrees != 0 {
            let cx = x_offset + width / 2.0;
            let cy = y + height / 2.0;
            // Translate to origin, rotate, translate back: T(cx,cy) * R(θ) * T(-cx,-cy).
            operations.push(Operation::new(
                "cm",
                vec![
                    cos.into(),
                    sin.into(),
                    (-sin).into(),
                    cos.into(),
                    (cx - cx * cos + cy * sin).into(),
                    (cy - cx * sin - cy * cos).into(),
                ],
            ));
        }

        operations.push(Operation::new(
            "cm",
            vec![
                1.0.into(),
                0.0.into(),
                0.0.into(),
                1.0.into(),
                x_offset.into(),
                y.into(),
            ],
        ));
        operations.push(Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]));
        operations.push(Operation::new("Q", vec![]));
    }

    Content { operations }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_box_to_dimensions_computes_width_and_height() {
        let array = vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(612.0),
            Object::Real(792.0),
        ];
        let (w, h) = media_box_to_dimensions(&array).unwrap();
        assert_eq!(w, 612.0);
        assert_eq!(h, 792.0);
    }

    #[test]
    fn media_box_rejects_wrong_arity() {
        let array = vec![Object::Integer(0), Object::Integer(0)];
        assert!(media_box_to_dimensions(&array).is_err());
    }
}
