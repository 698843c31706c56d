// expense-report-service/src/pdf/document.rs

use crate::error::{ReportError, Result};
use crate::pdf::canvas::{Canvas, ImageHandle};
use crate::pdf::fonts::Font;
use crate::pdf::raster::RasterImage;
use crate::pdf::StructuredDocument;
use lopdf::content::Content;
use lopdf::{dictionary, encryption, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

const MAX_TREE_DEPTH: usize = 64;

/// A lopdf-backed document that keeps its page tree flat: every page it adds
/// or copies in hangs directly off the root `Pages` node.
pub struct PdfDocument {
    doc: Document,
    pages_id: ObjectId,
    fonts: BTreeMap<Font, ObjectId>,
    images: BTreeMap<String, ObjectId>,
}

impl PdfDocument {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => Vec::<Object>::new(),
                "Count" => Object::Integer(0),
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        Self {
            doc,
            pages_id,
            fonts: BTreeMap::new(),
            images: BTreeMap::new(),
        }
    }

    /// Adds `image` as an XObject (with soft mask if it has alpha) and returns
    /// the handle canvases use to place it.
    pub fn register_image(&mut self, image: &RasterImage) -> ImageHandle {
        let width = Object::Integer(i64::from(image.width));
        let height = Object::Integer(i64::from(image.height));

        let smask_id = image.alpha.as_ref().map(|alpha| {
            self.doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => width.clone(),
                    "Height" => height.clone(),
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => Object::Integer(8),
                    "Filter" => "FlateDecode",
                },
                alpha.clone(),
            ))
        });

        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width,
            "Height" => height,
            "ColorSpace" => image.color_space,
            "BitsPerComponent" => Object::Integer(8),
            "Filter" => image.filter,
        };
        if let Some(smask_id) = smask_id {
            dict.set("SMask", smask_id);
        }
        let image_id = self.doc.add_object(Stream::new(dict, image.data.clone()));

        let name = format!("Im{}", self.images.len() + 1);
        self.images.insert(name.clone(), image_id);
        ImageHandle {
            name,
            width: image.width,
            height: image.height,
        }
    }

    fn font_id(&mut self, font: Font) -> ObjectId {
        if let Some(id) = self.fonts.get(&font) {
            return *id;
        }
        let id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => font.base_font(),
            "Encoding" => "WinAnsiEncoding",
        });
        self.fonts.insert(font, id);
        id
    }

    fn append_kids(&mut self, page_ids: &[ObjectId]) -> Result<()> {
        let pages = self.doc.get_object_mut(self.pages_id)?.as_dict_mut()?;
        let kids = pages.get_mut(b"Kids")?.as_array_mut()?;
        kids.extend(page_ids.iter().map(|id| Object::Reference(*id)));
        let count = kids.len() as i64;
        pages.set("Count", Object::Integer(count));
        Ok(())
    }

    fn sync_max_id(&mut self) {
        let highest = self.doc.objects.keys().map(|(number, _)| *number).max().unwrap_or(0);
        self.doc.max_id = self.doc.max_id.max(highest);
    }
}

impl Default for PdfDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuredDocument for PdfDocument {
    fn blank() -> Self {
        Self::new()
    }

    /// Encrypted documents are opened with the empty user password and
    /// stored decrypted. A document that needs a real password fails to load.
    fn load_from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut doc = Document::load_mem(bytes)?;
        if doc.is_encrypted() {
            decrypt_with_empty_password(&mut doc)?;
        }
        let pages_id = doc
            .catalog()?
            .get(b"Pages")?
            .as_reference()?;

        Ok(Self {
            doc,
            pages_id,
            fonts: BTreeMap::new(),
            images: BTreeMap::new(),
        })
    }

    fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    fn add_page(&mut self, canvas: Canvas) -> Result<()> {
        let (width, height) = canvas.size();

        let mut font_dict = Dictionary::new();
        let used_fonts: Vec<Font> = canvas.fonts().collect();
        for font in used_fonts {
            let id = self.font_id(font);
            font_dict.set(font.resource_name(), id);
        }

        let mut xobjects = Dictionary::new();
        for name in canvas.images() {
            let id = self.images.get(name).copied().ok_or_else(|| {
                ReportError::GenerationFailed(format!("image {name} was drawn but never registered"))
            })?;
            xobjects.set(name, id);
        }

        let content = Content {
            operations: canvas.into_operations(),
        };
        let content_id = self
            .doc
            .add_object(Stream::new(Dictionary::new(), content.encode()?));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(width),
                Object::Real(height),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => font_dict,
                "XObject" => xobjects,
            },
        });
        self.append_kids(&[page_id])
    }

    /// Moves every page of `source` behind the existing pages. Content
    /// streams and resources are copied as stored, never re-rendered.
    fn copy_pages(&mut self, source: PdfDocument) -> Result<usize> {
        let mut src = source.doc;
        let source_pages: Vec<ObjectId> = src.get_pages().into_values().collect();
        for page_id in &source_pages {
            materialize_inherited(&mut src, *page_id)?;
        }

        src.renumber_objects_with(self.doc.max_id + 1);
        let page_ids: Vec<ObjectId> = src.get_pages().into_values().collect();

        // The source catalog and intermediate page tree nodes are replaced by ours.
        let mut tree_nodes = BTreeSet::new();
        if let Ok(root) = src.trailer.get(b"Root").and_then(Object::as_reference) {
            tree_nodes.insert(root);
        }
        for (id, object) in &src.objects {
            if let Ok(dict) = object.as_dict() {
                if dict.get(b"Type").and_then(Object::as_name).map_or(false, |t| t == b"Pages") {
                    tree_nodes.insert(*id);
                }
            }
        }
        for id in &tree_nodes {
            src.objects.remove(id);
        }

        for page_id in &page_ids {
            let page = src.get_object_mut(*page_id)?.as_dict_mut()?;
            page.set("Parent", self.pages_id);
        }

        self.doc.objects.extend(src.objects);
        self.sync_max_id();
        self.append_kids(&page_ids)?;

        debug!(pages = page_ids.len(), "Copied attachment pages");
        Ok(page_ids.len())
    }

    fn save(&mut self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.doc.save_to(&mut buffer)?;
        Ok(buffer)
    }
}

/// lopdf's own `decrypt` only understands crypt filter dictionaries (V=4).
/// RC4 documents (V=1 and V=2) are decrypted object by object here.
fn decrypt_with_empty_password(doc: &mut Document) -> Result<()> {
    let (version, encrypt_id) = {
        let dict = doc.get_encrypted()?;
        let version = dict.get(b"V").and_then(Object::as_i64).unwrap_or(0);
        let id = doc.trailer.get(b"Encrypt")?.as_reference()?;
        (version, id)
    };

    if version >= 4 {
        doc.decrypt("")?;
        return Ok(());
    }

    let key = encryption::get_encryption_key(doc, "", true).map_err(lopdf::Error::from)?;
    for (&id, object) in doc.objects.iter_mut() {
        if id == encrypt_id || object.type_name().map_or(false, |t| t == b"XRef") {
            continue;
        }
        decrypt_in_place(&key, id, object)?;
    }
    doc.trailer.remove(b"Encrypt");
    doc.objects.remove(&encrypt_id);
    debug!(version, "Decrypted RC4 attachment");
    Ok(())
}

/// Strings nested anywhere inside an indirect object share that object's key.
fn decrypt_in_place(key: &[u8], id: ObjectId, object: &mut Object) -> Result<()> {
    match object {
        Object::String(..) => {
            let plain = encryption::decrypt_object(key, id, object, false).map_err(lopdf::Error::from)?;
            if let Object::String(content, _) = object {
                *content = plain;
            }
        }
        Object::Stream(stream) => {
            let plain = encryption::decrypt_object(key, id, &Object::Stream(stream.clone()), false)
                .map_err(lopdf::Error::from)?;
            stream.set_content(plain);
            for (_, value) in stream.dict.iter_mut() {
                decrypt_in_place(key, id, value)?;
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter_mut() {
                decrypt_in_place(key, id, value)?;
            }
        }
        Object::Array(items) => {
            for item in items.iter_mut() {
                decrypt_in_place(key, id, item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Copies inherited page attributes onto the page itself so the page keeps
/// its look once it is re-parented.
fn materialize_inherited(doc: &mut Document, page_id: ObjectId) -> Result<()> {
    let mut inherited: Vec<(&[u8], Object)> = Vec::new();
    {
        let page = doc.get_dictionary(page_id)?;
        let mut missing: Vec<&[u8]> = INHERITABLE_KEYS
            .iter()
            .copied()
            .filter(|key| !page.has(key))
            .collect();
        let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
        let mut depth = 0;

        while let Some(parent_id) = parent {
            if missing.is_empty() || depth >= MAX_TREE_DEPTH {
                break;
            }
            let Ok(node) = doc.get_dictionary(parent_id) else {
                break;
            };
            missing.retain(|key| match node.get(key) {
                Ok(value) => {
                    inherited.push((*key, value.clone()));
                    false
                }
                Err(_) => true,
            });
            parent = node.get(b"Parent").and_then(Object::as_reference).ok();
            depth += 1;
        }
    }

    if inherited.is_empty() {
        return Ok(());
    }
    let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
    for (key, value) in inherited {
        page.set(key.to_vec(), value);
    }
    Ok(())
}
