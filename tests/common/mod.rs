#![allow(dead_code)]

use pdf_darken::object_utils::name;
use pdf_darken::{page_elements, Dictionary, Document, Element, Object, ObjectId, Stream};
use std::fs;
use std::path::{Path, PathBuf};

/// Builds small in-memory documents page by page
pub struct FixtureBuilder {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl FixtureBuilder {
    pub fn new() -> FixtureBuilder {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        FixtureBuilder {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    pub fn add_object<T: Into<Object>>(&mut self, object: T) -> ObjectId {
        self.doc.add_object(object)
    }

    pub fn page(&mut self, content: &str, resources: Dictionary) -> ObjectId {
        let content_id = self
            .doc
            .add_object(Stream::new(Dictionary::new(), content.as_bytes().to_vec()));
        let mut page = Dictionary::new();
        page.set("Type", name("Page"));
        page.set("Parent", Object::Reference(self.pages_id));
        page.set("Contents", Object::Reference(content_id));
        page.set("Resources", Object::Dictionary(resources));
        let page_id = self.doc.add_object(page);
        self.kids.push(Object::Reference(page_id));
        page_id
    }

    pub fn build(mut self) -> Vec<u8> {
        let mut pages = Dictionary::new();
        pages.set("Type", name("Pages"));
        pages.set("Count", Object::Integer(self.kids.len() as i64));
        pages.set("Kids", Object::Array(self.kids));
        pages.set(
            "MediaBox",
            Object::Array([0, 0, 612, 792].into_iter().map(Object::Integer).collect()),
        );
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));

        let mut catalog = Dictionary::new();
        catalog.set("Type", name("Catalog"));
        catalog.set("Pages", Object::Reference(self.pages_id));
        let catalog_id = self.doc.add_object(catalog);
        self.doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buffer = Vec::new();
        self.doc.save_to(&mut buffer).expect("failed to serialise fixture");
        buffer
    }
}

pub fn font(subtype: &str, base_font: &str) -> Dictionary {
    let mut font = Dictionary::new();
    font.set("Type", name("Font"));
    font.set("Subtype", name(subtype));
    font.set("BaseFont", name(base_font));
    font.set("Encoding", name("WinAnsiEncoding"));
    font
}

pub fn rgb_image(samples: Vec<u8>) -> Stream {
    let mut image = Dictionary::new();
    image.set("Type", name("XObject"));
    image.set("Subtype", name("Image"));
    image.set("Width", Object::Integer(samples.len() as i64 / 3));
    image.set("Height", Object::Integer(1));
    image.set("ColorSpace", name("DeviceRGB"));
    image.set("BitsPerComponent", Object::Integer(8));
    Stream::new(image, samples)
}

pub fn resources(category: &str, entries: &[(&str, ObjectId)]) -> Dictionary {
    let mut named = Dictionary::new();
    for (key, id) in entries {
        named.set(*key, Object::Reference(*id));
    }
    let mut resources = Dictionary::new();
    resources.set(category, Object::Dictionary(named));
    resources
}

/// Red Helvetica text and a blue stroked rectangle
pub fn sample_document() -> Vec<u8> {
    let mut fixture = FixtureBuilder::new();
    let helvetica = fixture.add_object(font("Type1", "Helvetica"));
    fixture.page(
        "BT /F1 24 Tf 1 0 0 rg 72 700 Td (Red) Tj ET 0 0 1 RG 2 w 72 600 200 50 re S",
        resources("Font", &[("F1", helvetica)]),
    );
    fixture.build()
}

/// A file with a valid TrueType signature, enough for embedding
pub fn fake_font(dir: &Path, file_name: &str) -> PathBuf {
    let path = dir.join(file_name);
    let mut data = vec![0x00, 0x01, 0x00, 0x00];
    data.extend_from_slice(&[0; 60]);
    fs::write(&path, data).expect("failed to write font");
    path
}

pub fn elements_by_page(pdf: &[u8]) -> Vec<Vec<Element>> {
    let doc = Document::load_mem(pdf).expect("failed to load document");
    doc.get_pages()
        .values()
        .map(|&page_id| page_elements(&doc, page_id).expect("failed to read page"))
        .collect()
}
