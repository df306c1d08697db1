// Dark mode conversion for PDF documents
use encoding_rs::{UTF_16BE, WINDOWS_1252};
use lopdf::content::Operation;
use std::path::PathBuf;
use thiserror::Error;

pub use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

pub mod color;
pub mod driver;
pub mod elements;
pub mod fonts;
pub mod images;
pub mod transform;

pub use color::{invert, invert_gray, ColorSpace, Rgb};
pub use driver::{
    convert_document, darken_file, darken_file_to, darken_mem, open_document,
    open_document_encrypted, open_document_from_mem, output_path, save_document, ConvertOptions,
    Converter,
};
pub use elements::{page_elements, Element, FontRef, ImageElement, TextSpan, VectorPath};
pub use fonts::{FallbackFont, FallbackFontMap, FontResolver, FontStyle};
pub use transform::{ConversionStats, PageTransformer};

/// Errors raised while opening, converting or saving a document
#[derive(Error, Debug)]
pub enum PdfError {
    #[error("Cannot open document {input}: {source}")]
    DocumentOpen {
        input: String,
        source: lopdf::Error,
    },

    #[error("Cannot write document {}: {source}", path.display())]
    DocumentWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Fallback font for style '{style}' not found: {}", path.display())]
    MissingFontAsset {
        style: FontStyle,
        path: PathBuf,
    },

    #[error("Fallback font for style '{style}' at {} is not loadable: {reason}", path.display())]
    InvalidFontAsset {
        style: FontStyle,
        path: PathBuf,
        reason: String,
    },

    #[error("Cannot transform page {page}: {message}")]
    ElementTransform { page: u32, message: String },

    #[error("PDF parsing error: {0}")]
    Parse(#[from] lopdf::Error),

    #[error("Invalid PDF structure: {0}")]
    InvalidStructure(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Input path has no file name: {}", .0.display())]
    InvalidPath(PathBuf),
}

impl PdfError {
    /// Attach a page number to structural errors raised while rewriting a page.
    pub fn on_page(self, page: u32) -> PdfError {
        match self {
            PdfError::ElementTransform { .. }
            | PdfError::DocumentOpen { .. }
            | PdfError::DocumentWrite { .. } => self,
            other => PdfError::ElementTransform {
                page,
                message: other.to_string(),
            },
        }
    }
}

pub type PdfResult<T> = std::result::Result<T, PdfError>;

/// Object dereferencing and extraction utilities
pub mod object_utils {
    use super::*;

    /// Dereference an object if it's a reference
    pub fn maybe_deref<'a>(doc: &'a Document, obj: &'a Object) -> PdfResult<&'a Object> {
        match obj {
            Object::Reference(r) => doc.get_object(*r).map_err(PdfError::Parse),
            _ => Ok(obj),
        }
    }

    /// Look up `key` in `dict`, following a reference if needed
    pub fn maybe_get_obj<'a>(
        doc: &'a Document,
        dict: &'a Dictionary,
        key: &[u8],
    ) -> Option<&'a Object> {
        dict.get(key).ok().and_then(|o| maybe_deref(doc, o).ok())
    }

    pub fn as_num(obj: &Object) -> PdfResult<f64> {
        match obj {
            Object::Integer(i) => Ok(*i as f64),
            Object::Real(f) => Ok((*f).into()),
            _ => Err(PdfError::InvalidStructure("Expected number".to_string())),
        }
    }

    pub fn real(value: f64) -> Object {
        Object::Real(value as f32)
    }

    pub fn name(value: &str) -> Object {
        Object::Name(value.as_bytes().to_vec())
    }

    /// Resolve a dictionary entry that may be stored directly or by reference,
    /// returning an owned copy.
    pub fn owned_dict(doc: &Document, obj: &Object) -> PdfResult<Dictionary> {
        maybe_deref(doc, obj)?
            .as_dict()
            .cloned()
            .map_err(|_| PdfError::InvalidStructure("Expected dictionary".to_string()))
    }
}

/// Operand access for content stream operations
pub mod operands {
    use super::*;

    pub fn operand<'a>(op: &'a Operation, index: usize) -> PdfResult<&'a Object> {
        op.operands.get(index).ok_or_else(|| {
            PdfError::InvalidStructure(format!(
                "{} requires at least {} operands",
                op.operator,
                index + 1
            ))
        })
    }

    pub fn num(op: &Operation, index: usize) -> PdfResult<f64> {
        object_utils::as_num(operand(op, index)?)
    }

    pub fn name<'a>(op: &'a Operation, index: usize) -> PdfResult<&'a [u8]> {
        operand(op, index)?.as_name().map_err(|_| {
            PdfError::InvalidStructure(format!("{} requires name operand", op.operator))
        })
    }

    /// All numeric operands, stopping at the first non-number (a pattern name for `scn`).
    pub fn leading_numbers(op: &Operation) -> PdfResult<Vec<f64>> {
        op.operands
            .iter()
            .take_while(|o| matches!(o, Object::Integer(_) | Object::Real(_)))
            .map(object_utils::as_num)
            .collect()
    }

    pub fn exact_numbers(op: &Operation, count: usize) -> PdfResult<Vec<f64>> {
        if op.operands.len() != count {
            return Err(PdfError::InvalidStructure(format!(
                "{} requires {} operands",
                op.operator, count
            )));
        }
        op.operands.iter().map(object_utils::as_num).collect()
    }
}

/// Decode a PDF name or text string for logging and element reports
pub fn pdf_to_utf8(s: &[u8]) -> String {
    if s.len() >= 2 && s[0] == 0xfe && s[1] == 0xff {
        let (text, _) = UTF_16BE.decode_without_bom_handling(&s[2..]);
        text.into_owned()
    } else {
        let (text, _, _) = WINDOWS_1252.decode(s);
        text.into_owned()
    }
}

trait FromOptObj<'a>: Sized {
    fn from_opt_obj(doc: &'a Document, obj: Option<&'a Object>, key: &[u8]) -> PdfResult<Self>;
}

trait FromObj<'a>: Sized {
    fn from_obj(doc: &'a Document, obj: &'a Object) -> PdfResult<Self>;
}

impl<'a, T: FromObj<'a>> FromOptObj<'a> for Option<T> {
    fn from_opt_obj(doc: &'a Document, obj: Option<&'a Object>, _key: &[u8]) -> PdfResult<Self> {
        obj.map(|o| T::from_obj(doc, o)).transpose()
    }
}

impl<'a, T: FromObj<'a>> FromOptObj<'a> for T {
    fn from_opt_obj(doc: &'a Document, obj: Option<&'a Object>, key: &[u8]) -> PdfResult<Self> {
        obj.ok_or_else(|| PdfError::MissingField(String::from_utf8_lossy(key).to_string()))
            .and_then(|o| T::from_obj(doc, o))
    }
}

impl<'a, T: FromObj<'a>> FromObj<'a> for Vec<T> {
    fn from_obj(doc: &'a Document, obj: &'a Object) -> PdfResult<Self> {
        object_utils::maybe_deref(doc, obj)?
            .as_array()
            .map_err(|_| PdfError::InvalidStructure("Expected array".to_string()))?
            .iter()
            .map(|x| T::from_obj(doc, x))
            .collect()
    }
}

impl<'a, T: FromObj<'a>, const N: usize> FromObj<'a> for [T; N] {
    fn from_obj(doc: &'a Document, obj: &'a Object) -> PdfResult<Self> {
        Vec::<T>::from_obj(doc, obj)?.try_into().map_err(|v: Vec<T>| {
            PdfError::InvalidStructure(format!("Expected array of length {}, got {}", N, v.len()))
        })
    }
}

impl<'a> FromObj<'a> for f64 {
    fn from_obj(doc: &'a Document, obj: &'a Object) -> PdfResult<Self> {
        object_utils::as_num(object_utils::maybe_deref(doc, obj)?)
    }
}

impl<'a> FromObj<'a> for i64 {
    fn from_obj(doc: &'a Document, obj: &'a Object) -> PdfResult<Self> {
        match object_utils::maybe_deref(doc, obj)? {
            Object::Integer(i) => Ok(*i),
            _ => Err(PdfError::InvalidStructure("Expected integer".to_string())),
        }
    }
}

impl<'a> FromObj<'a> for &'a Dictionary {
    fn from_obj(doc: &'a Document, obj: &'a Object) -> PdfResult<&'a Dictionary> {
        object_utils::maybe_deref(doc, obj)?
            .as_dict()
            .map_err(|_| PdfError::InvalidStructure("Expected dictionary".to_string()))
    }
}

impl<'a> FromObj<'a> for &'a Stream {
    fn from_obj(doc: &'a Document, obj: &'a Object) -> PdfResult<&'a Stream> {
        object_utils::maybe_deref(doc, obj)?
            .as_stream()
            .map_err(|_| PdfError::InvalidStructure("Expected stream".to_string()))
    }
}

impl<'a> FromObj<'a> for &'a Object {
    fn from_obj(doc: &'a Document, obj: &'a Object) -> PdfResult<&'a Object> {
        object_utils::maybe_deref(doc, obj)
    }
}

fn get<'a, T: FromOptObj<'a>>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> PdfResult<T> {
    T::from_opt_obj(doc, dict.get(key).ok(), key)
}

fn maybe_get<'a, T: FromObj<'a>>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<T> {
    object_utils::maybe_get_obj(doc, dict, key).and_then(|o| T::from_obj(doc, o).ok())
}

fn maybe_get_name<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    object_utils::maybe_get_obj(doc, dict, key).and_then(|n| n.as_name().ok())
}

/// Look up a page attribute, walking up the page tree for inheritable keys
fn get_inherited<'a, T: FromObj<'a>>(
    doc: &'a Document,
    dict: &'a Dictionary,
    key: &[u8],
) -> Option<T> {
    if let Some(o) = maybe_get(doc, dict, key) {
        return Some(o);
    }
    let parent = dict.get(b"Parent").ok()?.as_reference().ok()?;
    let parent_dict = doc.get_dictionary(parent).ok()?;
    get_inherited(doc, parent_dict, key)
}

/// Raw stream bytes with filters removed, or the stored bytes when the
/// stream has no filter or uses one lopdf cannot decode.
fn get_contents(stream: &Stream) -> Vec<u8> {
    if stream.dict.get(b"Filter").is_err() {
        return stream.content.clone();
    }
    stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone())
}
