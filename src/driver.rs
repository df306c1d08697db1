//! Opening, converting and saving whole documents.
use crate::fonts::{FallbackFontMap, FontResolver};
use crate::transform::{ConversionStats, PageTransformer};
use crate::{Document, PdfError, PdfResult};
use log::{error, info};
use lopdf::encryption::DecryptionError;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const OUTPUT_PREFIX: &str = "output_";

/// Settings for one conversion
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub fonts: FallbackFontMap,
    /// Tried instead of the empty password for encrypted input
    pub password: Option<String>,
    /// Paint the negative of the white paper behind each page
    pub paint_background: bool,
    /// Compress streams before saving
    pub compress: bool,
}

impl Default for ConvertOptions {
    fn default() -> ConvertOptions {
        ConvertOptions {
            fonts: FallbackFontMap::platform_default(),
            password: None,
            paint_background: true,
            compress: true,
        }
    }
}

impl ConvertOptions {
    pub fn with_fonts(mut self, fonts: FallbackFontMap) -> ConvertOptions {
        self.fonts = fonts;
        self
    }

    pub fn with_password<S: Into<String>>(mut self, password: S) -> ConvertOptions {
        self.password = Some(password.into());
        self
    }

    pub fn paint_background(mut self, paint: bool) -> ConvertOptions {
        self.paint_background = paint;
        self
    }

    pub fn compress(mut self, compress: bool) -> ConvertOptions {
        self.compress = compress;
        self
    }
}

/// Converts documents with one set of fallback fonts. Fonts are loaded on
/// first use and reused for every document converted afterwards.
#[derive(Debug)]
pub struct Converter {
    resolver: FontResolver,
    password: Option<String>,
    paint_background: bool,
    compress: bool,
}

impl Converter {
    pub fn new(options: &ConvertOptions) -> Converter {
        Converter {
            resolver: FontResolver::new(options.fonts.clone()),
            password: options.password.clone(),
            paint_background: options.paint_background,
            compress: options.compress,
        }
    }

    pub fn fonts(&self) -> &FontResolver {
        &self.resolver
    }

    fn password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    /// Convert `input` and save it alongside as `output_<name>`, returning the
    /// output path
    pub fn darken_file<P: AsRef<Path>>(&self, input: P) -> PdfResult<PathBuf> {
        let output = output_path(&input)?;
        self.darken_file_to(input, &output)?;
        Ok(output)
    }

    pub fn darken_file_to<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input: P,
        output: Q,
    ) -> PdfResult<ConversionStats> {
        let (input, output) = (input.as_ref(), output.as_ref());
        let mut doc = open_document_encrypted(input, self.password())?;
        let stats = convert_document(&mut doc, self)?;
        if self.compress {
            doc.compress();
        }
        save_document(&mut doc, output)?;
        info!("Wrote {}", output.display());
        Ok(stats)
    }

    pub fn darken_mem(&self, buffer: &[u8]) -> PdfResult<Vec<u8>> {
        let mut doc = Document::load_mem(buffer).map_err(open_error("<memory>".to_string()))?;
        maybe_decrypt(&mut doc, self.password()).map_err(open_error("<memory>".to_string()))?;
        convert_document(&mut doc, self)?;
        if self.compress {
            doc.compress();
        }
        serialize(&mut doc).map_err(|source| PdfError::DocumentWrite {
            path: PathBuf::from("<memory>"),
            source,
        })
    }
}

fn maybe_decrypt(doc: &mut Document, password: &str) -> Result<(), lopdf::Error> {
    if !doc.is_encrypted() {
        return Ok(());
    }

    if let Err(e) = doc.decrypt(password) {
        if let lopdf::Error::Decryption(DecryptionError::IncorrectPassword) = e {
            error!("Encrypted documents must be decrypted with a password");
        }
        return Err(e);
    }

    Ok(())
}

fn open_error(input: String) -> impl FnOnce(lopdf::Error) -> PdfError {
    move |source| PdfError::DocumentOpen { input, source }
}

pub fn open_document<P: AsRef<Path>>(path: P) -> PdfResult<Document> {
    open_document_encrypted(path, "")
}

pub fn open_document_encrypted<P: AsRef<Path>>(path: P, password: &str) -> PdfResult<Document> {
    let path = path.as_ref();
    let input = path.display().to_string();
    let mut doc = Document::load(path).map_err(open_error(input.clone()))?;
    maybe_decrypt(&mut doc, password).map_err(open_error(input))?;
    Ok(doc)
}

pub fn open_document_from_mem(buffer: &[u8]) -> PdfResult<Document> {
    let mut doc = Document::load_mem(buffer).map_err(open_error("<memory>".to_string()))?;
    maybe_decrypt(&mut doc, "").map_err(open_error("<memory>".to_string()))?;
    Ok(doc)
}

/// Rewrite every page of `doc` in page order
pub fn convert_document(doc: &mut Document, converter: &Converter) -> PdfResult<ConversionStats> {
    let mut transformer =
        PageTransformer::new(&converter.resolver).paint_background(converter.paint_background);
    for (page_num, page_id) in doc.get_pages() {
        transformer.transform_page(doc, page_num, page_id)?;
    }

    let stats = transformer.stats();
    info!(
        "Converted {} pages: {} colour operators, {} text spans, {} paths, {} forms, \
         {} images inverted ({} skipped), {} fonts substituted",
        stats.pages,
        stats.color_operators,
        stats.text_spans,
        stats.paths,
        stats.forms,
        stats.images_inverted,
        stats.images_skipped,
        stats.fonts_substituted
    );
    Ok(stats)
}

fn serialize(doc: &mut Document) -> io::Result<Vec<u8>> {
    doc.prune_objects();
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).map_err(|e| io::Error::other(e.to_string()))?;
    Ok(buffer)
}

/// Save `doc` to `path`. The document is written next to the target first
/// and renamed into place, so a failed save leaves no output behind.
pub fn save_document<P: AsRef<Path>>(doc: &mut Document, path: P) -> PdfResult<()> {
    let path = path.as_ref();
    let write_error = |source| PdfError::DocumentWrite {
        path: path.to_path_buf(),
        source,
    };
    let buffer = serialize(doc).map_err(write_error)?;

    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);
    if let Err(e) = fs::write(&part, &buffer).and_then(|_| fs::rename(&part, path)) {
        let _ = fs::remove_file(&part);
        return Err(write_error(e));
    }
    Ok(())
}

/// `dir/output_<name>` for an input `dir/<name>`
pub fn output_path<P: AsRef<Path>>(input: P) -> PdfResult<PathBuf> {
    let input = input.as_ref();
    let name = input
        .file_name()
        .ok_or_else(|| PdfError::InvalidPath(input.to_path_buf()))?;
    let mut output_name = OsString::from(OUTPUT_PREFIX);
    output_name.push(name);
    Ok(input.with_file_name(output_name))
}

/// One-off form of [`Converter::darken_file`]. Fallback fonts are loaded
/// again on every call; keep a [`Converter`] to convert several files.
pub fn darken_file<P: AsRef<Path>>(input: P, options: &ConvertOptions) -> PdfResult<PathBuf> {
    Converter::new(options).darken_file(input)
}

pub fn darken_file_to<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    options: &ConvertOptions,
) -> PdfResult<ConversionStats> {
    Converter::new(options).darken_file_to(input, output)
}

pub fn darken_mem(buffer: &[u8], options: &ConvertOptions) -> PdfResult<Vec<u8>> {
    Converter::new(options).darken_mem(buffer)
}
