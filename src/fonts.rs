//! Fallback fonts for text whose original font cannot be reused.
use crate::{
    maybe_get, maybe_get_name, object_utils, pdf_to_utf8, Dictionary, Document, PdfError, PdfResult,
};
use log::{info, warn};
use std::{
    collections::BTreeMap,
    fmt,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, OnceLock},
};

// The standard 14 fonts every viewer provides
const CORE_FONTS: &[&str] = &[
    "Courier-Bold",
    "Courier-BoldOblique",
    "Courier-Oblique",
    "Courier",
    "Helvetica-Bold",
    "Helvetica-BoldOblique",
    "Helvetica-Oblique",
    "Helvetica",
    "Symbol",
    "Times-Bold",
    "Times-BoldItalic",
    "Times-Italic",
    "Times-Roman",
    "ZapfDingbats",
];

const FONT_FILE_KEYS: [&[u8]; 3] = [b"FontFile", b"FontFile2", b"FontFile3"];

// FontDescriptor /Flags bits
const FLAG_ITALIC: i64 = 1 << 6;
const FLAG_FORCE_BOLD: i64 = 1 << 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FontStyle {
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

impl FontStyle {
    pub const ALL: [FontStyle; 4] = [
        FontStyle::Regular,
        FontStyle::Bold,
        FontStyle::Italic,
        FontStyle::BoldItalic,
    ];

    pub fn from_flags(bold: bool, italic: bool) -> FontStyle {
        match (bold, italic) {
            (true, true) => FontStyle::BoldItalic,
            (true, false) => FontStyle::Bold,
            (false, true) => FontStyle::Italic,
            (false, false) => FontStyle::Regular,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            FontStyle::Regular => "regular",
            FontStyle::Bold => "bold",
            FontStyle::Italic => "italic",
            FontStyle::BoldItalic => "bold_italic",
        }
    }

    pub fn is_bold(self) -> bool {
        matches!(self, FontStyle::Bold | FontStyle::BoldItalic)
    }

    pub fn is_italic(self) -> bool {
        matches!(self, FontStyle::Italic | FontStyle::BoldItalic)
    }

    /// Styles to try, most specific first, always ending with regular
    pub fn attempts(self) -> &'static [FontStyle] {
        match self {
            FontStyle::BoldItalic => &[
                FontStyle::BoldItalic,
                FontStyle::Bold,
                FontStyle::Italic,
                FontStyle::Regular,
            ],
            FontStyle::Bold => &[FontStyle::Bold, FontStyle::Regular],
            FontStyle::Italic => &[FontStyle::Italic, FontStyle::Regular],
            FontStyle::Regular => &[FontStyle::Regular],
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FontStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for FontStyle {
    type Err = PdfError;

    fn from_str(s: &str) -> PdfResult<FontStyle> {
        FontStyle::ALL
            .into_iter()
            .find(|style| style.key() == s)
            .ok_or_else(|| PdfError::InvalidStructure(format!("Unknown font style: {}", s)))
    }
}

/// Style key to font file. Constructed once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackFontMap {
    paths: BTreeMap<FontStyle, PathBuf>,
}

impl FallbackFontMap {
    /// A map with no fonts configured
    pub fn empty() -> FallbackFontMap {
        FallbackFontMap { paths: BTreeMap::new() }
    }

    pub fn with_font<P: Into<PathBuf>>(mut self, style: FontStyle, path: P) -> FallbackFontMap {
        self.paths.insert(style, path.into());
        self
    }

    /// The same file for every style
    pub fn uniform<P: Into<PathBuf>>(path: P) -> FallbackFontMap {
        let path = path.into();
        FontStyle::ALL
            .into_iter()
            .fold(FallbackFontMap::empty(), |map, style| map.with_font(style, path.clone()))
    }

    pub fn path(&self, style: FontStyle) -> Option<&Path> {
        self.paths.get(&style).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FontStyle, &Path)> {
        self.paths.iter().map(|(style, path)| (*style, path.as_path()))
    }

    #[cfg(windows)]
    pub fn platform_default() -> FallbackFontMap {
        FallbackFontMap::empty()
            .with_font(FontStyle::Regular, "C:/Windows/Fonts/arial.ttf")
            .with_font(FontStyle::Bold, "C:/Windows/Fonts/arialbd.ttf")
            .with_font(FontStyle::Italic, "C:/Windows/Fonts/ariali.ttf")
            .with_font(FontStyle::BoldItalic, "C:/Windows/Fonts/arialbi.ttf")
    }

    #[cfg(target_os = "macos")]
    pub fn platform_default() -> FallbackFontMap {
        FallbackFontMap::empty()
            .with_font(FontStyle::Regular, "/System/Library/Fonts/Supplemental/Arial.ttf")
            .with_font(FontStyle::Bold, "/System/Library/Fonts/Supplemental/Arial Bold.ttf")
            .with_font(FontStyle::Italic, "/System/Library/Fonts/Supplemental/Arial Italic.ttf")
            .with_font(
                FontStyle::BoldItalic,
                "/System/Library/Fonts/Supplemental/Arial Bold Italic.ttf",
            )
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    pub fn platform_default() -> FallbackFontMap {
        FallbackFontMap::empty()
            .with_font(FontStyle::Regular, "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf")
            .with_font(FontStyle::Bold, "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf")
            .with_font(FontStyle::Italic, "/usr/share/fonts/truetype/dejavu/DejaVuSans-Oblique.ttf")
            .with_font(
                FontStyle::BoldItalic,
                "/usr/share/fonts/truetype/dejavu/DejaVuSans-BoldOblique.ttf",
            )
    }
}

impl Default for FallbackFontMap {
    fn default() -> FallbackFontMap {
        FallbackFontMap::platform_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontFormat {
    /// glyf outlines, embedded as FontFile2
    TrueType,
    /// CFF outlines in an OpenType wrapper, embedded as FontFile3 /OpenType
    OpenTypeCff,
}

impl FontFormat {
    fn sniff(data: &[u8]) -> Result<FontFormat, String> {
        if data.len() < 12 {
            return Err(format!("file is too short ({} bytes)", data.len()));
        }
        match &data[..4] {
            [0x00, 0x01, 0x00, 0x00] => Ok(FontFormat::TrueType),
            b"true" => Ok(FontFormat::TrueType),
            b"OTTO" => Ok(FontFormat::OpenTypeCff),
            b"ttcf" => Err("font collections cannot be embedded".to_string()),
            other => Err(format!("unrecognised font signature {:02x?}", other)),
        }
    }
}

/// A fallback font file loaded into memory
#[derive(Debug)]
pub struct FallbackFont {
    pub style: FontStyle,
    pub path: PathBuf,
    pub base_font: String,
    pub format: FontFormat,
    pub data: Vec<u8>,
}

impl FallbackFont {
    pub fn load(style: FontStyle, path: &Path) -> PdfResult<FallbackFont> {
        if !path.is_file() {
            return Err(PdfError::MissingFontAsset {
                style,
                path: path.to_path_buf(),
            });
        }
        let invalid = |reason: String| PdfError::InvalidFontAsset {
            style,
            path: path.to_path_buf(),
            reason,
        };
        let data = fs::read(path).map_err(|e| invalid(e.to_string()))?;
        let format = FontFormat::sniff(&data).map_err(invalid)?;
        Ok(FallbackFont {
            style,
            path: path.to_path_buf(),
            base_font: base_font_name(path, style),
            format,
            data,
        })
    }
}

// PDF names for embedded fonts must not contain spaces or delimiters
fn base_font_name(path: &Path, style: FontStyle) -> String {
    let stem: String = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if stem.is_empty() {
        format!("Fallback-{}", style.key())
    } else {
        stem
    }
}

/// Loads fallback fonts on first use. Each style is loaded at most once,
/// failures included, so a missing file is only reported once per resolver.
#[derive(Debug)]
pub struct FontResolver {
    map: FallbackFontMap,
    loaded: [OnceLock<Option<Arc<FallbackFont>>>; 4],
}

impl FontResolver {
    pub fn new(map: FallbackFontMap) -> FontResolver {
        FontResolver {
            map,
            loaded: Default::default(),
        }
    }

    pub fn map(&self) -> &FallbackFontMap {
        &self.map
    }

    fn load(&self, style: FontStyle) -> Option<Arc<FallbackFont>> {
        self.loaded[style.index()]
            .get_or_init(|| {
                let path = self.map.path(style)?;
                match FallbackFont::load(style, path) {
                    Ok(font) => {
                        info!("Loaded fallback font '{}' from {}", style, path.display());
                        Some(Arc::new(font))
                    }
                    Err(e) => {
                        warn!("{}", e);
                        None
                    }
                }
            })
            .clone()
    }

    /// The font configured for exactly `style`
    pub fn resolve(&self, style: FontStyle) -> PdfResult<Arc<FallbackFont>> {
        if let Some(font) = self.load(style) {
            return Ok(font);
        }
        // reload only to report why the cached attempt failed
        let path = self.map.path(style).map(Path::to_path_buf).unwrap_or_default();
        FallbackFont::load(style, &path).map(Arc::new)
    }

    /// The closest loadable font for `style`, degrading towards regular.
    /// Never fails; `None` means no fallback font is usable at all.
    pub fn resolve_or_regular(&self, style: FontStyle) -> Option<Arc<FallbackFont>> {
        for &attempt in style.attempts() {
            if let Some(font) = self.load(attempt) {
                if attempt != style {
                    warn!("No usable '{}' fallback font, using '{}' instead", style, attempt);
                }
                return Some(font);
            }
        }
        warn!("No usable fallback font for style '{}'", style);
        None
    }
}

/// Strip the six-letter subset tag, as in `ABCDEF+Calibri-Bold`
pub fn strip_subset_prefix(name: &str) -> &str {
    match name.split_once('+') {
        Some((tag, rest)) if tag.len() == 6 && tag.chars().all(|c| c.is_ascii_uppercase()) => rest,
        _ => name,
    }
}

pub fn is_core_font(name: &str) -> bool {
    CORE_FONTS.contains(&strip_subset_prefix(name))
}

/// Guess bold/italic from descriptor flags, weight, angle and the font name
pub fn detect_style(
    base_font: &str,
    flags: Option<i64>,
    weight: Option<f64>,
    italic_angle: Option<f64>,
) -> FontStyle {
    let name = base_font.to_lowercase();
    let flags = flags.unwrap_or(0);
    let bold = flags & FLAG_FORCE_BOLD != 0
        || weight.is_some_and(|w| w >= 600.)
        || name.contains("bold")
        || name.contains("-bd");
    let italic = flags & FLAG_ITALIC != 0
        || italic_angle.is_some_and(|a| a.abs() > f64::EPSILON)
        || name.contains("italic")
        || name.contains("oblique")
        || name.contains("-it");
    FontStyle::from_flags(bold, italic)
}

/// What the content stream's `Tf` resource tells us about a font
#[derive(Debug, Clone, PartialEq)]
pub struct FontInfo {
    pub subtype: String,
    pub base_font: Option<String>,
    pub style: FontStyle,
    pub embedded: bool,
}

impl FontInfo {
    pub fn from_dict(doc: &Document, font: &Dictionary) -> FontInfo {
        let subtype = maybe_get_name(doc, font, b"Subtype").map(pdf_to_utf8).unwrap_or_default();
        let base_font = maybe_get_name(doc, font, b"BaseFont").map(pdf_to_utf8);
        let descriptor = font_descriptor(doc, font);
        let embedded = descriptor.is_some_and(|d| FONT_FILE_KEYS.iter().any(|key| d.has(key)));
        let style = detect_style(
            base_font.as_deref().unwrap_or(""),
            descriptor.and_then(|d| maybe_get(doc, d, b"Flags")),
            descriptor.and_then(|d| maybe_get(doc, d, b"FontWeight")),
            descriptor.and_then(|d| maybe_get(doc, d, b"ItalicAngle")),
        );
        FontInfo {
            subtype,
            base_font,
            style,
            embedded,
        }
    }

    /// Whether the font renders correctly in the output as it is
    pub fn is_reusable(&self) -> bool {
        match self.subtype.as_str() {
            "Type3" | "Type0" => true,
            _ => self.embedded || self.base_font.as_deref().is_some_and(is_core_font),
        }
    }
}

/// The font's descriptor; for composite fonts, the descendant's descriptor
pub fn font_descriptor<'a>(doc: &'a Document, font: &'a Dictionary) -> Option<&'a Dictionary> {
    if let Some(descriptor) = maybe_get::<&Dictionary>(doc, font, b"FontDescriptor") {
        return Some(descriptor);
    }
    let descendants = object_utils::maybe_get_obj(doc, font, b"DescendantFonts")?.as_array().ok()?;
    let descendant = object_utils::maybe_deref(doc, descendants.first()?).ok()?.as_dict().ok()?;
    maybe_get(doc, descendant, b"FontDescriptor")
}
