//! Rewriting a page for dark mode.
//!
//! Every colour-setting operator of the page content is replaced by the
//! negative colour, images and Form XObjects reached through `Do` are
//! inverted once per object, and fonts that would not render in the output
//! are rebound to an embedded fallback font.
use crate::color::{invert_gray, ColorSpace, InvertedColor, Rgb};
use crate::fonts::{font_descriptor, FallbackFont, FontFormat, FontInfo, FontResolver, FontStyle};
use crate::images::{invert_image, invert_inline_image, ImageInversion};
use crate::object_utils::{name, owned_dict, real};
use crate::{
    get, get_contents, get_inherited, maybe_get, maybe_get_name, operands, pdf_to_utf8, Dictionary,
    Document, Object, ObjectId, PdfError, PdfResult, Stream,
};
use log::{debug, warn};
use lopdf::content::{Content, Operation};
use std::collections::{HashMap, HashSet};

/// Marked-content tag around the painted background
pub const BACKGROUND_TAG: &[u8] = b"DarkBackground";

const FLAG_NONSYMBOLIC: i64 = 1 << 5;
const FLAG_ITALIC: i64 = 1 << 6;

/// Counters collected while converting a document
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConversionStats {
    pub pages: usize,
    pub color_operators: usize,
    pub text_spans: usize,
    pub paths: usize,
    pub forms: usize,
    pub images_inverted: usize,
    pub images_skipped: usize,
    pub fonts_substituted: usize,
}

#[derive(Clone)]
struct ColorState {
    fill: ColorSpace,
    stroke: ColorSpace,
}

impl Default for ColorState {
    fn default() -> ColorState {
        ColorState {
            fill: ColorSpace::DeviceGray,
            stroke: ColorSpace::DeviceGray,
        }
    }
}

impl ColorState {
    fn space(&self, stroking: bool) -> &ColorSpace {
        if stroking { &self.stroke } else { &self.fill }
    }

    fn set(&mut self, stroking: bool, space: ColorSpace) {
        if stroking {
            self.stroke = space;
        } else {
            self.fill = space;
        }
    }
}

/// The resource dictionary a content stream is rewritten against
struct Scope {
    resources: Dictionary,
    modified: bool,
    checked_fonts: HashSet<Vec<u8>>,
}

impl Scope {
    fn new(resources: Dictionary) -> Scope {
        Scope {
            resources,
            modified: false,
            checked_fonts: HashSet::new(),
        }
    }
}

/// Rewrites pages of one document. Keep a single transformer per document so
/// shared images, forms and substituted fonts are handled once.
pub struct PageTransformer<'r> {
    fonts: &'r FontResolver,
    paint_background: bool,
    images: HashMap<ObjectId, ImageInversion>,
    forms: HashSet<ObjectId>,
    font_replacements: HashMap<ObjectId, ObjectId>,
    font_files: HashMap<FontStyle, ObjectId>,
    stats: ConversionStats,
}

impl<'r> PageTransformer<'r> {
    pub fn new(fonts: &'r FontResolver) -> PageTransformer<'r> {
        PageTransformer {
            fonts,
            paint_background: true,
            images: HashMap::new(),
            forms: HashSet::new(),
            font_replacements: HashMap::new(),
            font_files: HashMap::new(),
            stats: ConversionStats::default(),
        }
    }

    pub fn paint_background(mut self, paint: bool) -> PageTransformer<'r> {
        self.paint_background = paint;
        self
    }

    pub fn stats(&self) -> ConversionStats {
        self.stats
    }

    /// Rewrite one page. Any structural problem is reported as
    /// [`PdfError::ElementTransform`] for `page_num`.
    pub fn transform_page(
        &mut self,
        doc: &mut Document,
        page_num: u32,
        page_id: ObjectId,
    ) -> PdfResult<()> {
        self.rewrite_page(doc, page_id).map_err(|e| e.on_page(page_num))?;
        self.stats.pages += 1;
        Ok(())
    }

    fn rewrite_page(&mut self, doc: &mut Document, page_id: ObjectId) -> PdfResult<()> {
        let page = doc.get_dictionary(page_id)?;
        let media_box: [f64; 4] = get_inherited(doc, page, b"MediaBox")
            .ok_or_else(|| PdfError::MissingField("MediaBox".to_string()))?;
        let resources = get_inherited::<&Dictionary>(doc, page, b"Resources")
            .cloned()
            .unwrap_or_default();
        let content = doc.get_page_content(page_id)?;

        let mut operations = Vec::new();
        if self.paint_background {
            operations.extend(background(media_box));
        }
        // the default colour is black in both modes
        operations.push(Operation::new("g", vec![real(invert_gray(0.))]));
        operations.push(Operation::new("G", vec![real(invert_gray(0.))]));

        let mut scope = Scope::new(resources);
        operations.extend(self.rewrite(doc, &content, &mut scope, ColorState::default())?);

        let data = Content { operations }.encode()?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), data));
        let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
        page.set("Contents", Object::Reference(content_id));
        if scope.modified {
            page.set("Resources", Object::Dictionary(scope.resources));
        }
        Ok(())
    }

    fn rewrite(
        &mut self,
        doc: &mut Document,
        content: &[u8],
        scope: &mut Scope,
        mut colors: ColorState,
    ) -> PdfResult<Vec<Operation>> {
        let content = Content::decode(content)
            .map_err(|e| PdfError::InvalidStructure(format!("Failed to decode content: {:?}", e)))?;

        let mut stack = Vec::new();
        let mut output = Vec::with_capacity(content.operations.len());
        for mut op in content.operations {
            match op.operator.as_ref() {
                "q" => stack.push(colors.clone()),
                "Q" => match stack.pop() {
                    Some(saved) => colors = saved,
                    None => warn!("Unbalanced Q in content stream"),
                },
                "g" | "G" => {
                    let gray = operands::exact_numbers(&op, 1)?;
                    op.operands = vec![real(invert_gray(gray[0]))];
                    colors.set(op.operator == "G", ColorSpace::DeviceGray);
                    self.stats.color_operators += 1;
                }
                "rg" | "RG" => {
                    let c = operands::exact_numbers(&op, 3)?;
                    op.operands = rgb_operands(Rgb::new(c[0], c[1], c[2]).inverted());
                    colors.set(op.operator == "RG", ColorSpace::DeviceRGB);
                    self.stats.color_operators += 1;
                }
                "k" | "K" => {
                    let c = operands::exact_numbers(&op, 4)?;
                    let stroking = op.operator == "K";
                    op = set_rgb(stroking, Rgb::from_cmyk(c[0], c[1], c[2], c[3]).inverted());
                    colors.set(stroking, ColorSpace::DeviceCMYK);
                    self.stats.color_operators += 1;
                }
                "cs" | "CS" => {
                    let stroking = op.operator == "CS";
                    let space =
                        ColorSpace::from_name(doc, operands::name(&op, 0)?, &scope.resources)?;
                    let initial = set_color(stroking, &space, &space.initial_color());
                    colors.set(stroking, space);
                    output.push(op);
                    output.extend(initial);
                    self.stats.color_operators += 1;
                    continue;
                }
                "sc" | "scn" | "SC" | "SCN" => {
                    let stroking = op.operator.starts_with('S');
                    let values = operands::leading_numbers(&op)?;
                    if !values.is_empty() {
                        match colors.space(stroking).invert_color(&values) {
                            InvertedColor::Components(inverted) => {
                                replace_leading_numbers(&mut op, inverted)
                            }
                            InvertedColor::Rgb(rgb) => op = set_rgb(stroking, rgb),
                            InvertedColor::Unchanged => debug!("Pattern colour left unchanged"),
                        }
                    }
                    self.stats.color_operators += 1;
                }
                "Tf" => self.check_font(doc, scope, operands::name(&op, 0)?)?,
                "Tj" | "TJ" | "'" | "\"" => self.stats.text_spans += 1,
                "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => self.stats.paths += 1,
                "Do" => self.do_xobject(doc, scope, operands::name(&op, 0)?, &colors)?,
                "BI" => {
                    if let Some(Object::Stream(image)) = op.operands.first_mut() {
                        let outcome = invert_inline_image(doc, image, &scope.resources)?;
                        self.count_image(outcome);
                    }
                }
                "sh" => debug!("Shading left unchanged"),
                _ => {}
            }
            output.push(op);
        }
        Ok(output)
    }

    fn count_image(&mut self, outcome: ImageInversion) {
        match outcome {
            ImageInversion::Skipped => self.stats.images_skipped += 1,
            _ => self.stats.images_inverted += 1,
        }
    }

    fn do_xobject(
        &mut self,
        doc: &mut Document,
        scope: &mut Scope,
        xobject: &[u8],
        colors: &ColorState,
    ) -> PdfResult<()> {
        let id = {
            let xobjects: &Dictionary = get(doc, &scope.resources, b"XObject")?;
            let entry = xobjects
                .get(xobject)
                .map_err(|_| PdfError::MissingField(format!("XObject {}", pdf_to_utf8(xobject))))?;
            match entry.as_reference() {
                Ok(id) => id,
                Err(_) => {
                    debug!("Direct XObject {} left unchanged", pdf_to_utf8(xobject));
                    return Ok(());
                }
            }
        };
        let subtype = {
            let stream = doc.get_object(id)?.as_stream()?;
            maybe_get_name(doc, &stream.dict, b"Subtype").map(<[u8]>::to_vec)
        };

        match subtype.as_deref() {
            Some(b"Image") => {
                if !self.images.contains_key(&id) {
                    let outcome = invert_image(doc, id)?;
                    debug!("Image {:?}: {:?}", id, outcome);
                    self.images.insert(id, outcome);
                    self.count_image(outcome);
                }
            }
            Some(b"Form") => {
                if self.forms.insert(id) {
                    self.rewrite_form(doc, id, &scope.resources, colors)?;
                }
            }
            other => debug!("XObject of subtype {:?} left unchanged", other.map(pdf_to_utf8)),
        }
        Ok(())
    }

    fn rewrite_form(
        &mut self,
        doc: &mut Document,
        id: ObjectId,
        parent_resources: &Dictionary,
        colors: &ColorState,
    ) -> PdfResult<()> {
        let (content, resources) = {
            let stream = doc.get_object(id)?.as_stream()?;
            let resources = maybe_get::<&Dictionary>(doc, &stream.dict, b"Resources")
                .unwrap_or(parent_resources)
                .clone();
            (get_contents(stream), resources)
        };

        let mut scope = Scope::new(resources);
        let operations = self.rewrite(doc, &content, &mut scope, colors.clone())?;
        let data = Content { operations }.encode()?;

        let stream = doc.get_object_mut(id)?.as_stream_mut()?;
        stream.set_plain_content(data);
        if scope.modified {
            stream.dict.set("Resources", Object::Dictionary(scope.resources));
        }
        self.stats.forms += 1;
        Ok(())
    }

    fn check_font(
        &mut self,
        doc: &mut Document,
        scope: &mut Scope,
        resource: &[u8],
    ) -> PdfResult<()> {
        if !scope.checked_fonts.insert(resource.to_vec()) {
            return Ok(());
        }
        let entry = maybe_get::<&Dictionary>(doc, &scope.resources, b"Font")
            .and_then(|fonts| fonts.get(resource).ok())
            .cloned();
        let (original_id, original) = match entry {
            Some(Object::Reference(id)) => (Some(id), doc.get_dictionary(id).ok().cloned()),
            Some(Object::Dictionary(dict)) => (None, Some(dict)),
            _ => (None, None),
        };
        let info = original.as_ref().map(|font| FontInfo::from_dict(doc, font));
        if info.as_ref().is_some_and(FontInfo::is_reusable) {
            return Ok(());
        }

        let cached = original_id.and_then(|id| self.font_replacements.get(&id).copied());
        let replacement = match cached {
            Some(replacement) => replacement,
            None => {
                let style = match &info {
                    Some(info) => {
                        debug!(
                            "Font {} ({}) is not embedded, substituting",
                            pdf_to_utf8(resource),
                            info.base_font.as_deref().unwrap_or("unnamed")
                        );
                        info.style
                    }
                    None => {
                        warn!("Font resource {} is missing, substituting", pdf_to_utf8(resource));
                        FontStyle::Regular
                    }
                };
                let Some(fallback) = self.fonts.resolve_or_regular(style) else {
                    warn!("Keeping original font {}", pdf_to_utf8(resource));
                    return Ok(());
                };
                let replacement = self.substitute_font(doc, original.as_ref(), &fallback);
                if let Some(id) = original_id {
                    self.font_replacements.insert(id, replacement);
                }
                self.stats.fonts_substituted += 1;
                replacement
            }
        };

        let mut fonts = match scope.resources.get(b"Font") {
            Ok(obj) => owned_dict(doc, obj)?,
            Err(_) => Dictionary::new(),
        };
        fonts.set(resource.to_vec(), Object::Reference(replacement));
        scope.resources.set("Font", Object::Dictionary(fonts));
        scope.modified = true;
        Ok(())
    }

    /// Add a simple font dictionary embedding `fallback`, keeping the
    /// original's encoding and widths so the shown strings stay valid.
    fn substitute_font(
        &mut self,
        doc: &mut Document,
        original: Option<&Dictionary>,
        fallback: &FallbackFont,
    ) -> ObjectId {
        let file_id = match self.font_files.get(&fallback.style) {
            Some(&id) => id,
            None => {
                let id = doc.add_object(font_file(fallback));
                self.font_files.insert(fallback.style, id);
                id
            }
        };
        let original_descriptor = original.and_then(|font| font_descriptor(doc, font)).cloned();

        let mut descriptor = Dictionary::new();
        descriptor.set("Type", name("FontDescriptor"));
        descriptor.set("FontName", name(&fallback.base_font));
        let mut flags = FLAG_NONSYMBOLIC;
        if fallback.style.is_italic() {
            flags |= FLAG_ITALIC;
        }
        descriptor.set("Flags", Object::Integer(flags));
        let italic_angle = if fallback.style.is_italic() { -12 } else { 0 };
        let stem_v = if fallback.style.is_bold() { 140 } else { 80 };
        let bbox = [-200, -250, 1200, 950].into_iter().map(Object::Integer).collect();
        let metrics = [
            ("FontBBox", Object::Array(bbox)),
            ("ItalicAngle", Object::Integer(italic_angle)),
            ("Ascent", Object::Integer(900)),
            ("Descent", Object::Integer(-250)),
            ("CapHeight", Object::Integer(700)),
            ("StemV", Object::Integer(stem_v)),
        ];
        for (key, default) in metrics {
            let value = original_descriptor
                .as_ref()
                .and_then(|d| d.get(key.as_bytes()).ok())
                .cloned()
                .unwrap_or(default);
            descriptor.set(key, value);
        }
        let (file_key, subtype) = match fallback.format {
            FontFormat::TrueType => ("FontFile2", "TrueType"),
            FontFormat::OpenTypeCff => ("FontFile3", "Type1"),
        };
        descriptor.set(file_key, Object::Reference(file_id));
        let descriptor_id = doc.add_object(descriptor);

        let mut font = Dictionary::new();
        font.set("Type", name("Font"));
        font.set("Subtype", name(subtype));
        font.set("BaseFont", name(&fallback.base_font));
        font.set("FontDescriptor", Object::Reference(descriptor_id));
        let encoding = original
            .and_then(|font| font.get(b"Encoding").ok())
            .cloned()
            .unwrap_or_else(|| name("WinAnsiEncoding"));
        font.set("Encoding", encoding);
        if let Some(original) = original {
            for key in ["FirstChar", "LastChar", "Widths"] {
                if let Ok(value) = original.get(key.as_bytes()) {
                    font.set(key, value.clone());
                }
            }
        }
        doc.add_object(font)
    }
}

fn font_file(fallback: &FallbackFont) -> Stream {
    let mut dict = Dictionary::new();
    match fallback.format {
        FontFormat::TrueType => dict.set("Length1", Object::Integer(fallback.data.len() as i64)),
        FontFormat::OpenTypeCff => dict.set("Subtype", name("OpenType")),
    };
    Stream::new(dict, fallback.data.clone())
}

/// The negative of the white paper, drawn below everything else
fn background(media_box: [f64; 4]) -> Vec<Operation> {
    let [llx, lly, urx, ury] = media_box;
    let paper = Rgb::WHITE.inverted();
    vec![
        Operation::new("q", vec![]),
        Operation::new("BMC", vec![Object::Name(BACKGROUND_TAG.to_vec())]),
        Operation::new("rg", rgb_operands(paper)),
        Operation::new(
            "re",
            vec![
                real(llx.min(urx)),
                real(lly.min(ury)),
                real((urx - llx).abs()),
                real((ury - lly).abs()),
            ],
        ),
        Operation::new("f", vec![]),
        Operation::new("EMC", vec![]),
        Operation::new("Q", vec![]),
    ]
}

fn rgb_operands(color: Rgb) -> Vec<Object> {
    color.components().into_iter().map(real).collect()
}

fn set_rgb(stroking: bool, color: Rgb) -> Operation {
    Operation::new(if stroking { "RG" } else { "rg" }, rgb_operands(color))
}

/// Operations that set the negative of `values` in `space`
fn set_color(stroking: bool, space: &ColorSpace, values: &[f64]) -> Option<Operation> {
    match space.invert_color(values) {
        InvertedColor::Components(inverted) => Some(Operation::new(
            if stroking { "SCN" } else { "scn" },
            inverted.into_iter().map(real).collect(),
        )),
        InvertedColor::Rgb(rgb) => Some(set_rgb(stroking, rgb)),
        InvertedColor::Unchanged => None,
    }
}

// keeps a trailing pattern name in place
fn replace_leading_numbers(op: &mut Operation, values: Vec<f64>) {
    let rest: Vec<Object> = op
        .operands
        .iter()
        .skip_while(|o| matches!(o, Object::Integer(_) | Object::Real(_)))
        .cloned()
        .collect();
    op.operands = values.into_iter().map(real).chain(rest).collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::FallbackFontMap;
    use crate::object_utils::as_num;
    use std::path::Path;

    fn add_page(doc: &mut Document, content: &str, resources: Dictionary) -> ObjectId {
        let content = Stream::new(Dictionary::new(), content.as_bytes().to_vec());
        let content_id = doc.add_object(content);
        let mut page = Dictionary::new();
        page.set("Type", name("Page"));
        let media_box = [0, 0, 612, 792].into_iter().map(Object::Integer).collect();
        page.set("MediaBox", Object::Array(media_box));
        page.set("Contents", Object::Reference(content_id));
        page.set("Resources", Object::Dictionary(resources));
        doc.add_object(page)
    }

    fn operations(doc: &Document, page_id: ObjectId) -> Vec<(String, Vec<f64>)> {
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        content
            .operations
            .iter()
            .map(|op| {
                let numbers = op.operands.iter().filter_map(|o| as_num(o).ok()).collect();
                (op.operator.clone(), numbers)
            })
            .collect()
    }

    fn find<'a>(ops: &'a [(String, Vec<f64>)], operator: &str) -> Vec<&'a Vec<f64>> {
        ops.iter().filter(|(o, _)| o == operator).map(|(_, v)| v).collect()
    }

    fn write_font(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("Fallback-Regular.ttf");
        let mut data = vec![0x00, 0x01, 0x00, 0x00];
        data.extend_from_slice(&[0; 60]);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn inverts_device_colours_and_paints_background() {
        let mut doc = Document::with_version("1.5");
        let page_id = add_page(&mut doc, "1 0 0 rg 0 0 1 RG 0.25 g 0 0 0 1 k", Dictionary::new());
        let resolver = FontResolver::new(FallbackFontMap::empty());
        let mut transformer = PageTransformer::new(&resolver);
        transformer.transform_page(&mut doc, 1, page_id).unwrap();

        let ops = operations(&doc, page_id);
        assert_eq!(ops[0].0, "q");
        assert_eq!(ops[1].0, "BMC");
        assert_eq!(find(&ops, "re")[0], &vec![0., 0., 612., 792.]);
        let fills = find(&ops, "rg");
        assert_eq!(fills[0], &vec![0., 0., 0.]);
        assert_eq!(fills[1], &vec![0., 1., 1.]);
        assert_eq!(fills[2], &vec![1., 1., 1.]);
        assert_eq!(find(&ops, "RG")[0], &vec![1., 1., 0.]);
        assert_eq!(find(&ops, "g"), vec![&vec![1.], &vec![0.75]]);
        assert!(find(&ops, "k").is_empty());
        assert_eq!(transformer.stats().color_operators, 4);
    }

    #[test]
    fn initial_colour_is_set_after_colour_space_change() {
        let mut doc = Document::with_version("1.5");
        let page_id = add_page(
            &mut doc,
            "/DeviceRGB cs 0 0 0 1 re f /DeviceRGB cs 0.2 0.4 0.6 sc",
            Dictionary::new(),
        );
        let resolver = FontResolver::new(FallbackFontMap::empty());
        PageTransformer::new(&resolver)
            .paint_background(false)
            .transform_page(&mut doc, 1, page_id)
            .unwrap();

        let ops = operations(&doc, page_id);
        let names: Vec<&str> = ops.iter().map(|(o, _)| o.as_str()).collect();
        assert_eq!(names, vec!["g", "G", "cs", "scn", "re", "f", "cs", "scn", "sc"]);
        assert_eq!(ops[3].1, vec![1., 1., 1.]);
        let last = &ops[8].1;
        for (value, expected) in last.iter().zip([0.8, 0.6, 0.4]) {
            assert!((value - expected).abs() < 1e-6, "{last:?}");
        }
    }

    #[test]
    fn shared_image_is_inverted_once() {
        let mut doc = Document::with_version("1.5");
        let mut image = Dictionary::new();
        image.set("Type", name("XObject"));
        image.set("Subtype", name("Image"));
        image.set("Width", Object::Integer(1));
        image.set("Height", Object::Integer(1));
        image.set("ColorSpace", name("DeviceRGB"));
        image.set("BitsPerComponent", Object::Integer(8));
        let image_id = doc.add_object(Stream::new(image, vec![255, 0, 0]));
        let mut xobjects = Dictionary::new();
        xobjects.set("Im0", Object::Reference(image_id));
        let mut resources = Dictionary::new();
        resources.set("XObject", Object::Dictionary(xobjects));

        let first = add_page(&mut doc, "q 10 0 0 10 0 0 cm /Im0 Do Q", resources.clone());
        let second = add_page(&mut doc, "/Im0 Do", resources);
        let resolver = FontResolver::new(FallbackFontMap::empty());
        let mut transformer = PageTransformer::new(&resolver);
        transformer.transform_page(&mut doc, 1, first).unwrap();
        transformer.transform_page(&mut doc, 2, second).unwrap();

        let stream = doc.get_object(image_id).unwrap().as_stream().unwrap();
        let decode: Vec<f64> = stream
            .dict
            .get(b"Decode")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|o| as_num(o).unwrap())
            .collect();
        assert_eq!(decode, vec![1., 0., 1., 0., 1., 0.]);
        assert_eq!(transformer.stats().images_inverted, 1);
        assert_eq!(transformer.stats().pages, 2);
    }

    #[test]
    fn non_embedded_font_is_rebound_to_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let map = FallbackFontMap::empty().with_font(FontStyle::Regular, write_font(dir.path()));
        let resolver = FontResolver::new(map);

        let mut doc = Document::with_version("1.5");
        let mut calibri = Dictionary::new();
        calibri.set("Type", name("Font"));
        calibri.set("Subtype", name("TrueType"));
        calibri.set("BaseFont", name("Calibri"));
        calibri.set("Encoding", name("WinAnsiEncoding"));
        let calibri_id = doc.add_object(calibri);
        let mut helvetica = Dictionary::new();
        helvetica.set("Type", name("Font"));
        helvetica.set("Subtype", name("Type1"));
        helvetica.set("BaseFont", name("Helvetica"));
        let helvetica_id = doc.add_object(helvetica);
        let mut fonts = Dictionary::new();
        fonts.set("F1", Object::Reference(calibri_id));
        fonts.set("F2", Object::Reference(helvetica_id));
        let mut resources = Dictionary::new();
        resources.set("Font", Object::Dictionary(fonts));
        let page_id = add_page(&mut doc, "BT /F1 12 Tf (a) Tj /F2 12 Tf (b) Tj ET", resources);

        let mut transformer = PageTransformer::new(&resolver);
        transformer.transform_page(&mut doc, 1, page_id).unwrap();

        let page = doc.get_dictionary(page_id).unwrap();
        let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
        let fonts = resources.get(b"Font").unwrap().as_dict().unwrap();
        let f1 = fonts.get(b"F1").unwrap().as_reference().unwrap();
        assert_ne!(f1, calibri_id);
        assert_eq!(fonts.get(b"F2").unwrap().as_reference().unwrap(), helvetica_id);

        let replacement = doc.get_dictionary(f1).unwrap();
        assert_eq!(replacement.get(b"BaseFont").unwrap().as_name().unwrap(), b"Fallback-Regular");
        let descriptor = doc
            .get_dictionary(replacement.get(b"FontDescriptor").unwrap().as_reference().unwrap())
            .unwrap();
        assert!(descriptor.has(b"FontFile2"));
        assert_eq!(transformer.stats().fonts_substituted, 1);
    }

    #[test]
    fn cmyk_components_after_k_become_rgb() {
        let mut doc = Document::with_version("1.5");
        let page_id = add_page(
            &mut doc,
            "0 0 0 1 k 0 0 10 10 re f 1 0 0 0 sc 0 0 10 10 re f 0 0 0 0 K 0 0 0 1 SC",
            Dictionary::new(),
        );
        let resolver = FontResolver::new(FallbackFontMap::empty());
        PageTransformer::new(&resolver)
            .paint_background(false)
            .transform_page(&mut doc, 1, page_id)
            .unwrap();

        let ops = operations(&doc, page_id);
        assert_eq!(find(&ops, "rg"), vec![&vec![1., 1., 1.], &vec![1., 0., 0.]]);
        assert_eq!(find(&ops, "RG"), vec![&vec![0., 0., 0.], &vec![1., 1., 1.]]);
        assert!(find(&ops, "sc").is_empty());
        assert!(find(&ops, "SC").is_empty());
    }

    #[test]
    fn uncoloured_pattern_keeps_its_name() {
        let mut doc = Document::with_version("1.5");
        let mut spaces = Dictionary::new();
        spaces.set("CS0", Object::Array(vec![name("Pattern"), name("DeviceRGB")]));
        let mut resources = Dictionary::new();
        resources.set("ColorSpace", Object::Dictionary(spaces));
        let page_id = add_page(&mut doc, "/CS0 cs 1 0 0 /P0 scn 0 0 10 10 re f", resources);
        let resolver = FontResolver::new(FallbackFontMap::empty());
        PageTransformer::new(&resolver)
            .paint_background(false)
            .transform_page(&mut doc, 1, page_id)
            .unwrap();

        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        let names: Vec<&str> = content.operations.iter().map(|op| op.operator.as_str()).collect();
        assert_eq!(names, vec!["g", "G", "cs", "scn", "re", "f"]);
        let scn = &content.operations[3].operands;
        let values: Vec<f64> = scn.iter().filter_map(|o| as_num(o).ok()).collect();
        assert_eq!(values, vec![0., 1., 1.]);
        assert_eq!(scn.last().unwrap().as_name().unwrap(), b"P0");
    }

    #[test]
    fn missing_media_box_names_the_page() {
        let mut doc = Document::with_version("1.5");
        let content_id = doc.add_object(Stream::new(Dictionary::new(), b"0 g".to_vec()));
        let mut page = Dictionary::new();
        page.set("Type", name("Page"));
        page.set("Contents", Object::Reference(content_id));
        let page_id = doc.add_object(page);

        let resolver = FontResolver::new(FallbackFontMap::empty());
        let err = PageTransformer::new(&resolver).transform_page(&mut doc, 2, page_id).unwrap_err();
        assert!(matches!(err, PdfError::ElementTransform { page: 2, .. }));
    }

    #[test]
    fn missing_operands_are_reported() {
        let mut doc = Document::with_version("1.5");
        let page_id = add_page(&mut doc, "1 0 rg", Dictionary::new());
        let resolver = FontResolver::new(FallbackFontMap::empty());
        let err = PageTransformer::new(&resolver).transform_page(&mut doc, 4, page_id).unwrap_err();
        match err {
            PdfError::ElementTransform { page, message } => {
                assert_eq!(page, 4);
                assert!(message.contains("rg"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
