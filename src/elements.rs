//! A read-only view of the drawable elements on a page.
//!
//! The scanner follows the graphics state through a content stream the same
//! way a viewer does, and records one [`Element`] per painting operation with
//! the colour it is painted in. Form XObjects are expanded in place, so the
//! elements of a page appear in painting order.
use crate::color::{ColorSpace, Rgb};
use crate::fonts::{FontInfo, FontStyle};
use crate::transform::BACKGROUND_TAG;
use crate::{
    get_contents, get_inherited, maybe_get, object_utils, operands, pdf_to_utf8, Dictionary,
    Document, Object, ObjectId, PdfError, PdfResult, Stream,
};
use euclid::{point2, Transform2D};
use log::{debug, warn};
use lopdf::content::{Content, Operation};

pub struct PdfSpace;
pub type PdfTransform = Transform2D<f64, PdfSpace, PdfSpace>;

const MAX_FORM_DEPTH: usize = 32;

/// Font used by a text span, as referenced from the page resources
#[derive(Debug, Clone, PartialEq)]
pub struct FontRef {
    pub resource: String,
    pub base_font: Option<String>,
    pub style: FontStyle,
    pub embedded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    pub font: Option<FontRef>,
    pub size: f64,
    /// Start of the span in default user space
    pub origin: (f64, f64),
    /// `None` when painted with a pattern
    pub color: Option<Rgb>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorPath {
    pub operator: String,
    pub fill: Option<Rgb>,
    pub stroke: Option<Rgb>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageElement {
    pub name: String,
    /// `None` for inline images
    pub id: Option<ObjectId>,
    pub origin: (f64, f64),
    pub color_space: Option<ColorSpace>,
    pub decode: Option<Vec<f64>>,
    pub image_mask: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Text(TextSpan),
    Path(VectorPath),
    Image(ImageElement),
}

impl Element {
    /// The colour the element is painted in, if it has a single one
    pub fn color(&self) -> Option<Rgb> {
        match self {
            Element::Text(span) => span.color,
            Element::Path(path) => path.fill.or(path.stroke),
            Element::Image(_) => None,
        }
    }
}

#[derive(Clone)]
struct GraphicsState {
    ctm: PdfTransform,
    fill_space: ColorSpace,
    fill: Vec<f64>,
    stroke_space: ColorSpace,
    stroke: Vec<f64>,
    font: Option<FontRef>,
    font_size: f64,
    render_mode: i64,
}

impl GraphicsState {
    fn new() -> GraphicsState {
        GraphicsState {
            ctm: Transform2D::identity(),
            fill_space: ColorSpace::DeviceGray,
            fill: vec![0.],
            stroke_space: ColorSpace::DeviceGray,
            stroke: vec![0.],
            font: None,
            font_size: 0.,
            render_mode: 0,
        }
    }

    fn fill_rgb(&self) -> Option<Rgb> {
        self.fill_space.to_rgb(&self.fill)
    }

    fn stroke_rgb(&self) -> Option<Rgb> {
        self.stroke_space.to_rgb(&self.stroke)
    }

    fn set_space(&mut self, stroking: bool, space: ColorSpace) {
        let initial = space.initial_color();
        if stroking {
            self.stroke_space = space;
            self.stroke = initial;
        } else {
            self.fill_space = space;
            self.fill = initial;
        }
    }

    fn set_color(&mut self, stroking: bool, space: Option<ColorSpace>, values: Vec<f64>) {
        if let Some(space) = space {
            self.set_space(stroking, space);
        }
        if stroking {
            self.stroke = values;
        } else {
            self.fill = values;
        }
    }
}

fn matrix(op: &Operation) -> PdfResult<PdfTransform> {
    let m = operands::exact_numbers(op, 6)?;
    Ok(Transform2D::new(m[0], m[1], m[2], m[3], m[4], m[5]))
}

fn origin(m: &PdfTransform) -> (f64, f64) {
    let p = m.transform_point(point2(0., 0.));
    (p.x, p.y)
}

struct Scanner<'a> {
    doc: &'a Document,
    elements: Vec<Element>,
    forms: Vec<ObjectId>,
}

impl<'a> Scanner<'a> {
    fn scan(
        &mut self,
        content: &[u8],
        resources: &Dictionary,
        mut gs: GraphicsState,
    ) -> PdfResult<()> {
        let content = Content::decode(content)
            .map_err(|e| PdfError::InvalidStructure(format!("Failed to decode content: {:?}", e)))?;
        let doc = self.doc;

        let mut gs_stack = Vec::new();
        let mut mc_stack: Vec<bool> = Vec::new();
        let mut tm = PdfTransform::identity();
        let mut tlm = PdfTransform::identity();
        let mut leading = 0.;

        for op in &content.operations {
            let hidden = mc_stack.iter().any(|&background| background);
            match op.operator.as_ref() {
                "q" => gs_stack.push(gs.clone()),
                "Q" => match gs_stack.pop() {
                    Some(saved) => gs = saved,
                    None => warn!("No state to pop"),
                },
                "cm" => gs.ctm = matrix(op)?.then(&gs.ctm),
                "CS" | "cs" => {
                    let space = ColorSpace::from_name(doc, operands::name(op, 0)?, resources)?;
                    gs.set_space(op.operator == "CS", space);
                }
                "SC" | "SCN" | "sc" | "scn" => {
                    let stroking = op.operator.starts_with('S');
                    gs.set_color(stroking, None, operands::leading_numbers(op)?);
                }
                "G" | "g" => {
                    let values = operands::exact_numbers(op, 1)?;
                    gs.set_color(op.operator == "G", Some(ColorSpace::DeviceGray), values);
                }
                "RG" | "rg" => {
                    let values = operands::exact_numbers(op, 3)?;
                    gs.set_color(op.operator == "RG", Some(ColorSpace::DeviceRGB), values);
                }
                "K" | "k" => {
                    let values = operands::exact_numbers(op, 4)?;
                    gs.set_color(op.operator == "K", Some(ColorSpace::DeviceCMYK), values);
                }
                "BT" => {
                    tm = PdfTransform::identity();
                    tlm = tm;
                }
                "Tm" => {
                    tlm = matrix(op)?;
                    tm = tlm;
                }
                "Td" | "TD" => {
                    let tx = operands::num(op, 0)?;
                    let ty = operands::num(op, 1)?;
                    if op.operator == "TD" {
                        leading = -ty;
                    }
                    tlm = Transform2D::translation(tx, ty).then(&tlm);
                    tm = tlm;
                }
                "TL" => leading = operands::num(op, 0)?,
                "T*" => {
                    tlm = Transform2D::translation(0., -leading).then(&tlm);
                    tm = tlm;
                }
                "Tr" => gs.render_mode = operands::num(op, 0)? as i64,
                "Tf" => {
                    let name = operands::name(op, 0)?;
                    gs.font = Some(font_ref(doc, resources, name));
                    gs.font_size = operands::num(op, 1)?;
                }
                "Tj" | "TJ" | "'" | "\"" => {
                    if op.operator != "Tj" && op.operator != "TJ" {
                        tlm = Transform2D::translation(0., -leading).then(&tlm);
                        tm = tlm;
                    }
                    if !hidden {
                        let color = match gs.render_mode {
                            1 => gs.stroke_rgb(),
                            _ => gs.fill_rgb(),
                        };
                        let span = TextSpan {
                            text: shown_text(op),
                            font: gs.font.clone(),
                            size: gs.font_size,
                            origin: origin(&tm.then(&gs.ctm)),
                            color,
                        };
                        self.elements.push(Element::Text(span));
                    }
                }
                "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => {
                    if !hidden {
                        let (fill, stroke) = match op.operator.as_ref() {
                            "S" | "s" => (None, gs.stroke_rgb()),
                            "f" | "F" | "f*" => (gs.fill_rgb(), None),
                            _ => (gs.fill_rgb(), gs.stroke_rgb()),
                        };
                        self.elements.push(Element::Path(VectorPath {
                            operator: op.operator.clone(),
                            fill,
                            stroke,
                        }));
                    }
                }
                "BMC" | "BDC" => {
                    let tag = operands::name(op, 0).unwrap_or_default();
                    mc_stack.push(tag == BACKGROUND_TAG);
                }
                "EMC" => {
                    mc_stack.pop();
                }
                "Do" => {
                    let name = operands::name(op, 0)?;
                    self.do_xobject(resources, name, &gs)?;
                }
                "BI" => {
                    if let Some(Object::Stream(image)) = op.operands.first() {
                        let image = inline_image(doc, image, resources, &gs);
                        self.elements.push(Element::Image(image));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn do_xobject(
        &mut self,
        resources: &Dictionary,
        name: &[u8],
        gs: &GraphicsState,
    ) -> PdfResult<()> {
        let doc = self.doc;
        let xobjects: &Dictionary = crate::get(doc, resources, b"XObject")?;
        let entry = xobjects
            .get(name)
            .map_err(|_| PdfError::MissingField(format!("XObject {}", pdf_to_utf8(name))))?;
        let id = entry.as_reference().ok();
        let stream: &Stream = crate::get(doc, xobjects, name)?;

        match maybe_get::<&Object>(doc, &stream.dict, b"Subtype").and_then(|o| o.as_name().ok()) {
            Some(b"Image") => {
                self.elements.push(Element::Image(ImageElement {
                    name: pdf_to_utf8(name),
                    id,
                    origin: origin(&gs.ctm),
                    color_space: object_utils::maybe_get_obj(doc, &stream.dict, b"ColorSpace")
                        .and_then(|cs| ColorSpace::from_object(doc, cs, resources).ok()),
                    decode: maybe_get(doc, &stream.dict, b"Decode"),
                    image_mask: matches!(stream.dict.get(b"ImageMask"), Ok(Object::Boolean(true))),
                }));
            }
            Some(b"Form") => {
                let recursive = id.is_some_and(|id| self.forms.contains(&id));
                if self.forms.len() >= MAX_FORM_DEPTH || recursive {
                    warn!("Skipping recursive form XObject {}", pdf_to_utf8(name));
                    return Ok(());
                }
                let form_matrix = maybe_get::<[f64; 6]>(doc, &stream.dict, b"Matrix")
                    .map(|m| Transform2D::new(m[0], m[1], m[2], m[3], m[4], m[5]))
                    .unwrap_or_else(PdfTransform::identity);
                let mut form_gs = gs.clone();
                form_gs.ctm = form_matrix.then(&gs.ctm);
                let form_resources =
                    maybe_get::<&Dictionary>(doc, &stream.dict, b"Resources").unwrap_or(resources);

                self.forms.push(id.unwrap_or((0, 0)));
                let result = self.scan(&get_contents(stream), form_resources, form_gs);
                self.forms.pop();
                result?;
            }
            other => debug!("Ignoring XObject of subtype {:?}", other.map(pdf_to_utf8)),
        }
        Ok(())
    }
}

fn font_ref(doc: &Document, resources: &Dictionary, name: &[u8]) -> FontRef {
    let font = maybe_get::<&Dictionary>(doc, resources, b"Font")
        .and_then(|fonts| maybe_get::<&Dictionary>(doc, fonts, name));
    match font {
        Some(font) => {
            let info = FontInfo::from_dict(doc, font);
            FontRef {
                resource: pdf_to_utf8(name),
                base_font: info.base_font,
                style: info.style,
                embedded: info.embedded,
            }
        }
        None => FontRef {
            resource: pdf_to_utf8(name),
            base_font: None,
            style: FontStyle::Regular,
            embedded: false,
        },
    }
}

fn shown_text(op: &Operation) -> String {
    let mut text = String::new();
    for operand in &op.operands {
        match operand {
            Object::String(s, _) => text.push_str(&pdf_to_utf8(s)),
            Object::Array(parts) => {
                for part in parts {
                    if let Object::String(s, _) = part {
                        text.push_str(&pdf_to_utf8(s));
                    }
                }
            }
            _ => {}
        }
    }
    text
}

fn inline_image(
    doc: &Document,
    image: &Stream,
    resources: &Dictionary,
    gs: &GraphicsState,
) -> ImageElement {
    ImageElement {
        name: "inline".to_string(),
        id: None,
        origin: origin(&gs.ctm),
        color_space: object_utils::maybe_get_obj(doc, &image.dict, b"CS")
            .and_then(|cs| ColorSpace::from_object(doc, cs, resources).ok()),
        decode: maybe_get(doc, &image.dict, b"D"),
        image_mask: matches!(image.dict.get(b"IM"), Ok(Object::Boolean(true))),
    }
}

/// The elements painted on a page, in painting order. The dark background
/// added by the conversion is not reported.
pub fn page_elements(doc: &Document, page_id: ObjectId) -> PdfResult<Vec<Element>> {
    let page = doc.get_dictionary(page_id)?;
    let empty_resources = Dictionary::new();
    let resources: &Dictionary = get_inherited(doc, page, b"Resources").unwrap_or(&empty_resources);
    let content = doc.get_page_content(page_id)?;

    let mut scanner = Scanner {
        doc,
        elements: Vec::new(),
        forms: Vec::new(),
    };
    scanner.scan(&content, resources, GraphicsState::new())?;
    Ok(scanner.elements)
}
