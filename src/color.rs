//! Colour values, PDF colour spaces and their photographic negatives.
use crate::{
    get, get_contents, maybe_get, object_utils, pdf_to_utf8, Dictionary, Document, Object, PdfError,
    PdfResult,
};
use log::debug;

/// Nesting limit for colour spaces defined in terms of other colour spaces
const MAX_COLORSPACE_DEPTH: usize = 8;

/// Largest palette index an Indexed colour space may declare
const MAX_HIVAL: f64 = 255.;

/// An RGB triplet with channels normalised to 0..=1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0., g: 0., b: 0. };
    pub const WHITE: Rgb = Rgb { r: 1., g: 1., b: 1. };

    pub fn new(r: f64, g: f64, b: f64) -> Rgb {
        Rgb { r, g, b }
    }

    pub fn gray(value: f64) -> Rgb {
        Rgb::new(value, value, value)
    }

    /// Naive device CMYK to RGB, the same conversion viewers use without a colour profile
    pub fn from_cmyk(c: f64, m: f64, y: f64, k: f64) -> Rgb {
        let k = k.clamp(0., 1.);
        Rgb::new(
            (1. - c.clamp(0., 1.)) * (1. - k),
            (1. - m.clamp(0., 1.)) * (1. - k),
            (1. - y.clamp(0., 1.)) * (1. - k),
        )
    }

    pub fn inverted(self) -> Rgb {
        invert(self)
    }

    pub fn components(self) -> [f64; 3] {
        [self.r, self.g, self.b]
    }

    pub fn approx_eq(self, other: Rgb, tolerance: f64) -> bool {
        (self.r - other.r).abs() <= tolerance
            && (self.g - other.g).abs() <= tolerance
            && (self.b - other.b).abs() <= tolerance
    }
}

/// Photographic negative of an RGB colour
pub fn invert(color: Rgb) -> Rgb {
    Rgb::new(invert_gray(color.r), invert_gray(color.g), invert_gray(color.b))
}

/// Single-channel case of [`invert`]
pub fn invert_gray(value: f64) -> f64 {
    1. - value.clamp(0., 1.)
}

/// Type 2 (exponential interpolation) function, the common tint transform
/// for spot colours
#[derive(Clone, Debug, PartialEq)]
pub struct ExponentialFunction {
    domain: [f64; 2],
    c0: Vec<f64>,
    c1: Vec<f64>,
    n: f64,
}

impl ExponentialFunction {
    /// Parse a function dictionary. Only type 2 is evaluated; other types
    /// return `None` and the caller falls back to inverting tints.
    pub fn parse(doc: &Document, obj: &Object) -> PdfResult<Option<ExponentialFunction>> {
        let dict = match object_utils::maybe_deref(doc, obj)? {
            Object::Dictionary(dict) => dict,
            Object::Stream(stream) => &stream.dict,
            _ => return Ok(None),
        };
        let function_type: i64 = get(doc, dict, b"FunctionType")?;
        if function_type != 2 {
            debug!("Tint transform of type {} is not evaluated", function_type);
            return Ok(None);
        }
        Ok(Some(ExponentialFunction {
            domain: maybe_get(doc, dict, b"Domain").unwrap_or([0., 1.]),
            c0: get::<Option<Vec<f64>>>(doc, dict, b"C0")?.unwrap_or_else(|| vec![0.]),
            c1: get::<Option<Vec<f64>>>(doc, dict, b"C1")?.unwrap_or_else(|| vec![1.]),
            n: get(doc, dict, b"N")?,
        }))
    }

    pub fn eval(&self, input: f64) -> Vec<f64> {
        let x = input.clamp(self.domain[0].min(self.domain[1]), self.domain[0].max(self.domain[1]));
        let t = x.powf(self.n);
        self.c0
            .iter()
            .zip(&self.c1)
            .map(|(c0, c1)| c0 + t * (c1 - c0))
            .collect()
    }
}

/// Colour spaces as far as inverting their colour values is concerned
#[derive(Clone, Debug, PartialEq)]
pub enum ColorSpace {
    DeviceGray,
    DeviceRGB,
    DeviceCMYK,
    CalGray,
    CalRGB,
    Lab { range: [f64; 4] },
    ICCBased(usize),
    Indexed {
        base: Box<ColorSpace>,
        hival: usize,
        lookup: Vec<u8>,
    },
    Separation {
        alternate: Box<ColorSpace>,
        tint_transform: Option<ExponentialFunction>,
    },
    DeviceN {
        components: usize,
        alternate: Box<ColorSpace>,
        tint_transform: Option<ExponentialFunction>,
    },
    /// Tiling or shading patterns; the base space is present for uncoloured
    /// patterns, whose `scn` operands carry a colour in that space
    Pattern(Option<Box<ColorSpace>>),
}

/// What to emit in place of a colour-setting operation
#[derive(Clone, Debug, PartialEq)]
pub enum InvertedColor {
    /// Same operator, components replaced
    Components(Vec<f64>),
    /// Replace the operator with `rg`/`RG`
    Rgb(Rgb),
    Unchanged,
}

impl ColorSpace {
    /// Resolve a colour space operand of `cs`/`CS` or an image's `/ColorSpace` name
    pub fn from_name(doc: &Document, name: &[u8], resources: &Dictionary) -> PdfResult<ColorSpace> {
        Self::named(doc, name, resources, 0)
    }

    /// Resolve a colour space stored as a name or array object
    pub fn from_object(
        doc: &Document,
        obj: &Object,
        resources: &Dictionary,
    ) -> PdfResult<ColorSpace> {
        Self::parse(doc, obj, resources, 0)
    }

    fn named(
        doc: &Document,
        name: &[u8],
        resources: &Dictionary,
        depth: usize,
    ) -> PdfResult<ColorSpace> {
        if let Some(cs) = Self::device_space(name) {
            return Ok(cs);
        }
        let colorspaces: Option<&Dictionary> = maybe_get(doc, resources, b"ColorSpace");
        let cs = colorspaces
            .and_then(|spaces| object_utils::maybe_get_obj(doc, spaces, name))
            .ok_or_else(|| {
                PdfError::InvalidStructure(format!("Missing colorspace {}", pdf_to_utf8(name)))
            })?;
        Self::parse(doc, cs, resources, depth + 1)
    }

    fn device_space(name: &[u8]) -> Option<ColorSpace> {
        match name {
            b"DeviceGray" | b"G" => Some(ColorSpace::DeviceGray),
            b"DeviceRGB" | b"RGB" => Some(ColorSpace::DeviceRGB),
            b"DeviceCMYK" | b"CMYK" => Some(ColorSpace::DeviceCMYK),
            b"Pattern" => Some(ColorSpace::Pattern(None)),
            _ => None,
        }
    }

    fn parse(
        doc: &Document,
        obj: &Object,
        resources: &Dictionary,
        depth: usize,
    ) -> PdfResult<ColorSpace> {
        if depth > MAX_COLORSPACE_DEPTH {
            return Err(PdfError::InvalidStructure("Colorspace nesting too deep".to_string()));
        }
        let cs = match object_utils::maybe_deref(doc, obj)? {
            Object::Name(name) => return Self::named(doc, name, resources, depth),
            Object::Array(cs) => cs,
            _ => {
                return Err(PdfError::InvalidStructure(
                    "ColorSpace must be name or array".to_string(),
                ));
            }
        };
        let family = cs.first().and_then(|o| o.as_name().ok()).ok_or_else(|| {
            PdfError::InvalidStructure("ColorSpace array must start with name".to_string())
        })?;
        let arg = |i: usize| {
            cs.get(i).ok_or_else(|| {
                PdfError::InvalidStructure(format!(
                    "{} colorspace is missing entries",
                    pdf_to_utf8(family)
                ))
            })
        };

        match family {
            b"DeviceGray" | b"G" => Ok(ColorSpace::DeviceGray),
            b"DeviceRGB" | b"RGB" => Ok(ColorSpace::DeviceRGB),
            b"DeviceCMYK" | b"CMYK" => Ok(ColorSpace::DeviceCMYK),
            b"Pattern" => match cs.get(1) {
                Some(base) => Ok(ColorSpace::Pattern(Some(Box::new(Self::parse(
                    doc,
                    base,
                    resources,
                    depth + 1,
                )?)))),
                None => Ok(ColorSpace::Pattern(None)),
            },
            b"CalGray" => Ok(ColorSpace::CalGray),
            b"CalRGB" => Ok(ColorSpace::CalRGB),
            b"Lab" => {
                let dict = object_utils::maybe_deref(doc, arg(1)?)?
                    .as_dict()
                    .map_err(|_| PdfError::InvalidStructure("Lab must have dict".to_string()))?;
                let [a_min, a_max, b_min, b_max] =
                    maybe_get(doc, dict, b"Range").unwrap_or([-100., 100., -100., 100.]);
                Ok(ColorSpace::Lab {
                    range: [a_min.min(a_max), a_min.max(a_max), b_min.min(b_max), b_min.max(b_max)],
                })
            }
            b"ICCBased" => {
                let stream = object_utils::maybe_deref(doc, arg(1)?)?
                    .as_stream()
                    .map_err(|_| {
                        PdfError::InvalidStructure("ICCBased must have stream".to_string())
                    })?;
                let n: i64 = get(doc, &stream.dict, b"N")?;
                Ok(ColorSpace::ICCBased(n.max(0) as usize))
            }
            b"Indexed" | b"I" => {
                let base = Self::parse(doc, arg(1)?, resources, depth + 1)?;
                let hival = object_utils::as_num(object_utils::maybe_deref(doc, arg(2)?)?)?;
                let lookup = match object_utils::maybe_deref(doc, arg(3)?)? {
                    Object::String(bytes, _) => bytes.clone(),
                    Object::Stream(stream) => get_contents(stream),
                    _ => {
                        return Err(PdfError::InvalidStructure(
                            "Indexed lookup must be string or stream".to_string(),
                        ));
                    }
                };
                Ok(ColorSpace::Indexed {
                    base: Box::new(base),
                    hival: hival.clamp(0., MAX_HIVAL) as usize,
                    lookup,
                })
            }
            b"Separation" => Ok(ColorSpace::Separation {
                alternate: Box::new(Self::parse(doc, arg(2)?, resources, depth + 1)?),
                tint_transform: ExponentialFunction::parse(doc, arg(3)?)?,
            }),
            b"DeviceN" => {
                let names = object_utils::maybe_deref(doc, arg(1)?)?
                    .as_array()
                    .map_err(|_| {
                        PdfError::InvalidStructure("DeviceN names must be array".to_string())
                    })?;
                Ok(ColorSpace::DeviceN {
                    components: names.len(),
                    alternate: Box::new(Self::parse(doc, arg(2)?, resources, depth + 1)?),
                    tint_transform: ExponentialFunction::parse(doc, arg(3)?)?,
                })
            }
            _ => Err(PdfError::InvalidStructure(format!(
                "Unknown colorspace: {}",
                pdf_to_utf8(family)
            ))),
        }
    }

    pub fn components(&self) -> usize {
        match self {
            ColorSpace::DeviceGray | ColorSpace::CalGray => 1,
            ColorSpace::DeviceRGB | ColorSpace::CalRGB | ColorSpace::Lab { .. } => 3,
            ColorSpace::DeviceCMYK => 4,
            ColorSpace::ICCBased(n) => *n,
            ColorSpace::Indexed { .. } | ColorSpace::Separation { .. } => 1,
            ColorSpace::DeviceN { components, .. } => *components,
            ColorSpace::Pattern(base) => base.as_ref().map_or(0, |base| base.components()),
        }
    }

    /// The colour a `cs`/`CS` operator selects along with the space
    pub fn initial_color(&self) -> Vec<f64> {
        match self {
            ColorSpace::DeviceCMYK | ColorSpace::ICCBased(4) => vec![0., 0., 0., 1.],
            ColorSpace::Lab { range } => {
                vec![0., 0f64.clamp(range[0], range[1]), 0f64.clamp(range[2], range[3])]
            }
            ColorSpace::Separation { .. } => vec![1.],
            ColorSpace::DeviceN { components, .. } => vec![1.; *components],
            ColorSpace::Pattern(_) => Vec::new(),
            other => vec![0.; other.components()],
        }
    }

    /// Express a colour value in RGB, when the space allows it
    pub fn to_rgb(&self, comps: &[f64]) -> Option<Rgb> {
        let c = |i: usize| comps.get(i).copied();
        match self {
            ColorSpace::DeviceGray | ColorSpace::CalGray | ColorSpace::ICCBased(1) => {
                Some(Rgb::gray(c(0)?))
            }
            ColorSpace::DeviceRGB | ColorSpace::CalRGB | ColorSpace::ICCBased(3) => {
                Some(Rgb::new(c(0)?, c(1)?, c(2)?))
            }
            ColorSpace::DeviceCMYK | ColorSpace::ICCBased(4) => {
                Some(Rgb::from_cmyk(c(0)?, c(1)?, c(2)?, c(3)?))
            }
            ColorSpace::Indexed { base, hival, lookup } => {
                let index = c(0)?.round().clamp(0., *hival as f64) as usize;
                let n = base.components();
                let start = index.checked_mul(n)?;
                let entry = lookup.get(start..start.checked_add(n)?)?;
                let values: Vec<f64> = entry.iter().map(|&b| b as f64 / 255.).collect();
                base.to_rgb(&values)
            }
            ColorSpace::Separation { alternate, tint_transform: Some(f) }
            | ColorSpace::DeviceN { alternate, tint_transform: Some(f), .. } => {
                alternate.to_rgb(&f.eval(c(0)?))
            }
            _ => None,
        }
    }

    /// The negative of `comps` in this space, as the rewritten operation should express it
    pub fn invert_color(&self, comps: &[f64]) -> InvertedColor {
        match self {
            ColorSpace::DeviceGray
            | ColorSpace::CalGray
            | ColorSpace::DeviceRGB
            | ColorSpace::CalRGB => {
                InvertedColor::Components(comps.iter().map(|&v| invert_gray(v)).collect())
            }
            ColorSpace::ICCBased(n) if *n != 4 => {
                InvertedColor::Components(comps.iter().map(|&v| invert_gray(v)).collect())
            }
            ColorSpace::DeviceCMYK | ColorSpace::ICCBased(_) | ColorSpace::Indexed { .. } => {
                match self.to_rgb(comps) {
                    Some(rgb) => InvertedColor::Rgb(invert(rgb)),
                    None => {
                        debug!("Colour {:?} has no RGB equivalent in {:?}", comps, self);
                        InvertedColor::Unchanged
                    }
                }
            }
            ColorSpace::Separation { .. } | ColorSpace::DeviceN { .. } => match self.to_rgb(comps) {
                Some(rgb) => InvertedColor::Rgb(invert(rgb)),
                None => InvertedColor::Components(comps.iter().map(|&t| invert_gray(t)).collect()),
            },
            ColorSpace::Lab { range } => {
                let l = comps.first().copied().unwrap_or(0.).clamp(0., 100.);
                let a = comps.get(1).copied().unwrap_or(0.);
                let b = comps.get(2).copied().unwrap_or(0.);
                InvertedColor::Components(vec![
                    100. - l,
                    (-a).clamp(range[0], range[1]),
                    (-b).clamp(range[2], range[3]),
                ])
            }
            ColorSpace::Pattern(Some(base)) if !comps.is_empty() => match base.invert_color(comps) {
                InvertedColor::Components(inverted) => InvertedColor::Components(inverted),
                // the pattern name must stay, so express the negative in the base space
                InvertedColor::Rgb(rgb)
                    if matches!(**base, ColorSpace::DeviceCMYK | ColorSpace::ICCBased(4)) =>
                {
                    InvertedColor::Components(vec![1. - rgb.r, 1. - rgb.g, 1. - rgb.b, 0.])
                }
                _ => {
                    debug!("Uncoloured pattern tint {:?} left unchanged in {:?}", comps, base);
                    InvertedColor::Unchanged
                }
            },
            ColorSpace::Pattern(_) => InvertedColor::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{Stream, StringFormat};

    const EPS: f64 = 1e-9;

    fn ints(values: &[i64]) -> Object {
        Object::Array(values.iter().map(|&v| Object::Integer(v)).collect())
    }

    #[test]
    fn inversion_is_an_involution() {
        let samples = [
            Rgb::new(0., 0., 0.),
            Rgb::new(1., 0., 0.),
            Rgb::new(0.25, 0.5, 0.75),
            Rgb::new(0.1, 0.9, 0.333),
        ];
        for c in samples {
            assert!(invert(invert(c)).approx_eq(c, EPS), "{c:?}");
        }
        assert_eq!(invert(Rgb::new(1., 0., 0.)), Rgb::new(0., 1., 1.));
        assert_eq!(invert(Rgb::new(0., 0., 1.)), Rgb::new(1., 1., 0.));
    }

    #[test]
    fn out_of_range_channels_are_clamped() {
        assert_eq!(invert_gray(1.5), 0.);
        assert_eq!(invert_gray(-0.5), 1.);
        assert_eq!(invert_gray(0.25), 0.75);
    }

    #[test]
    fn cmyk_converts_before_inverting() {
        assert!(Rgb::from_cmyk(0., 0., 0., 1.).approx_eq(Rgb::BLACK, EPS));
        assert!(Rgb::from_cmyk(0., 0., 0., 0.).approx_eq(Rgb::WHITE, EPS));
        assert_eq!(
            ColorSpace::DeviceCMYK.invert_color(&[0., 1., 1., 0.]),
            InvertedColor::Rgb(Rgb::new(0., 1., 1.))
        );
    }

    #[test]
    fn gray_and_rgb_invert_in_place() {
        assert_eq!(
            ColorSpace::DeviceGray.invert_color(&[0.2]),
            InvertedColor::Components(vec![0.8])
        );
        assert_eq!(
            ColorSpace::DeviceRGB.invert_color(&[1., 0., 0.5]),
            InvertedColor::Components(vec![0., 1., 0.5])
        );
        assert_eq!(ColorSpace::Pattern(None).invert_color(&[]), InvertedColor::Unchanged);
    }

    #[test]
    fn initial_colors_are_black_or_full_tint() {
        assert_eq!(ColorSpace::DeviceRGB.initial_color(), vec![0., 0., 0.]);
        assert_eq!(ColorSpace::DeviceCMYK.initial_color(), vec![0., 0., 0., 1.]);
        let sep = ColorSpace::Separation {
            alternate: Box::new(ColorSpace::DeviceGray),
            tint_transform: None,
        };
        assert_eq!(sep.initial_color(), vec![1.]);
    }

    #[test]
    fn indexed_colors_resolve_through_palette() {
        let cs = ColorSpace::Indexed {
            base: Box::new(ColorSpace::DeviceRGB),
            hival: 1,
            lookup: vec![255, 0, 0, 0, 0, 255],
        };
        assert_eq!(cs.to_rgb(&[1.]), Some(Rgb::new(0., 0., 1.)));
        // out of range indices clamp to hival
        assert_eq!(cs.to_rgb(&[7.]), Some(Rgb::new(0., 0., 1.)));
        assert_eq!(cs.invert_color(&[0.]), InvertedColor::Rgb(Rgb::new(0., 1., 1.)));
    }

    #[test]
    fn huge_indexed_values_do_not_overflow() {
        let cs = ColorSpace::Indexed {
            base: Box::new(ColorSpace::DeviceRGB),
            hival: usize::MAX,
            lookup: vec![255, 0, 0],
        };
        assert_eq!(cs.to_rgb(&[1e30]), None);
        assert_eq!(cs.to_rgb(&[0.]), Some(Rgb::new(1., 0., 0.)));

        let doc = Document::with_version("1.5");
        let declared = Object::Array(vec![
            object_utils::name("Indexed"),
            object_utils::name("DeviceRGB"),
            Object::Real(1e30),
            Object::String(vec![0, 0, 255], StringFormat::Hexadecimal),
        ]);
        match ColorSpace::from_object(&doc, &declared, &Dictionary::new()).unwrap() {
            ColorSpace::Indexed { hival, .. } => assert_eq!(hival, 255),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn uncoloured_pattern_inverts_through_its_base() {
        let doc = Document::with_version("1.5");
        let rgb =
            Object::Array(vec![object_utils::name("Pattern"), object_utils::name("DeviceRGB")]);
        let cs = ColorSpace::from_object(&doc, &rgb, &Dictionary::new()).unwrap();
        assert_eq!(cs, ColorSpace::Pattern(Some(Box::new(ColorSpace::DeviceRGB))));
        assert_eq!(cs.components(), 3);
        assert_eq!(cs.invert_color(&[1., 0., 0.]), InvertedColor::Components(vec![0., 1., 1.]));
        assert_eq!(cs.invert_color(&[]), InvertedColor::Unchanged);

        let cmyk = ColorSpace::Pattern(Some(Box::new(ColorSpace::DeviceCMYK)));
        match cmyk.invert_color(&[0., 0., 0., 1.]) {
            InvertedColor::Components(c) => {
                assert!(Rgb::from_cmyk(c[0], c[1], c[2], c[3]).approx_eq(Rgb::WHITE, EPS))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn separation_without_function_inverts_tint() {
        let cs = ColorSpace::Separation {
            alternate: Box::new(ColorSpace::DeviceCMYK),
            tint_transform: None,
        };
        assert_eq!(cs.invert_color(&[0.3]), InvertedColor::Components(vec![0.7]));
    }

    #[test]
    fn parses_separation_with_exponential_tint() {
        let doc = Document::with_version("1.5");
        let mut func = Dictionary::new();
        func.set("FunctionType", Object::Integer(2));
        func.set("Domain", ints(&[0, 1]));
        func.set("C0", ints(&[0, 0, 0, 0]));
        func.set("C1", ints(&[0, 0, 0, 1]));
        func.set("N", Object::Integer(1));
        let cs = Object::Array(vec![
            object_utils::name("Separation"),
            object_utils::name("Black"),
            object_utils::name("DeviceCMYK"),
            Object::Dictionary(func),
        ]);
        let cs = ColorSpace::from_object(&doc, &cs, &Dictionary::new()).unwrap();
        assert!(cs.to_rgb(&[1.]).unwrap().approx_eq(Rgb::BLACK, EPS));
        match cs.invert_color(&[1.]) {
            InvertedColor::Rgb(rgb) => assert!(rgb.approx_eq(Rgb::WHITE, EPS)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_named_resources_and_icc_streams() {
        let mut doc = Document::with_version("1.5");
        let mut icc = Dictionary::new();
        icc.set("N", Object::Integer(4));
        let icc_id = doc.add_object(Stream::new(icc, Vec::new()));
        let mut spaces = Dictionary::new();
        spaces.set(
            "CS0",
            Object::Array(vec![object_utils::name("ICCBased"), Object::Reference(icc_id)]),
        );
        spaces.set(
            "CS1",
            Object::Array(vec![
                object_utils::name("Indexed"),
                object_utils::name("DeviceGray"),
                Object::Integer(1),
                Object::String(vec![0, 255], StringFormat::Hexadecimal),
            ]),
        );
        let mut resources = Dictionary::new();
        resources.set("ColorSpace", Object::Dictionary(spaces));

        assert_eq!(
            ColorSpace::from_name(&doc, b"CS0", &resources).unwrap(),
            ColorSpace::ICCBased(4)
        );
        let indexed = ColorSpace::from_name(&doc, b"CS1", &resources).unwrap();
        assert_eq!(indexed.to_rgb(&[1.]), Some(Rgb::WHITE));
        assert!(ColorSpace::from_name(&doc, b"Missing", &resources).is_err());
    }

    #[test]
    fn lab_reflects_lightness_and_chroma() {
        let cs = ColorSpace::Lab { range: [-100., 100., -100., 100.] };
        assert_eq!(
            cs.invert_color(&[20., 10., -30.]),
            InvertedColor::Components(vec![80., -10., 30.])
        );
    }
}
