//! Inverting raster images: image XObjects and inline images.
use crate::color::{invert, ColorSpace, Rgb};
use crate::{
    get_contents, maybe_get, object_utils, Dictionary, Document, Object, ObjectId, PdfResult,
    Stream,
};
use log::{debug, warn};
use lopdf::StringFormat;

/// How an image was inverted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageInversion {
    /// Decode ranges swapped, pixel data untouched
    Decode,
    /// Indexed palette replaced by its negative
    Palette,
    /// Samples re-encoded as inverted DeviceRGB
    Pixels,
    /// Stencil masks paint with the fill colour, which is inverted separately
    StencilMask,
    Skipped,
}

// Image dictionaries use full key names in XObjects and abbreviations inline
struct ImageKeys {
    image_mask: &'static [u8],
    color_space: &'static [u8],
    bits: &'static [u8],
    decode: &'static [u8],
    filter: &'static [u8],
}

const XOBJECT_KEYS: ImageKeys = ImageKeys {
    image_mask: b"ImageMask",
    color_space: b"ColorSpace",
    bits: b"BitsPerComponent",
    decode: b"Decode",
    filter: b"Filter",
};

const INLINE_KEYS: ImageKeys = ImageKeys {
    image_mask: b"IM",
    color_space: b"CS",
    bits: b"BPC",
    decode: b"D",
    filter: b"F",
};

enum Plan {
    Decode(Vec<f64>),
    Palette(Object),
    Pixels { decode: Option<Vec<f64>> },
    Leave(ImageInversion),
}

fn plan(
    doc: &Document,
    dict: &Dictionary,
    resources: &Dictionary,
    keys: &ImageKeys,
) -> PdfResult<Plan> {
    if matches!(dict.get(keys.image_mask), Ok(Object::Boolean(true))) {
        return Ok(Plan::Leave(ImageInversion::StencilMask));
    }
    let Some(cs_obj) = object_utils::maybe_get_obj(doc, dict, keys.color_space) else {
        // JPX images may carry their colour space in the codestream
        warn!("Image without colour space left unchanged");
        return Ok(Plan::Leave(ImageInversion::Skipped));
    };
    let cs = ColorSpace::from_object(doc, cs_obj, resources)?;
    let decode: Option<Vec<f64>> = maybe_get(doc, dict, keys.decode);

    match &cs {
        ColorSpace::Indexed { base, hival, lookup } => {
            let Some((base_obj, palette)) = invert_palette(cs_obj, base, lookup) else {
                warn!("Indexed image over {:?} left unchanged", base);
                return Ok(Plan::Leave(ImageInversion::Skipped));
            };
            Ok(Plan::Palette(Object::Array(vec![
                object_utils::name("Indexed"),
                base_obj,
                Object::Integer(*hival as i64),
                Object::String(palette, StringFormat::Hexadecimal),
            ])))
        }
        ColorSpace::DeviceCMYK | ColorSpace::ICCBased(4) => {
            let bits: i64 = maybe_get(doc, dict, keys.bits).unwrap_or(8);
            if bits != 8 {
                warn!("{}-bit CMYK image left unchanged", bits);
                return Ok(Plan::Leave(ImageInversion::Skipped));
            }
            Ok(Plan::Pixels { decode })
        }
        ColorSpace::Pattern(_) => Ok(Plan::Leave(ImageInversion::Skipped)),
        _ => {
            let decode = decode.unwrap_or_else(|| default_decode(&cs));
            Ok(Plan::Decode(swap_ranges(&decode)))
        }
    }
}

fn default_decode(cs: &ColorSpace) -> Vec<f64> {
    match cs {
        ColorSpace::Lab { range } => vec![0., 100., range[0], range[1], range[2], range[3]],
        other => [0., 1.].repeat(other.components()),
    }
}

/// Swap each (min, max) pair so every sample maps to `min + max - v`
pub fn swap_ranges(decode: &[f64]) -> Vec<f64> {
    decode
        .chunks(2)
        .flat_map(|pair| match pair {
            [lo, hi] => vec![*hi, *lo],
            other => other.to_vec(),
        })
        .collect()
}

// Returns the base colour space object for the new palette and its bytes
fn invert_palette(cs_obj: &Object, base: &ColorSpace, lookup: &[u8]) -> Option<(Object, Vec<u8>)> {
    match base {
        ColorSpace::DeviceGray
        | ColorSpace::DeviceRGB
        | ColorSpace::CalGray
        | ColorSpace::CalRGB
        | ColorSpace::ICCBased(1)
        | ColorSpace::ICCBased(3) => {
            let original_base = cs_obj.as_array().ok()?.get(1)?.clone();
            Some((original_base, lookup.iter().map(|b| 255 - b).collect()))
        }
        ColorSpace::DeviceCMYK | ColorSpace::ICCBased(4) => {
            let palette = lookup
                .chunks_exact(4)
                .flat_map(|c| {
                    let rgb = Rgb::from_cmyk(unit(c[0]), unit(c[1]), unit(c[2]), unit(c[3]));
                    to_bytes(invert(rgb))
                })
                .collect();
            Some((object_utils::name("DeviceRGB"), palette))
        }
        _ => None,
    }
}

fn unit(byte: u8) -> f64 {
    byte as f64 / 255.
}

fn to_bytes(rgb: Rgb) -> [u8; 3] {
    rgb.components().map(|v| (v.clamp(0., 1.) * 255.).round() as u8)
}

/// Convert 8-bit CMYK samples to inverted 8-bit RGB, applying the image's
/// Decode ranges first
pub fn invert_cmyk_samples(samples: &[u8], decode: Option<&[f64]>) -> Vec<u8> {
    let component = |value: u8, i: usize| match decode {
        Some(d) if d.len() >= 8 => d[2 * i] + unit(value) * (d[2 * i + 1] - d[2 * i]),
        _ => unit(value),
    };
    samples
        .chunks_exact(4)
        .flat_map(|c| {
            let rgb = Rgb::from_cmyk(
                component(c[0], 0),
                component(c[1], 1),
                component(c[2], 2),
                component(c[3], 3),
            );
            to_bytes(invert(rgb))
        })
        .collect()
}

fn decoded_samples(stream: &Stream) -> Option<Vec<u8>> {
    if stream.dict.get(b"Filter").is_err() {
        return Some(stream.content.clone());
    }
    stream.decompressed_content().ok()
}

/// Invert an image XObject in place
pub fn invert_image(doc: &mut Document, id: ObjectId) -> PdfResult<ImageInversion> {
    let stream = doc.get_object(id)?.as_stream()?;
    let plan = plan(doc, &stream.dict, &Dictionary::new(), &XOBJECT_KEYS)?;

    let samples = match &plan {
        Plan::Pixels { decode } => {
            let Some(samples) = decoded_samples(stream) else {
                warn!("CMYK image {:?} uses a filter that cannot be decoded, left unchanged", id);
                return Ok(ImageInversion::Skipped);
            };
            Some(invert_cmyk_samples(&samples, decode.as_deref()))
        }
        _ => None,
    };

    let stream = doc.get_object_mut(id)?.as_stream_mut()?;
    match plan {
        Plan::Decode(decode) => {
            stream.dict.set(
                XOBJECT_KEYS.decode,
                Object::Array(decode.into_iter().map(object_utils::real).collect()),
            );
            Ok(ImageInversion::Decode)
        }
        Plan::Palette(cs) => {
            stream.dict.set(XOBJECT_KEYS.color_space, cs);
            Ok(ImageInversion::Palette)
        }
        Plan::Pixels { .. } => {
            stream.dict.set(XOBJECT_KEYS.color_space, object_utils::name("DeviceRGB"));
            stream.dict.remove(XOBJECT_KEYS.decode);
            stream.set_plain_content(samples.unwrap_or_default());
            Ok(ImageInversion::Pixels)
        }
        Plan::Leave(outcome) => Ok(outcome),
    }
}

/// Invert an inline image (`BI ... ID ... EI`), whose dictionary lives in the
/// content stream itself
pub fn invert_inline_image(
    doc: &Document,
    image: &mut Stream,
    resources: &Dictionary,
) -> PdfResult<ImageInversion> {
    match plan(doc, &image.dict, resources, &INLINE_KEYS)? {
        Plan::Decode(decode) => {
            image.dict.set(
                INLINE_KEYS.decode,
                Object::Array(decode.into_iter().map(object_utils::real).collect()),
            );
            Ok(ImageInversion::Decode)
        }
        Plan::Palette(cs) => {
            image.dict.set(INLINE_KEYS.color_space, cs);
            Ok(ImageInversion::Palette)
        }
        Plan::Pixels { .. } => {
            if image.dict.has(INLINE_KEYS.filter) {
                debug!("Filtered inline CMYK image left unchanged");
                return Ok(ImageInversion::Skipped);
            }
            let decode: Option<Vec<f64>> = maybe_get(doc, &image.dict, INLINE_KEYS.decode);
            let samples = invert_cmyk_samples(&get_contents(image), decode.as_deref());
            image.dict.set(INLINE_KEYS.color_space, object_utils::name("RGB"));
            image.dict.remove(INLINE_KEYS.decode);
            image.content = samples;
            Ok(ImageInversion::Pixels)
        }
        Plan::Leave(outcome) => Ok(outcome),
    }
}
