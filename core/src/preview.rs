//! Buffer classification and rendering.
//!
//! Data-carrying hooks hand this module a raw byte view of the user's
//! buffer plus the element class worked out from the MPI datatype or the
//! HDF5 type introspection calls. It produces the human-readable pieces
//! of a [`CallRecord`](crate::record::CallRecord): a truncated preview of
//! the leading elements, and min/max over the whole buffer for numeric
//! classes.
//!
//! Everything here is safe code over `&[u8]`; carving that slice out of a
//! C pointer is the caller's problem.

use crate::config::Config;

/// Element class of an intercepted buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    /// Character data; rendered as lossy UTF-8 text.
    Char,
    /// Untyped bytes; rendered as hex.
    Byte,
    /// Fixed-width integer.
    Int { width: usize, signed: bool },
    /// IEEE float, 4 or 8 bytes wide.
    Float { width: usize },
    /// Recognized size only; no rendering beyond the byte count.
    Unknown { elem_size: usize },
}

impl ValueClass {
    /// Bytes per element.
    pub fn elem_size(&self) -> usize {
        match *self {
            ValueClass::Char | ValueClass::Byte => 1,
            ValueClass::Int { width, .. } => width,
            ValueClass::Float { width } => width,
            ValueClass::Unknown { elem_size } => elem_size,
        }
    }

    /// Short C-flavored name used in log lines and trace records.
    pub fn label(&self) -> &'static str {
        match *self {
            ValueClass::Char => "char",
            ValueClass::Byte => "byte",
            ValueClass::Int { width: 2, signed: true } => "short",
            ValueClass::Int { width: 4, signed: true } => "int",
            ValueClass::Int { width: 8, signed: true } => "long",
            ValueClass::Int { width: 2, signed: false } => "ushort",
            ValueClass::Int { width: 4, signed: false } => "uint",
            ValueClass::Int { width: 8, signed: false } => "ulong",
            ValueClass::Int { signed: true, .. } => "int8",
            ValueClass::Int { signed: false, .. } => "uint8",
            ValueClass::Float { width: 4 } => "float",
            ValueClass::Float { .. } => "double",
            ValueClass::Unknown { .. } => "unknown",
        }
    }
}

/// Knobs for [`render`], lifted from the config.
#[derive(Debug, Clone, Copy)]
pub struct RenderOpts {
    /// Maximum elements in a numeric preview.
    pub limit: usize,
    /// Maximum characters in a text preview.
    pub max_chars: usize,
    /// Scan the whole buffer for min/max. Skipped when off because the
    /// buffer can be far larger than the previewed head.
    pub minmax: bool,
}

impl From<&Config> for RenderOpts {
    fn from(cfg: &Config) -> Self {
        Self {
            limit: cfg.preview_limit,
            max_chars: cfg.max_chars,
            minmax: cfg.minmax,
        }
    }
}

/// Output of [`render`]; fields map straight onto the call record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rendered {
    pub preview: Option<String>,
    pub min: Option<String>,
    pub max: Option<String>,
}

/// Render up to `count` elements of `buf` according to `class`.
///
/// The element count is clamped to what `buf` actually holds, so a
/// misreported count degrades the output instead of panicking.
pub fn render(class: ValueClass, buf: &[u8], count: usize, opts: &RenderOpts) -> Rendered {
    match class {
        ValueClass::Char => render_chars(buf, count, opts.max_chars),
        ValueClass::Byte => render_bytes(buf, count, opts.limit),
        ValueClass::Int { width: 1, signed: true } => {
            scan_ord(buf, count, opts, |b| b[0] as i8)
        }
        ValueClass::Int { width: 2, signed: true } => {
            scan_ord(buf, count, opts, |b| i16::from_ne_bytes([b[0], b[1]]))
        }
        ValueClass::Int { width: 4, signed: true } => scan_ord(buf, count, opts, |b| {
            i32::from_ne_bytes([b[0], b[1], b[2], b[3]])
        }),
        ValueClass::Int { width: 8, signed: true } => scan_ord(buf, count, opts, |b| {
            i64::from_ne_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        }),
        ValueClass::Int { width: 1, signed: false } => {
            scan_ord(buf, count, opts, |b| b[0])
        }
        ValueClass::Int { width: 2, signed: false } => {
            scan_ord(buf, count, opts, |b| u16::from_ne_bytes([b[0], b[1]]))
        }
        ValueClass::Int { width: 4, signed: false } => scan_ord(buf, count, opts, |b| {
            u32::from_ne_bytes([b[0], b[1], b[2], b[3]])
        }),
        ValueClass::Int { width: 8, signed: false } => scan_ord(buf, count, opts, |b| {
            u64::from_ne_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        }),
        ValueClass::Float { width: 4 } => scan_float(buf, 4, count, opts, |b| {
            f32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f64
        }),
        ValueClass::Float { width: 8 } => scan_float(buf, 8, count, opts, |b| {
            f64::from_ne_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        }),
        // Odd widths and unrecognized classes get a hex peek at the head.
        _ => render_bytes(buf, buf.len(), opts.limit),
    }
}

fn clamp_count(buf: &[u8], elem_size: usize, count: usize) -> usize {
    if elem_size == 0 {
        return 0;
    }
    count.min(buf.len() / elem_size)
}

fn scan_ord<T>(
    buf: &[u8],
    count: usize,
    opts: &RenderOpts,
    read: impl Fn(&[u8]) -> T,
) -> Rendered
where
    T: Copy + Ord + std::fmt::Display,
{
    let size = std::mem::size_of::<T>();
    let n = clamp_count(buf, size, count);
    let mut preview = String::from("{");
    let mut lo: Option<T> = None;
    let mut hi: Option<T> = None;

    let scanned = if opts.minmax { n } else { n.min(opts.limit) };
    for i in 0..scanned {
        let v = read(&buf[i * size..]);
        if i < opts.limit {
            preview.push(' ');
            preview.push_str(&v.to_string());
        }
        if opts.minmax {
            lo = Some(lo.map_or(v, |m| m.min(v)));
            hi = Some(hi.map_or(v, |m| m.max(v)));
        }
    }
    if n > opts.limit {
        preview.push_str(" ...");
    }
    preview.push_str(" }");

    Rendered {
        preview: Some(preview),
        min: lo.map(|v| v.to_string()),
        max: hi.map(|v| v.to_string()),
    }
}

fn scan_float(
    buf: &[u8],
    size: usize,
    count: usize,
    opts: &RenderOpts,
    read: impl Fn(&[u8]) -> f64,
) -> Rendered {
    let n = clamp_count(buf, size, count);
    let mut preview = String::from("{");
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    let mut seen = false;

    let scanned = if opts.minmax { n } else { n.min(opts.limit) };
    for i in 0..scanned {
        let v = read(&buf[i * size..]);
        if i < opts.limit {
            preview.push(' ');
            preview.push_str(&v.to_string());
        }
        // NaNs are previewed but excluded from the extrema.
        if opts.minmax && !v.is_nan() {
            lo = lo.min(v);
            hi = hi.max(v);
            seen = true;
        }
    }
    if n > opts.limit {
        preview.push_str(" ...");
    }
    preview.push_str(" }");

    Rendered {
        preview: Some(preview),
        min: seen.then(|| lo.to_string()),
        max: seen.then(|| hi.to_string()),
    }
}

fn render_chars(buf: &[u8], count: usize, max_chars: usize) -> Rendered {
    let n = clamp_count(buf, 1, count);
    // C string convention: stop at the first NUL inside the counted span.
    let end = buf[..n].iter().position(|&b| b == 0).unwrap_or(n);
    // Lossy decode, then cap in characters so multi-byte text is not cut
    // mid-sequence. Control characters are escaped to keep the line whole.
    let decoded = String::from_utf8_lossy(&buf[..end]);
    let total = decoded.chars().count();
    let mut text = String::with_capacity(end.min(max_chars) + 2);
    text.push('"');
    for c in decoded.chars().take(max_chars) {
        if c.is_control() {
            text.extend(c.escape_default());
        } else {
            text.push(c);
        }
    }
    text.push('"');
    if total > max_chars {
        text.push_str("...");
    }
    Rendered {
        preview: Some(text),
        min: None,
        max: None,
    }
}

fn render_bytes(buf: &[u8], count: usize, limit: usize) -> Rendered {
    let n = clamp_count(buf, 1, count);
    let shown = n.min(limit);
    let mut text = String::from("0x");
    text.push_str(&hex::encode(&buf[..shown]));
    if n > shown {
        text.push_str("..");
    }
    Rendered {
        preview: Some(text),
        min: None,
        max: None,
    }
}
