//! # Record Renderer
//!
//! Renders a restricted printf-style format string straight into a writer's
//! buffer in one left-to-right pass.
//!
//! Literal runs are copied from the format string into the buffer as they
//! are found; only the text produced for a conversion goes through a small
//! stack scratch buffer first (it has to, to apply width padding).
//!
//! ## Syntax
//!
//! - `%[flags][width][.precision]verb` with flags `- + # 0` and space
//! - verbs: `d f v b o x X c p t s T q U e E g G`
//! - `%%` is a literal `%`
//! - `\%` is a literal `%` that does not start a conversion, `\\` is a
//!   literal `\`, a backslash before anything else is kept as is
//!
//! Errors never leave a partially rendered body behind: the buffer is
//! truncated back to where rendering started.


use smallvec::SmallVec;
use std::fmt::{self, Write as _};

use crate::error::{LogError, Result};
use crate::value::Value;

const PLACEHOLDER: u8 = b'%';
const ESCAPE: u8 = b'\\';

// Upper bound for width and precision, a typo like `%99999999d` must not
// turn into a huge allocation.
const MAX_WIDTH: usize = 4096;

/// Stack buffer for the text of a single conversion.
struct Scratch(SmallVec<[u8; 64]>);

impl Scratch {
  fn new() -> Self {
    Scratch(SmallVec::new())
  }

  fn as_slice(&self) -> &[u8] {
    &self.0
  }

  fn clear(&mut self) {
    self.0.clear();
  }
}

impl fmt::Write for Scratch {
  fn write_str(&mut self, s: &str) -> fmt::Result {
    self.0.extend_from_slice(s.as_bytes());
    Ok(())
  }
}

/// Parsed `%[flags][width][.precision]` part of a conversion.
#[derive(Debug, Default, Clone, Copy)]
struct Spec {
  minus: bool,
  plus: bool,
  sharp: bool,
  zero: bool,
  space: bool,
  width: usize,
  precision: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
  Flags,
  Width,
  Precision,
}

#[inline]
fn is_verb(c: u8) -> bool {
  matches!(
    c,
    b'd'
      | b'f'
      | b'v'
      | b'b'
      | b'o'
      | b'x'
      | b'X'
      | b'c'
      | b'p'
      | b't'
      | b's'
      | b'T'
      | b'q'
      | b'U'
      | b'e'
      | b'E'
      | b'g'
      | b'G'
  )
}

/// Appends `format` rendered against `args` to `buf` and returns the number
/// of bytes appended. On error `buf` is left exactly as it was.
pub fn render_format(buf: &mut Vec<u8>, format: &str, args: &[Value<'_>]) -> Result<usize> {
  let start = buf.len();
  match render_into(buf, format, args) {
    Ok(()) => Ok(buf.len() - start),
    Err(e) => {
      buf.truncate(start);
      Err(e)
    },
  }
}

fn render_into(buf: &mut Vec<u8>, format: &str, args: &[Value<'_>]) -> Result<()> {
  let bytes = format.as_bytes();
  let mut scratch = Scratch::new();

  let mut in_placeholder = false;
  let mut placeholder_start = 0;
  let mut escaped = false;
  let mut arg_index = 0;
  let mut last_flushed = 0;

  let mut spec = Spec::default();
  let mut stage = Stage::Flags;

  for (i, &c) in bytes.iter().enumerate() {
    if in_placeholder {
      if c == PLACEHOLDER && i == placeholder_start + 1 {
        buf.push(PLACEHOLDER);
        last_flushed = i + 1;
        in_placeholder = false;
        continue;
      }

      if is_verb(c) {
        let arg = args.get(arg_index).ok_or_else(|| {
          LogError::format(
            placeholder_start,
            format!("missing argument {} for %{}", arg_index + 1, c as char),
          )
        })?;

        scratch.clear();
        let numeric_prefix = format_arg(&mut scratch, &spec, c, arg)
          .map_err(|reason| LogError::format(placeholder_start, reason))?;
        pad_into(buf, scratch.as_slice(), &spec, numeric_prefix);

        arg_index += 1;
        last_flushed = i + 1;
        in_placeholder = false;
        continue;
      }

      match (c, stage) {
        (b'-', Stage::Flags) => spec.minus = true,
        (b'+', Stage::Flags) => spec.plus = true,
        (b'#', Stage::Flags) => spec.sharp = true,
        (b'0', Stage::Flags) => spec.zero = true,
        (b' ', Stage::Flags) => spec.space = true,
        (b'0'..=b'9', Stage::Flags | Stage::Width) => {
          stage = Stage::Width;
          spec.width = push_digit(spec.width, c, i)?;
        },
        (b'0'..=b'9', Stage::Precision) => {
          let precision = push_digit(spec.precision.unwrap_or(0), c, i)?;
          spec.precision = Some(precision);
        },
        (b'.', Stage::Flags | Stage::Width) => {
          stage = Stage::Precision;
          spec.precision = Some(0);
        },
        _ => {
          return Err(LogError::format(
            i,
            format!("unknown conversion character {:?}", c as char),
          ))
        },
      }
      continue;
    }

    match c {
      ESCAPE if escaped => {
        // `\\`: the first backslash was withheld, emit exactly one
        buf.push(ESCAPE);
        last_flushed = i + 1;
        escaped = false;
      },
      ESCAPE => {
        buf.extend_from_slice(&bytes[last_flushed..i]);
        last_flushed = i + 1;
        escaped = true;
      },
      PLACEHOLDER if escaped => {
        buf.push(PLACEHOLDER);
        last_flushed = i + 1;
        escaped = false;
      },
      PLACEHOLDER => {
        buf.extend_from_slice(&bytes[last_flushed..i]);
        in_placeholder = true;
        placeholder_start = i;
        spec = Spec::default();
        stage = Stage::Flags;
      },
      _ if escaped => {
        // not an escape sequence, give the backslash back
        buf.push(ESCAPE);
        escaped = false;
      },
      _ => {},
    }
  }

  if in_placeholder {
    return Err(LogError::format(
      placeholder_start,
      "unterminated placeholder",
    ));
  }
  if escaped {
    buf.push(ESCAPE);
  }
  buf.extend_from_slice(&bytes[last_flushed..]);

  Ok(())
}

fn push_digit(acc: usize, c: u8, position: usize) -> Result<usize> {
  let value = acc * 10 + (c - b'0') as usize;
  if value > MAX_WIDTH {
    return Err(LogError::format(
      position,
      format!("width or precision above {}", MAX_WIDTH),
    ));
  }
  Ok(value)
}

/// Copies `body` into `buf` applying the width of `spec`. `numeric_prefix`
/// is the length of the sign/base prefix of a number, zero padding goes
/// after it; `None` means the body is not a number and is padded with spaces.
fn pad_into(buf: &mut Vec<u8>, body: &[u8], spec: &Spec, numeric_prefix: Option<usize>) {
  let chars = std::str::from_utf8(body)
    .map(|s| s.chars().count())
    .unwrap_or(body.len());

  if spec.width <= chars {
    buf.extend_from_slice(body);
    return;
  }

  let fill = spec.width - chars;
  if spec.minus {
    buf.extend_from_slice(body);
    buf.resize(buf.len() + fill, b' ');
  } else if let (true, Some(prefix)) = (spec.zero, numeric_prefix) {
    buf.extend_from_slice(&body[..prefix]);
    buf.resize(buf.len() + fill, b'0');
    buf.extend_from_slice(&body[prefix..]);
  } else {
    buf.resize(buf.len() + fill, b' ');
    buf.extend_from_slice(body);
  }
}

fn mismatch(verb: u8, arg: &Value<'_>) -> String {
  format!("%{} does not apply to a {} argument", verb as char, arg.type_name())
}

/// Writes one conversion into `out`. Returns the numeric prefix length for
/// zero padding, `None` for non-numeric output.
fn format_arg(
  out: &mut Scratch,
  spec: &Spec,
  verb: u8,
  arg: &Value<'_>,
) -> std::result::Result<Option<usize>, String> {
  let written = match verb {
    b'v' => match *arg {
      Value::Int(v) => return Ok(Some(write_integer(out, spec, b'd', v < 0, v.unsigned_abs()))),
      Value::Uint(v) => return Ok(Some(write_integer(out, spec, b'd', false, v))),
      _ => write_default(out, spec, verb, arg),
    },
    b's' => write_default(out, spec, verb, arg),
    b'd' | b'b' | b'o' | b'x' | b'X' => match *arg {
      Value::Int(v) => return Ok(Some(write_integer(out, spec, verb, v < 0, v.unsigned_abs()))),
      Value::Uint(v) => return Ok(Some(write_integer(out, spec, verb, false, v))),
      Value::Char(c) if verb == b'd' => {
        return Ok(Some(write_integer(out, spec, verb, false, c as u64)))
      },
      Value::Str(s) if verb == b'x' || verb == b'X' => write_hex_bytes(out, verb, s.as_bytes()),
      _ => return Err(mismatch(verb, arg)),
    },
    b'e' | b'E' | b'f' | b'g' | b'G' => match *arg {
      Value::Float(v) => return Ok(write_float(out, spec, verb, v)),
      _ => return Err(mismatch(verb, arg)),
    },
    b't' => match *arg {
      Value::Bool(v) => write!(out, "{}", v),
      _ => return Err(mismatch(verb, arg)),
    },
    b'c' => match code_point(arg) {
      Some(c) => out.write_char(c),
      None => return Err(mismatch(verb, arg)),
    },
    b'U' => match code_point(arg) {
      Some(c) if spec.sharp => write!(out, "U+{:04X} '{}'", c as u32, c),
      Some(c) => write!(out, "U+{:04X}", c as u32),
      None => return Err(mismatch(verb, arg)),
    },
    b'q' => match *arg {
      Value::Str(s) => write!(out, "{:?}", s),
      Value::Char(c) => write!(out, "{:?}", c),
      Value::Int(_) | Value::Uint(_) => match code_point(arg) {
        Some(c) => write!(out, "{:?}", c),
        None => return Err(mismatch(verb, arg)),
      },
      Value::Display(d) => write!(out, "{:?}", d.to_string()),
      _ => return Err(mismatch(verb, arg)),
    },
    b'p' => match *arg {
      Value::Str(s) => write!(out, "{:p}", s.as_ptr()),
      Value::Display(d) => write!(out, "{:p}", d),
      Value::Debug(d) => write!(out, "{:p}", d),
      _ => return Err(mismatch(verb, arg)),
    },
    b'T' => out.write_str(arg.type_name()),
    _ => return Err(format!("unsupported verb %{}", verb as char)),
  };

  written.map_err(|_| "formatter error".to_string())?;
  Ok(None)
}

fn code_point(arg: &Value<'_>) -> Option<char> {
  match *arg {
    Value::Char(c) => Some(c),
    Value::Int(v) => u32::try_from(v).ok().and_then(char::from_u32),
    Value::Uint(v) => u32::try_from(v).ok().and_then(char::from_u32),
    _ => None,
  }
}

fn write_default(out: &mut Scratch, spec: &Spec, verb: u8, arg: &Value<'_>) -> fmt::Result {
  let debug = spec.sharp && verb == b'v';
  match *arg {
    Value::Str(s) if debug => write!(out, "{:?}", s),
    Value::Str(s) => match spec.precision {
      Some(p) => out.write_str(truncate_chars(s, p)),
      None => out.write_str(s),
    },
    Value::Int(v) => write!(out, "{}", v),
    Value::Uint(v) => write!(out, "{}", v),
    Value::Float(v) => write!(out, "{}", v),
    Value::Bool(v) => write!(out, "{}", v),
    Value::Char(c) if debug => write!(out, "{:?}", c),
    Value::Char(c) => out.write_char(c),
    Value::Display(d) => write!(out, "{}", d),
    Value::Debug(d) if debug => write!(out, "{:#?}", d),
    Value::Debug(d) => write!(out, "{:?}", d),
  }
}

fn truncate_chars(s: &str, max: usize) -> &str {
  match s.char_indices().nth(max) {
    Some((idx, _)) => &s[..idx],
    None => s,
  }
}

fn write_hex_bytes(out: &mut Scratch, verb: u8, bytes: &[u8]) -> fmt::Result {
  for b in bytes {
    if verb == b'X' {
      write!(out, "{:02X}", b)?;
    } else {
      write!(out, "{:02x}", b)?;
    }
  }
  Ok(())
}

fn sign_char(spec: &Spec, negative: bool) -> Option<char> {
  if negative {
    Some('-')
  } else if spec.plus {
    Some('+')
  } else if spec.space {
    Some(' ')
  } else {
    None
  }
}

/// Integers are written as sign, base prefix, digits so that negative values
/// print as `-ff` rather than in two's complement.
fn write_integer(out: &mut Scratch, spec: &Spec, verb: u8, negative: bool, magnitude: u64) -> usize {
  let mut prefix = 0;
  if let Some(sign) = sign_char(spec, negative) {
    let _ = out.write_char(sign);
    prefix += 1;
  }
  if spec.sharp {
    let base = match verb {
      b'x' => "0x",
      b'X' => "0X",
      b'o' => "0",
      b'b' => "0b",
      _ => "",
    };
    let _ = out.write_str(base);
    prefix += base.len();
  }

  let digits_start = out.as_slice().len();
  let _ = match verb {
    b'b' => write!(out, "{:b}", magnitude),
    b'o' => write!(out, "{:o}", magnitude),
    b'x' => write!(out, "{:x}", magnitude),
    b'X' => write!(out, "{:X}", magnitude),
    _ => write!(out, "{}", magnitude),
  };

  // precision on integers is a minimum digit count
  if let Some(min_digits) = spec.precision {
    let digits = out.as_slice().len() - digits_start;
    if digits < min_digits {
      let zeros = min_digits - digits;
      out.0.insert_many(digits_start, std::iter::repeat(b'0').take(zeros));
    }
  }

  prefix
}

/// Returns `None` for `NaN` and `Inf`, which are padded with spaces.
fn write_float(out: &mut Scratch, spec: &Spec, verb: u8, v: f64) -> Option<usize> {
  let mut prefix = 0;
  if let Some(sign) = sign_char(spec, v.is_sign_negative() && v != 0.0 && !v.is_nan()) {
    let _ = out.write_char(sign);
    prefix = 1;
  }

  let v = v.abs();
  if v.is_nan() {
    let _ = out.write_str("NaN");
    return None;
  }
  if v.is_infinite() {
    let _ = out.write_str("Inf");
    return None;
  }

  let upper = verb == b'E' || verb == b'G';
  match verb {
    b'f' => {
      let _ = write!(out, "{:.*}", spec.precision.unwrap_or(6), v);
    },
    b'e' | b'E' => {
      let s = format!("{:.*e}", spec.precision.unwrap_or(6), v);
      write_exponent_form(out, &s, upper, false);
    },
    _ => write_general(out, spec, v, upper),
  }
  Some(prefix)
}

/// `%g`: exponent form for very large or very small magnitudes, plain decimal
/// otherwise, trailing zeros removed unless `#` is set.
fn write_general(out: &mut Scratch, spec: &Spec, v: f64, upper: bool) {
  match spec.precision {
    None => {
      let sci = format!("{:e}", v);
      let exp = exponent_of(&sci);
      if !(-4..21).contains(&exp) {
        write_exponent_form(out, &sci, upper, false);
      } else {
        let _ = write!(out, "{}", v);
      }
    },
    Some(p) => {
      let p = p.max(1);
      let sci = format!("{:.*e}", p - 1, v);
      let exp = exponent_of(&sci);
      if exp < -4 || exp >= p as i32 {
        write_exponent_form(out, &sci, upper, !spec.sharp);
      } else {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        let plain = format!("{:.*}", decimals, v);
        let plain = if spec.sharp { plain.as_str() } else { trim_fraction(&plain) };
        let _ = out.write_str(plain);
      }
    },
  }
}

fn exponent_of(sci: &str) -> i32 {
  sci
    .rsplit_once('e')
    .and_then(|(_, exp)| exp.parse().ok())
    .unwrap_or(0)
}

/// Rewrites Rust's `1.5e3` as `1.5e+03`.
fn write_exponent_form(out: &mut Scratch, sci: &str, upper: bool, trim: bool) {
  let (mantissa, exp) = sci.split_once('e').unwrap_or((sci, "0"));
  let mantissa = if trim { trim_fraction(mantissa) } else { mantissa };
  let exp: i32 = exp.parse().unwrap_or(0);
  let sign = if exp < 0 { '-' } else { '+' };
  let e = if upper { 'E' } else { 'e' };
  let _ = write!(out, "{}{}{}{:02}", mantissa, e, sign, exp.unsigned_abs());
}

fn trim_fraction(s: &str) -> &str {
  if s.contains('.') {
    s.trim_end_matches('0').trim_end_matches('.')
  } else {
    s
  }
}
