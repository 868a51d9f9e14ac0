
use std::fmt;

/// One argument of a printf-style log call.
///
/// Scalars are held by value, strings and arbitrary `Display`/`Debug` values
/// by reference, so building an argument list never allocates. Use the
/// [`args!`](crate::args) macro to build a slice of them.
#[derive(Clone, Copy)]
pub enum Value<'a> {
  Str(&'a str),
  Int(i64),
  Uint(u64),
  Float(f64),
  Bool(bool),
  Char(char),
  /// Any value rendered through its `Display` impl
  Display(&'a dyn fmt::Display),
  /// Any value rendered through its `Debug` impl
  Debug(&'a dyn fmt::Debug),
}

impl<'a> Value<'a> {
  pub fn display<T: fmt::Display>(value: &'a T) -> Self {
    Value::Display(value)
  }

  pub fn debug<T: fmt::Debug>(value: &'a T) -> Self {
    Value::Debug(value)
  }

  /// Name printed by the `%T` verb.
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Str(_) => "string",
      Value::Int(_) => "int",
      Value::Uint(_) => "uint",
      Value::Float(_) => "float",
      Value::Bool(_) => "bool",
      Value::Char(_) => "char",
      Value::Display(_) => "display",
      Value::Debug(_) => "debug",
    }
  }
}

impl fmt::Debug for Value<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
      Value::Int(v) => f.debug_tuple("Int").field(v).finish(),
      Value::Uint(v) => f.debug_tuple("Uint").field(v).finish(),
      Value::Float(v) => f.debug_tuple("Float").field(v).finish(),
      Value::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
      Value::Char(v) => f.debug_tuple("Char").field(v).finish(),
      Value::Display(v) => f.debug_tuple("Display").field(&format_args!("{}", v)).finish(),
      Value::Debug(v) => f.debug_tuple("Debug").field(v).finish(),
    }
  }
}

impl fmt::Display for Value<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Str(s) => f.write_str(s),
      Value::Int(v) => write!(f, "{}", v),
      Value::Uint(v) => write!(f, "{}", v),
      Value::Float(v) => write!(f, "{}", v),
      Value::Bool(v) => write!(f, "{}", v),
      Value::Char(v) => write!(f, "{}", v),
      Value::Display(v) => write!(f, "{}", v),
      Value::Debug(v) => write!(f, "{:?}", v),
    }
  }
}

impl<'a> From<&'a str> for Value<'a> {
  fn from(value: &'a str) -> Self {
    Value::Str(value)
  }
}

impl<'a> From<&'a String> for Value<'a> {
  fn from(value: &'a String) -> Self {
    Value::Str(value.as_str())
  }
}

macro_rules! impl_from_signed {
  ($($t:ty),*) => {
    $(impl From<$t> for Value<'_> {
      fn from(value: $t) -> Self {
        Value::Int(value as i64)
      }
    })*
  };
}

macro_rules! impl_from_unsigned {
  ($($t:ty),*) => {
    $(impl From<$t> for Value<'_> {
      fn from(value: $t) -> Self {
        Value::Uint(value as u64)
      }
    })*
  };
}

impl_from_signed!(i8, i16, i32, i64, isize);
impl_from_unsigned!(u8, u16, u32, u64, usize);

impl From<f32> for Value<'_> {
  fn from(value: f32) -> Self {
    Value::Float(value as f64)
  }
}

impl From<f64> for Value<'_> {
  fn from(value: f64) -> Self {
    Value::Float(value)
  }
}

impl From<bool> for Value<'_> {
  fn from(value: bool) -> Self {
    Value::Bool(value)
  }
}

impl From<char> for Value<'_> {
  fn from(value: char) -> Self {
    Value::Char(value)
  }
}

/// Builds a `&[Value]` argument slice for the `*f` logging methods.
///
/// ```rust
/// use rotlog::args;
/// use rotlog::value::Value;
///
/// let user = String::from("duck");
/// let args: &[Value] = args!["login", &user, 3, 0.5, true];
/// assert_eq!(args.len(), 5);
/// ```
#[macro_export]
macro_rules! args {
  () => {
    &[] as &[$crate::value::Value<'_>]
  };
  ($($arg:expr),+ $(,)?) => {
    &[$($crate::value::Value::from($arg)),+]
  };
}
