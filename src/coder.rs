//! ## Value Coder
//!
//! Program-level values, the sets of allowed values a command declares, and the pure
//! transforms composed around a command template to move between the two.
//!

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// ### Value
///
/// A program-level value sent to or decoded from an instrument.
///
/// Numeric variants compare equal across integer and float representations, so a wire
/// token `"1"` matches a mapping code declared as `1` or `1.0`.
///
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    /// ### Parse Token
    ///
    /// Interpret one trimmed wire token as an integer, then a float, and fall back to text.
    ///
    pub fn parse(token: &str) -> Value {
        let token = token.trim();
        if let Ok(int) = token.parse::<i64>() {
            return Value::Int(int);
        }
        match token.parse::<f64>() {
            Ok(float) => Value::Float(float),
            Err(_) => Value::Text(token.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view of the value, accepting floats without a fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub(crate) fn as_index(&self) -> Option<usize> {
        self.as_i64().and_then(|i| usize::try_from(i).ok())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) if v.fract() == 0.0 && v.abs() < 1e16 => write!(f, "{v:.1}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(text) => f.write_str(text),
            Value::List(items) => {
                for (n, item) in items.iter().enumerate() {
                    if n > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

macro_rules! value_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Value {
                Value::Int(v as i64)
            }
        })*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Value {
        Value::Float(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Value {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<f64> {
        value
            .as_f64()
            .ok_or_else(|| Error::InvalidValue(format!("{value} is not a number")))
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<i64> {
        value
            .as_i64()
            .ok_or_else(|| Error::InvalidValue(format!("{value} is not an integer")))
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<String> {
        match value {
            Value::Text(text) => Ok(text),
            other => Ok(other.to_string()),
        }
    }
}

/// ### Values
///
/// The set of values a command accepts. With value mapping enabled, a sequence maps a
/// value to its index and a mapping maps a name to its wire code.
///
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Values {
    #[default]
    Empty,
    Sequence(Vec<Value>),
    /// Inclusive numeric bounds
    Range { min: f64, max: f64 },
    /// Ordered `(name, wire code)` pairs
    Mapping(Vec<(Value, Value)>),
}

impl Values {
    pub fn sequence<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Values {
        Values::Sequence(items.into_iter().map(Into::into).collect())
    }

    pub fn range(min: f64, max: f64) -> Values {
        Values::Range { min, max }
    }

    pub fn mapping<K: Into<Value>, V: Into<Value>>(pairs: impl IntoIterator<Item = (K, V)>) -> Values {
        Values::Mapping(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Membership test: sequence items, mapping names or inclusive range bounds.
    pub fn contains(&self, value: &Value) -> bool {
        match self {
            Values::Empty => false,
            Values::Sequence(items) => items.contains(value),
            Values::Range { min, max } => value.as_f64().is_some_and(|v| *min <= v && v <= *max),
            Values::Mapping(pairs) => pairs.iter().any(|(name, _)| name == value),
        }
    }

    /// Numeric lower and upper bound, for ranges and numeric sequences.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            Values::Range { min, max } => Some((*min, *max)),
            Values::Sequence(items) if !items.is_empty() => {
                let numbers: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
                let numbers = numbers?;
                let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
                let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                Some((min, max))
            }
            _ => None,
        }
    }

    pub(crate) fn supports_mapping(&self) -> bool {
        matches!(self, Values::Sequence(_) | Values::Mapping(_))
    }

    /// Translate a program value into its wire representation.
    pub(crate) fn encode(&self, value: &Value) -> Result<Value> {
        match self {
            Values::Sequence(items) => items
                .iter()
                .position(|item| item == value)
                .map(|index| Value::Int(index as i64))
                .ok_or_else(|| Error::ValueNotFound(value.to_string())),
            Values::Mapping(pairs) => pairs
                .iter()
                .find(|(name, _)| name == value)
                .map(|(_, code)| code.clone())
                .ok_or_else(|| Error::ValueNotFound(value.to_string())),
            other => Err(Error::InvalidDeclaration(format!(
                "{other:?} cannot be used as a value map"
            ))),
        }
    }

    /// Translate a wire value back into the program value it stands for.
    pub(crate) fn decode(&self, value: &Value) -> Result<Value> {
        match self {
            Values::Sequence(items) => value
                .as_index()
                .and_then(|index| items.get(index))
                .cloned()
                .ok_or_else(|| Error::ValueNotFound(value.to_string())),
            Values::Mapping(pairs) => pairs
                .iter()
                .find(|(_, code)| code == value)
                .map(|(name, _)| name.clone())
                .ok_or_else(|| Error::ValueNotFound(value.to_string())),
            other => Err(Error::InvalidDeclaration(format!(
                "{other:?} cannot be used as a value map"
            ))),
        }
    }
}

/// Checks a value against the allowed values, returning the (possibly adjusted) value.
pub type Validator = Arc<dyn Fn(Value, &Values) -> Result<Value> + Send + Sync>;
/// Transforms a value after decoding or before encoding.
pub type Processor = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;
/// Transforms a command template before it is issued.
pub type CommandFormatter = Arc<dyn Fn(&str) -> String + Send + Sync>;

pub fn accept_any() -> Validator {
    Arc::new(|value: Value, _: &Values| Ok(value))
}

pub fn identity() -> Processor {
    Arc::new(|value: Value| Ok(value))
}

pub fn verbatim() -> CommandFormatter {
    Arc::new(|command: &str| command.to_string())
}

/// ### Element Type
///
/// Element encoding of a binary block reply.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl ElementType {
    pub fn size(self) -> usize {
        match self {
            ElementType::U8 | ElementType::I8 => 1,
            ElementType::U16 | ElementType::I16 => 2,
            ElementType::U32 | ElementType::I32 | ElementType::F32 => 4,
            ElementType::F64 => 8,
        }
    }

    /// Decode one little-endian element. `bytes` must be exactly `size()` long.
    pub fn decode_le(self, bytes: &[u8]) -> Option<f64> {
        Some(match self {
            ElementType::U8 => *bytes.first()? as f64,
            ElementType::I8 => *bytes.first()? as i8 as f64,
            ElementType::U16 => u16::from_le_bytes(bytes.try_into().ok()?) as f64,
            ElementType::I16 => i16::from_le_bytes(bytes.try_into().ok()?) as f64,
            ElementType::U32 => u32::from_le_bytes(bytes.try_into().ok()?) as f64,
            ElementType::I32 => i32::from_le_bytes(bytes.try_into().ok()?) as f64,
            ElementType::F32 => f32::from_le_bytes(bytes.try_into().ok()?) as f64,
            ElementType::F64 => f64::from_le_bytes(bytes.try_into().ok()?),
        })
    }
}

// TEMPLATE FORMATTING
// ==========

#[derive(Debug, Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    width: usize,
    precision: Option<usize>,
    conversion: char,
}

/// ### Format Template
///
/// Substitute `%` placeholders (`%d %i %u %f %e %g %s %r %x %o %%`, with flags, width and
/// precision) with the value. A list value feeds one item per placeholder.
///
pub fn format_template(template: &str, value: &Value) -> Result<String> {
    let args: Vec<&Value> = match value {
        Value::List(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut args = args.into_iter();
    let mut output = String::with_capacity(template.len() + 16);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            output.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            output.push('%');
            continue;
        }

        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '#' => {}
                _ => break,
            }
            chars.next();
        }
        while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
            spec.width = spec.width * 10 + digit as usize;
            chars.next();
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut precision = 0;
            while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                precision = precision * 10 + digit as usize;
                chars.next();
            }
            spec.precision = Some(precision);
        }
        spec.conversion = chars
            .next()
            .ok_or_else(|| Error::InvalidValue(format!("incomplete format in `{template}`")))?;

        let arg = args.next().ok_or_else(|| {
            Error::InvalidValue(format!("not enough arguments for format `{template}`"))
        })?;
        output.push_str(&convert(&spec, arg)?);
    }

    if args.next().is_some() {
        return Err(Error::InvalidValue(format!(
            "not all arguments converted while formatting `{template}`"
        )));
    }

    Ok(output)
}

fn convert(spec: &Spec, arg: &Value) -> Result<String> {
    let number = || {
        arg.as_f64().ok_or_else(|| {
            Error::InvalidValue(format!("%{} format requires a number, not {arg}", spec.conversion))
        })
    };

    let (negative, body) = match spec.conversion {
        'd' | 'i' | 'u' => {
            let v = number()?.trunc();
            (v < 0.0, format!("{:.0}", v.abs()))
        }
        'x' | 'X' | 'o' => {
            let v = number()?.trunc() as i64;
            let body = match spec.conversion {
                'x' => format!("{:x}", v.unsigned_abs()),
                'X' => format!("{:X}", v.unsigned_abs()),
                _ => format!("{:o}", v.unsigned_abs()),
            };
            (v < 0, body)
        }
        'f' | 'F' => {
            let v = number()?;
            (v.is_sign_negative(), format!("{:.*}", spec.precision.unwrap_or(6), v.abs()))
        }
        'e' | 'E' => {
            let v = number()?;
            let precision = spec.precision.unwrap_or(6);
            (v.is_sign_negative(), exponent(v.abs(), precision, spec.conversion == 'E'))
        }
        'g' | 'G' => {
            let v = number()?;
            (v.is_sign_negative(), general(v.abs(), spec.precision, spec.conversion == 'G'))
        }
        's' | 'r' => {
            let mut text = arg.to_string();
            if let Some(precision) = spec.precision {
                text = text.chars().take(precision).collect();
            }
            return Ok(pad(spec, "", text));
        }
        other => {
            return Err(Error::InvalidValue(format!(
                "unsupported format character `{other}`"
            )))
        }
    };

    let sign = if negative {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    };
    Ok(pad(spec, sign, body))
}

fn pad(spec: &Spec, sign: &str, body: String) -> String {
    let len = sign.len() + body.chars().count();
    if len >= spec.width {
        return format!("{sign}{body}");
    }
    let fill = spec.width - len;
    if spec.left {
        format!("{sign}{body}{}", " ".repeat(fill))
    } else if spec.zero && !matches!(spec.conversion, 's' | 'r') {
        format!("{sign}{}{body}", "0".repeat(fill))
    } else {
        format!("{}{sign}{body}", " ".repeat(fill))
    }
}

fn split_exponent(v: f64, precision: usize) -> (String, i32) {
    let formatted = format!("{:.*e}", precision, v);
    match formatted.split_once('e') {
        Some((mantissa, exp)) => (mantissa.to_string(), exp.parse().unwrap_or(0)),
        None => (formatted, 0),
    }
}

fn exponent(v: f64, precision: usize, upper: bool) -> String {
    if !v.is_finite() {
        return non_finite(v, upper);
    }
    let (mantissa, exp) = split_exponent(v, precision);
    let e = if upper { 'E' } else { 'e' };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}{e}{sign}{:02}", exp.abs())
}

fn general(v: f64, precision: Option<usize>, upper: bool) -> String {
    if !v.is_finite() {
        return non_finite(v, upper);
    }
    let significant = match precision {
        Some(0) => 1,
        Some(p) => p,
        None => 6,
    };
    let exp = if v == 0.0 {
        0
    } else {
        split_exponent(v, significant - 1).1
    };

    if -4 <= exp && exp < significant as i32 {
        let decimals = (significant as i32 - 1 - exp).max(0) as usize;
        strip_zeros(format!("{:.*}", decimals, v))
    } else {
        let formatted = exponent(v, significant - 1, upper);
        let split_at = formatted.find(['e', 'E']).unwrap_or(formatted.len());
        let (mantissa, tail) = formatted.split_at(split_at);
        format!("{}{tail}", strip_zeros(mantissa.to_string()))
    }
}

fn strip_zeros(text: String) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

fn non_finite(v: f64, upper: bool) -> String {
    let text = if v.is_nan() { "nan" } else { "inf" };
    if upper {
        text.to_uppercase()
    } else {
        text.to_string()
    }
}
