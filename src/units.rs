use std::f64::consts::PI;
use std::fmt;

use log::warn;

use crate::error::UnitParseError;

// ---------------------------------------------------------------------------
// Unit spelling normalization
// ---------------------------------------------------------------------------

/// Malformed spellings seen in IFU headers and their canonical forms.
/// Applied in order and case sensitive.
pub const UNIT_MAPPING: &[(&str, &str)] = &[
    ("Ang", "A"),
    ("Spaxel", "pixel"),
    ("spaxel", "pixel"),
    ("Counts", "count"),
    ("COUNTS", "count"),
    ("METER", "meter"),
];

/// Replace every occurrence of each `bad` token with its `good` token.
///
/// Pairs are applied in order, so later pairs see the output of earlier
/// ones. Empty `bad` tokens are skipped.
pub fn apply_unit_mapping(raw: &str, mapping: &[(&str, &str)]) -> String {
    let mut value = raw.to_string();
    for &(bad, good) in mapping {
        if bad.is_empty() {
            continue;
        }
        let count = value.matches(bad).count();
        if count > 0 {
            warn!("unit '{raw}': converting {count} '{bad}' to '{good}'");
            value = value.replace(bad, good);
        }
    }
    value
}

/// Normalize a raw unit string with [`UNIT_MAPPING`] and parse it.
pub fn normalize_unit(raw: &str) -> Result<Unit, UnitParseError> {
    Unit::parse(&apply_unit_mapping(raw, UNIT_MAPPING))
}

// ---------------------------------------------------------------------------
// Physical units
// ---------------------------------------------------------------------------

const N_DIMS: usize = 9;

/// Exponents of: length, mass, time, angle, count, pixel, adu, electron, photon.
type Dims = [i32; N_DIMS];

const NONE: Dims = [0; N_DIMS];

const fn dims(l: i32, m: i32, t: i32) -> Dims {
    [l, m, t, 0, 0, 0, 0, 0, 0]
}

const fn single(index: usize) -> Dims {
    let mut d = NONE;
    d[index] = 1;
    d
}

struct UnitDef {
    symbol: &'static str,
    scale: f64,
    dims: Dims,
    prefixable: bool,
}

const fn def(symbol: &'static str, scale: f64, dims: Dims, prefixable: bool) -> UnitDef {
    UnitDef {
        symbol,
        scale,
        dims,
        prefixable,
    }
}

const UNITS: &[UnitDef] = &[
    def("m", 1.0, dims(1, 0, 0), true),
    def("meter", 1.0, dims(1, 0, 0), false),
    def("g", 1e-3, dims(0, 1, 0), true),
    def("s", 1.0, dims(0, 0, 1), true),
    def("min", 60.0, dims(0, 0, 1), false),
    def("h", 3600.0, dims(0, 0, 1), false),
    def("Hz", 1.0, dims(0, 0, -1), true),
    def("J", 1.0, dims(2, 1, -2), true),
    def("W", 1.0, dims(2, 1, -3), true),
    def("Jy", 1e-26, dims(0, 1, -2), true),
    def("erg", 1e-7, dims(2, 1, -2), false),
    def("A", 1e-10, dims(1, 0, 0), false),
    def("AA", 1e-10, dims(1, 0, 0), false),
    def("Angstrom", 1e-10, dims(1, 0, 0), false),
    def("angstrom", 1e-10, dims(1, 0, 0), false),
    def("micron", 1e-6, dims(1, 0, 0), false),
    def("rad", 1.0, single(3), true),
    def("sr", 1.0, [0, 0, 0, 2, 0, 0, 0, 0, 0], false),
    def("deg", PI / 180.0, single(3), false),
    def("arcmin", PI / 10_800.0, single(3), false),
    def("arcsec", PI / 648_000.0, single(3), false),
    def("mas", PI / 648_000_000.0, single(3), false),
    def("count", 1.0, single(4), false),
    def("ct", 1.0, single(4), false),
    def("pixel", 1.0, single(5), false),
    def("pix", 1.0, single(5), false),
    def("adu", 1.0, single(6), false),
    def("electron", 1.0, single(7), false),
    def("photon", 1.0, single(8), false),
];

const PREFIXES: &[(&str, f64)] = &[
    ("da", 1e1),
    ("Y", 1e24),
    ("Z", 1e21),
    ("E", 1e18),
    ("P", 1e15),
    ("T", 1e12),
    ("G", 1e9),
    ("M", 1e6),
    ("k", 1e3),
    ("h", 1e2),
    ("d", 1e-1),
    ("c", 1e-2),
    ("m", 1e-3),
    ("u", 1e-6),
    ("µ", 1e-6),
    ("n", 1e-9),
    ("p", 1e-12),
    ("f", 1e-15),
    ("a", 1e-18),
    ("z", 1e-21),
    ("y", 1e-24),
];

fn lookup_symbol(symbol: &str) -> Option<(f64, Dims)> {
    if let Some(unit) = UNITS.iter().find(|u| u.symbol == symbol) {
        return Some((unit.scale, unit.dims));
    }
    PREFIXES.iter().find_map(|&(prefix, factor)| {
        let base = symbol.strip_prefix(prefix)?;
        UNITS
            .iter()
            .find(|u| u.prefixable && u.symbol == base)
            .map(|u| (u.scale * factor, u.dims))
    })
}

/// A physical unit: its display text, SI scale and dimension exponents.
#[derive(Debug, Clone)]
pub struct Unit {
    text: String,
    scale: f64,
    dims: Dims,
}

impl Unit {
    /// Parse a FITS style unit string such as `1E-17 erg/s/cm^2/A/pixel`.
    pub fn parse(input: &str) -> Result<Self, UnitParseError> {
        let text = input.trim();
        if text.is_empty() {
            return Ok(Self::dimensionless());
        }
        let mut parser = Parser {
            input: text,
            chars: text.chars().collect(),
            pos: 0,
        };
        let factor = parser.product(false)?;
        Ok(Self {
            text: text.to_string(),
            scale: factor.scale,
            dims: factor.dims,
        })
    }

    pub fn dimensionless() -> Self {
        Self {
            text: String::new(),
            scale: 1.0,
            dims: NONE,
        }
    }

    pub fn meter() -> Self {
        Self {
            text: "m".to_string(),
            scale: 1.0,
            dims: dims(1, 0, 0),
        }
    }

    pub fn angstrom() -> Self {
        Self {
            text: "Angstrom".to_string(),
            scale: 1e-10,
            dims: dims(1, 0, 0),
        }
    }

    /// The (normalized) text this unit was parsed from.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Size of one of this unit in SI base units.
    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn is_dimensionless(&self) -> bool {
        self.dims == NONE
    }

    pub fn is_length(&self) -> bool {
        self.dims == dims(1, 0, 0)
    }

    pub fn is_equivalent(&self, other: &Unit) -> bool {
        self.dims == other.dims
    }

    /// Factor converting a value in `self` into `other`.
    pub fn conversion_factor(&self, other: &Unit) -> Option<f64> {
        self.is_equivalent(other).then(|| self.scale / other.scale)
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.dims == other.dims
            && (self.scale - other.scale).abs() <= 1e-12 * self.scale.abs().max(other.scale.abs())
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.text.is_empty() {
            write!(f, "dimensionless")
        } else {
            write!(f, "{}", self.text)
        }
    }
}

/// A value tagged with its unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    /// Express this quantity in `unit`, if the two are equivalent.
    pub fn to(&self, unit: &Unit) -> Option<Quantity> {
        self.unit
            .conversion_factor(unit)
            .map(|factor| Quantity::new(self.value * factor, unit.clone()))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

// ---------------------------------------------------------------------------
// Unit string parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Factor {
    scale: f64,
    dims: Dims,
}

impl Factor {
    fn one() -> Self {
        Self {
            scale: 1.0,
            dims: NONE,
        }
    }

    fn mul(self, other: Factor) -> Self {
        let mut dims = self.dims;
        for (d, o) in dims.iter_mut().zip(other.dims) {
            *d += o;
        }
        Self {
            scale: self.scale * other.scale,
            dims,
        }
    }

    fn pow(self, n: i32) -> Self {
        Self {
            scale: self.scale.powi(n),
            dims: self.dims.map(|d| d * n),
        }
    }
}

/// Grammar:
///
/// ```text
/// product := factor ( sep? factor | '/' factor )*
/// factor  := '(' product ')' power? | number | symbol power?
/// power   := ( '^' | '**' ) ( int | '(' int ')' ) | int
/// ```
struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn error(&self, message: impl Into<String>) -> UnitParseError {
        UnitParseError::syntax(self.input, message)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn skip_separators(&mut self) {
        while self
            .peek()
            .is_some_and(|c| c.is_whitespace() || c == '*' || c == '.')
        {
            self.pos += 1;
        }
    }

    fn product(&mut self, nested: bool) -> Result<Factor, UnitParseError> {
        let mut acc = Factor::one();
        loop {
            self.skip_separators();
            match self.peek() {
                None if nested => return Err(self.error("unclosed '('")),
                None => break,
                Some(')') if nested => break,
                Some(')') => return Err(self.error("unbalanced ')'")),
                Some('/') => {
                    self.pos += 1;
                    self.skip_whitespace();
                    if self.peek().is_none() {
                        return Err(self.error("dangling '/'"));
                    }
                    acc = acc.mul(self.factor()?.pow(-1));
                }
                Some(_) => acc = acc.mul(self.factor()?),
            }
        }
        Ok(acc)
    }

    fn factor(&mut self) -> Result<Factor, UnitParseError> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.product(true)?;
                self.pos += 1;
                let power = self.power()?;
                Ok(inner.pow(power))
            }
            Some(c) if c.is_ascii_digit() => self.number(),
            Some(c) if c.is_alphabetic() => {
                let start = self.pos;
                while self.peek().is_some_and(char::is_alphabetic) {
                    self.pos += 1;
                }
                let symbol: String = self.chars[start..self.pos].iter().collect();
                let (scale, dims) = lookup_symbol(&symbol)
                    .ok_or_else(|| UnitParseError::unknown_unit(&symbol, self.input))?;
                let power = self.power()?;
                Ok(Factor { scale, dims }.pow(power))
            }
            Some(c) => Err(self.error(format!("unexpected character '{c}'"))),
            None => Err(self.error("expected a unit")),
        }
    }

    fn number(&mut self) -> Result<Factor, UnitParseError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let digit_follows = match self.peek_at(1) {
                Some('+' | '-') => self.peek_at(2).is_some_and(|c| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if digit_follows {
                self.pos += 2;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let base: f64 = text
            .parse()
            .map_err(|_| self.error(format!("bad number '{text}'")))?;
        let power = self.power()?;
        Ok(Factor {
            scale: base.powi(power),
            dims: NONE,
        })
    }

    fn power(&mut self) -> Result<i32, UnitParseError> {
        let explicit = if self.peek() == Some('^') {
            self.pos += 1;
            true
        } else if self.peek() == Some('*') && self.peek_at(1) == Some('*') {
            self.pos += 2;
            true
        } else {
            false
        };

        if explicit {
            if self.peek() == Some('(') {
                self.pos += 1;
                let n = self.signed_int()?;
                if self.peek() != Some(')') {
                    return Err(self.error("unclosed exponent"));
                }
                self.pos += 1;
                return Ok(n);
            }
            return self.signed_int();
        }

        let attached = match self.peek() {
            Some('+' | '-') => self.peek_at(1).is_some_and(|c| c.is_ascii_digit()),
            Some(c) => c.is_ascii_digit(),
            None => false,
        };
        if attached {
            self.signed_int()
        } else {
            Ok(1)
        }
    }

    fn signed_int(&mut self) -> Result<i32, UnitParseError> {
        let start = self.pos;
        if matches!(self.peek(), Some('+' | '-')) {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse()
            .map_err(|_| self.error(format!("bad exponent '{text}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_replaces_every_occurrence() {
        let mapping = [("spaxel", "pixel")];
        let out = apply_unit_mapping("count/spaxel/spaxel/spaxel", &mapping);
        assert_eq!(out.matches("spaxel").count(), 0);
        assert_eq!(out.matches("pixel").count(), 3);
    }

    #[test]
    fn test_mapping_applies_in_order() {
        let mapping = [("ab", "x"), ("xc", "y")];
        assert_eq!(apply_unit_mapping("abc", &mapping), "y");
    }

    #[test]
    fn test_mapping_is_case_sensitive() {
        let mapping = [("Counts", "count")];
        assert_eq!(apply_unit_mapping("counts", &mapping), "counts");
    }

    #[test]
    fn test_mapping_skips_empty_token() {
        let mapping = [("", "bad"), ("Ang", "A")];
        assert_eq!(apply_unit_mapping("erg/Ang", &mapping), "erg/A");
    }

    #[test]
    fn test_normalize_manga_flux_unit() {
        let unit = normalize_unit("1E-17 erg/s/cm^2/Ang/spaxel").unwrap();
        assert_eq!(unit.as_str(), "1E-17 erg/s/cm^2/A/pixel");
        let expected = Unit::parse("1e-17 erg s-1 cm-2 Angstrom-1 pix-1").unwrap();
        assert_eq!(unit, expected);
    }

    #[test]
    fn test_normalize_counts_and_meter() {
        assert_eq!(normalize_unit("COUNTS").unwrap(), Unit::parse("count").unwrap());
        assert_eq!(normalize_unit("METER").unwrap(), Unit::meter());
    }

    #[test]
    fn test_normalize_rejects_unknown() {
        let err = normalize_unit("furlong/fortnight").unwrap_err();
        assert!(matches!(err, UnitParseError::UnknownUnit { ref symbol, .. } if symbol == "furlong"));
    }

    #[test]
    fn test_empty_is_dimensionless() {
        let unit = normalize_unit("").unwrap();
        assert!(unit.is_dimensionless());
        assert_eq!(unit.to_string(), "dimensionless");
    }

    #[test]
    fn test_prefixed_lengths() {
        let um = Unit::parse("um").unwrap();
        assert!(um.is_length());
        assert!((um.scale() - 1e-6).abs() < 1e-20);
        let factor = Unit::parse("nm")
            .unwrap()
            .conversion_factor(&Unit::angstrom())
            .unwrap();
        assert!((factor - 10.0).abs() < 1e-12);
        assert_eq!(Unit::parse("micron").unwrap(), um);
    }

    #[test]
    fn test_power_spellings_agree() {
        let reference = Unit::parse("cm^-2").unwrap();
        for text in ["cm-2", "cm**-2", "cm^(-2)", "/cm2", "/(cm cm)"] {
            assert_eq!(Unit::parse(text).unwrap(), reference, "{text}");
        }
    }

    #[test]
    fn test_numeric_scale_forms() {
        let a = Unit::parse("10**-17 erg").unwrap();
        let b = Unit::parse("1E-17 erg").unwrap();
        let c = Unit::parse("10^-17 erg").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert!((b.scale() - 1e-24).abs() < 1e-36);
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(Unit::parse("erg/"), Err(UnitParseError::Syntax { .. })));
        assert!(matches!(Unit::parse("(erg s"), Err(UnitParseError::Syntax { .. })));
        assert!(matches!(Unit::parse("erg)"), Err(UnitParseError::Syntax { .. })));
        assert!(matches!(Unit::parse("erg^x"), Err(UnitParseError::Syntax { .. })));
    }

    #[test]
    fn test_angles() {
        let deg = Unit::parse("deg").unwrap();
        let arcsec = Unit::parse("arcsec").unwrap();
        let factor = deg.conversion_factor(&arcsec).unwrap();
        assert!((factor - 3600.0).abs() < 1e-9);
        assert!(!deg.is_equivalent(&Unit::meter()));
    }

    #[test]
    fn test_quantity_conversion() {
        let q = Quantity::new(1.9345, Unit::parse("um").unwrap());
        let m = q.to(&Unit::meter()).unwrap();
        assert!((m.value - 1.9345e-6).abs() < 1e-15);
        assert_eq!(m.unit, Unit::meter());
        assert!(q.to(&Unit::parse("s").unwrap()).is_none());
    }
}
