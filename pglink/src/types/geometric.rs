//! Geometric types.
//!
//! These are always transferred in text format.
use std::fmt::{self, Write};

use crate::{
    encode::Encode,
    row::{Decode, DecodeError},
    types::Value,
};

/// `point`, `(x,y)`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// `line`, infinite line `{A,B,C}` of `Ax + By + C = 0`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Line {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

/// `lseg`, `[(x1,y1),(x2,y2)]`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LineSegment {
    pub start: Point,
    pub end: Point,
}

/// `box`, `(x1,y1),(x2,y2)` of two opposite corners
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PgBox {
    pub high: Point,
    pub low: Point,
}

/// `path`, closed `((x1,y1),...)` or open `[(x1,y1),...]`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path {
    pub closed: bool,
    pub points: Vec<Point>,
}

/// `polygon`, `((x1,y1),...)`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Polygon {
    pub points: Vec<Point>,
}

/// `circle`, `<(x,y),r>`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Circle {
    pub center: Point,
    pub radius: f64,
}

/// Collect every float in a geometric literal, ignoring the punctuation.
fn floats(s: &str) -> Result<Vec<f64>, DecodeError> {
    s.split(|c: char| matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '<' | '>' | ',') || c.is_whitespace())
        .filter(|e| !e.is_empty())
        .map(|e| super::parse_float(e).ok_or_else(|| DecodeError::malformed("invalid geometric coordinate")))
        .collect()
}

fn exact<const N: usize>(s: &str) -> Result<[f64; N], DecodeError> {
    floats(s)?
        .try_into()
        .map_err(|_| DecodeError::malformed("unexpected geometric coordinate count"))
}

fn points(s: &str) -> Result<Vec<Point>, DecodeError> {
    let floats = floats(s)?;
    if floats.len() % 2 != 0 {
        return Err(DecodeError::malformed("odd geometric coordinate count"));
    }
    Ok(floats.chunks_exact(2).map(|e| Point { x: e[0], y: e[1] }).collect())
}

impl Point {
    pub(crate) fn parse(s: &str) -> Result<Point, DecodeError> {
        let [x, y] = exact(s)?;
        Ok(Point { x, y })
    }
}

impl Line {
    pub(crate) fn parse(s: &str) -> Result<Line, DecodeError> {
        let [a, b, c] = exact(s)?;
        Ok(Line { a, b, c })
    }
}

impl LineSegment {
    pub(crate) fn parse(s: &str) -> Result<LineSegment, DecodeError> {
        let [x1, y1, x2, y2] = exact(s)?;
        Ok(LineSegment { start: Point { x: x1, y: y1 }, end: Point { x: x2, y: y2 } })
    }
}

impl PgBox {
    pub(crate) fn parse(s: &str) -> Result<PgBox, DecodeError> {
        let [x1, y1, x2, y2] = exact(s)?;
        Ok(PgBox { high: Point { x: x1, y: y1 }, low: Point { x: x2, y: y2 } })
    }
}

impl Path {
    pub(crate) fn parse(s: &str) -> Result<Path, DecodeError> {
        let closed = match s.trim_start().as_bytes().first() {
            Some(b'[') => false,
            Some(b'(') => true,
            _ => return Err(DecodeError::malformed("invalid path")),
        };
        Ok(Path { closed, points: points(s)? })
    }
}

impl Polygon {
    pub(crate) fn parse(s: &str) -> Result<Polygon, DecodeError> {
        Ok(Polygon { points: points(s)? })
    }
}

impl Circle {
    pub(crate) fn parse(s: &str) -> Result<Circle, DecodeError> {
        let [x, y, radius] = exact(s)?;
        Ok(Circle { center: Point { x, y }, radius })
    }
}

fn write_points(f: &mut fmt::Formatter<'_>, points: &[Point]) -> fmt::Result {
    for (i, point) in points.iter().enumerate() {
        if i != 0 {
            f.write_char(',')?;
        }
        fmt::Display::fmt(point, f)?;
    }
    Ok(())
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", super::FloatText(self.x), super::FloatText(self.y))
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use super::FloatText as F;
        write!(f, "{{{},{},{}}}", F(self.a), F(self.b), F(self.c))
    }
}

impl fmt::Display for LineSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.start, self.end)
    }
}

impl fmt::Display for PgBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.high, self.low)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close) = if self.closed { ('(', ')') } else { ('[', ']') };
        f.write_char(open)?;
        write_points(f, &self.points)?;
        f.write_char(close)
    }
}

impl fmt::Display for Polygon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('(')?;
        write_points(f, &self.points)?;
        f.write_char(')')
    }
}

impl fmt::Display for Circle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{},{}>", self.center, super::FloatText(self.radius))
    }
}

macro_rules! geometric {
    ($($ty:ident => $variant:ident, $name:literal;)*) => {$(
        impl Encode for $ty {
            fn encode(self) -> Value {
                Value::$variant(self)
            }
        }

        impl Decode for $ty {
            fn decode_value(value: Value) -> Result<Self, DecodeError> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(DecodeError::mismatch($name, &other)),
                }
            }
        }
    )*};
}

geometric! {
    Point => Point, "point";
    Line => Line, "line";
    LineSegment => LineSegment, "lseg";
    PgBox => Box, "box";
    Path => Path, "path";
    Polygon => Polygon, "polygon";
    Circle => Circle, "circle";
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_literals() {
        assert_eq!(Point::parse("(1.5,-2)").unwrap(), Point { x: 1.5, y: -2.0 });
        assert_eq!(Line::parse("{1,-1,0}").unwrap(), Line { a: 1.0, b: -1.0, c: 0.0 });
        assert_eq!(Circle::parse("<(0,0),2.5>").unwrap().radius, 2.5);

        let open = Path::parse("[(0,0),(1,1),(2,0)]").unwrap();
        assert!(!open.closed);
        assert_eq!(open.points.len(), 3);
        assert!(Path::parse("((0,0),(1,1))").unwrap().closed);

        assert!(Point::parse("(1,2,3)").is_err());
        assert!(Polygon::parse("((0,0),(1))").is_err());
    }

    #[test]
    fn display_forms() {
        let lseg = LineSegment { start: Point { x: 0.0, y: 1.0 }, end: Point { x: 2.0, y: 3.5 } };
        assert_eq!(lseg.to_string(), "[(0,1),(2,3.5)]");
        let b = PgBox { high: Point { x: 2.0, y: 2.0 }, low: Point { x: 0.0, y: 0.0 } };
        assert_eq!(b.to_string(), "(2,2),(0,0)");
        assert_eq!(PgBox::parse(&b.to_string()).unwrap(), b);
    }
}
