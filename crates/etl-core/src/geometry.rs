//! Well-known-text geometries
//!
//! Spatial columns arrive as WKT or EWKT strings (`SRID=4326;POINT Z (1 2 3)`).
//! Only the parts needed for loading are modelled: parse, report the
//! dimensionality, drop the Z axis, and write the text back out for the
//! store.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid geometry at offset {offset}: {message}")]
pub struct GeometryError {
    pub offset: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Coord {
    pub fn xy(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(Coord),
    LineString(Vec<Coord>),
    Polygon(Vec<Vec<Coord>>),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Vec<Vec<Coord>>>),
}

impl Shape {
    fn tag(&self) -> &'static str {
        match self {
            Shape::Point(_) => "POINT",
            Shape::LineString(_) => "LINESTRING",
            Shape::Polygon(_) => "POLYGON",
            Shape::MultiPoint(_) => "MULTIPOINT",
            Shape::MultiLineString(_) => "MULTILINESTRING",
            Shape::MultiPolygon(_) => "MULTIPOLYGON",
        }
    }

    fn coords(&self) -> Box<dyn Iterator<Item = &Coord> + '_> {
        match self {
            Shape::Point(c) => Box::new(std::iter::once(c)),
            Shape::LineString(cs) | Shape::MultiPoint(cs) => Box::new(cs.iter()),
            Shape::Polygon(rings) | Shape::MultiLineString(rings) => Box::new(rings.iter().flatten()),
            Shape::MultiPolygon(polys) => Box::new(polys.iter().flatten().flatten()),
        }
    }

    fn coords_mut(&mut self) -> Box<dyn Iterator<Item = &mut Coord> + '_> {
        match self {
            Shape::Point(c) => Box::new(std::iter::once(c)),
            Shape::LineString(cs) | Shape::MultiPoint(cs) => Box::new(cs.iter_mut()),
            Shape::Polygon(rings) | Shape::MultiLineString(rings) => {
                Box::new(rings.iter_mut().flatten())
            }
            Shape::MultiPolygon(polys) => Box::new(polys.iter_mut().flatten().flatten()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub srid: Option<i32>,
    pub shape: Shape,
}

impl Geometry {
    pub fn new(shape: Shape) -> Self {
        Self { srid: None, shape }
    }

    /// Parse WKT, optionally prefixed with `SRID=<n>;`
    pub fn parse(input: &str) -> Result<Self, GeometryError> {
        let mut parser = Parser::new(input);
        let srid = parser.srid()?;
        let shape = parser.shape()?;
        parser.end()?;
        Ok(Self { srid, shape })
    }

    pub fn has_z(&self) -> bool {
        self.shape.coords().any(|c| c.z.is_some())
    }

    pub fn dimensions(&self) -> u8 {
        if self.has_z() {
            3
        } else {
            2
        }
    }

    /// Drop the Z axis from every coordinate
    pub fn force_2d(mut self) -> Self {
        for coord in self.shape.coords_mut() {
            coord.z = None;
        }
        self
    }

    /// EWKT with the SRID prefix when one is known
    pub fn to_ewkt(&self) -> String {
        match self.srid {
            Some(srid) => format!("SRID={};{}", srid, self),
            None => self.to_string(),
        }
    }
}

fn write_coord(f: &mut fmt::Formatter<'_>, c: &Coord) -> fmt::Result {
    match c.z {
        Some(z) => write!(f, "{} {} {}", c.x, c.y, z),
        None => write!(f, "{} {}", c.x, c.y),
    }
}

fn write_coords(f: &mut fmt::Formatter<'_>, coords: &[Coord]) -> fmt::Result {
    f.write_str("(")?;
    for (i, c) in coords.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_coord(f, c)?;
    }
    f.write_str(")")
}

fn write_rings(f: &mut fmt::Formatter<'_>, rings: &[Vec<Coord>]) -> fmt::Result {
    f.write_str("(")?;
    for (i, ring) in rings.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_coords(f, ring)?;
    }
    f.write_str(")")
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.shape.tag())?;
        f.write_str(if self.has_z() { " Z " } else { " " })?;
        match &self.shape {
            Shape::Point(c) => write_coords(f, std::slice::from_ref(c)),
            Shape::LineString(cs) | Shape::MultiPoint(cs) => write_coords(f, cs),
            Shape::Polygon(rings) | Shape::MultiLineString(rings) => write_rings(f, rings),
            Shape::MultiPolygon(polys) => {
                f.write_str("(")?;
                for (i, poly) in polys.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_rings(f, poly)?;
                }
                f.write_str(")")
            }
        }
    }
}

const KNOWN_TAGS: [&str; 6] = [
    "POINT",
    "LINESTRING",
    "POLYGON",
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
];

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    /// Set once the first coordinate fixes the dimensionality
    has_z: Option<bool>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            has_z: None,
        }
    }

    fn error(&self, message: impl Into<String>) -> GeometryError {
        GeometryError {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest().chars().next()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), GeometryError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", c)))
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        self.skip_ws();
        let rest = self.rest();
        let len = rest.find(|c: char| !pred(c)).unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn word(&mut self) -> String {
        self.take_while(|c| c.is_ascii_alphabetic()).to_ascii_uppercase()
    }

    fn srid(&mut self) -> Result<Option<i32>, GeometryError> {
        let rest = self.rest().trim_start();
        match rest.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("SRID=") => {}
            _ => return Ok(None),
        }
        self.skip_ws();
        self.pos += 5;
        let digits = self.take_while(|c| c.is_ascii_digit() || c == '-');
        let srid = digits
            .parse()
            .map_err(|_| self.error(format!("invalid SRID '{}'", digits)))?;
        self.expect(';')?;
        Ok(Some(srid))
    }

    fn shape(&mut self) -> Result<Shape, GeometryError> {
        let mut tag = self.word();
        if tag.is_empty() {
            return Err(self.error("expected a geometry type"));
        }
        // Both "POINT Z" and "POINTZ" appear in the wild
        if let Some(base) = tag.strip_suffix('Z') {
            if KNOWN_TAGS.contains(&base) {
                tag = base.to_string();
                self.has_z = Some(true);
            }
        }
        match self.word().as_str() {
            "Z" => self.has_z = Some(true),
            "EMPTY" => return Err(self.error("empty geometries are not supported")),
            "M" | "ZM" => return Err(self.error("measured coordinates are not supported")),
            "" => {}
            other => return Err(self.error(format!("unexpected '{}'", other))),
        }

        let shape = match tag.as_str() {
            "POINT" => {
                self.expect('(')?;
                let c = self.coord()?;
                self.expect(')')?;
                Shape::Point(c)
            }
            "LINESTRING" => Shape::LineString(self.coord_list()?),
            "POLYGON" => Shape::Polygon(self.ring_list()?),
            "MULTIPOINT" => Shape::MultiPoint(self.point_list()?),
            "MULTILINESTRING" => Shape::MultiLineString(self.ring_list()?),
            "MULTIPOLYGON" => {
                let mut polys = Vec::new();
                self.expect('(')?;
                loop {
                    polys.push(self.ring_list()?);
                    if !self.eat(',') {
                        break;
                    }
                }
                self.expect(')')?;
                Shape::MultiPolygon(polys)
            }
            other => return Err(self.error(format!("unsupported geometry type '{}'", other))),
        };
        Ok(shape)
    }

    fn number(&mut self) -> Result<f64, GeometryError> {
        let start = self.pos;
        let text = self.take_while(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'));
        text.parse().map_err(|_| GeometryError {
            offset: start,
            message: format!("invalid number '{}'", text),
        })
    }

    fn at_number(&mut self) -> bool {
        matches!(self.peek(), Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
    }

    fn coord(&mut self) -> Result<Coord, GeometryError> {
        let x = self.number()?;
        let y = self.number()?;
        let z = if self.at_number() {
            Some(self.number()?)
        } else {
            None
        };
        if self.at_number() {
            return Err(self.error("measured coordinates are not supported"));
        }
        match (self.has_z, z.is_some()) {
            (None, seen) => self.has_z = Some(seen),
            (Some(expected), seen) if expected != seen => {
                return Err(self.error("mixed coordinate dimensions"));
            }
            _ => {}
        }
        Ok(Coord { x, y, z })
    }

    fn coord_list(&mut self) -> Result<Vec<Coord>, GeometryError> {
        self.expect('(')?;
        let mut coords = vec![self.coord()?];
        while self.eat(',') {
            coords.push(self.coord()?);
        }
        self.expect(')')?;
        Ok(coords)
    }

    fn ring_list(&mut self) -> Result<Vec<Vec<Coord>>, GeometryError> {
        self.expect('(')?;
        let mut rings = vec![self.coord_list()?];
        while self.eat(',') {
            rings.push(self.coord_list()?);
        }
        self.expect(')')?;
        Ok(rings)
    }

    /// MULTIPOINT accepts both `(1 2, 3 4)` and `((1 2), (3 4))`
    fn point_list(&mut self) -> Result<Vec<Coord>, GeometryError> {
        self.expect('(')?;
        let mut points = Vec::new();
        loop {
            if self.eat('(') {
                points.push(self.coord()?);
                self.expect(')')?;
            } else {
                points.push(self.coord()?);
            }
            if !self.eat(',') {
                break;
            }
        }
        self.expect(')')?;
        Ok(points)
    }

    fn end(&mut self) -> Result<(), GeometryError> {
        self.skip_ws();
        if self.pos == self.src.len() {
            Ok(())
        } else {
            Err(self.error("trailing characters"))
        }
    }
}
