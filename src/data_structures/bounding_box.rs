//! Axis-aligned bounding boxes and the point accumulator that builds them.

use cgmath::{EuclideanSpace, InnerSpace, Point3, Vector3};

use crate::error::{EngineError, Result};

/// Axis-aligned box spanned by at least two distinct points.
///
/// Only [`BoundingBoxBuilder::build`] creates boxes, so `min` is always
/// component-wise <= `max` and the box never collapses to a single point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    min: Point3<f32>,
    max: Point3<f32>,
}

impl BoundingBox {
    pub fn min(&self) -> Point3<f32> {
        self.min
    }

    pub fn max(&self) -> Point3<f32> {
        self.max
    }

    pub fn center(&self) -> Point3<f32> {
        self.min.midpoint(self.max)
    }

    pub fn size(&self) -> Vector3<f32> {
        self.max - self.min
    }

    /// Radius of the sphere enclosing the box.
    pub fn radius(&self) -> f32 {
        self.size().magnitude() * 0.5
    }

    pub fn contains(&self, p: Point3<f32>) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: Point3::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            max: Point3::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        }
    }
}

/// Accumulates points until they span a box.
///
/// Duplicates are allowed but do not count as distinct: a builder that only saw
/// copies of one point refuses to build.
#[derive(Debug, Clone, Default)]
pub struct BoundingBoxBuilder {
    first: Option<Point3<f32>>,
    min: Option<Point3<f32>>,
    max: Option<Point3<f32>>,
    has_second: bool,
}

impl BoundingBoxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a point. Points with NaN or infinite coordinates are rejected.
    pub fn add(&mut self, p: impl Into<Point3<f32>>) -> Result<()> {
        let p = p.into();
        if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
            return Err(EngineError::invalid(
                "point",
                format!("coordinates must be finite, got {:?}", p),
            ));
        }
        match self.first {
            None => self.first = Some(p),
            Some(first) if first != p => self.has_second = true,
            Some(_) => (),
        }
        self.min = Some(match self.min {
            Some(min) => Point3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z)),
            None => p,
        });
        self.max = Some(match self.max {
            Some(max) => Point3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z)),
            None => p,
        });
        Ok(())
    }

    pub fn add_all<P, I>(&mut self, points: I) -> Result<()>
    where
        P: Into<Point3<f32>>,
        I: IntoIterator<Item = P>,
    {
        points.into_iter().try_for_each(|p| self.add(p))
    }

    /// Number of distinct points seen, saturating at two.
    pub fn distinct_points(&self) -> usize {
        match (self.first, self.has_second) {
            (None, _) => 0,
            (Some(_), false) => 1,
            (Some(_), true) => 2,
        }
    }

    pub fn can_build(&self) -> bool {
        self.distinct_points() >= 2
    }

    pub fn build(&self) -> Result<BoundingBox> {
        match (self.min, self.max) {
            (Some(min), Some(max)) if self.has_second => Ok(BoundingBox { min, max }),
            _ => Err(EngineError::DegenerateBoundingBox {
                distinct: self.distinct_points(),
            }),
        }
    }
}
