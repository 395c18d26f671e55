// Copyright (c) 2024-present Dynamics World contributors.
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Debug view of the collision geometry.
//!
//! The world refreshes the visible line set once per tick for every shape that
//! opted into the debug view (or for all shapes when the world forces it).
//! Wire geometry is cached per collider in the collider's local space and only
//! regenerated when a tracked shape dimension actually changes; the world pose
//! is re-applied on every pass, so moving shapes stay cheap.

use crate::{fuzzy_eq, fuzzy_eq_vec3};
use fxhash::{FxHashMap, FxHashSet};
use nalgebra::Vector3;
use rapier3d::geometry::{ColliderHandle, Shape};
use rapier3d::math::{Point, Real};
use rapier3d::pipeline::{DebugRenderBackend, DebugRenderObject};

/// Colored line between two points.
#[derive(Clone, Debug)]
pub struct Line {
    /// Beginning of the line.
    pub begin: Vector3<f32>,
    /// End of the line.
    pub end: Vector3<f32>,
    /// Line color as HSLA, as produced by the engine's debug style.
    pub color: [f32; 4],
}

/// Dimensions of an engine shape the cache invalidates on.
///
/// Shape rebuilds allocate fresh collider handles, so geometry replacements
/// invalidate through the handle itself; the dimensions guard against an
/// engine shape mutating under an existing handle.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ShapeDimensions {
    Cuboid(Vector3<f32>),
    Ball(f32),
    Capsule { radius: f32, half_height: f32 },
    Heightfield(Vector3<f32>),
    /// Half-spaces and meshes; invalidated only through handle churn.
    Other,
}

impl ShapeDimensions {
    pub(crate) fn of(shape: &dyn Shape) -> Self {
        if let Some(cuboid) = shape.as_cuboid() {
            Self::Cuboid(cuboid.half_extents)
        } else if let Some(ball) = shape.as_ball() {
            Self::Ball(ball.radius)
        } else if let Some(capsule) = shape.as_capsule() {
            Self::Capsule {
                radius: capsule.radius,
                half_height: capsule.half_height(),
            }
        } else if let Some(heightfield) = shape.as_heightfield() {
            Self::Heightfield(*heightfield.scale())
        } else {
            Self::Other
        }
    }

    pub(crate) fn fuzzy_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Cuboid(a), Self::Cuboid(b)) => fuzzy_eq_vec3(a, b),
            (Self::Ball(a), Self::Ball(b)) => fuzzy_eq(*a, *b),
            (
                Self::Capsule {
                    radius: r1,
                    half_height: h1,
                },
                Self::Capsule {
                    radius: r2,
                    half_height: h2,
                },
            ) => fuzzy_eq(*r1, *r2) && fuzzy_eq(*h1, *h2),
            (Self::Heightfield(a), Self::Heightfield(b)) => fuzzy_eq_vec3(a, b),
            (Self::Other, Self::Other) => true,
            _ => false,
        }
    }
}

/// Cached wire geometry of one collider, in the collider's local space.
pub(crate) struct CachedShape {
    pub(crate) dims: ShapeDimensions,
    pub(crate) lines: Vec<Line>,
}

/// Line cache the engine's debug renderer draws into.
///
/// `lines` holds the world-space geometry of the current tick. `cache` holds
/// the local-space geometry per collider and survives across ticks; only
/// colliders listed in `included` are (re)rendered by the engine.
#[derive(Default)]
pub struct DebugViewCache {
    /// Wire geometry of the shapes visible in the debug view, in world space.
    pub lines: Vec<Line>,
    pub(crate) included: FxHashSet<ColliderHandle>,
    pub(crate) cache: FxHashMap<ColliderHandle, CachedShape>,
    /// Number of engine render passes taken so far; stays flat while every
    /// visible shape is served from the cache.
    pub(crate) regenerations: u64,
}

impl DebugRenderBackend for DebugViewCache {
    fn filter_object(&self, object: DebugRenderObject) -> bool {
        match object {
            DebugRenderObject::Collider(handle, _) => self.included.contains(&handle),
            _ => false,
        }
    }

    fn draw_line(
        &mut self,
        object: DebugRenderObject,
        a: Point<Real>,
        b: Point<Real>,
        color: [f32; 4],
    ) {
        // The engine hands out world-space lines; store them in the
        // collider's local space so the cache survives the shape moving.
        if let DebugRenderObject::Collider(handle, collider) = object {
            if let Some(entry) = self.cache.get_mut(&handle) {
                let to_local = collider.position().inverse();
                entry.lines.push(Line {
                    begin: (to_local * a).coords,
                    end: (to_local * b).coords,
                    color,
                });
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dimensions_compare_fuzzily_within_a_kind() {
        let a = ShapeDimensions::Ball(1.0);
        assert!(a.fuzzy_eq(&ShapeDimensions::Ball(1.0 + 1.0e-7)));
        assert!(!a.fuzzy_eq(&ShapeDimensions::Ball(2.0)));
        assert!(!a.fuzzy_eq(&ShapeDimensions::Cuboid(Vector3::repeat(1.0))));

        let capsule = ShapeDimensions::Capsule {
            radius: 50.0,
            half_height: 100.0,
        };
        assert!(capsule.fuzzy_eq(&ShapeDimensions::Capsule {
            radius: 50.0,
            half_height: 100.0,
        }));
        assert!(!capsule.fuzzy_eq(&ShapeDimensions::Capsule {
            radius: 50.0,
            half_height: 120.0,
        }));
    }
}
