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

//! Collision shape descriptors and their conversion into engine geometry.

use crate::{fuzzy_eq_vec3, make_isometry};
use log::warn;
use nalgebra::{DMatrix, Isometry3, Point3, UnitQuaternion, Vector3};
use rapier3d::geometry::SharedShape;

/// Geometry description of a single collision shape.
///
/// Box, sphere and capsule are "dynamic" geometries that can be simulated
/// freely. Plane, triangle mesh and heightfield are "static" geometries: a
/// dynamic body containing one of them is demoted to kinematic at rebuild
/// time.
#[derive(Clone, Debug, PartialEq)]
pub enum ShapeGeometry {
    /// Axis-aligned box given by its half extents.
    Box {
        /// Half of the box size along each local axis.
        half_extents: Vector3<f32>,
    },
    /// Sphere given by its radius.
    Sphere {
        /// Sphere radius.
        radius: f32,
    },
    /// Capsule aligned with the local Y axis.
    Capsule {
        /// Radius of the cylindrical section and the caps.
        radius: f32,
        /// Half of the cylindrical section's length, caps excluded.
        half_height: f32,
    },
    /// Infinite half-space whose boundary faces the local +Y axis.
    Plane,
    /// Convex hull of a point cloud.
    ConvexMesh {
        /// Points whose convex hull becomes the collision geometry.
        points: Vec<Point3<f32>>,
    },
    /// Arbitrary triangle soup.
    TriangleMesh {
        /// Mesh vertices.
        vertices: Vec<Point3<f32>>,
        /// Triangles as triplets of vertex indices.
        indices: Vec<[u32; 3]>,
    },
    /// Regular-grid heightfield. Heights are stored row-major; `scale` spans
    /// the whole field along X/Z and scales the samples along Y.
    Heightfield {
        /// Height samples, one row per grid row.
        heights: DMatrix<f32>,
        /// Total extents of the field (X, height scale, Z).
        scale: Vector3<f32>,
    },
}

impl ShapeGeometry {
    /// Static geometries cannot be part of a freely simulated body.
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            ShapeGeometry::Plane | ShapeGeometry::TriangleMesh { .. } | ShapeGeometry::Heightfield { .. }
        )
    }
}

/// A single collision shape owned by a [`CollisionNode`](crate::CollisionNode).
///
/// The shape keeps its own local pose relative to the owning node and a scale
/// that is baked into the engine geometry on rebuild (the engine does not
/// support scaling shapes after creation).
#[derive(Clone, Debug)]
pub struct CollisionShape {
    geometry: ShapeGeometry,
    position: Vector3<f32>,
    rotation: UnitQuaternion<f32>,
    scale: Vector3<f32>,
    prev_scale: Vector3<f32>,
    pub(crate) scale_dirty: bool,
    /// Requests wire debug geometry for this shape.
    pub enable_debug_view: bool,
}

impl CollisionShape {
    /// Creates a shape with identity local pose and unit scale.
    pub fn new(geometry: ShapeGeometry) -> Self {
        Self {
            geometry,
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::repeat(1.0),
            prev_scale: Vector3::repeat(1.0),
            scale_dirty: false,
            enable_debug_view: false,
        }
    }

    /// Sets the local position relative to the owning node.
    pub fn with_position(mut self, position: Vector3<f32>) -> Self {
        self.position = position;
        self
    }

    /// Sets the local rotation relative to the owning node.
    pub fn with_rotation(mut self, rotation: UnitQuaternion<f32>) -> Self {
        self.rotation = rotation;
        self
    }

    /// Geometry descriptor of this shape.
    pub fn geometry(&self) -> &ShapeGeometry {
        &self.geometry
    }

    /// Local position relative to the owning node.
    pub fn position(&self) -> Vector3<f32> {
        self.position
    }

    /// Sets the local position. Picked up by the per-tick pose diff, no
    /// explicit dirty marking needed.
    pub fn set_position(&mut self, position: Vector3<f32>) {
        self.position = position;
    }

    /// Local rotation relative to the owning node.
    pub fn rotation(&self) -> UnitQuaternion<f32> {
        self.rotation
    }

    /// Sets the local rotation. Picked up by the per-tick pose diff.
    pub fn set_rotation(&mut self, rotation: UnitQuaternion<f32>) {
        self.rotation = rotation;
    }

    /// Current shape scale.
    pub fn scale(&self) -> Vector3<f32> {
        self.scale
    }

    /// Notifies the shape of a scale change. Marks the shape stale so its
    /// engine geometry is rebuilt on the next tick.
    pub fn set_scale(&mut self, scale: Vector3<f32>) {
        self.scale = scale;
        if !fuzzy_eq_vec3(&scale, &self.prev_scale) {
            self.prev_scale = scale;
            self.scale_dirty = true;
        }
    }

    /// Local pose pushed to the engine shape.
    pub fn local_pose(&self) -> Isometry3<f32> {
        make_isometry(self.position, self.rotation)
    }

    /// Converts the descriptor into an engine shape, baking the scale into the
    /// geometry. Returns `None` when no valid geometry can be produced; the
    /// owning node then simply participates in no collisions for this shape.
    pub(crate) fn to_native(&self) -> Option<SharedShape> {
        let s = self.scale;
        match &self.geometry {
            ShapeGeometry::Box { half_extents } => {
                Some(SharedShape::cuboid(
                    half_extents.x * s.x,
                    half_extents.y * s.y,
                    half_extents.z * s.z,
                ))
            }
            ShapeGeometry::Sphere { radius } => Some(SharedShape::ball(radius * s.x)),
            ShapeGeometry::Capsule {
                radius,
                half_height,
            } => Some(SharedShape::capsule_y(half_height * s.y, radius * s.x)),
            ShapeGeometry::Plane => Some(SharedShape::halfspace(Vector3::y_axis())),
            ShapeGeometry::ConvexMesh { points } => {
                let scaled: Vec<Point3<f32>> = points
                    .iter()
                    .map(|p| Point3::new(p.x * s.x, p.y * s.y, p.z * s.z))
                    .collect();
                let hull = SharedShape::convex_hull(&scaled);
                if hull.is_none() {
                    warn!("failed to compute a convex hull from {} points", points.len());
                }
                hull
            }
            ShapeGeometry::TriangleMesh { vertices, indices } => {
                if vertices.is_empty() || indices.is_empty() {
                    warn!("failed to create triangle mesh shape, it has no geometry");
                    return None;
                }
                let scaled: Vec<Point3<f32>> = vertices
                    .iter()
                    .map(|p| Point3::new(p.x * s.x, p.y * s.y, p.z * s.z))
                    .collect();
                SharedShape::trimesh(scaled, indices.clone()).ok()
            }
            ShapeGeometry::Heightfield { heights, scale } => {
                if heights.is_empty() {
                    warn!("failed to create heightfield shape, it has no samples");
                    return None;
                }
                let field_scale =
                    Vector3::new(scale.x * s.x, scale.y * s.y, scale.z * s.z);
                Some(SharedShape::heightfield(heights.clone(), field_scale))
            }
        }
    }
}
