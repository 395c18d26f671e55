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

//! A retained-mode collision scene kept continuously in sync with the
//! [rapier3d](https://rapier.rs) rigid-body engine.
//!
//! The crate is built around [`world::PhysicsWorld`]: collision nodes (static
//! bodies, dynamic bodies, trigger volumes, character controllers) are
//! registered with the world, which lazily creates their engine-side actors,
//! keeps shapes rebuilt when they go stale, applies deferred commands at a
//! well-defined point of the tick and routes the engine's contact and trigger
//! callbacks back to typed per-node events.

pub mod backend;
pub mod command;
pub mod debug;
pub mod engine;
pub mod events;
pub mod material;
pub mod node;
pub mod settings;
pub mod shape;
pub mod world;

pub use command::Command;
pub use debug::{DebugViewCache, Line};
pub use engine::SimulationStatistics;
pub use events::{ContactPoint, NodeContactPair, PhysicsEvent, MAX_CONTACT_POINTS};
pub use material::{CoefficientCombineRule, PhysicsMaterial};
pub use node::{
    AxisLock, CharacterCollisions, CharacterController, CollisionNode, DynamicRigidBody, MassMode,
    NodeHandle, NodeKind,
};
pub use settings::{WorldSettings, MIN_DEFAULT_DENSITY};
pub use shape::{CollisionShape, ShapeGeometry};
pub use world::PhysicsWorld;

use nalgebra::{Isometry3, UnitQuaternion, Vector3};

/// Relative tolerance used for all "did it actually change" comparisons. The
/// sync layer must never re-push state to the engine because of floating point
/// noise, so comparisons are fuzzy rather than exact.
pub(crate) const FUZZY_EPSILON: f32 = 1.0e-5;

pub(crate) fn fuzzy_eq(a: f32, b: f32) -> bool {
    (a - b).abs() <= FUZZY_EPSILON * a.abs().max(b.abs()).max(1.0)
}

pub(crate) fn fuzzy_eq_vec3(a: &Vector3<f32>, b: &Vector3<f32>) -> bool {
    fuzzy_eq(a.x, b.x) && fuzzy_eq(a.y, b.y) && fuzzy_eq(a.z, b.z)
}

pub(crate) fn fuzzy_eq_isometry(a: &Isometry3<f32>, b: &Isometry3<f32>) -> bool {
    fuzzy_eq_vec3(&a.translation.vector, &b.translation.vector)
        && fuzzy_eq(a.rotation.i, b.rotation.i)
        && fuzzy_eq(a.rotation.j, b.rotation.j)
        && fuzzy_eq(a.rotation.k, b.rotation.k)
        && fuzzy_eq(a.rotation.w, b.rotation.w)
}

pub(crate) fn make_isometry(
    position: Vector3<f32>,
    rotation: UnitQuaternion<f32>,
) -> Isometry3<f32> {
    Isometry3::from_parts(position.into(), rotation)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fuzzy_comparison_tolerates_noise() {
        assert!(fuzzy_eq(1.0, 1.0 + 1.0e-7));
        assert!(!fuzzy_eq(1.0, 1.001));
        assert!(fuzzy_eq(1000.0, 1000.001));
    }
}
