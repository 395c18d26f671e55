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

//! Contact and trigger events.
//!
//! The engine reports raw collider pair events from inside the step; the
//! world turns them into typed per-node events after the step has finished,
//! once reporting flags and node liveness can be checked.

use crate::node::NodeHandle;
use arrayvec::ArrayVec;
use nalgebra::{Point3, Vector3};
use parking_lot::Mutex;
use rapier3d::dynamics::RigidBodySet;
use rapier3d::geometry::{
    Collider, ColliderHandle, ColliderSet, CollisionEvent, CollisionEventFlags, ContactPair,
};
use rapier3d::pipeline::EventHandler;

/// At most this many contact points are reported per colliding pair and tick.
pub const MAX_CONTACT_POINTS: usize = 64;

/// A single reported contact point.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ContactPoint {
    /// World-space contact position.
    pub position: Point3<f32>,
    /// Impulse applied at this point, in world space, as delivered by the
    /// solver. Unlike the normal it is not flipped per reporting direction.
    pub impulse: Vector3<f32>,
    /// World-space contact normal, pointing towards the receiving node.
    pub normal: Vector3<f32>,
}

/// Extracts up to [`MAX_CONTACT_POINTS`] points from a narrow-phase contact
/// pair. `collider1` must be the pair's first collider; normals point from it
/// towards the second.
pub(crate) fn extract_contact_points(
    collider1: &Collider,
    pair: &ContactPair,
) -> ArrayVec<ContactPoint, MAX_CONTACT_POINTS> {
    let mut points = ArrayVec::new();
    'outer: for manifold in pair.manifolds.iter() {
        let normal = manifold.data.normal;
        for point in manifold.points.iter() {
            let position = collider1.position() * Point3::from(point.local_p1);
            if points
                .try_push(ContactPoint {
                    position,
                    impulse: normal * point.data.impulse,
                    normal,
                })
                .is_err()
            {
                break 'outer;
            }
        }
    }
    points
}

/// Current-frame contact information for a pair of nodes, as returned by
/// [`PhysicsWorld::contacts_for`](crate::PhysicsWorld::contacts_for). Unlike
/// [`PhysicsEvent::BodyContact`] this is a poll of the narrow phase, not a
/// started-touching notification.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeContactPair {
    /// Node of the pair's first collider. The queried node can appear on
    /// either side.
    pub node1: NodeHandle,
    /// Node of the pair's second collider.
    pub node2: NodeHandle,
    /// Contact points with normals pointing from `node1` towards `node2`.
    pub points: ArrayVec<ContactPoint, MAX_CONTACT_POINTS>,
    /// `false` when the pair is only broad-phase adjacent without touching.
    pub has_any_active_contact: bool,
}

/// Typed event produced by a tick, addressed to a specific node.
#[derive(Clone, Debug, PartialEq)]
pub enum PhysicsEvent {
    /// `body` was hit by `other`. Emitted only when `other` sends contact
    /// reports and `body` receives them.
    BodyContact {
        /// The node receiving the report.
        body: NodeHandle,
        /// The impacting node.
        other: NodeHandle,
        /// Up to [`MAX_CONTACT_POINTS`] contact points, with normals pointing
        /// towards `body`.
        points: ArrayVec<ContactPoint, MAX_CONTACT_POINTS>,
    },
    /// `body` started penetrating the trigger volume `trigger`.
    TriggerEntered {
        trigger: NodeHandle,
        body: NodeHandle,
    },
    /// `body` no longer penetrates the trigger volume `trigger`.
    TriggerExited {
        trigger: NodeHandle,
        body: NodeHandle,
    },
}

/// Raw pair event recorded during an engine step, keyed by collider handles.
/// Routing to nodes happens later, outside the step.
#[derive(Clone, Debug)]
pub(crate) enum RawPairEvent {
    ContactStarted {
        collider1: ColliderHandle,
        collider2: ColliderHandle,
        /// Points with normals pointing from the first collider towards the
        /// second.
        points: ArrayVec<ContactPoint, MAX_CONTACT_POINTS>,
    },
    SensorStarted(ColliderHandle, ColliderHandle),
    SensorStopped(ColliderHandle, ColliderHandle),
}

/// Records engine collision events for the world to route after the step.
///
/// Contact points have to be extracted here, while the contact pair is still
/// borrowed from the narrow phase.
#[derive(Default)]
pub(crate) struct EventCollector {
    pub(crate) events: Mutex<Vec<RawPairEvent>>,
}

impl EventCollector {
    pub(crate) fn drain(&self) -> Vec<RawPairEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventHandler for EventCollector {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        colliders: &ColliderSet,
        event: CollisionEvent,
        contact_pair: Option<&ContactPair>,
    ) {
        match event {
            CollisionEvent::Started(h1, h2, flags) => {
                if flags.contains(CollisionEventFlags::SENSOR) {
                    self.events.lock().push(RawPairEvent::SensorStarted(h1, h2));
                    return;
                }
                let Some(pair) = contact_pair else {
                    return;
                };
                let Some(collider1) = colliders.get(h1) else {
                    return;
                };
                self.events.lock().push(RawPairEvent::ContactStarted {
                    collider1: h1,
                    collider2: h2,
                    points: extract_contact_points(collider1, pair),
                });
            }
            CollisionEvent::Stopped(h1, h2, flags) => {
                // Pairs that stopped because a shape was removed are dropped,
                // the cleanup pass already handles those nodes.
                if flags.contains(CollisionEventFlags::SENSOR)
                    && !flags.contains(CollisionEventFlags::REMOVED)
                {
                    self.events.lock().push(RawPairEvent::SensorStopped(h1, h2));
                }
            }
        }
    }

    fn handle_contact_force_event(
        &self,
        _dt: f32,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: f32,
    ) {
    }
}
