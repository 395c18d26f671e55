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

//! Retained-mode collision nodes.
//!
//! A [`CollisionNode`] is the user-facing description of one physics object:
//! its world pose, its collision shapes and its reporting flags. Nodes are
//! plain data; they gain an engine-side actor only after they have been added
//! to a [`PhysicsWorld`](crate::PhysicsWorld) and a tick has run.

use crate::command::Command;
use crate::material::PhysicsMaterial;
use crate::shape::CollisionShape;
use bitflags::bitflags;
use fxhash::FxHashSet;
use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};
use std::collections::VecDeque;

slotmap::new_key_type! {
    /// Stable handle of a collision node inside a world.
    pub struct NodeHandle;
}

bitflags! {
    /// Axes a dynamic body can be locked on, in its local frame.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct AxisLock: u8 {
        const X = 0b001;
        const Y = 0b010;
        const Z = 0b100;
    }
}

bitflags! {
    /// Directions a character controller is currently colliding in. Empty
    /// means the character touches nothing; with gravity enabled that means
    /// free fall.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct CharacterCollisions: u8 {
        /// Colliding with something from the side.
        const SIDE = 0b001;
        /// Colliding with something from above.
        const UP = 0b010;
        /// Colliding with something from below; in standard gravity this
        /// means standing on the ground.
        const DOWN = 0b100;
    }
}

/// How a dynamic body's mass and inertia are determined.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MassMode {
    /// Mass and inertia are derived from the shapes and the body's density
    /// (or the world's default density when the body has none).
    #[default]
    Density,
    /// Total mass is set explicitly; inertia and center of mass are still
    /// derived from the shapes.
    Mass,
    /// Mass, center of mass and the principal inertia diagonal are all
    /// explicit.
    MassAndInertiaTensor,
    /// Mass, center of mass and a full inertia matrix are all explicit.
    MassAndInertiaMatrix,
}

/// State specific to freely simulated and kinematic rigid bodies.
#[derive(Clone, Debug)]
pub struct DynamicRigidBody {
    is_kinematic: bool,
    mass_mode: MassMode,
    mass: f32,
    density: f32,
    center_of_mass: Point3<f32>,
    inertia_tensor: Vector3<f32>,
    inertia_matrix: Matrix3<f32>,
    linear_velocity: Vector3<f32>,
    angular_velocity: Vector3<f32>,
    /// Linear axes the body is not allowed to move on.
    pub axis_lock_linear: AxisLock,
    /// Angular axes the body is not allowed to rotate around.
    pub axis_lock_angular: AxisLock,
    /// Whether the world's gravity acts on this body.
    pub gravity_enabled: bool,
    pub(crate) mass_dirty: bool,
    pub(crate) kinematic_dirty: bool,
    pub(crate) velocity_dirty: bool,
    pub(crate) commands: VecDeque<Command>,
}

impl Default for DynamicRigidBody {
    fn default() -> Self {
        Self {
            is_kinematic: false,
            mass_mode: MassMode::default(),
            mass: 1.0,
            // Negative means "use the world's default density".
            density: -1.0,
            center_of_mass: Point3::origin(),
            inertia_tensor: Vector3::repeat(1.0),
            inertia_matrix: Matrix3::identity(),
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            axis_lock_linear: AxisLock::empty(),
            axis_lock_angular: AxisLock::empty(),
            gravity_enabled: true,
            mass_dirty: false,
            kinematic_dirty: false,
            velocity_dirty: false,
            commands: VecDeque::new(),
        }
    }
}

impl DynamicRigidBody {
    /// Kinematic bodies follow the node's transform exactly and push other
    /// bodies out of the way instead of being simulated.
    pub fn is_kinematic(&self) -> bool {
        self.is_kinematic
    }

    /// Switches the body between simulated and kinematic mode. Takes effect
    /// on the next tick.
    pub fn set_kinematic(&mut self, kinematic: bool) {
        if self.is_kinematic != kinematic {
            self.is_kinematic = kinematic;
            self.kinematic_dirty = true;
        }
    }

    pub fn mass_mode(&self) -> MassMode {
        self.mass_mode
    }

    pub fn set_mass_mode(&mut self, mode: MassMode) {
        if self.mass_mode != mode {
            self.mass_mode = mode;
            self.mass_dirty = true;
        }
    }

    /// Total mass, used by every mass mode except [`MassMode::Density`].
    /// Non-positive values are ignored.
    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn set_mass(&mut self, mass: f32) {
        if mass >= 0.0 && self.mass != mass {
            self.mass = mass;
            self.mass_dirty = true;
        }
    }

    /// Density of the body in [`MassMode::Density`]. Negative means the
    /// world's default density applies.
    pub fn density(&self) -> f32 {
        self.density
    }

    pub fn set_density(&mut self, density: f32) {
        if self.density != density {
            self.density = density;
            self.mass_dirty = true;
        }
    }

    /// Explicit center of mass for the explicit-inertia mass modes.
    pub fn center_of_mass(&self) -> Point3<f32> {
        self.center_of_mass
    }

    pub fn set_center_of_mass(&mut self, center: Point3<f32>) {
        if self.center_of_mass != center {
            self.center_of_mass = center;
            self.mass_dirty = true;
        }
    }

    /// Principal diagonal of the inertia tensor for
    /// [`MassMode::MassAndInertiaTensor`].
    pub fn inertia_tensor(&self) -> Vector3<f32> {
        self.inertia_tensor
    }

    pub fn set_inertia_tensor(&mut self, inertia: Vector3<f32>) {
        if self.inertia_tensor != inertia {
            self.inertia_tensor = inertia;
            self.mass_dirty = true;
        }
    }

    /// Full inertia matrix for [`MassMode::MassAndInertiaMatrix`].
    pub fn inertia_matrix(&self) -> Matrix3<f32> {
        self.inertia_matrix
    }

    pub fn set_inertia_matrix(&mut self, inertia: Matrix3<f32>) {
        if self.inertia_matrix != inertia {
            self.inertia_matrix = inertia;
            self.mass_dirty = true;
        }
    }

    /// Last linear velocity pushed to the body. The engine-side velocity can
    /// diverge from this as the simulation runs.
    pub fn linear_velocity(&self) -> Vector3<f32> {
        self.linear_velocity
    }

    /// Overrides the body's linear velocity on the next tick.
    pub fn set_linear_velocity(&mut self, velocity: Vector3<f32>) {
        if self.linear_velocity != velocity {
            self.linear_velocity = velocity;
            self.velocity_dirty = true;
        }
    }

    /// Last angular velocity pushed to the body.
    pub fn angular_velocity(&self) -> Vector3<f32> {
        self.angular_velocity
    }

    /// Overrides the body's angular velocity on the next tick.
    pub fn set_angular_velocity(&mut self, velocity: Vector3<f32>) {
        if self.angular_velocity != velocity {
            self.angular_velocity = velocity;
            self.velocity_dirty = true;
        }
    }

    /// Builds the mass command matching the current mass mode. `density`
    /// already has the world default folded in.
    pub(crate) fn mass_command(&self, density: f32) -> Command {
        match self.mass_mode {
            MassMode::Density => Command::SetDensity(density),
            MassMode::Mass => Command::SetMass(self.mass),
            MassMode::MassAndInertiaTensor => Command::SetMassAndInertiaTensor {
                mass: self.mass,
                center_of_mass: self.center_of_mass,
                inertia: self.inertia_tensor,
            },
            MassMode::MassAndInertiaMatrix => Command::SetMassAndInertiaMatrix {
                mass: self.mass,
                center_of_mass: self.center_of_mass,
                inertia: self.inertia_matrix,
            },
        }
    }

    /// Queues a force applied at the center of mass for the next tick.
    pub fn apply_central_force(&mut self, force: Vector3<f32>) {
        self.commands.push_back(Command::ApplyCentralForce(force));
    }

    /// Queues a force applied at a world-space point.
    pub fn apply_force(&mut self, force: Vector3<f32>, point: Point3<f32>) {
        self.commands.push_back(Command::ApplyForceAt { force, point });
    }

    /// Queues a torque.
    pub fn apply_torque(&mut self, torque: Vector3<f32>) {
        self.commands.push_back(Command::ApplyTorque(torque));
    }

    /// Queues an impulse applied at the center of mass.
    pub fn apply_central_impulse(&mut self, impulse: Vector3<f32>) {
        self.commands.push_back(Command::ApplyCentralImpulse(impulse));
    }

    /// Queues an impulse applied at a world-space point.
    pub fn apply_impulse(&mut self, impulse: Vector3<f32>, point: Point3<f32>) {
        self.commands.push_back(Command::ApplyImpulseAt { impulse, point });
    }

    /// Queues an angular impulse.
    pub fn apply_torque_impulse(&mut self, impulse: Vector3<f32>) {
        self.commands.push_back(Command::ApplyTorqueImpulse(impulse));
    }

    /// Queues a teleport to the given pose, zeroing all velocities.
    pub fn reset(&mut self, position: Vector3<f32>, rotation: UnitQuaternion<f32>) {
        self.commands.push_back(Command::Reset { position, rotation });
    }
}

/// State specific to character controllers.
///
/// A character moves under external control but is still blocked by physical
/// barriers and optionally pulled down by gravity. Only a single capsule
/// shape is supported.
#[derive(Clone, Debug)]
pub struct CharacterController {
    /// Controlled velocity of the character in its local frame. This is the
    /// speed the character moves at when standing on the ground.
    pub speed: Vector3<f32>,
    /// Gravitational acceleration acting on the character. Usually either
    /// zero (flying character) or the world's gravity.
    pub gravity: Vector3<f32>,
    /// Whether `speed` still steers the character while it is in free fall.
    pub mid_air_control: bool,
    pub(crate) collisions: CharacterCollisions,
    pub(crate) free_fall_velocity: Vector3<f32>,
    pub(crate) teleport: Option<Vector3<f32>>,
}

impl Default for CharacterController {
    fn default() -> Self {
        Self {
            speed: Vector3::zeros(),
            gravity: Vector3::zeros(),
            mid_air_control: true,
            collisions: CharacterCollisions::empty(),
            free_fall_velocity: Vector3::zeros(),
            teleport: None,
        }
    }
}

impl CharacterController {
    /// Directions the character collided in during the last tick.
    pub fn collisions(&self) -> CharacterCollisions {
        self.collisions
    }

    /// Immediately moves the character to `position` on the next tick without
    /// checking for collisions. The caller is responsible for avoiding
    /// overlap with static objects.
    pub fn teleport(&mut self, position: Vector3<f32>) {
        self.teleport = Some(position);
        self.free_fall_velocity = Vector3::zeros();
    }

    pub(crate) fn take_teleport(&mut self) -> Option<Vector3<f32>> {
        self.teleport.take()
    }

    /// Computes the desired displacement for this tick from the controlled
    /// speed and the accumulated free-fall velocity. `rotation` is the
    /// node's world rotation.
    pub(crate) fn desired_movement(
        &mut self,
        rotation: &UnitQuaternion<f32>,
        dt: f32,
    ) -> Vector3<f32> {
        let mut movement = rotation * self.speed * dt;

        let g = self.gravity;
        if g != Vector3::zeros() {
            let free_falling = self.collisions.is_empty();
            if free_falling {
                if !self.mid_air_control {
                    // Controlled speed has no say in true free fall.
                    movement = Vector3::zeros();
                }
                movement += self.free_fall_velocity * dt;
                self.free_fall_velocity += g * dt;
            } else {
                self.free_fall_velocity = movement / dt + g * dt;
                if self.mid_air_control {
                    // Keep only the component along gravity, so leaving the
                    // ground starts a straight-down fall.
                    let down = g.normalize();
                    self.free_fall_velocity = self.free_fall_velocity.dot(&down) * down;
                }
            }
            // Always add the gravitational acceleration, in case the
            // character starts to fall this tick.
            movement += 0.5 * dt * dt * g;
        }

        movement
    }
}

/// Kind-specific part of a collision node.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// Immovable body. Moving it is possible but expensive and does not
    /// interact correctly with resting objects.
    Static,
    /// Simulated or kinematic rigid body.
    Dynamic(DynamicRigidBody),
    /// Volume that reports bodies entering and leaving it instead of
    /// colliding with them.
    Trigger,
    /// Capsule moved under external control.
    Character(CharacterController),
}

/// One physics object of the scene.
#[derive(Clone, Debug)]
pub struct CollisionNode {
    /// World position of the node.
    pub position: Vector3<f32>,
    /// World rotation of the node.
    pub rotation: UnitQuaternion<f32>,
    shapes: Vec<CollisionShape>,
    /// Surface material shared by all of the node's shapes; `None` uses the
    /// world's default material.
    pub material: Option<PhysicsMaterial>,
    /// Report contacts where this node is the impacting side.
    pub send_contact_reports: bool,
    /// Receive contact events when another reporting node hits this one.
    pub receive_contact_reports: bool,
    /// Allow trigger volumes to react to this node.
    pub enable_trigger_reports: bool,
    /// Kind-specific state.
    pub kind: NodeKind,
    pub(crate) backend: Option<usize>,
    pub(crate) shapes_changed: bool,
    pub(crate) overlaps: FxHashSet<NodeHandle>,
}

impl CollisionNode {
    /// Creates a node of the given kind at the origin with no shapes.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            shapes: Vec::new(),
            material: None,
            send_contact_reports: false,
            receive_contact_reports: false,
            enable_trigger_reports: false,
            kind,
            backend: None,
            shapes_changed: false,
            overlaps: FxHashSet::default(),
        }
    }

    pub fn with_position(mut self, position: Vector3<f32>) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: UnitQuaternion<f32>) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_shape(mut self, shape: CollisionShape) -> Self {
        self.shapes.push(shape);
        self.shapes_changed = true;
        self
    }

    pub fn with_material(mut self, material: PhysicsMaterial) -> Self {
        self.material = Some(material);
        self
    }

    /// The node's collision shapes.
    pub fn shapes(&self) -> &[CollisionShape] {
        &self.shapes
    }

    /// Mutable access to the node's shapes for pose and scale changes.
    /// Changing a shape's geometry requires [`Self::set_shapes`] instead, so
    /// the engine side knows to rebuild.
    pub fn shapes_mut(&mut self) -> &mut [CollisionShape] {
        &mut self.shapes
    }

    /// Replaces the node's shape list; the engine geometry is rebuilt on the
    /// next tick.
    pub fn set_shapes(&mut self, shapes: Vec<CollisionShape>) {
        self.shapes = shapes;
        self.shapes_changed = true;
    }

    /// Adds a shape; the engine geometry is rebuilt on the next tick.
    pub fn add_shape(&mut self, shape: CollisionShape) {
        self.shapes.push(shape);
        self.shapes_changed = true;
    }

    /// Number of bodies currently overlapping this node, if it is a trigger.
    pub fn overlap_count(&self) -> usize {
        self.overlaps.len()
    }

    pub fn as_dynamic(&self) -> Option<&DynamicRigidBody> {
        match &self.kind {
            NodeKind::Dynamic(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_dynamic_mut(&mut self) -> Option<&mut DynamicRigidBody> {
        match &mut self.kind {
            NodeKind::Dynamic(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_character(&self) -> Option<&CharacterController> {
        match &self.kind {
            NodeKind::Character(character) => Some(character),
            _ => None,
        }
    }

    pub fn as_character_mut(&mut self) -> Option<&mut CharacterController> {
        match &mut self.kind {
            NodeKind::Character(character) => Some(character),
            _ => None,
        }
    }

    pub(crate) fn is_trigger(&self) -> bool {
        matches!(self.kind, NodeKind::Trigger)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mass_setters_mark_mass_dirty() {
        let mut body = DynamicRigidBody::default();
        assert!(!body.mass_dirty);
        body.set_mass(10.0);
        assert!(body.mass_dirty);

        body.mass_dirty = false;
        body.set_mass(10.0);
        assert!(!body.mass_dirty, "unchanged mass must not re-queue");

        body.set_mass_mode(MassMode::Mass);
        assert!(body.mass_dirty);
    }

    #[test]
    fn grounded_character_walks_at_controlled_speed() {
        let mut character = CharacterController {
            speed: Vector3::new(100.0, 0.0, 0.0),
            gravity: Vector3::new(0.0, -981.0, 0.0),
            collisions: CharacterCollisions::DOWN,
            ..Default::default()
        };

        let dt = 1.0 / 60.0;
        let movement = character.desired_movement(&UnitQuaternion::identity(), dt);
        assert_relative_eq!(movement.x, 100.0 * dt);
        // Gravity probe keeps the character glued to the ground.
        assert!(movement.y < 0.0);
    }

    #[test]
    fn free_fall_accelerates_across_ticks() {
        let mut character = CharacterController {
            gravity: Vector3::new(0.0, -981.0, 0.0),
            ..Default::default()
        };

        let dt = 1.0 / 60.0;
        let first = character.desired_movement(&UnitQuaternion::identity(), dt);
        let second = character.desired_movement(&UnitQuaternion::identity(), dt);
        assert!(second.y < first.y, "fall speed must accumulate");
    }

    #[test]
    fn without_mid_air_control_speed_is_ignored_in_free_fall() {
        let mut character = CharacterController {
            speed: Vector3::new(100.0, 0.0, 0.0),
            gravity: Vector3::new(0.0, -981.0, 0.0),
            mid_air_control: false,
            ..Default::default()
        };

        let dt = 1.0 / 60.0;
        let movement = character.desired_movement(&UnitQuaternion::identity(), dt);
        assert_relative_eq!(movement.x, 0.0);
    }

    #[test]
    fn teleport_is_one_shot() {
        let mut character = CharacterController::default();
        character.teleport(Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(character.take_teleport(), Some(Vector3::new(1.0, 2.0, 3.0)));
        assert_eq!(character.take_teleport(), None);
    }
}
