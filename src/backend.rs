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

//! Engine-side mirrors of collision nodes.
//!
//! Every collision node added to the world gets a [`BackendNode`] on the
//! first tick after it was added. The backend owns the node's engine body and
//! colliders and runs the per-tick pipeline: mark stale shapes, rebuild them,
//! then synchronize state in both directions.

use crate::engine::EngineScene;
use crate::material::PhysicsMaterial;
use crate::node::{AxisLock, CollisionNode, DynamicRigidBody, NodeHandle, NodeKind};
use crate::settings::WorldSettings;
use crate::shape::ShapeGeometry;
use crate::{fuzzy_eq, fuzzy_eq_isometry, make_isometry};
use log::warn;
use rapier3d::control::KinematicCharacterController;
use rapier3d::dynamics::{LockedAxes, RigidBodyBuilder, RigidBodyHandle, RigidBodyType};
use rapier3d::geometry::{ActiveCollisionTypes, ColliderBuilder, ColliderHandle};
use rapier3d::pipeline::ActiveEvents;

/// Kind-specific part of a backend node.
pub(crate) enum BackendKind {
    Static,
    Dynamic,
    Trigger,
    Character {
        controller: KinematicCharacterController,
    },
}

/// Engine-side counterpart of one collision node.
pub(crate) struct BackendNode {
    /// Handle of the owning collision node.
    pub node: NodeHandle,
    pub kind: BackendKind,
    /// `None` until `init` ran, or permanently for a character controller
    /// whose shape setup was rejected.
    pub body: Option<RigidBodyHandle>,
    /// Engine colliders, in the same order as the node's shapes that produced
    /// valid geometry.
    pub shape_handles: Vec<ColliderHandle>,
    /// Index of the node shape each collider was built from. Shapes without
    /// valid geometry leave gaps, so this is not always the identity.
    pub shape_indices: Vec<usize>,
    pub shapes_dirty: bool,
    /// Marked when the frontend node was removed; the world frees this
    /// backend on the next tick.
    pub is_removed: bool,
}

impl BackendNode {
    /// Instantiates the backend matching the node's kind. The engine body is
    /// created later by [`Self::init`].
    pub(crate) fn for_node(handle: NodeHandle, node: &CollisionNode) -> Self {
        let kind = match &node.kind {
            NodeKind::Static => BackendKind::Static,
            NodeKind::Dynamic(_) => BackendKind::Dynamic,
            NodeKind::Trigger => BackendKind::Trigger,
            NodeKind::Character(_) => BackendKind::Character {
                controller: KinematicCharacterController::default(),
            },
        };
        Self {
            node: handle,
            kind,
            body: None,
            shape_handles: Vec::new(),
            shape_indices: Vec::new(),
            shapes_dirty: false,
            is_removed: false,
        }
    }

    /// Creates the engine body. `user_data` is the encoded node handle stored
    /// on the body and its colliders; character controllers stay unmapped so
    /// contact reporting never routes to them.
    pub(crate) fn init(
        &mut self,
        node: &mut CollisionNode,
        user_data: u128,
        engine: &mut EngineScene,
    ) {
        debug_assert!(self.body.is_none());

        let pose = make_isometry(node.position, node.rotation);
        let builder = match &self.kind {
            BackendKind::Static => RigidBodyBuilder::fixed(),
            BackendKind::Dynamic => RigidBodyBuilder::dynamic(),
            BackendKind::Trigger => RigidBodyBuilder::kinematic_position_based(),
            BackendKind::Character { .. } => {
                self.init_character(node, pose, engine);
                return;
            }
        };
        self.body = Some(engine.add_body(user_data, builder.position(pose).build()));
        self.shapes_dirty = true;
    }

    /// A character controller accepts exactly one capsule shape; anything
    /// else leaves the node without an engine body.
    fn init_character(
        &mut self,
        node: &mut CollisionNode,
        pose: nalgebra::Isometry3<f32>,
        engine: &mut EngineScene,
    ) {
        let capsule = match node.shapes() {
            [single] if matches!(single.geometry(), ShapeGeometry::Capsule { .. }) => single,
            _ => {
                warn!("character controllers require a single capsule shape");
                return;
            }
        };
        let Some(shared) = capsule.to_native() else {
            return;
        };

        let body = RigidBodyBuilder::kinematic_position_based()
            .position(pose)
            .build();
        let body_handle = engine.add_body(0, body);
        let collider = ColliderBuilder::new(shared)
            .position(capsule.local_pose())
            .active_collision_types(ActiveCollisionTypes::all())
            .build();
        let collider_handle = engine.add_collider(0, body_handle, collider);
        self.body = Some(body_handle);
        self.shape_handles.push(collider_handle);
        self.shape_indices.push(0);
        node.shapes_changed = false;
    }

    /// Removes the backend's engine state. The body takes its colliders with
    /// it.
    pub(crate) fn cleanup(&mut self, engine: &mut EngineScene) {
        if let Some(body) = self.body.take() {
            engine.remove_body(body);
        }
        self.shape_handles.clear();
        self.shape_indices.clear();
    }

    /// Checks whether the node's shapes diverged from their engine colliders
    /// since the last rebuild.
    pub(crate) fn mark_dirty_shapes(&mut self, node: &mut CollisionNode, engine: &EngineScene) {
        if self.body.is_none() || matches!(self.kind, BackendKind::Character { .. }) {
            return;
        }

        if std::mem::take(&mut node.shapes_changed)
            || node.shapes().iter().any(|shape| shape.scale_dirty)
        {
            self.shapes_dirty = true;
        }
        if self.shapes_dirty {
            return;
        }

        if self.shape_handles.len() != node.shapes().len() {
            // Should not happen, but a mismatch always warrants a rebuild.
            self.shapes_dirty = true;
            return;
        }

        for (shape, &handle) in node.shapes().iter().zip(self.shape_handles.iter()) {
            let pose_new = shape.local_pose();
            let pose_old = engine
                .colliders
                .get(handle)
                .and_then(|c| c.position_wrt_parent().copied());
            if !matches!(&pose_old, Some(old) if fuzzy_eq_isometry(&pose_new, old)) {
                self.shapes_dirty = true;
                return;
            }
        }
    }

    /// Recreates the node's colliders when they went stale, and re-applies
    /// everything the rebuild invalidated: the mass properties, the kinematic
    /// flag and continuous collision detection.
    pub(crate) fn rebuild_dirty_shapes(
        &mut self,
        node: &mut CollisionNode,
        user_data: u128,
        engine: &mut EngineScene,
        settings: &WorldSettings,
        default_material: &PhysicsMaterial,
    ) {
        if !self.shapes_dirty {
            return;
        }
        let Some(body_handle) = self.body else {
            return;
        };

        self.build_shapes(node, user_data, body_handle, engine, default_material);

        if matches!(self.kind, BackendKind::Dynamic) {
            let has_static_shapes = node
                .shapes()
                .iter()
                .any(|shape| shape.geometry().is_static());

            if let NodeKind::Dynamic(drb) = &mut node.kind {
                if !has_static_shapes {
                    // Mass must be set after the shapes exist, otherwise the
                    // inertia comes out wrong.
                    let density = resolved_density(drb, settings);
                    let command = drb.mass_command(density);
                    drb.commands.push_back(command);
                    drb.mass_dirty = false;
                } else if !drb.is_kinematic() {
                    warn!(
                        "a body with plane, mesh or heightfield shapes cannot be simulated, \
                         forcing kinematic"
                    );
                    drb.set_kinematic(true);
                }
                drb.kinematic_dirty = false;

                let kinematic = drb.is_kinematic();
                let gravity_enabled = drb.gravity_enabled;
                if let Some(native) = engine.bodies.get_mut(body_handle) {
                    native.set_body_type(body_type(kinematic), true);
                    native.set_gravity_scale(if gravity_enabled { 1.0 } else { 0.0 }, false);
                    // CCD is not supported for kinematic bodies.
                    if settings.enable_ccd && !kinematic {
                        native.enable_ccd(true);
                        native.set_soft_ccd_prediction(
                            settings.typical_speed * settings.max_timestep * 1.0e-3,
                        );
                    }
                }
            }
        }

        self.shapes_dirty = false;
    }

    fn build_shapes(
        &mut self,
        node: &mut CollisionNode,
        user_data: u128,
        body_handle: RigidBodyHandle,
        engine: &mut EngineScene,
        default_material: &PhysicsMaterial,
    ) {
        for handle in self.shape_handles.drain(..) {
            engine.remove_collider(handle);
        }
        self.shape_indices.clear();

        let is_trigger = node.is_trigger();
        let is_dynamic = matches!(node.kind, NodeKind::Dynamic(_));
        let material = node.material.as_ref().unwrap_or(default_material).clone();

        for (index, shape) in node.shapes_mut().iter_mut().enumerate() {
            shape.scale_dirty = false;
            let Some(shared) = shape.to_native() else {
                continue;
            };
            let mut builder = ColliderBuilder::new(shared)
                .position(shape.local_pose())
                .friction(material.friction())
                .restitution(material.restitution())
                .friction_combine_rule(material.friction_combine_rule.into())
                .restitution_combine_rule(material.restitution_combine_rule.into())
                .active_events(ActiveEvents::COLLISION_EVENTS);
            if is_trigger {
                builder = builder.sensor(true);
            }
            if is_trigger || is_dynamic {
                // Sensor and kinematic pairs against fixed bodies generate no
                // events by default.
                builder = builder.active_collision_types(ActiveCollisionTypes::all());
            }
            self.shape_handles
                .push(engine.add_collider(user_data, body_handle, builder.build()));
            self.shape_indices.push(index);
        }
    }

    /// Per-tick two-way synchronization between the node and its engine body.
    pub(crate) fn sync(
        &mut self,
        node: &mut CollisionNode,
        engine: &mut EngineScene,
        settings: &WorldSettings,
        default_material: &PhysicsMaterial,
        dt: f32,
    ) {
        match self.kind {
            BackendKind::Static => self.sync_static(node, engine, default_material),
            BackendKind::Dynamic => self.sync_dynamic(node, engine, settings, default_material),
            BackendKind::Trigger => self.sync_trigger(node, engine),
            BackendKind::Character { .. } => self.sync_character(node, engine, dt),
        }
    }

    /// Static bodies only push their pose, and only when it actually moved.
    fn sync_static(
        &mut self,
        node: &CollisionNode,
        engine: &mut EngineScene,
        default_material: &PhysicsMaterial,
    ) {
        let Some(body_handle) = self.body else {
            return;
        };
        let pose_new = make_isometry(node.position, node.rotation);
        if let Some(native) = engine.bodies.get_mut(body_handle) {
            if !fuzzy_eq_isometry(&pose_new, native.position()) {
                native.set_position(pose_new, false);
            }
        }
        self.sync_material(node, engine, default_material);
    }

    /// Trigger volumes follow their node unconditionally.
    fn sync_trigger(&mut self, node: &CollisionNode, engine: &mut EngineScene) {
        let Some(body_handle) = self.body else {
            return;
        };
        if let Some(native) = engine.bodies.get_mut(body_handle) {
            native.set_position(make_isometry(node.position, node.rotation), true);
        }
    }

    fn sync_dynamic(
        &mut self,
        node: &mut CollisionNode,
        engine: &mut EngineScene,
        settings: &WorldSettings,
        default_material: &PhysicsMaterial,
    ) {
        let Some(body_handle) = self.body else {
            return;
        };

        // Simulated bodies write their pose back to the node first, so the
        // commands below observe the post-step state.
        let is_kinematic = node
            .as_dynamic()
            .map(|drb| drb.is_kinematic())
            .unwrap_or_default();
        if !is_kinematic {
            if let Some(native) = engine.bodies.get(body_handle) {
                node.position = native.position().translation.vector;
                node.rotation = native.position().rotation;
            }
        }

        if let NodeKind::Dynamic(drb) = &mut node.kind {
            if std::mem::take(&mut drb.kinematic_dirty) {
                if let Some(native) = engine.bodies.get_mut(body_handle) {
                    native.set_body_type(body_type(drb.is_kinematic()), true);
                    if settings.enable_ccd {
                        native.enable_ccd(!drb.is_kinematic());
                    }
                }
            }
            if std::mem::take(&mut drb.mass_dirty) {
                let density = resolved_density(drb, settings);
                let command = drb.mass_command(density);
                drb.commands.push_back(command);
            }
            if std::mem::take(&mut drb.velocity_dirty) {
                if drb.is_kinematic() {
                    warn!("velocities have no effect on kinematic bodies");
                } else if let Some(native) = engine.bodies.get_mut(body_handle) {
                    native.set_linvel(drb.linear_velocity(), true);
                    native.set_angvel(drb.angular_velocity(), true);
                }
            }

            let is_kinematic = drb.is_kinematic();
            if let Some(native) = engine.bodies.get_mut(body_handle) {
                while let Some(command) = drb.commands.pop_front() {
                    if command.warn_if_kinematic(is_kinematic) {
                        command.execute(native, &mut engine.colliders, &self.shape_handles);
                    }
                }
                if is_kinematic {
                    native.set_next_kinematic_position(make_isometry(
                        node.position,
                        node.rotation,
                    ));
                } else {
                    let axes = locked_axes(drb);
                    if native.locked_axes() != axes {
                        native.set_locked_axes(axes, true);
                    }
                }
            }
        }

        self.sync_material(node, engine, default_material);
    }

    fn sync_character(&mut self, node: &mut CollisionNode, engine: &mut EngineScene, dt: f32) {
        let Some(body_handle) = self.body else {
            return;
        };

        // Pull the result of the previous move back into the node.
        if let Some(native) = engine.bodies.get(body_handle) {
            node.position = native.position().translation.vector;
        }

        let rotation = node.rotation;
        let position = node.position;
        let NodeKind::Character(character) = &mut node.kind else {
            return;
        };

        if let Some(target) = character.take_teleport() {
            if let Some(native) = engine.bodies.get_mut(body_handle) {
                native.set_position(make_isometry(target, rotation), true);
            }
            node.position = target;
        } else if dt > 0.0 {
            let desired = character.desired_movement(&rotation, dt);
            let Some(&capsule) = self.shape_handles.first() else {
                return;
            };
            let Some(shape) = engine
                .colliders
                .get(capsule)
                .map(|c| c.shared_shape().clone())
            else {
                return;
            };
            let BackendKind::Character { controller } = &self.kind else {
                return;
            };

            let pose = make_isometry(position, rotation);
            let (translation, collisions) =
                engine.move_character(controller, &*shape, &pose, desired, body_handle, dt);
            if let Some(native) = engine.bodies.get_mut(body_handle) {
                native.set_next_kinematic_translation(position + translation);
            }
            character.collisions = collisions;
        }
    }

    /// Pushes material changes to the engine colliders, field by field, so an
    /// unchanged material costs nothing.
    fn sync_material(
        &self,
        node: &CollisionNode,
        engine: &mut EngineScene,
        default_material: &PhysicsMaterial,
    ) {
        let material = node.material.as_ref().unwrap_or(default_material);
        for &handle in &self.shape_handles {
            if let Some(collider) = engine.colliders.get_mut(handle) {
                if !fuzzy_eq(collider.friction(), material.friction()) {
                    collider.set_friction(material.friction());
                }
                if !fuzzy_eq(collider.restitution(), material.restitution()) {
                    collider.set_restitution(material.restitution());
                }
                if collider.friction_combine_rule() != material.friction_combine_rule.into() {
                    collider.set_friction_combine_rule(material.friction_combine_rule.into());
                }
                if collider.restitution_combine_rule() != material.restitution_combine_rule.into()
                {
                    collider.set_restitution_combine_rule(material.restitution_combine_rule.into());
                }
            }
        }
    }
}

fn body_type(kinematic: bool) -> RigidBodyType {
    if kinematic {
        RigidBodyType::KinematicPositionBased
    } else {
        RigidBodyType::Dynamic
    }
}

fn resolved_density(drb: &DynamicRigidBody, settings: &WorldSettings) -> f32 {
    if drb.density() < 0.0 {
        settings.default_density
    } else {
        drb.density()
    }
}

fn locked_axes(drb: &DynamicRigidBody) -> LockedAxes {
    let mut flags = LockedAxes::empty();
    if drb.axis_lock_linear.contains(AxisLock::X) {
        flags |= LockedAxes::TRANSLATION_LOCKED_X;
    }
    if drb.axis_lock_linear.contains(AxisLock::Y) {
        flags |= LockedAxes::TRANSLATION_LOCKED_Y;
    }
    if drb.axis_lock_linear.contains(AxisLock::Z) {
        flags |= LockedAxes::TRANSLATION_LOCKED_Z;
    }
    if drb.axis_lock_angular.contains(AxisLock::X) {
        flags |= LockedAxes::ROTATION_LOCKED_X;
    }
    if drb.axis_lock_angular.contains(AxisLock::Y) {
        flags |= LockedAxes::ROTATION_LOCKED_Y;
    }
    if drb.axis_lock_angular.contains(AxisLock::Z) {
        flags |= LockedAxes::ROTATION_LOCKED_Z;
    }
    flags
}
