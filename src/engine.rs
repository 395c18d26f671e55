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

//! Thin ownership layer over the rapier simulation structures.
//!
//! Everything engine-specific lives here: the solver pipeline, the body and
//! collider sets and the query pipeline. The rest of the crate talks to this
//! module in terms of handles and never touches the pipeline directly.

use crate::events::EventCollector;
use crate::node::CharacterCollisions;
use crate::settings::WorldSettings;
use nalgebra::{Isometry3, Vector3};
use rapier3d::control::KinematicCharacterController;
use rapier3d::dynamics::{
    CCDSolver, ImpulseJointSet, IntegrationParameters, IslandManager, MultibodyJointSet,
    RigidBody, RigidBodyHandle, RigidBodySet,
};
use rapier3d::geometry::{
    Collider, ColliderHandle, ColliderSet, DefaultBroadPhase, NarrowPhase, Shape,
};
use rapier3d::pipeline::{
    DebugRenderBackend, DebugRenderMode, DebugRenderPipeline, DebugRenderStyle, PhysicsPipeline,
    QueryFilter, QueryPipeline,
};
use std::time::Duration;

/// Performance counters of the simulation, mostly useful for debugging.
#[derive(Debug, Default, Clone)]
pub struct SimulationStatistics {
    /// Time spent inside the engine step during the last tick.
    pub step_time: Duration,
    /// Total number of engine steps taken.
    pub steps: u64,
    /// Timestep of the last engine step, in seconds.
    pub last_dt: f32,
}

impl SimulationStatistics {
    /// Resets the per-tick part of the statistics.
    pub fn reset(&mut self) {
        self.step_time = Duration::default();
    }
}

/// Owns the engine-side simulation state.
pub(crate) struct EngineScene {
    pub gravity: Vector3<f32>,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    pub islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query: QueryPipeline,
    pub event_collector: EventCollector,
    // The engine steps synchronously, but results are still consumed through
    // an explicit fetch so the tick keeps its simulate/fetch structure.
    results_pending: bool,
    debug_render_pipeline: DebugRenderPipeline,
    pub statistics: SimulationStatistics,
}

impl EngineScene {
    /// Creates the engine state with tolerances derived from the world
    /// settings. The tolerance scale cannot change afterwards.
    pub(crate) fn new(settings: &WorldSettings) -> Self {
        let integration_parameters = IntegrationParameters {
            // Scales the solver's internal length tolerances to the scene's
            // units (100 for a centimeter scene).
            length_unit: settings.typical_length,
            ..Default::default()
        };

        Self {
            gravity: settings.gravity,
            integration_parameters,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query: QueryPipeline::new(),
            event_collector: EventCollector::default(),
            results_pending: false,
            debug_render_pipeline: DebugRenderPipeline::new(
                DebugRenderStyle::default(),
                DebugRenderMode::COLLIDER_SHAPES,
            ),
            statistics: SimulationStatistics::default(),
        }
    }

    /// Renders the collision geometry into the given debug backend.
    pub(crate) fn draw(&mut self, backend: &mut impl DebugRenderBackend) {
        self.debug_render_pipeline.render(
            backend,
            &self.bodies,
            &self.colliders,
            &self.impulse_joints,
            &self.multibody_joints,
            &self.narrow_phase,
        );
    }

    /// Advances the simulation by `dt` seconds. Results must be consumed with
    /// [`Self::fetch_results`] before the next step.
    pub(crate) fn simulate(&mut self, dt: f32) {
        let time = std::time::Instant::now();

        self.integration_parameters.dt = dt;
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query),
            &(),
            &self.event_collector,
        );
        self.results_pending = true;

        self.statistics.step_time = time.elapsed();
        self.statistics.steps += 1;
        self.statistics.last_dt = dt;
    }

    /// Returns `true` when the results of a previous [`Self::simulate`] call
    /// were available and are now consumed.
    pub(crate) fn fetch_results(&mut self) -> bool {
        std::mem::take(&mut self.results_pending)
    }

    /// Narrow-phase contact pairs involving the given collider. Sensor pairs
    /// never show up here, they live in the intersection graph.
    pub(crate) fn contacts_with(
        &self,
        collider: ColliderHandle,
    ) -> impl Iterator<Item = &rapier3d::geometry::ContactPair> + '_ {
        self.narrow_phase.contact_pairs_with(collider)
    }

    pub(crate) fn add_body(&mut self, user_data: u128, mut body: RigidBody) -> RigidBodyHandle {
        body.user_data = user_data;
        self.bodies.insert(body)
    }

    pub(crate) fn remove_body(&mut self, handle: RigidBodyHandle) {
        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    pub(crate) fn add_collider(
        &mut self,
        user_data: u128,
        parent_body: RigidBodyHandle,
        mut collider: Collider,
    ) -> ColliderHandle {
        collider.user_data = user_data;
        self.colliders
            .insert_with_parent(collider, parent_body, &mut self.bodies)
    }

    pub(crate) fn remove_collider(&mut self, handle: ColliderHandle) -> bool {
        self.colliders
            .remove(handle, &mut self.islands, &mut self.bodies, false)
            .is_some()
    }

    /// Sweeps a character shape through the scene and returns the collision
    /// constrained translation together with the directions the character
    /// collided in.
    pub(crate) fn move_character(
        &mut self,
        controller: &KinematicCharacterController,
        shape: &dyn Shape,
        position: &Isometry3<f32>,
        desired_translation: Vector3<f32>,
        exclude: RigidBodyHandle,
        dt: f32,
    ) -> (Vector3<f32>, CharacterCollisions) {
        self.query.update(&self.colliders);

        let filter = QueryFilter::default()
            .exclude_sensors()
            .exclude_rigid_body(exclude);

        let up: Vector3<f32> = *controller.up;
        let mut collisions = CharacterCollisions::empty();
        let movement = controller.move_shape(
            dt,
            &self.bodies,
            &self.colliders,
            &self.query,
            shape,
            position,
            desired_translation,
            filter,
            |collision| {
                // normal2 is the obstacle-side normal, so ground contacts
                // point along the up axis.
                let along_up = collision.hit.normal2.dot(&up);
                if along_up > 0.5 {
                    collisions |= CharacterCollisions::DOWN;
                } else if along_up < -0.5 {
                    collisions |= CharacterCollisions::UP;
                } else {
                    collisions |= CharacterCollisions::SIDE;
                }
            },
        );

        if movement.grounded {
            collisions |= CharacterCollisions::DOWN;
        }

        (movement.translation, collisions)
    }
}
