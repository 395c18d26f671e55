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

//! The physics world: node registry, tick loop and event routing.

use crate::backend::BackendNode;
use crate::debug::{CachedShape, DebugViewCache, Line, ShapeDimensions};
use crate::engine::{EngineScene, SimulationStatistics};
use crate::events::{
    extract_contact_points, ContactPoint, NodeContactPair, PhysicsEvent, RawPairEvent,
};
use crate::fuzzy_eq;
use crate::material::PhysicsMaterial;
use crate::node::{CollisionNode, NodeHandle, NodeKind};
use crate::settings::{WorldSettings, MIN_DEFAULT_DENSITY};
use fxhash::FxHashSet;
use log::warn;
use nalgebra::{Point3, Vector3};
use rapier3d::geometry::ColliderHandle;
use slotmap::{Key, KeyData, SlotMap};
use std::time::{Duration, Instant};

pub(crate) fn encode_handle(handle: NodeHandle) -> u128 {
    // Zero marks colliders that must never route events (character
    // controllers), so valid handles are shifted by one.
    handle.data().as_ffi() as u128 + 1
}

pub(crate) fn decode_handle(user_data: u128) -> Option<NodeHandle> {
    let raw = u64::try_from(user_data.checked_sub(1)?).ok()?;
    Some(NodeHandle::from(KeyData::from_ffi(raw)))
}

/// A retained scene of collision nodes kept in sync with the rigid-body
/// engine.
///
/// Nodes added to the world gain their engine-side state lazily, on the first
/// tick after they were added. All mutations of nodes between ticks are
/// picked up by the next tick; events produced by a tick are queued and
/// consumed with [`PhysicsWorld::drain_events`].
///
/// The world is driven either by [`PhysicsWorld::tick`] (wall-clock time) or
/// [`PhysicsWorld::advance`] (explicit durations, useful for tests and fixed
/// step loops).
pub struct PhysicsWorld {
    settings: WorldSettings,
    nodes: SlotMap<NodeHandle, CollisionNode>,
    backends: Vec<BackendNode>,
    new_nodes: Vec<NodeHandle>,
    removed_nodes: FxHashSet<NodeHandle>,
    scene: Option<EngineScene>,
    // A simulate call whose results were not fetched yet.
    simulating: bool,
    accumulated_ms: f32,
    events: Vec<PhysicsEvent>,
    default_material: PhysicsMaterial,
    debug_view: DebugViewCache,
    last_tick: Option<Instant>,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new(WorldSettings::default())
    }
}

impl PhysicsWorld {
    /// Creates a world with the given settings. The engine itself is
    /// initialized on the first tick.
    pub fn new(settings: WorldSettings) -> Self {
        Self {
            settings,
            nodes: SlotMap::with_key(),
            backends: Vec::new(),
            new_nodes: Vec::new(),
            removed_nodes: FxHashSet::default(),
            scene: None,
            simulating: false,
            accumulated_ms: 0.0,
            events: Vec::new(),
            default_material: PhysicsMaterial::default(),
            debug_view: DebugViewCache::default(),
            last_tick: None,
        }
    }

    /// Current world settings.
    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    /// `true` once the engine was initialized by the first tick.
    pub fn is_initialized(&self) -> bool {
        self.scene.is_some()
    }

    pub fn set_gravity(&mut self, gravity: Vector3<f32>) {
        self.settings.gravity = gravity;
    }

    /// Starts or stops the simulation. Restarting resets the tick clock, so
    /// the pause does not count towards the next timestep.
    pub fn set_running(&mut self, running: bool) {
        if self.settings.running != running {
            self.settings.running = running;
            if running {
                self.last_tick = None;
                self.accumulated_ms = 0.0;
            }
        }
    }

    /// Enables continuous collision detection. Has no effect once the engine
    /// is initialized.
    pub fn set_enable_ccd(&mut self, enable_ccd: bool) {
        if self.is_initialized() {
            warn!("changing 'enable_ccd' after physics is initialized will have no effect");
            return;
        }
        self.settings.enable_ccd = enable_ccd;
    }

    /// Sets the typical object size the engine tolerances are derived from.
    /// Has no effect once the engine is initialized.
    pub fn set_typical_length(&mut self, typical_length: f32) {
        if typical_length <= 0.0 {
            warn!("'typical_length' value less than zero, ignored");
            return;
        }
        if self.is_initialized() {
            warn!("changing 'typical_length' after physics is initialized will have no effect");
            return;
        }
        self.settings.typical_length = typical_length;
    }

    /// Sets the typical object speed the engine tolerances are derived from.
    /// Has no effect once the engine is initialized.
    pub fn set_typical_speed(&mut self, typical_speed: f32) {
        if self.is_initialized() {
            warn!("changing 'typical_speed' after physics is initialized will have no effect");
            return;
        }
        self.settings.typical_speed = typical_speed;
    }

    /// Sets the default density of dynamic bodies. Bodies in density mass
    /// mode without their own density pick the change up on the next tick.
    pub fn set_default_density(&mut self, default_density: f32) {
        let default_density = default_density.max(MIN_DEFAULT_DENSITY);
        if fuzzy_eq(self.settings.default_density, default_density) {
            return;
        }
        self.settings.default_density = default_density;

        for (_, node) in self.nodes.iter_mut() {
            if let NodeKind::Dynamic(drb) = &mut node.kind {
                if matches!(drb.mass_mode(), crate::MassMode::Density) && drb.density() < 0.0 {
                    drb.mass_dirty = true;
                }
            }
        }
    }

    pub fn set_min_timestep(&mut self, min_timestep: f32) {
        if min_timestep < 0.0 {
            warn!("'min_timestep' less than zero, ignored");
            return;
        }
        self.settings.min_timestep = min_timestep;
    }

    pub fn set_max_timestep(&mut self, max_timestep: f32) {
        if max_timestep < 0.0 {
            warn!("'max_timestep' less than zero, ignored");
            return;
        }
        self.settings.max_timestep = max_timestep;
    }

    /// Shows debug geometry for every shape, not only the ones that opted in.
    pub fn set_force_debug_view(&mut self, force: bool) {
        self.settings.force_debug_view = force;
    }

    /// Adds a node to the world. Its engine state is created on the next
    /// tick.
    pub fn add_node(&mut self, node: CollisionNode) -> NodeHandle {
        let handle = self.nodes.insert(node);
        self.new_nodes.push(handle);
        handle
    }

    /// Removes a node. Its engine state is freed on the next tick; events
    /// still in flight for this node are dropped.
    pub fn remove_node(&mut self, handle: NodeHandle) {
        if let Some(node) = self.nodes.remove(handle) {
            if let Some(index) = node.backend {
                if let Some(backend) = self.backends.get_mut(index) {
                    backend.is_removed = true;
                }
            }
            self.new_nodes.retain(|&h| h != handle);
            self.removed_nodes.insert(handle);
        }
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&CollisionNode> {
        self.nodes.get(handle)
    }

    pub fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut CollisionNode> {
        self.nodes.get_mut(handle)
    }

    /// Iterates over all live nodes.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeHandle, &CollisionNode)> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Takes all events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<PhysicsEvent> {
        std::mem::take(&mut self.events)
    }

    /// Polls the narrow phase for all contact pairs the given node is part
    /// of, regardless of any reporting flags. Sensor pairs are not contacts
    /// and never show up here.
    pub fn contacts_for(&self, handle: NodeHandle) -> Vec<NodeContactPair> {
        let Some(scene) = self.scene.as_ref() else {
            return Vec::new();
        };
        let Some(backend) = self
            .nodes
            .get(handle)
            .and_then(|node| node.backend)
            .and_then(|index| self.backends.get(index))
        else {
            return Vec::new();
        };

        let mut pairs = Vec::new();
        for &collider in &backend.shape_handles {
            for pair in scene.contacts_with(collider) {
                let Some(node1) = self.node_of(scene, pair.collider1) else {
                    continue;
                };
                let Some(node2) = self.node_of(scene, pair.collider2) else {
                    continue;
                };
                let Some(collider1) = scene.colliders.get(pair.collider1) else {
                    continue;
                };
                pairs.push(NodeContactPair {
                    node1,
                    node2,
                    points: extract_contact_points(collider1, pair),
                    has_any_active_contact: pair.has_any_active_contact,
                });
            }
        }
        pairs
    }

    /// Simulation statistics of the last tick.
    pub fn statistics(&self) -> SimulationStatistics {
        self.scene
            .as_ref()
            .map(|scene| scene.statistics.clone())
            .unwrap_or_default()
    }

    /// Wire geometry of the shapes visible in the debug view. Poses are
    /// refreshed every tick; the geometry itself is cached per shape and only
    /// regenerated when its dimensions change.
    pub fn debug_view(&self) -> &DebugViewCache {
        &self.debug_view
    }

    /// Advances the world by the wall-clock time elapsed since the previous
    /// call.
    pub fn tick(&mut self) {
        let now = Instant::now();
        let elapsed = self
            .last_tick
            .map(|last| now.duration_since(last))
            .unwrap_or_default();
        self.last_tick = Some(now);
        self.advance(elapsed);
    }

    /// Advances the world by an explicit duration.
    ///
    /// One tick runs at most one engine step. Elapsed time below the minimum
    /// timestep accumulates; time above the maximum timestep is clamped, so
    /// long stalls do not destabilize the integration.
    pub fn advance(&mut self, elapsed: Duration) {
        if !self.settings.running {
            return;
        }

        let mut scene = match self.scene.take() {
            Some(scene) => scene,
            None => EngineScene::new(&self.settings),
        };

        self.accumulated_ms += elapsed.as_secs_f32() * 1000.0;
        if self.accumulated_ms < self.settings.min_timestep {
            self.scene = Some(scene);
            return;
        }

        // Consume the previous step before touching the engine state.
        if self.simulating {
            if !scene.fetch_results() {
                self.scene = Some(scene);
                return;
            }
            self.simulating = false;
            let raw = scene.event_collector.drain();
            self.route_events(raw, &scene);
        }

        self.cleanup_removed_nodes(&mut scene);

        for handle in std::mem::take(&mut self.new_nodes) {
            let Some(node) = self.nodes.get_mut(handle) else {
                continue;
            };
            let mut backend = BackendNode::for_node(handle, node);
            backend.init(node, encode_handle(handle), &mut scene);
            node.backend = Some(self.backends.len());
            self.backends.push(backend);
        }

        let dt = self.accumulated_ms.min(self.settings.max_timestep) * 1.0e-3;
        self.accumulated_ms = 0.0;

        scene.gravity = self.settings.gravity;
        for backend in &mut self.backends {
            let Some(node) = self.nodes.get_mut(backend.node) else {
                continue;
            };
            backend.mark_dirty_shapes(node, &scene);
            backend.rebuild_dirty_shapes(
                node,
                encode_handle(backend.node),
                &mut scene,
                &self.settings,
                &self.default_material,
            );
            backend.sync(node, &mut scene, &self.settings, &self.default_material, dt);
        }

        self.update_debug_view(&mut scene);

        scene.simulate(dt);
        self.simulating = true;

        self.scene = Some(scene);
    }

    fn cleanup_removed_nodes(&mut self, scene: &mut EngineScene) {
        if self.backends.iter().any(|backend| backend.is_removed) {
            for backend in &mut self.backends {
                if backend.is_removed {
                    backend.cleanup(scene);
                }
            }
            self.backends.retain(|backend| !backend.is_removed);

            // Backend indices shifted, restore the back references.
            for (index, backend) in self.backends.iter().enumerate() {
                if let Some(node) = self.nodes.get_mut(backend.node) {
                    node.backend = Some(index);
                }
            }
        }
        self.removed_nodes.clear();
    }

    /// Resolves a collider to a live, mapped node. Character controllers and
    /// nodes removed since the last step resolve to nothing.
    fn node_of(&self, scene: &EngineScene, collider: ColliderHandle) -> Option<NodeHandle> {
        let handle = decode_handle(scene.colliders.get(collider)?.user_data)?;
        if self.removed_nodes.contains(&handle) || !self.nodes.contains_key(handle) {
            return None;
        }
        Some(handle)
    }

    fn route_events(&mut self, raw: Vec<RawPairEvent>, scene: &EngineScene) {
        for event in raw {
            match event {
                RawPairEvent::ContactStarted {
                    collider1,
                    collider2,
                    points,
                } => {
                    let Some(h1) = self.node_of(scene, collider1) else {
                        continue;
                    };
                    let Some(h2) = self.node_of(scene, collider2) else {
                        continue;
                    };
                    let (Some(n1), Some(n2)) = (self.nodes.get(h1), self.nodes.get(h2)) else {
                        continue;
                    };

                    if n1.send_contact_reports && n2.receive_contact_reports {
                        self.events.push(PhysicsEvent::BodyContact {
                            body: h2,
                            other: h1,
                            points: points.clone(),
                        });
                    }
                    if n2.send_contact_reports && n1.receive_contact_reports {
                        // Only the normals flip for the opposite direction;
                        // impulses are reported as the solver delivered them.
                        let inverted = points
                            .iter()
                            .map(|point| ContactPoint {
                                position: point.position,
                                impulse: point.impulse,
                                normal: -point.normal,
                            })
                            .collect();
                        self.events.push(PhysicsEvent::BodyContact {
                            body: h1,
                            other: h2,
                            points: inverted,
                        });
                    }
                }
                RawPairEvent::SensorStarted(c1, c2) => self.update_overlap(scene, c1, c2, true),
                RawPairEvent::SensorStopped(c1, c2) => self.update_overlap(scene, c1, c2, false),
            }
        }
    }

    /// Updates a trigger's overlap set and fires entered/exited events on
    /// actual membership changes only.
    fn update_overlap(
        &mut self,
        scene: &EngineScene,
        c1: ColliderHandle,
        c2: ColliderHandle,
        entered: bool,
    ) {
        let Some(h1) = self.node_of(scene, c1) else {
            return;
        };
        let Some(h2) = self.node_of(scene, c2) else {
            return;
        };

        for (trigger, other) in [(h1, h2), (h2, h1)] {
            let is_trigger = self
                .nodes
                .get(trigger)
                .map(|node| node.is_trigger())
                .unwrap_or_default();
            let other_reports = self
                .nodes
                .get(other)
                .map(|node| node.enable_trigger_reports)
                .unwrap_or_default();
            if !is_trigger || !other_reports {
                continue;
            }

            let Some(node) = self.nodes.get_mut(trigger) else {
                continue;
            };
            if entered {
                if node.overlaps.insert(other) {
                    self.events.push(PhysicsEvent::TriggerEntered {
                        trigger,
                        body: other,
                    });
                }
            } else if node.overlaps.remove(&other) {
                self.events.push(PhysicsEvent::TriggerExited {
                    trigger,
                    body: other,
                });
            }
        }
    }

    /// Refreshes the debug view. Wire geometry is regenerated only for shapes
    /// whose tracked dimensions changed since the last pass; everything else
    /// is served from the per-collider cache with the current world pose
    /// applied on top.
    fn update_debug_view(&mut self, scene: &mut EngineScene) {
        self.debug_view.lines.clear();

        let force = self.settings.force_debug_view;
        let mut visible: Vec<ColliderHandle> = Vec::new();
        for backend in &self.backends {
            let Some(node) = self.nodes.get(backend.node) else {
                continue;
            };
            for (&collider, &shape_index) in
                backend.shape_handles.iter().zip(backend.shape_indices.iter())
            {
                let shown = force
                    || node
                        .shapes()
                        .get(shape_index)
                        .map(|shape| shape.enable_debug_view)
                        .unwrap_or_default();
                if shown {
                    visible.push(collider);
                }
            }
        }

        // Shapes that dropped out of the view also drop their cache entry.
        self.debug_view
            .cache
            .retain(|handle, _| visible.contains(handle));

        let mut stale = FxHashSet::default();
        for &handle in &visible {
            let Some(collider) = scene.colliders.get(handle) else {
                continue;
            };
            let dims = ShapeDimensions::of(collider.shape());
            let cached = self
                .debug_view
                .cache
                .get(&handle)
                .is_some_and(|entry| entry.dims.fuzzy_eq(&dims));
            if !cached {
                self.debug_view.cache.insert(
                    handle,
                    CachedShape {
                        dims,
                        lines: Vec::new(),
                    },
                );
                stale.insert(handle);
            }
        }

        if !stale.is_empty() {
            self.debug_view.included = stale;
            scene.draw(&mut self.debug_view);
            self.debug_view.included.clear();
            self.debug_view.regenerations += 1;
        }

        // Apply the current world pose to the cached local-space geometry.
        for &handle in &visible {
            let Some(collider) = scene.colliders.get(handle) else {
                continue;
            };
            let Some(entry) = self.debug_view.cache.get(&handle) else {
                continue;
            };
            let pose = *collider.position();
            for line in &entry.lines {
                self.debug_view.lines.push(Line {
                    begin: (pose * Point3::from(line.begin)).coords,
                    end: (pose * Point3::from(line.end)).coords,
                    color: line.color,
                });
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::node::{CharacterCollisions, CharacterController, DynamicRigidBody};
    use crate::shape::{CollisionShape, ShapeGeometry};

    const STEP: Duration = Duration::from_millis(17);

    fn static_floor() -> CollisionNode {
        CollisionNode::new(NodeKind::Static)
            .with_position(Vector3::new(0.0, -50.0, 0.0))
            .with_shape(CollisionShape::new(ShapeGeometry::Box {
                half_extents: Vector3::new(500.0, 50.0, 500.0),
            }))
    }

    fn dynamic_box(half: f32, y: f32) -> CollisionNode {
        CollisionNode::new(NodeKind::Dynamic(DynamicRigidBody::default()))
            .with_position(Vector3::new(0.0, y, 0.0))
            .with_shape(CollisionShape::new(ShapeGeometry::Box {
                half_extents: Vector3::repeat(half),
            }))
    }

    #[test]
    fn engine_initializes_on_first_tick() {
        let mut world = PhysicsWorld::default();
        assert!(!world.is_initialized());

        world.advance(STEP);
        assert!(world.is_initialized());
        assert_eq!(world.statistics().steps, 1);
    }

    #[test]
    fn sub_minimum_elapsed_accumulates() {
        let mut world = PhysicsWorld::default();
        world.advance(Duration::from_millis(8));
        assert_eq!(world.statistics().steps, 0);

        world.advance(Duration::from_millis(9));
        assert_eq!(world.statistics().steps, 1);
    }

    #[test]
    fn timestep_is_clamped_to_maximum() {
        let mut world = PhysicsWorld::default();
        world.advance(Duration::from_millis(500));
        let stats = world.statistics();
        assert!((stats.last_dt - 0.033333).abs() < 1.0e-4);
    }

    #[test]
    fn paused_world_does_nothing() {
        let mut world = PhysicsWorld::default();
        world.set_running(false);
        world.advance(STEP);
        assert!(!world.is_initialized());
    }

    #[test]
    fn tolerance_scale_is_frozen_after_init() {
        let mut world = PhysicsWorld::default();
        world.advance(STEP);

        world.set_enable_ccd(true);
        world.set_typical_length(1.0);
        world.set_typical_speed(10.0);

        assert!(!world.settings().enable_ccd);
        assert_eq!(world.settings().typical_length, 100.0);
        assert_eq!(world.settings().typical_speed, 1000.0);
    }

    #[test]
    fn dynamic_body_falls_under_gravity() {
        let mut world = PhysicsWorld::default();
        let body = world.add_node(dynamic_box(50.0, 500.0));

        for _ in 0..30 {
            world.advance(STEP);
        }

        let y = world.node(body).unwrap().position.y;
        assert!(y < 450.0, "body should have fallen, is at {y}");
    }

    #[test]
    fn removed_node_frees_its_backend() {
        let mut world = PhysicsWorld::default();
        let body = world.add_node(dynamic_box(50.0, 100.0));
        world.advance(STEP);
        world.advance(STEP);
        assert_eq!(world.backends.len(), 1);

        world.remove_node(body);
        assert!(world.node(body).is_none());
        world.advance(STEP);
        assert!(world.backends.is_empty());
    }

    #[test]
    fn static_geometry_forces_kinematic() {
        let mut world = PhysicsWorld::default();
        let body = world.add_node(
            CollisionNode::new(NodeKind::Dynamic(DynamicRigidBody::default()))
                .with_shape(CollisionShape::new(ShapeGeometry::Plane)),
        );

        world.advance(STEP);

        let node = world.node(body).unwrap();
        assert!(node.as_dynamic().unwrap().is_kinematic());
    }

    #[test]
    fn default_density_change_is_retroactive() {
        let mut world = PhysicsWorld::default();
        let body = world.add_node(dynamic_box(50.0, 100.0));
        world.advance(STEP);
        assert!(!world.node(body).unwrap().as_dynamic().unwrap().mass_dirty);

        world.set_default_density(0.002);
        assert!(world.node(body).unwrap().as_dynamic().unwrap().mass_dirty);

        // A body with its own density is not affected.
        let custom = world.add_node(dynamic_box(50.0, 300.0));
        world
            .node_mut(custom)
            .unwrap()
            .as_dynamic_mut()
            .unwrap()
            .set_density(1.0);
        world.advance(STEP);
        world.set_default_density(0.004);
        assert!(!world.node(custom).unwrap().as_dynamic().unwrap().mass_dirty);
    }

    #[test]
    fn handle_encoding_roundtrips() {
        let mut world = PhysicsWorld::default();
        let handle = world.add_node(static_floor());
        assert_eq!(decode_handle(encode_handle(handle)), Some(handle));
        assert_eq!(decode_handle(0), None);
    }

    #[test]
    fn contact_reports_respect_send_and_receive_flags() {
        let mut world = PhysicsWorld::default();

        let mut floor = static_floor();
        floor.send_contact_reports = true;
        let floor = world.add_node(floor);

        let mut ball = CollisionNode::new(NodeKind::Dynamic(DynamicRigidBody::default()))
            .with_position(Vector3::new(0.0, 200.0, 0.0))
            .with_shape(CollisionShape::new(ShapeGeometry::Sphere { radius: 50.0 }));
        ball.receive_contact_reports = true;
        let ball = world.add_node(ball);

        let mut contacts = Vec::new();
        for _ in 0..120 {
            world.advance(STEP);
            for event in world.drain_events() {
                if let PhysicsEvent::BodyContact { body, other, .. } = event {
                    contacts.push((body, other));
                }
            }
        }

        assert!(
            contacts.contains(&(ball, floor)),
            "the receiving ball should have been notified"
        );
        assert!(
            !contacts.iter().any(|&(body, _)| body == floor),
            "the floor does not receive contact reports"
        );
    }

    #[test]
    fn trigger_fires_entered_and_exited_once() {
        let mut world = PhysicsWorld::default();

        let trigger = world.add_node(
            CollisionNode::new(NodeKind::Trigger).with_shape(CollisionShape::new(
                ShapeGeometry::Box {
                    half_extents: Vector3::repeat(100.0),
                },
            )),
        );

        let mut ball = CollisionNode::new(NodeKind::Dynamic(DynamicRigidBody::default()))
            .with_position(Vector3::new(0.0, 400.0, 0.0))
            .with_shape(CollisionShape::new(ShapeGeometry::Sphere { radius: 50.0 }));
        ball.enable_trigger_reports = true;
        let ball = world.add_node(ball);

        let mut entered = 0;
        let mut exited = 0;
        for _ in 0..120 {
            world.advance(STEP);
            for event in world.drain_events() {
                match event {
                    PhysicsEvent::TriggerEntered { trigger: t, body } => {
                        assert_eq!((t, body), (trigger, ball));
                        assert_eq!(exited, 0, "entered must come first");
                        entered += 1;
                    }
                    PhysicsEvent::TriggerExited { trigger: t, body } => {
                        assert_eq!((t, body), (trigger, ball));
                        exited += 1;
                    }
                    _ => {}
                }
            }
        }

        assert_eq!(entered, 1);
        assert_eq!(exited, 1);
    }

    #[test]
    fn silent_bodies_produce_no_events() {
        let mut world = PhysicsWorld::default();
        world.add_node(static_floor());
        world.add_node(dynamic_box(50.0, 200.0));

        for _ in 0..60 {
            world.advance(STEP);
            assert!(world.drain_events().is_empty());
        }
    }

    #[test]
    fn character_lands_on_the_ground() {
        let mut world = PhysicsWorld::default();
        world.add_node(static_floor());

        let character = world.add_node(
            CollisionNode::new(NodeKind::Character(CharacterController {
                gravity: Vector3::new(0.0, -981.0, 0.0),
                ..Default::default()
            }))
            .with_position(Vector3::new(0.0, 300.0, 0.0))
            .with_shape(CollisionShape::new(ShapeGeometry::Capsule {
                radius: 50.0,
                half_height: 50.0,
            })),
        );

        for _ in 0..240 {
            world.advance(STEP);
        }

        let node = world.node(character).unwrap();
        assert!(
            node.as_character()
                .unwrap()
                .collisions()
                .contains(CharacterCollisions::DOWN),
            "character should be standing on the floor"
        );
        // Capsule total half height is 100 plus the controller's skin.
        let y = node.position.y;
        assert!((95.0..=115.0).contains(&y), "character rests at {y}");
    }

    #[test]
    fn character_teleport_is_immediate_and_one_shot() {
        let mut world = PhysicsWorld::default();
        let character = world.add_node(
            CollisionNode::new(NodeKind::Character(CharacterController::default()))
                .with_shape(CollisionShape::new(ShapeGeometry::Capsule {
                    radius: 50.0,
                    half_height: 50.0,
                })),
        );

        world.advance(STEP);
        world
            .node_mut(character)
            .unwrap()
            .as_character_mut()
            .unwrap()
            .teleport(Vector3::new(0.0, 1000.0, 0.0));
        world.advance(STEP);
        world.advance(STEP);

        let y = world.node(character).unwrap().position.y;
        assert!((y - 1000.0).abs() < 1.0, "character is at {y}");
    }

    #[test]
    fn non_capsule_character_gets_no_body() {
        let mut world = PhysicsWorld::default();
        world.add_node(
            CollisionNode::new(NodeKind::Character(CharacterController::default()))
                .with_shape(CollisionShape::new(ShapeGeometry::Sphere { radius: 50.0 })),
        );

        world.advance(STEP);
        assert!(world.backends[0].body.is_none());
    }

    #[test]
    fn node_removed_before_first_tick_allocates_nothing() {
        let mut world = PhysicsWorld::default();
        let body = world.add_node(dynamic_box(50.0, 100.0));
        world.remove_node(body);

        world.advance(STEP);
        assert!(world.backends.is_empty());
        assert_eq!(world.scene.as_ref().unwrap().bodies.len(), 0);
        assert_eq!(world.scene.as_ref().unwrap().colliders.len(), 0);
    }

    #[test]
    fn rebuilt_node_keeps_one_collider_per_shape() {
        let mut world = PhysicsWorld::default();
        let node = world.add_node(
            CollisionNode::new(NodeKind::Static)
                .with_shape(CollisionShape::new(ShapeGeometry::Box {
                    half_extents: Vector3::repeat(50.0),
                }))
                .with_shape(CollisionShape::new(ShapeGeometry::Sphere { radius: 25.0 })),
        );
        world.advance(STEP);
        assert_eq!(world.backends[0].shape_handles.len(), 2);
        assert_eq!(world.backends[0].shape_indices, vec![0, 1]);

        world
            .node_mut(node)
            .unwrap()
            .add_shape(CollisionShape::new(ShapeGeometry::Capsule {
                radius: 10.0,
                half_height: 20.0,
            }));
        world.advance(STEP);
        assert_eq!(world.backends[0].shape_handles.len(), 3);
        assert_eq!(world.backends[0].shape_indices, vec![0, 1, 2]);
    }

    #[test]
    fn events_for_a_removed_node_are_dropped() {
        let mut world = PhysicsWorld::default();

        let mut floor = static_floor();
        floor.send_contact_reports = true;
        floor.receive_contact_reports = true;
        world.add_node(floor);

        // Starts already overlapping the floor, so the very first step
        // records a contact.
        let mut ball = dynamic_box(50.0, 40.0);
        ball.send_contact_reports = true;
        ball.receive_contact_reports = true;
        let ball = world.add_node(ball);

        // The first tick runs the step; its events are still unrouted when
        // the node goes away.
        world.advance(STEP);
        world.remove_node(ball);

        for _ in 0..10 {
            world.advance(STEP);
            assert!(
                world.drain_events().is_empty(),
                "no event may reference a removed node"
            );
        }
    }

    #[test]
    fn contact_fan_out_inverts_only_the_normal() {
        let mut world = PhysicsWorld::default();

        let mut floor = static_floor();
        floor.send_contact_reports = true;
        floor.receive_contact_reports = true;
        let floor = world.add_node(floor);

        let mut ball = CollisionNode::new(NodeKind::Dynamic(DynamicRigidBody::default()))
            .with_position(Vector3::new(0.0, 200.0, 0.0))
            .with_shape(CollisionShape::new(ShapeGeometry::Sphere { radius: 50.0 }));
        ball.send_contact_reports = true;
        ball.receive_contact_reports = true;
        let ball = world.add_node(ball);

        let mut to_ball = None;
        let mut to_floor = None;
        for _ in 0..120 {
            world.advance(STEP);
            for event in world.drain_events() {
                if let PhysicsEvent::BodyContact { body, points, .. } = event {
                    if body == ball {
                        to_ball = Some(points);
                    } else if body == floor {
                        to_floor = Some(points);
                    }
                }
            }
            if to_ball.is_some() && to_floor.is_some() {
                break;
            }
        }

        let to_ball = to_ball.expect("ball should have been notified");
        let to_floor = to_floor.expect("floor should have been notified");
        assert_eq!(to_ball.len(), to_floor.len());
        for (a, b) in to_ball.iter().zip(to_floor.iter()) {
            assert_eq!(a.position, b.position);
            assert_eq!(a.normal, -b.normal, "normals flip per direction");
            assert_eq!(a.impulse, b.impulse, "impulses are delivered unflipped");
        }
    }

    #[test]
    fn contacts_for_polls_the_narrow_phase() {
        let mut world = PhysicsWorld::default();
        let floor = world.add_node(static_floor());
        let ball = world.add_node(dynamic_box(50.0, 60.0));

        for _ in 0..120 {
            world.advance(STEP);
        }

        // No reporting flags were set; the poll works regardless.
        let pairs = world.contacts_for(ball);
        assert!(!pairs.is_empty(), "a resting body has narrow-phase contacts");
        let pair = &pairs[0];
        assert!(
            (pair.node1, pair.node2) == (ball, floor) || (pair.node1, pair.node2) == (floor, ball)
        );
        assert!(pair.has_any_active_contact);
        assert!(!pair.points.is_empty());

        assert!(world.contacts_for(NodeHandle::default()).is_empty());
    }

    #[test]
    fn velocity_push_down_overrides_body_motion() {
        let mut world = PhysicsWorld::new(WorldSettings {
            gravity: Vector3::zeros(),
            ..Default::default()
        });
        let body = world.add_node(dynamic_box(50.0, 100.0));
        world.advance(STEP);

        world
            .node_mut(body)
            .unwrap()
            .as_dynamic_mut()
            .unwrap()
            .set_linear_velocity(Vector3::new(100.0, 0.0, 0.0));
        for _ in 0..30 {
            world.advance(STEP);
        }

        let position = world.node(body).unwrap().position;
        assert!(position.x > 10.0, "body should drift along x, is at {}", position.x);
        assert!((position.y - 100.0).abs() < 1.0);
    }

    #[test]
    fn debug_view_caches_geometry_until_dimensions_change() {
        let mut world = PhysicsWorld::default();
        let mut shape = CollisionShape::new(ShapeGeometry::Box {
            half_extents: Vector3::repeat(50.0),
        });
        shape.enable_debug_view = true;
        let node = world.add_node(CollisionNode::new(NodeKind::Static).with_shape(shape));

        world.advance(STEP);
        assert_eq!(world.debug_view.regenerations, 1);
        let line_count = world.debug_view().lines.len();
        assert!(line_count > 0);

        world.advance(STEP);
        world.advance(STEP);
        assert_eq!(
            world.debug_view.regenerations, 1,
            "unchanged shapes are served from the cache"
        );
        assert_eq!(world.debug_view().lines.len(), line_count);

        // Moving the node refreshes the pose without regenerating.
        world.node_mut(node).unwrap().position = Vector3::new(0.0, 200.0, 0.0);
        world.advance(STEP);
        world.advance(STEP);
        assert_eq!(world.debug_view.regenerations, 1);
        assert!(world.debug_view().lines.iter().all(|line| line.begin.y > 100.0));

        // A scale change rebuilds the collider, which invalidates the cache.
        world.node_mut(node).unwrap().shapes_mut()[0].set_scale(Vector3::repeat(2.0));
        world.advance(STEP);
        assert_eq!(world.debug_view.regenerations, 2);
    }

    #[test]
    fn debug_view_is_opt_in_per_shape() {
        let mut world = PhysicsWorld::default();
        world.add_node(static_floor());
        world.advance(STEP);
        assert!(world.debug_view().lines.is_empty());

        let mut shape = CollisionShape::new(ShapeGeometry::Box {
            half_extents: Vector3::repeat(50.0),
        });
        shape.enable_debug_view = true;
        world.add_node(CollisionNode::new(NodeKind::Static).with_shape(shape));
        world.advance(STEP);
        world.advance(STEP);
        assert!(!world.debug_view().lines.is_empty());
    }
}
