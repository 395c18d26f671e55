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

//! End-to-end scenarios driving a whole world over many ticks.

use dynamics_world::{
    CollisionNode, CollisionShape, DynamicRigidBody, MassMode, NodeKind, PhysicsMaterial,
    PhysicsWorld, ShapeGeometry,
};
use nalgebra::Vector3;
use std::time::Duration;

const STEP: Duration = Duration::from_millis(17);

fn floor() -> CollisionNode {
    CollisionNode::new(NodeKind::Static)
        .with_position(Vector3::new(0.0, -50.0, 0.0))
        .with_shape(CollisionShape::new(ShapeGeometry::Box {
            half_extents: Vector3::new(1000.0, 50.0, 1000.0),
        }))
        .with_material(PhysicsMaterial::new(0.5, 0.0))
}

fn run(world: &mut PhysicsWorld, ticks: usize) {
    for _ in 0..ticks {
        world.advance(STEP);
    }
}

#[test]
fn dropped_box_settles_on_the_floor() {
    let mut world = PhysicsWorld::default();
    world.add_node(floor());

    let half_extent = 50.0;
    let body = world.add_node(
        CollisionNode::new(NodeKind::Dynamic(DynamicRigidBody::default()))
            .with_position(Vector3::new(0.0, 300.0, 0.0))
            .with_shape(CollisionShape::new(ShapeGeometry::Box {
                half_extents: Vector3::repeat(half_extent),
            }))
            .with_material(PhysicsMaterial::new(0.5, 0.0)),
    );

    // Roughly five simulated seconds, far more than the fall takes.
    run(&mut world, 300);

    let position = world.node(body).unwrap().position;
    assert!(
        (position.y - half_extent).abs() < 5.0,
        "box should rest on the floor, is at y = {}",
        position.y
    );

    // Settled means it stays put.
    run(&mut world, 60);
    let after = world.node(body).unwrap().position;
    assert!((after.y - position.y).abs() < 1.0);
}

#[test]
fn impulse_pushes_a_resting_body() {
    let mut world = PhysicsWorld::default();
    world.add_node(floor());

    let body = world.add_node(
        CollisionNode::new(NodeKind::Dynamic(DynamicRigidBody::default()))
            .with_position(Vector3::new(0.0, 50.0, 0.0))
            .with_shape(CollisionShape::new(ShapeGeometry::Box {
                half_extents: Vector3::repeat(50.0),
            }))
            .with_material(PhysicsMaterial::new(0.5, 0.0)),
    );
    run(&mut world, 120);

    let mass = 1000.0;
    {
        let drb = world.node_mut(body).unwrap().as_dynamic_mut().unwrap();
        drb.set_mass_mode(MassMode::Mass);
        drb.set_mass(mass);
        drb.apply_central_impulse(Vector3::new(mass * 500.0, 0.0, 0.0));
    }
    run(&mut world, 60);

    let x = world.node(body).unwrap().position.x;
    assert!(x > 100.0, "impulse should have moved the body, x = {x}");
}

#[test]
fn reset_teleports_and_stops_a_body() {
    let mut world = PhysicsWorld::default();
    world.add_node(floor());

    let body = world.add_node(
        CollisionNode::new(NodeKind::Dynamic(DynamicRigidBody::default()))
            .with_position(Vector3::new(0.0, 500.0, 0.0))
            .with_shape(CollisionShape::new(ShapeGeometry::Sphere { radius: 50.0 })),
    );
    run(&mut world, 30);

    let target = Vector3::new(200.0, 400.0, 0.0);
    world
        .node_mut(body)
        .unwrap()
        .as_dynamic_mut()
        .unwrap()
        .reset(target, nalgebra::UnitQuaternion::identity());
    world.advance(STEP);
    world.advance(STEP);

    let position = world.node(body).unwrap().position;
    assert!((position.x - target.x).abs() < 1.0);
    // Velocities were zeroed, so only one step of gravity applies.
    assert!(position.y > 380.0 && position.y <= target.y);
}

#[test]
fn kinematic_body_follows_its_node() {
    let mut world = PhysicsWorld::default();

    let mut drb = DynamicRigidBody::default();
    drb.set_kinematic(true);
    let body = world.add_node(
        CollisionNode::new(NodeKind::Dynamic(drb))
            .with_position(Vector3::new(0.0, 100.0, 0.0))
            .with_shape(CollisionShape::new(ShapeGeometry::Box {
                half_extents: Vector3::repeat(50.0),
            })),
    );
    run(&mut world, 10);

    // Kinematic bodies do not fall.
    assert_eq!(world.node(body).unwrap().position.y, 100.0);

    world.node_mut(body).unwrap().position = Vector3::new(0.0, 250.0, 0.0);
    run(&mut world, 5);
    let y = world.node(body).unwrap().position.y;
    assert!((y - 250.0).abs() < 1.0, "kinematic body is at y = {y}");
}

#[test]
fn locked_axes_constrain_motion() {
    let mut world = PhysicsWorld::default();
    world.add_node(floor());

    let mut drb = DynamicRigidBody::default();
    drb.axis_lock_linear = dynamics_world::AxisLock::X | dynamics_world::AxisLock::Z;
    let body = world.add_node(
        CollisionNode::new(NodeKind::Dynamic(drb))
            .with_position(Vector3::new(0.0, 300.0, 0.0))
            .with_shape(CollisionShape::new(ShapeGeometry::Sphere { radius: 50.0 })),
    );
    run(&mut world, 30);

    {
        let drb = world.node_mut(body).unwrap().as_dynamic_mut().unwrap();
        drb.apply_central_impulse(Vector3::new(1000.0, 0.0, 0.0));
    }
    run(&mut world, 30);

    let position = world.node(body).unwrap().position;
    assert!(position.x.abs() < 1.0, "x is locked, body at {}", position.x);
    assert!(position.y < 300.0, "y is free to fall");
}
