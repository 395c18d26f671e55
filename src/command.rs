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

//! Deferred commands executed against an engine body at a safe point of the
//! tick.
//!
//! Mutations requested from user code between ticks are not applied to the
//! engine immediately. They are queued on the owning node and drained during
//! synchronization, after the node's shapes have been rebuilt, so a command
//! never observes a body whose colliders are missing or stale.

use log::warn;
use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};
use rapier3d::dynamics::{MassProperties, RigidBody};
use rapier3d::geometry::{ColliderHandle, ColliderSet};

/// A single deferred mutation of an engine body.
///
/// Mass commands are re-queued by the backend whenever the node's shapes are
/// rebuilt, since replacing colliders resets the engine's mass bookkeeping.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Derive mass and inertia from the shapes' volumes and the given density.
    SetDensity(f32),
    /// Set the total mass, deriving inertia and center of mass from the
    /// shapes as if the body had uniform density.
    SetMass(f32),
    /// Set mass, center of mass and the principal diagonal of the inertia
    /// tensor explicitly.
    SetMassAndInertiaTensor {
        mass: f32,
        center_of_mass: Point3<f32>,
        inertia: Vector3<f32>,
    },
    /// Set mass and a full inertia matrix; the matrix is decomposed into
    /// principal axes before it is handed to the engine.
    SetMassAndInertiaMatrix {
        mass: f32,
        center_of_mass: Point3<f32>,
        inertia: Matrix3<f32>,
    },
    /// Accumulate a force applied at the center of mass.
    ApplyCentralForce(Vector3<f32>),
    /// Accumulate a force applied at a world-space point.
    ApplyForceAt {
        force: Vector3<f32>,
        point: Point3<f32>,
    },
    /// Accumulate a torque.
    ApplyTorque(Vector3<f32>),
    /// Apply an instant impulse at the center of mass.
    ApplyCentralImpulse(Vector3<f32>),
    /// Apply an instant impulse at a world-space point.
    ApplyImpulseAt {
        impulse: Vector3<f32>,
        point: Point3<f32>,
    },
    /// Apply an instant angular impulse.
    ApplyTorqueImpulse(Vector3<f32>),
    /// Teleport the body to a pose, zeroing its velocities.
    Reset {
        position: Vector3<f32>,
        rotation: UnitQuaternion<f32>,
    },
}

impl Command {
    /// Executes the command against `body`. `shape_handles` lists the body's
    /// current colliders; mass commands need them to reset densities.
    pub(crate) fn execute(
        self,
        body: &mut RigidBody,
        colliders: &mut ColliderSet,
        shape_handles: &[ColliderHandle],
    ) {
        match self {
            Command::SetDensity(density) => {
                for &handle in shape_handles {
                    if let Some(collider) = colliders.get_mut(handle) {
                        collider.set_density(density);
                    }
                }
                body.set_additional_mass_properties(
                    MassProperties::new(Point3::origin(), 0.0, Vector3::zeros()),
                    false,
                );
                body.recompute_mass_properties_from_colliders(colliders);
            }
            Command::SetMass(mass) => {
                // Keep the shape-derived inertia and center of mass, replace
                // only the total mass.
                for &handle in shape_handles {
                    if let Some(collider) = colliders.get_mut(handle) {
                        collider.set_density(1.0);
                    }
                }
                body.recompute_mass_properties_from_colliders(colliders);
                let mut props = if body.mass() > 0.0 {
                    body.mass_properties().local_mprops
                } else {
                    MassProperties::new(Point3::origin(), mass, Vector3::zeros())
                };
                props.set_mass(mass, true);
                for &handle in shape_handles {
                    if let Some(collider) = colliders.get_mut(handle) {
                        collider.set_density(0.0);
                    }
                }
                body.set_additional_mass_properties(props, true);
            }
            Command::SetMassAndInertiaTensor {
                mass,
                center_of_mass,
                inertia,
            } => {
                for &handle in shape_handles {
                    if let Some(collider) = colliders.get_mut(handle) {
                        collider.set_density(0.0);
                    }
                }
                body.set_additional_mass_properties(
                    MassProperties::new(center_of_mass, mass, inertia),
                    true,
                );
            }
            Command::SetMassAndInertiaMatrix {
                mass,
                center_of_mass,
                inertia,
            } => {
                for &handle in shape_handles {
                    if let Some(collider) = colliders.get_mut(handle) {
                        collider.set_density(0.0);
                    }
                }
                let eigen = inertia.symmetric_eigen();
                let principal = eigen.eigenvalues;
                let frame = UnitQuaternion::from_matrix(&eigen.eigenvectors);
                body.set_additional_mass_properties(
                    MassProperties::with_principal_inertia_frame(
                        center_of_mass,
                        mass,
                        principal,
                        frame,
                    ),
                    true,
                );
            }
            Command::ApplyCentralForce(force) => body.add_force(force, true),
            Command::ApplyForceAt { force, point } => body.add_force_at_point(force, point, true),
            Command::ApplyTorque(torque) => body.add_torque(torque, true),
            Command::ApplyCentralImpulse(impulse) => body.apply_impulse(impulse, true),
            Command::ApplyImpulseAt { impulse, point } => {
                body.apply_impulse_at_point(impulse, point, true)
            }
            Command::ApplyTorqueImpulse(impulse) => body.apply_torque_impulse(impulse, true),
            Command::Reset { position, rotation } => {
                body.set_position(crate::make_isometry(position, rotation), true);
                body.set_linvel(Vector3::zeros(), true);
                body.set_angvel(Vector3::zeros(), true);
            }
        }
    }

    /// Commands that only make sense on a simulated (non-kinematic) body.
    /// Applying them to a kinematic body is a user error worth a warning.
    pub(crate) fn requires_simulated_body(&self) -> bool {
        matches!(
            self,
            Command::ApplyCentralForce(_)
                | Command::ApplyForceAt { .. }
                | Command::ApplyTorque(_)
                | Command::ApplyCentralImpulse(_)
                | Command::ApplyImpulseAt { .. }
                | Command::ApplyTorqueImpulse(_)
        )
    }

    pub(crate) fn warn_if_kinematic(&self, is_kinematic: bool) -> bool {
        if is_kinematic && self.requires_simulated_body() {
            warn!("forces and impulses have no effect on kinematic bodies");
            false
        } else {
            true
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kinematic_bodies_reject_forces_only() {
        assert!(!Command::ApplyCentralForce(Vector3::y()).warn_if_kinematic(true));
        assert!(Command::SetMass(1.0).warn_if_kinematic(true));
        assert!(Command::ApplyCentralForce(Vector3::y()).warn_if_kinematic(false));
    }
}
