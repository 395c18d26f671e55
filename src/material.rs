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

//! Physics materials.

use serde::{Deserialize, Serialize};

/// Rules used to combine the two coefficients of a contact.
///
/// Each collider carries a combination rule for friction and one for
/// restitution; the rule actually used for a contact is
/// `max(first_rule, second_rule)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoefficientCombineRule {
    /// The two coefficients are averaged.
    #[default]
    Average,
    /// The smallest coefficient is chosen.
    Min,
    /// The two coefficients are multiplied.
    Multiply,
    /// The greatest coefficient is chosen.
    Max,
}

impl From<CoefficientCombineRule> for rapier3d::dynamics::CoefficientCombineRule {
    fn from(v: CoefficientCombineRule) -> Self {
        match v {
            CoefficientCombineRule::Average => Self::Average,
            CoefficientCombineRule::Min => Self::Min,
            CoefficientCombineRule::Multiply => Self::Multiply,
            CoefficientCombineRule::Max => Self::Max,
        }
    }
}

/// Surface properties shared by every shape of a collision node.
///
/// Friction uses the Coulomb friction model; restitution is the fraction of
/// the impact speed preserved along the line of impact. Nodes without an
/// explicit material use the world's shared default material, which is created
/// once and lives as long as the world does.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhysicsMaterial {
    friction: f32,
    restitution: f32,
    /// Rule used to combine this material's friction with the other side's.
    pub friction_combine_rule: CoefficientCombineRule,
    /// Rule used to combine this material's restitution with the other side's.
    pub restitution_combine_rule: CoefficientCombineRule,
}

impl Default for PhysicsMaterial {
    fn default() -> Self {
        Self {
            friction: 0.5,
            restitution: 0.5,
            friction_combine_rule: CoefficientCombineRule::default(),
            restitution_combine_rule: CoefficientCombineRule::default(),
        }
    }
}

impl PhysicsMaterial {
    /// Creates a material with the given friction and restitution, clamped to
    /// their valid ranges.
    pub fn new(friction: f32, restitution: f32) -> Self {
        Self {
            friction: friction.max(0.0),
            restitution: restitution.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    /// Friction coefficient applied between surfaces moving relative to each
    /// other. Default is `0.5`.
    pub fn friction(&self) -> f32 {
        self.friction
    }

    /// Sets the friction coefficient, clamped to be non-negative.
    pub fn set_friction(&mut self, friction: f32) {
        self.friction = friction.max(0.0);
    }

    /// Coefficient of restitution. `1.0` collides elastically, values below
    /// dampen the bounce. Default is `0.5`.
    pub fn restitution(&self) -> f32 {
        self.restitution
    }

    /// Sets the coefficient of restitution, clamped to `[0, 1]`.
    pub fn set_restitution(&mut self, restitution: f32) {
        self.restitution = restitution.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn setters_clamp_to_valid_ranges() {
        let mut material = PhysicsMaterial::default();
        material.set_friction(-1.0);
        assert_eq!(material.friction(), 0.0);
        material.set_restitution(2.0);
        assert_eq!(material.restitution(), 1.0);
        material.set_restitution(-0.5);
        assert_eq!(material.restitution(), 0.0);
    }
}
