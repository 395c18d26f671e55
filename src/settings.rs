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

//! Global world tuning parameters.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Smallest default density the world will accept; densities below this make
/// the solver numerically unstable.
pub const MIN_DEFAULT_DENSITY: f32 = 1.0e-7;

/// A set of parameters that define the behavior of the whole physics world.
///
/// The default units follow the original scene conventions: lengths are in
/// centimeters, so the default gravity is `(0, -981, 0)` and the default
/// density `0.001` corresponds to the density of water. `typical_length` and
/// `typical_speed` are engine tolerance scales and are frozen once the engine
/// has been initialized on the first tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldSettings {
    /// Gravity vector of the physics world.
    pub gravity: Vector3<f32>,
    /// Starts or stops the simulation.
    pub running: bool,
    /// Enables continuous collision detection. Must be set before the first
    /// tick; later changes are rejected with a warning.
    pub enable_ccd: bool,
    /// Approximate size of objects in the simulation, used to derive
    /// length-related engine tolerances. Init-time only.
    pub typical_length: f32,
    /// Typical magnitude of object velocities, used to derive resting/bouncing
    /// and sleep thresholds. Init-time only.
    pub typical_speed: f32,
    /// Default density of dynamic bodies in density mass mode, in mass per
    /// cubic unit. Changing it on a live world retroactively updates every
    /// density-mode body that does not carry its own density.
    pub default_density: f32,
    /// Minimum simulation timestep in milliseconds; ticks arriving earlier
    /// than this are skipped entirely.
    pub min_timestep: f32,
    /// Maximum simulation timestep in milliseconds; longer wall-time gaps are
    /// clamped to keep the integration stable.
    pub max_timestep: f32,
    /// Generate debug-view geometry for every shape, not only the ones that
    /// opted in.
    pub force_debug_view: bool,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            gravity: Vector3::new(0.0, -981.0, 0.0),
            running: true,
            enable_ccd: false,
            typical_length: 100.0,
            typical_speed: 1000.0,
            default_density: 0.001,
            min_timestep: 16.667,
            max_timestep: 33.333,
            force_debug_view: false,
        }
    }
}
