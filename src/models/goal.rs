//! Navigation goal coordinates.

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// A block position handed to the session's navigation capability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockGoal {
    /// East/west coordinate.
    pub x: i32,
    /// Height.
    pub y: i32,
    /// North/south coordinate.
    pub z: i32,
}

impl BlockGoal {
    /// Construct a goal from integer block coordinates.
    #[must_use]
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Build a goal from the `[x, y, z]` array sent by operators.
    ///
    /// Fractional coordinates are floored to the containing block.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Control` if a coordinate is not finite or does
    /// not fit a block coordinate.
    pub fn from_position(pos: [f64; 3]) -> Result<Self> {
        let [x, y, z] = pos;
        Ok(Self {
            x: to_block(x)?,
            y: to_block(y)?,
            z: to_block(z)?,
        })
    }
}

#[allow(clippy::cast_possible_truncation)] // range checked above the cast
fn to_block(value: f64) -> Result<i32> {
    let floored = value.floor();
    if !floored.is_finite() || floored < f64::from(i32::MIN) || floored > f64::from(i32::MAX) {
        return Err(AppError::Control(format!(
            "coordinate out of range: {value}"
        )));
    }
    Ok(floored as i32)
}
