use serde::{Deserialize, Serialize};

use crate::world::{WorldId, WorldRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, by: BlockPos) -> Self {
        Self {
            x: self.x.saturating_add(by.x),
            y: self.y.saturating_add(by.y),
            z: self.z.saturating_add(by.z),
        }
    }

    /// `x,y,z` form used in log lines and notices.
    pub fn xyz(self) -> String {
        format!("{},{},{}", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: WorldId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl Location {
    pub fn new(world: WorldId, x: f64, y: f64, z: f64) -> Self {
        Self {
            world,
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn block(&self) -> BlockPos {
        BlockPos {
            x: self.x.floor() as i32,
            y: self.y.floor() as i32,
            z: self.z.floor() as i32,
        }
    }
}

/// Serializes to `world:x:y:z:yawBits:pitchBits`; `None` yields an empty
/// string.
pub fn location_to_string(location: Option<&Location>) -> String {
    let Some(location) = location else {
        return String::new();
    };
    format!(
        "{}:{}:{}:{}:{}:{}",
        location.world,
        format_coordinate(location.x),
        format_coordinate(location.y),
        format_coordinate(location.z),
        location.yaw.to_bits() as i32,
        location.pitch.to_bits() as i32
    )
}

/// Parses the form written by [`location_to_string`]. Returns `None` for
/// blank input, a wrong field count, unparseable numbers, or a world the
/// registry does not know.
pub fn parse_location(raw: &str, worlds: &WorldRegistry) -> Option<Location> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parts = raw.split(':').collect::<Vec<_>>();
    let [world, x, y, z, yaw, pitch] = parts.as_slice() else {
        return None;
    };
    let world = WorldId::new(*world);
    if !worlds.contains(&world) {
        return None;
    }
    Some(Location {
        world,
        x: x.parse().ok()?,
        y: y.parse().ok()?,
        z: z.parse().ok()?,
        yaw: f32::from_bits(yaw.parse::<i32>().ok()? as u32),
        pitch: f32::from_bits(pitch.parse::<i32>().ok()? as u32),
    })
}

fn format_coordinate(value: f64) -> String {
    // Debug keeps a trailing ".0" on whole numbers.
    format!("{:?}", (value * 100.0).round() / 100.0)
}
