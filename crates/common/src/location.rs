//! Timestamped spatial coordinate with optional containment ids.
//!
//! A location has three parts: a world space (absent inside interior
//! cells), a cell (absent only between loads; a location without a cell is
//! "empty"), and cartesian world coordinates. Locations order by the time
//! they were sampled, measured from a process-wide epoch captured when the
//! first location is built.

use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

use crate::codec;
use crate::error::ProtocolError;
use crate::property::{Property, PropertyTag};
use crate::socket::ANTI_CONGESTION;

pub const LOCATION_SIZE: usize = 25;

const FLAG_HAS_CELL: u8 = 0x1;
const FLAG_HAS_WORLD_SPACE: u8 = 0x2;

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn elapsed_since_epoch() -> i32 {
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as i32
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    elapsed_ms: i32,
    has_world_space: bool,
    has_cell: bool,
    world_space_id: u32,
    cell_id: u32,
    position: [f32; 3],
}

impl Default for Location {
    fn default() -> Self {
        Self::empty()
    }
}

impl Location {
    /// A location that names nowhere. Consumers ignore its coordinates.
    pub fn empty() -> Self {
        Self {
            elapsed_ms: 0,
            has_world_space: false,
            has_cell: false,
            world_space_id: 0,
            cell_id: 0,
            position: [0.0; 3],
        }
    }

    /// Builds a location sampled now. `world_space_id` is `None` inside
    /// interior cells; `cell_id` of `None` produces an empty location.
    pub fn new(world_space_id: Option<u32>, cell_id: Option<u32>, position: [f32; 3]) -> Self {
        Self {
            elapsed_ms: elapsed_since_epoch(),
            has_world_space: world_space_id.is_some(),
            has_cell: cell_id.is_some(),
            world_space_id: world_space_id.unwrap_or(0),
            cell_id: cell_id.unwrap_or(0),
            position,
        }
    }

    pub fn has_world_space(&self) -> bool {
        self.has_world_space
    }

    pub fn has_cell(&self) -> bool {
        self.has_cell
    }

    pub fn is_empty(&self) -> bool {
        !self.has_cell
    }

    pub fn world_space_id(&self) -> u32 {
        self.world_space_id
    }

    pub fn cell_id(&self) -> u32 {
        self.cell_id
    }

    /// Milliseconds after the first location built in this process.
    pub fn elapsed_ms(&self) -> i32 {
        self.elapsed_ms
    }

    pub fn x(&self) -> f32 {
        self.position[0]
    }

    pub fn y(&self) -> f32 {
        self.position[1]
    }

    pub fn z(&self) -> f32 {
        self.position[2]
    }

    pub fn position(&self) -> [f32; 3] {
        self.position
    }

    pub fn encode(&self) -> [u8; LOCATION_SIZE] {
        let mut out = [0u8; LOCATION_SIZE];
        out[0..4].copy_from_slice(&codec::pack_i32(self.elapsed_ms));
        out[4] = self.flags();
        out[5..9].copy_from_slice(&codec::pack_u32(self.world_space_id));
        out[9..13].copy_from_slice(&codec::pack_u32(self.cell_id));
        for (i, coord) in self.position.iter().enumerate() {
            out[13 + i * 4..17 + i * 4].copy_from_slice(&codec::pack_f32(*coord));
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != LOCATION_SIZE {
            return Err(ProtocolError::BadLocationSize(bytes.len()));
        }
        let flags = bytes[4];
        if flags & !(FLAG_HAS_CELL | FLAG_HAS_WORLD_SPACE) != 0 {
            return Err(ProtocolError::BadLocationFlags(flags));
        }
        let mut position = [0.0f32; 3];
        for (i, coord) in position.iter_mut().enumerate() {
            *coord = codec::unpack_f32(&bytes[13 + i * 4..])?;
        }
        Ok(Self {
            elapsed_ms: codec::unpack_i32(&bytes[0..4])?,
            has_world_space: flags & FLAG_HAS_WORLD_SPACE != 0,
            has_cell: flags & FLAG_HAS_CELL != 0,
            world_space_id: codec::unpack_u32(&bytes[5..9])?,
            cell_id: codec::unpack_u32(&bytes[9..13])?,
            position,
        })
    }

    pub fn to_property(&self) -> Property {
        Property {
            tag: PropertyTag::Location,
            value: self.encode().to_vec(),
        }
    }

    pub fn from_property(property: &Property) -> Result<Self, ProtocolError> {
        if property.tag != PropertyTag::Location {
            return Err(ProtocolError::BadLocationSize(property.value.len()));
        }
        Self::decode(&property.value)
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.has_world_space {
            flags |= FLAG_HAS_WORLD_SPACE;
        }
        if self.has_cell {
            flags |= FLAG_HAS_CELL;
        }
        flags
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x(), self.y(), self.z())
    }
}

/// Difference of sample times in milliseconds, `a - b`. When either side
/// is empty the anti-congestion interval stands in as a safe non-zero
/// default.
pub fn time_subtract(a: &Location, b: &Location) -> i32 {
    if a.is_empty() || b.is_empty() {
        return ANTI_CONGESTION.as_millis() as i32;
    }
    a.elapsed_ms() - b.elapsed_ms()
}

/// Euclidean distance; 0 when either side is empty.
pub fn distance_between(a: &Location, b: &Location) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dx = a.x() - b.x();
    let dy = a.y() - b.y();
    let dz = a.z() - b.z();
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// True when both lack a cell or the cell ids match.
pub fn in_same_cell(a: &Location, b: &Location) -> bool {
    a.has_cell() == b.has_cell() && (!a.has_cell() || a.cell_id() == b.cell_id())
}

/// True when both lack a world space or the world space ids match.
pub fn in_same_world_space(a: &Location, b: &Location) -> bool {
    a.has_world_space() == b.has_world_space()
        && (!a.has_world_space() || a.world_space_id() == b.world_space_id())
}

/// Same cell, or both have a world space and the ids match.
pub fn in_same_area(a: &Location, b: &Location) -> bool {
    in_same_cell(a, b)
        || (a.has_world_space() && b.has_world_space() && a.world_space_id() == b.world_space_id())
}

/// Eight opaque 32-bit engine fields carried verbatim between clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadedState {
    pub fields: [u32; 8],
}

impl LoadedState {
    pub fn to_property(&self) -> Property {
        let mut value = Vec::with_capacity(32);
        for field in &self.fields {
            value.extend_from_slice(&codec::pack_u32(*field));
        }
        Property {
            tag: PropertyTag::LoadedState,
            value,
        }
    }

    pub fn from_property(property: &Property) -> Result<Self, ProtocolError> {
        if property.value.len() != 32 {
            return Err(ProtocolError::BadLoadedStateSize(property.value.len()));
        }
        let mut fields = [0u32; 8];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = codec::unpack_u32(&property.value[i * 4..])?;
        }
        Ok(Self { fields })
    }
}

impl fmt::Display for LoadedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for field in &self.fields {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{field}")?;
            first = false;
        }
        Ok(())
    }
}
