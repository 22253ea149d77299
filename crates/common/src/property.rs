//! Self-describing TLV stream of typed avatar attributes.
//!
//! A stream is the concatenation of `(tag u8, length u32 BE, bytes)` with
//! no outer count; the end is marked by buffer exhaustion. Streams are
//! concatenable and parse in one forward pass.

use std::sync::Mutex;

use crate::codec;
use crate::error::ProtocolError;

pub const TAG_COUNT: u8 = 7;

/// The closed set of attribute tags. Unknown tag bytes are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PropertyTag {
    Id = 0,
    CellName = 1,
    Status = 2,
    Name = 3,
    Location = 4,
    WorldSpaceName = 5,
    LoadedState = 6,
}

impl PropertyTag {
    pub fn from_byte(b: u8) -> Result<Self, ProtocolError> {
        match b {
            0 => Ok(PropertyTag::Id),
            1 => Ok(PropertyTag::CellName),
            2 => Ok(PropertyTag::Status),
            3 => Ok(PropertyTag::Name),
            4 => Ok(PropertyTag::Location),
            5 => Ok(PropertyTag::WorldSpaceName),
            6 => Ok(PropertyTag::LoadedState),
            other => Err(ProtocolError::UnknownPropertyTag(other)),
        }
    }

    /// Column label used by the dashboard.
    pub fn label(self) -> &'static str {
        match self {
            PropertyTag::Id => "Id",
            PropertyTag::CellName => "Cell",
            PropertyTag::Status => "Status",
            PropertyTag::Name => "Name",
            PropertyTag::Location => "Position",
            PropertyTag::WorldSpaceName => "World Space",
            PropertyTag::LoadedState => "Loaded States",
        }
    }
}

/// One tagged attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub tag: PropertyTag,
    pub value: Vec<u8>,
}

pub fn pack_string(tag: PropertyTag, s: &str) -> Property {
    Property {
        tag,
        value: s.as_bytes().to_vec(),
    }
}

pub fn unpack_string(property: &Property) -> String {
    String::from_utf8_lossy(&property.value).into_owned()
}

/// An ordered, packed sequence of properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyStream {
    bytes: Vec<u8>,
}

impl PropertyStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps already-packed bytes, e.g. a `Properties` packet payload.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn push(&mut self, property: &Property) {
        self.bytes.push(property.tag as u8);
        self.bytes
            .extend_from_slice(&codec::pack_u32(property.value.len() as u32));
        self.bytes.extend_from_slice(&property.value);
    }

    /// Appends every property of `other` to this stream.
    pub fn concat(&mut self, other: &PropertyStream) {
        self.bytes.extend_from_slice(&other.bytes);
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn iter(&self) -> PropertyIter<'_> {
        PropertyIter {
            rest: &self.bytes,
            poisoned: false,
        }
    }
}

impl FromIterator<Property> for PropertyStream {
    fn from_iter<T: IntoIterator<Item = Property>>(iter: T) -> Self {
        let mut stream = PropertyStream::new();
        for property in iter {
            stream.push(&property);
        }
        stream
    }
}

impl<'a> IntoIterator for &'a PropertyStream {
    type Item = Result<Property, ProtocolError>;
    type IntoIter = PropertyIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Forward-only cursor over a packed stream. An unknown tag or partial
/// trailing bytes yield one `Err` and end the iteration.
#[derive(Debug)]
pub struct PropertyIter<'a> {
    rest: &'a [u8],
    poisoned: bool,
}

impl Iterator for PropertyIter<'_> {
    type Item = Result<Property, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.poisoned || self.rest.is_empty() {
            return None;
        }
        match self.parse_one() {
            Ok(property) => Some(Ok(property)),
            Err(e) => {
                self.poisoned = true;
                Some(Err(e))
            }
        }
    }
}

impl PropertyIter<'_> {
    fn parse_one(&mut self) -> Result<Property, ProtocolError> {
        let tag = PropertyTag::from_byte(self.rest[0])?;
        let after_tag = &self.rest[1..];
        if after_tag.len() < 4 {
            return Err(ProtocolError::Truncated);
        }
        let len = codec::unpack_u32(after_tag)? as usize;
        let value = after_tag
            .get(4..4 + len)
            .ok_or(ProtocolError::Truncated)?
            .to_vec();
        self.rest = &after_tag[4 + len..];
        Ok(Property { tag, value })
    }
}

/// Latest-value-per-tag cache, safe to update from the receive threads
/// while the dashboard reads it.
#[derive(Debug, Default)]
pub struct PropertySet {
    slots: Mutex<[Option<Property>; TAG_COUNT as usize]>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, property: Property) {
        let mut slots = self.slots.lock().unwrap();
        let tag = property.tag as usize;
        slots[tag] = Some(property);
    }

    /// Updates every property in the stream, skipping malformed tails.
    pub fn update_stream(&self, stream: &PropertyStream) -> Result<(), ProtocolError> {
        for property in stream {
            self.update(property?);
        }
        Ok(())
    }

    pub fn get(&self, tag: PropertyTag) -> Option<Property> {
        self.slots.lock().unwrap()[tag as usize].clone()
    }

    /// Packs every set property, in tag order.
    pub fn to_stream(&self) -> PropertyStream {
        let slots = self.slots.lock().unwrap();
        let mut stream = PropertyStream::new();
        for property in slots.iter().flatten() {
            stream.push(property);
        }
        stream
    }
}
