//! Versioned binary trajectory format.
//!
//! Little-endian, tightly packed:
//!
//! ```text
//! u16 magic = 0x62FF
//! u16 version in {1, 2, 3}
//! u16 numGroups
//!   per group: string(name), i32(offset), i32(dof), string(interpolation)
//! u32 numReals; f64 * numReals          ; waypoint block
//! string description
//! version >= 2:
//!   u16 numReadables
//!     per readable: string(id), string(payload)
//!     version >= 3: string(readerType)
//! ```
//!
//! `string` is a u16 length followed by that many bytes. A stream that does
//! not start with the magic is the legacy textual representation and is
//! reported as [`SamplingError::LegacyTrajectoryFormat`] so the caller can
//! hand it to its own parser.

use std::io::Write;

use crate::error::{Result, SamplingError};
use crate::spec::{ConfigurationSpec, Group};
use crate::trajectory::Trajectory;

pub const TRAJECTORY_MAGIC: u16 = 0x62FF;
pub const TRAJECTORY_FORMAT_VERSION: u16 = 0x0003;

/// How a readable payload should be parsed by its external reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadableKind {
    StringReadable,
    HierarchicalXml,
}

impl ReadableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadableKind::StringReadable => "StringReadable",
            ReadableKind::HierarchicalXml => "HierarchicalXMLReadable",
        }
    }

    pub fn from_str(name: &str) -> Option<Self> {
        match name {
            "StringReadable" => Some(ReadableKind::StringReadable),
            "HierarchicalXMLReadable" => Some(ReadableKind::HierarchicalXml),
            _ => None,
        }
    }
}

/// Opaque key-value sidecar attached to a trajectory and preserved through
/// serialization; the payload is parsed by external readers only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readable {
    pub id: String,
    pub payload: String,
    pub kind: ReadableKind,
}

impl Readable {
    pub fn string(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            kind: ReadableKind::StringReadable,
        }
    }

    pub fn hierarchical_xml(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            kind: ReadableKind::HierarchicalXml,
        }
    }
}

fn write_u16<W: Write>(writer: &mut W, value: u16) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_i32<W: Write>(writer: &mut W, value: i32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    if value.len() > u16::MAX as usize {
        return Err(SamplingError::invalid_argument(format!(
            "string of {} bytes does not fit the 16-bit length prefix",
            value.len()
        )));
    }
    write_u16(writer, value.len() as u16)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn write_f64_vector<W: Write>(writer: &mut W, values: &[f64]) -> Result<()> {
    if values.len() > u32::MAX as usize {
        return Err(SamplingError::invalid_argument(
            "waypoint block does not fit the 32-bit length prefix",
        ));
    }
    write_u32(writer, values.len() as u32)?;
    for value in values {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Cursor over a serialized trajectory buffer.
struct ByteReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.position + count > self.buffer.len() {
            return Err(SamplingError::invalid_argument(format!(
                "unexpected end of trajectory stream at byte {}",
                self.position
            )));
        }
        let slice = &self.buffer[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_string(&mut self) -> Result<String> {
        let length = self.read_u16()? as usize;
        let bytes = self.take(length)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SamplingError::invalid_argument("string block is not valid utf-8"))
    }

    fn read_f64_vector(&mut self) -> Result<Vec<f64>> {
        let count = self.read_u32()? as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let bytes = self.take(8)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            values.push(f64::from_le_bytes(raw));
        }
        Ok(values)
    }
}

impl Trajectory {
    /// Serializes at the current format version.
    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.serialize_at_version(writer, TRAJECTORY_FORMAT_VERSION)
    }

    /// Serializes at an older format version for compatibility; readables
    /// are dropped below version 2 and their reader types below version 3.
    pub fn serialize_at_version<W: Write>(&self, writer: &mut W, version: u16) -> Result<()> {
        if !(1..=TRAJECTORY_FORMAT_VERSION).contains(&version) {
            return Err(SamplingError::invalid_argument(format!(
                "unsupported trajectory format version {}",
                version
            )));
        }
        write_u16(writer, TRAJECTORY_MAGIC)?;
        write_u16(writer, version)?;

        let groups = &self.spec.groups;
        if groups.len() > u16::MAX as usize {
            return Err(SamplingError::invalid_argument(
                "group count does not fit the 16-bit prefix",
            ));
        }
        write_u16(writer, groups.len() as u16)?;
        for group in groups {
            write_string(writer, &group.name)?;
            write_i32(writer, group.offset as i32)?;
            write_i32(writer, group.dof as i32)?;
            write_string(writer, &group.interpolation)?;
        }

        write_f64_vector(writer, &self.data)?;
        write_string(writer, &self.description)?;

        if version >= 0x0002 {
            write_u16(writer, self.readables.len() as u16)?;
            for readable in &self.readables {
                write_string(writer, &readable.id)?;
                write_string(writer, &readable.payload)?;
                if version >= 0x0003 {
                    write_string(writer, readable.kind.as_str())?;
                }
            }
        }
        Ok(())
    }

    /// Restores a trajectory from its binary serialization: specification
    /// (with group order), waypoints, description and readables.
    pub fn deserialize(&mut self, buffer: &[u8]) -> Result<()> {
        let mut reader = ByteReader::new(buffer);
        let magic = reader.read_u16()?;
        if magic != TRAJECTORY_MAGIC {
            return Err(SamplingError::LegacyTrajectoryFormat);
        }
        let version = reader.read_u16()?;
        if !(0x0001..=TRAJECTORY_FORMAT_VERSION).contains(&version) {
            return Err(SamplingError::invalid_argument(format!(
                "unsupported trajectory format version {}",
                version
            )));
        }

        let num_groups = reader.read_u16()? as usize;
        let mut groups = Vec::with_capacity(num_groups);
        for _ in 0..num_groups {
            let name = reader.read_string()?;
            let offset = reader.read_i32()?;
            let dof = reader.read_i32()?;
            let interpolation = reader.read_string()?;
            if offset < 0 || dof < 0 {
                return Err(SamplingError::invalid_argument(format!(
                    "group '{}' carries negative layout values",
                    name
                )));
            }
            groups.push(Group::new(name, offset as usize, dof as usize, interpolation));
        }
        self.init(ConfigurationSpec::new(groups), 0, false)?;

        let data = reader.read_f64_vector()?;
        let dof = self.spec.dof();
        if dof == 0 && !data.is_empty() {
            return Err(SamplingError::invalid_argument(
                "waypoint data without any group",
            ));
        }
        if dof > 0 && data.len() % dof != 0 {
            return Err(SamplingError::invalid_argument(format!(
                "waypoint block of {} reals does not divide dof {}",
                data.len(),
                dof
            )));
        }
        self.data = data;
        self.changed.set(true);

        self.description = reader.read_string()?;

        self.readables.clear();
        if version >= 0x0002 {
            let num_readables = reader.read_u16()? as usize;
            for _ in 0..num_readables {
                let id = reader.read_string()?;
                let payload = reader.read_string()?;
                let kind = if version >= 0x0003 {
                    let name = reader.read_string()?;
                    ReadableKind::from_str(&name).ok_or_else(|| {
                        SamplingError::invalid_argument(format!(
                            "unknown readable reader type '{}'",
                            name
                        ))
                    })?
                } else {
                    ReadableKind::StringReadable
                };
                self.readables.push(Readable { id, payload, kind });
            }
        }
        Ok(())
    }
}
