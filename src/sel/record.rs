//! SEL record layouts (IPMI v2.0 section 32) and type classification.

use crate::error::{Error, Result};
use crate::schema::{Field, Fields, Layout};

/// Length of a standard SEL record.
pub const RECORD_LEN: usize = 16;

/// Event message format revision of IPMI v1.0 records (no channel number).
const EVENT_FORMAT_V1_0: u8 = 0x03;

const HEADER: Layout = Layout::new(
    "sel record header",
    &[Field::le("record_id", 0, 2), Field::byte("record_type", 2)],
);

const SYSTEM_EVENT: Layout = Layout::new(
    "system event record",
    &[
        Field::le("record_id", 0, 2),
        Field::byte("record_type", 2),
        Field::le("timestamp", 3, 4),
        Field::byte("generator_id", 7),
        Field::bits("ipmb_device_lun", 8, 0, 2),
        Field::bits("channel_number", 8, 4, 4),
        Field::byte("event_message_format", 9),
        Field::byte("sensor_type", 10),
        Field::byte("sensor_number", 11),
        Field::bits("event_type_code", 12, 0, 7),
        Field::bits("event_direction", 12, 7, 1),
        Field::byte("event_data1", 13),
        Field::bits("event_data1_offset", 13, 0, 4),
        Field::bits("event_data3_flag", 13, 4, 2),
        Field::bits("event_data2_flag", 13, 6, 2),
        Field::byte("event_data2", 14),
        Field::byte("event_data3", 15),
    ],
);

const TIMESTAMPED_OEM: Layout = Layout::new(
    "timestamped oem record",
    &[
        Field::le("record_id", 0, 2),
        Field::byte("record_type", 2),
        Field::le("timestamp", 3, 4),
        Field::le("manufacturer_id", 7, 3),
    ],
);

/// Record class derived from the record type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordClass {
    /// Type 02h.
    SystemEvent,
    /// Types C0h-DFh.
    TimestampedOem,
    /// Types E0h-FFh.
    NonTimestampedOem,
    /// Anything else.
    Unknown,
}

/// Classify a record type byte.
pub fn classify(record_type: u8) -> RecordClass {
    match record_type {
        0x02 => RecordClass::SystemEvent,
        0xC0..=0xDF => RecordClass::TimestampedOem,
        0xE0..=0xFF => RecordClass::NonTimestampedOem,
        _ => RecordClass::Unknown,
    }
}

/// Assertion or deassertion (bit 7 of the event dir/type byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDirection {
    /// The event condition became true.
    Assertion,
    /// The event condition went away.
    Deassertion,
}

/// One fetched SEL record, immutable once fetched.
///
/// Header fields are available for every record; type-specific fields fail
/// with [`Error::InvalidForRecordType`] when the record's class does not
/// carry them, and with [`Error::InvalidSelEntry`] when the record is too short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelRecord {
    bytes: Vec<u8>,
}

impl SelRecord {
    /// Wrap raw record bytes. Anything past [`RECORD_LEN`] is dropped.
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes[..bytes.len().min(RECORD_LEN)].to_vec(),
        }
    }

    /// Raw record bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Record id.
    pub fn record_id(&self) -> Result<u16> {
        self.header()?.u16("record_id")
    }

    /// Record type byte.
    pub fn record_type(&self) -> Result<u8> {
        self.header()?.u8("record_type")
    }

    /// Class of [`Self::record_type`].
    pub fn class(&self) -> Result<RecordClass> {
        self.record_type().map(classify)
    }

    /// Seconds since the epoch (system event and timestamped OEM records).
    pub fn timestamp(&self) -> Result<u32> {
        match self.class()? {
            RecordClass::SystemEvent => self.event()?.u32("timestamp"),
            RecordClass::TimestampedOem => self.timestamped_oem()?.u32("timestamp"),
            _ => Err(self.wrong_type()),
        }
    }

    /// Generator id: slave address or software id, with the id-type bit.
    pub fn generator_id(&self) -> Result<u8> {
        self.event()?.u8("generator_id")
    }

    /// IPMB device LUN of the generator.
    pub fn ipmb_device_lun(&self) -> Result<u8> {
        self.event()?.u8("ipmb_device_lun")
    }

    /// Channel the event came in on. v1.0 format records do not carry one.
    pub fn channel_number(&self) -> Result<u8> {
        let fields = self.event()?;
        if fields.u8("event_message_format")? == EVENT_FORMAT_V1_0 {
            return Err(Error::InvalidSelEntry);
        }
        fields.u8("channel_number")
    }

    /// Event message format revision (04h for IPMI v1.5/v2.0).
    pub fn event_message_format_revision(&self) -> Result<u8> {
        self.event()?.u8("event_message_format")
    }

    /// Sensor type code.
    pub fn sensor_type(&self) -> Result<u8> {
        self.event()?.u8("sensor_type")
    }

    /// Sensor number.
    pub fn sensor_number(&self) -> Result<u8> {
        self.event()?.u8("sensor_number")
    }

    /// Assertion or deassertion.
    pub fn event_direction(&self) -> Result<EventDirection> {
        Ok(match self.event()?.u8("event_direction")? {
            0 => EventDirection::Assertion,
            _ => EventDirection::Deassertion,
        })
    }

    /// Event/reading type code.
    pub fn event_type_code(&self) -> Result<u8> {
        self.event()?.u8("event_type_code")
    }

    /// Event data 1, whole byte.
    pub fn event_data1(&self) -> Result<u8> {
        self.event()?.u8("event_data1")
    }

    /// Offset from the event/reading type code (event data 1, bits 3:0).
    pub fn event_data1_offset(&self) -> Result<u8> {
        self.event()?.u8("event_data1_offset")
    }

    /// How to interpret event data 2 (event data 1, bits 7:6).
    pub fn event_data2_flag(&self) -> Result<u8> {
        self.event()?.u8("event_data2_flag")
    }

    /// How to interpret event data 3 (event data 1, bits 5:4).
    pub fn event_data3_flag(&self) -> Result<u8> {
        self.event()?.u8("event_data3_flag")
    }

    /// Event data 2.
    pub fn event_data2(&self) -> Result<u8> {
        self.event()?.u8("event_data2")
    }

    /// Event data 3.
    pub fn event_data3(&self) -> Result<u8> {
        self.event()?.u8("event_data3")
    }

    /// IANA manufacturer id of a timestamped OEM record.
    pub fn manufacturer_id(&self) -> Result<u32> {
        match self.class()? {
            RecordClass::TimestampedOem => self.timestamped_oem()?.u32("manufacturer_id"),
            _ => Err(self.wrong_type()),
        }
    }

    /// OEM-defined bytes of an OEM record.
    pub fn oem_data(&self) -> Result<&[u8]> {
        let start = match self.class()? {
            RecordClass::TimestampedOem => TIMESTAMPED_OEM.len(),
            RecordClass::NonTimestampedOem => HEADER.len(),
            _ => return Err(self.wrong_type()),
        };
        if self.bytes.len() < RECORD_LEN {
            return Err(Error::InvalidSelEntry);
        }
        Ok(&self.bytes[start..])
    }

    fn header(&self) -> Result<Fields> {
        decode(&HEADER, &self.bytes)
    }

    fn event(&self) -> Result<Fields> {
        match self.class()? {
            RecordClass::SystemEvent => decode(&SYSTEM_EVENT, &self.bytes),
            _ => Err(self.wrong_type()),
        }
    }

    fn timestamped_oem(&self) -> Result<Fields> {
        decode(&TIMESTAMPED_OEM, &self.bytes)
    }

    fn wrong_type(&self) -> Error {
        Error::InvalidForRecordType {
            record_type: self.bytes.get(2).copied().unwrap_or_default(),
        }
    }
}

fn decode(layout: &Layout, bytes: &[u8]) -> Result<Fields> {
    layout.decode(bytes).map_err(|_| Error::InvalidSelEntry)
}
