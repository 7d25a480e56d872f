use crate::commands::{Command, ok_data};
use crate::error::{Error, Result};
use crate::schema::{Field, Fields, Layout};
use crate::types::{RawResponse, netfn};

const SEL_INFO: Layout = Layout::new(
    "get sel info response",
    &[
        Field::byte("version", 0),
        Field::le("entries", 1, 2),
        Field::le("free_space", 3, 2),
        Field::le("last_add_time", 5, 4),
        Field::le("last_erase_time", 9, 4),
        Field::bits("alloc_info", 13, 0, 1),
        Field::bits("reserve", 13, 1, 1),
        Field::bits("partial_add", 13, 2, 1),
        Field::bits("delete", 13, 3, 1),
        Field::bits("overflow", 13, 7, 1),
    ],
);

const RESERVATION: Layout = Layout::new(
    "reservation id",
    &[Field::le("reservation_id", 0, 2)],
);

const GET_ENTRY_REQUEST: Layout = Layout::new(
    "get sel entry request",
    &[
        Field::le("reservation_id", 0, 2),
        Field::le("record_id", 2, 2),
        Field::byte("offset", 4),
        Field::byte("bytes_to_read", 5),
    ],
);

const GET_ENTRY_RESPONSE: Layout = Layout::new(
    "get sel entry response",
    &[Field::le("next_record_id", 0, 2)],
);

const DELETE_REQUEST: Layout = Layout::new(
    "delete sel entry request",
    &[Field::le("reservation_id", 0, 2), Field::le("record_id", 2, 2)],
);

const RECORD_ID: Layout = Layout::new("record id", &[Field::le("record_id", 0, 2)]);

const CLEAR_REQUEST: Layout = Layout::new(
    "clear sel request",
    &[
        Field::le("reservation_id", 0, 2),
        Field::byte("c", 2),
        Field::byte("l", 3),
        Field::byte("r", 4),
        Field::byte("operation", 5),
    ],
);

const CLEAR_RESPONSE: Layout = Layout::new(
    "clear sel response",
    &[Field::bits("progress", 0, 0, 4)],
);

/// Read the whole record in one Get SEL Entry.
pub(crate) const READ_ENTIRE_RECORD: u8 = 0xFF;

// Request layouts are whole-byte fields fed from values of the same width,
// so only a misspelt field name can fail here.
fn encode(layout: &Layout, fields: Fields) -> Vec<u8> {
    let encoded = layout.encode(&fields);
    debug_assert!(encoded.is_ok(), "{}: {encoded:?}", layout.name());
    encoded.unwrap_or_else(|_| vec![0; layout.len()])
}

/// Response of `Get SEL Info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelInfo {
    /// SEL version (BCD, 51h for IPMI 1.5/2.0).
    pub version: u8,
    /// Number of log entries.
    pub entries: u16,
    /// Free space in bytes.
    pub free_space: u16,
    /// Most recent addition timestamp.
    pub last_add_time: u32,
    /// Most recent erase timestamp.
    pub last_erase_time: u32,
    /// Events were dropped because the log was full.
    pub overflow: bool,
    /// Delete SEL Entry is supported.
    pub supports_delete: bool,
    /// Partial Add SEL Entry is supported.
    pub supports_partial_add: bool,
    /// Reserve SEL is supported.
    pub supports_reserve: bool,
    /// Get SEL Allocation Information is supported.
    pub supports_allocation_info: bool,
}

/// `Get SEL Info` (Storage NetFn, cmd 0x40).
#[derive(Debug, Clone, Copy)]
pub struct GetSelInfo;

impl Command for GetSelInfo {
    type Output = SelInfo;
    const NETFN: u8 = netfn::STORAGE;
    const CMD: u8 = 0x40;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let f = SEL_INFO.decode(ok_data(Self::NETFN, &response)?)?;
        Ok(SelInfo {
            version: f.u8("version")?,
            entries: f.u16("entries")?,
            free_space: f.u16("free_space")?,
            last_add_time: f.u32("last_add_time")?,
            last_erase_time: f.u32("last_erase_time")?,
            overflow: f.u8("overflow")? != 0,
            supports_delete: f.u8("delete")? != 0,
            supports_partial_add: f.u8("partial_add")? != 0,
            supports_reserve: f.u8("reserve")? != 0,
            supports_allocation_info: f.u8("alloc_info")? != 0,
        })
    }
}

/// `Reserve SEL` (Storage NetFn, cmd 0x42). Returns the reservation id.
#[derive(Debug, Clone, Copy)]
pub struct ReserveSel;

impl Command for ReserveSel {
    type Output = u16;
    const NETFN: u8 = netfn::STORAGE;
    const CMD: u8 = 0x42;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        RESERVATION
            .decode(ok_data(Self::NETFN, &response)?)?
            .u16("reservation_id")
    }
}

/// `Get SEL Entry` (Storage NetFn, cmd 0x43).
#[derive(Debug, Clone, Copy)]
pub struct GetSelEntry {
    /// Reservation id (0 when not reading partially).
    pub reservation_id: u16,
    /// Record to fetch; 0000h is the first and FFFFh the last record.
    pub record_id: u16,
    /// Offset into the record.
    pub offset: u8,
    /// Bytes to read; FFh reads the entire record.
    pub bytes_to_read: u8,
}

impl GetSelEntry {
    /// Fetch all of `record_id` under `reservation_id`.
    pub fn entire(reservation_id: u16, record_id: u16) -> Self {
        Self {
            reservation_id,
            record_id,
            offset: 0,
            bytes_to_read: READ_ENTIRE_RECORD,
        }
    }
}

/// Response of `Get SEL Entry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelEntryResponse {
    /// Id of the record after this one (FFFFh after the last record).
    pub next_record_id: u16,
    /// Record bytes as returned.
    pub record: Vec<u8>,
}

impl Command for GetSelEntry {
    type Output = SelEntryResponse;
    const NETFN: u8 = netfn::STORAGE;
    const CMD: u8 = 0x43;

    fn request_data(&self) -> Vec<u8> {
        encode(
            &GET_ENTRY_REQUEST,
            Fields::new()
                .with("reservation_id", self.reservation_id)
                .with("record_id", self.record_id)
                .with("offset", self.offset)
                .with("bytes_to_read", self.bytes_to_read),
        )
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(Self::NETFN, &response)?;
        let next_record_id = GET_ENTRY_RESPONSE
            .decode(data)?
            .u16("next_record_id")?;
        Ok(SelEntryResponse {
            next_record_id,
            record: data[GET_ENTRY_RESPONSE.len()..].to_vec(),
        })
    }
}

/// `Delete SEL Entry` (Storage NetFn, cmd 0x46). Returns the deleted id.
#[derive(Debug, Clone, Copy)]
pub struct DeleteSelEntry {
    /// Current reservation id.
    pub reservation_id: u16,
    /// Record to delete.
    pub record_id: u16,
}

impl Command for DeleteSelEntry {
    type Output = u16;
    const NETFN: u8 = netfn::STORAGE;
    const CMD: u8 = 0x46;

    fn request_data(&self) -> Vec<u8> {
        encode(
            &DELETE_REQUEST,
            Fields::new()
                .with("reservation_id", self.reservation_id)
                .with("record_id", self.record_id),
        )
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        RECORD_ID
            .decode(ok_data(Self::NETFN, &response)?)?
            .u16("record_id")
    }
}

/// Clear SEL operation byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOperation {
    /// AAh: start erasing.
    Initiate,
    /// 00h: query erasure progress.
    GetStatus,
}

impl ClearOperation {
    fn as_u8(self) -> u8 {
        match self {
            Self::Initiate => 0xAA,
            Self::GetStatus => 0x00,
        }
    }
}

/// Erasure progress reported by `Clear SEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearStatus {
    /// Erase still running.
    InProgress,
    /// Erase finished.
    Completed,
}

/// `Clear SEL` (Storage NetFn, cmd 0x47).
#[derive(Debug, Clone, Copy)]
pub struct ClearSel {
    /// Current reservation id.
    pub reservation_id: u16,
    /// Initiate or poll.
    pub operation: ClearOperation,
}

impl Command for ClearSel {
    type Output = ClearStatus;
    const NETFN: u8 = netfn::STORAGE;
    const CMD: u8 = 0x47;

    fn request_data(&self) -> Vec<u8> {
        encode(
            &CLEAR_REQUEST,
            Fields::new()
                .with("reservation_id", self.reservation_id)
                .with("c", b'C')
                .with("l", b'L')
                .with("r", b'R')
                .with("operation", self.operation.as_u8()),
        )
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let progress = CLEAR_RESPONSE
            .decode(ok_data(Self::NETFN, &response)?)?
            .u8("progress")?;
        match progress {
            0x00 => Ok(ClearStatus::InProgress),
            0x01 => Ok(ClearStatus::Completed),
            _ => Err(Error::Protocol("Clear SEL returned unknown erasure progress")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(cmd: u8, data: Vec<u8>) -> RawResponse {
        RawResponse {
            cmd,
            completion_code: 0x00,
            data,
        }
    }

    #[test]
    fn request_payloads_fill_their_layouts() {
        let entry = GetSelEntry::entire(0xFFFF, 0xFFFF).request_data();
        assert_eq!(entry.len(), GET_ENTRY_REQUEST.len());
        assert_eq!(entry, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0xFF]);

        let delete = DeleteSelEntry {
            reservation_id: 0xBEEF,
            record_id: 0x0102,
        }
        .request_data();
        assert_eq!(delete, vec![0xEF, 0xBE, 0x02, 0x01]);

        for operation in [ClearOperation::Initiate, ClearOperation::GetStatus] {
            let clear = ClearSel {
                reservation_id: 0x0001,
                operation,
            }
            .request_data();
            assert_eq!(clear.len(), CLEAR_REQUEST.len());
            assert_eq!(clear[5], operation.as_u8());
        }
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn misspelt_request_field_trips_debug_assertion() {
        let _ = encode(&DELETE_REQUEST, Fields::new().with("reservation", 1u16));
    }

    #[test]
    fn get_entry_request_layout() {
        let cmd = GetSelEntry::entire(0x1234, 0x0002);
        assert_eq!(cmd.request_data(), vec![0x34, 0x12, 0x02, 0x00, 0x00, 0xFF]);
    }

    #[test]
    fn get_entry_response_splits_next_id_from_record() {
        let mut data = vec![0xFF, 0xFF];
        data.extend_from_slice(&[0x02, 0x00, 0x02]);
        let parsed = GetSelEntry::entire(0, 0)
            .parse_response(ok(0x43, data))
            .expect("parse");
        assert_eq!(parsed.next_record_id, 0xFFFF);
        assert_eq!(parsed.record, vec![0x02, 0x00, 0x02]);
    }

    #[test]
    fn clear_request_carries_clr_signature() {
        let cmd = ClearSel {
            reservation_id: 0x0102,
            operation: ClearOperation::Initiate,
        };
        assert_eq!(cmd.request_data(), vec![0x02, 0x01, b'C', b'L', b'R', 0xAA]);

        let status = cmd.parse_response(ok(0x47, vec![0x01])).expect("parse");
        assert_eq!(status, ClearStatus::Completed);
        let status = cmd.parse_response(ok(0x47, vec![0x00])).expect("parse");
        assert_eq!(status, ClearStatus::InProgress);
    }

    #[test]
    fn sel_info_flags() {
        let data = vec![
            0x51, 0x03, 0x00, 0x00, 0x10, 0x78, 0x56, 0x34, 0x12, 0x00, 0x00, 0x00, 0x00, 0x8A,
        ];
        let info = GetSelInfo.parse_response(ok(0x40, data)).expect("parse");
        assert_eq!(info.version, 0x51);
        assert_eq!(info.entries, 3);
        assert_eq!(info.free_space, 0x1000);
        assert_eq!(info.last_add_time, 0x12345678);
        assert!(info.overflow);
        assert!(info.supports_delete);
        assert!(!info.supports_partial_add);
        assert!(info.supports_reserve);
        assert!(!info.supports_allocation_info);
    }

    #[test]
    fn reserve_rejects_short_response() {
        assert!(ReserveSel.parse_response(ok(0x42, vec![0x01])).is_err());
        assert_eq!(
            ReserveSel
                .parse_response(ok(0x42, vec![0x01, 0x02]))
                .expect("parse"),
            0x0201
        );
    }
}
