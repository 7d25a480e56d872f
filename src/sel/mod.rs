//! System Event Log retrieval.
//!
//! [`SelEngine::parse`] walks the log one Get SEL Entry at a time under a
//! reservation, re-reserving when the BMC cancels it, and keeps the result as
//! an in-memory snapshot with a cursor. Readers work on the snapshot without
//! further I/O.

mod record;

use std::collections::HashSet;
use std::thread;

pub use record::{EventDirection, RECORD_LEN, RecordClass, SelRecord, classify};

use crate::commands::{
    ClearOperation, ClearSel, ClearStatus, Command, DeleteSelEntry, GetSelEntry, GetSelInfo,
    ReserveSel, SelEntryResponse, SelInfo,
};
use crate::completion::{INVALID_COMMAND, INVALID_DATA_FIELD, NOT_PRESENT};
use crate::device::Exchange;
use crate::dispatch::{self, RetryPolicy};
use crate::error::{CallbackError, Error, Result};

/// Record id that asks for the first record.
pub const FIRST_RECORD: u16 = 0x0000;
/// Record id that asks for the last record; also "no next record".
pub const LAST_RECORD: u16 = 0xFFFF;

/// Retry bounds for SEL operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelConfig {
    /// Reservation cancellations tolerated per record (or per clear/delete).
    pub reservation_retries: u32,
    /// Policy for every command the engine dispatches.
    pub policy: RetryPolicy,
}

impl SelConfig {
    /// Value of [`SelConfig::reservation_retries`] by default.
    pub const DEFAULT_RESERVATION_RETRIES: u32 = 3;

    /// Defaults: three cancellations and [`RetryPolicy::default`].
    pub fn new() -> Self {
        Self {
            reservation_retries: Self::DEFAULT_RESERVATION_RETRIES,
            policy: RetryPolicy::default(),
        }
    }

    /// Set the cancellation bound.
    pub fn reservation_retries(mut self, retries: u32) -> Self {
        self.reservation_retries = retries;
        self
    }

    /// Set the dispatch policy.
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for SelConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Snapshot {
    records: Vec<SelRecord>,
    // `records.len()` once `next` has run past the end.
    cursor: usize,
}

/// SEL reader bound to one device.
///
/// The snapshot belongs to the engine; a new [`SelEngine::parse`] replaces it.
pub struct SelEngine<'a, E: Exchange + ?Sized> {
    device: &'a mut E,
    config: SelConfig,
    snapshot: Option<Snapshot>,
}

impl<'a, E: Exchange + ?Sized> SelEngine<'a, E> {
    /// An engine with [`SelConfig::default`].
    pub fn new(device: &'a mut E) -> Self {
        Self::with_config(device, SelConfig::default())
    }

    /// An engine with explicit retry bounds.
    pub fn with_config(device: &'a mut E, config: SelConfig) -> Self {
        Self {
            device,
            config,
            snapshot: None,
        }
    }

    /// Current retry bounds.
    pub fn config(&self) -> &SelConfig {
        &self.config
    }

    /// Fetch the whole log. Returns the number of records.
    ///
    /// The previous snapshot is kept if the fetch fails.
    pub fn parse(&mut self) -> Result<usize> {
        self.parse_with(|_| Ok(()))
    }

    /// Fetch the whole log, calling `callback` on each record as it arrives.
    ///
    /// A callback error stops the fetch with [`Error::Callback`].
    pub fn parse_with<F>(&mut self, mut callback: F) -> Result<usize>
    where
        F: FnMut(&SelRecord) -> std::result::Result<(), CallbackError>,
    {
        let mut records = Vec::new();
        let mut visited = HashSet::new();
        let mut reservation: Option<u16> = None;
        let mut record_id = FIRST_RECORD;

        while record_id != LAST_RECORD {
            if !visited.insert(record_id) {
                return Err(Error::protocol_owned(format!(
                    "SEL next record id {record_id:#06x} was already read"
                )));
            }

            let Some(entry) = self.fetch(record_id, &mut reservation)? else {
                break;
            };
            crate::observe::record_sel_entry(record_id, entry.next_record_id);

            let record = SelRecord::new(&entry.record);
            callback(&record).map_err(Error::Callback)?;
            records.push(record);
            record_id = entry.next_record_id;
        }

        let count = records.len();
        self.snapshot = Some(Snapshot { records, cursor: 0 });
        Ok(count)
    }

    // `None` when the log is empty.
    fn fetch(
        &mut self,
        record_id: u16,
        reservation: &mut Option<u16>,
    ) -> Result<Option<SelEntryResponse>> {
        let mut cancellations = 0;
        loop {
            let reservation_id = match *reservation {
                Some(id) => id,
                None => {
                    let id = self.reserve(cancellations)?;
                    *reservation = Some(id);
                    id
                }
            };

            match self.call(&GetSelEntry::entire(reservation_id, record_id)) {
                Ok(entry) => return Ok(Some(entry)),
                Err(Error::ReservationCancelled) => {
                    cancellations += 1;
                    self.check_cancellations(cancellations)?;
                    *reservation = None;
                }
                Err(err)
                    if record_id == FIRST_RECORD && err.completion_code() == Some(NOT_PRESENT) =>
                {
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn reserve(&mut self, renewals: u32) -> Result<u16> {
        match self.call(&ReserveSel) {
            Ok(id) => {
                crate::observe::record_reservation(id, renewals);
                Ok(id)
            }
            // Reservations are optional; 0000h is accepted everywhere then.
            Err(err) if err.completion_code() == Some(INVALID_COMMAND) => Ok(0),
            Err(err) => Err(err),
        }
    }

    fn check_cancellations(&self, cancellations: u32) -> Result<()> {
        if cancellations > self.config.reservation_retries {
            return Err(Error::IpmiError(
                format!("SEL reservation cancelled {cancellations} times in a row").into(),
            ));
        }
        Ok(())
    }

    /// Run `op` under a fresh reservation, renewing it while the BMC cancels it.
    fn with_reservation<T>(&mut self, mut op: impl FnMut(&mut Self, u16) -> Result<T>) -> Result<T> {
        let mut cancellations = 0;
        loop {
            let reservation_id = self.reserve(cancellations)?;
            match op(self, reservation_id) {
                Err(Error::ReservationCancelled) => {
                    cancellations += 1;
                    self.check_cancellations(cancellations)?;
                }
                other => return other,
            }
        }
    }

    fn call<C: Command>(&mut self, command: &C) -> Result<C::Output> {
        dispatch::call(&mut *self.device, command, &self.config.policy)
    }

    fn snapshot(&self) -> Result<&Snapshot> {
        match &self.snapshot {
            Some(snapshot) if !snapshot.records.is_empty() => Ok(snapshot),
            _ => Err(Error::NoSelEntries),
        }
    }

    fn snapshot_mut(&mut self) -> Result<&mut Snapshot> {
        match &mut self.snapshot {
            Some(snapshot) if !snapshot.records.is_empty() => Ok(snapshot),
            _ => Err(Error::NoSelEntries),
        }
    }

    /// Number of records in the snapshot.
    pub fn count(&self) -> Result<usize> {
        self.snapshot
            .as_ref()
            .map(|s| s.records.len())
            .ok_or(Error::NoSelEntries)
    }

    /// All records in fetch order; empty before the first successful parse.
    pub fn records(&self) -> &[SelRecord] {
        self.snapshot.as_ref().map_or(&[], |s| &s.records)
    }

    /// Move the cursor to the first record.
    pub fn first(&mut self) -> Result<()> {
        self.snapshot_mut()?.cursor = 0;
        Ok(())
    }

    /// Advance the cursor. `Ok(false)` once it has moved past the last record.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<bool> {
        let snapshot = self.snapshot_mut()?;
        if snapshot.cursor < snapshot.records.len() {
            snapshot.cursor += 1;
        }
        Ok(snapshot.cursor < snapshot.records.len())
    }

    /// The record under the cursor.
    pub fn current(&self) -> Result<&SelRecord> {
        let snapshot = self.snapshot()?;
        snapshot
            .records
            .get(snapshot.cursor)
            .ok_or(Error::EndOfList)
    }

    /// Put the cursor on the record with id `record_id`.
    pub fn seek_exact(&mut self, record_id: u16) -> Result<()> {
        self.seek(record_id, |id| id == record_id)
    }

    /// Put the cursor on the first record whose id is `record_id` or larger.
    pub fn seek_at_or_after(&mut self, record_id: u16) -> Result<()> {
        self.seek(record_id, |id| id >= record_id)
    }

    fn seek(&mut self, record_id: u16, matches: impl Fn(u16) -> bool) -> Result<()> {
        let snapshot = self.snapshot_mut()?;
        let found = snapshot
            .records
            .iter()
            // Malformed records are skipped, not fatal.
            .position(|r| r.record_id().is_ok_and(&matches));
        match found {
            Some(index) => {
                snapshot.cursor = index;
                Ok(())
            }
            None => {
                snapshot.cursor = 0;
                Err(Error::NotFound(record_id))
            }
        }
    }

    /// Copy the current record into `buf`; returns the number of bytes copied.
    pub fn read_raw(&self, buf: &mut [u8]) -> Result<usize> {
        let bytes = self.current()?.as_bytes();
        let available = buf.len();
        let out = buf.get_mut(..bytes.len()).ok_or(Error::Overflow {
            needed: bytes.len(),
            available,
        })?;
        out.copy_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Get SEL Info.
    pub fn sel_info(&mut self) -> Result<SelInfo> {
        self.call(&GetSelInfo)
    }

    /// Start erasing the log. Does not touch the snapshot.
    pub fn clear_log(&mut self) -> Result<ClearStatus> {
        self.with_reservation(|engine, reservation_id| {
            engine.call(&ClearSel {
                reservation_id,
                operation: ClearOperation::Initiate,
            })
        })
    }

    /// Erase the log and poll until the BMC reports completion.
    ///
    /// Polls at most `policy.max_attempts` times, `policy.wait` apart.
    pub fn clear_log_wait(&mut self) -> Result<()> {
        if self.clear_log()? == ClearStatus::Completed {
            return Ok(());
        }

        let policy = self.config.policy;
        for _ in 0..policy.max_attempts.max(1) {
            if !policy.wait.is_zero() {
                thread::sleep(policy.wait);
            }
            let status = self.with_reservation(|engine, reservation_id| {
                engine.call(&ClearSel {
                    reservation_id,
                    operation: ClearOperation::GetStatus,
                })
            })?;
            if status == ClearStatus::Completed {
                return Ok(());
            }
        }
        Err(Error::IpmiError("SEL erase did not complete".into()))
    }

    /// Delete one record. Does not touch the snapshot.
    pub fn delete_record(&mut self, record_id: u16) -> Result<()> {
        if record_id == FIRST_RECORD || record_id == LAST_RECORD {
            return Err(Error::InvalidArgument(
                "0000h and FFFFh are not deletable record ids",
            ));
        }

        let result = self.with_reservation(|engine, reservation_id| {
            engine.call(&DeleteSelEntry {
                reservation_id,
                record_id,
            })
        });
        match result {
            Ok(_) => Ok(()),
            Err(err) if matches!(err.completion_code(), Some(NOT_PRESENT | INVALID_DATA_FIELD)) => {
                Err(Error::NotFound(record_id))
            }
            Err(err) => Err(err),
        }
    }
}

impl<E: Exchange + ?Sized> std::fmt::Debug for SelEngine<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelEngine")
            .field("config", &self.config)
            .field("records", &self.records().len())
            .field("cursor", &self.snapshot.as_ref().map(|s| s.cursor))
            .finish()
    }
}
