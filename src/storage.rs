//! File-backed persistence for bindings and report configurations
//!
//! A single 64 KiB file is memory-mapped read-write and partitioned into two
//! fixed tables of 32 rows by 1 KiB: bindings first, then reports. Each row
//! carries a validity flag, the owning endpoint and cluster ids, and the
//! record payload. Record ids are derived from the row index (`slot + 1`)
//! and stay stable while the row remains valid.
//!
//! The map is exclusive to this process; the engine is the sole mutator.

use crate::device::{Binding, Device, Report, CLUSTER_BINDINGS_MAX, CLUSTER_REPORTS_MAX};
use crate::record::{
    decode_binding, decode_report, encode_binding, encode_report, RecordError,
};
use log::{error, info, warn};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;

/// Total size of the backing file
pub const FILE_SIZE: usize = 64 * 1024;
/// Rows per table
pub const TABLE_ROWS: usize = 32;
/// Size of one row including its header
pub const ROW_SIZE: usize = 1024;
/// Row header: validity flag, endpoint id, cluster id
const ROW_HEADER: usize = 4;
/// Maximum encoded record size within a row
pub const RECORD_CAPACITY: usize = ROW_SIZE - ROW_HEADER;

const VALID: u8 = 1;

/// Errors raised by the persistence layer
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Fatal at startup; the engine cannot run without its backing file
    #[error("storage file error: {0}")]
    Io(#[from] io::Error),
    /// No free row left in the table; handlers answer 5.00
    #[error("storage table is full")]
    TableFull,
    /// Record rejected or unreadable; oversized inserts answer 5.00
    #[error("storage record error: {0}")]
    Record(#[from] RecordError),
}

#[derive(Clone, Copy)]
enum Table {
    Bindings,
    Reports,
}

impl Table {
    /// Byte offset of the table's first row within the file
    fn base(self) -> usize {
        match self {
            Table::Bindings => 0,
            Table::Reports => TABLE_ROWS * ROW_SIZE,
        }
    }
}

/// The memory-mapped storage tables
pub struct Storage {
    map: MmapMut,
}

impl Storage {
    /// Opens (creating if necessary) and maps the backing file.
    ///
    /// Failure here is fatal for engine startup.
    pub fn open(path: &Path) -> Result<Storage, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(FILE_SIZE as u64)?;

        // Safety: the file is private to this process for the lifetime of
        // the engine (see module docs); no other mapping mutates it.
        let map = unsafe { MmapMut::map_mut(&file)? };

        info!("Opened storage file {}", path.display());
        Ok(Storage { map })
    }

    fn row(&self, table: Table, slot: usize) -> &[u8] {
        let start = table.base() + slot * ROW_SIZE;
        &self.map[start..start + ROW_SIZE]
    }

    fn row_mut(&mut self, table: Table, slot: usize) -> &mut [u8] {
        let start = table.base() + slot * ROW_SIZE;
        &mut self.map[start..start + ROW_SIZE]
    }

    /// Finds the first invalid row by linear scan
    fn free_slot(&self, table: Table) -> Result<usize, StorageError> {
        (0..TABLE_ROWS)
            .find(|slot| self.row(table, *slot)[0] != VALID)
            .ok_or(StorageError::TableFull)
    }

    fn mark(&mut self, table: Table, slot: usize, eid: u8, cid: u16) {
        let row = self.row_mut(table, slot);
        row[0] = VALID;
        row[1] = eid;
        row[2..4].copy_from_slice(&cid.to_le_bytes());
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.map.flush()?;
        Ok(())
    }

    /// Inserts a binding, assigning its id from the chosen slot.
    /// Returns the assigned id.
    pub fn put_binding(
        &mut self,
        eid: u8,
        cid: u16,
        binding: &Binding,
    ) -> Result<u8, StorageError> {
        let slot = self.free_slot(Table::Bindings)?;
        let id = (slot + 1) as u8;

        let mut record = binding.clone();
        record.id = id;

        // Encode to scratch first so a failed encode never leaves a valid
        // row holding half a record
        let mut scratch = [0u8; RECORD_CAPACITY];
        let len = encode_binding(&record, &mut scratch)?;
        self.row_mut(Table::Bindings, slot)[ROW_HEADER..ROW_HEADER + len]
            .copy_from_slice(&scratch[..len]);
        self.mark(Table::Bindings, slot, eid, cid);
        self.flush()?;
        Ok(id)
    }

    /// Re-encodes a binding in place over its existing row, id preserved
    pub fn update_binding(&mut self, binding: &Binding) -> Result<(), StorageError> {
        let slot = binding.slot();
        debug_assert_eq!(self.row(Table::Bindings, slot)[0], VALID);
        let mut scratch = [0u8; RECORD_CAPACITY];
        let len = encode_binding(binding, &mut scratch)?;
        self.row_mut(Table::Bindings, slot)[ROW_HEADER..ROW_HEADER + len]
            .copy_from_slice(&scratch[..len]);
        self.flush()
    }

    /// Clears the validity flag of a binding row
    pub fn delete_binding(&mut self, slot: usize) -> Result<(), StorageError> {
        self.row_mut(Table::Bindings, slot)[0] = 0;
        self.flush()
    }

    /// Reads back a valid binding row as (endpoint id, cluster id, record)
    pub fn get_binding(&self, slot: usize) -> Option<(u8, u16, Binding)> {
        let row = self.row(Table::Bindings, slot);
        if row[0] != VALID {
            return None;
        }
        let (eid, cid) = row_owner(row);
        match decode_binding(&row[ROW_HEADER..]) {
            Ok(binding) => Some((eid, cid, binding)),
            Err(err) => {
                error!("Discarding unreadable binding row {}: {}", slot, err);
                None
            }
        }
    }

    /// Inserts a report configuration, assigning its id from the chosen
    /// slot. Returns the assigned id.
    pub fn put_report(&mut self, eid: u8, cid: u16, report: &Report) -> Result<u8, StorageError> {
        let slot = self.free_slot(Table::Reports)?;
        let id = (slot + 1) as u8;

        let mut record = report.clone();
        record.id = id;

        let mut scratch = [0u8; RECORD_CAPACITY];
        let len = encode_report(&record, &mut scratch)?;
        self.row_mut(Table::Reports, slot)[ROW_HEADER..ROW_HEADER + len]
            .copy_from_slice(&scratch[..len]);
        self.mark(Table::Reports, slot, eid, cid);
        self.flush()?;
        Ok(id)
    }

    /// Re-encodes a report in place over its existing row, id preserved
    pub fn update_report(&mut self, report: &Report) -> Result<(), StorageError> {
        let slot = report.slot();
        debug_assert_eq!(self.row(Table::Reports, slot)[0], VALID);
        let mut scratch = [0u8; RECORD_CAPACITY];
        let len = encode_report(report, &mut scratch)?;
        self.row_mut(Table::Reports, slot)[ROW_HEADER..ROW_HEADER + len]
            .copy_from_slice(&scratch[..len]);
        self.flush()
    }

    /// Clears the validity flag of a report row
    pub fn delete_report(&mut self, slot: usize) -> Result<(), StorageError> {
        self.row_mut(Table::Reports, slot)[0] = 0;
        self.flush()
    }

    /// Reads back a valid report row as (endpoint id, cluster id, record)
    pub fn get_report(&self, slot: usize) -> Option<(u8, u16, Report)> {
        let row = self.row(Table::Reports, slot);
        if row[0] != VALID {
            return None;
        }
        let (eid, cid) = row_owner(row);
        match decode_report(&row[ROW_HEADER..]) {
            Ok(report) => Some((eid, cid, report)),
            Err(err) => {
                error!("Discarding unreadable report row {}: {}", slot, err);
                None
            }
        }
    }

    /// Links every valid persisted record into the matching cluster of the
    /// resource tree. Called once after the tree is built.
    pub fn link(&self, device: &mut Device) {
        for slot in 0..TABLE_ROWS {
            if let Some((eid, cid, binding)) = self.get_binding(slot) {
                match find_cluster(device, eid, cid) {
                    // The normal write path caps bindings per cluster, but
                    // a persisted table can disagree with today's device
                    // topology; rows beyond capacity stay unlinked
                    Some(cluster) if cluster.bindings.len() >= CLUSTER_BINDINGS_MAX => warn!(
                        "Cluster {:x} on endpoint {:x} is out of binding capacity, leaving row {} unlinked",
                        cid, eid, slot
                    ),
                    Some(cluster) => cluster.bindings.push(binding),
                    None => warn!(
                        "Stored binding {} references unknown cluster {:x} on endpoint {:x}",
                        binding.id, cid, eid
                    ),
                }
            }
        }

        for slot in 0..TABLE_ROWS {
            if let Some((eid, cid, report)) = self.get_report(slot) {
                match find_cluster(device, eid, cid) {
                    Some(cluster) if cluster.reports.len() >= CLUSTER_REPORTS_MAX => warn!(
                        "Cluster {:x} on endpoint {:x} is out of report capacity, leaving row {} unlinked",
                        cid, eid, slot
                    ),
                    Some(cluster) => cluster.reports.push(report),
                    None => warn!(
                        "Stored report {} references unknown cluster {:x} on endpoint {:x}",
                        report.id, cid, eid
                    ),
                }
            }
        }
    }
}

fn row_owner(row: &[u8]) -> (u8, u16) {
    (row[1], u16::from_le_bytes([row[2], row[3]]))
}

/// Rows carry only the numeric cluster id, so linkage matches the first
/// cluster with that id on the stored endpoint
fn find_cluster(device: &mut Device, eid: u8, cid: u16) -> Option<&mut crate::device::Cluster> {
    device
        .find_endpoint_mut(eid)?
        .clusters
        .iter_mut()
        .find(|cluster| cluster.id == cid)
}
