//! File-backed packet log
//!
//! One file per source, `<dir>/<sourceID>.pkt`, holding a sequence of
//! `u32 big-endian length + interchange record` entries. A crash during append
//! can leave a torn final entry; readers ignore it and
//! [`PacketLog::check_and_repair`] truncates it away.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use super::{PacketLog, RepairReport};
use crate::types::Packet;
use crate::{MooringError, Result, codec};

const ENTRY_PREFIX_LEN: usize = 4;

#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    count: usize,
    max_timestamp: Option<i64>,
    /// End of the last complete entry when a torn tail follows it
    torn_at: Option<u64>,
}

/// Result of walking a log file.
struct Scan {
    packets: Vec<Packet>,
    undecodable: usize,
    /// Offset just past the last complete entry
    valid_len: u64,
    file_len: u64,
}

impl FileLog {
    /// Open (creating if needed) the log for `source_id` under `dir`.
    pub fn open(dir: impl AsRef<Path>, source_id: i64) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| MooringError::file_error(dir, e))?;
        Self::open_path(Self::path_for(dir, source_id))
    }

    /// Open (creating if needed) a log at an explicit path.
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| MooringError::file_error(&path, e))?;

        let scan = Self::scan(&path)?;
        let torn_at = (scan.valid_len < scan.file_len).then_some(scan.valid_len);
        if torn_at.is_some() {
            warn!(
                "{}: torn trailing entry ({} bytes); dropped on the next append",
                path.display(),
                scan.file_len - scan.valid_len
            );
        }
        debug!("Opened {} with {} packets", path.display(), scan.packets.len());
        Ok(Self {
            count: scan.packets.len(),
            max_timestamp: scan.packets.iter().map(|p| p.system_time).max(),
            path,
            torn_at,
        })
    }

    pub fn path_for(dir: &Path, source_id: i64) -> PathBuf {
        dir.join(format!("{}.pkt", source_id))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn scan(path: &Path) -> Result<Scan> {
        let bytes = fs::read(path).map_err(|e| MooringError::file_error(path, e))?;
        let mut packets = Vec::new();
        let mut undecodable = 0;
        let mut offset = 0usize;

        while bytes.len() - offset >= ENTRY_PREFIX_LEN {
            let mut prefix = [0u8; ENTRY_PREFIX_LEN];
            prefix.copy_from_slice(&bytes[offset..offset + ENTRY_PREFIX_LEN]);
            let len = u32::from_be_bytes(prefix) as usize;
            let start = offset + ENTRY_PREFIX_LEN;
            if bytes.len() - start < len {
                break;
            }
            match codec::from_bytes(&bytes[start..start + len]) {
                Ok(packet) => packets.push(packet),
                Err(e) => {
                    undecodable += 1;
                    warn!(
                        "{}: skipping undecodable entry at offset {}: {}",
                        path.display(),
                        offset,
                        e
                    );
                }
            }
            offset = start + len;
        }

        trace!("Scanned {}: {} entries, {} valid bytes", path.display(), packets.len(), offset);
        Ok(Scan { packets, undecodable, valid_len: offset as u64, file_len: bytes.len() as u64 })
    }
}

impl PacketLog for FileLog {
    fn append(&mut self, packet: &Packet) -> Result<()> {
        let record = codec::to_bytes(packet)?;
        let len = u32::try_from(record.len())
            .map_err(|_| MooringError::codec("packet log", "record exceeds u32 length"))?;
        let mut entry = Vec::with_capacity(ENTRY_PREFIX_LEN + record.len());
        entry.extend_from_slice(&len.to_be_bytes());
        entry.extend_from_slice(&record);

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| MooringError::file_error(&self.path, e))?;
        // An entry written after a torn tail would be swallowed by its length prefix.
        if let Some(valid_len) = self.torn_at {
            file.set_len(valid_len).map_err(|e| MooringError::file_error(&self.path, e))?;
            info!("{}: dropped torn tail before appending", self.path.display());
            self.torn_at = None;
        }
        file.write_all(&entry).map_err(|e| MooringError::file_error(&self.path, e))?;
        file.flush().map_err(|e| MooringError::file_error(&self.path, e))?;

        self.count += 1;
        self.max_timestamp =
            Some(self.max_timestamp.map_or(packet.system_time, |t| t.max(packet.system_time)));
        Ok(())
    }

    fn packets_between(&self, start: i64, end: i64) -> Result<Vec<Packet>> {
        let scan = Self::scan(&self.path)?;
        Ok(scan
            .packets
            .into_iter()
            .filter(|p| p.system_time >= start && p.system_time <= end)
            .collect())
    }

    fn max_timestamp(&self) -> Option<i64> {
        self.max_timestamp
    }

    fn len(&self) -> usize {
        self.count
    }

    fn check_and_repair(&mut self) -> Result<RepairReport> {
        let scan = Self::scan(&self.path)?;
        let truncated_bytes = scan.file_len - scan.valid_len;
        if truncated_bytes > 0 {
            let file = OpenOptions::new()
                .write(true)
                .open(&self.path)
                .map_err(|e| MooringError::file_error(&self.path, e))?;
            file.set_len(scan.valid_len).map_err(|e| MooringError::file_error(&self.path, e))?;
            info!("{}: truncated {} byte torn tail", self.path.display(), truncated_bytes);
        }

        self.count = scan.packets.len();
        self.max_timestamp = scan.packets.iter().map(|p| p.system_time).max();
        self.torn_at = None;
        Ok(RepairReport {
            records: scan.packets.len(),
            undecodable: scan.undecodable,
            truncated_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: i64) -> Packet {
        Packet::sensor_data(1553, 1000 + i * 50, 100 + i, format!("s{}", i).into_bytes())
    }

    #[test]
    fn appended_packets_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = FileLog::open(dir.path(), 1553).unwrap();
        for i in 0..5 {
            log.append(&sample(i)).unwrap();
        }
        assert_eq!(log.path(), dir.path().join("1553.pkt"));

        let reopened = FileLog::open(dir.path(), 1553).unwrap();
        assert_eq!(reopened.len(), 5);
        assert_eq!(reopened.max_timestamp(), Some(1200));
        let window = reopened.packets_between(1050, 1100).unwrap();
        assert_eq!(window, vec![sample(1), sample(2)]);
    }

    #[test]
    fn repair_truncates_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = FileLog::open(dir.path(), 1553).unwrap();
        log.append(&sample(0)).unwrap();
        log.append(&sample(1)).unwrap();
        let intact = fs::metadata(log.path()).unwrap().len();

        // Half-written third entry.
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        file.write_all(&[0, 0, 0, 90, 0, 1, 0]).unwrap();
        drop(file);

        let mut log = FileLog::open(dir.path(), 1553).unwrap();
        assert_eq!(log.len(), 2);
        let report = log.check_and_repair().unwrap();
        assert_eq!(report, RepairReport { records: 2, undecodable: 0, truncated_bytes: 7 });
        assert_eq!(fs::metadata(log.path()).unwrap().len(), intact);

        log.append(&sample(2)).unwrap();
        assert_eq!(log.packets_from(0).unwrap().len(), 3);
        assert!(log.check_and_repair().unwrap().is_clean());
    }

    #[test]
    fn append_after_torn_tail_stays_readable() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = FileLog::open(dir.path(), 1553).unwrap();
        log.append(&sample(0)).unwrap();

        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        file.write_all(&[0, 0, 0, 90, 0, 1, 0]).unwrap();
        drop(file);

        let mut log = FileLog::open(dir.path(), 1553).unwrap();
        log.append(&sample(1)).unwrap();
        assert_eq!(log.packets_from(0).unwrap(), vec![sample(0), sample(1)]);

        let mut reopened = FileLog::open(dir.path(), 1553).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.max_timestamp(), Some(1050));
        assert!(reopened.check_and_repair().unwrap().is_clean());
    }

    #[test]
    fn undecodable_entries_are_reported_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = FileLog::open(dir.path(), 7).unwrap();
        log.append(&sample(0)).unwrap();

        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        file.write_all(&[0, 0, 0, 2, 0xBE, 0xEF]).unwrap();
        drop(file);
        log.append(&sample(1)).unwrap();

        let report = log.check_and_repair().unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.undecodable, 1);
        assert_eq!(report.truncated_bytes, 0);
        assert_eq!(log.packets_from(0).unwrap(), vec![sample(0), sample(1)]);
    }
}
