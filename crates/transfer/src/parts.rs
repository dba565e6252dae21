use barge_protocol::{HandleId, PartNumber, PartSnapshot, TransferProgress};

use crate::{MAXIMUM_PART_COUNT, PartError, SharedError, UploadPartSize};

/// Lifecycle of one part of a multipart upload.
///
/// A part only moves forward: pending → queued → in-progress →
/// completed or failed. The transport handle identifier is only known
/// once the transport layer has accepted the sub-operation, so a queued
/// part carries no identifier yet.
#[derive(Debug, Clone)]
pub enum UploadPart {
    Pending {
        bytes: u64,
    },
    Queued {
        bytes: u64,
    },
    InProgress {
        bytes: u64,
        bytes_transferred: u64,
        handle_id: HandleId,
    },
    Completed {
        bytes: u64,
        etag: String,
    },
    Failed {
        bytes: u64,
        bytes_transferred: u64,
        error: SharedError,
    },
}

impl UploadPart {
    /// Size of this part in bytes.
    pub fn bytes(&self) -> u64 {
        match self {
            UploadPart::Pending { bytes }
            | UploadPart::Queued { bytes }
            | UploadPart::InProgress { bytes, .. }
            | UploadPart::Completed { bytes, .. }
            | UploadPart::Failed { bytes, .. } => *bytes,
        }
    }

    /// Bytes confirmed transferred so far. A completed part counts in
    /// full; a failed part counts what was transferred before the failure.
    pub fn bytes_transferred(&self) -> u64 {
        match self {
            UploadPart::Pending { .. } | UploadPart::Queued { .. } => 0,
            UploadPart::InProgress {
                bytes_transferred, ..
            }
            | UploadPart::Failed {
                bytes_transferred, ..
            } => *bytes_transferred,
            UploadPart::Completed { bytes, .. } => *bytes,
        }
    }

    /// Entity tag of a completed part.
    pub fn etag(&self) -> Option<&str> {
        match self {
            UploadPart::Completed { etag, .. } => Some(etag),
            _ => None,
        }
    }

    /// Transport handle identifier of an in-progress part.
    pub fn handle_id(&self) -> Option<HandleId> {
        match self {
            UploadPart::InProgress { handle_id, .. } => Some(*handle_id),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, UploadPart::Pending { .. })
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, UploadPart::Queued { .. })
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, UploadPart::InProgress { .. })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, UploadPart::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, UploadPart::Failed { .. })
    }

    /// Progress snapshot of this part for persistence.
    pub fn snapshot(&self, part_number: PartNumber) -> PartSnapshot {
        PartSnapshot {
            part_number,
            bytes: self.bytes(),
            bytes_transferred: self.bytes_transferred(),
            etag: self.etag().map(str::to_owned),
            handle_id: self.handle_id(),
        }
    }
}

/// The ordered parts of one multipart upload.
///
/// Invariant: part bytes always sum to the source file size; the last
/// part absorbs the remainder.
#[derive(Debug, Clone)]
pub struct UploadParts(Vec<UploadPart>);

impl UploadParts {
    /// Splits a file of `file_size` bytes into pending parts of
    /// `part_size` bytes each, the last absorbing the remainder.
    pub fn build(file_size: u64, part_size: UploadPartSize) -> Result<Self, PartError> {
        if file_size == 0 {
            return Err(PartError::PartCountBelowLowerLimit);
        }
        let count = part_size.part_count(file_size);
        if count > MAXIMUM_PART_COUNT {
            return Err(PartError::PartCountOverUpperLimit(count));
        }

        let full = part_size.bytes();
        let mut parts = Vec::with_capacity(count as usize);
        for index in 0..count {
            let bytes = if index == count - 1 {
                file_size - index * full
            } else {
                full
            };
            parts.push(UploadPart::Pending { bytes });
        }
        Ok(Self(parts))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UploadPart> {
        self.0.iter()
    }

    /// Returns the part with the given 1-based number.
    pub fn find(&self, part_number: PartNumber) -> Result<&UploadPart, PartError> {
        if part_number == 0 || part_number as usize > self.0.len() {
            return Err(PartError::InvalidPartNumber(part_number));
        }
        Ok(&self.0[part_number as usize - 1])
    }

    /// Replaces the part with the given 1-based number.
    pub fn set(&mut self, part_number: PartNumber, part: UploadPart) -> Result<(), PartError> {
        if part_number == 0 || part_number as usize > self.0.len() {
            return Err(PartError::InvalidPartNumber(part_number));
        }
        self.0[part_number as usize - 1] = part;
        Ok(())
    }

    /// Total bytes across all parts (the source file size).
    pub fn total_bytes(&self) -> u64 {
        self.0.iter().map(UploadPart::bytes).sum()
    }

    /// Bytes confirmed transferred across all parts.
    pub fn bytes_transferred(&self) -> u64 {
        self.0.iter().map(UploadPart::bytes_transferred).sum()
    }

    /// Aggregate progress across all parts.
    pub fn progress(&self) -> TransferProgress {
        TransferProgress {
            total_bytes: self.total_bytes(),
            transferred_bytes: self.bytes_transferred(),
        }
    }

    /// Numbers of parts still pending, in ascending order.
    pub fn pending_part_numbers(&self) -> Vec<PartNumber> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, part)| part.is_pending())
            .map(|(index, _)| index as PartNumber + 1)
            .collect()
    }

    pub fn in_progress_count(&self) -> usize {
        self.0.iter().filter(|p| p.is_in_progress()).count()
    }

    /// Parts that have been queued or accepted by the transport but are
    /// not yet terminal.
    pub fn active_count(&self) -> usize {
        self.0
            .iter()
            .filter(|p| p.is_queued() || p.is_in_progress())
            .count()
    }

    pub fn completed_count(&self) -> usize {
        self.0.iter().filter(|p| p.is_completed()).count()
    }

    pub fn all_completed(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(UploadPart::is_completed)
    }

    pub fn any_failed(&self) -> bool {
        self.0.iter().any(UploadPart::is_failed)
    }

    pub fn has_pending(&self) -> bool {
        self.0.iter().any(UploadPart::is_pending)
    }

    /// Progress snapshots of every part, for persistence.
    pub fn snapshots(&self) -> Vec<PartSnapshot> {
        self.0
            .iter()
            .enumerate()
            .map(|(index, part)| part.snapshot(index as PartNumber + 1))
            .collect()
    }
}

impl<'a> IntoIterator for &'a UploadParts {
    type Item = &'a UploadPart;
    type IntoIter = std::slice::Iter<'a, UploadPart>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const MIB: u64 = 1024 * 1024;

    fn part_size(bytes: u64) -> UploadPartSize {
        UploadPartSize::new(bytes).unwrap()
    }

    fn failure() -> SharedError {
        Arc::new(std::io::Error::other("connection reset"))
    }

    #[test]
    fn twelve_mib_file_splits_into_three_parts() {
        let parts = UploadParts::build(12 * MIB, part_size(5 * MIB)).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts.find(1).unwrap().bytes(), 5 * MIB);
        assert_eq!(parts.find(2).unwrap().bytes(), 5 * MIB);
        assert_eq!(parts.find(3).unwrap().bytes(), 2 * MIB);
        assert_eq!(parts.total_bytes(), 12 * MIB);
    }

    #[test]
    fn evenly_divisible_file_has_full_last_part() {
        let parts = UploadParts::build(10 * MIB, part_size(5 * MIB)).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts.find(2).unwrap().bytes(), 5 * MIB);
        assert_eq!(parts.total_bytes(), 10 * MIB);
    }

    #[test]
    fn part_bytes_always_sum_to_file_size() {
        let size = part_size(5 * MIB);
        for file_size in [1, MIB, 5 * MIB, 12 * MIB, 5 * MIB + 1, 60 * MIB - 1] {
            let parts = UploadParts::build(file_size, size).unwrap();
            assert_eq!(parts.total_bytes(), file_size, "file_size={file_size}");
            assert_eq!(parts.len() as u64, size.part_count(file_size));
        }
    }

    #[test]
    fn zero_size_file_rejected() {
        let result = UploadParts::build(0, part_size(5 * MIB));
        assert_eq!(result.unwrap_err(), PartError::PartCountBelowLowerLimit);
    }

    #[test]
    fn too_many_parts_rejected() {
        // 10,001 parts of 5 MiB.
        let file_size = 5 * MIB * 10_000 + 1;
        let result = UploadParts::build(file_size, part_size(5 * MIB));
        assert_eq!(result.unwrap_err(), PartError::PartCountOverUpperLimit(10_001));
    }

    #[test]
    fn find_rejects_out_of_range_part_numbers() {
        let parts = UploadParts::build(12 * MIB, part_size(5 * MIB)).unwrap();
        assert_eq!(parts.find(0).unwrap_err(), PartError::InvalidPartNumber(0));
        assert_eq!(parts.find(4).unwrap_err(), PartError::InvalidPartNumber(4));
    }

    #[test]
    fn bytes_transferred_counts_terminal_and_in_flight_parts() {
        let mut parts = UploadParts::build(12 * MIB, part_size(5 * MIB)).unwrap();
        parts
            .set(
                1,
                UploadPart::Completed {
                    bytes: 5 * MIB,
                    etag: "etag-1".into(),
                },
            )
            .unwrap();
        parts
            .set(
                2,
                UploadPart::InProgress {
                    bytes: 5 * MIB,
                    bytes_transferred: MIB,
                    handle_id: 7,
                },
            )
            .unwrap();

        assert_eq!(parts.bytes_transferred(), 6 * MIB);
        assert_eq!(parts.completed_count(), 1);
        assert_eq!(parts.in_progress_count(), 1);
        assert_eq!(parts.pending_part_numbers(), vec![3]);
        assert!(!parts.all_completed());
        assert!(!parts.any_failed());
    }

    #[test]
    fn failed_part_keeps_partial_transfer_count() {
        let part = UploadPart::Failed {
            bytes: 5 * MIB,
            bytes_transferred: 3 * MIB,
            error: failure(),
        };
        assert_eq!(part.bytes_transferred(), 3 * MIB);
        assert!(part.is_failed());
        assert!(part.etag().is_none());
    }

    #[test]
    fn active_count_covers_queued_and_in_progress() {
        let mut parts = UploadParts::build(15 * MIB, part_size(5 * MIB)).unwrap();
        parts.set(1, UploadPart::Queued { bytes: 5 * MIB }).unwrap();
        parts
            .set(
                2,
                UploadPart::InProgress {
                    bytes: 5 * MIB,
                    bytes_transferred: 0,
                    handle_id: 3,
                },
            )
            .unwrap();
        assert_eq!(parts.active_count(), 2);
        assert!(parts.has_pending());
    }

    #[test]
    fn snapshots_carry_part_state() {
        let mut parts = UploadParts::build(12 * MIB, part_size(5 * MIB)).unwrap();
        parts
            .set(
                1,
                UploadPart::Completed {
                    bytes: 5 * MIB,
                    etag: "etag-1".into(),
                },
            )
            .unwrap();
        parts
            .set(
                2,
                UploadPart::InProgress {
                    bytes: 5 * MIB,
                    bytes_transferred: MIB,
                    handle_id: 42,
                },
            )
            .unwrap();

        let snapshots = parts.snapshots();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].etag.as_deref(), Some("etag-1"));
        assert_eq!(snapshots[1].handle_id, Some(42));
        assert_eq!(snapshots[1].bytes_transferred, MIB);
        assert_eq!(snapshots[2].part_number, 3);
        assert_eq!(snapshots[2].bytes, 2 * MIB);
    }
}
