use crate::{
    DEFAULT_PART_SIZE, MAXIMUM_OBJECT_SIZE, MAXIMUM_PART_COUNT, MAXIMUM_PART_SIZE,
    MINIMUM_OBJECT_SIZE, MINIMUM_PART_SIZE, PartError,
};

/// A validated part size in `[5 MiB, 5 GiB]`.
///
/// The derivation from a file size is deterministic: recovery rebuilds
/// identical part boundaries from a persisted file size without any other
/// stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UploadPartSize(u64);

impl UploadPartSize {
    /// Validates an explicitly chosen part size.
    pub fn new(size: u64) -> Result<Self, PartError> {
        if size < MINIMUM_PART_SIZE {
            return Err(PartError::BelowMinimumPartSize(size));
        }
        if size > MAXIMUM_PART_SIZE {
            return Err(PartError::OverMaximumPartSize(size));
        }
        Ok(Self(size))
    }

    /// Chooses the part size for a file of `file_size` bytes.
    ///
    /// Starts at the default part size and doubles (capped at the maximum
    /// part size) until the resulting part count fits the 10,000 part
    /// limit.
    pub fn for_file_size(file_size: u64) -> Result<Self, PartError> {
        if file_size < MINIMUM_OBJECT_SIZE {
            return Err(PartError::BelowMinimumObjectSize(file_size));
        }
        if file_size > MAXIMUM_OBJECT_SIZE {
            return Err(PartError::ExceedsMaximumObjectSize(file_size));
        }

        let mut candidate = DEFAULT_PART_SIZE;
        while file_size.div_ceil(candidate) > MAXIMUM_PART_COUNT {
            if candidate >= MAXIMUM_PART_SIZE {
                return Err(PartError::ExceedsSupportedFileSize(file_size));
            }
            candidate = (candidate * 2).min(MAXIMUM_PART_SIZE);
        }
        Ok(Self(candidate))
    }

    /// Part size in bytes.
    pub fn bytes(self) -> u64 {
        self.0
    }

    /// Number of parts a file of `file_size` bytes splits into.
    pub fn part_count(self, file_size: u64) -> u64 {
        file_size.div_ceil(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    #[test]
    fn explicit_size_within_bounds() {
        let size = UploadPartSize::new(8 * MIB).unwrap();
        assert_eq!(size.bytes(), 8 * MIB);
    }

    #[test]
    fn explicit_size_below_minimum() {
        let result = UploadPartSize::new(MIB);
        assert_eq!(result, Err(PartError::BelowMinimumPartSize(MIB)));
    }

    #[test]
    fn explicit_size_over_maximum() {
        let result = UploadPartSize::new(6 * GIB);
        assert_eq!(result, Err(PartError::OverMaximumPartSize(6 * GIB)));
    }

    #[test]
    fn zero_byte_object_rejected() {
        let result = UploadPartSize::for_file_size(0);
        assert_eq!(result, Err(PartError::BelowMinimumObjectSize(0)));
    }

    #[test]
    fn oversized_object_rejected() {
        let size = 5 * TIB + 1;
        let result = UploadPartSize::for_file_size(size);
        assert_eq!(result, Err(PartError::ExceedsMaximumObjectSize(size)));
    }

    #[test]
    fn small_file_uses_default_size() {
        let size = UploadPartSize::for_file_size(12 * MIB).unwrap();
        assert_eq!(size.bytes(), DEFAULT_PART_SIZE);
        assert_eq!(size.part_count(12 * MIB), 3);
    }

    #[test]
    fn large_file_doubles_until_count_fits() {
        // 100 GiB at 5 MiB would be 20,480 parts; one doubling to 10 MiB
        // brings it to 10,240, still over; 20 MiB gives 5,120.
        let file_size = 100 * GIB;
        let size = UploadPartSize::for_file_size(file_size).unwrap();
        assert_eq!(size.bytes(), 20 * MIB);
        assert!(size.part_count(file_size) <= MAXIMUM_PART_COUNT);
    }

    #[test]
    fn maximum_object_size_fits() {
        let size = UploadPartSize::for_file_size(5 * TIB).unwrap();
        assert!(size.part_count(5 * TIB) <= MAXIMUM_PART_COUNT);
        assert!(size.bytes() <= MAXIMUM_PART_SIZE);
    }

    #[test]
    fn derivation_is_deterministic() {
        for file_size in [MIB, 48 * MIB, GIB, 200 * GIB, 5 * TIB] {
            let first = UploadPartSize::for_file_size(file_size).unwrap();
            let second = UploadPartSize::for_file_size(file_size).unwrap();
            assert_eq!(first, second);
            assert!(first.part_count(file_size) <= MAXIMUM_PART_COUNT);
        }
    }
}
