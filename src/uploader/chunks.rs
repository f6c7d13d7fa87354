// Byte-range planning for upload sessions

use crate::errors::{AppError, AppResult};

/// Graph requires every chunk except the last to be a multiple of 320 KiB.
pub const GRAPH_CHUNK_ALIGNMENT: u64 = 327_680;

/// Largest byte range Graph accepts in a single PUT.
pub const GRAPH_MAX_CHUNK_SIZE: u64 = 62_914_560;

/// One contiguous byte range of the source file. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: u64,
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl Chunk {
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_last(&self) -> bool {
        self.end + 1 == self.total
    }

    /// Value for the `Content-Range` header.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    pub fn new(file_size: u64, chunk_size: u64) -> AppResult<Self> {
        if chunk_size == 0 {
            return Err(AppError::validation("chunk_size", "Must be greater than 0"));
        }
        Ok(Self {
            file_size,
            chunk_size,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_count(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size)
    }

    pub fn chunk(&self, index: u64) -> Option<Chunk> {
        if index >= self.chunk_count() {
            return None;
        }
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.file_size) - 1;
        Some(Chunk {
            index,
            start,
            end,
            total: self.file_size,
        })
    }

    pub fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        (0..self.chunk_count()).filter_map(move |i| self.chunk(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const C: u64 = 3_276_800;

    #[test]
    fn test_seven_megabyte_file_ranges() {
        let plan = ChunkPlan::new(7_000_000, C).unwrap();
        let ranges: Vec<String> = plan.chunks().map(|c| c.content_range()).collect();

        assert_eq!(
            ranges,
            vec![
                "bytes 0-3276799/7000000",
                "bytes 3276800-6553599/7000000",
                "bytes 6553600-6999999/7000000",
            ]
        );
    }

    #[test]
    fn test_chunk_count_is_ceiling() {
        for (size, expected) in [
            (1, 1),
            (C - 1, 1),
            (C, 1),
            (C + 1, 2),
            (2 * C, 2),
            (10 * C + 5, 11),
        ] {
            let plan = ChunkPlan::new(size, C).unwrap();
            assert_eq!(plan.chunk_count(), expected, "size {}", size);
            assert_eq!(plan.chunks().count() as u64, expected);
        }
    }

    #[test]
    fn test_ranges_are_contiguous_and_end_at_last_byte() {
        let size = 9_999_999;
        let plan = ChunkPlan::new(size, C).unwrap();
        let chunks: Vec<Chunk> = plan.chunks().collect();

        assert_eq!(chunks[0].start, 0);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start, pair[0].end + 1);
            assert_eq!(pair[0].size(), C);
        }
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.start, i as u64 * C);
        }

        let last = chunks.last().unwrap();
        assert_eq!(last.end, size - 1);
        assert!(last.is_last());
        assert_eq!(chunks.iter().map(|c| c.size()).sum::<u64>(), size);
    }

    #[test]
    fn test_empty_file_has_no_chunks() {
        let plan = ChunkPlan::new(0, C).unwrap();
        assert_eq!(plan.chunk_count(), 0);
        assert!(plan.chunk(0).is_none());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(ChunkPlan::new(100, 0).is_err());
    }
}
