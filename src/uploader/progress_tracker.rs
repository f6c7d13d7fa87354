use tokio::time::{Duration, Instant};

use super::chunks::Chunk;

/// Byte-level progress for a single file upload.
#[derive(Debug)]
pub struct UploadProgress {
    file_name: String,
    total_bytes: u64,
    total_chunks: u64,
    bytes_sent: u64,
    chunks_sent: u64,
    started: Instant,
}

impl UploadProgress {
    pub fn new(file_name: &str, total_bytes: u64, total_chunks: u64) -> Self {
        Self {
            file_name: file_name.to_string(),
            total_bytes,
            total_chunks,
            bytes_sent: 0,
            chunks_sent: 0,
            started: Instant::now(),
        }
    }

    /// Announce the range about to be sent (one stdout line per chunk).
    pub fn chunk_started(&self, chunk: &Chunk) {
        println!(
            "Uploading bytes {}-{} of {}...",
            chunk.start, chunk.end, chunk.total
        );
    }

    pub fn chunk_completed(&mut self, chunk: &Chunk) {
        self.chunks_sent += 1;
        self.bytes_sent += chunk.size();

        let eta = estimate_remaining(self.started.elapsed(), self.bytes_sent, self.total_bytes);
        log::debug!(
            "Progress: {} chunk {}/{} ({:.1}%, ETA {})",
            self.file_name,
            self.chunks_sent,
            self.total_chunks,
            self.percent(),
            format_eta(eta)
        );
    }

    pub fn percent(&self) -> f32 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_sent as f64 / self.total_bytes as f64 * 100.0) as f32
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Linear ETA from the throughput so far.
pub fn estimate_remaining(elapsed: Duration, done: u64, total: u64) -> Option<Duration> {
    if done == 0 || done > total {
        return None;
    }
    let rate = done as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    let remaining = (total - done) as f64;
    Duration::try_from_secs_f64(remaining / rate).ok()
}

fn format_eta(eta: Option<Duration>) -> String {
    match eta {
        Some(d) => {
            let secs = d.as_secs();
            format!("{}m {}s", secs / 60, secs % 60)
        }
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_accumulates_chunks() {
        let mut progress = UploadProgress::new("report.bin", 1000, 2);
        let first = Chunk {
            index: 0,
            start: 0,
            end: 599,
            total: 1000,
        };
        let second = Chunk {
            index: 1,
            start: 600,
            end: 999,
            total: 1000,
        };

        progress.chunk_completed(&first);
        assert_eq!(progress.bytes_sent(), 600);
        assert!((progress.percent() - 60.0).abs() < 0.01);

        progress.chunk_completed(&second);
        assert_eq!(progress.chunks_sent(), 2);
        assert!((progress.percent() - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_estimate_remaining() {
        let eta = estimate_remaining(Duration::from_secs(10), 250, 1000).unwrap();
        assert_eq!(eta.as_secs(), 30);

        assert!(estimate_remaining(Duration::from_secs(10), 0, 1000).is_none());
        assert_eq!(
            estimate_remaining(Duration::from_secs(10), 1000, 1000),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(Some(Duration::from_secs(125))), "2m 5s");
        assert_eq!(format_eta(None), "unknown");
    }
}
