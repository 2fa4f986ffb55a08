//! Per-transaction file dumps — one numbered set of files per request plus
//! an index summary, under a per-run directory. Everything here is
//! best-effort: a failed write warns and the request proceeds.

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

const INDEX_HEADER: &str = "seq\ttimestamp\tcredential\troute\tstatus\tduration_ms\n";

#[derive(Debug)]
pub struct TxMeta {
    pub credential: String,
    pub route: String,
    pub status: u16,
    pub duration_ms: u128,
}

pub struct TxLogger {
    dir: PathBuf,
    seq: AtomicU64,
}

impl TxLogger {
    /// Create the per-run directory
    /// `<home>/xyz-jphil/ccapis/conversations-logs/<yyyy-MM-dd_HHmmss>/`.
    /// Returns None when disabled or the directory can't be created.
    pub fn create(enabled: bool) -> Option<Self> {
        if !enabled {
            return None;
        }
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let dir = home
            .join("xyz-jphil")
            .join("ccapis")
            .join("conversations-logs")
            .join(Utc::now().format("%Y-%m-%d_%H%M%S").to_string());

        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(err = %e, dir = %dir.display(), "transaction log directory unavailable");
            return None;
        }
        if let Err(e) = std::fs::write(dir.join("index.txt"), INDEX_HEADER) {
            warn!(err = %e, "transaction index unavailable");
        }

        Some(Self {
            dir,
            seq: AtomicU64::new(0),
        })
    }

    /// Claim the next transaction number.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn log_request(&self, seq: u64, headers: &str, body: &[u8]) {
        self.write_file(&format!("{:04}-req.header", seq), headers.as_bytes());
        self.write_file(&format!("{:04}-req.body", seq), body);
    }

    pub fn log_response(&self, seq: u64, headers: &str, body: &[u8]) {
        self.write_file(&format!("{:04}-res.header", seq), headers.as_bytes());
        self.write_file(&format!("{:04}-res.body", seq), body);
    }

    /// Write the meta.properties file and append the index line.
    pub fn log_meta(&self, seq: u64, meta: &TxMeta) {
        let timestamp = Utc::now().to_rfc3339();
        let properties = format!(
            "seq={}\ntimestamp={}\ncredential={}\nroute={}\nstatus={}\nduration_ms={}\n",
            seq, timestamp, meta.credential, meta.route, meta.status, meta.duration_ms
        );
        self.write_file(&format!("{:04}-meta.properties", seq), properties.as_bytes());

        let line = format!(
            "{:04}\t{}\t{}\t{}\t{}\t{}\n",
            seq, timestamp, meta.credential, meta.route, meta.status, meta.duration_ms
        );
        let index = self.dir.join("index.txt");
        let result = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&index)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            warn!(err = %e, "transaction index append failed");
        }
    }

    fn write_file(&self, name: &str, contents: &[u8]) {
        if let Err(e) = std::fs::write(self.dir.join(name), contents) {
            warn!(err = %e, file = name, "transaction dump failed");
        }
    }
}
