//! Durable trade storage.
//!
//! Trades are kept as JSON lines, one `Trade` per line, in the order they were
//! written. Blank lines are ignored on load; a missing file loads as empty.

use depth_common::Result;
use depth_common::market::Trade;
use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Line-oriented trade storage used by the persistence service.
pub trait TradeStorage: Send + Sync {
    /// Every stored trade, oldest first.
    fn load_all(&self) -> Result<Vec<Trade>>;
    /// Appends `trades` after the existing records.
    fn append_lines(&self, trades: &[Trade]) -> Result<()>;
    /// Replaces all stored records with `trades`.
    fn overwrite_with_lines(&self, trades: &[Trade]) -> Result<()>;
}

/// JSON-lines file at a fixed path.
pub struct FileTradeStorage {
    path: PathBuf,
}

impl FileTradeStorage {
    /// Storage backed by the file at `path` (created on first write).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_lines<W: Write>(writer: &mut W, trades: &[Trade]) -> Result<()> {
        for trade in trades {
            serde_json::to_writer(&mut *writer, trade)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl TradeStorage for FileTradeStorage {
    fn load_all(&self) -> Result<Vec<Trade>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No trade history at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut trades = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Trade>(&line) {
                Ok(trade) => trades.push(trade),
                Err(e) => warn!(
                    "Skipping unreadable trade at {}:{}: {}",
                    self.path.display(),
                    number + 1,
                    e
                ),
            }
        }
        Ok(trades)
    }

    fn append_lines(&self, trades: &[Trade]) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Self::write_lines(&mut BufWriter::new(file), trades)
    }

    fn overwrite_with_lines(&self, trades: &[Trade]) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            Self::write_lines(&mut writer, trades)?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::trade_ledger::tests::numbered_trade;
    use depth_common::market::PanelId;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> FileTradeStorage {
        FileTradeStorage::new(dir.path().join("trade_history.jsonl"))
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(storage(&tmp).load_all().unwrap().is_empty());
    }

    #[test]
    fn test_overwrite_then_load_is_lossless() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);
        let mut trades: Vec<Trade> = (1..=100).map(numbered_trade).collect();
        trades[3].origin_panel = Some(PanelId::new("panel-7"));
        trades[4].time = trades[4].time + chrono::Duration::nanoseconds(123_456_789);

        storage.overwrite_with_lines(&trades).unwrap();
        assert_eq!(storage.load_all().unwrap(), trades);

        storage.overwrite_with_lines(&trades[..1]).unwrap();
        assert_eq!(storage.load_all().unwrap(), trades[..1].to_vec());
    }

    #[test]
    fn test_append_keeps_order() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);
        storage.append_lines(&[numbered_trade(1)]).unwrap();
        storage
            .append_lines(&[numbered_trade(2), numbered_trade(3)])
            .unwrap();
        let quantities: Vec<u32> = storage
            .load_all()
            .unwrap()
            .iter()
            .map(|t| t.quantity)
            .collect();
        assert_eq!(quantities, vec![1, 2, 3]);
    }

    #[test]
    fn test_corrupt_line_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);
        storage.append_lines(&[numbered_trade(1)]).unwrap();
        fs::write(
            storage.path(),
            format!(
                "{}\nnot json\n\n",
                fs::read_to_string(storage.path()).unwrap().trim_end()
            ),
        )
        .unwrap();
        assert_eq!(storage.load_all().unwrap(), vec![numbered_trade(1)]);
    }
}
