use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Larger length prefixes are treated as corruption rather than allocated.
const MAX_ENTRY_LEN: usize = 1 << 20;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only write-ahead log of booking events, one file per tenant.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated last entry (crash mid-write) is discarded on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append a single event and fsync. The engine commits through
    /// `append_all` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Append a single event to the BufWriter without flushing or syncing.
    /// Call `flush_sync()` after the batch to durably commit all buffered events.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Append every event and fsync once. On any failure the file is cut
    /// back to its length before the call, so either all events are durable
    /// or none are.
    pub fn append_all<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
        self.writer.flush()?;
        let start_len = self.writer.get_ref().metadata()?.len();
        let start_appends = self.appends_since_compact;

        let mut result = Ok(());
        for event in events {
            result = self.append_buffered(event);
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() {
            result = self.flush_sync();
        }
        if result.is_err() {
            self.appends_since_compact = start_appends;
            if let Err(e) = self.rollback_to(start_len) {
                tracing::error!("WAL rollback to {start_len} bytes failed: {e}");
            }
        }
        result
    }

    /// Drop unflushed bytes and cut the file back to `len`.
    fn rollback_to(&mut self, len: u64) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the file without flushing the stale buffer.
        let (stale_file, _unflushed) = stale.into_parts();
        stale_file.set_len(len)?;
        stale_file.sync_all()
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Return the WAL file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted events to a temp file and fsync.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the WAL and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Both compaction phases in one call. Used by tests.
    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning every event up to the first
    /// truncated or corrupt entry. A missing file replays as empty.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Self::replay_valid(path).map(|(events, _)| events)
    }

    /// Like [`Wal::replay`], also returning the byte length of the intact
    /// prefix. Anything past that offset is a torn or corrupt tail.
    pub fn replay_valid(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;
        while let Some((event, entry_len)) = read_entry(&mut reader)? {
            events.push(event);
            valid_len += entry_len;
        }
        tracing::debug!("replayed {} WAL entries from {}", events.len(), path.display());
        Ok((events, valid_len))
    }

    /// Cut the file at `path` back to `len` bytes so new appends follow the
    /// last intact entry. No-op when the file is already that short.
    pub fn truncate_tail(path: &Path, len: u64) -> io::Result<()> {
        let file = match OpenOptions::new().write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let current = file.metadata()?.len();
        if current > len {
            tracing::warn!(
                "discarding {} bytes of torn WAL tail in {}",
                current - len,
                path.display()
            );
            file.set_len(len)?;
            file.sync_all()?;
        }
        Ok(())
    }
}

/// Fill `buf` completely. `Ok(false)` on end of file, including a partial read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Decode the next entry and its encoded size. `Ok(None)` ends replay.
fn read_entry(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_ENTRY_LEN {
        tracing::warn!("WAL entry length {len} out of range, discarding the rest of the log");
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        tracing::warn!("WAL entry failed CRC check, discarding the rest of the log");
        return Ok(None);
    }
    let Ok(event) = bincode::deserialize::<Event>(&payload) else {
        tracing::warn!("WAL entry failed to decode, discarding the rest of the log");
        return Ok(None);
    };
    Ok(Some((event, (len + 8) as u64)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("timetable_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn added(id: BookingId, staff: &str) -> Event {
        Event::BookingAdded {
            booking: Booking {
                id,
                staff_name: staff.into(),
                department: "CS".into(),
                year: "2".into(),
                semester: "3".into(),
                subject: "OS".into(),
                room: None,
                slot: Slot::new(Day::Monday, Period::new(0).unwrap()),
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![added(1, "Asha"), Event::BookingRemoved { id: 1 }];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let event = added(1, "Asha");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }

        // Partial second entry, as left behind by a crash mid-write.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[40u8, 0, 0, 0, 1, 2]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![event]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let good = added(1, "Asha");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&added(2, "Rahul")).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![good]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_shrinks_and_keeps_id_watermark() {
        let path = tmp_path("compact_shrink.wal");

        {
            let mut wal = Wal::open(&path).unwrap();
            for id in 1..=20 {
                wal.append(&added(id, "Asha")).unwrap();
                wal.append(&Event::BookingRemoved { id }).unwrap();
            }
            wal.append(&added(21, "Rahul")).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        let compacted = vec![Event::IdReserved { next_id: 22 }, added(21, "Rahul")];
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&compacted).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), compacted);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let compacted = vec![Event::IdReserved { next_id: 5 }];
        let new_event = added(5, "Asha");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&added(4, "Asha")).unwrap();
            wal.compact(&compacted).unwrap();
            wal.append(&new_event).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![compacted[0].clone(), new_event]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_buffered_then_flush_sync() {
        let path = tmp_path("buffered_flush.wal");
        let events: Vec<Event> = (1..=5).map(|id| added(id, "Asha")).collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_valid_reports_intact_prefix() {
        let path = tmp_path("valid_prefix.wal");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&added(1, "Asha")).unwrap();
            wal.append(&added(2, "Rahul")).unwrap();
        }
        let intact = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[40u8, 0, 0, 0, 1, 2, 3]).unwrap();
        }

        let (events, valid_len) = Wal::replay_valid(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(valid_len, intact);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn appends_after_torn_tail_survive_replay() {
        let path = tmp_path("torn_tail_append.wal");
        let first = added(1, "Asha");
        let second = added(2, "Rahul");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[40u8, 0, 0, 0, 1, 2, 3]).unwrap();
        }

        let (_, valid_len) = Wal::replay_valid(&path).unwrap();
        Wal::truncate_tail(&path, valid_len).unwrap();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_all_writes_every_event() {
        let path = tmp_path("append_all.wal");
        let events: Vec<Event> = (1..=4).map(|id| added(id, "Asha")).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append_all(&events).unwrap();
            assert_eq!(wal.appends_since_compact(), 4);
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rollback_discards_partial_batch() {
        let path = tmp_path("rollback_batch.wal");
        let kept = added(1, "Asha");
        let next = added(4, "Meena");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&kept).unwrap();
            let len = fs::metadata(&path).unwrap().len();

            // Half a batch reaches the file before the failure.
            wal.append_buffered(&added(2, "Rahul")).unwrap();
            wal.writer.flush().unwrap();
            wal.append_buffered(&added(3, "Vikram")).unwrap();
            wal.rollback_to(len).unwrap();

            assert_eq!(fs::metadata(&path).unwrap().len(), len);
            wal.append(&next).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, next]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_stops_at_oversized_length() {
        let path = tmp_path("oversized.wal");
        let good = added(1, "Asha");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);

        let _ = fs::remove_file(&path);
    }
}
