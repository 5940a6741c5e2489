use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::StoreEvent;

/// A length prefix above this is treated as corruption.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
/// Length prefix plus checksum.
const FRAME_OVERHEAD: usize = 8;

fn encode_event(writer: &mut impl Write, event: &StoreEvent) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only store journal.
///
/// Entry format: `[u32: len][bincode: StoreEvent][u32: crc32]`, little endian.
/// A torn last entry is dropped on replay and cut off by [`Journal::recover`].
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Journal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append one event and fsync.
    pub fn append(&mut self, event: &StoreEvent) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("journal.tmp")
    }

    /// Rewrite the journal as `events` and swap it in atomically.
    pub fn compact(&mut self, events: &[StoreEvent]) -> io::Result<()> {
        let tmp_path = self.tmp_path();
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for event in events {
                encode_event(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// All valid events on disk. Missing file means empty.
    pub fn replay(path: &Path) -> io::Result<Vec<StoreEvent>> {
        Self::read_valid_prefix(path).map(|(events, _)| events)
    }

    /// Replay, cut any torn or corrupt tail off the file, then open for
    /// appending. Later appends land directly after the last valid entry.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<StoreEvent>)> {
        let (events, valid_len) = Self::read_valid_prefix(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > valid_len
        {
            tracing::warn!(
                "{}: discarding {} bytes of torn or corrupt tail",
                path.display(),
                meta.len() - valid_len
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok((Self::open(path)?, events))
    }

    /// Valid events and the byte length of the prefix holding them.
    fn read_valid_prefix(path: &Path) -> io::Result<(Vec<StoreEvent>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;
        while let Some(payload) = read_frame(&mut reader)? {
            let Ok(event) = bincode::deserialize::<StoreEvent>(&payload) else {
                break;
            };
            valid_len += (FRAME_OVERHEAD + payload.len()) as u64;
            events.push(event);
        }
        Ok((events, valid_len))
    }
}

/// Fill `buf` completely. `false` on a clean or torn end of file.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next checksummed payload, or `None` at the end of the valid prefix.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut word = [0u8; 4];
    if !fill(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_FRAME_BYTES {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !fill(reader, &mut payload)? || !fill(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}
