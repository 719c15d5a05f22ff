use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use thiserror::Error;

/// File name of the log inside a database directory.
pub const WAL_FILE_NAME: &str = "burrow.wal";

/// Truncated blake3 digest guarding each frame against torn writes.
const FRAME_CHECK_LEN: usize = 8;

/// Upper bound on a single frame payload. Anything larger is treated as a
/// corrupted length prefix.
const MAX_FRAME_LEN: u32 = 32 * 1024 * 1024;

/// Error surfaced by the [`FileWal`] implementation.
#[derive(Debug, Error)]
pub enum WalError {
    /// Generic I/O failure while manipulating the log on disk.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The log contains malformed data and can no longer be trusted.
    #[error("corrupted wal stream")]
    Corrupt,
}

/// Persistent write-ahead-log used by the Burrow key/value engine.
///
/// Frames are appended sequentially: a little-endian length prefix, a
/// truncated blake3 digest of the payload, then the payload itself. The
/// digest lets the salvage path distinguish a cleanly written frame from a
/// torn tail.
#[derive(Debug)]
pub struct FileWal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    frames: Mutex<u64>,
}

impl FileWal {
    /// Open or create the log located at `directory`.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, WalError> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory)?;
        let path = directory.join(WAL_FILE_NAME);

        if !path.exists() {
            File::create(&path)?;
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        writer.seek(SeekFrom::End(0))?;

        Ok(FileWal {
            path,
            writer: Mutex::new(writer),
            frames: Mutex::new(0),
        })
    }

    /// Append raw bytes to the log. The frame is flushed to the OS but not
    /// fsynced; call [`FileWal::sync`] for durability.
    pub fn append(&self, record: &[u8]) -> Result<(), WalError> {
        let mut writer = self.writer.lock();
        write_frame(&mut *writer, record)?;
        writer.flush()?;
        *self.frames.lock() += 1;
        Ok(())
    }

    /// Flush buffered data and ensure it is durably persisted.
    pub fn sync(&self) -> Result<(), WalError> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Replay every frame in order. Any malformed frame fails the replay.
    pub fn replay(&self) -> Result<Vec<Vec<u8>>, WalError> {
        let records = read_frames(&self.path, true)?;
        *self.frames.lock() = records.len() as u64;
        Ok(records)
    }

    /// Replace the whole log with `frames`, atomically. Used by compaction.
    pub fn rewrite<I>(&self, frames: I) -> Result<(), WalError>
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut count = 0u64;
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for frame in frames {
                write_frame(&mut tmp, &frame)?;
                count += 1;
            }
            tmp.flush()?;
            tmp.get_ref().sync_data()?;
        }

        // Swap the new log in before reopening the writer handle.
        {
            let mut writer = self.writer.lock();
            writer.flush()?;
            fs::rename(&tmp_path, &self.path)?;
            let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
            let mut reopened = BufWriter::new(file);
            reopened.seek(SeekFrom::End(0))?;
            *writer = reopened;
        }
        *self.frames.lock() = count;
        Ok(())
    }

    /// Number of frames appended or replayed through this handle.
    pub fn frame_count(&self) -> u64 {
        *self.frames.lock()
    }

    /// Path of the backing log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every intact frame from the log at `path`, stopping at the first
/// malformed one. With `strict` set, a malformed frame is an error instead.
pub fn read_frames(path: &Path, strict: bool) -> Result<Vec<Vec<u8>>, WalError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(WalError::Io(err)),
        }
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            if strict {
                return Err(WalError::Corrupt);
            }
            break;
        }

        let mut check = [0u8; FRAME_CHECK_LEN];
        let mut payload = vec![0u8; len as usize];
        let read = reader
            .read_exact(&mut check)
            .and_then(|()| reader.read_exact(&mut payload));
        match read {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                if strict {
                    return Err(WalError::Corrupt);
                }
                break;
            }
            Err(err) => return Err(WalError::Io(err)),
        }

        if frame_check(&payload) != check {
            if strict {
                return Err(WalError::Corrupt);
            }
            break;
        }
        records.push(payload);
    }

    Ok(records)
}

fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), WalError> {
    let len = u32::try_from(payload.len()).map_err(|_| WalError::Corrupt)?;
    if len > MAX_FRAME_LEN {
        return Err(WalError::Corrupt);
    }
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&frame_check(payload))?;
    writer.write_all(payload)?;
    Ok(())
}

fn frame_check(payload: &[u8]) -> [u8; FRAME_CHECK_LEN] {
    let digest = blake3::hash(payload);
    let mut check = [0u8; FRAME_CHECK_LEN];
    check.copy_from_slice(&digest.as_bytes()[..FRAME_CHECK_LEN]);
    check
}
