//! Image stack storage.
//!
//! [`FileStore`] persists stacks in a small native container:
//!
//! ```text
//! "MSTK" u32 version
//! repeated: u32 nx, u32 ny, u32 nz, u32 meta_len, meta_len bytes of JSON, nx*ny*nz f32
//! ```
//!
//! All integers and samples are little-endian.

use super::Image;
use crate::error::{MsaError, Result};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const MAGIC: &[u8; 4] = b"MSTK";
const VERSION: u32 = 1;
const FILE_HEADER_BYTES: u64 = 8;
const RECORD_HEADER_BYTES: u64 = 16;

pub trait ImageStore {
    fn count(&self, path: &Path) -> Result<usize>;

    fn read(&self, path: &Path, index: usize) -> Result<Image>;

    /// Writes `image` at `index`; `index == count` appends, smaller indices overwrite.
    fn write(&mut self, path: &Path, index: usize, image: &Image) -> Result<()>;

    /// Removes the stack at `path`. A missing stack is not an error.
    fn discard(&mut self, path: &Path) -> Result<()>;

    fn exists(&self, path: &Path) -> bool {
        self.count(path).is_ok()
    }
}

fn not_found(path: &Path) -> MsaError {
    MsaError::Io(std::io::Error::new(
        ErrorKind::NotFound,
        format!("no image stack at {}", path.display()),
    ))
}

fn out_of_range(path: &Path, index: usize, count: usize) -> MsaError {
    MsaError::IndexOutOfRange {
        path: path.display().to_string(),
        index,
        count,
    }
}

/// In-memory stacks keyed by path. Keeps a per-path read counter.
#[derive(Debug, Default)]
pub struct MemoryStore {
    stacks: HashMap<PathBuf, Vec<Image>>,
    reads: RefCell<HashMap<PathBuf, usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_stack(&mut self, path: impl Into<PathBuf>, images: Vec<Image>) {
        self.stacks.insert(path.into(), images);
    }

    pub fn stack(&self, path: &Path) -> Option<&[Image]> {
        self.stacks.get(path).map(|v| v.as_slice())
    }

    /// Number of `read` calls served for `path`.
    pub fn reads(&self, path: &Path) -> usize {
        self.reads.borrow().get(path).copied().unwrap_or(0)
    }
}

impl ImageStore for MemoryStore {
    fn count(&self, path: &Path) -> Result<usize> {
        self.stacks
            .get(path)
            .map(|s| s.len())
            .ok_or_else(|| not_found(path))
    }

    fn read(&self, path: &Path, index: usize) -> Result<Image> {
        let stack = self.stacks.get(path).ok_or_else(|| not_found(path))?;
        let image = stack
            .get(index)
            .cloned()
            .ok_or_else(|| out_of_range(path, index, stack.len()))?;
        *self.reads.borrow_mut().entry(path.to_path_buf()).or_insert(0) += 1;
        Ok(image)
    }

    fn write(&mut self, path: &Path, index: usize, image: &Image) -> Result<()> {
        let stack = self.stacks.entry(path.to_path_buf()).or_default();
        if index < stack.len() {
            stack[index] = image.clone();
        } else if index == stack.len() {
            stack.push(image.clone());
        } else {
            return Err(out_of_range(path, index, stack.len()));
        }
        Ok(())
    }

    fn discard(&mut self, path: &Path) -> Result<()> {
        self.stacks.remove(path);
        Ok(())
    }
}

/// Stacks stored as `MSTK` files on disk.
///
/// The byte offset of every record is indexed on first access to a path and
/// kept until this store writes or discards that path, so random access costs
/// one seek. Files changed behind the store's back are not noticed.
#[derive(Debug, Default)]
pub struct FileStore {
    offsets: RefCell<HashMap<PathBuf, Vec<u64>>>,
    scans: Cell<usize>,
}

struct RecordHeader {
    nx: usize,
    ny: usize,
    nz: usize,
    meta_len: usize,
}

impl RecordHeader {
    fn payload_bytes(&self) -> u64 {
        let voxels = (self.nx as u64)
            .saturating_mul(self.ny as u64)
            .saturating_mul(self.nz as u64);
        (self.meta_len as u64).saturating_add(voxels.saturating_mul(4))
    }
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of full header scans performed so far.
    pub fn index_scans(&self) -> usize {
        self.scans.get()
    }

    fn open(path: &Path) -> Result<BufReader<File>> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(|e| corrupt(path, e))?;
        if &magic != MAGIC {
            return Err(MsaError::Format(format!(
                "{} is not an MSTK image stack",
                path.display()
            )));
        }
        let version = read_u32(&mut reader).map_err(|e| corrupt(path, e))?;
        if version != VERSION {
            return Err(MsaError::Format(format!(
                "{}: unsupported stack version {}",
                path.display(),
                version
            )));
        }
        Ok(reader)
    }

    /// Reads the next record header. Only a read of zero bytes is a clean
    /// end of file; a partial header means the stack is corrupt.
    fn next_header<R: Read>(reader: &mut R, path: &Path) -> Result<Option<RecordHeader>> {
        let mut buf = [0u8; RECORD_HEADER_BYTES as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < buf.len() {
            return Err(MsaError::Format(format!(
                "{}: truncated record header ({} of {} bytes)",
                path.display(),
                filled,
                buf.len()
            )));
        }
        let field = |i: usize| {
            u32::from_le_bytes([buf[4 * i], buf[4 * i + 1], buf[4 * i + 2], buf[4 * i + 3]]) as usize
        };
        Ok(Some(RecordHeader {
            nx: field(0),
            ny: field(1),
            nz: field(2),
            meta_len: field(3),
        }))
    }

    fn read_body<R: Read>(reader: &mut R, header: &RecordHeader, path: &Path) -> Result<Image> {
        let mut meta = vec![0u8; header.meta_len];
        reader.read_exact(&mut meta).map_err(|e| corrupt(path, e))?;
        let attrs: BTreeMap<String, f64> = if meta.is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_slice(&meta)?
        };

        let mut data = vec![0f32; header.nx * header.ny * header.nz];
        reader
            .read_exact(bytemuck::cast_slice_mut(data.as_mut_slice()))
            .map_err(|e| corrupt(path, e))?;
        if cfg!(target_endian = "big") {
            for v in data.iter_mut() {
                *v = f32::from_bits(u32::from_le(v.to_bits()));
            }
        }

        let mut image = Image::from_vec(header.nx, header.ny, header.nz, data)?;
        image.set_attrs(attrs);
        Ok(image)
    }

    /// Writes one record and returns its size in bytes.
    fn write_record<W: Write>(writer: &mut W, image: &Image) -> Result<u64> {
        let meta = if image.attrs().is_empty() {
            Vec::new()
        } else {
            serde_json::to_vec(image.attrs())?
        };
        for dim in [image.nx(), image.ny(), image.nz(), meta.len()] {
            writer.write_all(&(dim as u32).to_le_bytes())?;
        }
        writer.write_all(&meta)?;
        if cfg!(target_endian = "big") {
            for v in image.as_slice() {
                writer.write_all(&v.to_le_bytes())?;
            }
        } else {
            writer.write_all(bytemuck::cast_slice(image.as_slice()))?;
        }
        Ok(RECORD_HEADER_BYTES + meta.len() as u64 + (image.len() * 4) as u64)
    }

    /// Walks every record header once and checks that each record fits in the file.
    fn scan(&self, path: &Path) -> Result<Vec<u64>> {
        let mut reader = Self::open(path)?;
        let file_len = reader.get_ref().metadata()?.len();
        let mut offsets = Vec::new();
        let mut offset = FILE_HEADER_BYTES;
        while let Some(header) = Self::next_header(&mut reader, path)? {
            let end = (offset + RECORD_HEADER_BYTES).saturating_add(header.payload_bytes());
            if end > file_len {
                return Err(MsaError::Format(format!(
                    "{}: record {} needs {} bytes but the file holds {}",
                    path.display(),
                    offsets.len(),
                    end,
                    file_len
                )));
            }
            offsets.push(offset);
            reader.seek_relative(header.payload_bytes() as i64)?;
            offset = end;
        }
        self.scans.set(self.scans.get() + 1);
        debug!(path = %path.display(), records = offsets.len(), "indexed stack");
        Ok(offsets)
    }

    fn indexed_count(&self, path: &Path) -> Result<usize> {
        if let Some(offsets) = self.offsets.borrow().get(path) {
            return Ok(offsets.len());
        }
        let offsets = self.scan(path)?;
        let count = offsets.len();
        self.offsets.borrow_mut().insert(path.to_path_buf(), offsets);
        Ok(count)
    }

    fn offset_of(&self, path: &Path, index: usize) -> Result<u64> {
        let count = self.indexed_count(path)?;
        self.offsets
            .borrow()
            .get(path)
            .and_then(|offsets| offsets.get(index).copied())
            .ok_or_else(|| out_of_range(path, index, count))
    }

    fn read_all(&self, path: &Path) -> Result<Vec<Image>> {
        let count = self.indexed_count(path)?;
        let mut reader = Self::open(path)?;
        let mut images = Vec::with_capacity(count);
        while let Some(header) = Self::next_header(&mut reader, path)? {
            images.push(Self::read_body(&mut reader, &header, path)?);
        }
        Ok(images)
    }

    fn create(&self, path: &Path, images: &[Image]) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        let mut offsets = Vec::with_capacity(images.len());
        let mut offset = FILE_HEADER_BYTES;
        for image in images {
            offsets.push(offset);
            offset += Self::write_record(&mut writer, image)?;
        }
        writer.flush()?;
        self.offsets.borrow_mut().insert(path.to_path_buf(), offsets);
        Ok(())
    }
}

fn read_u32<R: Read>(reader: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn corrupt(path: &Path, err: std::io::Error) -> MsaError {
    if err.kind() == ErrorKind::UnexpectedEof {
        MsaError::Format(format!("{}: unexpected end of stack file", path.display()))
    } else {
        MsaError::Io(err)
    }
}

impl ImageStore for FileStore {
    fn count(&self, path: &Path) -> Result<usize> {
        self.indexed_count(path)
    }

    fn read(&self, path: &Path, index: usize) -> Result<Image> {
        let offset = self.offset_of(path, index)?;
        let mut reader = Self::open(path)?;
        reader.seek(SeekFrom::Start(offset))?;
        let header = Self::next_header(&mut reader, path)?.ok_or_else(|| {
            MsaError::Format(format!(
                "{}: record {} vanished from the stack",
                path.display(),
                index
            ))
        })?;
        Self::read_body(&mut reader, &header, path)
    }

    fn write(&mut self, path: &Path, index: usize, image: &Image) -> Result<()> {
        if !path.exists() {
            self.offsets.borrow_mut().remove(path);
            if index != 0 {
                return Err(out_of_range(path, index, 0));
            }
            debug!(path = %path.display(), "creating stack");
            return self.create(path, std::slice::from_ref(image));
        }

        let count = self.indexed_count(path)?;
        if index == count {
            let file = OpenOptions::new().append(true).open(path)?;
            let offset = file.metadata()?.len();
            let mut writer = BufWriter::new(file);
            Self::write_record(&mut writer, image)?;
            writer.flush()?;
            if let Some(offsets) = self.offsets.borrow_mut().get_mut(path) {
                offsets.push(offset);
            }
            Ok(())
        } else if index < count {
            let mut images = self.read_all(path)?;
            images[index] = image.clone();
            self.create(path, &images)
        } else {
            Err(out_of_range(path, index, count))
        }
    }

    fn discard(&mut self, path: &Path) -> Result<()> {
        self.offsets.borrow_mut().remove(path);
        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "discarded existing output");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
