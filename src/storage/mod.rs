//! Placement of verified pieces into the on-disk file layout.

use crate::error::{LeechError, Result};
use crate::torrent::{FileLayout, Metainfo};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

/// Writes completed pieces at their absolute offset, splitting a piece over
/// as many files as it spans.
pub struct FileAssembler {
    root: PathBuf,
    files: Vec<AssembledFile>,
    piece_length: u64,
    total_length: u64,
}

struct AssembledFile {
    path: PathBuf,
    /// Offset of the file's first byte within the torrent
    offset: u64,
    length: u64,
    handle: File,
}

impl FileAssembler {
    pub async fn new<P: AsRef<Path>>(download_dir: P, metainfo: &Metainfo) -> Result<Self> {
        Self::with_layout(download_dir, &metainfo.layout, metainfo.piece_length).await
    }

    /// Create every file of `layout` below `download_dir` at its final size.
    /// Existing files are opened without truncation so earlier content stays.
    pub async fn with_layout<P: AsRef<Path>>(
        download_dir: P,
        layout: &FileLayout,
        piece_length: u32,
    ) -> Result<Self> {
        let root = download_dir.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| LeechError::assembly(&root, e))?;

        let mut files = Vec::new();
        let mut offset = 0u64;

        for (relative, length) in layout.entries() {
            let path = root.join(relative);

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| LeechError::assembly(parent, e))?;
            }

            let handle = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
                .await
                .map_err(|e| LeechError::assembly(&path, e))?;

            let current = handle
                .metadata()
                .await
                .map_err(|e| LeechError::assembly(&path, e))?
                .len();
            if current != length {
                handle
                    .set_len(length)
                    .await
                    .map_err(|e| LeechError::assembly(&path, e))?;
            }

            files.push(AssembledFile {
                path,
                offset,
                length,
                handle,
            });
            offset += length;
        }

        info!(
            "Storage initialized: {} files, {} bytes total",
            files.len(),
            offset
        );

        Ok(Self {
            root,
            files,
            piece_length: piece_length as u64,
            total_length: offset,
        })
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Write a completed piece.
    pub async fn write(&mut self, index: u32, data: &[u8]) -> Result<()> {
        let mut offset = index as u64 * self.piece_length;
        let end = offset + data.len() as u64;

        if end > self.total_length {
            return Err(LeechError::assembly(
                &self.root,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "piece {} covers bytes {}..{} beyond the torrent's {} bytes",
                        index, offset, end, self.total_length
                    ),
                ),
            ));
        }

        debug!(
            "Writing piece {} at global offset {} ({} bytes)",
            index,
            offset,
            data.len()
        );

        let mut remaining = data;
        let mut position = self
            .files
            .partition_point(|file| file.offset + file.length <= offset);

        while !remaining.is_empty() {
            let Some(file) = self.files.get_mut(position) else {
                return Err(LeechError::assembly(
                    &self.root,
                    io::Error::new(io::ErrorKind::InvalidInput, "ran out of files"),
                ));
            };

            let within = offset - file.offset;
            let count = (file.length - within).min(remaining.len() as u64) as usize;

            if count > 0 {
                file.handle
                    .seek(SeekFrom::Start(within))
                    .await
                    .map_err(|e| LeechError::assembly(&file.path, e))?;
                file.handle
                    .write_all(&remaining[..count])
                    .await
                    .map_err(|e| LeechError::assembly(&file.path, e))?;

                debug!(
                    "Wrote {} bytes to {:?} at offset {}",
                    count, file.path, within
                );
            }

            remaining = &remaining[count..];
            offset += count as u64;
            position += 1;
        }

        Ok(())
    }

    /// Push every buffered write down to the files.
    pub async fn finish(&mut self) -> Result<()> {
        for file in &mut self.files {
            file.handle
                .flush()
                .await
                .map_err(|e| LeechError::assembly(&file.path, e))?;
            file.handle
                .sync_all()
                .await
                .map_err(|e| LeechError::assembly(&file.path, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::FileEntry;
    use tempfile::TempDir;

    fn multi(lengths: &[u64]) -> FileLayout {
        FileLayout::Multi {
            name: "set".to_string(),
            files: lengths
                .iter()
                .enumerate()
                .map(|(i, &length)| FileEntry {
                    path: vec![format!("f{}", i)],
                    length,
                })
                .collect(),
        }
    }

    fn read(dir: &TempDir, relative: &str) -> Vec<u8> {
        std::fs::read(dir.path().join(relative)).unwrap()
    }

    #[tokio::test]
    async fn test_files_are_preallocated() {
        let dir = TempDir::new().unwrap();
        let assembler = FileAssembler::with_layout(dir.path(), &multi(&[10, 0, 7]), 4)
            .await
            .unwrap();

        assert_eq!(assembler.total_length(), 17);
        assert_eq!(read(&dir, "set/f0"), vec![0u8; 10]);
        assert_eq!(read(&dir, "set/f1"), Vec::<u8>::new());
        assert_eq!(read(&dir, "set/f2"), vec![0u8; 7]);
    }

    #[tokio::test]
    async fn test_single_file_out_of_order() {
        let dir = TempDir::new().unwrap();
        let layout = FileLayout::Single {
            name: "data.bin".to_string(),
            length: 10,
        };
        let mut assembler = FileAssembler::with_layout(dir.path(), &layout, 4)
            .await
            .unwrap();

        assembler.write(2, &[8, 9]).await.unwrap();
        assembler.write(0, &[0, 1, 2, 3]).await.unwrap();
        assembler.write(1, &[4, 5, 6, 7]).await.unwrap();
        assembler.finish().await.unwrap();

        assert_eq!(read(&dir, "data.bin"), (0..10).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_piece_straddles_two_files() {
        let dir = TempDir::new().unwrap();
        let mut assembler = FileAssembler::with_layout(dir.path(), &multi(&[10, 8]), 6)
            .await
            .unwrap();

        let piece: Vec<u8> = (1..=12).collect();
        assembler.write(1, &piece).await.unwrap();
        assembler.finish().await.unwrap();

        let first = read(&dir, "set/f0");
        assert_eq!(&first[..6], &[0u8; 6]);
        assert_eq!(&first[6..], &[1, 2, 3, 4]);
        assert_eq!(read(&dir, "set/f1"), (5..=12).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_piece_spans_many_tiny_files() {
        let dir = TempDir::new().unwrap();
        let mut assembler = FileAssembler::with_layout(dir.path(), &multi(&[2, 1, 0, 3, 2]), 8)
            .await
            .unwrap();

        assembler.write(0, &[1, 2, 3, 4, 5, 6, 7, 8]).await.unwrap();
        assembler.finish().await.unwrap();

        assert_eq!(read(&dir, "set/f0"), vec![1, 2]);
        assert_eq!(read(&dir, "set/f1"), vec![3]);
        assert_eq!(read(&dir, "set/f3"), vec![4, 5, 6]);
        assert_eq!(read(&dir, "set/f4"), vec![7, 8]);
    }

    #[tokio::test]
    async fn test_write_past_end_is_assembly_error() {
        let dir = TempDir::new().unwrap();
        let mut assembler = FileAssembler::with_layout(dir.path(), &multi(&[10, 5]), 6)
            .await
            .unwrap();

        let err = assembler.write(1, &[0u8; 12]).await.unwrap_err();
        assert!(matches!(err, LeechError::Assembly { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_existing_content_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let layout = FileLayout::Single {
            name: "keep.bin".to_string(),
            length: 4,
        };

        {
            let mut assembler = FileAssembler::with_layout(dir.path(), &layout, 4)
                .await
                .unwrap();
            assembler.write(0, &[9, 9, 9, 9]).await.unwrap();
            assembler.finish().await.unwrap();
        }

        let _reopened = FileAssembler::with_layout(dir.path(), &layout, 4)
            .await
            .unwrap();
        assert_eq!(read(&dir, "keep.bin"), vec![9, 9, 9, 9]);
    }

    #[tokio::test]
    async fn test_unwritable_location_is_assembly_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let layout = FileLayout::Single {
            name: "x.bin".to_string(),
            length: 1,
        };
        let err = FileAssembler::with_layout(&blocker, &layout, 1)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LeechError::Assembly { .. }));
    }
}
