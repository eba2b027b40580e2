//! block — низкоуровневый слой ввода/вывода страниц одного файла.
//!
//! Модель:
//! - get(pid) выдаёт `BlockIo` — копию образа страницы с флагом dirty.
//!   Источник: буфер незакоммиченных записей -> clean-кэш -> диск
//!   (страницы за EOF читаются нулями).
//! - release(io) возвращает образ: грязный — в буфер транзакции,
//!   чистый — в ограниченный clean-кэш (FIFO).
//! - commit() пишет буфер на диск (offset = pid * block_size) и fsync'ает.
//! - rollback() просто выбрасывает буфер: на диске остались только
//!   закоммиченные образы.
//!
//! Вызовы должны выполняться под внешней синхронизацией (single writer).
//! Пока хэндл страницы не возвращён release(), повторный get() той же
//! страницы выдаст устаревшую копию — код верхних слоёв обязан
//! возвращать хэндл до обращения к той же странице по другому пути.

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::consts::{CLEAN_CACHE_PAGES, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

/// Проверка размера страницы: степень двойки в [1024 .. 32768].
pub fn validate_block_size(block_size: u32) -> Result<()> {
    if block_size < MIN_BLOCK_SIZE
        || block_size > MAX_BLOCK_SIZE
        || (block_size & (block_size - 1)) != 0
    {
        return Err(anyhow!(
            "block_size must be a power of two in [{} .. {}], got {}",
            MIN_BLOCK_SIZE,
            MAX_BLOCK_SIZE,
            block_size
        ));
    }
    Ok(())
}

/// Хэндл страницы: копия образа + накопленный флаг dirty.
/// Типизированные записи выставляют dirty автоматически.
pub struct BlockIo {
    pid: u64,
    data: Vec<u8>,
    dirty: bool,
}

impl BlockIo {
    pub(crate) fn new(pid: u64, data: Vec<u8>) -> Self {
        Self {
            pid,
            data,
            dirty: false,
        }
    }

    #[inline]
    pub fn pid(&self) -> u64 {
        self.pid
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    #[inline]
    pub fn read_u16(&self, off: usize) -> u16 {
        LittleEndian::read_u16(&self.data[off..off + 2])
    }

    #[inline]
    pub fn write_u16(&mut self, off: usize, v: u16) {
        LittleEndian::write_u16(&mut self.data[off..off + 2], v);
        self.dirty = true;
    }

    #[inline]
    pub fn read_u32(&self, off: usize) -> u32 {
        LittleEndian::read_u32(&self.data[off..off + 4])
    }

    #[inline]
    pub fn write_u32(&mut self, off: usize, v: u32) {
        LittleEndian::write_u32(&mut self.data[off..off + 4], v);
        self.dirty = true;
    }

    #[inline]
    pub fn read_u48(&self, off: usize) -> u64 {
        LittleEndian::read_u48(&self.data[off..off + 6])
    }

    #[inline]
    pub fn write_u48(&mut self, off: usize, v: u64) {
        LittleEndian::write_u48(&mut self.data[off..off + 6], v);
        self.dirty = true;
    }

    #[inline]
    pub fn read_u64(&self, off: usize) -> u64 {
        LittleEndian::read_u64(&self.data[off..off + 8])
    }

    #[inline]
    pub fn write_u64(&mut self, off: usize, v: u64) {
        LittleEndian::write_u64(&mut self.data[off..off + 8], v);
        self.dirty = true;
    }

    #[inline]
    pub fn bytes(&self, off: usize, len: usize) -> &[u8] {
        &self.data[off..off + len]
    }

    #[inline]
    pub fn write_bytes(&mut self, off: usize, src: &[u8]) {
        self.data[off..off + src.len()].copy_from_slice(src);
        self.dirty = true;
    }

    /// Обнулить весь образ (переиспользование страницы из пула).
    pub fn zero(&mut self) {
        self.data.fill(0);
        self.dirty = true;
    }

    pub(crate) fn into_parts(self) -> (u64, Vec<u8>, bool) {
        (self.pid, self.data, self.dirty)
    }
}

pub struct BlockFile {
    path: PathBuf,
    file: File,
    block_size: usize,
    data_fsync: bool,

    // Незакоммиченные образы страниц (граница транзакции).
    pending: HashMap<u64, Vec<u8>>,

    // Ограниченный кэш закоммиченных образов.
    clean: HashMap<u64, Vec<u8>>,
    clean_order: VecDeque<u64>,
}

impl BlockFile {
    /// Открыть (или создать) файл стора.
    pub fn open(path: &Path, block_size: u32) -> Result<Self> {
        validate_block_size(block_size)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open store file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            block_size: block_size as usize,
            data_fsync: true,
            pending: HashMap::new(),
            clean: HashMap::new(),
            clean_order: VecDeque::new(),
        })
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Управление fsync при commit().
    pub fn set_data_fsync(&mut self, on: bool) {
        self.data_fsync = on;
    }

    /// Число грязных страниц, ожидающих commit().
    #[inline]
    pub fn dirty_count(&self) -> usize {
        self.pending.len()
    }

    /// Достать страницу. Копия берётся из pending/clean-кэша, иначе с
    /// диска; страницы за концом файла читаются нулями.
    pub fn get(&mut self, pid: u64) -> Result<BlockIo> {
        if let Some(d) = self.pending.get(&pid) {
            return Ok(BlockIo::new(pid, d.clone()));
        }
        if let Some(d) = self.clean.get(&pid) {
            return Ok(BlockIo::new(pid, d.clone()));
        }

        let mut buf = vec![0u8; self.block_size];
        let off = pid
            .checked_mul(self.block_size as u64)
            .ok_or_else(|| anyhow!("page offset overflow (pid={})", pid))?;
        let file_len = self.file.metadata()?.len();
        if off < file_len {
            self.file.seek(SeekFrom::Start(off))?;
            let avail = ((file_len - off) as usize).min(self.block_size);
            self.file
                .read_exact(&mut buf[..avail])
                .with_context(|| format!("read page {} of {}", pid, self.path.display()))?;
        }
        Ok(BlockIo::new(pid, buf))
    }

    /// Вернуть хэндл. Грязный образ попадает в буфер транзакции,
    /// чистый освежает clean-кэш.
    pub fn release(&mut self, io: BlockIo) {
        let (pid, data, dirty) = io.into_parts();
        if dirty {
            self.clean.remove(&pid);
            self.pending.insert(pid, data);
        } else if !self.pending.contains_key(&pid) {
            self.clean_put(pid, data);
        }
    }

    /// Записать все грязные страницы и fsync'нуть файл.
    pub fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut pids: Vec<u64> = self.pending.keys().copied().collect();
        pids.sort_unstable();
        for pid in pids {
            let data = self.pending.remove(&pid).expect("pending page");
            let off = pid * self.block_size as u64;
            self.file.seek(SeekFrom::Start(off))?;
            self.file
                .write_all(&data)
                .with_context(|| format!("write page {} of {}", pid, self.path.display()))?;
            self.clean_put(pid, data);
        }
        if self.data_fsync {
            self.file
                .sync_all()
                .with_context(|| format!("fsync {}", self.path.display()))?;
        }
        Ok(())
    }

    /// Отбросить незакоммиченные страницы.
    pub fn rollback(&mut self) {
        self.pending.clear();
    }

    fn clean_put(&mut self, pid: u64, data: Vec<u8>) {
        if self.clean.insert(pid, data).is_none() {
            self.clean_order.push_back(pid);
        }
        while self.clean.len() > CLEAN_CACHE_PAGES {
            match self.clean_order.pop_front() {
                Some(old) => {
                    self.clean.remove(&old);
                }
                None => break,
            }
        }
    }
}
