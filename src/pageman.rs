//! pageman — менеджер страниц поверх BlockFile.
//!
//! Страница 0 — заголовок файла (LE):
//! - [magic 8 = "Q1RSTORE"]
//! - [version u32 = 1]
//! - [block_size u32]
//! - [limit u64]      — номер следующей свежей страницы (старт 1)
//! - [root_recid u64] — запись-карта именованных объектов (0 — нет)
//! - по категориям (FREE, USED, FREEPHYS): [head u48][last u48]
//!
//! Заголовок кэшируется в памяти; commit() пишет его через BlockFile,
//! reload() перечитывает после отката нижнего слоя.
//!
//! Категории — односвязные цепочки через поле `next` заголовка страницы.
//! allocate(cat) берёт страницу из пула FREE (LIFO через голову) либо
//! свежую (limit++), зануляет её и подцепляет в хвост цепочки категории.

use anyhow::{anyhow, Result};

use crate::block::{BlockFile, BlockIo};
use crate::consts::{
    CAT_FREE, CATEGORY_COUNT, NO_PAGE, STORE_MAGIC, STORE_VERSION,
};
use crate::page;

// Смещения полей страницы 0.
const HDR_OFF_MAGIC: usize = 0;
const HDR_OFF_VERSION: usize = 8;
const HDR_OFF_BLOCK_SIZE: usize = 12;
const HDR_OFF_LIMIT: usize = 16;
const HDR_OFF_ROOT: usize = 24;
const HDR_OFF_LISTS: usize = 32;
const HDR_LIST_ENTRY: usize = 12; // head u48 + last u48

/// Прочитать block_size из заголовка существующего файла (до открытия
/// BlockFile размер страницы ещё неизвестен).
pub fn probe_block_size(path: &std::path::Path) -> Result<u32> {
    use byteorder::{ByteOrder, LittleEndian};
    use std::io::Read;

    let mut f = std::fs::File::open(path)
        .map_err(|e| anyhow!("open store file {}: {}", path.display(), e))?;
    let mut buf = [0u8; 16];
    f.read_exact(&mut buf)
        .map_err(|_| anyhow!("store file too short: {}", path.display()))?;
    if &buf[HDR_OFF_MAGIC..HDR_OFF_MAGIC + 8] != STORE_MAGIC {
        return Err(anyhow!("bad store magic in {}", path.display()));
    }
    let version = LittleEndian::read_u32(&buf[HDR_OFF_VERSION..HDR_OFF_VERSION + 4]);
    if version != STORE_VERSION {
        return Err(anyhow!(
            "unsupported store version {} in {}",
            version,
            path.display()
        ));
    }
    Ok(LittleEndian::read_u32(
        &buf[HDR_OFF_BLOCK_SIZE..HDR_OFF_BLOCK_SIZE + 4],
    ))
}

#[derive(Debug, Clone, Copy, Default)]
struct CategoryList {
    head: u64,
    last: u64,
}

pub struct PageManager {
    limit: u64,
    root_recid: u64,
    lists: [CategoryList; CATEGORY_COUNT],
    hdr_dirty: bool,
}

impl PageManager {
    /// Создать заголовок нового стора (страница 0, limit = 1).
    pub fn create(file: &mut BlockFile) -> Result<Self> {
        let pm = Self {
            limit: 1,
            root_recid: 0,
            lists: [CategoryList::default(); CATEGORY_COUNT],
            hdr_dirty: true,
        };
        let mut io = file.get(0)?;
        pm.write_header(&mut io)?;
        file.release(io);
        Ok(pm)
    }

    /// Открыть существующий стор: прочитать и проверить страницу 0.
    pub fn open(file: &mut BlockFile) -> Result<Self> {
        let io = file.get(0)?;
        let got_magic = io.bytes(HDR_OFF_MAGIC, 8);
        if got_magic != STORE_MAGIC {
            file.release(io);
            return Err(anyhow!("bad store magic"));
        }
        let version = io.read_u32(HDR_OFF_VERSION);
        if version != STORE_VERSION {
            file.release(io);
            return Err(anyhow!("unsupported store version {}", version));
        }
        let block_size = io.read_u32(HDR_OFF_BLOCK_SIZE);
        if block_size as usize != file.block_size() {
            file.release(io);
            return Err(anyhow!(
                "block_size mismatch: header {}, file opened with {}",
                block_size,
                file.block_size()
            ));
        }
        let limit = io.read_u64(HDR_OFF_LIMIT);
        if limit < 1 {
            file.release(io);
            return Err(anyhow!("corrupt store header: limit {}", limit));
        }
        let root_recid = io.read_u64(HDR_OFF_ROOT);
        let mut lists = [CategoryList::default(); CATEGORY_COUNT];
        for (i, l) in lists.iter_mut().enumerate() {
            let off = HDR_OFF_LISTS + i * HDR_LIST_ENTRY;
            l.head = io.read_u48(off);
            l.last = io.read_u48(off + 6);
        }
        file.release(io);
        Ok(Self {
            limit,
            root_recid,
            lists,
            hdr_dirty: false,
        })
    }

    fn write_header(&self, io: &mut BlockIo) -> Result<()> {
        io.write_bytes(HDR_OFF_MAGIC, STORE_MAGIC);
        io.write_u32(HDR_OFF_VERSION, STORE_VERSION);
        io.write_u32(HDR_OFF_BLOCK_SIZE, io.len() as u32);
        io.write_u64(HDR_OFF_LIMIT, self.limit);
        io.write_u64(HDR_OFF_ROOT, self.root_recid);
        for (i, l) in self.lists.iter().enumerate() {
            let off = HDR_OFF_LISTS + i * HDR_LIST_ENTRY;
            io.write_u48(off, l.head);
            io.write_u48(off + 6, l.last);
        }
        Ok(())
    }

    #[inline]
    fn list(&self, category: u16) -> &CategoryList {
        &self.lists[category as usize]
    }

    #[inline]
    fn list_mut(&mut self, category: u16) -> &mut CategoryList {
        self.hdr_dirty = true;
        &mut self.lists[category as usize]
    }

    /// Номер следующей свежей страницы (текущая логическая длина файла).
    #[inline]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    #[inline]
    pub fn root_recid(&self) -> u64 {
        self.root_recid
    }

    pub fn set_root_recid(&mut self, recid: u64) {
        self.root_recid = recid;
        self.hdr_dirty = true;
    }

    /// Первая страница цепочки категории (0 — цепочка пуста).
    #[inline]
    pub fn get_first(&self, category: u16) -> u64 {
        self.list(category).head
    }

    /// Хвост цепочки категории (0 — цепочка пуста).
    #[inline]
    pub fn get_last(&self, category: u16) -> u64 {
        self.list(category).last
    }

    /// Следующая страница цепочки после pid (0 — конец).
    pub fn get_next(&self, file: &mut BlockFile, pid: u64) -> Result<u64> {
        if pid == NO_PAGE {
            return Err(anyhow!("get_next on null page"));
        }
        let io = file.get(pid)?;
        let next = page::get_next_link(&io);
        file.release(io);
        Ok(next)
    }

    /// Выделить страницу и подцепить её в хвост цепочки категории.
    /// Возвращает номер страницы; её заголовок обнулён (first=0, next=0).
    pub fn allocate(&mut self, file: &mut BlockFile, category: u16) -> Result<u64> {
        // 1) пул освобождённых страниц (LIFO через голову цепочки FREE)
        let recycled = self.list(CAT_FREE).head;
        let pid = if recycled != NO_PAGE {
            let io = file.get(recycled)?;
            let next_free = page::get_next_link(&io);
            file.release(io);
            let fl = self.list_mut(CAT_FREE);
            fl.head = next_free;
            if fl.last == recycled {
                fl.last = NO_PAGE;
            }
            recycled
        } else {
            let fresh = self.limit;
            self.limit += 1;
            self.hdr_dirty = true;
            fresh
        };

        // 2) обнулить страницу (переиспользованная несёт старые байты)
        let mut io = file.get(pid)?;
        io.zero();
        file.release(io);

        // 3) подцепить в хвост цепочки категории
        let last = self.list(category).last;
        if last != NO_PAGE {
            let mut prev = file.get(last)?;
            page::set_next_link(&mut prev, pid);
            file.release(prev);
        }
        let l = self.list_mut(category);
        if l.head == NO_PAGE {
            l.head = pid;
        }
        l.last = pid;

        crate::metrics::record_page_allocated();
        Ok(pid)
    }

    /// Исключить страницу из цепочки категории и вернуть её в пул FREE.
    /// Цепочки односвязные, поэтому ищем предшественника проходом от головы.
    pub fn free(&mut self, file: &mut BlockFile, category: u16, pid: u64) -> Result<()> {
        if pid == NO_PAGE {
            return Err(anyhow!("free of null page"));
        }

        let mut prev = NO_PAGE;
        let mut cur = self.list(category).head;
        while cur != NO_PAGE && cur != pid {
            prev = cur;
            cur = self.get_next(file, cur)?;
        }
        if cur == NO_PAGE {
            return Err(anyhow!(
                "page {} not found in category {} chain",
                pid,
                category
            ));
        }

        let next = self.get_next(file, pid)?;
        if prev == NO_PAGE {
            self.list_mut(category).head = next;
        } else {
            let mut p = file.get(prev)?;
            page::set_next_link(&mut p, next);
            file.release(p);
        }
        if self.list(category).last == pid {
            self.list_mut(category).last = prev;
        }

        // в пул FREE, в голову
        let mut io = file.get(pid)?;
        page::set_first(&mut io, 0);
        page::set_next_link(&mut io, self.list(CAT_FREE).head);
        file.release(io);
        let fl = self.list_mut(CAT_FREE);
        if fl.last == NO_PAGE {
            fl.last = pid;
        }
        fl.head = pid;
        Ok(())
    }

    /// Записать заголовок файла (если менялся) через BlockFile.
    pub fn commit(&mut self, file: &mut BlockFile) -> Result<()> {
        if !self.hdr_dirty {
            return Ok(());
        }
        let mut io = file.get(0)?;
        self.write_header(&mut io)?;
        file.release(io);
        self.hdr_dirty = false;
        Ok(())
    }

    /// Перечитать заголовок после rollback() нижнего слоя.
    pub fn reload(&mut self, file: &mut BlockFile) -> Result<()> {
        *self = Self::open(file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{CAT_FREEPHYS, CAT_USED};
    use std::path::PathBuf;

    fn unique_path(prefix: &str) -> PathBuf {
        let pid = std::process::id();
        let t = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("qls-{}-{}-{}", prefix, pid, t))
    }

    #[test]
    fn allocate_chains_and_reload() -> Result<()> {
        let path = unique_path("pageman");
        let mut file = BlockFile::open(&path, 1024)?;
        let mut pm = PageManager::create(&mut file)?;

        let a = pm.allocate(&mut file, CAT_USED)?;
        let b = pm.allocate(&mut file, CAT_USED)?;
        let c = pm.allocate(&mut file, CAT_FREEPHYS)?;
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(pm.get_first(CAT_USED), 1);
        assert_eq!(pm.get_last(CAT_USED), 2);
        assert_eq!(pm.get_next(&mut file, 1)?, 2);
        assert_eq!(pm.get_next(&mut file, 2)?, NO_PAGE);
        assert_eq!(pm.get_first(CAT_FREEPHYS), 3);

        pm.commit(&mut file)?;
        file.commit()?;

        let mut pm2 = PageManager::open(&mut file)?;
        assert_eq!(pm2.limit(), 4);
        assert_eq!(pm2.get_last(CAT_USED), 2);

        // free возвращает страницу в пул, allocate переиспользует её
        pm2.free(&mut file, CAT_FREEPHYS, 3)?;
        assert_eq!(pm2.get_first(CAT_FREEPHYS), NO_PAGE);
        assert_eq!(pm2.get_last(CAT_FREEPHYS), NO_PAGE);
        let d = pm2.allocate(&mut file, CAT_USED)?;
        assert_eq!(d, 3);
        assert_eq!(pm2.limit(), 4);
        assert_eq!(pm2.get_next(&mut file, 2)?, 3);

        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    #[test]
    fn rollback_discards_header_changes() -> Result<()> {
        let path = unique_path("pageman-rb");
        let mut file = BlockFile::open(&path, 1024)?;
        let mut pm = PageManager::create(&mut file)?;
        pm.commit(&mut file)?;
        file.commit()?;

        pm.allocate(&mut file, CAT_USED)?;
        pm.set_root_recid(77);
        file.rollback();
        pm.reload(&mut file)?;
        assert_eq!(pm.limit(), 1);
        assert_eq!(pm.root_recid(), 0);
        assert_eq!(pm.get_last(CAT_USED), NO_PAGE);

        let _ = std::fs::remove_file(&path);
        Ok(())
    }
}
