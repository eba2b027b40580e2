//! free — пул освобождённых слотов записей (FreePhysRowIdManager).
//!
//! В памяти — упорядоченное множество (available_size, recid): best-fit
//! c детерминированным разрешением ничьих (меньший recid). Загружается
//! лениво из персистентной цепочки страниц категории FREEPHYS.
//!
//! Формат страницы free-листа (после 8-байтового заголовка страницы, LE):
//! - [count u16]
//! - count × ([recid u64][avail u32])
//!
//! Формат стабилен; для остальных слоёв содержимое непрозрачно.
//!
//! commit() переписывает цепочку из индекса: переиспользует существующие
//! страницы, выделяет недостающие, лишние возвращает в пул страниц.
//! Индекс при этом остаётся в памяти; rollback() его сбрасывает, и
//! следующий вызов перечитает закоммиченное состояние.

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;

use crate::block::BlockFile;
use crate::consts::{CAT_FREEPHYS, NO_PAGE, O_DATA};
use crate::page;
use crate::page::header::{rounding_gap, MAX_SIZE_SPACE};
use crate::pageman::PageManager;

const ENTRY_SIZE: usize = 12; // recid u64 + avail u32

pub struct FreePhysRowIdManager {
    index: Option<BTreeSet<(u32, u64)>>,
    dirty: bool,
}

impl FreePhysRowIdManager {
    pub fn new() -> Self {
        Self {
            index: None,
            dirty: false,
        }
    }

    #[inline]
    fn entries_per_page(block_size: usize) -> usize {
        (block_size - O_DATA - 2) / ENTRY_SIZE
    }

    fn ensure_loaded(&mut self, file: &mut BlockFile, pageman: &PageManager) -> Result<()> {
        if self.index.is_some() {
            return Ok(());
        }
        let mut set = BTreeSet::new();
        let cap = Self::entries_per_page(file.block_size());
        let mut pid = pageman.get_first(CAT_FREEPHYS);
        while pid != NO_PAGE {
            let io = file.get(pid)?;
            let count = io.read_u16(O_DATA) as usize;
            if count > cap {
                file.release(io);
                return Err(anyhow!(
                    "free-list page {} unreadable: count {} exceeds capacity {}",
                    pid,
                    count,
                    cap
                ));
            }
            for i in 0..count {
                let off = O_DATA + 2 + i * ENTRY_SIZE;
                let recid = io.read_u64(off);
                let avail = io.read_u32(off + 8);
                set.insert((avail, recid));
            }
            let next = page::get_next_link(&io);
            file.release(io);
            pid = next;
        }
        self.index = Some(set);
        Ok(())
    }

    /// Число слотов в пуле.
    pub fn count(&mut self, file: &mut BlockFile, pageman: &PageManager) -> Result<usize> {
        self.ensure_loaded(file, pageman)?;
        Ok(self.index.as_ref().map(|s| s.len()).unwrap_or(0))
    }

    /// Выдать слот ёмкостью >= requested, либо 0.
    ///
    /// requested — округлённый размер (образ round_available_size).
    /// Верхняя граница подбора учитывает зазор округления: current_size
    /// будет записан по фактической длине, и available - current обязан
    /// остаться представимым (<= MAX_SIZE_SPACE).
    pub fn get(
        &mut self,
        file: &mut BlockFile,
        pageman: &PageManager,
        requested: u32,
    ) -> Result<u64> {
        if requested == 0 {
            return Err(anyhow!("free slot request of zero size"));
        }
        self.ensure_loaded(file, pageman)?;
        let set = self.index.as_mut().expect("loaded");

        let budget = MAX_SIZE_SPACE - rounding_gap(requested);
        let lo = (requested, 0u64);
        let hi = (requested.saturating_add(budget), u64::MAX);
        let found = set.range(lo..=hi).next().copied();
        if let Some(entry) = found {
            set.remove(&entry);
            self.dirty = true;
            crate::metrics::record_slot_reused();
            return Ok(entry.1);
        }
        Ok(0)
    }

    /// Зарегистрировать освобождённый слот. Двойное освобождение —
    /// ответственность вызывающего.
    pub fn put(
        &mut self,
        file: &mut BlockFile,
        pageman: &PageManager,
        recid: u64,
        avail: u32,
    ) -> Result<()> {
        if recid == 0 {
            return Err(anyhow!("free of null recid"));
        }
        self.ensure_loaded(file, pageman)?;
        self.index.as_mut().expect("loaded").insert((avail, recid));
        self.dirty = true;
        Ok(())
    }

    /// Переписать персистентную цепочку из индекса.
    pub fn commit(&mut self, file: &mut BlockFile, pageman: &mut PageManager) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let set = match self.index.as_ref() {
            Some(s) => s,
            None => return Ok(()),
        };

        let cap = Self::entries_per_page(file.block_size());
        let entries: Vec<(u32, u64)> = set.iter().copied().collect();

        // существующая цепочка
        let mut chain = Vec::new();
        let mut pid = pageman.get_first(CAT_FREEPHYS);
        while pid != NO_PAGE {
            chain.push(pid);
            pid = pageman.get_next(file, pid)?;
        }

        let pages_needed = entries.len().div_ceil(cap);
        while chain.len() < pages_needed {
            chain.push(pageman.allocate(file, CAT_FREEPHYS)?);
        }
        // лишние страницы — обратно в пул (с хвоста, чтобы не рвать цепочку)
        while chain.len() > pages_needed {
            let surplus = chain.pop().expect("chain tail");
            pageman
                .free(file, CAT_FREEPHYS, surplus)
                .with_context(|| format!("return surplus free-list page {}", surplus))?;
        }

        for (page_no, chunk) in entries.chunks(cap.max(1)).enumerate() {
            let mut io = file.get(chain[page_no])?;
            io.write_u16(O_DATA, chunk.len() as u16);
            for (i, (avail, recid)) in chunk.iter().enumerate() {
                let off = O_DATA + 2 + i * ENTRY_SIZE;
                io.write_u64(off, *recid);
                io.write_u32(off + 8, *avail);
            }
            file.release(io);
        }

        self.dirty = false;
        Ok(())
    }

    /// Принудительно переписать цепочку плотно (для defrag), даже если
    /// индекс не менялся.
    pub fn compact(&mut self, file: &mut BlockFile, pageman: &mut PageManager) -> Result<()> {
        self.ensure_loaded(file, pageman)?;
        self.dirty = true;
        self.commit(file, pageman)
    }

    /// Сбросить индекс: следующий вызов перечитает закоммиченную цепочку.
    pub fn rollback(&mut self) {
        self.index = None;
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn unique_path(prefix: &str) -> PathBuf {
        let pid = std::process::id();
        let t = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("qls-{}-{}-{}", prefix, pid, t))
    }

    fn fresh(path: &PathBuf) -> Result<(BlockFile, PageManager)> {
        let mut file = BlockFile::open(path, 1024)?;
        let pm = PageManager::create(&mut file)?;
        Ok((file, pm))
    }

    #[test]
    fn best_fit_lowest_recid() -> Result<()> {
        let path = unique_path("free-fit");
        let (mut file, mut pm) = fresh(&path)?;
        let mut fr = FreePhysRowIdManager::new();

        fr.put(&mut file, &pm, 0x3_0008, 256)?;
        fr.put(&mut file, &pm, 0x1_0008, 128)?;
        fr.put(&mut file, &pm, 0x2_0008, 128)?;

        // точный класс: наименьший recid
        assert_eq!(fr.get(&mut file, &pm, 128)?, 0x1_0008);
        // следующий из того же класса
        assert_eq!(fr.get(&mut file, &pm, 128)?, 0x2_0008);
        // best-fit из оставшихся
        assert_eq!(fr.get(&mut file, &pm, 130)?, 0x3_0008);
        // пусто
        assert_eq!(fr.get(&mut file, &pm, 128)?, 0);

        let _ = pm.commit(&mut file);
        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    #[test]
    fn oversized_slot_not_returned() -> Result<()> {
        let path = unique_path("free-max");
        let (mut file, pm) = fresh(&path)?;
        let mut fr = FreePhysRowIdManager::new();

        // зазор больше бюджета дельты — слот не подходит
        fr.put(&mut file, &pm, 0x5_0008, 200 + MAX_SIZE_SPACE + 1)?;
        assert_eq!(fr.get(&mut file, &pm, 200)?, 0);
        // а точно подходящий — подходит
        fr.put(&mut file, &pm, 0x6_0008, 200)?;
        assert_eq!(fr.get(&mut file, &pm, 200)?, 0x6_0008);
        Ok(())
    }

    #[test]
    fn commit_persists_chain() -> Result<()> {
        let path = unique_path("free-commit");
        let (mut file, mut pm) = fresh(&path)?;
        let mut fr = FreePhysRowIdManager::new();

        for i in 1..=100u64 {
            fr.put(&mut file, &pm, (i << 16) | 8, 128 + i as u32)?;
        }
        fr.commit(&mut file, &mut pm)?;
        pm.commit(&mut file)?;
        file.commit()?;

        // свежий менеджер перечитывает цепочку
        let mut fr2 = FreePhysRowIdManager::new();
        assert_eq!(fr2.count(&mut file, &pm)?, 100);
        assert_eq!(fr2.get(&mut file, &pm, 129)?, (1 << 16) | 8);

        // rollback сбрасывает индекс к закоммиченному состоянию
        fr2.rollback();
        assert_eq!(fr2.count(&mut file, &pm)?, 100);

        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    #[test]
    fn shrink_returns_pages() -> Result<()> {
        let path = unique_path("free-shrink");
        let (mut file, mut pm) = fresh(&path)?;
        let mut fr = FreePhysRowIdManager::new();

        // 1024-байтовая страница вмещает (1024-8-2)/12 = 84 слота
        for i in 1..=200u64 {
            fr.put(&mut file, &pm, (i << 16) | 8, 256)?;
        }
        fr.commit(&mut file, &mut pm)?;
        let mut chain_len = 0;
        let mut pid = pm.get_first(CAT_FREEPHYS);
        while pid != NO_PAGE {
            chain_len += 1;
            pid = pm.get_next(&mut file, pid)?;
        }
        assert_eq!(chain_len, 3);

        // опустошаем пул — страницы уходят в пул переиспользования
        while fr.get(&mut file, &pm, 256)? != 0 {}
        fr.commit(&mut file, &mut pm)?;
        assert_eq!(pm.get_first(CAT_FREEPHYS), NO_PAGE);
        assert_ne!(pm.get_first(crate::consts::CAT_FREE), NO_PAGE);

        let _ = std::fs::remove_file(&path);
        Ok(())
    }
}
