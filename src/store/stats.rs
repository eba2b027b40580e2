//! store/stats — статистика стора и defrag.

use anyhow::Result;
use std::fmt::Write as _;

use crate::consts::{CAT_FREE, CAT_FREEPHYS, CAT_USED, NO_PAGE, O_DATA};
use crate::page;
use crate::page::header::{self, RECORD_HEADER_SIZE};

use super::Store;

impl Store {
    /// Человекочитаемая сводка: страницы по категориям, записи, пул
    /// свободных слотов.
    pub fn calculate_statistics(&mut self) -> Result<String> {
        self.check_open()?;

        let mut pages_used = 0u64;
        let mut pages_free = 0u64;
        let mut pages_freephys = 0u64;
        for (cat, counter) in [
            (CAT_USED, &mut pages_used),
            (CAT_FREE, &mut pages_free),
            (CAT_FREEPHYS, &mut pages_freephys),
        ] {
            let mut pid = self.pageman.get_first(cat);
            while pid != NO_PAGE {
                *counter += 1;
                pid = self.pageman.get_next(&mut self.file, pid)?;
            }
        }

        let block_size = self.file.block_size() as u32;
        let rh = RECORD_HEADER_SIZE as u32;
        let mut live_records = 0u64;
        let mut live_bytes = 0u64;
        let mut freed_slots_on_pages = 0u64;
        let mut pid = self.pageman.get_first(CAT_USED);
        while pid != NO_PAGE {
            let io = self.file.get(pid)?;
            let first = page::get_first(&io) as u32;
            if first != 0 {
                let mut pos = first;
                while pos + rh <= block_size {
                    let avail = header::get_available_size(&io, pos as u16)?;
                    if avail == 0 {
                        break;
                    }
                    let current = header::get_current_size(&io, pos as u16)?;
                    if current > 0 {
                        live_records += 1;
                        live_bytes += current as u64;
                    } else {
                        freed_slots_on_pages += 1;
                    }
                    pos += avail + rh;
                }
            }
            let next = page::get_next_link(&io);
            self.file.release(io);
            pid = next;
        }

        let free_pool = self.freeman.count(&mut self.file, &self.pageman)? as u64;

        let mut s = String::new();
        let _ = writeln!(s, "store: {}", self.path.display());
        let _ = writeln!(s, "block_size: {}", block_size);
        let _ = writeln!(s, "pages_total: {}", self.pageman.limit() - 1);
        let _ = writeln!(
            s,
            "pages: used={} free_pool={} free_list={}",
            pages_used, pages_free, pages_freephys
        );
        let _ = writeln!(
            s,
            "records: live={} live_bytes={} freed_slots={}",
            live_records, live_bytes, freed_slots_on_pages
        );
        let _ = writeln!(s, "free_slot_pool: {}", free_pool);
        Ok(s)
    }

    /// Зафиксировать состояние и плотно переписать цепочку free-листа.
    /// Перемещение записей невозможно без слоя трансляции логических id,
    /// поэтому страницы данных не трогаем.
    pub fn defrag(&mut self) -> Result<()> {
        self.check_open()?;
        self.commit()?;
        self.freeman.compact(&mut self.file, &mut self.pageman)?;
        self.pageman.commit(&mut self.file)?;
        self.file.commit()
    }
}
