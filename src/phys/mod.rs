//! phys — менеджер физических записей (PhysicalRowIdManager).
//!
//! Запись = заголовок (4 байта) на origin-странице + слот ёмкостью
//! available_size, который может переливаться на continuation-страницы
//! той же цепочки CAT_USED (следующие по `next` от origin). Record id
//! записи стабилен; update может вернуть новый id, если запись переросла
//! свой слот.
//!
//! Правила:
//! - insert/update не принимают пустой payload (запись с current_size = 0
//!   считается освобождённой);
//! - update переезжает, если length > available либо
//!   available - length > MAX_SIZE_SPACE (зазор перестал бы помещаться в
//!   u16-дельту заголовка, а большой слот не должен вечно пустовать);
//! - каждый мутирующий путь возвращает страницы грязными;
//! - rollback сбрасывает только курсор аллокации — страницы откатывает
//!   нижний слой.

mod alloc;

use anyhow::{anyhow, Result};

use crate::block::BlockFile;
use crate::consts::NO_PAGE;
use crate::free::FreePhysRowIdManager;
use crate::location::{offset_of, page_of};
use crate::page::header::{
    self, MAX_RECORD_SIZE, MAX_SIZE_SPACE, RECORD_HEADER_SIZE,
};
use crate::pageman::PageManager;

pub struct PhysicalRowIdManager {
    // (страница, оффсет первого свободного байта на хвостовой странице);
    // оффсет может равняться block_size — страница заполнена впритык.
    cursor: Option<(u64, u32)>,
}

impl PhysicalRowIdManager {
    pub fn new() -> Self {
        Self { cursor: None }
    }

    /// Вставить новую запись. Возвращает её record id.
    pub fn insert(
        &mut self,
        file: &mut BlockFile,
        pageman: &mut PageManager,
        freeman: &mut FreePhysRowIdManager,
        data: &[u8],
    ) -> Result<u64> {
        if data.is_empty() {
            return Err(anyhow!("record payload must not be empty"));
        }
        if data.len() > MAX_RECORD_SIZE as usize {
            return Err(anyhow!(
                "record payload of {} bytes exceeds max record size {}",
                data.len(),
                MAX_RECORD_SIZE
            ));
        }
        let recid = self.alloc(file, pageman, freeman, data.len() as u32)?;
        self.write(file, pageman, recid, data)?;
        crate::metrics::record_inserted();
        Ok(recid)
    }

    /// Обновить запись. Возвращает (возможно новый) record id.
    pub fn update(
        &mut self,
        file: &mut BlockFile,
        pageman: &mut PageManager,
        freeman: &mut FreePhysRowIdManager,
        recid: u64,
        data: &[u8],
    ) -> Result<u64> {
        if recid == 0 {
            return Err(anyhow!("update of null recid"));
        }
        if data.is_empty() {
            return Err(anyhow!("record payload must not be empty"));
        }
        if data.len() > MAX_RECORD_SIZE as usize {
            return Err(anyhow!(
                "record payload of {} bytes exceeds max record size {}",
                data.len(),
                MAX_RECORD_SIZE
            ));
        }
        let len = data.len() as u32;

        let io = file.get(page_of(recid))?;
        let avail = header::get_available_size(&io, offset_of(recid))?;
        let current = header::get_current_size(&io, offset_of(recid))?;
        file.release(io);
        if current == 0 {
            return Err(anyhow!("update of freed record (recid={})", recid));
        }

        let recid = if len > avail || avail - len > MAX_SIZE_SPACE {
            // слот мал либо зазор слишком велик — переезд
            self.free(file, pageman, freeman, recid)?;
            self.alloc(file, pageman, freeman, len)?
        } else {
            recid
        };

        self.write(file, pageman, recid, data)?;
        crate::metrics::record_updated();
        Ok(recid)
    }

    /// Удалить запись: заголовок получает current_size = 0, слот уходит
    /// в пул свободных.
    pub fn delete(
        &mut self,
        file: &mut BlockFile,
        pageman: &mut PageManager,
        freeman: &mut FreePhysRowIdManager,
        recid: u64,
    ) -> Result<()> {
        if recid == 0 {
            return Err(anyhow!("delete of null recid"));
        }
        self.free(file, pageman, freeman, recid)?;
        crate::metrics::record_deleted();
        Ok(())
    }

    /// Дочитать запись в `out`. Освобождённая запись не добавляет ничего.
    pub fn fetch(
        &mut self,
        file: &mut BlockFile,
        pageman: &mut PageManager,
        out: &mut Vec<u8>,
        recid: u64,
    ) -> Result<()> {
        if recid == 0 {
            return Err(anyhow!("fetch of null recid"));
        }
        let block_size = file.block_size() as u32;
        let mut cur = page_of(recid);
        let head = offset_of(recid);

        let mut io = file.get(cur)?;
        let size = header::get_current_size(&io, head)?;
        if size == 0 {
            file.release(io);
            return Ok(());
        }
        out.reserve(size as usize);

        let mut left = size;
        let mut doff = head as u32 + RECORD_HEADER_SIZE as u32;
        loop {
            let to_copy = (block_size - doff).min(left);
            if to_copy > 0 {
                out.extend_from_slice(io.bytes(doff as usize, to_copy as usize));
                left -= to_copy;
            }
            file.release(io);
            if left == 0 {
                break;
            }
            cur = pageman.get_next(file, cur)?;
            if cur == NO_PAGE {
                return Err(anyhow!(
                    "record chain truncated while reading (recid={}, left={})",
                    recid,
                    left
                ));
            }
            io = file.get(cur)?;
            doff = crate::consts::O_DATA as u32;
        }
        crate::metrics::record_fetched();
        Ok(())
    }

    /// Сбросить кэш курсора: следующая аллокация заново просканирует хвост.
    pub fn rollback(&mut self) {
        self.cursor = None;
    }

    /// Зафиксировать состояние пула свободных слотов.
    pub fn commit(
        &mut self,
        file: &mut BlockFile,
        pageman: &mut PageManager,
        freeman: &mut FreePhysRowIdManager,
    ) -> Result<()> {
        freeman.commit(file, pageman)
    }

    /// Записать payload в слот recid. Размер слота должен быть уже
    /// согласован (этим занимаются insert/update через alloc).
    fn write(
        &mut self,
        file: &mut BlockFile,
        pageman: &mut PageManager,
        recid: u64,
        data: &[u8],
    ) -> Result<()> {
        let block_size = file.block_size() as u32;
        let mut cur = page_of(recid);
        let head = offset_of(recid);

        let mut io = file.get(cur)?;
        header::set_current_size(&mut io, head, data.len() as u32)?;
        if data.is_empty() {
            file.release(io);
            return Ok(());
        }

        let mut left = data.len();
        let mut src = 0usize;
        let mut doff = head as u32 + RECORD_HEADER_SIZE as u32;
        loop {
            let to_copy = ((block_size - doff) as usize).min(left);
            if to_copy > 0 {
                io.write_bytes(doff as usize, &data[src..src + to_copy]);
                src += to_copy;
                left -= to_copy;
            }
            file.release(io);
            if left == 0 {
                break;
            }
            cur = pageman.get_next(file, cur)?;
            if cur == NO_PAGE {
                return Err(anyhow!(
                    "record chain truncated while writing (recid={}, left={})",
                    recid,
                    left
                ));
            }
            io = file.get(cur)?;
            doff = crate::consts::O_DATA as u32;
        }
        Ok(())
    }

    /// Освободить слот: current_size = 0, (recid, available) — в пул.
    fn free(
        &mut self,
        file: &mut BlockFile,
        pageman: &mut PageManager,
        freeman: &mut FreePhysRowIdManager,
        recid: u64,
    ) -> Result<()> {
        let head = offset_of(recid);
        let mut io = file.get(page_of(recid))?;
        let avail = header::get_available_size(&io, head)?;
        let current = header::get_current_size(&io, head)?;
        if current == 0 {
            file.release(io);
            return Err(anyhow!("double free of record (recid={})", recid));
        }
        header::set_current_size(&mut io, head, 0)?;
        file.release(io);
        freeman.put(file, pageman, recid, avail)
    }
}
