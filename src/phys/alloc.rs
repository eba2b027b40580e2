//! phys/alloc — выделение слотов: пул свободных, затем дозапись в хвост.
//!
//! alloc_new — аллокация «в хвост» с кэшем курсора (страница, оффсет
//! первого свободного байта). Кэш избавляет от сканирования записей
//! хвостовой страницы на каждом insert; сбрасывается rollback'ом.
//!
//! Рекурсивные перезапуски оригинального алгоритма (хвост целиком занят
//! continuation-данными; скан дошёл ровно до конца страницы) выражены
//! циклом с переприсвоением start.

use anyhow::{anyhow, Result};

use crate::block::BlockFile;
use crate::consts::{CAT_USED, NO_PAGE, O_DATA};
use crate::free::FreePhysRowIdManager;
use crate::location::to_recid;
use crate::page;
use crate::page::header::{self, round_available_size, RECORD_HEADER_SIZE};
use crate::pageman::PageManager;

use super::PhysicalRowIdManager;

/// Внутристраничный зазор, который выгоднее поглотить слотом, чем
/// оставить под заголовок следующей записи (16 байт — исторический порог,
/// менять нельзя: от него зависит раскладка существующих файлов).
const SLACK: u32 = 16;

impl PhysicalRowIdManager {
    /// Выделить слот ёмкостью >= size. Сначала пул свободных, затем
    /// дозапись в хвост цепочки данных.
    pub(super) fn alloc(
        &mut self,
        file: &mut BlockFile,
        pageman: &mut PageManager,
        freeman: &mut FreePhysRowIdManager,
        size: u32,
    ) -> Result<u64> {
        let size = round_available_size(size);
        let recid = freeman.get(file, pageman, size)?;
        if recid != 0 {
            return Ok(recid);
        }
        self.alloc_new(file, pageman, size, pageman.get_last(CAT_USED))
    }

    fn alloc_new(
        &mut self,
        file: &mut BlockFile,
        pageman: &mut PageManager,
        mut size: u32,
        mut start: u64,
    ) -> Result<u64> {
        let block_size = file.block_size() as u32;
        let data_per_page = block_size - O_DATA as u32;
        let rh = RECORD_HEADER_SIZE as u32;

        'restart: loop {
            let origin: u64;
            let hdr: u32;
            let mut io;

            if start == NO_PAGE || self.cursor == Some((start, block_size)) {
                // хвоста нет либо он заполнен впритык — новая страница
                let pid = pageman.allocate(file, CAT_USED)?;
                io = file.get(pid)?;
                page::set_first(&mut io, O_DATA as u16);
                header::set_available_size(&mut io, O_DATA as u16, 0)?;
                header::set_current_size(&mut io, O_DATA as u16, 0)?;
                self.cursor = Some((pid, O_DATA as u32));
                origin = pid;
                hdr = O_DATA as u32;
            } else {
                io = file.get(start)?;
                let first = page::get_first(&io) as u32;
                if first == 0 {
                    // хвостовая страница занята continuation-данными целиком
                    file.release(io);
                    start = NO_PAGE;
                    continue 'restart;
                }

                let mut pos;
                let mut hdr_off;
                match self.cursor {
                    Some((cp, coff)) if cp == start => {
                        pos = coff;
                        hdr_off = coff;
                    }
                    _ => {
                        // курсор не о той странице: идём по записям от first
                        pos = first;
                        hdr_off = first;
                        let mut avail = header::get_available_size(&io, hdr_off as u16)?;
                        while avail != 0 && pos < block_size {
                            pos += avail + rh;
                            if pos == block_size {
                                // страница ровно заполнена
                                file.release(io);
                                start = NO_PAGE;
                                continue 'restart;
                            }
                            hdr_off = pos;
                            avail = header::get_available_size(&io, hdr_off as u16)?;
                        }
                    }
                }

                if pos == rh {
                    // последняя запись ровно заполнила страницу
                    file.release(io);
                    start = NO_PAGE;
                    continue 'restart;
                }

                origin = start;
                hdr = hdr_off;
            }

            // есть позиция заголовка; дальше — хватает ли места на странице
            let free_here = block_size
                .checked_sub(hdr + rh)
                .ok_or_else(|| anyhow!("corrupt tail page {}: first free byte at {}", origin, hdr))?;

            let recid = to_recid(origin, hdr as u16);

            if free_here >= size {
                // слот помещается на странице; крошечный остаток поглощаем
                let mut slot = size;
                if free_here - slot <= SLACK + rh {
                    slot = free_here;
                }
                header::set_available_size(&mut io, hdr as u16, slot)?;
                file.release(io);
                self.cursor = Some((origin, hdr + rh + slot));
                return Ok(recid);
            }

            // запись переливается на continuation-страницы
            let mut needed_left = size - free_here;
            loop {
                let last_fragment = needed_left % data_per_page;
                if last_fragment == 0 || data_per_page - last_fragment >= rh + SLACK {
                    break;
                }
                // последняя страница осталась бы почти полной — доращиваем
                size += data_per_page - last_fragment;
                size = round_available_size(size);
                needed_left = size - free_here;
            }

            header::set_available_size(&mut io, hdr as u16, size)?;
            file.release(io);

            while needed_left >= data_per_page {
                let pid = pageman.allocate(file, CAT_USED)?;
                let mut cio = file.get(pid)?;
                page::set_first(&mut cio, 0); // только данные, без заголовков записей
                file.release(cio);
                needed_left -= data_per_page;
            }
            if needed_left > 0 {
                let pid = pageman.allocate(file, CAT_USED)?;
                let mut cio = file.get(pid)?;
                page::set_first(&mut cio, (O_DATA as u32 + needed_left) as u16);
                file.release(cio);
                self.cursor = Some((pid, O_DATA as u32 + needed_left));
            }
            return Ok(recid);
        }
    }
}
