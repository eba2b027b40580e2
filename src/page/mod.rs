//! page — представление страницы данных и кодек заголовка записи.
//!
//! Каждая страница, кроме нулевой, начинается с 8-байтового заголовка:
//! [first u16][next u48] (LE). `first` — оффсет первого заголовка записи
//! на странице (0, если страница несёт только continuation-данные; на
//! последней странице многостраничной записи — O_DATA + длина хвостового
//! фрагмента, т.е. место, где начнётся следующая запись). `next` —
//! следующая страница той же категории (0 — конец цепочки).

pub mod header;

use crate::block::BlockIo;
use crate::consts::{OFF_FIRST, OFF_NEXT};

#[inline]
pub fn get_first(io: &BlockIo) -> u16 {
    io.read_u16(OFF_FIRST)
}

#[inline]
pub fn set_first(io: &mut BlockIo, v: u16) {
    io.write_u16(OFF_FIRST, v);
}

#[inline]
pub fn get_next_link(io: &BlockIo) -> u64 {
    io.read_u48(OFF_NEXT)
}

#[inline]
pub fn set_next_link(io: &mut BlockIo, pid: u64) {
    io.write_u48(OFF_NEXT, pid);
}
