//! page/header — кодек заголовка записи.
//!
//! Заголовок (RECORD_HEADER_SIZE = 4 байта, LE) лежит по оффсету записи
//! на её origin-странице:
//! - [avail u16] — закодированный available_size (ёмкость слота);
//! - [delta u16] — available_size - current_size; 0xFFFF — запись
//!   освобождена (current_size == 0).
//!
//! Кодирование available_size (фиксировано, менять нельзя — формат):
//! - 0 кодируется нулём (пустой хвостовой заголовок);
//! - n <= 0x7FFF хранится как есть (байтовая точность — все внутристраничные
//!   остатки представимы точно);
//! - n > 0x7FFF хранится как 0x8000 | (n / 8192); n обязан быть кратен
//!   8192 — это гарантирует round_available_size. Максимум ~256 MiB.
//!
//! round_available_size: минимальный слот 128 байт, байтовая точность до
//! 0x7FFF, дальше классы по 8 KiB. Монотонна, идемпотентна, >= n.
//!
//! Инвариант available >= current обеспечивают вызывающие; кодек проверяет
//! лишь представимость значений и границы страницы.

use anyhow::{anyhow, Result};

use crate::block::BlockIo;

/// Размер заголовка записи в байтах.
pub const RECORD_HEADER_SIZE: u16 = 4;

const O_AVAIL: usize = 0;
const O_DELTA: usize = 2;

/// Сентинел «запись освобождена» в поле delta.
const FREE_DELTA: u16 = 0xFFFF;

/// Максимальный представимый живой зазор available - current.
/// Один код (0xFFFF) потрачен на сентинел освобождённой записи.
pub const MAX_SIZE_SPACE: u32 = 0xFFFF - 1;

/// Минимальный размер слота.
pub const MIN_SLOT_SIZE: u32 = 128;

/// Граница байтовой точности кодирования.
const RAW_SIZE_LIMIT: u32 = 0x7FFF;

/// Гранулярность классов для больших слотов.
const SIZE_CLASS_UNIT: u32 = 8192;

/// Максимальный размер записи: 0x7FFF классов по 8 KiB.
pub const MAX_RECORD_SIZE: u32 = RAW_SIZE_LIMIT * SIZE_CLASS_UNIT;

/// Округлить запрошенный размер до представимого размера слота.
pub fn round_available_size(n: u32) -> u32 {
    if n == 0 {
        return 0;
    }
    if n <= MIN_SLOT_SIZE {
        return MIN_SLOT_SIZE;
    }
    if n <= RAW_SIZE_LIMIT {
        return n;
    }
    // классы по 8 KiB
    n.div_ceil(SIZE_CLASS_UNIT) * SIZE_CLASS_UNIT
}

/// Наибольшая возможная разница между округлённым размером `r` (образом
/// round_available_size) и фактической длиной, которая в него округлилась.
/// Нужна free-листу: current_size пишется по фактической длине, и зазор
/// available - current обязан остаться представимым в u16-дельте.
pub(crate) fn rounding_gap(r: u32) -> u32 {
    if r <= MIN_SLOT_SIZE {
        MIN_SLOT_SIZE - 1
    } else if r <= RAW_SIZE_LIMIT {
        0
    } else {
        SIZE_CLASS_UNIT - 1
    }
}

fn encode_available(n: u32) -> Result<u16> {
    if n <= RAW_SIZE_LIMIT {
        return Ok(n as u16);
    }
    if n % SIZE_CLASS_UNIT != 0 || n > MAX_RECORD_SIZE {
        return Err(anyhow!("available_size {} is not encodable", n));
    }
    Ok(0x8000 | (n / SIZE_CLASS_UNIT) as u16)
}

#[inline]
fn decode_available(v: u16) -> u32 {
    if v & 0x8000 == 0 {
        v as u32
    } else {
        (v & 0x7FFF) as u32 * SIZE_CLASS_UNIT
    }
}

#[inline]
fn check_bounds(io: &BlockIo, off: u16) -> Result<()> {
    let end = off as usize + RECORD_HEADER_SIZE as usize;
    if off == 0 || end > io.len() {
        return Err(anyhow!(
            "record header out of page bounds (pid={}, off={})",
            io.pid(),
            off
        ));
    }
    Ok(())
}

pub fn get_available_size(io: &BlockIo, off: u16) -> Result<u32> {
    check_bounds(io, off)?;
    Ok(decode_available(io.read_u16(off as usize + O_AVAIL)))
}

pub fn set_available_size(io: &mut BlockIo, off: u16, n: u32) -> Result<()> {
    check_bounds(io, off)?;
    let enc = encode_available(n)?;
    io.write_u16(off as usize + O_AVAIL, enc);
    Ok(())
}

pub fn get_current_size(io: &BlockIo, off: u16) -> Result<u32> {
    check_bounds(io, off)?;
    let delta = io.read_u16(off as usize + O_DELTA);
    if delta == FREE_DELTA {
        return Ok(0);
    }
    let avail = decode_available(io.read_u16(off as usize + O_AVAIL));
    if delta as u32 > avail {
        return Err(anyhow!(
            "record header corrupt: delta {} > available {} (pid={}, off={})",
            delta,
            avail,
            io.pid(),
            off
        ));
    }
    Ok(avail - delta as u32)
}

pub fn set_current_size(io: &mut BlockIo, off: u16, n: u32) -> Result<()> {
    check_bounds(io, off)?;
    if n == 0 {
        io.write_u16(off as usize + O_DELTA, FREE_DELTA);
        return Ok(());
    }
    let avail = decode_available(io.read_u16(off as usize + O_AVAIL));
    if n > avail || avail - n > MAX_SIZE_SPACE {
        return Err(anyhow!(
            "current_size {} not representable for slot of {} (pid={}, off={})",
            n,
            avail,
            io.pid(),
            off
        ));
    }
    io.write_u16(off as usize + O_DELTA, (avail - n) as u16);
    Ok(())
}
