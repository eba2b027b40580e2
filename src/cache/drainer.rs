//! cache/drainer — фоновая уборка reference-кэша.
//!
//! Поток держит только Weak-хэндл на карту ссылок, поэтому кэш может
//! быть освобождён, пока уборщик спит. Каждые ~10 секунд (либо по
//! сигналу остановки) уборщик просыпается: сигнал или закрытый канал —
//! чистый выход; таймаут — проверить, жива ли карта, и вычистить из неё
//! записи, чьи значения уже никто не держит.

use log::warn;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Mutex, Weak as ArcWeak};
use std::time::Duration;

use crate::ser::CacheValue;

pub(super) type RefMap = HashMap<u64, std::sync::Weak<dyn CacheValue>>;

/// Период пробуждения уборщика.
const DRAIN_TICK: Duration = Duration::from_secs(10);

pub(super) fn run(map: ArcWeak<Mutex<RefMap>>, stop_rx: Receiver<()>) {
    loop {
        match stop_rx.recv_timeout(DRAIN_TICK) {
            // явный сигнал остановки либо кэш уничтожен вместе с каналом
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {
                let strong = match map.upgrade() {
                    Some(m) => m,
                    // кэш освобождён — выходим
                    None => return,
                };
                match strong.lock() {
                    Ok(mut guard) => {
                        guard.retain(|_, w| w.strong_count() > 0);
                    }
                    Err(e) => {
                        // уборщик обязан пережить любую ошибку, кроме остановки
                        warn!("reference cache drainer: map lock failed: {}", e);
                    }
                };
            }
        }
    }
}
