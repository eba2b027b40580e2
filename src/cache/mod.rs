//! cache — write-back кэш записей поверх стора.
//!
//! Два уровня:
//! - Основной: ограниченный LRU (recid -> запись) с живым значением,
//!   сериализатором и флагом dirty. Список LRU — intrusive: prev/next
//!   хранятся в самих записях HashMap, head — LRU, tail — MRU.
//! - Reference-кэш (опционально): recid -> Weak-ссылка на чистое
//!   значение. В режиме Soft дополнительно удерживается ограниченное
//!   кольцо сильных клонов, чтобы значения переживали отпускание
//!   вызывающим кодом. Грязные значения в reference-кэш не попадают.
//!
//! Фоновый уборщик (cache/drainer.rs) вычищает из карты ссылок записи,
//! чьи значения собраны; карта защищена собственным Mutex, отдельным от
//! состояния LRU.
//!
//! Перед каждой мутацией кэш спрашивает у стора needs_auto_commit() и
//! при необходимости сначала выполняет commit().
//!
//! Замечание о переезде записей: нижний стор — физический, update может
//! вернуть новый recid. При write-back кэш перевешивает запись на новый
//! ключ; старый recid у вызывающего кода при этом устаревает (слой
//! трансляции логических id в этот стор не входит).

mod drainer;

use anyhow::{anyhow, Result};
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use crate::metrics::{
    record_cache_eviction, record_cache_hit, record_cache_miss, record_cache_writeback,
};
use crate::ser::{CacheValue, Serializer};
use crate::store::Store;

use drainer::RefMap;

/// Вид ссылок второго уровня.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefCacheKind {
    /// Только Weak-ссылки: значение живо, пока его держит кто-то ещё.
    Weak,
    /// Weak-ссылки плюс ограниченное кольцо сильных клонов.
    Soft,
}

struct CacheEntry {
    value: Arc<dyn CacheValue>,
    ser: Arc<dyn Serializer>,
    dirty: bool,
    prev: Option<u64>,
    next: Option<u64>,
}

struct RefCache {
    kind: RefCacheKind,
    map: Arc<Mutex<RefMap>>,
    // Soft: кольцо сильных клонов (FIFO, ограничено max_records).
    retained: VecDeque<Arc<dyn CacheValue>>,
    retained_cap: usize,
    stop_tx: Sender<()>,
    drainer: Option<JoinHandle<()>>,
}

impl RefCache {
    fn new(kind: RefCacheKind, retained_cap: usize) -> Self {
        let map: Arc<Mutex<RefMap>> = Arc::new(Mutex::new(HashMap::new()));
        let (stop_tx, stop_rx) = mpsc::channel();
        let weak_map: Weak<Mutex<RefMap>> = Arc::downgrade(&map);
        let drainer = std::thread::Builder::new()
            .name("quillstore-ref-drainer".to_string())
            .spawn(move || drainer::run(weak_map, stop_rx))
            .ok();
        Self {
            kind,
            map,
            retained: VecDeque::new(),
            retained_cap,
            stop_tx,
            drainer,
        }
    }

    fn lock_map(&self) -> Result<std::sync::MutexGuard<'_, RefMap>> {
        self.map
            .lock()
            .map_err(|_| anyhow!("reference cache lock poisoned"))
    }

    fn put(&mut self, recid: u64, value: &Arc<dyn CacheValue>) -> Result<()> {
        self.lock_map()?.insert(recid, Arc::downgrade(value));
        if self.kind == RefCacheKind::Soft {
            self.retained.push_back(Arc::clone(value));
            while self.retained.len() > self.retained_cap {
                self.retained.pop_front();
            }
        }
        Ok(())
    }

    fn get(&self, recid: u64) -> Result<Option<Arc<dyn CacheValue>>> {
        Ok(self.lock_map()?.get(&recid).and_then(|w| w.upgrade()))
    }

    fn remove(&mut self, recid: u64) -> Result<()> {
        self.lock_map()?.remove(&recid);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.lock_map()?.clear();
        self.retained.clear();
        Ok(())
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(h) = self.drainer.take() {
            let _ = h.join();
        }
    }
}

impl Drop for RefCache {
    fn drop(&mut self) {
        // канал закрывается вместе с Sender; спящий уборщик проснётся
        // по Disconnected и выйдет сам
        let _ = self.stop_tx.send(());
    }
}

pub struct RecordCache {
    lower: Option<Store>,
    max_records: usize,

    hash: HashMap<u64, CacheEntry>,
    first: Option<u64>, // LRU
    last: Option<u64>,  // MRU

    ref_cache: Option<RefCache>,
}

impl RecordCache {
    /// Кэш без reference-уровня.
    pub fn new(store: Store, max_records: usize) -> Result<Self> {
        Self::build(store, max_records, None)
    }

    /// Кэш со вторым, reference-уровнем указанного вида.
    pub fn with_reference_cache(
        store: Store,
        max_records: usize,
        kind: RefCacheKind,
    ) -> Result<Self> {
        Self::build(store, max_records, Some(kind))
    }

    fn build(store: Store, max_records: usize, kind: Option<RefCacheKind>) -> Result<Self> {
        if max_records == 0 {
            return Err(anyhow!("cache capacity must be at least 1 record"));
        }
        Ok(Self {
            lower: Some(store),
            max_records,
            hash: HashMap::with_capacity(max_records),
            first: None,
            last: None,
            ref_cache: kind.map(|k| RefCache::new(k, max_records)),
        })
    }

    #[inline]
    fn lower_mut(&mut self) -> Result<&mut Store> {
        self.lower
            .as_mut()
            .ok_or_else(|| anyhow!("record cache is closed"))
    }

    #[inline]
    fn check_open(&self) -> Result<()> {
        if self.lower.is_none() {
            return Err(anyhow!("record cache is closed"));
        }
        Ok(())
    }

    fn auto_commit_if_needed(&mut self) -> Result<()> {
        if self.lower_mut()?.needs_auto_commit() {
            self.commit()?;
        }
        Ok(())
    }

    // ----------------- операции -----------------

    /// Вставить объект. Возвращает record id.
    pub fn insert(
        &mut self,
        value: Arc<dyn CacheValue>,
        ser: Arc<dyn Serializer>,
    ) -> Result<u64> {
        self.check_open()?;
        self.auto_commit_if_needed()?;

        let recid = self.lower_mut()?.insert(&value, &ser)?;
        match self.ref_cache.as_mut() {
            Some(rc) => rc.put(recid, &value)?,
            None => self.cache_put(recid, value, ser, false)?,
        }
        Ok(recid)
    }

    /// Достать объект. None — запись освобождена.
    pub fn fetch(
        &mut self,
        recid: u64,
        ser: Arc<dyn Serializer>,
    ) -> Result<Option<Arc<dyn CacheValue>>> {
        self.check_open()?;

        if let Some(rc) = self.ref_cache.as_ref() {
            if let Some(v) = rc.get(recid)? {
                record_cache_hit();
                return Ok(Some(v));
            }
        }

        if self.hash.contains_key(&recid) {
            self.touch(recid);
            let v = Arc::clone(&self.hash.get(&recid).expect("present").value);
            record_cache_hit();
            return Ok(Some(v));
        }

        // полный промах — идём в стор
        let fetched = self.lower_mut()?.fetch(recid, &ser)?;
        let value = match fetched {
            Some(v) => v,
            None => return Ok(None),
        };
        record_cache_miss();
        match self.ref_cache.as_mut() {
            Some(rc) => rc.put(recid, &value)?,
            None => self.cache_put(recid, Arc::clone(&value), ser, false)?,
        }
        Ok(Some(value))
    }

    /// Достать объект мимо обоих уровней кэша.
    pub fn fetch_uncached(
        &mut self,
        recid: u64,
        ser: Arc<dyn Serializer>,
    ) -> Result<Option<Arc<dyn CacheValue>>> {
        self.check_open()?;
        self.lower_mut()?.fetch(recid, &ser)
    }

    /// Обновить объект в кэше (write-back: стор увидит значение при
    /// commit либо при вытеснении).
    pub fn update(
        &mut self,
        recid: u64,
        value: Arc<dyn CacheValue>,
        ser: Arc<dyn Serializer>,
    ) -> Result<()> {
        self.check_open()?;
        self.auto_commit_if_needed()?;

        // грязное значение не имеет права остаться во втором уровне
        if let Some(rc) = self.ref_cache.as_mut() {
            rc.remove(recid)?;
        }

        if let Some(e) = self.hash.get_mut(&recid) {
            e.value = value;
            e.ser = ser;
            e.dirty = true;
            self.touch(recid);
        } else {
            self.cache_put(recid, value, ser, true)?;
        }
        Ok(())
    }

    /// Удалить запись из стора и обоих уровней кэша.
    pub fn delete(&mut self, recid: u64) -> Result<()> {
        self.check_open()?;
        self.auto_commit_if_needed()?;

        self.lower_mut()?.delete(recid)?;
        if self.hash.contains_key(&recid) {
            self.remove_entry(recid);
            self.hash.remove(&recid);
        }
        if let Some(rc) = self.ref_cache.as_mut() {
            rc.remove(recid)?;
        }
        Ok(())
    }

    /// Прописать грязные записи в стор и зафиксировать его.
    pub fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        self.update_cache_entries()?;
        self.lower_mut()?.commit()
    }

    /// Откатить стор и сбросить оба уровня кэша: неизвестно, какие
    /// записи были частью транзакции.
    pub fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        self.lower_mut()?.rollback()?;

        self.hash.clear();
        self.first = None;
        self.last = None;
        if let Some(rc) = self.ref_cache.as_mut() {
            rc.clear()?;
        }
        Ok(())
    }

    /// Выгрузить кэш целиком (грязные записи прописываются в стор).
    pub fn clear_cache(&mut self) -> Result<()> {
        self.check_open()?;
        while !self.hash.is_empty() {
            self.purge_entry()?;
        }
        self.first = None;
        self.last = None;
        if let Some(rc) = self.ref_cache.as_mut() {
            rc.clear()?;
        }
        Ok(())
    }

    /// Закрыть кэш и стор. Повторный вызов — no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.lower.is_none() {
            return Ok(());
        }
        self.update_cache_entries()?;
        let mut store = self.lower.take().expect("open store");
        store.close()?;

        self.hash.clear();
        self.first = None;
        self.last = None;
        if let Some(mut rc) = self.ref_cache.take() {
            rc.clear()?;
            rc.shutdown();
        }
        Ok(())
    }

    // ----------------- делегаты -----------------

    pub fn get_named_object(&mut self, name: &str) -> Result<Option<u64>> {
        self.lower_mut()?.get_named_object(name)
    }

    pub fn set_named_object(&mut self, name: &str, recid: u64) -> Result<()> {
        self.lower_mut()?.set_named_object(name, recid)
    }

    pub fn default_serializer(&self) -> Result<Arc<dyn Serializer>> {
        self.check_open()?;
        Ok(self.lower.as_ref().expect("open store").default_serializer())
    }

    pub fn calculate_statistics(&mut self) -> Result<String> {
        self.lower_mut()?.calculate_statistics()
    }

    pub fn defrag(&mut self) -> Result<()> {
        self.commit()?;
        self.lower_mut()?.defrag()
    }

    // ----------------- интроспекция (диагностика и тесты) -----------------

    /// Число записей в основном кэше.
    pub fn cached_records(&self) -> usize {
        self.hash.len()
    }

    pub fn is_cached(&self, recid: u64) -> bool {
        self.hash.contains_key(&recid)
    }

    pub fn is_dirty(&self, recid: u64) -> Option<bool> {
        self.hash.get(&recid).map(|e| e.dirty)
    }

    /// Есть ли живое значение во втором уровне.
    pub fn is_reference_cached(&self, recid: u64) -> bool {
        match self.ref_cache.as_ref() {
            Some(rc) => rc.get(recid).ok().flatten().is_some(),
            None => false,
        }
    }

    // ----------------- внутренности LRU -----------------

    /// Прописать все грязные записи в стор.
    fn update_cache_entries(&mut self) -> Result<()> {
        let dirty: Vec<u64> = self
            .hash
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(k, _)| *k)
            .collect();
        for recid in dirty {
            self.write_back(recid)?;
        }
        Ok(())
    }

    /// Записать одну грязную запись в стор; при переезде перевесить её
    /// на новый recid.
    fn write_back(&mut self, recid: u64) -> Result<()> {
        let (value, ser) = {
            let e = self.hash.get(&recid).expect("dirty entry present");
            (Arc::clone(&e.value), Arc::clone(&e.ser))
        };
        let new_recid = self.lower_mut()?.update(recid, &value, &ser)?;
        record_cache_writeback();

        if new_recid != recid {
            debug!("record relocated on write-back: {} -> {}", recid, new_recid);
            self.remove_entry(recid);
            let mut e = self.hash.remove(&recid).expect("entry present");
            e.dirty = false;
            e.prev = None;
            e.next = None;
            self.hash.insert(new_recid, e);
            self.add_entry(new_recid);
        } else {
            self.hash.get_mut(&recid).expect("entry present").dirty = false;
        }
        Ok(())
    }

    /// Поместить запись в кэш; при переполнении сначала вытеснить LRU.
    fn cache_put(
        &mut self,
        recid: u64,
        value: Arc<dyn CacheValue>,
        ser: Arc<dyn Serializer>,
        dirty: bool,
    ) -> Result<()> {
        if let Some(e) = self.hash.get_mut(&recid) {
            e.value = value;
            e.ser = ser;
            if dirty {
                e.dirty = true;
            }
            self.touch(recid);
            return Ok(());
        }

        if self.hash.len() >= self.max_records {
            self.purge_entry()?;
        }
        self.hash.insert(
            recid,
            CacheEntry {
                value,
                ser,
                dirty,
                prev: None,
                next: None,
            },
        );
        self.add_entry(recid);
        Ok(())
    }

    /// Вытеснить LRU-голову; грязная запись сначала прописывается в стор.
    fn purge_entry(&mut self) -> Result<()> {
        loop {
            let victim = match self.first {
                Some(r) => r,
                None => return Ok(()),
            };
            if self.hash.get(&victim).expect("lru head present").dirty {
                // после write_back голова могла смениться: переезд записи
                // уводит её в MRU-конец под новым recid
                self.write_back(victim)?;
                continue;
            }
            self.remove_entry(victim);
            self.hash.remove(&victim);
            record_cache_eviction();
            return Ok(());
        }
    }

    /// Добавить recid в MRU-конец списка.
    fn add_entry(&mut self, recid: u64) {
        match self.last {
            None => {
                self.first = Some(recid);
                self.last = Some(recid);
            }
            Some(tail) => {
                self.hash.get_mut(&tail).expect("tail present").next = Some(recid);
                let e = self.hash.get_mut(&recid).expect("new entry present");
                e.prev = Some(tail);
                e.next = None;
                self.last = Some(recid);
            }
        }
    }

    /// Исключить recid из списка (сама запись остаётся в hash).
    fn remove_entry(&mut self, recid: u64) {
        let (prev, next) = match self.hash.get(&recid) {
            Some(e) => (e.prev, e.next),
            None => return,
        };
        match prev {
            Some(p) => self.hash.get_mut(&p).expect("prev present").next = next,
            None => self.first = next,
        }
        match next {
            Some(n) => self.hash.get_mut(&n).expect("next present").prev = prev,
            None => self.last = prev,
        }
        if let Some(e) = self.hash.get_mut(&recid) {
            e.prev = None;
            e.next = None;
        }
    }

    /// Переместить recid в MRU-конец.
    fn touch(&mut self, recid: u64) {
        if self.last == Some(recid) {
            return;
        }
        self.remove_entry(recid);
        self.add_entry(recid);
    }
}

impl Drop for RecordCache {
    fn drop(&mut self) {
        if self.lower.is_some() {
            // ошибки при закрытии в Drop игнорируем
            let _ = self.close();
        }
    }
}
