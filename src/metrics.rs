//! Лёгкие глобальные метрики стора.
//!
//! Потокобезопасные атомарные счётчики:
//! - операции над записями (insert/update/delete/fetch)
//! - переиспользование свободных слотов
//! - аллокации страниц
//! - кэш записей (hit/miss/eviction/write-back)

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Записи -----
static RECORDS_INSERTED: AtomicU64 = AtomicU64::new(0);
static RECORDS_UPDATED: AtomicU64 = AtomicU64::new(0);
static RECORDS_DELETED: AtomicU64 = AtomicU64::new(0);
static RECORDS_FETCHED: AtomicU64 = AtomicU64::new(0);

// ----- Аллокация -----
static SLOTS_REUSED: AtomicU64 = AtomicU64::new(0);
static PAGES_ALLOCATED: AtomicU64 = AtomicU64::new(0);

// ----- Кэш записей -----
static CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static CACHE_MISSES: AtomicU64 = AtomicU64::new(0);
static CACHE_EVICTIONS: AtomicU64 = AtomicU64::new(0);
static CACHE_WRITEBACKS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub records_inserted: u64,
    pub records_updated: u64,
    pub records_deleted: u64,
    pub records_fetched: u64,

    pub slots_reused: u64,
    pub pages_allocated: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
    pub cache_writebacks: u64,
}

/// Снять текущие значения счётчиков.
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        records_inserted: RECORDS_INSERTED.load(Ordering::Relaxed),
        records_updated: RECORDS_UPDATED.load(Ordering::Relaxed),
        records_deleted: RECORDS_DELETED.load(Ordering::Relaxed),
        records_fetched: RECORDS_FETCHED.load(Ordering::Relaxed),
        slots_reused: SLOTS_REUSED.load(Ordering::Relaxed),
        pages_allocated: PAGES_ALLOCATED.load(Ordering::Relaxed),
        cache_hits: CACHE_HITS.load(Ordering::Relaxed),
        cache_misses: CACHE_MISSES.load(Ordering::Relaxed),
        cache_evictions: CACHE_EVICTIONS.load(Ordering::Relaxed),
        cache_writebacks: CACHE_WRITEBACKS.load(Ordering::Relaxed),
    }
}

#[inline]
pub fn record_inserted() {
    RECORDS_INSERTED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_updated() {
    RECORDS_UPDATED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_deleted() {
    RECORDS_DELETED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_fetched() {
    RECORDS_FETCHED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_slot_reused() {
    SLOTS_REUSED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_page_allocated() {
    PAGES_ALLOCATED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_cache_hit() {
    CACHE_HITS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_cache_miss() {
    CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_cache_eviction() {
    CACHE_EVICTIONS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_cache_writeback() {
    CACHE_WRITEBACKS.fetch_add(1, Ordering::Relaxed);
}
