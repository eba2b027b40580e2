use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use QuillStore::cache::{RecordCache, RefCacheKind};
use QuillStore::ser::{downcast_value, BytesSerializer, CacheValue, Serializer};
use QuillStore::store::Store;

fn bytes_value(data: &[u8]) -> Arc<dyn CacheValue> {
    Arc::new(data.to_vec())
}

fn as_bytes(v: &Arc<dyn CacheValue>) -> &Vec<u8> {
    downcast_value::<Vec<u8>>(v).expect("Vec<u8> value")
}

// Вытеснение из заполненного кэша прописывает грязную LRU-голову в стор
// до выселения.
#[test]
fn eviction_writes_back_dirty_entry() -> Result<()> {
    let path = unique_root("evict");
    let st = Store::create(&path, 4096)?;
    let mut cache = RecordCache::new(st, 2)?;
    let ser: Arc<dyn Serializer> = Arc::new(BytesSerializer);

    let r1 = cache.insert(bytes_value(b"a1"), ser.clone())?;
    let r2 = cache.insert(bytes_value(b"a2"), ser.clone())?;
    assert_eq!(cache.cached_records(), 2);

    cache.update(r1, bytes_value(b"b1"), ser.clone())?;
    cache.update(r2, bytes_value(b"b2"), ser.clone())?;
    assert_eq!(cache.is_dirty(r1), Some(true));

    // третья запись переполняет кэш: LRU (r1) уходит в стор
    let r3 = cache.insert(bytes_value(b"a3"), ser.clone())?;
    assert_eq!(cache.cached_records(), 2);
    assert!(!cache.is_cached(r1));
    assert!(cache.is_cached(r2) && cache.is_cached(r3));

    // стор уже видит свежее значение r1 — без commit
    let v = cache.fetch_uncached(r1, ser.clone())?.expect("r1 present");
    assert_eq!(as_bytes(&v), &b"b1".to_vec());

    let _ = std::fs::remove_file(&path);
    Ok(())
}

// После rollback кэш пуст, а чтение возвращает последнее
// закоммиченное значение.
#[test]
fn rollback_discards_cached_updates() -> Result<()> {
    let path = unique_root("cache-rb");
    let st = Store::create(&path, 4096)?;
    let mut cache = RecordCache::new(st, 8)?;
    let ser: Arc<dyn Serializer> = Arc::new(BytesSerializer);

    let r = cache.insert(bytes_value(b"committed"), ser.clone())?;
    cache.commit()?;

    cache.update(r, bytes_value(b"uncommitted"), ser.clone())?;
    cache.rollback()?;

    assert_eq!(cache.cached_records(), 0);
    let v = cache.fetch(r, ser.clone())?.expect("r present");
    assert_eq!(as_bytes(&v), &b"committed".to_vec());

    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[test]
fn commit_clears_dirty_flags() -> Result<()> {
    let path = unique_root("cache-commit");
    let st = Store::create(&path, 4096)?;
    let mut cache = RecordCache::new(st, 8)?;
    let ser: Arc<dyn Serializer> = Arc::new(BytesSerializer);

    let r1 = cache.insert(bytes_value(b"one"), ser.clone())?;
    let r2 = cache.insert(bytes_value(b"two"), ser.clone())?;
    cache.update(r1, bytes_value(b"one!"), ser.clone())?;
    cache.update(r2, bytes_value(b"two!"), ser.clone())?;

    cache.commit()?;
    assert_eq!(cache.is_dirty(r1), Some(false));
    assert_eq!(cache.is_dirty(r2), Some(false));

    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[test]
fn capacity_never_exceeded() -> Result<()> {
    let path = unique_root("cache-cap");
    let st = Store::create(&path, 4096)?;
    let mut cache = RecordCache::new(st, 4)?;
    let ser: Arc<dyn Serializer> = Arc::new(BytesSerializer);

    let mut recs = Vec::new();
    for i in 0..32u8 {
        let r = cache.insert(bytes_value(&[i; 16]), ser.clone())?;
        recs.push(r);
        assert!(cache.cached_records() <= 4);
    }
    // всё читается, несмотря на вытеснения
    for (i, r) in recs.iter().enumerate() {
        let v = cache.fetch(*r, ser.clone())?.expect("present");
        assert_eq!(as_bytes(&v), &vec![i as u8; 16]);
    }

    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[test]
fn delete_removes_everywhere() -> Result<()> {
    let path = unique_root("cache-del");
    let st = Store::create(&path, 4096)?;
    let mut cache = RecordCache::new(st, 8)?;
    let ser: Arc<dyn Serializer> = Arc::new(BytesSerializer);

    let r = cache.insert(bytes_value(b"gone"), ser.clone())?;
    assert!(cache.is_cached(r));
    cache.delete(r)?;
    assert!(!cache.is_cached(r));
    assert!(cache.fetch(r, ser.clone())?.is_none());

    let _ = std::fs::remove_file(&path);
    Ok(())
}

// Второй уровень: Weak-ссылки живы, пока значение держит вызывающий код;
// Soft удерживает значения кольцом сильных клонов.
#[test]
fn reference_cache_weak_and_soft() -> Result<()> {
    let path = unique_root("cache-ref");
    let st = Store::create(&path, 4096)?;
    let mut cache = RecordCache::with_reference_cache(st, 4, RefCacheKind::Weak)?;
    let ser: Arc<dyn Serializer> = Arc::new(BytesSerializer);

    let held = bytes_value(b"held");
    let r1 = cache.insert(Arc::clone(&held), ser.clone())?;
    // значение держим мы — Weak жив
    assert!(cache.is_reference_cached(r1));
    // основной кэш при включённом reference-уровне не пополняется
    assert!(!cache.is_cached(r1));

    let r2 = cache.insert(bytes_value(b"dropped"), ser.clone())?;
    // сильных ссылок не осталось — Weak мёртв
    assert!(!cache.is_reference_cached(r2));
    // но запись достаётся из стора
    let v = cache.fetch(r2, ser.clone())?.expect("r2 present");
    assert_eq!(as_bytes(&v), &b"dropped".to_vec());

    // грязные значения во втором уровне не живут
    cache.update(r1, bytes_value(b"held2"), ser.clone())?;
    assert!(!cache.is_reference_cached(r1));
    assert_eq!(cache.is_dirty(r1), Some(true));

    cache.close()?;
    let _ = std::fs::remove_file(&path);

    // Soft: кольцо сильных клонов переживает отпускание значения
    let path = unique_root("cache-soft");
    let st = Store::create(&path, 4096)?;
    let mut cache = RecordCache::with_reference_cache(st, 4, RefCacheKind::Soft)?;
    let r = cache.insert(bytes_value(b"soft"), ser.clone())?;
    assert!(cache.is_reference_cached(r));

    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[test]
fn clear_cache_writes_back_and_empties() -> Result<()> {
    let path = unique_root("cache-clear");
    let st = Store::create(&path, 4096)?;
    let mut cache = RecordCache::new(st, 8)?;
    let ser: Arc<dyn Serializer> = Arc::new(BytesSerializer);

    let r = cache.insert(bytes_value(b"v0"), ser.clone())?;
    cache.update(r, bytes_value(b"v1"), ser.clone())?;
    cache.clear_cache()?;
    assert_eq!(cache.cached_records(), 0);

    // значение дошло до стора при выгрузке
    let v = cache.fetch_uncached(r, ser.clone())?.expect("present");
    assert_eq!(as_bytes(&v), &b"v1".to_vec());

    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[test]
fn closed_cache_rejects_operations() -> Result<()> {
    let path = unique_root("cache-closed");
    let st = Store::create(&path, 4096)?;
    let mut cache = RecordCache::new(st, 8)?;
    let ser: Arc<dyn Serializer> = Arc::new(BytesSerializer);

    let r = cache.insert(bytes_value(b"x"), ser.clone())?;
    cache.close()?;

    assert!(cache.fetch(r, ser.clone()).is_err());
    assert!(cache.insert(bytes_value(b"y"), ser.clone()).is_err());
    assert!(cache.commit().is_err());
    assert!(cache.close().is_ok());

    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[test]
fn named_objects_delegate_through_cache() -> Result<()> {
    let path = unique_root("cache-names");
    let st = Store::create(&path, 4096)?;
    let mut cache = RecordCache::new(st, 8)?;
    let ser: Arc<dyn Serializer> = Arc::new(BytesSerializer);

    let r = cache.insert(bytes_value(b"catalog"), ser.clone())?;
    cache.set_named_object("catalog", r)?;
    cache.commit()?;
    assert_eq!(cache.get_named_object("catalog")?, Some(r));

    let _ = std::fs::remove_file(&path);
    Ok(())
}

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("qls-{}-{}-{}", prefix, pid, t))
}
