use anyhow::Result;
use std::path::PathBuf;

use QuillStore::store::Store;
use QuillStore::{offset_of, page_of};

#[test]
fn insert_fetch_delete_single_page() -> Result<()> {
    let path = unique_root("basic");
    let mut st = Store::create(&path, 4096)?;

    // первая запись нового стора: страница 1, оффсет 8
    let r = st.insert_raw(b"hello")?;
    assert_eq!(page_of(r), 1);
    assert_eq!(offset_of(r), 8);
    assert_eq!(st.fetch_raw(r)?, b"hello".to_vec());

    // удалённая запись читается пустой
    st.delete(r)?;
    assert!(st.fetch_raw(r)?.is_empty());

    // пустой payload отклоняется
    assert!(st.insert_raw(b"").is_err());

    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[test]
fn reopen_sees_committed_records() -> Result<()> {
    let path = unique_root("reopen");
    let r;
    {
        let mut st = Store::create(&path, 4096)?;
        r = st.insert_raw(b"persistent")?;
        st.set_named_object("root", r)?;
        st.close()?;
    }
    {
        let mut st = Store::open(&path)?;
        assert_eq!(st.fetch_raw(r)?, b"persistent".to_vec());
        assert_eq!(st.get_named_object("root")?, Some(r));
        assert_eq!(st.get_named_object("missing")?, None);

        // снятие имени
        st.set_named_object("root", 0)?;
        st.close()?;
    }
    {
        let mut st = Store::open(&path)?;
        assert_eq!(st.get_named_object("root")?, None);
    }
    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[test]
fn closed_store_rejects_operations() -> Result<()> {
    let path = unique_root("closed");
    let mut st = Store::create(&path, 4096)?;
    let r = st.insert_raw(b"x")?;
    st.close()?;

    assert!(st.insert_raw(b"y").is_err());
    assert!(st.fetch_raw(r).is_err());
    assert!(st.commit().is_err());
    // повторный close — no-op
    assert!(st.close().is_ok());

    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[test]
fn statistics_reflect_workload() -> Result<()> {
    let path = unique_root("stats");
    let mut st = Store::create(&path, 4096)?;
    let a = st.insert_raw(&[1u8; 100])?;
    let _b = st.insert_raw(&[2u8; 300])?;
    st.delete(a)?;

    let s = st.calculate_statistics()?;
    assert!(s.contains("live=1"), "stats:\n{}", s);
    assert!(s.contains("free_slot_pool: 1"), "stats:\n{}", s);

    // defrag не теряет данные
    st.defrag()?;
    assert_eq!(st.fetch_raw(_b)?, vec![2u8; 300]);

    let _ = std::fs::remove_file(&path);
    Ok(())
}

// Порог auto-commit: больше 1024 незакоммиченных страниц. Одна запись
// на ~5 MiB растягивается на ~1280 страниц и переводит стор в состояние
// «пора коммитить».
#[test]
fn auto_commit_signal_tracks_dirty_pages() -> Result<()> {
    let path = unique_root("autocommit");
    let mut st = Store::create(&path, 4096)?;
    assert!(!st.needs_auto_commit());

    let big = vec![0x5Au8; 5 * 1024 * 1024];
    let r = st.insert_raw(&big)?;
    assert!(st.needs_auto_commit());

    st.commit()?;
    assert!(!st.needs_auto_commit());
    assert_eq!(st.fetch_raw(r)?.len(), big.len());

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
