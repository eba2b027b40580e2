//! store — фасад стора записей: владеет BlockFile, менеджером страниц,
//! пулом свободных слотов и менеджером записей; поверх байтового API
//! даёт объектный (значение + сериализатор) и именованные объекты.
//!
//! Транзакционность:
//! - commit(): карта имён -> пул свободных слотов -> заголовок файла ->
//!   страницы на диск (fsync);
//! - rollback(): откат страниц нижним слоем, затем перечитывание
//!   заголовка и сброс памяти верхних слоёв (пул, курсор, карта имён).
//!
//! Один писатель; межпроцессных блокировок нет.

mod names;
mod stats;

use anyhow::{anyhow, Context, Result};
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::block::BlockFile;
use crate::consts::{AUTO_COMMIT_DIRTY_PAGES, DEFAULT_BLOCK_SIZE};
use crate::free::FreePhysRowIdManager;
use crate::pageman::{self, PageManager};
use crate::phys::PhysicalRowIdManager;
use crate::ser::{BytesSerializer, CacheValue, Serializer};

pub struct Store {
    path: PathBuf,
    pub(crate) file: BlockFile,
    pub(crate) pageman: PageManager,
    pub(crate) freeman: FreePhysRowIdManager,
    pub(crate) phys: PhysicalRowIdManager,

    // Карта именованных объектов; лениво загружается из root-записи.
    names: Option<HashMap<String, u64>>,
    names_dirty: bool,

    closed: bool,
}

impl Store {
    /// Создать новый стор. Ошибка, если файл уже существует.
    pub fn create(path: &Path, block_size: u32) -> Result<Self> {
        if path.exists() {
            return Err(anyhow!("store already exists at {}", path.display()));
        }
        let mut file = BlockFile::open(path, block_size)?;
        let pageman = PageManager::create(&mut file)
            .with_context(|| format!("initialize store {}", path.display()))?;
        let mut store = Self {
            path: path.to_path_buf(),
            file,
            pageman,
            freeman: FreePhysRowIdManager::new(),
            phys: PhysicalRowIdManager::new(),
            names: None,
            names_dirty: false,
            closed: false,
        };
        store.commit()?;
        debug!("store created at {} (block_size={})", path.display(), block_size);
        Ok(store)
    }

    /// Создать стор с размером страницы по умолчанию.
    pub fn create_default(path: &Path) -> Result<Self> {
        Self::create(path, DEFAULT_BLOCK_SIZE)
    }

    /// Открыть существующий стор.
    pub fn open(path: &Path) -> Result<Self> {
        let block_size = pageman::probe_block_size(path)?;
        let mut file = BlockFile::open(path, block_size)?;
        let pageman = PageManager::open(&mut file)
            .with_context(|| format!("open store {}", path.display()))?;
        debug!("store opened at {} (block_size={})", path.display(), block_size);
        Ok(Self {
            path: path.to_path_buf(),
            file,
            pageman,
            freeman: FreePhysRowIdManager::new(),
            phys: PhysicalRowIdManager::new(),
            names: None,
            names_dirty: false,
            closed: false,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.file.block_size()
    }

    /// Управление fsync при commit().
    pub fn set_data_fsync(&mut self, on: bool) {
        self.file.set_data_fsync(on);
    }

    #[inline]
    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(anyhow!("store is closed"));
        }
        Ok(())
    }

    // ----------------- байтовый API -----------------

    /// Вставить запись. Возвращает её record id.
    pub fn insert_raw(&mut self, data: &[u8]) -> Result<u64> {
        self.check_open()?;
        self.phys
            .insert(&mut self.file, &mut self.pageman, &mut self.freeman, data)
    }

    /// Обновить запись. Возвращает (возможно новый) record id.
    pub fn update_raw(&mut self, recid: u64, data: &[u8]) -> Result<u64> {
        self.check_open()?;
        self.phys.update(
            &mut self.file,
            &mut self.pageman,
            &mut self.freeman,
            recid,
            data,
        )
    }

    /// Удалить запись.
    pub fn delete(&mut self, recid: u64) -> Result<()> {
        self.check_open()?;
        self.phys.delete(
            &mut self.file,
            &mut self.pageman,
            &mut self.freeman,
            recid,
        )
    }

    /// Дочитать запись в `out` (освобождённая не добавляет ничего).
    pub fn fetch_into(&mut self, out: &mut Vec<u8>, recid: u64) -> Result<()> {
        self.check_open()?;
        self.phys.fetch(&mut self.file, &mut self.pageman, out, recid)
    }

    /// Прочитать запись целиком.
    pub fn fetch_raw(&mut self, recid: u64) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.fetch_into(&mut out, recid)?;
        Ok(out)
    }

    // ----------------- объектный API -----------------

    /// Сериализатор по умолчанию (Vec<u8> как есть).
    pub fn default_serializer(&self) -> Arc<dyn Serializer> {
        Arc::new(BytesSerializer)
    }

    pub fn insert(
        &mut self,
        value: &Arc<dyn CacheValue>,
        ser: &Arc<dyn Serializer>,
    ) -> Result<u64> {
        let mut buf = Vec::new();
        ser.serialize(value.as_ref(), &mut buf)?;
        self.insert_raw(&buf)
    }

    pub fn update(
        &mut self,
        recid: u64,
        value: &Arc<dyn CacheValue>,
        ser: &Arc<dyn Serializer>,
    ) -> Result<u64> {
        let mut buf = Vec::new();
        ser.serialize(value.as_ref(), &mut buf)?;
        self.update_raw(recid, &buf)
    }

    /// None — запись освобождена.
    pub fn fetch(
        &mut self,
        recid: u64,
        ser: &Arc<dyn Serializer>,
    ) -> Result<Option<Arc<dyn CacheValue>>> {
        let bytes = self.fetch_raw(recid)?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(ser.deserialize(&bytes)?))
    }

    // ----------------- транзакции -----------------

    /// Пора ли вызвать commit() до следующей мутации (накопилось много
    /// незакоммиченных страниц).
    pub fn needs_auto_commit(&self) -> bool {
        self.file.dirty_count() > AUTO_COMMIT_DIRTY_PAGES
    }

    pub fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        self.flush_names()?;
        self.phys
            .commit(&mut self.file, &mut self.pageman, &mut self.freeman)?;
        self.pageman.commit(&mut self.file)?;
        self.file.commit()
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        self.file.rollback();
        self.pageman.reload(&mut self.file)?;
        self.freeman.rollback();
        self.phys.rollback();
        self.names = None;
        self.names_dirty = false;
        Ok(())
    }

    /// Закрыть стор: commit и запрет дальнейших операций.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.commit()?;
        self.closed = true;
        debug!("store closed at {}", self.path.display());
        Ok(())
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if !self.closed {
            // ошибки в Drop сознательно игнорируем
            let _ = self.close();
        }
    }
}
