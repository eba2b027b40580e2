//! Общие константы формата (страницы, категории, заголовок файла).

// -------- Файл --------

/// 8-байтовая магия страницы 0 (заголовок файла).
pub const STORE_MAGIC: &[u8; 8] = b"Q1RSTORE";

/// Версия формата.
pub const STORE_VERSION: u32 = 1;

// -------- Страницы --------

/// Размер страницы по умолчанию.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Минимальный размер страницы.
pub const MIN_BLOCK_SIZE: u32 = 1024;

/// Максимальный размер страницы. Оффсеты внутри страницы упаковываются
/// в нижние 16 бит record id, поэтому страница не может быть больше 32 KiB.
pub const MAX_BLOCK_SIZE: u32 = 32768;

/// Размер заголовка страницы данных: [first u16][next u48].
pub const O_DATA: usize = 8;

/// Смещение поля `first` (u16): оффсет первого заголовка записи на
/// странице, либо 0, если страница несёт только continuation-данные.
pub const OFF_FIRST: usize = 0;

/// Смещение поля `next` (u48): следующая страница в цепочке категории.
pub const OFF_NEXT: usize = 2;

/// «Нет страницы». Страница 0 зарезервирована под заголовок файла,
/// поэтому 0 пригоден как null-ссылка в цепочках.
pub const NO_PAGE: u64 = 0;

// -------- Категории страниц --------

/// Освобождённые страницы (пул переиспользования).
pub const CAT_FREE: u16 = 0;
/// Страницы данных (записи + continuation).
pub const CAT_USED: u16 = 1;
/// Страницы персистентного free-листа записей (FPM).
pub const CAT_FREEPHYS: u16 = 2;

pub const CATEGORY_COUNT: usize = 3;

// -------- Пороговые значения --------

/// Сколько грязных страниц накапливается до сигнала auto-commit.
pub const AUTO_COMMIT_DIRTY_PAGES: usize = 1024;

/// Ёмкость clean-кэша страниц в BlockFile (FIFO).
pub const CLEAN_CACHE_PAGES: usize = 256;

/// Ёмкость LRU-кэша записей по умолчанию.
pub const DEFAULT_CACHE_RECORDS: usize = 2048;
