#![allow(non_snake_case)]

//! QuillStore — встраиваемый однофайловый стор записей.
//!
//! Байтовые записи произвольной длины адресуются стабильными 64-битными
//! record id (страница + оффсет), живут в страницах фиксированного
//! размера с переливом на continuation-страницы, освобождённые слоты
//! переиспользуются через персистентный пул. Поверх стора — write-back
//! LRU-кэш живых объектов с опциональным reference-уровнем.

// Базовые модули
pub mod consts;
pub mod location;
pub mod metrics;

// Слои стора (снизу вверх)
pub mod block; // файл страниц: get/release/commit/rollback
pub mod page; // заголовок страницы данных + кодек заголовка записи
pub mod pageman; // страница 0, категории, цепочки, пул страниц
pub mod free; // пул освобождённых слотов записей
pub mod phys; // менеджер физических записей
pub mod store; // фасад: байтовый и объектный API, имена, транзакции
pub mod cache; // write-back LRU + reference-кэш + уборщик

// Шов сериализации
pub mod ser;

// Удобные реэкспорты
pub use cache::{RecordCache, RefCacheKind};
pub use location::{offset_of, page_of, to_recid, NULL_RECID};
pub use ser::{downcast_value, BytesSerializer, CacheValue, Serializer};
pub use store::Store;
