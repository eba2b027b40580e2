//! ser — шов сериализации между кэшем/стором и пользовательскими
//! значениями.
//!
//! Кэш хранит живые десериализованные объекты, а не байты, поэтому
//! значение стирается до `Arc<dyn CacheValue>` (Any + Send + Sync), а
//! рядом с ним живёт сериализатор — write-back при вытеснении не требует
//! участия вызывающего кода.

use anyhow::{anyhow, Result};
use std::any::Any;
use std::sync::Arc;

/// Значение, пригодное для хранения в кэше записей.
/// Покрывается blanket-импом для любых `Any + Send + Sync`.
pub trait CacheValue: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> CacheValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Привести стёртое значение к конкретному типу.
#[inline]
pub fn downcast_value<T: 'static>(value: &Arc<dyn CacheValue>) -> Option<&T> {
    value.as_any().downcast_ref::<T>()
}

pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &dyn CacheValue, out: &mut Vec<u8>) -> Result<()>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Arc<dyn CacheValue>>;
}

/// Сериализатор по умолчанию: значения — `Vec<u8>`, байты как есть.
pub struct BytesSerializer;

impl Serializer for BytesSerializer {
    fn serialize(&self, value: &dyn CacheValue, out: &mut Vec<u8>) -> Result<()> {
        let bytes = value
            .as_any()
            .downcast_ref::<Vec<u8>>()
            .ok_or_else(|| anyhow!("BytesSerializer expects Vec<u8> values"))?;
        out.extend_from_slice(bytes);
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Arc<dyn CacheValue>> {
        Ok(Arc::new(bytes.to_vec()))
    }
}
