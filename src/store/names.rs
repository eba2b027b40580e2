//! store/names — именованные объекты: карта имя -> record id.
//!
//! Карта сериализуется как обычная запись (LE):
//! [count u32] затем count × ([len u16][имя UTF-8][recid u64]).
//! Record id карты хранится в заголовке файла (root_recid страницы 0).

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;

use super::Store;

impl Store {
    fn ensure_names(&mut self) -> Result<()> {
        if self.names.is_some() {
            return Ok(());
        }
        let root = self.pageman.root_recid();
        let map = if root == 0 {
            HashMap::new()
        } else {
            let bytes = self.fetch_raw(root)?;
            decode_names(&bytes)?
        };
        self.names = Some(map);
        Ok(())
    }

    /// Record id под именем, либо None.
    pub fn get_named_object(&mut self, name: &str) -> Result<Option<u64>> {
        self.check_open()?;
        self.ensure_names()?;
        Ok(self.names.as_ref().expect("names loaded").get(name).copied())
    }

    /// Связать имя с record id. recid = 0 удаляет имя.
    pub fn set_named_object(&mut self, name: &str, recid: u64) -> Result<()> {
        self.check_open()?;
        if name.is_empty() {
            return Err(anyhow!("named object name must not be empty"));
        }
        if name.len() > u16::MAX as usize {
            return Err(anyhow!("named object name too long (> u16::MAX bytes)"));
        }
        self.ensure_names()?;
        let map = self.names.as_mut().expect("names loaded");
        if recid == 0 {
            map.remove(name);
        } else {
            map.insert(name.to_string(), recid);
        }
        self.names_dirty = true;
        Ok(())
    }

    /// Дописать карту имён в стор (вызывается из commit()).
    pub(super) fn flush_names(&mut self) -> Result<()> {
        if !self.names_dirty {
            return Ok(());
        }
        let bytes = encode_names(self.names.as_ref().expect("dirty names are loaded"));
        let root = self.pageman.root_recid();
        let new_root = if root == 0 {
            self.insert_raw(&bytes)?
        } else {
            self.update_raw(root, &bytes)?
        };
        if new_root != root {
            self.pageman.set_root_recid(new_root);
        }
        self.names_dirty = false;
        Ok(())
    }
}

fn encode_names(map: &HashMap<String, u64>) -> Vec<u8> {
    // детерминированный порядок, чтобы одинаковые карты давали
    // одинаковые байты
    let mut items: Vec<(&String, &u64)> = map.iter().collect();
    items.sort();

    let mut out = Vec::with_capacity(4 + items.len() * 16);
    let mut buf4 = [0u8; 4];
    LittleEndian::write_u32(&mut buf4, items.len() as u32);
    out.extend_from_slice(&buf4);
    for (name, recid) in items {
        let mut buf2 = [0u8; 2];
        LittleEndian::write_u16(&mut buf2, name.len() as u16);
        out.extend_from_slice(&buf2);
        out.extend_from_slice(name.as_bytes());
        let mut buf8 = [0u8; 8];
        LittleEndian::write_u64(&mut buf8, *recid);
        out.extend_from_slice(&buf8);
    }
    out
}

fn decode_names(bytes: &[u8]) -> Result<HashMap<String, u64>> {
    if bytes.len() < 4 {
        return Err(anyhow!("named object map record too short"));
    }
    let count = LittleEndian::read_u32(&bytes[0..4]) as usize;
    let mut map = HashMap::with_capacity(count);
    let mut pos = 4usize;
    for _ in 0..count {
        if pos + 2 > bytes.len() {
            return Err(anyhow!("named object map truncated"));
        }
        let len = LittleEndian::read_u16(&bytes[pos..pos + 2]) as usize;
        pos += 2;
        if pos + len + 8 > bytes.len() {
            return Err(anyhow!("named object map truncated"));
        }
        let name = std::str::from_utf8(&bytes[pos..pos + len])
            .map_err(|_| anyhow!("named object map: invalid UTF-8 name"))?
            .to_string();
        pos += len;
        let recid = LittleEndian::read_u64(&bytes[pos..pos + 8]);
        pos += 8;
        map.insert(name, recid);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_codec_roundtrip() -> Result<()> {
        let mut map = HashMap::new();
        map.insert("btree_root".to_string(), 0x1_0008u64);
        map.insert("seq".to_string(), 0x2_008Cu64);

        let bytes = encode_names(&map);
        let back = decode_names(&bytes)?;
        assert_eq!(back, map);

        // пустая карта
        let empty = encode_names(&HashMap::new());
        assert_eq!(decode_names(&empty)?.len(), 0);

        // обрезанная карта отклоняется
        assert!(decode_names(&bytes[..bytes.len() - 3]).is_err());
        Ok(())
    }
}
