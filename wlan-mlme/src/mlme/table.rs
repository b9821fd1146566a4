//! 会话表
//! 固定容量的槽位数组，会话通过 (槽位, 代数) 引用，
//! 会话删除后代数递增，旧的 SessionId 不会再命中新会话

use std::{collections::HashMap, fmt};

use crate::{config::MAX_SESSIONS, frame::MacAddr};

use super::{session::Session, BssIndex, IfaceId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session table full, capacity {0}")]
    Full(usize),
    #[error("session for bssid {0} already exists")]
    Duplicate(MacAddr),
    #[error("session {0} not found")]
    NotFound(SessionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    index: u16,
    generation: u32,
}

impl SessionId {
    pub fn new(index: u16, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u16 {
        self.index
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    session: Option<Session>,
}

#[derive(Debug)]
pub struct SessionTable {
    slots: Vec<Slot>,
    by_bssid: HashMap<MacAddr, SessionId>,
}

impl SessionTable {
    /// 槽位数不超过 u16 索引能表示的范围
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_SESSIONS);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        Self {
            slots,
            by_bssid: HashMap::new(),
        }
    }

    /// 在空闲槽位上创建会话，同一个 bssid 只能有一个会话
    pub fn insert<F>(&mut self, bssid: MacAddr, build: F) -> Result<SessionId, Error>
    where
        F: FnOnce(SessionId) -> Session,
    {
        if self.by_bssid.contains_key(&bssid) {
            return Err(Error::Duplicate(bssid));
        }
        let capacity = self.slots.len();
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.session.is_none())
            .ok_or(Error::Full(capacity))?;

        let index = u16::try_from(index).map_err(|_| Error::Full(capacity))?;
        let id = SessionId::new(index, slot.generation);
        slot.session = Some(build(id));
        self.by_bssid.insert(bssid, id);
        Ok(id)
    }

    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let session = slot.session.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.by_bssid.remove(&session.bssid);
        Some(session)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.session.as_ref())
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.session.as_mut())
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.get(id).is_some()
    }

    /// 会话改为以新的 bssid 索引（重关联成功）
    pub fn rekey(&mut self, id: SessionId, bssid: MacAddr) -> Result<(), Error> {
        if let Some(other) = self.by_bssid.get(&bssid) {
            if *other != id {
                return Err(Error::Duplicate(bssid));
            }
        }
        let session = self.get_mut(id).ok_or(Error::NotFound(id))?;
        let old = std::mem::replace(&mut session.bssid, bssid);
        self.by_bssid.remove(&old);
        self.by_bssid.insert(bssid, id);
        Ok(())
    }

    pub fn find_by_bssid(&self, bssid: MacAddr) -> Option<SessionId> {
        self.by_bssid.get(&bssid).copied()
    }

    pub fn find_by_iface(&self, iface_id: IfaceId) -> Option<SessionId> {
        self.iter()
            .find(|session| session.iface_id == iface_id)
            .map(|session| session.id)
    }

    /// 按对端地址查找，用于 bssid 对不上的帧（重关联目标、AP 上的对端）
    pub fn find_by_peer(&self, addr: MacAddr) -> Option<SessionId> {
        self.iter()
            .find(|session| session.knows(addr))
            .map(|session| session.id)
    }

    pub fn find_by_bss_index(&self, bss_index: BssIndex) -> Option<SessionId> {
        self.iter()
            .find(|session| session.bss_index == Some(bss_index))
            .map(|session| session.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.slots.iter().filter_map(|slot| slot.session.as_ref())
    }

    pub fn len(&self) -> usize {
        self.by_bssid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_bssid.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
