//! 发往底层的请求登记
//! 每个 (会话, 请求类别) 同一时刻最多只有一个在途请求，回复通过 epoch 关联

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use log::debug;

use crate::frame::MacAddr;

use super::{Channel, Epoch, FirmwareResponse, RequestToken, SessionId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{class:?} request already outstanding on session {session}")]
    RequestOutstanding {
        session: SessionId,
        class: RequestClass,
    },
}

/// 请求类别，同一类别在同一会话上互斥
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// add/delete bss/sta，连接生命周期
    Lifecycle,
    Key,
    Channel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    AddBss,
    DeleteBss,
    AddSta { peer: MacAddr },
    DeleteSta { peer: MacAddr },
    SetKey { peer: Option<MacAddr> },
    SwitchChannel { channel: Channel },
}

impl RequestKind {
    pub fn class(&self) -> RequestClass {
        match self {
            RequestKind::AddBss
            | RequestKind::DeleteBss
            | RequestKind::AddSta { .. }
            | RequestKind::DeleteSta { .. } => RequestClass::Lifecycle,
            RequestKind::SetKey { .. } => RequestClass::Key,
            RequestKind::SwitchChannel { .. } => RequestClass::Channel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEntry {
    pub kind: RequestKind,
    pub epoch: Epoch,
    pub deadline: Instant,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    Matched(PendingEntry),
    Stale,
}

#[derive(Debug, Default)]
pub struct PendingTracker {
    entries: HashMap<(SessionId, RequestClass), PendingEntry>,
    next_epoch: u64,
}

impl PendingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个新请求，返回它的 token
    pub fn issue(
        &mut self,
        session: SessionId,
        kind: RequestKind,
        timeout: Duration,
    ) -> Result<RequestToken, Error> {
        let class = kind.class();
        if self.entries.contains_key(&(session, class)) {
            return Err(Error::RequestOutstanding { session, class });
        }
        self.next_epoch += 1;
        let epoch = Epoch(self.next_epoch);
        self.entries.insert(
            (session, class),
            PendingEntry {
                kind,
                epoch,
                deadline: Instant::now() + timeout,
            },
        );
        Ok(RequestToken { session, epoch })
    }

    /// 用底层回复匹配在途请求，epoch 或种类不一致的都视为过期
    pub fn resolve(&mut self, response: &FirmwareResponse) -> Resolution {
        let token = response.token();
        let key = (token.session, response.class());
        match self.entries.get(&key) {
            Some(entry) if entry.epoch == token.epoch && response.answers(&entry.kind) => {
                match self.entries.remove(&key) {
                    Some(entry) => Resolution::Matched(entry),
                    None => Resolution::Stale,
                }
            }
            other => {
                debug!(
                    "stale {} response on session {}, token {}, outstanding {:?}",
                    response.name(),
                    token.session,
                    token.epoch,
                    other
                );
                Resolution::Stale
            }
        }
    }

    /// 看门狗超时：取出对应的在途请求，之后到达的回复都会变成过期回复
    pub fn expire(&mut self, session: SessionId, class: RequestClass) -> Option<PendingEntry> {
        let entry = self.entries.remove(&(session, class))?;
        debug!(
            "{:?} request on session {} expired, token {}",
            entry.kind, session, entry.epoch
        );
        Some(entry)
    }

    pub fn cancel(&mut self, session: SessionId, class: RequestClass) -> Option<PendingEntry> {
        self.entries.remove(&(session, class))
    }

    pub fn cancel_all(&mut self, session: SessionId) -> Vec<PendingEntry> {
        let keys: Vec<_> = self
            .entries
            .keys()
            .filter(|(s, _)| *s == session)
            .copied()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .collect()
    }

    pub fn outstanding(&self, session: SessionId, class: RequestClass) -> Option<&PendingEntry> {
        self.entries.get(&(session, class))
    }

    pub fn is_outstanding(&self, session: SessionId, class: RequestClass) -> bool {
        self.entries.contains_key(&(session, class))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mlme::{BssIndex, FwStatus};

    const PEER: MacAddr = MacAddr([2, 0, 0, 0, 0, 9]);

    fn session(index: u16) -> SessionId {
        SessionId::new(index, 0)
    }

    fn add_bss_response(token: RequestToken) -> FirmwareResponse {
        FirmwareResponse::AddBss {
            token,
            status: FwStatus::Success,
            bss_index: BssIndex(1),
        }
    }

    #[test]
    fn one_outstanding_request_per_class() {
        let mut pending = PendingTracker::new();
        let s = session(0);
        pending
            .issue(s, RequestKind::AddBss, Duration::from_secs(1))
            .unwrap();

        assert!(matches!(
            pending.issue(s, RequestKind::AddSta { peer: PEER }, Duration::from_secs(1)),
            Err(Error::RequestOutstanding {
                class: RequestClass::Lifecycle,
                ..
            })
        ));
        // 其它类别不受影响
        pending
            .issue(s, RequestKind::SetKey { peer: None }, Duration::from_secs(1))
            .unwrap();
        // 其它会话不受影响
        pending
            .issue(session(1), RequestKind::AddBss, Duration::from_secs(1))
            .unwrap();
        assert_eq!(pending.len(), 3);
    }

    #[test]
    fn resolve_matches_only_current_epoch() {
        let mut pending = PendingTracker::new();
        let s = session(0);
        let first = pending
            .issue(s, RequestKind::AddBss, Duration::from_secs(1))
            .unwrap();
        pending.cancel(s, RequestClass::Lifecycle).unwrap();
        let second = pending
            .issue(s, RequestKind::AddBss, Duration::from_secs(1))
            .unwrap();
        assert!(second.epoch > first.epoch);

        assert_eq!(pending.resolve(&add_bss_response(first)), Resolution::Stale);
        assert!(matches!(
            pending.resolve(&add_bss_response(second)),
            Resolution::Matched(PendingEntry {
                kind: RequestKind::AddBss,
                ..
            })
        ));
        // 重复回复
        assert_eq!(pending.resolve(&add_bss_response(second)), Resolution::Stale);
    }

    #[test]
    fn resolve_rejects_wrong_kind() {
        let mut pending = PendingTracker::new();
        let s = session(0);
        let token = pending
            .issue(s, RequestKind::DeleteSta { peer: PEER }, Duration::from_secs(1))
            .unwrap();

        assert_eq!(pending.resolve(&add_bss_response(token)), Resolution::Stale);
        assert!(pending.is_outstanding(s, RequestClass::Lifecycle));
    }

    #[test]
    fn expire_by_watchdog() {
        let mut pending = PendingTracker::new();
        let s = session(0);
        let token = pending
            .issue(s, RequestKind::DeleteSta { peer: PEER }, Duration::from_secs(1))
            .unwrap();

        assert_eq!(pending.expire(s, RequestClass::Key), None);
        assert!(pending.expire(s, RequestClass::Lifecycle).is_some());
        // 超时之后的回复是过期的
        let late = FirmwareResponse::DeleteSta {
            token,
            status: FwStatus::Success,
        };
        assert_eq!(pending.resolve(&late), Resolution::Stale);
        assert!(pending.is_empty());
    }
}
