//! 会话定时器
//! 定时器到期不会直接回调，而是向分发器投递一条 Timeout 消息，
//! 分发器处理时再用 epoch 判断是否已经过期

use std::{collections::HashMap, time::Duration};

use log::debug;
use tokio::sync::mpsc;

use super::{pending::RequestClass, Epoch, Incoming, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Join,
    Auth,
    Assoc,
    Reassoc,
    Heartbeat,
    AddTs,
    AddBss,
    AddSta,
    DeleteSta,
    DeleteBss,
    SetKey,
    SwitchChannel,
}

impl TimerKind {
    /// 看门狗定时器守护的请求类别，其余定时器等待的是对端帧或周期事件
    pub fn watched_class(&self) -> Option<RequestClass> {
        match self {
            TimerKind::Join
            | TimerKind::AddBss
            | TimerKind::AddSta
            | TimerKind::DeleteSta
            | TimerKind::DeleteBss => Some(RequestClass::Lifecycle),
            TimerKind::SetKey => Some(RequestClass::Key),
            TimerKind::SwitchChannel => Some(RequestClass::Channel),
            TimerKind::Auth
            | TimerKind::Assoc
            | TimerKind::Reassoc
            | TimerKind::Heartbeat
            | TimerKind::AddTs => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    pub session: SessionId,
    pub kind: TimerKind,
    pub epoch: Epoch,
}

/// 定时器的实际调度者
pub trait Scheduler {
    fn schedule(&mut self, after: Duration, token: TimerToken);
}

/// 到期后把 Timeout 消息发回分发器的输入通道
pub struct ChannelScheduler {
    tx: mpsc::Sender<Incoming>,
}

impl ChannelScheduler {
    pub fn new(tx: mpsc::Sender<Incoming>) -> Self {
        Self { tx }
    }
}

impl Scheduler for ChannelScheduler {
    fn schedule(&mut self, after: Duration, token: TimerToken) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if tx.send(Incoming::Timeout(token)).await.is_err() {
                debug!("dispatcher gone, drop timer {:?}", token);
            }
        });
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Firing {
    Valid,
    Stale,
}

pub struct TimerBank<S> {
    scheduler: S,
    armed: HashMap<(SessionId, TimerKind), Epoch>,
    next_epoch: u64,
}

impl<S: Scheduler> TimerBank<S> {
    pub fn new(scheduler: S) -> Self {
        Self {
            scheduler,
            armed: HashMap::new(),
            next_epoch: 0,
        }
    }

    /// 启动或重新启动定时器，旧的 epoch 随之失效
    pub fn arm(&mut self, session: SessionId, kind: TimerKind, after: Duration) -> Epoch {
        self.next_epoch += 1;
        let epoch = Epoch(self.next_epoch);
        if self.armed.insert((session, kind), epoch).is_some() {
            debug!("rearm {:?} timer on session {}", kind, session);
        }
        self.scheduler.schedule(
            after,
            TimerToken {
                session,
                kind,
                epoch,
            },
        );
        epoch
    }

    pub fn disarm(&mut self, session: SessionId, kind: TimerKind) -> bool {
        self.armed.remove(&(session, kind)).is_some()
    }

    pub fn disarm_all(&mut self, session: SessionId) {
        self.armed.retain(|(s, _), _| *s != session);
    }

    /// 定时器到期，有效的到期会同时解除该定时器
    pub fn fire(&mut self, token: TimerToken) -> Firing {
        let key = (token.session, token.kind);
        match self.armed.get(&key) {
            Some(epoch) if *epoch == token.epoch => {
                self.armed.remove(&key);
                Firing::Valid
            }
            Some(epoch) => {
                debug!(
                    "stale {:?} timer on session {}: fired {}, armed {}",
                    token.kind, token.session, token.epoch, epoch
                );
                Firing::Stale
            }
            None => {
                debug!(
                    "stale {:?} timer on session {}: not armed",
                    token.kind, token.session
                );
                Firing::Stale
            }
        }
    }

    pub fn is_armed(&self, session: SessionId, kind: TimerKind) -> bool {
        self.armed.contains_key(&(session, kind))
    }

    /// 当前有效的到期令牌
    pub fn armed(&self, session: SessionId, kind: TimerKind) -> Option<TimerToken> {
        self.armed.get(&(session, kind)).map(|epoch| TimerToken {
            session,
            kind,
            epoch: *epoch,
        })
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }
}

/// 只记录，不真正计时，测试里手动触发
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FakeScheduler {
    pub scheduled: Vec<(Duration, TimerToken)>,
}

#[cfg(test)]
impl Scheduler for FakeScheduler {
    fn schedule(&mut self, after: Duration, token: TimerToken) {
        self.scheduled.push((after, token));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> TimerBank<FakeScheduler> {
        TimerBank::new(FakeScheduler::default())
    }

    #[test]
    fn fire_once() {
        let mut timers = bank();
        let s = SessionId::new(0, 0);
        timers.arm(s, TimerKind::Join, Duration::from_millis(500));
        let token = timers.armed(s, TimerKind::Join).unwrap();

        assert_eq!(timers.fire(token), Firing::Valid);
        assert!(!timers.is_armed(s, TimerKind::Join));
        assert_eq!(timers.fire(token), Firing::Stale);
    }

    #[test]
    fn rearm_invalidates_previous_epoch() {
        let mut timers = bank();
        let s = SessionId::new(0, 0);
        timers.arm(s, TimerKind::Heartbeat, Duration::from_millis(100));
        timers.arm(s, TimerKind::Heartbeat, Duration::from_millis(100));

        let scheduled: Vec<_> = timers.scheduler().scheduled.iter().map(|(_, t)| *t).collect();
        assert_eq!(scheduled.len(), 2);
        assert_eq!(timers.fire(scheduled[0]), Firing::Stale);
        assert_eq!(timers.fire(scheduled[1]), Firing::Valid);
    }

    #[test]
    fn disarm_all_only_touches_one_session() {
        let mut timers = bank();
        let a = SessionId::new(0, 0);
        let b = SessionId::new(1, 0);
        timers.arm(a, TimerKind::Join, Duration::from_millis(100));
        timers.arm(a, TimerKind::AddBss, Duration::from_millis(100));
        timers.arm(b, TimerKind::Join, Duration::from_millis(100));

        let stale = timers.armed(a, TimerKind::Join).unwrap();
        timers.disarm_all(a);
        assert_eq!(timers.len(), 1);
        assert!(timers.is_armed(b, TimerKind::Join));
        assert_eq!(timers.fire(stale), Firing::Stale);
    }
}
