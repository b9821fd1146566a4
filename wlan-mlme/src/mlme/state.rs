//! 会话状态
//! 会话只保存一个 LinkState，管理状态 (SME) 和链路状态 (MLM) 都是从它投影出来的，
//! 所以不会出现表外的状态组合

use std::fmt;

use crate::frame::{MacAddr, MgmtFrame, ReasonCode, StatusCode};

use super::{Capabilities, ResultCode};

/// 管理状态，上层请求的生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmeState {
    /// 只作为分发器的全局状态出现
    Offline,
    Idle,
    WaitingStart,
    WaitingJoin,
    WaitingAuth,
    WaitingAssoc,
    WaitingReassoc,
    LinkEstablished,
    WaitingDisassoc,
    WaitingDeauth,
    WaitingStop,
}

/// 链路状态，与底层的握手进度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MlmState {
    Idle,
    WaitingAddBssResponse,
    WaitingAuthFrame2,
    WaitingAssocResponse,
    WaitingReassocResponse,
    WaitingAddStaResponse,
    WaitingDeleteStaResponse,
    WaitingDeleteBssResponse,
    BssStarted,
    LinkEstablished,
}

/// 所有合法的 (SME, MLM) 组合
pub const VALID_STATE_PAIRS: &[(SmeState, MlmState)] = &[
    (SmeState::Offline, MlmState::Idle),
    (SmeState::Idle, MlmState::Idle),
    (SmeState::WaitingStart, MlmState::WaitingAddBssResponse),
    (SmeState::LinkEstablished, MlmState::BssStarted),
    (SmeState::LinkEstablished, MlmState::WaitingAddStaResponse),
    (SmeState::LinkEstablished, MlmState::WaitingDeleteStaResponse),
    (SmeState::LinkEstablished, MlmState::LinkEstablished),
    (SmeState::WaitingJoin, MlmState::WaitingAddBssResponse),
    (SmeState::WaitingAuth, MlmState::WaitingAuthFrame2),
    (SmeState::WaitingAssoc, MlmState::WaitingAssocResponse),
    (SmeState::WaitingAssoc, MlmState::WaitingAddStaResponse),
    (SmeState::WaitingReassoc, MlmState::WaitingReassocResponse),
    (SmeState::WaitingReassoc, MlmState::WaitingAddStaResponse),
    (SmeState::WaitingJoin, MlmState::WaitingDeleteStaResponse),
    (SmeState::WaitingJoin, MlmState::WaitingDeleteBssResponse),
    (SmeState::WaitingDisassoc, MlmState::WaitingDeleteStaResponse),
    (SmeState::WaitingDisassoc, MlmState::WaitingDeleteBssResponse),
    (SmeState::WaitingDeauth, MlmState::WaitingAddBssResponse),
    (SmeState::WaitingDeauth, MlmState::WaitingAddStaResponse),
    (SmeState::WaitingDeauth, MlmState::WaitingDeleteStaResponse),
    (SmeState::WaitingDeauth, MlmState::WaitingDeleteBssResponse),
    (SmeState::WaitingStop, MlmState::WaitingDeleteStaResponse),
    (SmeState::WaitingStop, MlmState::WaitingDeleteBssResponse),
];

pub fn is_valid_pair(sme: SmeState, mlm: MlmState) -> bool {
    VALID_STATE_PAIRS.contains(&(sme, mlm))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// 刚创建
    Idle,
    /// start bss：等待 add bss 回复
    Starting,
    /// BSS 已启动 (AP / IBSS / monitor)，可能正在增删某个对端
    BssActive { op: Option<PeerOp> },
    Joining(JoinStep),
    Connected { addts: Option<AddTsExchange> },
    Reassociating(ReassocAttempt),
    TearingDown(Teardown),
}

/// join 的各个阶段
/// 底层请求在途时收到的 deauth 记在 abort 里，等回复到达后再回退
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinStep {
    AddBss {
        abort: Option<JoinAbort>,
    },
    Auth,
    Assoc,
    AddSta {
        aid: u16,
        capabilities: Capabilities,
        /// 交给上层的 assoc response
        frame: MgmtFrame,
        abort: Option<JoinAbort>,
    },
}

impl JoinStep {
    pub fn abort(&self) -> Option<JoinAbort> {
        match self {
            JoinStep::AddBss { abort } | JoinStep::AddSta { abort, .. } => *abort,
            JoinStep::Auth | JoinStep::Assoc => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinAbort {
    pub reason: ReasonCode,
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassocAttempt {
    pub target: MacAddr,
    pub step: ReassocStep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassocStep {
    Request,
    AddSta {
        aid: u16,
        capabilities: Capabilities,
        frame: MgmtFrame,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddTsExchange {
    pub dialog_token: u8,
    pub tsid: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerOp {
    Adding {
        peer: MacAddr,
        aid: u16,
        reassoc: bool,
        capabilities: Capabilities,
    },
    Removing {
        disconnect: Disconnect,
        folded: u32,
    },
}

impl PeerOp {
    pub fn peer(&self) -> MacAddr {
        match self {
            PeerOp::Adding { peer, .. } => *peer,
            PeerOp::Removing { disconnect, .. } => disconnect.peer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    Disassoc,
    Deauth,
}

/// 断开的发起方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// 上层请求，最终回复 confirm
    Local,
    /// 对端发来的帧，最终上报 indication
    Peer,
    /// 心跳丢失，不发送帧
    LinkLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnect {
    pub kind: DisconnectKind,
    pub origin: Origin,
    pub peer: MacAddr,
    pub reason: ReasonCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Teardown {
    pub cause: TeardownCause,
    pub step: TeardownStep,
    /// 底层某一步失败或超时，最终结果为 LowerLayerFailure
    pub failed: bool,
    /// 被合并进来的重复拆除请求
    pub folded: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownCause {
    Disconnect(Disconnect),
    Stop { reason: ReasonCode },
    JoinFailed(JoinFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinFailure {
    pub result: ResultCode,
    pub status: StatusCode,
    pub abort: Option<JoinAbort>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownStep {
    DeleteSta {
        peer: MacAddr,
        /// 之后还要删除的对端（stop bss）
        remaining: Vec<MacAddr>,
    },
    DeleteBss,
}

impl LinkState {
    pub fn sme_state(&self) -> SmeState {
        match self {
            LinkState::Idle => SmeState::Idle,
            LinkState::Starting => SmeState::WaitingStart,
            LinkState::BssActive { .. } | LinkState::Connected { .. } => {
                SmeState::LinkEstablished
            }
            LinkState::Joining(step) => match step {
                _ if step.abort().is_some() => SmeState::WaitingDeauth,
                JoinStep::AddBss { .. } => SmeState::WaitingJoin,
                JoinStep::Auth => SmeState::WaitingAuth,
                JoinStep::Assoc | JoinStep::AddSta { .. } => SmeState::WaitingAssoc,
            },
            LinkState::Reassociating(_) => SmeState::WaitingReassoc,
            LinkState::TearingDown(teardown) => match teardown.cause {
                TeardownCause::Disconnect(Disconnect {
                    kind: DisconnectKind::Disassoc,
                    ..
                }) => SmeState::WaitingDisassoc,
                TeardownCause::Disconnect(Disconnect {
                    kind: DisconnectKind::Deauth,
                    ..
                }) => SmeState::WaitingDeauth,
                TeardownCause::Stop { .. } => SmeState::WaitingStop,
                TeardownCause::JoinFailed(JoinFailure { abort: Some(_), .. }) => {
                    SmeState::WaitingDeauth
                }
                TeardownCause::JoinFailed(_) => SmeState::WaitingJoin,
            },
        }
    }

    pub fn mlm_state(&self) -> MlmState {
        match self {
            LinkState::Idle => MlmState::Idle,
            LinkState::Starting => MlmState::WaitingAddBssResponse,
            LinkState::BssActive { op: None } => MlmState::BssStarted,
            LinkState::BssActive {
                op: Some(PeerOp::Adding { .. }),
            } => MlmState::WaitingAddStaResponse,
            LinkState::BssActive {
                op: Some(PeerOp::Removing { .. }),
            } => MlmState::WaitingDeleteStaResponse,
            LinkState::Joining(step) => match step {
                JoinStep::AddBss { .. } => MlmState::WaitingAddBssResponse,
                JoinStep::Auth => MlmState::WaitingAuthFrame2,
                JoinStep::Assoc => MlmState::WaitingAssocResponse,
                JoinStep::AddSta { .. } => MlmState::WaitingAddStaResponse,
            },
            LinkState::Connected { .. } => MlmState::LinkEstablished,
            LinkState::Reassociating(attempt) => match attempt.step {
                ReassocStep::Request => MlmState::WaitingReassocResponse,
                ReassocStep::AddSta { .. } => MlmState::WaitingAddStaResponse,
            },
            LinkState::TearingDown(teardown) => match teardown.step {
                TeardownStep::DeleteSta { .. } => MlmState::WaitingDeleteStaResponse,
                TeardownStep::DeleteBss => MlmState::WaitingDeleteBssResponse,
            },
        }
    }

    pub fn pair(&self) -> (SmeState, MlmState) {
        (self.sme_state(), self.mlm_state())
    }

    pub fn is_tearing_down(&self) -> bool {
        matches!(self, LinkState::TearingDown(_))
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (sme, mlm) = self.pair();
        write!(f, "{:?}/{:?}", sme, mlm)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    const PEER: MacAddr = MacAddr([2, 0, 0, 0, 0, 1]);

    fn disconnect(kind: DisconnectKind) -> Disconnect {
        Disconnect {
            kind,
            origin: Origin::Local,
            peer: PEER,
            reason: ReasonCode::LEAVING_BSS,
        }
    }

    fn all_states() -> Vec<LinkState> {
        let frame = MgmtFrame::assoc_response(
            PEER,
            PEER,
            false,
            StatusCode::SUCCESS,
            1,
            Bytes::new(),
        );
        let abort = JoinAbort {
            reason: ReasonCode::UNSPECIFIED,
            origin: Origin::Local,
        };
        let mut join_steps = vec![JoinStep::Auth, JoinStep::Assoc];
        for abort in [None, Some(abort)] {
            join_steps.push(JoinStep::AddBss { abort });
            join_steps.push(JoinStep::AddSta {
                aid: 1,
                capabilities: Capabilities::default(),
                frame: frame.clone(),
                abort,
            });
        }
        let causes = vec![
            TeardownCause::Disconnect(disconnect(DisconnectKind::Disassoc)),
            TeardownCause::Disconnect(disconnect(DisconnectKind::Deauth)),
            TeardownCause::Stop {
                reason: ReasonCode::UNSPECIFIED,
            },
            TeardownCause::JoinFailed(JoinFailure {
                result: ResultCode::AuthFailure,
                status: StatusCode::REFUSED,
                abort: None,
            }),
        ];

        let mut states = vec![
            LinkState::Idle,
            LinkState::Starting,
            LinkState::BssActive { op: None },
            LinkState::BssActive {
                op: Some(PeerOp::Adding {
                    peer: PEER,
                    aid: 1,
                    reassoc: false,
                    capabilities: Capabilities::default(),
                }),
            },
            LinkState::BssActive {
                op: Some(PeerOp::Removing {
                    disconnect: disconnect(DisconnectKind::Deauth),
                    folded: 0,
                }),
            },
            LinkState::Connected { addts: None },
            LinkState::Reassociating(ReassocAttempt {
                target: PEER,
                step: ReassocStep::Request,
            }),
            LinkState::Reassociating(ReassocAttempt {
                target: PEER,
                step: ReassocStep::AddSta {
                    aid: 2,
                    capabilities: Capabilities::default(),
                    frame,
                },
            }),
        ];
        states.extend(join_steps.into_iter().map(LinkState::Joining));
        for cause in causes {
            for step in [
                TeardownStep::DeleteSta {
                    peer: PEER,
                    remaining: vec![],
                },
                TeardownStep::DeleteBss,
            ] {
                states.push(LinkState::TearingDown(Teardown {
                    cause,
                    step,
                    failed: false,
                    folded: 0,
                }));
            }
        }
        states
    }

    #[test]
    fn every_state_projects_to_valid_pair() {
        for state in all_states() {
            let (sme, mlm) = state.pair();
            assert!(is_valid_pair(sme, mlm), "{:?} -> {}", state, state);
        }
    }

    #[test]
    fn connected_is_link_established() {
        let state = LinkState::Connected { addts: None };
        assert_eq!(
            state.pair(),
            (SmeState::LinkEstablished, MlmState::LinkEstablished)
        );
        assert_eq!(state.to_string(), "LinkEstablished/LinkEstablished");
    }

    #[test]
    fn offline_only_pairs_with_idle() {
        assert!(is_valid_pair(SmeState::Offline, MlmState::Idle));
        assert!(!is_valid_pair(SmeState::Offline, MlmState::BssStarted));
        assert!(!is_valid_pair(SmeState::Idle, MlmState::LinkEstablished));
    }
}
