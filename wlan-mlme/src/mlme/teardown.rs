//! 拆除流程
//! delete sta（AP 上逐个对端）-> delete bss -> 删除会话 -> 回复上层。
//! 拆除过程中重复的请求只计数，不重新下发底层命令

use log::{debug, error, info, warn};

use crate::frame::{MacAddr, MgmtFrame, ReasonCode, StatusCode};

use super::{
    machine::{LowerResult, StateMachine},
    pending::{RequestClass, RequestKind},
    session::PeerState,
    state::{
        Disconnect, DisconnectKind, JoinAbort, JoinFailure, LinkState, Origin, ReassocAttempt,
        ReassocStep, Teardown, TeardownCause, TeardownStep,
    },
    timer::{Scheduler, TimerKind},
    AddTsResponse, DisconnectConfirm, DisconnectIndication, DisconnectRequest, Error,
    ExchangeConfirm, FirmwareCommand, IfaceId, Indication, JoinResponse, ResultCode, SessionId,
    SmeRequest, StopBssResponse,
};

pub(super) fn disconnect_frame(
    kind: DisconnectKind,
    src: MacAddr,
    dst: MacAddr,
    bssid: MacAddr,
    reason: ReasonCode,
) -> MgmtFrame {
    match kind {
        DisconnectKind::Disassoc => MgmtFrame::disassoc(src, dst, bssid, reason),
        DisconnectKind::Deauth => MgmtFrame::deauth(src, dst, bssid, reason),
    }
}

pub(super) fn disconnect_request(kind: DisconnectKind, req: DisconnectRequest) -> SmeRequest {
    match kind {
        DisconnectKind::Disassoc => SmeRequest::Disassoc(req),
        DisconnectKind::Deauth => SmeRequest::Deauth(req),
    }
}

/// 断开完成后的通知：本端发起的回复 confirm，其余上报 indication
pub(super) fn disconnect_notification(
    iface_id: IfaceId,
    bssid: MacAddr,
    disconnect: Disconnect,
    result: ResultCode,
) -> Indication {
    let peer = disconnect.peer;
    match (disconnect.origin, disconnect.kind) {
        (Origin::Local, kind) => {
            let confirm = DisconnectConfirm {
                iface_id,
                bssid,
                peer,
                result,
            };
            match kind {
                DisconnectKind::Disassoc => Indication::DisassocConfirm(confirm),
                DisconnectKind::Deauth => Indication::DeauthConfirm(confirm),
            }
        }
        (Origin::Peer | Origin::LinkLost, kind) => {
            let indication = DisconnectIndication {
                iface_id,
                bssid,
                peer,
                reason: disconnect.reason,
            };
            match kind {
                DisconnectKind::Disassoc => Indication::DisassocIndication(indication),
                DisconnectKind::Deauth => Indication::DeauthIndication(indication),
            }
        }
    }
}

fn lower_outcome(result: &LowerResult<()>) -> ResultCode {
    match result {
        Ok(()) => ResultCode::Success,
        Err(_) => ResultCode::LowerLayerFailure,
    }
}

impl<S: Scheduler> StateMachine<S> {
    /// 上层的 disassoc / deauth 请求
    pub(super) fn disconnect_request(
        &mut self,
        id: SessionId,
        kind: DisconnectKind,
        req: DisconnectRequest,
    ) -> Result<(), Error> {
        let session = self.session(id)?;
        if session.role.admits_peers() {
            return self.ap_disconnect(id, kind, req);
        }
        let disconnect = Disconnect {
            kind,
            origin: Origin::Local,
            peer: session.bssid,
            reason: req.reason,
        };

        match session.state() {
            LinkState::Connected { .. } => self.begin_disconnect(id, disconnect),
            LinkState::TearingDown(_) => self.fold(id),
            LinkState::Joining(step) if kind == DisconnectKind::Deauth => {
                let step = step.clone();
                self.abort_join(
                    id,
                    step,
                    JoinAbort {
                        reason: req.reason,
                        origin: Origin::Local,
                    },
                )
            }
            LinkState::Reassociating(ReassocAttempt {
                step: ReassocStep::Request,
                ..
            }) => {
                self.timers.disarm(id, TimerKind::Reassoc);
                self.rollback_reassoc(id, StatusCode::REFUSED)?;
                self.begin_disconnect(id, disconnect)
            }
            other => {
                debug!("{:?} request on session {} in {}", kind, id, other);
                self.emitter.answer(
                    &disconnect_request(kind, req),
                    ResultCode::UnexpectedRequest,
                );
                Ok(())
            }
        }
    }

    /// 重复的拆除请求合并进正在进行的拆除
    pub(super) fn fold(&mut self, id: SessionId) -> Result<(), Error> {
        if let LinkState::TearingDown(teardown) = self.session_mut(id)?.state_mut() {
            teardown.folded += 1;
            debug!(
                "fold request into teardown of session {}, {} folded",
                id, teardown.folded
            );
        }
        Ok(())
    }

    /// 断开已建立的 station 链路
    pub(super) fn begin_disconnect(
        &mut self,
        id: SessionId,
        disconnect: Disconnect,
    ) -> Result<(), Error> {
        self.fail_exchanges(id)?;
        self.timers.disarm(id, TimerKind::Heartbeat);

        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        if disconnect.origin == Origin::Local {
            self.emitter.transmit(disconnect_frame(
                disconnect.kind,
                session.self_addr,
                disconnect.peer,
                session.bssid,
                disconnect.reason,
            ));
        }
        let step = match session.sta_index {
            Some(_) => TeardownStep::DeleteSta {
                peer: session.bssid,
                remaining: Vec::new(),
            },
            None => TeardownStep::DeleteBss,
        };
        info!(
            "tear down link to {} ({:?} by {:?}, reason {}), session {}",
            session.bssid, disconnect.kind, disconnect.origin, disconnect.reason.0, id
        );
        session.set_state(LinkState::TearingDown(Teardown {
            cause: TeardownCause::Disconnect(disconnect),
            step,
            failed: false,
            folded: 0,
        }));
        self.issue_teardown_step(id)
    }

    /// join 失败：释放已经分配的底层资源，完成后回复 join response
    pub(super) fn unwind_join(&mut self, id: SessionId, failure: JoinFailure) -> Result<(), Error> {
        self.timers.disarm(id, TimerKind::Auth);
        self.timers.disarm(id, TimerKind::Assoc);

        let session = self.session_mut(id)?;
        let step = match session.sta_index {
            Some(_) => TeardownStep::DeleteSta {
                peer: session.bssid,
                remaining: Vec::new(),
            },
            None => TeardownStep::DeleteBss,
        };
        session.set_state(LinkState::TearingDown(Teardown {
            cause: TeardownCause::JoinFailed(failure),
            step,
            failed: false,
            folded: 0,
        }));
        self.issue_teardown_step(id)
    }

    /// 拆除开始时结束会话上其它在途的交互
    pub(super) fn fail_exchanges(&mut self, id: SessionId) -> Result<(), Error> {
        let session = self.session(id)?;
        let (iface_id, bssid) = (session.iface_id, session.bssid);
        let addts = match session.state() {
            LinkState::Connected { addts } => *addts,
            _ => None,
        };

        for class in [RequestClass::Key, RequestClass::Channel] {
            if let Some(entry) = self.pending.cancel(id, class) {
                self.disarm_watchdog(id, class);
                warn!("{:?} on session {} cancelled by teardown", entry.kind, id);
                let confirm = ExchangeConfirm {
                    iface_id,
                    bssid,
                    result: ResultCode::LowerLayerFailure,
                };
                self.emitter.indicate(match class {
                    RequestClass::Key => Indication::SetKeys(confirm),
                    _ => Indication::SwitchChannel(confirm),
                });
            }
        }

        if let Some(exchange) = addts {
            self.timers.disarm(id, TimerKind::AddTs);
            warn!("add-ts {} on session {} cancelled by teardown", exchange.tsid, id);
            self.emitter.indicate(Indication::AddTs(AddTsResponse {
                iface_id,
                bssid,
                tsid: exchange.tsid,
                result: ResultCode::AddTsFailure,
                status: StatusCode::REFUSED,
            }));
            self.resume(id);
        }
        Ok(())
    }

    /// 按当前拆除步骤下发底层命令
    pub(super) fn issue_teardown_step(&mut self, id: SessionId) -> Result<(), Error> {
        let session = self.session(id)?;
        let step = match session.state() {
            LinkState::TearingDown(teardown) => teardown.step.clone(),
            other => {
                error!("session {} is not tearing down: {}", id, other);
                return Ok(());
            }
        };

        match step {
            TeardownStep::DeleteSta { peer, .. } => {
                let sta_index = if session.role.admits_peers() {
                    session.peers.get(&peer).and_then(PeerState::sta_index)
                } else {
                    session.sta_index
                };
                match sta_index {
                    Some(sta_index) => self.issue(
                        id,
                        RequestKind::DeleteSta { peer },
                        TimerKind::DeleteSta,
                        |token| FirmwareCommand::DeleteSta { token, sta_index },
                    ),
                    None => {
                        debug!("{} has no sta entry, skip delete sta", peer);
                        self.on_teardown_sta_deleted(id, Ok(()))
                    }
                }
            }
            TeardownStep::DeleteBss => {
                let bss_index = session.bss_index;
                match bss_index {
                    Some(bss_index) => self.issue(
                        id,
                        RequestKind::DeleteBss,
                        TimerKind::DeleteBss,
                        |token| FirmwareCommand::DeleteBss { token, bss_index },
                    ),
                    None => self.finish_teardown(id),
                }
            }
        }
    }

    /// delete sta 完成或超时，超时也继续后面的步骤
    pub(super) fn on_teardown_sta_deleted(
        &mut self,
        id: SessionId,
        result: LowerResult<()>,
    ) -> Result<(), Error> {
        let session = self.session_mut(id)?;
        let mut teardown = match session.state() {
            LinkState::TearingDown(teardown) => teardown.clone(),
            _ => return Ok(()),
        };
        if let Err(failure) = result {
            warn!("delete sta on session {} failed: {:?}", id, failure);
            teardown.failed = true;
        }

        teardown.step = match teardown.step {
            TeardownStep::DeleteSta {
                peer,
                mut remaining,
            } => {
                if session.role.admits_peers() {
                    session.peers.remove(&peer);
                } else {
                    session.sta_index = None;
                }
                if remaining.is_empty() {
                    TeardownStep::DeleteBss
                } else {
                    let peer = remaining.remove(0);
                    TeardownStep::DeleteSta { peer, remaining }
                }
            }
            TeardownStep::DeleteBss => TeardownStep::DeleteBss,
        };
        session.set_state(LinkState::TearingDown(teardown));
        self.issue_teardown_step(id)
    }

    pub(super) fn on_teardown_bss_deleted(
        &mut self,
        id: SessionId,
        result: LowerResult<()>,
    ) -> Result<(), Error> {
        let failed = lower_outcome(&result) != ResultCode::Success;
        let session = self.session_mut(id)?;
        if let LinkState::TearingDown(teardown) = session.state_mut() {
            if failed {
                warn!("delete bss on session {} failed: {:?}", id, result);
                teardown.failed = true;
            }
        }
        session.bss_index = None;
        self.finish_teardown(id)
    }

    /// 删除会话并发出最终通知，每次拆除只通知一次
    fn finish_teardown(&mut self, id: SessionId) -> Result<(), Error> {
        let session = self.destroy(id)?;
        let teardown = match session.state() {
            LinkState::TearingDown(teardown) => teardown.clone(),
            other => {
                error!("finish teardown of session {} in {}", id, other);
                return Ok(());
            }
        };
        let result = if teardown.failed {
            ResultCode::LowerLayerFailure
        } else {
            ResultCode::Success
        };
        let (iface_id, bssid) = (session.iface_id, session.bssid);
        if teardown.folded > 0 {
            debug!("{} folded requests end with session {}", teardown.folded, id);
        }

        match teardown.cause {
            TeardownCause::Disconnect(disconnect) => {
                info!("link to {} down, session {}", bssid, id);
                self.emitter
                    .indicate(disconnect_notification(iface_id, bssid, disconnect, result));
            }
            TeardownCause::Stop { .. } => {
                info!("bss {} stopped, session {}", bssid, id);
                self.emitter.indicate(Indication::StopBss(StopBssResponse {
                        iface_id,
                        bssid,
                        result,
                    }));
            }
            TeardownCause::JoinFailed(failure) => {
                info!("join {} failed with {:?}", bssid, failure.result);
                self.emit_join_failure(iface_id, bssid, failure, result);
            }
        }
        Ok(())
    }

    /// join 失败的回复；本端 deauth 中止的 join 额外回复 deauth confirm
    pub(super) fn emit_join_failure(
        &self,
        iface_id: IfaceId,
        bssid: MacAddr,
        failure: JoinFailure,
        teardown_result: ResultCode,
    ) {
        let mut response = JoinResponse::failure(iface_id, bssid, failure.result);
        response.protocol_status = failure.status;
        self.emitter.indicate(Indication::Join(response));

        if let Some(JoinAbort {
            origin: Origin::Local,
            ..
        }) = failure.abort
        {
            self.emitter
                .indicate(Indication::DeauthConfirm(DisconnectConfirm {
                    iface_id,
                    bssid,
                    peer: bssid,
                    result: teardown_result,
                }));
        }
    }
}
