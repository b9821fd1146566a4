//! station 侧：join、重关联、心跳

use bytes::{Bytes, BytesMut};
use log::{debug, error, info, warn};

use crate::frame::{ie, Action, FrameBody, MgmtFrame, ReasonCode, StatusCode, Subtype};

use super::{
    machine::{add_bss_params, LowerResult, StaAdded, StateMachine},
    pending::RequestKind,
    session::{Session, SessionParams},
    state::{
        Disconnect, DisconnectKind, JoinAbort, JoinFailure, JoinStep, LinkState, Origin,
        ReassocAttempt, ReassocStep,
    },
    table,
    timer::{Scheduler, TimerKind},
    AddStaParams, BssIndex, Capabilities, Error, FirmwareCommand, Indication, JoinRequest,
    JoinResponse, ReassocRequest, ResultCode, SessionId, SmeRequest,
};

/// station 不知道对端的信标周期，先按常见值下发，之后由固件根据信标更新
const DEFAULT_BEACON_PERIOD: u16 = 100;

const CAPABILITY_ESS: u16 = 0x0001;
const CAPABILITY_QOS: u16 = 0x0200;

/// 中止的 join 的结果：本端请求的中止回复 JoinAborted，其余按所在阶段失败
pub(super) fn abort_result(abort: &JoinAbort, step_failure: ResultCode) -> ResultCode {
    match abort.origin {
        Origin::Local => ResultCode::JoinAborted,
        Origin::Peer | Origin::LinkLost => step_failure,
    }
}

fn with_abort(step: JoinStep, abort: JoinAbort) -> JoinStep {
    match step {
        JoinStep::AddBss { .. } => JoinStep::AddBss { abort: Some(abort) },
        JoinStep::AddSta {
            aid,
            capabilities,
            frame,
            ..
        } => JoinStep::AddSta {
            aid,
            capabilities,
            frame,
            abort: Some(abort),
        },
        other => other,
    }
}

fn capability_field(caps: &Capabilities) -> u16 {
    if caps.qos {
        CAPABILITY_ESS | CAPABILITY_QOS
    } else {
        CAPABILITY_ESS
    }
}

/// (re)assoc request 携带的信息元素
fn request_ies(session: &Session) -> Bytes {
    let mut stream = BytesMut::new();
    ie::write_ie(&mut stream, ie::SSID, &session.ssid);
    stream.extend_from_slice(&session.requested.to_ies());
    stream.freeze()
}

impl<S: Scheduler> StateMachine<S> {
    pub(super) fn join(&mut self, req: JoinRequest) -> Result<(), Error> {
        let (iface_id, bssid) = (req.iface_id, req.bssid);
        if !req.role.joins()
            || bssid.is_zero()
            || bssid.is_multicast()
            || bssid == req.self_addr
            || req.ssid.len() > ie::MAX_SSID_LEN
        {
            warn!("reject join {}: invalid parameters", bssid);
            self.emitter.indicate(Indication::Join(JoinResponse::failure(
                iface_id,
                bssid,
                ResultCode::InvalidParameters,
            )));
            return Ok(());
        }

        let params = SessionParams {
            iface_id,
            bssid,
            self_addr: req.self_addr,
            role: req.role,
            channel: req.channel,
            ssid: req.ssid,
            beacon_period: DEFAULT_BEACON_PERIOD,
            dtim_period: 1,
            auth_type: req.auth_type,
            capabilities: req.capabilities,
        };
        let id = match self.table.insert(bssid, |id| Session::new(id, params)) {
            Ok(id) => id,
            Err(e) => {
                warn!("reject join {}: {}", bssid, e);
                let result = match e {
                    table::Error::Duplicate(_) => ResultCode::AlreadyJoinedOrStarted,
                    _ => ResultCode::ResourcesUnavailable,
                };
                self.emitter.indicate(Indication::Join(JoinResponse::failure(
                    iface_id, bssid, result,
                )));
                return Ok(());
            }
        };

        info!("join {} on iface {}, session {}", bssid, iface_id, id);
        let session = self.session_mut(id)?;
        session.set_state(LinkState::Joining(JoinStep::AddBss { abort: None }));
        let params = add_bss_params(session);
        self.issue(id, RequestKind::AddBss, TimerKind::Join, |token| {
            FirmwareCommand::AddBss { token, params }
        })
    }

    pub(super) fn on_join_bss_added(
        &mut self,
        id: SessionId,
        result: LowerResult<BssIndex>,
    ) -> Result<(), Error> {
        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        let abort = match session.state() {
            LinkState::Joining(step) => step.abort(),
            _ => None,
        };
        let bss_index = match result {
            Ok(bss_index) => bss_index,
            Err(failure) => {
                warn!("join {}: add bss failed: {:?}", session.bssid, failure);
                // 底层没有 BSS，直接删除会话
                let session = self.destroy(id)?;
                let failure = JoinFailure {
                    result: abort.map_or(ResultCode::JoinFailure, |a| {
                        abort_result(&a, ResultCode::JoinFailure)
                    }),
                    status: StatusCode::SUCCESS,
                    abort,
                };
                self.emit_join_failure(
                    session.iface_id,
                    session.bssid,
                    failure,
                    ResultCode::Success,
                );
                return Ok(());
            }
        };
        session.bss_index = Some(bss_index);

        if let Some(abort) = abort {
            info!("join {} aborted while adding bss", session.bssid);
            return self.unwind_join(
                id,
                JoinFailure {
                    result: abort_result(&abort, ResultCode::JoinFailure),
                    status: StatusCode::SUCCESS,
                    abort: Some(abort),
                },
            );
        }

        let frame = MgmtFrame::auth(
            session.self_addr,
            session.bssid,
            session.bssid,
            session.auth_type,
            1,
            StatusCode::SUCCESS,
        );
        session.set_state(LinkState::Joining(JoinStep::Auth));
        self.emitter.transmit(frame);
        self.arm(id, TimerKind::Auth);
        Ok(())
    }

    pub(super) fn on_join_sta_added(
        &mut self,
        id: SessionId,
        result: LowerResult<StaAdded>,
    ) -> Result<(), Error> {
        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        let (aid, capabilities, frame, abort) = match session.state() {
            LinkState::Joining(JoinStep::AddSta {
                aid,
                capabilities,
                frame,
                abort,
            }) => (*aid, capabilities.clone(), frame.clone(), *abort),
            other => {
                error!("add-sta completion for join {} in state {}", session.bssid, other);
                return Ok(());
            }
        };
        let (self_addr, bssid) = (session.self_addr, session.bssid);

        let added = match result {
            Ok(added) => added,
            Err(failure) => {
                warn!("join {}: add sta failed: {:?}", bssid, failure);
                if abort.is_none() {
                    // 对端已经认为关联成功
                    self.emitter.transmit(MgmtFrame::deauth(
                        self_addr,
                        bssid,
                        bssid,
                        ReasonCode::UNSPECIFIED,
                    ));
                }
                let result = abort.map_or(ResultCode::AssocFailure, |a| {
                    abort_result(&a, ResultCode::AssocFailure)
                });
                return self.unwind_join(
                    id,
                    JoinFailure {
                        result,
                        status: StatusCode::SUCCESS,
                        abort,
                    },
                );
            }
        };
        session.sta_index = Some(added.sta_index);

        if let Some(abort) = abort {
            info!("join {} aborted while adding sta", bssid);
            if abort.origin == Origin::Local {
                self.emitter
                    .transmit(MgmtFrame::deauth(self_addr, bssid, bssid, abort.reason));
            }
            return self.unwind_join(
                id,
                JoinFailure {
                    result: abort_result(&abort, ResultCode::AssocFailure),
                    status: StatusCode::SUCCESS,
                    abort: Some(abort),
                },
            );
        }

        session.aid = Some(aid);
        session.ucast_sig = added.ucast_sig;
        session.bcast_sig = added.bcast_sig;
        session.beacons_seen = 0;
        session.heartbeat_misses = 0;
        session.freeze_capabilities(capabilities.clone());
        session.set_state(LinkState::Connected { addts: None });
        let response = JoinResponse {
            iface_id: session.iface_id,
            bssid,
            result: ResultCode::Success,
            protocol_status: StatusCode::SUCCESS,
            bss_index: session.bss_index,
            sta_index: session.sta_index,
            aid: Some(aid),
            ucast_sig: added.ucast_sig,
            bcast_sig: added.bcast_sig,
            capabilities: Some(capabilities),
            frames: vec![frame],
        };
        info!("link established with {}, aid {}, session {}", bssid, aid, id);
        self.arm(id, TimerKind::Heartbeat);
        self.emitter.indicate(Indication::Join(response));
        Ok(())
    }

    /// join 过程中本端或对端要求断开
    pub(super) fn abort_join(
        &mut self,
        id: SessionId,
        step: JoinStep,
        abort: JoinAbort,
    ) -> Result<(), Error> {
        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        let (self_addr, bssid) = (session.self_addr, session.bssid);
        let (timer, step_failure) = match step {
            // 底层请求在途，等回复到达再回退
            JoinStep::AddBss { abort: None } | JoinStep::AddSta { abort: None, .. } => {
                info!("join {} will be aborted once the lower layer answers", bssid);
                session.set_state(LinkState::Joining(with_abort(step, abort)));
                return Ok(());
            }
            JoinStep::AddBss { .. } | JoinStep::AddSta { .. } => {
                debug!("join {} already aborting", bssid);
                return Ok(());
            }
            JoinStep::Auth => (TimerKind::Auth, ResultCode::AuthFailure),
            JoinStep::Assoc => (TimerKind::Assoc, ResultCode::AssocFailure),
        };

        info!("join {} aborted by {:?}", bssid, abort.origin);
        self.timers.disarm(id, timer);
        if abort.origin == Origin::Local {
            self.emitter
                .transmit(MgmtFrame::deauth(self_addr, bssid, bssid, abort.reason));
        }
        let status = match abort.origin {
            Origin::Local => StatusCode::SUCCESS,
            Origin::Peer | Origin::LinkLost => StatusCode::REFUSED,
        };
        self.unwind_join(
            id,
            JoinFailure {
                result: abort_result(&abort, step_failure),
                status,
                abort: Some(abort).filter(|a| a.origin == Origin::Local),
            },
        )
    }

    pub(super) fn station_frame(&mut self, id: SessionId, frame: MgmtFrame) -> Result<(), Error> {
        let session = self.session(id)?;
        let from_target = matches!(
            session.state(),
            LinkState::Reassociating(attempt) if attempt.target == frame.sa
        );
        if frame.sa != session.bssid && !from_target {
            debug!(
                "drop {:?} from {} on session {}",
                frame.subtype(),
                frame.sa,
                id
            );
            return Ok(());
        }

        match frame.subtype() {
            Subtype::Beacon | Subtype::ProbeResponse => {
                if frame.sa == session.bssid {
                    self.session_mut(id)?.beacons_seen += 1;
                }
                Ok(())
            }
            Subtype::Auth => self.on_auth_frame(id, frame),
            Subtype::AssocResponse => self.on_assoc_response(id, frame),
            Subtype::ReassocResponse => self.on_reassoc_response(id, frame),
            Subtype::Disassoc | Subtype::Deauth => self.on_disconnect_frame(id, frame),
            Subtype::Action => self.on_action_frame(id, frame),
            other => {
                debug!("ignore {:?} from {} on session {}", other, frame.sa, id);
                Ok(())
            }
        }
    }

    fn on_auth_frame(&mut self, id: SessionId, frame: MgmtFrame) -> Result<(), Error> {
        let body = match &frame.body {
            FrameBody::Auth(body) => body,
            _ => return Ok(()),
        };
        let session = self.session(id)?;
        if !matches!(session.state(), LinkState::Joining(JoinStep::Auth)) || body.seq != 2 {
            debug!(
                "unexpected auth seq {} from {} in {}",
                body.seq,
                frame.sa,
                session.state()
            );
            return Ok(());
        }
        self.timers.disarm(id, TimerKind::Auth);

        if !body.status.is_success() {
            warn!("auth with {} refused, status {}", frame.sa, body.status.0);
            return self.unwind_join(
                id,
                JoinFailure {
                    result: ResultCode::AuthFailure,
                    status: body.status,
                    abort: None,
                },
            );
        }

        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        let request = MgmtFrame::assoc_request(
            session.self_addr,
            session.bssid,
            capability_field(&session.requested),
            request_ies(session),
        );
        session.set_state(LinkState::Joining(JoinStep::Assoc));
        self.emitter.transmit(request);
        self.arm(id, TimerKind::Assoc);
        Ok(())
    }

    fn on_assoc_response(&mut self, id: SessionId, frame: MgmtFrame) -> Result<(), Error> {
        let body = match &frame.body {
            FrameBody::AssocResponse(body) => body,
            _ => return Ok(()),
        };
        let session = self.session(id)?;
        if !matches!(session.state(), LinkState::Joining(JoinStep::Assoc)) {
            debug!("unexpected assoc response from {} in {}", frame.sa, session.state());
            return Ok(());
        }
        self.timers.disarm(id, TimerKind::Assoc);

        if !body.status.is_success() {
            warn!("assoc with {} refused, status {}", frame.sa, body.status.0);
            return self.unwind_join(
                id,
                JoinFailure {
                    result: ResultCode::AssocFailure,
                    status: body.status,
                    abort: None,
                },
            );
        }

        let bss_index = self.bss_index(id)?;
        let session = self.session_mut(id)?;
        let aid = body.aid & 0x3fff;
        let peer = session.bssid;
        let capabilities = session
            .requested
            .negotiate(&Capabilities::from_ies(&body.ies));
        let params = AddStaParams {
            bss_index,
            peer,
            aid,
            capabilities: capabilities.clone(),
            update: false,
        };
        session.set_state(LinkState::Joining(JoinStep::AddSta {
            aid,
            capabilities,
            frame: frame.clone(),
            abort: None,
        }));
        self.issue(id, RequestKind::AddSta { peer }, TimerKind::AddSta, |token| {
            FirmwareCommand::AddSta { token, params }
        })
    }

    pub(super) fn on_auth_timeout(&mut self, id: SessionId) -> Result<(), Error> {
        if !matches!(self.session(id)?.state(), LinkState::Joining(JoinStep::Auth)) {
            return Ok(());
        }
        warn!("auth on session {} timed out", id);
        self.unwind_join(
            id,
            JoinFailure {
                result: ResultCode::AuthFailure,
                status: StatusCode::REFUSED,
                abort: None,
            },
        )
    }

    pub(super) fn on_assoc_timeout(&mut self, id: SessionId) -> Result<(), Error> {
        if !matches!(self.session(id)?.state(), LinkState::Joining(JoinStep::Assoc)) {
            return Ok(());
        }
        warn!("assoc on session {} timed out", id);
        self.unwind_join(
            id,
            JoinFailure {
                result: ResultCode::AssocFailure,
                status: StatusCode::REFUSED,
                abort: None,
            },
        )
    }

    /// 对端发来 disassoc / deauth
    fn on_disconnect_frame(&mut self, id: SessionId, frame: MgmtFrame) -> Result<(), Error> {
        let (kind, reason) = match frame.body {
            FrameBody::Disassoc { reason } => (DisconnectKind::Disassoc, reason),
            FrameBody::Deauth { reason } => (DisconnectKind::Deauth, reason),
            _ => return Ok(()),
        };
        let session = self.session(id)?;
        let bssid = session.bssid;
        let disconnect = Disconnect {
            kind,
            origin: Origin::Peer,
            peer: bssid,
            reason,
        };

        match session.state() {
            LinkState::Connected { .. } => {
                info!("{:?} from {}, reason {}", kind, frame.sa, reason.0);
                self.begin_disconnect(id, disconnect)
            }
            LinkState::Joining(step) => {
                let step = step.clone();
                self.abort_join(
                    id,
                    step,
                    JoinAbort {
                        reason,
                        origin: Origin::Peer,
                    },
                )
            }
            LinkState::Reassociating(ReassocAttempt {
                step: ReassocStep::Request,
                ..
            }) => {
                self.timers.disarm(id, TimerKind::Reassoc);
                self.rollback_reassoc(id, StatusCode::REFUSED)?;
                if frame.sa == bssid {
                    self.begin_disconnect(id, disconnect)
                } else {
                    Ok(())
                }
            }
            other => {
                debug!("ignore {:?} from {} in {}", kind, frame.sa, other);
                Ok(())
            }
        }
    }

    fn on_action_frame(&mut self, id: SessionId, frame: MgmtFrame) -> Result<(), Error> {
        match &frame.body {
            FrameBody::Action(Action::AddTsResponse {
                dialog_token,
                status,
                ..
            }) => self.on_add_ts_response(id, *dialog_token, *status),
            _ => {
                self.emitter.indicate(Indication::ActionFrame(frame));
                Ok(())
            }
        }
    }

    pub(super) fn reassoc(&mut self, id: SessionId, req: ReassocRequest) -> Result<(), Error> {
        let session = self.session(id)?;
        let target = req.target;
        let rejected = if !session.role.joins()
            || !matches!(session.state(), LinkState::Connected { addts: None })
        {
            Some(ResultCode::UnexpectedRequest)
        } else if target.is_zero()
            || target.is_multicast()
            || target == session.bssid
            || target == session.self_addr
        {
            Some(ResultCode::InvalidParameters)
        } else if self.table.find_by_bssid(target).is_some() {
            Some(ResultCode::AlreadyJoinedOrStarted)
        } else {
            None
        };
        if let Some(result) = rejected {
            warn!("reject reassoc {} -> {}: {:?}", session.bssid, target, result);
            self.emitter.answer(&SmeRequest::Reassoc(req), result);
            return Ok(());
        }

        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        let request = MgmtFrame::reassoc_request(
            session.self_addr,
            target,
            session.bssid,
            capability_field(&session.requested),
            request_ies(session),
        );
        info!("reassociate {} -> {}, session {}", session.bssid, target, id);
        session.set_state(LinkState::Reassociating(ReassocAttempt {
            target,
            step: ReassocStep::Request,
        }));
        self.timers.disarm(id, TimerKind::Heartbeat);
        self.emitter.transmit(request);
        self.arm(id, TimerKind::Reassoc);
        Ok(())
    }

    fn on_reassoc_response(&mut self, id: SessionId, frame: MgmtFrame) -> Result<(), Error> {
        let body = match &frame.body {
            FrameBody::ReassocResponse(body) => body,
            _ => return Ok(()),
        };
        let session = self.session(id)?;
        let target = match session.state() {
            LinkState::Reassociating(ReassocAttempt {
                target,
                step: ReassocStep::Request,
            }) if *target == frame.sa => *target,
            other => {
                debug!("unexpected reassoc response from {} in {}", frame.sa, other);
                return Ok(());
            }
        };
        self.timers.disarm(id, TimerKind::Reassoc);

        if !body.status.is_success() {
            warn!("reassoc with {} refused, status {}", target, body.status.0);
            return self.rollback_reassoc(id, body.status);
        }

        let bss_index = self.bss_index(id)?;
        let session = self.session_mut(id)?;
        let aid = body.aid & 0x3fff;
        let capabilities = session
            .requested
            .negotiate(&Capabilities::from_ies(&body.ies));
        let params = AddStaParams {
            bss_index,
            peer: target,
            aid,
            capabilities: capabilities.clone(),
            update: true,
        };
        session.set_state(LinkState::Reassociating(ReassocAttempt {
            target,
            step: ReassocStep::AddSta {
                aid,
                capabilities,
                frame: frame.clone(),
            },
        }));
        self.issue(
            id,
            RequestKind::AddSta { peer: target },
            TimerKind::AddSta,
            |token| FirmwareCommand::AddSta { token, params },
        )
    }

    pub(super) fn on_reassoc_timeout(&mut self, id: SessionId) -> Result<(), Error> {
        if !matches!(
            self.session(id)?.state(),
            LinkState::Reassociating(ReassocAttempt {
                step: ReassocStep::Request,
                ..
            })
        ) {
            return Ok(());
        }
        warn!("reassoc on session {} timed out", id);
        self.rollback_reassoc(id, StatusCode::REFUSED)
    }

    pub(super) fn on_reassoc_sta_added(
        &mut self,
        id: SessionId,
        result: LowerResult<StaAdded>,
    ) -> Result<(), Error> {
        let (target, aid, capabilities, frame) = match self.session(id)?.state() {
            LinkState::Reassociating(ReassocAttempt {
                target,
                step:
                    ReassocStep::AddSta {
                        aid,
                        capabilities,
                        frame,
                    },
            }) => (*target, *aid, capabilities.clone(), frame.clone()),
            _ => return Ok(()),
        };

        let added = match result {
            Ok(added) => added,
            Err(failure) => {
                warn!("reassoc to {}: add sta failed: {:?}", target, failure);
                return self.rollback_reassoc(id, StatusCode::SUCCESS);
            }
        };
        if let Err(e) = self.table.rekey(id, target) {
            warn!("reassoc to {}: {}", target, e);
            return self.rollback_reassoc(id, StatusCode::SUCCESS);
        }

        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        session.sta_index = Some(added.sta_index);
        session.aid = Some(aid);
        session.ucast_sig = added.ucast_sig;
        session.bcast_sig = added.bcast_sig;
        session.beacons_seen = 0;
        session.heartbeat_misses = 0;
        session.freeze_capabilities(capabilities.clone());
        session.set_state(LinkState::Connected { addts: None });
        let response = JoinResponse {
            iface_id: session.iface_id,
            bssid: target,
            result: ResultCode::Success,
            protocol_status: StatusCode::SUCCESS,
            bss_index: session.bss_index,
            sta_index: session.sta_index,
            aid: Some(aid),
            ucast_sig: added.ucast_sig,
            bcast_sig: added.bcast_sig,
            capabilities: Some(capabilities),
            frames: vec![frame],
        };
        info!("reassociated to {}, aid {}, session {}", target, aid, id);
        self.arm(id, TimerKind::Heartbeat);
        self.emitter.indicate(Indication::Reassoc(response));
        Ok(())
    }

    /// 重关联失败，回到原来的连接
    pub(super) fn rollback_reassoc(
        &mut self,
        id: SessionId,
        status: StatusCode,
    ) -> Result<(), Error> {
        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        session.set_state(LinkState::Connected { addts: None });
        let mut response =
            JoinResponse::failure(session.iface_id, session.bssid, ResultCode::ReassocFailure);
        response.protocol_status = status;
        warn!("reassoc failed, staying with {}", session.bssid);
        self.arm(id, TimerKind::Heartbeat);
        self.emitter.indicate(Indication::Reassoc(response));
        Ok(())
    }

    /// 周期检查：连续 heartbeat_threshold 个周期没有收到信标判定链路丢失
    pub(super) fn on_heartbeat(&mut self, id: SessionId) -> Result<(), Error> {
        let threshold = self.session_cfg.heartbeat_threshold;
        let session = self.session_mut(id)?;
        if !matches!(session.state(), LinkState::Connected { .. }) {
            return Ok(());
        }
        if session.beacons_seen == 0 {
            session.heartbeat_misses += 1;
        } else {
            session.heartbeat_misses = 0;
        }
        session.beacons_seen = 0;

        if session.heartbeat_misses >= threshold {
            warn!(
                "no beacon from {} for {} periods",
                session.bssid, session.heartbeat_misses
            );
            return self.link_lost(id);
        }
        self.arm(id, TimerKind::Heartbeat);
        Ok(())
    }

    pub(super) fn on_missed_beacon(&mut self, id: SessionId) -> Result<(), Error> {
        let session = self.session(id)?;
        if session.role.joins() && matches!(session.state(), LinkState::Connected { .. }) {
            warn!("firmware reports beacon loss on {}", session.bssid);
            self.link_lost(id)
        } else {
            debug!("ignore missed beacon on session {} in {}", id, session.state());
            Ok(())
        }
    }

    fn link_lost(&mut self, id: SessionId) -> Result<(), Error> {
        let peer = self.session(id)?.bssid;
        self.begin_disconnect(
            id,
            Disconnect {
                kind: DisconnectKind::Deauth,
                origin: Origin::LinkLost,
                peer,
                reason: ReasonCode::INACTIVITY,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::MacAddr,
        mlme::{
            machine::harness::*,
            state::{MlmState, SmeState},
            DisconnectConfirm, DisconnectIndication, FwStatus, Lower,
        },
    };

    #[test]
    fn join_happy_path() {
        let mut h = Harness::new();
        h.request(SmeRequest::Join(join_request(AP)));
        let id = h.id(AP);
        assert_eq!(h.pair(id), (SmeState::WaitingJoin, MlmState::WaitingAddBssResponse));

        let add_bss = h.command();
        assert!(
            matches!(add_bss, FirmwareCommand::AddBss { ref params, .. } if params.bssid == AP)
        );
        h.respond(&add_bss, FwStatus::Success);
        assert_eq!(h.pair(id), (SmeState::WaitingAuth, MlmState::WaitingAuthFrame2));
        let sent = h.transmitted();
        assert!(matches!(
            sent.as_slice(),
            [MgmtFrame { body: FrameBody::Auth(body), .. }] if body.seq == 1
        ));

        h.frame(auth_reply(StatusCode::SUCCESS));
        assert_eq!(h.pair(id), (SmeState::WaitingAssoc, MlmState::WaitingAssocResponse));
        assert_eq!(h.transmitted()[0].subtype(), Subtype::AssocRequest);

        h.frame(assoc_reply(StatusCode::SUCCESS));
        assert_eq!(h.pair(id), (SmeState::WaitingAssoc, MlmState::WaitingAddStaResponse));
        h.complete(FwStatus::Success);
        assert_eq!(
            h.pair(id),
            (SmeState::LinkEstablished, MlmState::LinkEstablished)
        );

        let indications = h.indications();
        assert_eq!(indications.len(), 1);
        match &indications[0] {
            Indication::Join(response) => {
                assert_eq!(response.result, ResultCode::Success);
                assert_eq!(response.aid, Some(7));
                assert_eq!(response.frames.len(), 1);
                let caps = response.capabilities.as_ref().unwrap();
                assert!(caps.qos && caps.ht);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(h.machine.timers.is_armed(id, TimerKind::Heartbeat));
    }

    #[test]
    fn duplicate_join_rejected() {
        let mut h = Harness::new();
        h.request(SmeRequest::Join(join_request(AP)));
        h.request(SmeRequest::Join(join_request(AP)));

        let indications = h.indications();
        assert_eq!(indications.len(), 1);
        assert_eq!(indications[0].result(), Some(ResultCode::AlreadyJoinedOrStarted));
        assert_eq!(h.commands().len(), 1);
        assert_eq!(h.machine.session_count(), 1);
        // 第一个 join 不受影响
        assert_eq!(
            h.pair(h.id(AP)),
            (SmeState::WaitingJoin, MlmState::WaitingAddBssResponse)
        );
    }

    #[test]
    fn invalid_join_creates_nothing() {
        let mut h = Harness::new();
        let mut req = join_request(AP);
        req.self_addr = AP;
        h.request(SmeRequest::Join(req));
        h.request(SmeRequest::Join(join_request(MacAddr::BROADCAST)));

        let results: Vec<_> = h.indications().iter().map(|i| i.result()).collect();
        assert_eq!(results, vec![Some(ResultCode::InvalidParameters); 2]);
        assert_eq!(h.machine.session_count(), 0);
    }

    #[test]
    fn oversized_ssid_rejected() {
        let mut h = Harness::new();
        let mut req = join_request(AP);
        req.ssid = Bytes::from(vec![b'a'; 300]);
        h.request(SmeRequest::Join(req));

        assert_eq!(h.indications()[0].result(), Some(ResultCode::InvalidParameters));
        assert_eq!(h.machine.session_count(), 0);

        let mut req = join_request(AP);
        req.ssid = Bytes::from(vec![b'a'; ie::MAX_SSID_LEN]);
        h.request(SmeRequest::Join(req));
        assert_eq!(h.machine.session_count(), 1);
    }

    #[test]
    fn full_table_is_resource_failure() {
        let mut h = Harness::with_config(crate::config::Session {
            max_sessions: 1,
            ..Default::default()
        });
        h.request(SmeRequest::Join(join_request(AP)));
        h.request(SmeRequest::Join(join_request(AP2)));

        let indications = h.indications();
        assert_eq!(indications[0].result(), Some(ResultCode::ResourcesUnavailable));
    }

    #[test]
    fn auth_refused_unwinds_bss() {
        let mut h = Harness::new();
        h.request(SmeRequest::Join(join_request(AP)));
        let id = h.id(AP);
        h.complete(FwStatus::Success);
        h.lower();

        h.frame(auth_reply(StatusCode::REFUSED));
        assert_eq!(h.pair(id), (SmeState::WaitingJoin, MlmState::WaitingDeleteBssResponse));
        assert!(h.indications().is_empty());

        let delete = h.complete(FwStatus::Success);
        assert!(matches!(delete, FirmwareCommand::DeleteBss { .. }));
        assert!(h.machine.info(id).is_none());
        let indications = h.indications();
        assert_eq!(indications.len(), 1);
        match &indications[0] {
            Indication::Join(response) => {
                assert_eq!(response.result, ResultCode::AuthFailure);
                assert_eq!(response.protocol_status, StatusCode::REFUSED);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn assoc_timeout_then_late_response() {
        let mut h = Harness::new();
        h.request(SmeRequest::Join(join_request(AP)));
        let id = h.id(AP);
        h.complete(FwStatus::Success);
        h.frame(auth_reply(StatusCode::SUCCESS));
        h.lower();

        h.fire(id, TimerKind::Assoc);
        // 迟到的 assoc response 不再推进 join
        h.frame(assoc_reply(StatusCode::SUCCESS));
        let delete = h.command();
        assert!(matches!(delete, FirmwareCommand::DeleteBss { .. }));
        h.respond(&delete, FwStatus::Success);

        let indications = h.indications();
        assert_eq!(indications.len(), 1);
        assert_eq!(indications[0].result(), Some(ResultCode::AssocFailure));
    }

    #[test]
    fn assoc_response_wins_over_timer() {
        let mut h = Harness::new();
        h.request(SmeRequest::Join(join_request(AP)));
        let id = h.id(AP);
        h.complete(FwStatus::Success);
        h.frame(auth_reply(StatusCode::SUCCESS));
        let assoc_timer = h.token(id, TimerKind::Assoc);

        h.frame(assoc_reply(StatusCode::SUCCESS));
        h.machine.handle_timeout(assoc_timer).unwrap();
        h.complete(FwStatus::Success);

        let indications = h.indications();
        assert_eq!(indications.len(), 1);
        assert_eq!(indications[0].result(), Some(ResultCode::Success));
    }

    #[test]
    fn deauth_during_add_bss_is_folded_into_abort() {
        let mut h = Harness::new();
        h.request(SmeRequest::Join(join_request(AP)));
        let id = h.id(AP);
        let add_bss = h.command();

        h.request(SmeRequest::Deauth(disconnect(AP, AP)));
        assert_eq!(
            h.pair(id),
            (SmeState::WaitingDeauth, MlmState::WaitingAddBssResponse)
        );
        assert!(h.lower().is_empty());

        h.respond(&add_bss, FwStatus::Success);
        assert_eq!(
            h.pair(id),
            (SmeState::WaitingDeauth, MlmState::WaitingDeleteBssResponse)
        );
        h.complete(FwStatus::Success);

        let indications = h.indications();
        assert_eq!(indications.len(), 2);
        assert_eq!(indications[0].result(), Some(ResultCode::JoinAborted));
        assert_eq!(
            indications[1],
            Indication::DeauthConfirm(DisconnectConfirm {
                iface_id: 1,
                bssid: AP,
                peer: AP,
                result: ResultCode::Success,
            })
        );
    }

    #[test]
    fn deauth_during_auth_unwinds_now() {
        let mut h = Harness::new();
        h.request(SmeRequest::Join(join_request(AP)));
        let id = h.id(AP);
        h.complete(FwStatus::Success);
        h.lower();

        h.request(SmeRequest::Deauth(disconnect(AP, AP)));
        assert!(!h.machine.timers.is_armed(id, TimerKind::Auth));
        let lower = h.lower();
        assert!(matches!(
            &lower[0],
            Lower::Transmit(MgmtFrame { body: FrameBody::Deauth { .. }, .. })
        ));
        assert!(matches!(
            &lower[1],
            Lower::Command(FirmwareCommand::DeleteBss { .. })
        ));
    }

    #[test]
    fn disassoc_during_join_is_unexpected() {
        let mut h = Harness::new();
        h.request(SmeRequest::Join(join_request(AP)));
        let id = h.id(AP);
        h.lower();

        h.request(SmeRequest::Disassoc(disconnect(AP, AP)));
        assert_eq!(
            h.indications()[0].result(),
            Some(ResultCode::UnexpectedRequest)
        );
        assert_eq!(
            h.pair(id),
            (SmeState::WaitingJoin, MlmState::WaitingAddBssResponse)
        );
    }

    #[test]
    fn add_sta_failure_fails_join() {
        let mut h = Harness::new();
        h.request(SmeRequest::Join(join_request(AP)));
        h.complete(FwStatus::Success);
        h.frame(auth_reply(StatusCode::SUCCESS));
        h.frame(assoc_reply(StatusCode::SUCCESS));
        h.complete(FwStatus::Failure(3));
        // sta 没有建立，直接删除 bss
        let delete = h.complete(FwStatus::Success);
        assert!(matches!(delete, FirmwareCommand::DeleteBss { .. }));

        let indications = h.indications();
        assert_eq!(indications.len(), 1);
        assert_eq!(indications[0].result(), Some(ResultCode::AssocFailure));
    }

    #[test]
    fn heartbeat_loss_tears_down_link() {
        let mut h = Harness::new();
        let id = h.join(AP);

        // 有信标的周期重置计数
        h.fire(id, TimerKind::Heartbeat);
        h.frame(MgmtFrame {
            da: MacAddr::BROADCAST,
            sa: AP,
            bssid: AP,
            seq: 0,
            body: FrameBody::Beacon(crate::frame::BeaconBody {
                timestamp: 0,
                beacon_interval: 100,
                capability: 1,
                ies: Bytes::new(),
            }),
        });
        h.fire(id, TimerKind::Heartbeat);
        assert_eq!(h.machine.session(id).unwrap().heartbeat_misses, 0);

        for _ in 0..3 {
            h.fire(id, TimerKind::Heartbeat);
        }
        assert_eq!(
            h.pair(id),
            (SmeState::WaitingDeauth, MlmState::WaitingDeleteStaResponse)
        );
        // 链路丢失时不发送帧
        assert!(h.transmitted().is_empty());
    }

    #[test]
    fn link_lost_reports_inactivity() {
        let mut h = Harness::new();
        let id = h.join(AP);
        let bss_index = h.machine.session(id).unwrap().bss_index.unwrap();

        h.machine
            .handle_indication(crate::mlme::FirmwareIndication::MissedBeacon { bss_index })
            .unwrap();
        h.complete(FwStatus::Success);
        h.complete(FwStatus::Success);

        assert_eq!(
            h.indications(),
            vec![Indication::DeauthIndication(DisconnectIndication {
                iface_id: 1,
                bssid: AP,
                peer: AP,
                reason: ReasonCode::INACTIVITY,
            })]
        );
        assert_eq!(h.machine.session_count(), 0);
    }

    #[test]
    fn reassoc_success_rekeys_session() {
        let mut h = Harness::new();
        let id = h.join(AP);

        h.request(SmeRequest::Reassoc(ReassocRequest {
            iface_id: 1,
            bssid: AP,
            target: AP2,
        }));
        assert_eq!(
            h.pair(id),
            (SmeState::WaitingReassoc, MlmState::WaitingReassocResponse)
        );
        assert_eq!(h.transmitted()[0].subtype(), Subtype::ReassocRequest);

        h.frame(MgmtFrame::assoc_response(
            AP2,
            SELF,
            true,
            StatusCode::SUCCESS,
            9,
            caps().to_ies(),
        ));
        let add_sta = h.command();
        assert!(matches!(
            add_sta,
            FirmwareCommand::AddSta { ref params, .. } if params.update && params.peer == AP2
        ));
        h.respond(&add_sta, FwStatus::Success);

        assert_eq!(h.id(AP2), id);
        assert!(h.machine.find_by_bssid(AP).is_none());
        let info = h.machine.info(id).unwrap();
        assert_eq!(info.aid, Some(9));
        assert_eq!(info.sme_state, SmeState::LinkEstablished);
        assert_eq!(h.indications()[0].result(), Some(ResultCode::Success));
    }

    #[test]
    fn reassoc_timeout_rolls_back() {
        let mut h = Harness::new();
        let id = h.join(AP);
        h.request(SmeRequest::Reassoc(ReassocRequest {
            iface_id: 1,
            bssid: AP,
            target: AP2,
        }));

        h.fire(id, TimerKind::Reassoc);
        let info = h.machine.info(id).unwrap();
        assert_eq!(info.bssid, AP);
        assert_eq!(info.sme_state, SmeState::LinkEstablished);
        assert_eq!(info.prev_sme_state, SmeState::WaitingReassoc);
        assert_eq!(info.aid, Some(7));
        assert_eq!(h.indications()[0].result(), Some(ResultCode::ReassocFailure));
        assert!(h.machine.timers.is_armed(id, TimerKind::Heartbeat));
    }

    #[test]
    fn reassoc_requires_established_link() {
        let mut h = Harness::new();
        h.request(SmeRequest::Join(join_request(AP)));
        h.request(SmeRequest::Reassoc(ReassocRequest {
            iface_id: 1,
            bssid: AP,
            target: AP2,
        }));

        assert_eq!(
            h.indications()[0].result(),
            Some(ResultCode::UnexpectedRequest)
        );
    }
}
