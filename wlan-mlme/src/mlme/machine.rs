//! 连接状态机
//! 只在分发器所在的单个任务里运行，所有等待都表示为“登记在途请求 + 启动定时器”，
//! 之后由回复、帧或者定时器消息推进

use std::time::Duration;

use log::{debug, error, warn};

use crate::{
    config,
    frame::{FrameBody, MacAddr, MgmtFrame, Subtype},
};

use super::{
    emitter::Emitter,
    pending::{PendingTracker, RequestClass, RequestKind, Resolution},
    session::{Session, SessionInfo},
    state::{DisconnectKind, LinkState, PeerOp, ReassocAttempt, ReassocStep},
    table::SessionTable,
    timer::{Firing, Scheduler, TimerBank, TimerKind, TimerToken},
    AddBssParams, BssIndex, Error, FirmwareCommand, FirmwareIndication, FirmwareResponse,
    FwStatus, Incoming, Lower, RequestToken, ResultCode, SessionId, SmeRequest, StaIndex,
};

/// 看门狗定时器
const WATCHDOGS: [TimerKind; 7] = [
    TimerKind::Join,
    TimerKind::AddBss,
    TimerKind::AddSta,
    TimerKind::DeleteSta,
    TimerKind::DeleteBss,
    TimerKind::SetKey,
    TimerKind::SwitchChannel,
];

/// 底层请求失败的两种方式，对外的结果相同
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LowerFailure {
    Status(u32),
    Timeout,
}

pub(super) type LowerResult<T> = Result<T, LowerFailure>;

fn lower_result(status: FwStatus) -> LowerResult<()> {
    match status {
        FwStatus::Success => Ok(()),
        FwStatus::Failure(code) => Err(LowerFailure::Status(code)),
    }
}

/// add sta 成功后底层分配的资源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct StaAdded {
    pub sta_index: StaIndex,
    pub ucast_sig: u8,
    pub bcast_sig: u8,
}

/// 一条消息处理完后对分发器的要求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// 会话开始了一个独占的交互（ADDTS），暂停处理上层请求
    Suspend(SessionId),
    Resume(SessionId),
}

pub(crate) struct StateMachine<S> {
    pub(super) session_cfg: config::Session,
    pub(super) timeouts: config::Timeouts,
    pub(super) table: SessionTable,
    pub(super) pending: PendingTracker,
    pub(super) timers: TimerBank<S>,
    pub(super) emitter: Emitter,
    flow: Option<Flow>,
}

impl<S: Scheduler> StateMachine<S> {
    pub(crate) fn new(
        session_cfg: config::Session,
        timeouts: config::Timeouts,
        scheduler: S,
        emitter: Emitter,
    ) -> Self {
        Self {
            table: SessionTable::new(session_cfg.max_sessions),
            session_cfg,
            timeouts,
            pending: PendingTracker::new(),
            timers: TimerBank::new(scheduler),
            emitter,
            flow: None,
        }
    }

    /// 上层请求
    pub(crate) fn handle_request(&mut self, request: SmeRequest) -> Result<(), Error> {
        debug!("sme {} request for {}", request.name(), request.bssid());
        let id = match request {
            SmeRequest::StartBss(req) => return self.start_bss(req),
            SmeRequest::Join(req) => return self.join(req),
            ref other => match self.table.find_by_bssid(other.bssid()) {
                Some(id) => id,
                None => {
                    debug!("no session for {} request on {}", other.name(), other.bssid());
                    self.emitter
                        .answer(other, ResultCode::UnexpectedRequest);
                    return Ok(());
                }
            },
        };
        match request {
            SmeRequest::StopBss(req) => self.stop_bss(id, req),
            SmeRequest::Reassoc(req) => self.reassoc(id, req),
            SmeRequest::Disassoc(req) => self.disconnect_request(id, DisconnectKind::Disassoc, req),
            SmeRequest::Deauth(req) => self.disconnect_request(id, DisconnectKind::Deauth, req),
            SmeRequest::SetKeys(req) => self.set_keys(id, req),
            SmeRequest::SwitchChannel(req) => self.switch_channel(id, req),
            SmeRequest::AddTs(req) => self.add_ts(id, req),
            SmeRequest::StartBss(_) | SmeRequest::Join(_) => Ok(()),
        }
    }

    /// 固件回复，过期回复直接丢弃
    pub(crate) fn handle_response(&mut self, response: FirmwareResponse) -> Result<(), Error> {
        let entry = match self.pending.resolve(&response) {
            Resolution::Matched(entry) => entry,
            Resolution::Stale => return Ok(()),
        };
        let id = response.token().session;
        self.disarm_watchdog(id, entry.kind.class());
        debug!(
            "{} response on session {}: {:?}",
            response.name(),
            id,
            response.status()
        );

        match response {
            FirmwareResponse::AddBss {
                status, bss_index, ..
            } => self.on_add_bss(id, lower_result(status).map(|_| bss_index)),
            FirmwareResponse::AddSta {
                status,
                sta_index,
                ucast_sig,
                bcast_sig,
                ..
            } => self.on_add_sta(
                id,
                lower_result(status).map(|_| StaAdded {
                    sta_index,
                    ucast_sig,
                    bcast_sig,
                }),
            ),
            FirmwareResponse::DeleteSta { status, .. } => {
                self.on_delete_sta(id, lower_result(status))
            }
            FirmwareResponse::DeleteBss { status, .. } => {
                self.on_delete_bss(id, lower_result(status))
            }
            FirmwareResponse::SetKey { status, .. } => self.on_set_key(id, lower_result(status)),
            FirmwareResponse::SwitchChannel { status, .. } => {
                self.on_switch_channel(id, entry.kind, lower_result(status))
            }
        }
    }

    /// 定时器到期，过期的到期直接丢弃
    /// 看门狗超时与底层明确返回失败走同一条路径
    pub(crate) fn handle_timeout(&mut self, token: TimerToken) -> Result<(), Error> {
        if self.timers.fire(token) == Firing::Stale {
            return Ok(());
        }
        let id = token.session;

        if let Some(class) = token.kind.watched_class() {
            let entry = match self.pending.expire(id, class) {
                Some(entry) => entry,
                None => {
                    debug!("{:?} timer on session {} guards nothing", token.kind, id);
                    return Ok(());
                }
            };
            warn!("{:?} request on session {} timed out", entry.kind, id);
            return match entry.kind {
                RequestKind::AddBss => self.on_add_bss(id, Err(LowerFailure::Timeout)),
                RequestKind::AddSta { .. } => self.on_add_sta(id, Err(LowerFailure::Timeout)),
                RequestKind::DeleteSta { .. } => {
                    self.on_delete_sta(id, Err(LowerFailure::Timeout))
                }
                RequestKind::DeleteBss => self.on_delete_bss(id, Err(LowerFailure::Timeout)),
                RequestKind::SetKey { .. } => self.on_set_key(id, Err(LowerFailure::Timeout)),
                RequestKind::SwitchChannel { .. } => {
                    self.on_switch_channel(id, entry.kind, Err(LowerFailure::Timeout))
                }
            };
        }

        match token.kind {
            TimerKind::Auth => self.on_auth_timeout(id),
            TimerKind::Assoc => self.on_assoc_timeout(id),
            TimerKind::Reassoc => self.on_reassoc_timeout(id),
            TimerKind::Heartbeat => self.on_heartbeat(id),
            TimerKind::AddTs => self.on_add_ts_timeout(id),
            other => {
                error!("watchdog {:?} without request class", other);
                Ok(())
            }
        }
    }

    pub(crate) fn handle_indication(
        &mut self,
        indication: FirmwareIndication,
    ) -> Result<(), Error> {
        match indication {
            FirmwareIndication::MissedBeacon { bss_index } => {
                match self.table.find_by_bss_index(bss_index) {
                    Some(id) => self.on_missed_beacon(id),
                    None => {
                        debug!("missed beacon on unknown bss {:?}", bss_index);
                        Ok(())
                    }
                }
            }
        }
    }

    /// 已经确定归属会话的管理帧
    pub(crate) fn handle_frame(&mut self, id: SessionId, frame: MgmtFrame) -> Result<(), Error> {
        if self.session(id)?.role.admits_peers() {
            self.ap_frame(id, frame)
        } else {
            self.station_frame(id, frame)
        }
    }

    /// 为收到的帧找到会话：先按 bssid，认证、重关联响应和 action 帧再按发送方地址
    pub(crate) fn resolve_frame(&self, frame: &MgmtFrame) -> Option<SessionId> {
        if let Some(id) = self.table.find_by_bssid(frame.bssid) {
            return Some(id);
        }
        match frame.subtype() {
            Subtype::Auth | Subtype::ReassocResponse | Subtype::Action => {
                self.table.find_by_peer(frame.sa)
            }
            _ => None,
        }
    }

    /// 会话正忙：该消息需要的请求类别仍有在途请求，或者 AP 正在增删对端
    pub(crate) fn is_busy(&self, msg: &Incoming) -> bool {
        match msg {
            Incoming::Sme(request) => {
                let session = match self
                    .table
                    .find_by_bssid(request.bssid())
                    .and_then(|id| self.table.get(id))
                {
                    Some(session) => session,
                    None => return false,
                };
                match request {
                    SmeRequest::SetKeys(_) => {
                        self.pending.is_outstanding(session.id, RequestClass::Key)
                    }
                    SmeRequest::SwitchChannel(_) => {
                        self.pending.is_outstanding(session.id, RequestClass::Channel)
                    }
                    SmeRequest::StopBss(_) => {
                        matches!(session.state(), LinkState::BssActive { op: Some(_) })
                    }
                    SmeRequest::Disassoc(req) | SmeRequest::Deauth(req) => {
                        busy_for_disconnect(session.state(), req.peer)
                    }
                    SmeRequest::StartBss(_)
                    | SmeRequest::Join(_)
                    | SmeRequest::Reassoc(_)
                    | SmeRequest::AddTs(_) => false,
                }
            }
            Incoming::Frame(frame) => {
                let session = match self.resolve_frame(frame).and_then(|id| self.table.get(id)) {
                    Some(session) => session,
                    None => return false,
                };
                match &frame.body {
                    FrameBody::AssocRequest(_) | FrameBody::ReassocRequest(_) => {
                        matches!(session.state(), LinkState::BssActive { op: Some(_) })
                    }
                    FrameBody::Disassoc { .. } | FrameBody::Deauth { .. } => {
                        busy_for_disconnect(session.state(), frame.sa)
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    pub(crate) fn take_flow(&mut self) -> Option<Flow> {
        self.flow.take()
    }

    pub(crate) fn info(&self, id: SessionId) -> Option<SessionInfo> {
        self.table.get(id).map(Session::info)
    }

    pub(crate) fn find_by_bssid(&self, bssid: MacAddr) -> Option<SessionInfo> {
        self.table.find_by_bssid(bssid).and_then(|id| self.info(id))
    }

    pub(crate) fn find_by_iface(&self, iface_id: u16) -> Option<SessionInfo> {
        self.table.find_by_iface(iface_id).and_then(|id| self.info(id))
    }

    pub(crate) fn session_count(&self) -> usize {
        self.table.len()
    }

    pub(crate) fn outstanding_requests(&self) -> usize {
        self.pending.len()
    }

    pub(super) fn session(&self, id: SessionId) -> Result<&Session, Error> {
        self.table.get(id).ok_or(Error::SessionNotFound(id))
    }

    pub(super) fn session_mut(&mut self, id: SessionId) -> Result<&mut Session, Error> {
        self.table.get_mut(id).ok_or(Error::SessionNotFound(id))
    }

    pub(super) fn timeout(&self, kind: TimerKind) -> Duration {
        let t = &self.timeouts;
        let ms = match kind {
            TimerKind::Join => t.join,
            TimerKind::Auth => t.auth,
            TimerKind::Assoc => t.assoc,
            TimerKind::Reassoc => t.reassoc,
            TimerKind::Heartbeat => t.heartbeat,
            TimerKind::AddTs => t.add_ts,
            TimerKind::AddBss => t.add_bss,
            TimerKind::AddSta => t.add_sta,
            TimerKind::DeleteSta => t.delete_sta,
            TimerKind::DeleteBss => t.delete_bss,
            TimerKind::SetKey => t.set_key,
            TimerKind::SwitchChannel => t.switch_channel,
        };
        Duration::from_millis(ms)
    }

    pub(super) fn arm(&mut self, id: SessionId, kind: TimerKind) {
        let after = self.timeout(kind);
        self.timers.arm(id, kind, after);
    }

    /// 向底层发送命令：登记在途请求并启动看门狗
    pub(super) fn issue<F>(
        &mut self,
        id: SessionId,
        kind: RequestKind,
        watchdog: TimerKind,
        build: F,
    ) -> Result<(), Error>
    where
        F: FnOnce(RequestToken) -> FirmwareCommand,
    {
        let after = self.timeout(watchdog);
        let token = self.pending.issue(id, kind, after).map_err(|e| {
            error!("contract violation: {}", e);
            e
        })?;
        self.timers.arm(id, watchdog, after);
        self.emitter.lower(Lower::Command(build(token)));
        Ok(())
    }

    pub(super) fn disarm_watchdog(&mut self, id: SessionId, class: RequestClass) {
        for kind in WATCHDOGS {
            if kind.watched_class() == Some(class) {
                self.timers.disarm(id, kind);
            }
        }
    }

    /// 删除会话，同时作废它所有的定时器和在途请求
    pub(super) fn destroy(&mut self, id: SessionId) -> Result<Session, Error> {
        self.timers.disarm_all(id);
        for entry in self.pending.cancel_all(id) {
            debug!("drop outstanding {:?} of session {}", entry.kind, id);
        }
        let session = self.table.remove(id).ok_or(Error::SessionNotFound(id))?;
        self.resume(id);
        debug!("session {} ({}) removed", id, session.bssid);
        Ok(session)
    }

    pub(super) fn suspend(&mut self, id: SessionId) {
        self.flow = Some(Flow::Suspend(id));
    }

    pub(super) fn resume(&mut self, id: SessionId) {
        self.flow = Some(Flow::Resume(id));
    }

    pub(super) fn bss_index(&self, id: SessionId) -> Result<BssIndex, Error> {
        self.session(id)?.bss_index.ok_or(Error::MissingResource {
            session: id,
            what: "bss index",
        })
    }

    pub(super) fn on_add_bss(
        &mut self,
        id: SessionId,
        result: LowerResult<BssIndex>,
    ) -> Result<(), Error> {
        match self.session(id)?.state() {
            LinkState::Starting => self.on_bss_started(id, result),
            LinkState::Joining(_) => self.on_join_bss_added(id, result),
            other => {
                error!("add-bss completion on session {} in state {}", id, other);
                Ok(())
            }
        }
    }

    pub(super) fn on_add_sta(
        &mut self,
        id: SessionId,
        result: LowerResult<StaAdded>,
    ) -> Result<(), Error> {
        match self.session(id)?.state() {
            LinkState::BssActive {
                op: Some(PeerOp::Adding { .. }),
            } => self.on_peer_added(id, result),
            LinkState::Joining(_) => self.on_join_sta_added(id, result),
            LinkState::Reassociating(ReassocAttempt {
                step: ReassocStep::AddSta { .. },
                ..
            }) => self.on_reassoc_sta_added(id, result),
            other => {
                error!("add-sta completion on session {} in state {}", id, other);
                Ok(())
            }
        }
    }

    pub(super) fn on_delete_sta(
        &mut self,
        id: SessionId,
        result: LowerResult<()>,
    ) -> Result<(), Error> {
        match self.session(id)?.state() {
            LinkState::TearingDown(_) => self.on_teardown_sta_deleted(id, result),
            LinkState::BssActive {
                op: Some(PeerOp::Removing { .. }),
            } => self.on_peer_removed(id, result),
            other => {
                error!("delete-sta completion on session {} in state {}", id, other);
                Ok(())
            }
        }
    }

    pub(super) fn on_delete_bss(
        &mut self,
        id: SessionId,
        result: LowerResult<()>,
    ) -> Result<(), Error> {
        match self.session(id)?.state() {
            LinkState::TearingDown(_) => self.on_teardown_bss_deleted(id, result),
            other => {
                error!("delete-bss completion on session {} in state {}", id, other);
                Ok(())
            }
        }
    }
}

/// 针对某个对端的断开是否要等待当前对端操作完成；
/// 正在删除的同一个对端不需要等待，会被合并
fn busy_for_disconnect(state: &LinkState, peer: MacAddr) -> bool {
    match state {
        LinkState::BssActive { op: Some(op) } => {
            !(matches!(op, PeerOp::Removing { .. }) && op.peer() == peer)
        }
        LinkState::Reassociating(ReassocAttempt {
            step: ReassocStep::AddSta { .. },
            ..
        }) => true,
        _ => false,
    }
}

pub(super) fn add_bss_params(session: &Session) -> AddBssParams {
    AddBssParams {
        bssid: session.bssid,
        self_addr: session.self_addr,
        role: session.role,
        channel: session.channel,
        beacon_period: session.beacon_period,
        dtim_period: session.dtim_period,
        ssid: session.ssid.clone(),
    }
}

#[cfg(test)]
pub(super) mod harness {
    use bytes::Bytes;

    use super::*;
    use crate::{
        frame::{AuthAlgorithm, ReasonCode, StatusCode},
        mlme::{
            emitter::Captured,
            state::{MlmState, SmeState},
            timer::FakeScheduler,
            Capabilities, Channel, DisconnectRequest, Indication, JoinRequest, Role,
            StartBssRequest,
        },
    };

    pub const SELF: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
    pub const AP: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x01]);
    pub const AP2: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x02]);
    pub const STA1: MacAddr = MacAddr([0x02, 0xaa, 0, 0, 0, 0x01]);
    pub const STA2: MacAddr = MacAddr([0x02, 0xaa, 0, 0, 0, 0x02]);

    pub fn caps() -> Capabilities {
        Capabilities {
            rates: vec![2, 4, 11, 22, 108],
            ht: true,
            qos: true,
            ..Default::default()
        }
    }

    pub fn join_request(bssid: MacAddr) -> JoinRequest {
        JoinRequest {
            iface_id: 1,
            bssid,
            self_addr: SELF,
            role: Role::Station,
            ssid: Bytes::from_static(b"office"),
            channel: Channel::new(36),
            auth_type: AuthAlgorithm::OpenSystem,
            capabilities: caps(),
        }
    }

    pub fn start_request(bssid: MacAddr) -> StartBssRequest {
        StartBssRequest {
            iface_id: 2,
            bssid,
            self_addr: bssid,
            role: Role::AccessPoint,
            ssid: Bytes::from_static(b"lab"),
            channel: Channel::new(6),
            beacon_period: 100,
            dtim_period: 2,
            capabilities: caps(),
        }
    }

    pub fn disconnect(bssid: MacAddr, peer: MacAddr) -> DisconnectRequest {
        DisconnectRequest {
            iface_id: 1,
            bssid,
            peer,
            reason: ReasonCode::LEAVING_BSS,
        }
    }

    pub fn auth_reply(status: StatusCode) -> MgmtFrame {
        MgmtFrame::auth(AP, SELF, AP, AuthAlgorithm::OpenSystem, 2, status)
    }

    pub fn assoc_reply(status: StatusCode) -> MgmtFrame {
        MgmtFrame::assoc_response(AP, SELF, false, status, 7, caps().to_ies())
    }

    /// 为命令构造一个回复
    pub fn response_for(cmd: &FirmwareCommand, status: FwStatus) -> FirmwareResponse {
        match cmd {
            FirmwareCommand::AddBss { token, .. } => FirmwareResponse::AddBss {
                token: *token,
                status,
                bss_index: BssIndex(1),
            },
            FirmwareCommand::DeleteBss { token, .. } => FirmwareResponse::DeleteBss {
                token: *token,
                status,
            },
            FirmwareCommand::AddSta { token, params } => FirmwareResponse::AddSta {
                token: *token,
                status,
                sta_index: StaIndex(10 + params.aid),
                ucast_sig: 1,
                bcast_sig: 2,
            },
            FirmwareCommand::DeleteSta { token, .. } => FirmwareResponse::DeleteSta {
                token: *token,
                status,
            },
            FirmwareCommand::SetKey { token, .. } => FirmwareResponse::SetKey {
                token: *token,
                status,
            },
            FirmwareCommand::SwitchChannel { token, .. } => FirmwareResponse::SwitchChannel {
                token: *token,
                status,
            },
        }
    }

    pub struct Harness {
        pub machine: StateMachine<FakeScheduler>,
        pub out: Captured,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_config(config::Session::default())
        }

        pub fn with_config(session_cfg: config::Session) -> Self {
            let (emitter, out) = Captured::new();
            Self {
                machine: StateMachine::new(
                    session_cfg,
                    config::Timeouts::default(),
                    FakeScheduler::default(),
                    emitter,
                ),
                out,
            }
        }

        /// 取出目前为止发往底层的全部消息
        pub fn lower(&mut self) -> Vec<Lower> {
            self.out.lower_msgs()
        }

        pub fn commands(&mut self) -> Vec<FirmwareCommand> {
            self.lower()
                .into_iter()
                .filter_map(|msg| match msg {
                    Lower::Command(cmd) => Some(cmd),
                    _ => None,
                })
                .collect()
        }

        pub fn transmitted(&mut self) -> Vec<MgmtFrame> {
            self.lower()
                .into_iter()
                .filter_map(|msg| match msg {
                    Lower::Transmit(frame) => Some(frame),
                    _ => None,
                })
                .collect()
        }

        /// 取出唯一一条底层命令
        pub fn command(&mut self) -> FirmwareCommand {
            let mut cmds = self.commands();
            assert_eq!(cmds.len(), 1, "expected exactly one command: {:?}", cmds);
            cmds.remove(0)
        }

        pub fn indications(&mut self) -> Vec<Indication> {
            self.out.indications()
        }

        pub fn request(&mut self, request: SmeRequest) {
            self.machine.handle_request(request).unwrap();
        }

        pub fn respond(&mut self, cmd: &FirmwareCommand, status: FwStatus) {
            self.machine
                .handle_response(response_for(cmd, status))
                .unwrap();
        }

        /// 回复唯一一条待发命令
        pub fn complete(&mut self, status: FwStatus) -> FirmwareCommand {
            let cmd = self.command();
            self.respond(&cmd, status);
            cmd
        }

        pub fn frame(&mut self, frame: MgmtFrame) {
            let id = self.machine.resolve_frame(&frame).expect("frame has no session");
            self.machine.handle_frame(id, frame).unwrap();
        }

        pub fn token(&self, id: SessionId, kind: TimerKind) -> TimerToken {
            self.machine
                .timers
                .armed(id, kind)
                .unwrap_or_else(|| panic!("{:?} timer not armed", kind))
        }

        pub fn fire(&mut self, id: SessionId, kind: TimerKind) {
            let token = self.token(id, kind);
            self.machine.handle_timeout(token).unwrap();
        }

        pub fn pair(&self, id: SessionId) -> (SmeState, MlmState) {
            let info = self.machine.info(id).expect("session gone");
            (info.sme_state, info.mlm_state)
        }

        pub fn id(&self, bssid: MacAddr) -> SessionId {
            self.machine.table.find_by_bssid(bssid).expect("no session")
        }

        /// station 完整 join 到 LinkEstablished
        pub fn join(&mut self, bssid: MacAddr) -> SessionId {
            let mut req = join_request(bssid);
            req.iface_id = bssid.0[5] as u16;
            self.request(SmeRequest::Join(req));
            let id = self.id(bssid);
            self.complete(FwStatus::Success);
            self.frame(MgmtFrame::auth(
                bssid,
                SELF,
                bssid,
                AuthAlgorithm::OpenSystem,
                2,
                StatusCode::SUCCESS,
            ));
            self.frame(MgmtFrame::assoc_response(
                bssid,
                SELF,
                false,
                StatusCode::SUCCESS,
                7,
                caps().to_ies(),
            ));
            self.complete(FwStatus::Success);
            assert_eq!(
                self.pair(id),
                (SmeState::LinkEstablished, MlmState::LinkEstablished)
            );
            self.lower();
            self.indications();
            id
        }

        /// AP 启动完成
        pub fn start_ap(&mut self, bssid: MacAddr) -> SessionId {
            self.request(SmeRequest::StartBss(start_request(bssid)));
            let id = self.id(bssid);
            self.complete(FwStatus::Success);
            assert_eq!(
                self.pair(id),
                (SmeState::LinkEstablished, MlmState::BssStarted)
            );
            self.lower();
            self.indications();
            id
        }

        /// AP 上接纳一个对端
        pub fn admit(&mut self, bssid: MacAddr, peer: MacAddr) {
            self.frame(MgmtFrame::auth(
                peer,
                bssid,
                bssid,
                AuthAlgorithm::OpenSystem,
                1,
                StatusCode::SUCCESS,
            ));
            self.frame(MgmtFrame::assoc_request(peer, bssid, 0x0001, caps().to_ies()));
            self.complete(FwStatus::Success);
            self.lower();
            self.indications();
        }

        /// 所有会话都处于合法状态，每个会话每类最多一个在途请求，且没有不属于任何会话的在途请求
        pub fn check_invariants(&self) {
            let mut outstanding = 0;
            for session in self.machine.table.iter() {
                let (sme, mlm) = session.state().pair();
                assert!(
                    crate::mlme::state::is_valid_pair(sme, mlm),
                    "invalid pair {:?}/{:?}",
                    sme,
                    mlm
                );
                let classes = [RequestClass::Lifecycle, RequestClass::Key, RequestClass::Channel];
                for class in classes {
                    if let Some(entry) = self.machine.pending.outstanding(session.id, class) {
                        assert_eq!(entry.kind.class(), class, "session {}", session.id);
                        outstanding += 1;
                    }
                }
            }
            assert_eq!(
                self.machine.pending.len(),
                outstanding,
                "outstanding request of a removed session"
            );
        }
    }
}
