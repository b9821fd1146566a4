//! 自己建立的 BSS：start / stop bss，AP 上对端的认证、关联和离开

use bytes::Bytes;
use log::{debug, info, warn};

use crate::frame::{
    ie, AuthAlgorithm, FrameBody, MacAddr, MgmtFrame, ReasonCode, StatusCode, Subtype,
};

use super::{
    machine::{add_bss_params, LowerResult, StaAdded, StateMachine},
    pending::RequestKind,
    session::{PeerState, Session, SessionParams},
    state::{
        Disconnect, DisconnectKind, LinkState, Origin, PeerOp, Teardown, TeardownCause,
        TeardownStep,
    },
    table,
    teardown::{disconnect_frame, disconnect_notification, disconnect_request},
    timer::{Scheduler, TimerKind},
    AddStaParams, AssocIndication, BeaconControl, BssIndex, Capabilities, DisconnectRequest,
    Error, FirmwareCommand, Indication, Lower, ResultCode, SessionId, SmeRequest,
    StartBssRequest, StartBssResponse, StopBssRequest,
};

impl<S: Scheduler> StateMachine<S> {
    pub(super) fn start_bss(&mut self, req: StartBssRequest) -> Result<(), Error> {
        let (iface_id, bssid) = (req.iface_id, req.bssid);
        let reject = |result| {
            Indication::StartBss(StartBssResponse {
                iface_id,
                bssid,
                result,
                bss_index: None,
            })
        };
        if !req.role.starts()
            || bssid.is_zero()
            || bssid.is_multicast()
            || (req.role.beacons() && req.beacon_period == 0)
            || req.ssid.len() > ie::MAX_SSID_LEN
        {
            warn!("reject start bss {}: invalid parameters", bssid);
            self.emitter.indicate(reject(ResultCode::InvalidParameters));
            return Ok(());
        }

        let params = SessionParams {
            iface_id,
            bssid,
            self_addr: req.self_addr,
            role: req.role,
            channel: req.channel,
            ssid: req.ssid,
            beacon_period: req.beacon_period,
            dtim_period: req.dtim_period,
            auth_type: AuthAlgorithm::OpenSystem,
            capabilities: req.capabilities,
        };
        let id = match self.table.insert(bssid, |id| Session::new(id, params)) {
            Ok(id) => id,
            Err(e) => {
                warn!("reject start bss {}: {}", bssid, e);
                let result = match e {
                    table::Error::Duplicate(_) => ResultCode::AlreadyJoinedOrStarted,
                    _ => ResultCode::ResourcesUnavailable,
                };
                self.emitter.indicate(reject(result));
                return Ok(());
            }
        };

        info!("start {:?} bss {} on iface {}, session {}", req.role, bssid, iface_id, id);
        let session = self.session_mut(id)?;
        session.set_state(LinkState::Starting);
        let params = add_bss_params(session);
        self.issue(id, RequestKind::AddBss, TimerKind::AddBss, |token| {
            FirmwareCommand::AddBss { token, params }
        })
    }

    pub(super) fn on_bss_started(
        &mut self,
        id: SessionId,
        result: LowerResult<BssIndex>,
    ) -> Result<(), Error> {
        let bss_index = match result {
            Ok(bss_index) => bss_index,
            Err(failure) => {
                let session = self.destroy(id)?;
                warn!("start bss {} failed: {:?}", session.bssid, failure);
                self.emitter.indicate(Indication::StartBss(StartBssResponse {
                    iface_id: session.iface_id,
                    bssid: session.bssid,
                    result: ResultCode::StartFailure,
                    bss_index: None,
                }));
                return Ok(());
            }
        };

        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        session.bss_index = Some(bss_index);
        let capabilities = session.requested.clone();
        session.freeze_capabilities(capabilities);
        session.set_state(LinkState::BssActive { op: None });
        if session.role.beacons() {
            self.emitter.lower(Lower::Beacon(BeaconControl::Start {
                bss_index,
                bssid: session.bssid,
                beacon_period: session.beacon_period,
                dtim_period: session.dtim_period,
                ssid: session.ssid.clone(),
            }));
        }
        info!(
            "bss {} started on channel {}, bss index {}",
            session.bssid, session.channel.primary, bss_index.0
        );
        self.emitter.indicate(Indication::StartBss(StartBssResponse {
            iface_id: session.iface_id,
            bssid: session.bssid,
            result: ResultCode::Success,
            bss_index: Some(bss_index),
        }));
        Ok(())
    }

    pub(super) fn stop_bss(&mut self, id: SessionId, req: StopBssRequest) -> Result<(), Error> {
        let session = self.session(id)?;
        match session.state() {
            LinkState::BssActive { op: None } if session.role.starts() => {}
            LinkState::TearingDown(_) => return self.fold(id),
            other => {
                debug!("stop bss on session {} in {}", id, other);
                self.emitter
                    .answer(&SmeRequest::StopBss(req), ResultCode::UnexpectedRequest);
                return Ok(());
            }
        }

        self.fail_exchanges(id)?;
        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        if let (true, Some(bss_index)) = (session.role.beacons(), session.bss_index) {
            self.emitter
                .lower(Lower::Beacon(BeaconControl::Stop { bss_index }));
        }
        if session.role.admits_peers() && !session.peers.is_empty() {
            self.emitter.transmit(MgmtFrame::deauth(
                session.bssid,
                MacAddr::BROADCAST,
                session.bssid,
                req.reason,
            ));
        }
        // 只认证未关联的对端在底层没有条目
        session.peers.retain(|_, peer| peer.sta_index().is_some());
        let mut peers = session.associated_peers();
        let step = if peers.is_empty() {
            TeardownStep::DeleteBss
        } else {
            let peer = peers.remove(0);
            TeardownStep::DeleteSta {
                peer,
                remaining: peers,
            }
        };
        info!("stop bss {}, session {}", session.bssid, id);
        session.set_state(LinkState::TearingDown(Teardown {
            cause: TeardownCause::Stop { reason: req.reason },
            step,
            failed: false,
            folded: 0,
        }));
        self.issue_teardown_step(id)
    }

    pub(super) fn ap_frame(&mut self, id: SessionId, frame: MgmtFrame) -> Result<(), Error> {
        match frame.subtype() {
            Subtype::Auth => self.on_peer_auth(id, frame),
            Subtype::AssocRequest | Subtype::ReassocRequest => self.on_peer_assoc(id, frame),
            Subtype::Disassoc | Subtype::Deauth => self.on_peer_leave(id, frame),
            Subtype::Action => {
                self.emitter.indicate(Indication::ActionFrame(frame));
                Ok(())
            }
            other => {
                debug!("ignore {:?} from {} on session {}", other, frame.sa, id);
                Ok(())
            }
        }
    }

    fn on_peer_auth(&mut self, id: SessionId, frame: MgmtFrame) -> Result<(), Error> {
        let body = match &frame.body {
            FrameBody::Auth(body) => body,
            _ => return Ok(()),
        };
        let max_peers = self.session_cfg.max_peers;
        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        if !matches!(session.state(), LinkState::BssActive { .. }) || body.seq != 1 {
            debug!("drop auth seq {} from {} in {}", body.seq, frame.sa, session.state());
            return Ok(());
        }

        let peer = frame.sa;
        let status = if body.algorithm != AuthAlgorithm::OpenSystem {
            StatusCode::UNSUPPORTED_AUTH_ALGORITHM
        } else if !session.peers.contains_key(&peer) && session.peers.len() >= max_peers {
            StatusCode::AP_FULL
        } else {
            StatusCode::SUCCESS
        };
        if status.is_success() {
            session.peers.entry(peer).or_insert(PeerState::Authenticated);
            debug!("{} authenticated with {}", peer, session.bssid);
        } else {
            info!("refuse auth from {}, status {}", peer, status.0);
        }
        self.emitter.transmit(MgmtFrame::auth(
            session.bssid,
            peer,
            session.bssid,
            body.algorithm,
            2,
            status,
        ));
        Ok(())
    }

    fn on_peer_assoc(&mut self, id: SessionId, frame: MgmtFrame) -> Result<(), Error> {
        let (reassoc, body) = match &frame.body {
            FrameBody::AssocRequest(body) => (false, body),
            FrameBody::ReassocRequest(body) => (true, body),
            _ => return Ok(()),
        };
        let max_peers = self.session_cfg.max_peers;
        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        if !matches!(session.state(), LinkState::BssActive { op: None }) {
            debug!("drop assoc request from {} in {}", frame.sa, session.state());
            return Ok(());
        }

        let (peer, bssid) = (frame.sa, session.bssid);
        let (aid, update) = match session.peers.get(&peer) {
            None => {
                warn!("assoc request from unauthenticated {}", peer);
                self.emitter.transmit(MgmtFrame::deauth(
                    bssid,
                    peer,
                    bssid,
                    ReasonCode::CLASS2_FROM_NONAUTH,
                ));
                return Ok(());
            }
            Some(PeerState::Associated { aid, .. }) => (Some(*aid), true),
            Some(PeerState::Authenticated) => (session.free_aid(max_peers), false),
        };
        let aid = match aid {
            Some(aid) => aid,
            None => {
                warn!("no free aid on {}, refuse {}", bssid, peer);
                self.emitter.transmit(MgmtFrame::assoc_response(
                    bssid,
                    peer,
                    reassoc,
                    StatusCode::AP_FULL,
                    0,
                    Bytes::new(),
                ));
                return Ok(());
            }
        };
        let bss_index = session.bss_index.ok_or(Error::MissingResource {
            session: id,
            what: "bss index",
        })?;

        let capabilities = session
            .requested
            .negotiate(&Capabilities::from_ies(&body.ies));
        let params = AddStaParams {
            bss_index,
            peer,
            aid,
            capabilities: capabilities.clone(),
            update,
        };
        session.set_state(LinkState::BssActive {
            op: Some(PeerOp::Adding {
                peer,
                aid,
                reassoc,
                capabilities,
            }),
        });
        self.issue(id, RequestKind::AddSta { peer }, TimerKind::AddSta, |token| {
            FirmwareCommand::AddSta { token, params }
        })
    }

    pub(super) fn on_peer_added(
        &mut self,
        id: SessionId,
        result: LowerResult<StaAdded>,
    ) -> Result<(), Error> {
        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        let (peer, aid, reassoc, capabilities) = match session.state() {
            LinkState::BssActive {
                op:
                    Some(PeerOp::Adding {
                        peer,
                        aid,
                        reassoc,
                        capabilities,
                    }),
            } => (*peer, *aid, *reassoc, capabilities.clone()),
            _ => return Ok(()),
        };
        session.set_state(LinkState::BssActive { op: None });
        let bssid = session.bssid;

        match result {
            Ok(added) => {
                session.peers.insert(
                    peer,
                    PeerState::Associated {
                        aid,
                        sta_index: added.sta_index,
                        capabilities: capabilities.clone(),
                    },
                );
                self.emitter.transmit(MgmtFrame::assoc_response(
                    bssid,
                    peer,
                    reassoc,
                    StatusCode::SUCCESS,
                    aid,
                    capabilities.to_ies(),
                ));
                info!("{} associated with {}, aid {}", peer, bssid, aid);
                self.emitter.indicate(Indication::AssocIndication(AssocIndication {
                    iface_id: session.iface_id,
                    bssid,
                    peer,
                    aid,
                    reassoc,
                    capabilities,
                }));
            }
            Err(failure) => {
                warn!("add sta for {} failed: {:?}", peer, failure);
                self.emitter.transmit(MgmtFrame::assoc_response(
                    bssid,
                    peer,
                    reassoc,
                    StatusCode::REFUSED,
                    0,
                    Bytes::new(),
                ));
            }
        }
        Ok(())
    }

    /// 上层要求断开 AP 上的某个对端
    pub(super) fn ap_disconnect(
        &mut self,
        id: SessionId,
        kind: DisconnectKind,
        req: DisconnectRequest,
    ) -> Result<(), Error> {
        let session = self.session(id)?;
        let bssid = session.bssid;
        let known = session.peers.contains_key(&req.peer);
        let rejected = match session.state() {
            LinkState::TearingDown(_) => return self.fold(id),
            LinkState::BssActive {
                op: Some(PeerOp::Removing { disconnect, .. }),
            } if disconnect.peer == req.peer => return self.fold_peer(id),
            LinkState::BssActive { op: None } if known => None,
            LinkState::BssActive { op: None } => Some(ResultCode::InvalidParameters),
            _ => Some(ResultCode::UnexpectedRequest),
        };
        if let Some(result) = rejected {
            debug!("reject {:?} of {} on session {}", kind, req.peer, id);
            self.emitter.answer(&disconnect_request(kind, req), result);
            return Ok(());
        }

        self.emitter
            .transmit(disconnect_frame(kind, bssid, req.peer, bssid, req.reason));
        self.remove_peer(
            id,
            Disconnect {
                kind,
                origin: Origin::Local,
                peer: req.peer,
                reason: req.reason,
            },
        )
    }

    fn on_peer_leave(&mut self, id: SessionId, frame: MgmtFrame) -> Result<(), Error> {
        let (kind, reason) = match frame.body {
            FrameBody::Disassoc { reason } => (DisconnectKind::Disassoc, reason),
            FrameBody::Deauth { reason } => (DisconnectKind::Deauth, reason),
            _ => return Ok(()),
        };
        self.remove_peer(
            id,
            Disconnect {
                kind,
                origin: Origin::Peer,
                peer: frame.sa,
                reason,
            },
        )
    }

    /// 已关联的对端需要先删除底层条目，只认证的对端直接移除
    fn remove_peer(&mut self, id: SessionId, disconnect: Disconnect) -> Result<(), Error> {
        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        match session.state() {
            LinkState::BssActive { op: None } => {}
            LinkState::BssActive {
                op: Some(PeerOp::Removing { disconnect: current, .. }),
            } if current.peer == disconnect.peer => return self.fold_peer(id),
            other => {
                debug!("ignore {:?} of {} in {}", disconnect.kind, disconnect.peer, other);
                return Ok(());
            }
        }

        let sta_index = match session.peers.get(&disconnect.peer) {
            None => {
                debug!("{:?} from unknown peer {}", disconnect.kind, disconnect.peer);
                return Ok(());
            }
            Some(PeerState::Authenticated) => {
                session.peers.remove(&disconnect.peer);
                debug!("{} left {} before association", disconnect.peer, session.bssid);
                if disconnect.origin == Origin::Local {
                    self.emitter.indicate(disconnect_notification(
                        session.iface_id,
                        session.bssid,
                        disconnect,
                        ResultCode::Success,
                    ));
                }
                return Ok(());
            }
            Some(PeerState::Associated { sta_index, .. }) => *sta_index,
        };

        session.set_state(LinkState::BssActive {
            op: Some(PeerOp::Removing {
                disconnect,
                folded: 0,
            }),
        });
        let peer = disconnect.peer;
        self.issue(id, RequestKind::DeleteSta { peer }, TimerKind::DeleteSta, |token| {
            FirmwareCommand::DeleteSta { token, sta_index }
        })
    }

    fn fold_peer(&mut self, id: SessionId) -> Result<(), Error> {
        if let LinkState::BssActive {
            op: Some(PeerOp::Removing { disconnect, folded }),
        } = self.session_mut(id)?.state_mut()
        {
            *folded += 1;
            debug!("fold removal of {}, {} folded", disconnect.peer, folded);
        }
        Ok(())
    }

    pub(super) fn on_peer_removed(
        &mut self,
        id: SessionId,
        result: LowerResult<()>,
    ) -> Result<(), Error> {
        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        let disconnect = match session.state() {
            LinkState::BssActive {
                op: Some(PeerOp::Removing { disconnect, .. }),
            } => *disconnect,
            _ => return Ok(()),
        };
        session.peers.remove(&disconnect.peer);
        session.set_state(LinkState::BssActive { op: None });

        let result = match result {
            Ok(()) => ResultCode::Success,
            Err(failure) => {
                warn!("delete sta for {} failed: {:?}", disconnect.peer, failure);
                ResultCode::LowerLayerFailure
            }
        };
        info!("{} left {}", disconnect.peer, session.bssid);
        self.emitter.indicate(disconnect_notification(
            session.iface_id,
            session.bssid,
            disconnect,
            result,
        ));
        Ok(())
    }
}
