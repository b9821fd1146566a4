//! 已建立链路上的独立交互：密钥、信道切换、ADDTS

use log::{debug, info, warn};

use crate::frame::{MgmtFrame, StatusCode};

use super::{
    machine::{LowerResult, StateMachine},
    pending::RequestKind,
    state::{AddTsExchange, LinkState},
    timer::{Scheduler, TimerKind},
    AddTsRequest, AddTsResponse, Error, ExchangeConfirm, FirmwareCommand, Indication, ResultCode,
    SessionId, SetKeysRequest, SmeRequest, SwitchChannelRequest,
};

fn lower_outcome<T>(what: &str, id: SessionId, result: &LowerResult<T>) -> ResultCode {
    match result {
        Ok(_) => ResultCode::Success,
        Err(failure) => {
            warn!("{} on session {} failed: {:?}", what, id, failure);
            ResultCode::LowerLayerFailure
        }
    }
}

impl<S: Scheduler> StateMachine<S> {
    pub(super) fn set_keys(&mut self, id: SessionId, req: SetKeysRequest) -> Result<(), Error> {
        let session = self.session(id)?;
        let established = matches!(
            session.state(),
            LinkState::Connected { .. } | LinkState::BssActive { .. }
        );

        // 组播密钥不需要 sta 条目
        let sta_index = match req.peer {
            None => Ok(None),
            Some(peer) if session.role.admits_peers() => session
                .peers
                .get(&peer)
                .and_then(|p| p.sta_index())
                .map(Some)
                .ok_or(ResultCode::InvalidParameters),
            Some(peer) if peer == session.bssid => {
                session.sta_index.map(Some).ok_or(ResultCode::InvalidParameters)
            }
            Some(_) => Err(ResultCode::InvalidParameters),
        };
        let rejected = match (established, sta_index, session.bss_index) {
            (false, _, _) => Err(ResultCode::UnexpectedRequest),
            (true, Err(result), _) => Err(result),
            (true, Ok(_), None) => Err(ResultCode::UnexpectedRequest),
            (true, Ok(sta_index), Some(bss_index)) => Ok((sta_index, bss_index)),
        };
        let (sta_index, bss_index) = match rejected {
            Ok(indices) => indices,
            Err(result) => {
                debug!("reject set keys on session {}: {:?}", id, result);
                self.emitter.answer(&SmeRequest::SetKeys(req), result);
                return Ok(());
            }
        };

        let action = req.action;
        self.issue(
            id,
            RequestKind::SetKey { peer: req.peer },
            TimerKind::SetKey,
            |token| FirmwareCommand::SetKey {
                token,
                bss_index,
                sta_index,
                action,
            },
        )
    }

    pub(super) fn on_set_key(
        &mut self,
        id: SessionId,
        result: LowerResult<()>,
    ) -> Result<(), Error> {
        let session = self.session(id)?;
        let result = lower_outcome("set key", id, &result);
        self.emitter.indicate(Indication::SetKeys(ExchangeConfirm {
            iface_id: session.iface_id,
            bssid: session.bssid,
            result,
        }));
        Ok(())
    }

    pub(super) fn switch_channel(
        &mut self,
        id: SessionId,
        req: SwitchChannelRequest,
    ) -> Result<(), Error> {
        let session = self.session(id)?;
        let rejected = if !matches!(
            session.state(),
            LinkState::Connected { .. } | LinkState::BssActive { .. }
        ) {
            Some(ResultCode::UnexpectedRequest)
        } else if req.channel.primary == 0 {
            Some(ResultCode::InvalidParameters)
        } else {
            None
        };
        if let Some(result) = rejected {
            debug!("reject switch channel on session {}: {:?}", id, result);
            self.emitter.answer(&SmeRequest::SwitchChannel(req), result);
            return Ok(());
        }

        let bss_index = self.bss_index(id)?;
        let channel = req.channel;
        self.issue(
            id,
            RequestKind::SwitchChannel { channel },
            TimerKind::SwitchChannel,
            |token| FirmwareCommand::SwitchChannel {
                token,
                bss_index,
                channel,
            },
        )
    }

    pub(super) fn on_switch_channel(
        &mut self,
        id: SessionId,
        kind: RequestKind,
        result: LowerResult<()>,
    ) -> Result<(), Error> {
        let result = lower_outcome("switch channel", id, &result);
        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        if let (ResultCode::Success, RequestKind::SwitchChannel { channel }) = (result, kind) {
            info!(
                "session {} moved from channel {} to {}",
                id, session.channel.primary, channel.primary
            );
            session.channel = channel;
        }
        self.emitter.indicate(Indication::SwitchChannel(ExchangeConfirm {
            iface_id: session.iface_id,
            bssid: session.bssid,
            result,
        }));
        Ok(())
    }

    /// 在 QoS 链路上申请流量，等待期间暂停处理上层请求
    pub(super) fn add_ts(&mut self, id: SessionId, req: AddTsRequest) -> Result<(), Error> {
        let session = self.session(id)?;
        let rejected = if !session.role.joins()
            || !matches!(session.state(), LinkState::Connected { addts: None })
        {
            Some(ResultCode::UnexpectedRequest)
        } else if !session.negotiated().map_or(false, |caps| caps.qos) {
            Some(ResultCode::InvalidParameters)
        } else {
            None
        };
        if let Some(result) = rejected {
            debug!("reject add-ts {} on session {}: {:?}", req.tsid, id, result);
            self.emitter.answer(&SmeRequest::AddTs(req), result);
            return Ok(());
        }

        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        let dialog_token = session.next_dialog_token();
        self.emitter.transmit(MgmtFrame::addts_request(
            session.self_addr,
            session.bssid,
            dialog_token,
            req.tspec,
        ));
        session.set_state(LinkState::Connected {
            addts: Some(AddTsExchange {
                dialog_token,
                tsid: req.tsid,
            }),
        });
        debug!("add-ts {} dialog {} on session {}", req.tsid, dialog_token, id);
        self.arm(id, TimerKind::AddTs);
        self.suspend(id);
        Ok(())
    }

    pub(super) fn on_add_ts_response(
        &mut self,
        id: SessionId,
        dialog_token: u8,
        status: StatusCode,
    ) -> Result<(), Error> {
        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        let exchange = match session.state() {
            LinkState::Connected {
                addts: Some(exchange),
            } if exchange.dialog_token == dialog_token => *exchange,
            other => {
                debug!("ignore add-ts response dialog {} in {}", dialog_token, other);
                return Ok(());
            }
        };
        session.set_state(LinkState::Connected { addts: None });
        let result = if status.is_success() {
            ResultCode::Success
        } else {
            ResultCode::AddTsFailure
        };
        info!("add-ts {} on {}: status {}", exchange.tsid, session.bssid, status.0);
        self.emitter.indicate(Indication::AddTs(AddTsResponse {
            iface_id: session.iface_id,
            bssid: session.bssid,
            tsid: exchange.tsid,
            result,
            status,
        }));
        self.timers.disarm(id, TimerKind::AddTs);
        self.resume(id);
        Ok(())
    }

    pub(super) fn on_add_ts_timeout(&mut self, id: SessionId) -> Result<(), Error> {
        let session = self.table.get_mut(id).ok_or(Error::SessionNotFound(id))?;
        let exchange = match session.state() {
            LinkState::Connected {
                addts: Some(exchange),
            } => *exchange,
            _ => return Ok(()),
        };
        warn!("add-ts {} on {} timed out", exchange.tsid, session.bssid);
        session.set_state(LinkState::Connected { addts: None });
        self.emitter.indicate(Indication::AddTs(AddTsResponse {
            iface_id: session.iface_id,
            bssid: session.bssid,
            tsid: exchange.tsid,
            result: ResultCode::AddTsFailure,
            status: StatusCode::REFUSED,
        }));
        self.resume(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::{
        frame::{Action, FrameBody, MacAddr},
        mlme::{
            machine::{harness::*, Flow},
            BssIndex, Channel, FwStatus, KeyAction, KeyDescriptor, StaIndex,
        },
    };

    fn pairwise(bssid: MacAddr, peer: Option<MacAddr>) -> SetKeysRequest {
        SetKeysRequest {
            iface_id: 1,
            bssid,
            peer,
            action: KeyAction::Install(KeyDescriptor {
                key_index: 0,
                cipher_suite: 0x000f_ac04,
                key: Bytes::from_static(&[0x5a; 16]),
            }),
        }
    }

    fn add_ts_request() -> AddTsRequest {
        AddTsRequest {
            iface_id: 1,
            bssid: AP,
            tsid: 5,
            user_priority: 6,
            tspec: Bytes::from_static(&[0xdd, 0x3d]),
        }
    }

    fn add_ts_reply(dialog_token: u8, status: StatusCode) -> MgmtFrame {
        MgmtFrame {
            da: SELF,
            sa: AP,
            bssid: AP,
            seq: 0,
            body: FrameBody::Action(Action::AddTsResponse {
                dialog_token,
                status,
                tspec: Bytes::new(),
            }),
        }
    }

    #[test]
    fn station_pairwise_key() {
        let mut h = Harness::new();
        h.join(AP);
        h.request(SmeRequest::SetKeys(pairwise(AP, Some(AP))));

        let cmd = h.command();
        assert!(matches!(
            cmd,
            FirmwareCommand::SetKey {
                bss_index: BssIndex(1),
                sta_index: Some(StaIndex(17)),
                ..
            }
        ));
        h.respond(&cmd, FwStatus::Success);
        assert_eq!(h.indications()[0].result(), Some(ResultCode::Success));
    }

    #[test]
    fn set_key_timeout_reports_failure() {
        let mut h = Harness::new();
        let id = h.join(AP);
        h.request(SmeRequest::SetKeys(pairwise(AP, Some(AP))));
        let cmd = h.command();
        h.fire(id, TimerKind::SetKey);

        assert_eq!(
            h.indications()[0].result(),
            Some(ResultCode::LowerLayerFailure)
        );
        // 超时后的回复被丢弃
        h.respond(&cmd, FwStatus::Success);
        assert!(h.indications().is_empty());
    }

    #[test]
    fn group_key_on_ap() {
        let mut h = Harness::new();
        h.start_ap(AP2);
        h.admit(AP2, STA1);
        h.request(SmeRequest::SetKeys(pairwise(AP2, None)));
        assert!(matches!(
            h.command(),
            FirmwareCommand::SetKey { sta_index: None, .. }
        ));

        h.request(SmeRequest::SetKeys(pairwise(AP2, Some(STA2))));
        assert_eq!(
            h.indications()[0].result(),
            Some(ResultCode::InvalidParameters)
        );
    }

    #[test]
    fn key_before_link_is_unexpected() {
        let mut h = Harness::new();
        h.request(SmeRequest::Join(join_request(AP)));
        h.lower();
        h.request(SmeRequest::SetKeys(pairwise(AP, None)));

        assert_eq!(
            h.indications()[0].result(),
            Some(ResultCode::UnexpectedRequest)
        );
        assert!(h.lower().is_empty());
    }

    #[test]
    fn channel_switch_updates_session() {
        let mut h = Harness::new();
        let id = h.join(AP);
        h.request(SmeRequest::SwitchChannel(SwitchChannelRequest {
            iface_id: 1,
            bssid: AP,
            channel: Channel::new(40),
        }));
        h.complete(FwStatus::Success);

        assert_eq!(h.machine.info(id).unwrap().channel.primary, 40);
        assert_eq!(h.indications()[0].result(), Some(ResultCode::Success));

        h.request(SmeRequest::SwitchChannel(SwitchChannelRequest {
            iface_id: 1,
            bssid: AP,
            channel: Channel::new(44),
        }));
        h.complete(FwStatus::Failure(3));
        assert_eq!(h.machine.info(id).unwrap().channel.primary, 40);
        assert_eq!(
            h.indications()[0].result(),
            Some(ResultCode::LowerLayerFailure)
        );
    }

    #[test]
    fn add_ts_suspends_until_response() {
        let mut h = Harness::new();
        let id = h.join(AP);
        h.machine.take_flow();
        h.request(SmeRequest::AddTs(add_ts_request()));

        let sent = h.transmitted();
        assert!(matches!(
            &sent[0].body,
            FrameBody::Action(Action::AddTsRequest { dialog_token: 1, .. })
        ));
        assert_eq!(h.machine.take_flow(), Some(Flow::Suspend(id)));

        // 对不上 dialog token 的回复不结束交互
        h.frame(add_ts_reply(9, StatusCode::SUCCESS));
        assert!(h.indications().is_empty());
        assert_eq!(h.machine.take_flow(), None);

        h.frame(add_ts_reply(1, StatusCode::SUCCESS));
        assert_eq!(
            h.indications(),
            vec![Indication::AddTs(AddTsResponse {
                iface_id: 1,
                bssid: AP,
                tsid: 5,
                result: ResultCode::Success,
                status: StatusCode::SUCCESS,
            })]
        );
        assert_eq!(h.machine.take_flow(), Some(Flow::Resume(id)));
        assert!(!h.machine.timers.is_armed(id, TimerKind::AddTs));
    }

    #[test]
    fn add_ts_timeout_resumes() {
        let mut h = Harness::new();
        let id = h.join(AP);
        h.request(SmeRequest::AddTs(add_ts_request()));
        h.fire(id, TimerKind::AddTs);

        assert_eq!(h.indications()[0].result(), Some(ResultCode::AddTsFailure));
        assert_eq!(h.machine.take_flow(), Some(Flow::Resume(id)));

        // 下一次交互使用新的 dialog token
        h.lower();
        h.request(SmeRequest::AddTs(add_ts_request()));
        assert!(matches!(
            &h.transmitted()[0].body,
            FrameBody::Action(Action::AddTsRequest { dialog_token: 2, .. })
        ));
    }

    #[test]
    fn add_ts_needs_station_link() {
        let mut h = Harness::new();
        h.start_ap(AP2);
        let mut req = add_ts_request();
        req.bssid = AP2;
        h.request(SmeRequest::AddTs(req));

        assert_eq!(
            h.indications()[0].result(),
            Some(ResultCode::UnexpectedRequest)
        );
    }
}
