//! 发往上层的完成/通知消息，以及发往底层的命令和帧

use log::warn;
use tokio::sync::mpsc;

use crate::frame::{MacAddr, MgmtFrame, ReasonCode, StatusCode};

use super::{
    BssIndex, Capabilities, IfaceId, Lower, ResultCode, SmeRequest, StaIndex,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indication {
    StartBss(StartBssResponse),
    StopBss(StopBssResponse),
    Join(JoinResponse),
    Reassoc(JoinResponse),
    DisassocConfirm(DisconnectConfirm),
    DeauthConfirm(DisconnectConfirm),
    DisassocIndication(DisconnectIndication),
    DeauthIndication(DisconnectIndication),
    /// AP 上有新的对端关联成功
    AssocIndication(AssocIndication),
    SetKeys(ExchangeConfirm),
    SwitchChannel(ExchangeConfirm),
    AddTs(AddTsResponse),
    /// 扫描期间收到的 beacon / probe 帧
    ScanFrame(MgmtFrame),
    /// 会话上收到的、本层不处理的 action 帧
    ActionFrame(MgmtFrame),
}

impl Indication {
    pub fn iface_id(&self) -> Option<IfaceId> {
        match self {
            Indication::StartBss(r) => Some(r.iface_id),
            Indication::StopBss(r) => Some(r.iface_id),
            Indication::Join(r) | Indication::Reassoc(r) => Some(r.iface_id),
            Indication::DisassocConfirm(r) | Indication::DeauthConfirm(r) => Some(r.iface_id),
            Indication::DisassocIndication(r) | Indication::DeauthIndication(r) => {
                Some(r.iface_id)
            }
            Indication::AssocIndication(r) => Some(r.iface_id),
            Indication::SetKeys(r) | Indication::SwitchChannel(r) => Some(r.iface_id),
            Indication::AddTs(r) => Some(r.iface_id),
            Indication::ScanFrame(_) | Indication::ActionFrame(_) => None,
        }
    }

    pub fn result(&self) -> Option<ResultCode> {
        match self {
            Indication::StartBss(r) => Some(r.result),
            Indication::StopBss(r) => Some(r.result),
            Indication::Join(r) | Indication::Reassoc(r) => Some(r.result),
            Indication::DisassocConfirm(r) | Indication::DeauthConfirm(r) => Some(r.result),
            Indication::SetKeys(r) | Indication::SwitchChannel(r) => Some(r.result),
            Indication::AddTs(r) => Some(r.result),
            Indication::DisassocIndication(_)
            | Indication::DeauthIndication(_)
            | Indication::AssocIndication(_)
            | Indication::ScanFrame(_)
            | Indication::ActionFrame(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartBssResponse {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub result: ResultCode,
    pub bss_index: Option<BssIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopBssResponse {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub result: ResultCode,
}

/// join / reassoc 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinResponse {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub result: ResultCode,
    /// 对端在 auth/assoc 帧里给出的状态码
    pub protocol_status: StatusCode,
    pub bss_index: Option<BssIndex>,
    pub sta_index: Option<StaIndex>,
    pub aid: Option<u16>,
    pub ucast_sig: u8,
    pub bcast_sig: u8,
    pub capabilities: Option<Capabilities>,
    /// 交给上层的帧（assoc/reassoc response）
    pub frames: Vec<MgmtFrame>,
}

impl JoinResponse {
    pub fn failure(iface_id: IfaceId, bssid: MacAddr, result: ResultCode) -> Self {
        Self {
            iface_id,
            bssid,
            result,
            protocol_status: StatusCode::SUCCESS,
            bss_index: None,
            sta_index: None,
            aid: None,
            ucast_sig: 0,
            bcast_sig: 0,
            capabilities: None,
            frames: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectConfirm {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub peer: MacAddr,
    pub result: ResultCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectIndication {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub peer: MacAddr,
    pub reason: ReasonCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssocIndication {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub peer: MacAddr,
    pub aid: u16,
    pub reassoc: bool,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfirm {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub result: ResultCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddTsResponse {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub tsid: u8,
    pub result: ResultCode,
    pub status: StatusCode,
}

/// 两个出口：upper 给连接管理器，lower 给固件
pub struct Emitter {
    upper: mpsc::UnboundedSender<Indication>,
    lower: mpsc::UnboundedSender<Lower>,
}

impl Emitter {
    pub fn new(
        upper: mpsc::UnboundedSender<Indication>,
        lower: mpsc::UnboundedSender<Lower>,
    ) -> Self {
        Self { upper, lower }
    }

    pub fn indicate(&self, indication: Indication) {
        if let Err(e) = self.upper.send(indication) {
            warn!("upper layer gone, drop indication {:?}", e.0);
        }
    }

    pub fn lower(&self, msg: Lower) {
        if let Err(e) = self.lower.send(msg) {
            warn!("lower layer gone, drop {:?}", e.0);
        }
    }

    pub fn transmit(&self, frame: MgmtFrame) {
        self.lower(Lower::Transmit(frame))
    }

    /// 按请求类型回复结果，多用于请求被直接拒绝的情况
    pub fn answer(&self, request: &SmeRequest, result: ResultCode) {
        let iface_id = request.iface_id();
        let bssid = request.bssid();
        let indication = match request {
            SmeRequest::StartBss(_) => Indication::StartBss(StartBssResponse {
                iface_id,
                bssid,
                result,
                bss_index: None,
            }),
            SmeRequest::StopBss(_) => Indication::StopBss(StopBssResponse {
                iface_id,
                bssid,
                result,
            }),
            SmeRequest::Join(_) => {
                Indication::Join(JoinResponse::failure(iface_id, bssid, result))
            }
            SmeRequest::Reassoc(_) => {
                Indication::Reassoc(JoinResponse::failure(iface_id, bssid, result))
            }
            SmeRequest::Disassoc(r) => Indication::DisassocConfirm(DisconnectConfirm {
                iface_id,
                bssid,
                peer: r.peer,
                result,
            }),
            SmeRequest::Deauth(r) => Indication::DeauthConfirm(DisconnectConfirm {
                iface_id,
                bssid,
                peer: r.peer,
                result,
            }),
            SmeRequest::SetKeys(_) => Indication::SetKeys(ExchangeConfirm {
                iface_id,
                bssid,
                result,
            }),
            SmeRequest::SwitchChannel(_) => Indication::SwitchChannel(ExchangeConfirm {
                iface_id,
                bssid,
                result,
            }),
            SmeRequest::AddTs(r) => Indication::AddTs(AddTsResponse {
                iface_id,
                bssid,
                tsid: r.tsid,
                result,
                status: StatusCode::REFUSED,
            }),
        };
        self.indicate(indication)
    }
}

/// 测试用：emitter 加上两个接收端
#[cfg(test)]
pub struct Captured {
    pub upper: mpsc::UnboundedReceiver<Indication>,
    pub lower: mpsc::UnboundedReceiver<Lower>,
}

#[cfg(test)]
impl Captured {
    pub fn new() -> (Emitter, Self) {
        let (upper_tx, upper) = mpsc::unbounded_channel();
        let (lower_tx, lower) = mpsc::unbounded_channel();
        (Emitter::new(upper_tx, lower_tx), Self { upper, lower })
    }

    pub fn indications(&mut self) -> Vec<Indication> {
        std::iter::from_fn(|| self.upper.try_recv().ok()).collect()
    }

    pub fn lower_msgs(&mut self) -> Vec<Lower> {
        std::iter::from_fn(|| self.lower.try_recv().ok()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mlme::request::DisconnectRequest;

    #[test]
    fn answer_matches_request_kind() {
        let (emitter, mut captured) = Captured::new();
        let bssid = MacAddr([0, 1, 2, 3, 4, 5]);
        emitter.answer(
            &SmeRequest::Disassoc(DisconnectRequest {
                iface_id: 3,
                bssid,
                peer: bssid,
                reason: ReasonCode::LEAVING_BSS,
            }),
            ResultCode::UnexpectedRequest,
        );

        assert_eq!(
            captured.indications(),
            vec![Indication::DisassocConfirm(DisconnectConfirm {
                iface_id: 3,
                bssid,
                peer: bssid,
                result: ResultCode::UnexpectedRequest,
            })]
        );
    }

    #[test]
    fn closed_upper_does_not_panic() {
        let (emitter, captured) = Captured::new();
        drop(captured);
        emitter.indicate(Indication::ScanFrame(MgmtFrame::deauth(
            MacAddr::ZERO,
            MacAddr::BROADCAST,
            MacAddr::ZERO,
            ReasonCode::UNSPECIFIED,
        )));
    }
}
