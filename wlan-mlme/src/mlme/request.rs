//! 上层（连接管理器）发来的请求

use bytes::Bytes;

use crate::frame::{AuthAlgorithm, MacAddr, ReasonCode};

use super::{Capabilities, Channel, IfaceId, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmeRequest {
    StartBss(StartBssRequest),
    StopBss(StopBssRequest),
    Join(JoinRequest),
    Reassoc(ReassocRequest),
    Disassoc(DisconnectRequest),
    Deauth(DisconnectRequest),
    SetKeys(SetKeysRequest),
    SwitchChannel(SwitchChannelRequest),
    AddTs(AddTsRequest),
}

impl SmeRequest {
    pub fn iface_id(&self) -> IfaceId {
        match self {
            SmeRequest::StartBss(r) => r.iface_id,
            SmeRequest::StopBss(r) => r.iface_id,
            SmeRequest::Join(r) => r.iface_id,
            SmeRequest::Reassoc(r) => r.iface_id,
            SmeRequest::Disassoc(r) | SmeRequest::Deauth(r) => r.iface_id,
            SmeRequest::SetKeys(r) => r.iface_id,
            SmeRequest::SwitchChannel(r) => r.iface_id,
            SmeRequest::AddTs(r) => r.iface_id,
        }
    }

    pub fn bssid(&self) -> MacAddr {
        match self {
            SmeRequest::StartBss(r) => r.bssid,
            SmeRequest::StopBss(r) => r.bssid,
            SmeRequest::Join(r) => r.bssid,
            SmeRequest::Reassoc(r) => r.bssid,
            SmeRequest::Disassoc(r) | SmeRequest::Deauth(r) => r.bssid,
            SmeRequest::SetKeys(r) => r.bssid,
            SmeRequest::SwitchChannel(r) => r.bssid,
            SmeRequest::AddTs(r) => r.bssid,
        }
    }

    /// 拆除类请求，离线状态下也要处理
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            SmeRequest::StopBss(_) | SmeRequest::Disassoc(_) | SmeRequest::Deauth(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SmeRequest::StartBss(_) => "start-bss",
            SmeRequest::StopBss(_) => "stop-bss",
            SmeRequest::Join(_) => "join",
            SmeRequest::Reassoc(_) => "reassoc",
            SmeRequest::Disassoc(_) => "disassoc",
            SmeRequest::Deauth(_) => "deauth",
            SmeRequest::SetKeys(_) => "set-keys",
            SmeRequest::SwitchChannel(_) => "switch-channel",
            SmeRequest::AddTs(_) => "add-ts",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartBssRequest {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub self_addr: MacAddr,
    pub role: Role,
    pub ssid: Bytes,
    pub channel: Channel,
    pub beacon_period: u16,
    pub dtim_period: u8,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopBssRequest {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub reason: ReasonCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub self_addr: MacAddr,
    pub role: Role,
    pub ssid: Bytes,
    pub channel: Channel,
    pub auth_type: AuthAlgorithm,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassocRequest {
    pub iface_id: IfaceId,
    /// 当前关联的 BSS
    pub bssid: MacAddr,
    /// 重关联的目标 AP
    pub target: MacAddr,
}

/// disassoc / deauth 请求
/// station 会话中 peer 等于 bssid；AP 会话中 peer 为要断开的对端 station
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectRequest {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub peer: MacAddr,
    pub reason: ReasonCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetKeysRequest {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    /// None 表示组播密钥
    pub peer: Option<MacAddr>,
    pub action: KeyAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Install(KeyDescriptor),
    Remove { key_index: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    pub key_index: u8,
    pub cipher_suite: u32,
    pub key: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchChannelRequest {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub channel: Channel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddTsRequest {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub tsid: u8,
    pub user_priority: u8,
    /// TSPEC 元素原始字节
    pub tspec: Bytes,
}
