//! 和底层（固件）之间的命令/回复
//! 每个命令携带一个 RequestToken，固件回复时原样带回，用于关联和识别过期回复

use bytes::Bytes;

use crate::frame::{MacAddr, MgmtFrame};

use super::{
    pending::{RequestClass, RequestKind},
    BssIndex, Capabilities, Channel, Epoch, KeyAction, Role, SessionId, StaIndex,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken {
    pub session: SessionId,
    pub epoch: Epoch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareCommand {
    AddBss {
        token: RequestToken,
        params: AddBssParams,
    },
    DeleteBss {
        token: RequestToken,
        bss_index: BssIndex,
    },
    AddSta {
        token: RequestToken,
        params: AddStaParams,
    },
    DeleteSta {
        token: RequestToken,
        sta_index: StaIndex,
    },
    SetKey {
        token: RequestToken,
        bss_index: BssIndex,
        /// None 表示组播密钥
        sta_index: Option<StaIndex>,
        action: KeyAction,
    },
    SwitchChannel {
        token: RequestToken,
        bss_index: BssIndex,
        channel: Channel,
    },
}

impl FirmwareCommand {
    pub fn token(&self) -> RequestToken {
        match self {
            FirmwareCommand::AddBss { token, .. }
            | FirmwareCommand::DeleteBss { token, .. }
            | FirmwareCommand::AddSta { token, .. }
            | FirmwareCommand::DeleteSta { token, .. }
            | FirmwareCommand::SetKey { token, .. }
            | FirmwareCommand::SwitchChannel { token, .. } => *token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddBssParams {
    pub bssid: MacAddr,
    pub self_addr: MacAddr,
    pub role: Role,
    pub channel: Channel,
    pub beacon_period: u16,
    pub dtim_period: u8,
    pub ssid: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddStaParams {
    pub bss_index: BssIndex,
    pub peer: MacAddr,
    pub aid: u16,
    pub capabilities: Capabilities,
    /// 更新已有的 STA 条目（reassoc）
    pub update: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwStatus {
    Success,
    Failure(u32),
}

impl FwStatus {
    pub fn is_success(&self) -> bool {
        *self == FwStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareResponse {
    AddBss {
        token: RequestToken,
        status: FwStatus,
        bss_index: BssIndex,
    },
    DeleteBss {
        token: RequestToken,
        status: FwStatus,
    },
    AddSta {
        token: RequestToken,
        status: FwStatus,
        sta_index: StaIndex,
        ucast_sig: u8,
        bcast_sig: u8,
    },
    DeleteSta {
        token: RequestToken,
        status: FwStatus,
    },
    SetKey {
        token: RequestToken,
        status: FwStatus,
    },
    SwitchChannel {
        token: RequestToken,
        status: FwStatus,
    },
}

impl FirmwareResponse {
    pub fn token(&self) -> RequestToken {
        match self {
            FirmwareResponse::AddBss { token, .. }
            | FirmwareResponse::DeleteBss { token, .. }
            | FirmwareResponse::AddSta { token, .. }
            | FirmwareResponse::DeleteSta { token, .. }
            | FirmwareResponse::SetKey { token, .. }
            | FirmwareResponse::SwitchChannel { token, .. } => *token,
        }
    }

    pub fn status(&self) -> FwStatus {
        match self {
            FirmwareResponse::AddBss { status, .. }
            | FirmwareResponse::DeleteBss { status, .. }
            | FirmwareResponse::AddSta { status, .. }
            | FirmwareResponse::DeleteSta { status, .. }
            | FirmwareResponse::SetKey { status, .. }
            | FirmwareResponse::SwitchChannel { status, .. } => *status,
        }
    }

    pub fn class(&self) -> RequestClass {
        match self {
            FirmwareResponse::AddBss { .. }
            | FirmwareResponse::DeleteBss { .. }
            | FirmwareResponse::AddSta { .. }
            | FirmwareResponse::DeleteSta { .. } => RequestClass::Lifecycle,
            FirmwareResponse::SetKey { .. } => RequestClass::Key,
            FirmwareResponse::SwitchChannel { .. } => RequestClass::Channel,
        }
    }

    /// 回复是否对应这一类请求
    pub fn answers(&self, kind: &RequestKind) -> bool {
        matches!(
            (self, kind),
            (FirmwareResponse::AddBss { .. }, RequestKind::AddBss)
                | (FirmwareResponse::DeleteBss { .. }, RequestKind::DeleteBss)
                | (FirmwareResponse::AddSta { .. }, RequestKind::AddSta { .. })
                | (FirmwareResponse::DeleteSta { .. }, RequestKind::DeleteSta { .. })
                | (FirmwareResponse::SetKey { .. }, RequestKind::SetKey { .. })
                | (
                    FirmwareResponse::SwitchChannel { .. },
                    RequestKind::SwitchChannel { .. }
                )
        )
    }


    pub fn name(&self) -> &'static str {
        match self {
            FirmwareResponse::AddBss { .. } => "add-bss",
            FirmwareResponse::DeleteBss { .. } => "delete-bss",
            FirmwareResponse::AddSta { .. } => "add-sta",
            FirmwareResponse::DeleteSta { .. } => "delete-sta",
            FirmwareResponse::SetKey { .. } => "set-key",
            FirmwareResponse::SwitchChannel { .. } => "switch-channel",
        }
    }
}

/// 固件主动上报的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareIndication {
    MissedBeacon { bss_index: BssIndex },
}

/// 信标调度，具体的模板构造和周期发送由底层完成
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeaconControl {
    Start {
        bss_index: BssIndex,
        bssid: MacAddr,
        beacon_period: u16,
        dtim_period: u8,
        ssid: Bytes,
    },
    Stop {
        bss_index: BssIndex,
    },
}

/// 发给底层的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lower {
    Command(FirmwareCommand),
    Transmit(MgmtFrame),
    Beacon(BeaconControl),
}
