//! 管理层
//! 分发器 + 连接状态机，依赖 frame 层做帧的编解码，通过 Lower 消息驱动底层固件

use tokio::sync::oneshot;

use crate::frame::{FrameBody, MacAddr, MgmtFrame};

pub(crate) use dispatcher::Dispatcher;
pub(crate) use emitter::Emitter;
pub(crate) use machine::StateMachine;
pub(crate) use timer::ChannelScheduler;
pub use dispatcher::DispatcherStats;
pub use emitter::{
    AddTsResponse, AssocIndication, DisconnectConfirm, DisconnectIndication, ExchangeConfirm,
    Indication, JoinResponse, StartBssResponse, StopBssResponse,
};
pub use firmware::{
    AddBssParams, AddStaParams, BeaconControl, FirmwareCommand, FirmwareIndication,
    FirmwareResponse, FwStatus, Lower, RequestToken,
};
pub use capabilities::Capabilities;
pub use request::{
    AddTsRequest, DisconnectRequest, JoinRequest, KeyAction, KeyDescriptor, ReassocRequest,
    SetKeysRequest, SmeRequest, StartBssRequest, StopBssRequest, SwitchChannelRequest,
};
pub use session::{PeerState, SessionInfo};
pub use state::{MlmState, SmeState};
pub use table::SessionId;
pub use timer::{TimerKind, TimerToken};
pub use types::{BssIndex, Channel, ChannelWidth, Epoch, IfaceId, ResultCode, Role, StaIndex};

mod access_point;
mod capabilities;
mod deferred;
mod dispatcher;
mod emitter;
mod exchange;
mod firmware;
mod machine;
mod pending;
mod request;
mod session;
mod state;
mod station;
pub(crate) mod table;
mod teardown;
pub(crate) mod timer;
mod types;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session table error: {0}")]
    Table(#[from] table::Error),
    #[error("pending request error: {0}")]
    Pending(#[from] pending::Error),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("session {session} has no {what}")]
    MissingResource {
        session: SessionId,
        what: &'static str,
    },
}

/// 发送给分发器的消息
#[derive(Debug)]
pub enum Incoming {
    /// 上层请求
    Sme(SmeRequest),
    /// 固件对命令的回复
    Firmware(FirmwareResponse),
    /// 固件主动上报
    FirmwareIndication(FirmwareIndication),
    /// 收到的管理帧
    Frame(MgmtFrame),
    /// 定时器到期
    Timeout(TimerToken),
    /// 扫描、雷达检测、离线等全局事件
    Control(ControlEvent),
    Query {
        query: SessionQuery,
        reply: oneshot::Sender<Option<SessionInfo>>,
    },
    Stats {
        reply: oneshot::Sender<DispatcherStats>,
    },
}

impl Incoming {
    /// 拆除类消息：上层的 disassoc/deauth/stop 请求和对端的 disassoc/deauth 帧
    pub fn is_teardown(&self) -> bool {
        match self {
            Incoming::Sme(request) => request.is_teardown(),
            Incoming::Frame(frame) => matches!(
                frame.body,
                FrameBody::Disassoc { .. } | FrameBody::Deauth { .. }
            ),
            Incoming::Firmware(_) | Incoming::Timeout(_) | Incoming::FirmwareIndication(_) => {
                false
            }
            Incoming::Control(_) | Incoming::Query { .. } | Incoming::Stats { .. } => false,
        }
    }

    /// 已发出请求的回复和定时器到期，只推进在途的交互
    pub fn completes_in_flight(&self) -> bool {
        matches!(self, Incoming::Firmware(_) | Incoming::Timeout(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Incoming::Sme(request) => request.name(),
            Incoming::Firmware(response) => response.name(),
            Incoming::FirmwareIndication(_) => "firmware-indication",
            Incoming::Frame(_) => "frame",
            Incoming::Timeout(_) => "timeout",
            Incoming::Control(_) => "control",
            Incoming::Query { .. } => "query",
            Incoming::Stats { .. } => "stats",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    ScanStarted,
    ScanCompleted,
    RadarStarted,
    RadarCompleted,
    SetOffline(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionQuery {
    ByBssid(MacAddr),
    ByIface(IfaceId),
}
