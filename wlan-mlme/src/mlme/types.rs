use std::fmt;

/// 上层接口 id
pub type IfaceId = u16;

/// 底层分配的 BSS 索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BssIndex(pub u8);

/// 底层分配的 STA 索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StaIndex(pub u16);

/// 单调递增的令牌，用于识别过期的异步完成
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Epoch(pub u64);

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// 会话角色，创建后不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Station,
    AccessPoint,
    Ibss,
    Monitor,
    BtAmpStation,
    BtAmpAccessPoint,
}

impl Role {
    /// 通过 join 建立的角色
    pub fn joins(&self) -> bool {
        matches!(self, Role::Station | Role::BtAmpStation)
    }

    /// 通过 start bss 建立的角色
    pub fn starts(&self) -> bool {
        !self.joins()
    }

    /// 接受对端 station 关联的角色
    pub fn admits_peers(&self) -> bool {
        matches!(self, Role::AccessPoint | Role::BtAmpAccessPoint)
    }

    /// 需要发送信标的角色
    pub fn beacons(&self) -> bool {
        matches!(
            self,
            Role::AccessPoint | Role::BtAmpAccessPoint | Role::Ibss
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelWidth {
    Cbw20,
    Cbw40,
    Cbw80,
    Cbw160,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel {
    pub primary: u8,
    pub width: ChannelWidth,
}

impl Channel {
    pub fn new(primary: u8) -> Self {
        Self {
            primary,
            width: ChannelWidth::Cbw20,
        }
    }
}

/// 返回给上层的结果码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,
    /// 会话表满、延迟队列满等
    ResourcesUnavailable,
    InvalidParameters,
    /// 请求与会话当前状态不符
    UnexpectedRequest,
    AlreadyJoinedOrStarted,
    StartFailure,
    JoinFailure,
    AuthFailure,
    AssocFailure,
    ReassocFailure,
    /// join 过程中被 deauth 请求打断
    JoinAborted,
    /// 拆除、密钥、信道切换等底层交互失败或超时
    LowerLayerFailure,
    AddTsFailure,
}

impl ResultCode {
    pub fn is_success(&self) -> bool {
        *self == ResultCode::Success
    }
}
