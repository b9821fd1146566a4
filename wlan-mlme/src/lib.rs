//! 802.11 MLME 控制面库
//! 接收连接管理器的请求，驱动固件完成 BSS 的建立、加入、重关联和拆除，
//! 用户实现 Firmware 对接实际的底层，实现 Hook 接收结果

use async_trait::async_trait;
use bytes::Bytes;

use frame::MacAddr;
use mlme::{BeaconControl, FirmwareCommand, FirmwareResponse, IfaceId, Indication};

pub mod config;
pub mod error;
pub mod frame;
pub mod mlme;
pub mod service;

pub use error::Error;
pub use service::{Mlme, MlmeHandle};

/// 上层事件回调，由用户实现
#[async_trait]
pub trait Hook: Send + Sync + 'static {
    /// 每一条完成/通知消息
    async fn indication(&self, indication: Indication);
    /// station 链路建立或 BSS 启动成功
    async fn link_up(&self, iface_id: IfaceId, bssid: MacAddr);
    /// station 链路断开或 BSS 停止
    async fn link_down(&self, iface_id: IfaceId, bssid: MacAddr);
}

pub struct HookNoop;

#[async_trait]
impl Hook for HookNoop {
    async fn indication(&self, _indication: Indication) {}
    async fn link_up(&self, _iface_id: IfaceId, _bssid: MacAddr) {}
    async fn link_down(&self, _iface_id: IfaceId, _bssid: MacAddr) {}
}

/// 底层固件，由用户实现
#[async_trait]
pub trait Firmware: Send + Sync + 'static {
    /// 执行一条命令；返回 None 表示固件没有回复，由看门狗超时处理
    async fn execute(&self, command: FirmwareCommand) -> Option<FirmwareResponse>;
    /// 发送一个编码好的管理帧
    async fn transmit(&self, frame: Bytes);
    async fn beacon(&self, control: BeaconControl);
}
