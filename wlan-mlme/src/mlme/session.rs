use std::collections::HashMap;

use bytes::Bytes;
use log::debug;

use crate::frame::{AuthAlgorithm, MacAddr};

use super::{
    state::{LinkState, MlmState, SmeState},
    BssIndex, Capabilities, Channel, IfaceId, Role, SessionId, StaIndex,
};

/// AP 会话上的一个对端 station
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    Authenticated,
    Associated {
        aid: u16,
        sta_index: StaIndex,
        capabilities: Capabilities,
    },
}

impl PeerState {
    pub fn sta_index(&self) -> Option<StaIndex> {
        match self {
            PeerState::Authenticated => None,
            PeerState::Associated { sta_index, .. } => Some(*sta_index),
        }
    }

    pub fn aid(&self) -> Option<u16> {
        match self {
            PeerState::Authenticated => None,
            PeerState::Associated { aid, .. } => Some(*aid),
        }
    }
}

/// 会话创建参数
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub self_addr: MacAddr,
    pub role: Role,
    pub channel: Channel,
    pub ssid: Bytes,
    pub beacon_period: u16,
    pub dtim_period: u8,
    pub auth_type: AuthAlgorithm,
    pub capabilities: Capabilities,
}

/// 一个 BSS 连接（station）或者一个自己建立的 BSS（AP / IBSS / monitor）
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub self_addr: MacAddr,
    pub role: Role,
    state: LinkState,
    prev_sme_state: SmeState,

    pub channel: Channel,
    pub ssid: Bytes,
    pub beacon_period: u16,
    pub dtim_period: u8,
    pub auth_type: AuthAlgorithm,
    /// 本端请求的能力
    pub requested: Capabilities,
    /// join/reassoc 成功时冻结
    negotiated: Option<Capabilities>,

    pub bss_index: Option<BssIndex>,
    pub sta_index: Option<StaIndex>,
    pub aid: Option<u16>,
    pub ucast_sig: u8,
    pub bcast_sig: u8,

    /// AP 会话的对端
    pub peers: HashMap<MacAddr, PeerState>,

    /// 本心跳周期内收到的信标数
    pub beacons_seen: u32,
    /// 连续没有信标的心跳周期数
    pub heartbeat_misses: u32,
    next_dialog_token: u8,
}

impl Session {
    pub fn new(id: SessionId, params: SessionParams) -> Self {
        Self {
            id,
            iface_id: params.iface_id,
            bssid: params.bssid,
            self_addr: params.self_addr,
            role: params.role,
            state: LinkState::Idle,
            prev_sme_state: SmeState::Idle,
            channel: params.channel,
            ssid: params.ssid,
            beacon_period: params.beacon_period,
            dtim_period: params.dtim_period,
            auth_type: params.auth_type,
            requested: params.capabilities,
            negotiated: None,
            bss_index: None,
            sta_index: None,
            aid: None,
            ucast_sig: 0,
            bcast_sig: 0,
            peers: HashMap::new(),
            beacons_seen: 0,
            heartbeat_misses: 0,
            next_dialog_token: 0,
        }
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut LinkState {
        &mut self.state
    }

    pub fn set_state(&mut self, state: LinkState) {
        let prev = self.state.sme_state();
        if prev != state.sme_state() {
            self.prev_sme_state = prev;
        }
        debug!(
            "session {} ({}) state {} -> {}",
            self.id, self.bssid, self.state, state
        );
        self.state = state;
    }

    /// 取出当前状态，留下 Idle 占位，调用方处理完必须 set_state 回去
    pub fn take_state(&mut self) -> LinkState {
        std::mem::replace(&mut self.state, LinkState::Idle)
    }

    pub fn sme_state(&self) -> SmeState {
        self.state.sme_state()
    }

    pub fn mlm_state(&self) -> MlmState {
        self.state.mlm_state()
    }

    pub fn prev_sme_state(&self) -> SmeState {
        self.prev_sme_state
    }

    pub fn negotiated(&self) -> Option<&Capabilities> {
        self.negotiated.as_ref()
    }

    pub fn freeze_capabilities(&mut self, capabilities: Capabilities) {
        self.negotiated = Some(capabilities);
    }

    pub fn next_dialog_token(&mut self) -> u8 {
        self.next_dialog_token = self.next_dialog_token.wrapping_add(1).max(1);
        self.next_dialog_token
    }

    /// 是否与该地址有关：bssid 本身、重关联目标或者 AP 上的对端
    pub fn knows(&self, addr: MacAddr) -> bool {
        if self.bssid == addr || self.peers.contains_key(&addr) {
            return true;
        }
        matches!(&self.state, LinkState::Reassociating(attempt) if attempt.target == addr)
    }

    /// 最小的空闲 AID
    pub fn free_aid(&self, max_peers: usize) -> Option<u16> {
        let limit = max_peers.min(2007) as u16;
        (1..=limit).find(|aid| self.peers.values().all(|p| p.aid() != Some(*aid)))
    }

    pub fn associated_peers(&self) -> Vec<MacAddr> {
        let mut peers: Vec<_> = self
            .peers
            .iter()
            .filter(|(_, p)| p.sta_index().is_some())
            .map(|(addr, _)| *addr)
            .collect();
        peers.sort_by_key(|addr| addr.0);
        peers
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            iface_id: self.iface_id,
            bssid: self.bssid,
            self_addr: self.self_addr,
            role: self.role,
            sme_state: self.sme_state(),
            mlm_state: self.mlm_state(),
            prev_sme_state: self.prev_sme_state,
            channel: self.channel,
            bss_index: self.bss_index,
            sta_index: self.sta_index,
            aid: self.aid,
            capabilities: self.negotiated.clone(),
            peers: self.peers.len(),
        }
    }
}

/// 会话的只读快照，交给外部使用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub iface_id: IfaceId,
    pub bssid: MacAddr,
    pub self_addr: MacAddr,
    pub role: Role,
    pub sme_state: SmeState,
    pub mlm_state: MlmState,
    pub prev_sme_state: SmeState,
    pub channel: Channel,
    pub bss_index: Option<BssIndex>,
    pub sta_index: Option<StaIndex>,
    pub aid: Option<u16>,
    pub capabilities: Option<Capabilities>,
    pub peers: usize,
}
