//! 帧层
//! 只负责 802.11 管理帧头和固定字段的编解码，不包含任何状态机逻辑
//! 信息元素保持原始字节，需要时由 [`ie::IeReader`] 按需读取

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub mod ie;

/// 管理帧头长度：fc(2) + duration(2) + addr1/2/3(18) + seq ctrl(2)
const MGMT_HEADER_LEN: usize = 24;

/// action 帧 category
const CATEGORY_QOS: u8 = 1;
const CATEGORY_PUBLIC: u8 = 4;
const QOS_ACTION_ADDTS_REQUEST: u8 = 0;
const QOS_ACTION_ADDTS_RESPONSE: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("At least {0} more bytes required")]
    InsufficientBytes(usize),
    #[error("Not a management frame, frame type: {0}")]
    NotManagement(u8),
    #[error("Unsupported management subtype: {0}")]
    UnsupportedSubtype(u8),
    #[error("Malformed frame")]
    MalformedFrame,
}

/// MAC 地址
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// 组播位（包括广播）
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(addr: [u8; 6]) -> Self {
        Self(addr)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// 802.11 状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const SUCCESS: StatusCode = StatusCode(0);
    pub const REFUSED: StatusCode = StatusCode(1);
    pub const UNSUPPORTED_AUTH_ALGORITHM: StatusCode = StatusCode(13);
    pub const AUTH_SEQ_OUT_OF_ORDER: StatusCode = StatusCode(14);
    pub const AP_FULL: StatusCode = StatusCode(17);

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

/// 802.11 原因码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReasonCode(pub u16);

impl ReasonCode {
    pub const UNSPECIFIED: ReasonCode = ReasonCode(1);
    pub const PREV_AUTH_NOT_VALID: ReasonCode = ReasonCode(2);
    pub const LEAVING_BSS: ReasonCode = ReasonCode(3);
    pub const INACTIVITY: ReasonCode = ReasonCode(4);
    pub const AP_FULL: ReasonCode = ReasonCode(5);
    pub const CLASS2_FROM_NONAUTH: ReasonCode = ReasonCode(6);
    pub const CLASS3_FROM_NONASSOC: ReasonCode = ReasonCode(7);
    pub const STA_LEAVING: ReasonCode = ReasonCode(8);
}

/// 认证算法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAlgorithm {
    OpenSystem,
    SharedKey,
    FastTransition,
    Sae,
    Other(u16),
}

impl From<u16> for AuthAlgorithm {
    fn from(value: u16) -> Self {
        match value {
            0 => AuthAlgorithm::OpenSystem,
            1 => AuthAlgorithm::SharedKey,
            2 => AuthAlgorithm::FastTransition,
            3 => AuthAlgorithm::Sae,
            other => AuthAlgorithm::Other(other),
        }
    }
}

impl From<AuthAlgorithm> for u16 {
    fn from(alg: AuthAlgorithm) -> Self {
        match alg {
            AuthAlgorithm::OpenSystem => 0,
            AuthAlgorithm::SharedKey => 1,
            AuthAlgorithm::FastTransition => 2,
            AuthAlgorithm::Sae => 3,
            AuthAlgorithm::Other(v) => v,
        }
    }
}

/// 管理帧子类型
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subtype {
    AssocRequest = 0,
    AssocResponse = 1,
    ReassocRequest = 2,
    ReassocResponse = 3,
    ProbeRequest = 4,
    ProbeResponse = 5,
    Beacon = 8,
    Disassoc = 10,
    Auth = 11,
    Deauth = 12,
    Action = 13,
}

impl TryFrom<u8> for Subtype {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Subtype::AssocRequest),
            1 => Ok(Subtype::AssocResponse),
            2 => Ok(Subtype::ReassocRequest),
            3 => Ok(Subtype::ReassocResponse),
            4 => Ok(Subtype::ProbeRequest),
            5 => Ok(Subtype::ProbeResponse),
            8 => Ok(Subtype::Beacon),
            10 => Ok(Subtype::Disassoc),
            11 => Ok(Subtype::Auth),
            12 => Ok(Subtype::Deauth),
            13 => Ok(Subtype::Action),
            other => Err(Error::UnsupportedSubtype(other)),
        }
    }
}

/// 一个解析后的管理帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MgmtFrame {
    /// addr1
    pub da: MacAddr,
    /// addr2
    pub sa: MacAddr,
    /// addr3
    pub bssid: MacAddr,
    /// 序列号（不含分片号）
    pub seq: u16,
    pub body: FrameBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    Beacon(BeaconBody),
    ProbeRequest { ies: Bytes },
    ProbeResponse(BeaconBody),
    Auth(AuthBody),
    AssocRequest(AssocRequestBody),
    ReassocRequest(AssocRequestBody),
    AssocResponse(AssocResponseBody),
    ReassocResponse(AssocResponseBody),
    Disassoc { reason: ReasonCode },
    Deauth { reason: ReasonCode },
    Action(Action),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconBody {
    pub timestamp: u64,
    pub beacon_interval: u16,
    pub capability: u16,
    pub ies: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthBody {
    pub algorithm: AuthAlgorithm,
    pub seq: u16,
    pub status: StatusCode,
    /// challenge text 等剩余字段
    pub ies: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssocRequestBody {
    pub capability: u16,
    pub listen_interval: u16,
    /// 只有 reassoc request 携带
    pub current_ap: Option<MacAddr>,
    pub ies: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssocResponseBody {
    pub capability: u16,
    pub status: StatusCode,
    pub aid: u16,
    pub ies: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    AddTsRequest {
        dialog_token: u8,
        tspec: Bytes,
    },
    AddTsResponse {
        dialog_token: u8,
        status: StatusCode,
        tspec: Bytes,
    },
    Public {
        action: u8,
        body: Bytes,
    },
    Other {
        category: u8,
        action: u8,
        body: Bytes,
    },
}

impl MgmtFrame {
    pub fn subtype(&self) -> Subtype {
        match &self.body {
            FrameBody::Beacon(_) => Subtype::Beacon,
            FrameBody::ProbeRequest { .. } => Subtype::ProbeRequest,
            FrameBody::ProbeResponse(_) => Subtype::ProbeResponse,
            FrameBody::Auth(_) => Subtype::Auth,
            FrameBody::AssocRequest(_) => Subtype::AssocRequest,
            FrameBody::ReassocRequest(_) => Subtype::ReassocRequest,
            FrameBody::AssocResponse(_) => Subtype::AssocResponse,
            FrameBody::ReassocResponse(_) => Subtype::ReassocResponse,
            FrameBody::Disassoc { .. } => Subtype::Disassoc,
            FrameBody::Deauth { .. } => Subtype::Deauth,
            FrameBody::Action(_) => Subtype::Action,
        }
    }

    /// 扫描期间有意义的帧
    pub fn is_scan_frame(&self) -> bool {
        matches!(
            self.subtype(),
            Subtype::Beacon | Subtype::ProbeRequest | Subtype::ProbeResponse
        )
    }

    /// 从原始字节解析管理帧，不含 FCS
    pub fn read_from(mut stream: Bytes) -> Result<Self, Error> {
        if stream.len() < MGMT_HEADER_LEN {
            return Err(Error::InsufficientBytes(MGMT_HEADER_LEN - stream.len()));
        }

        let fc = stream.get_u16_le();
        let frame_type = ((fc >> 2) & 0b11) as u8;
        if frame_type != 0 {
            return Err(Error::NotManagement(frame_type));
        }
        let subtype = Subtype::try_from(((fc >> 4) & 0x0f) as u8)?;
        // duration
        stream.advance(2);
        let da = read_addr(&mut stream)?;
        let sa = read_addr(&mut stream)?;
        let bssid = read_addr(&mut stream)?;
        let seq = read_u16(&mut stream)? >> 4;

        let body = FrameBody::read_from(subtype, &mut stream)?;
        Ok(Self {
            da,
            sa,
            bssid,
            seq,
            body,
        })
    }

    pub fn write_to(&self, stream: &mut BytesMut) {
        let fc = (self.subtype() as u16) << 4;
        stream.put_u16_le(fc);
        stream.put_u16_le(0);
        stream.put_slice(&self.da.0);
        stream.put_slice(&self.sa.0);
        stream.put_slice(&self.bssid.0);
        stream.put_u16_le(self.seq << 4);
        self.body.write_to(stream);
    }

    pub fn encode(&self) -> Bytes {
        let mut stream = BytesMut::with_capacity(MGMT_HEADER_LEN + 32);
        self.write_to(&mut stream);
        stream.freeze()
    }

    pub fn auth(
        src: MacAddr,
        dst: MacAddr,
        bssid: MacAddr,
        algorithm: AuthAlgorithm,
        seq: u16,
        status: StatusCode,
    ) -> Self {
        Self {
            da: dst,
            sa: src,
            bssid,
            seq: 0,
            body: FrameBody::Auth(AuthBody {
                algorithm,
                seq,
                status,
                ies: Bytes::new(),
            }),
        }
    }

    pub fn assoc_request(src: MacAddr, bssid: MacAddr, capability: u16, ies: Bytes) -> Self {
        Self {
            da: bssid,
            sa: src,
            bssid,
            seq: 0,
            body: FrameBody::AssocRequest(AssocRequestBody {
                capability,
                listen_interval: 10,
                current_ap: None,
                ies,
            }),
        }
    }

    pub fn reassoc_request(
        src: MacAddr,
        target: MacAddr,
        current_ap: MacAddr,
        capability: u16,
        ies: Bytes,
    ) -> Self {
        Self {
            da: target,
            sa: src,
            bssid: target,
            seq: 0,
            body: FrameBody::ReassocRequest(AssocRequestBody {
                capability,
                listen_interval: 10,
                current_ap: Some(current_ap),
                ies,
            }),
        }
    }

    pub fn assoc_response(
        bssid: MacAddr,
        dst: MacAddr,
        reassoc: bool,
        status: StatusCode,
        aid: u16,
        ies: Bytes,
    ) -> Self {
        let body = AssocResponseBody {
            capability: 0x0001,
            status,
            aid,
            ies,
        };
        Self {
            da: dst,
            sa: bssid,
            bssid,
            seq: 0,
            body: if reassoc {
                FrameBody::ReassocResponse(body)
            } else {
                FrameBody::AssocResponse(body)
            },
        }
    }

    pub fn disassoc(src: MacAddr, dst: MacAddr, bssid: MacAddr, reason: ReasonCode) -> Self {
        Self {
            da: dst,
            sa: src,
            bssid,
            seq: 0,
            body: FrameBody::Disassoc { reason },
        }
    }

    pub fn deauth(src: MacAddr, dst: MacAddr, bssid: MacAddr, reason: ReasonCode) -> Self {
        Self {
            da: dst,
            sa: src,
            bssid,
            seq: 0,
            body: FrameBody::Deauth { reason },
        }
    }

    pub fn addts_request(src: MacAddr, bssid: MacAddr, dialog_token: u8, tspec: Bytes) -> Self {
        Self {
            da: bssid,
            sa: src,
            bssid,
            seq: 0,
            body: FrameBody::Action(Action::AddTsRequest {
                dialog_token,
                tspec,
            }),
        }
    }
}

impl FrameBody {
    fn read_from(subtype: Subtype, stream: &mut Bytes) -> Result<Self, Error> {
        let body = match subtype {
            Subtype::Beacon => FrameBody::Beacon(BeaconBody::read_from(stream)?),
            Subtype::ProbeResponse => FrameBody::ProbeResponse(BeaconBody::read_from(stream)?),
            Subtype::ProbeRequest => FrameBody::ProbeRequest {
                ies: stream.split_off(0),
            },
            Subtype::Auth => FrameBody::Auth(AuthBody {
                algorithm: read_u16(stream)?.into(),
                seq: read_u16(stream)?,
                status: StatusCode(read_u16(stream)?),
                ies: stream.split_off(0),
            }),
            Subtype::AssocRequest => {
                FrameBody::AssocRequest(AssocRequestBody::read_from(stream, false)?)
            }
            Subtype::ReassocRequest => {
                FrameBody::ReassocRequest(AssocRequestBody::read_from(stream, true)?)
            }
            Subtype::AssocResponse => {
                FrameBody::AssocResponse(AssocResponseBody::read_from(stream)?)
            }
            Subtype::ReassocResponse => {
                FrameBody::ReassocResponse(AssocResponseBody::read_from(stream)?)
            }
            Subtype::Disassoc => FrameBody::Disassoc {
                reason: ReasonCode(read_u16(stream)?),
            },
            Subtype::Deauth => FrameBody::Deauth {
                reason: ReasonCode(read_u16(stream)?),
            },
            Subtype::Action => FrameBody::Action(Action::read_from(stream)?),
        };
        Ok(body)
    }

    fn write_to(&self, stream: &mut BytesMut) {
        match self {
            FrameBody::Beacon(b) | FrameBody::ProbeResponse(b) => {
                stream.put_u64_le(b.timestamp);
                stream.put_u16_le(b.beacon_interval);
                stream.put_u16_le(b.capability);
                stream.put_slice(&b.ies);
            }
            FrameBody::ProbeRequest { ies } => stream.put_slice(ies),
            FrameBody::Auth(a) => {
                stream.put_u16_le(a.algorithm.into());
                stream.put_u16_le(a.seq);
                stream.put_u16_le(a.status.0);
                stream.put_slice(&a.ies);
            }
            FrameBody::AssocRequest(r) | FrameBody::ReassocRequest(r) => {
                stream.put_u16_le(r.capability);
                stream.put_u16_le(r.listen_interval);
                if let Some(current_ap) = &r.current_ap {
                    stream.put_slice(&current_ap.0);
                }
                stream.put_slice(&r.ies);
            }
            FrameBody::AssocResponse(r) | FrameBody::ReassocResponse(r) => {
                stream.put_u16_le(r.capability);
                stream.put_u16_le(r.status.0);
                // aid 的最高两位固定置 1
                stream.put_u16_le(r.aid | 0xc000);
                stream.put_slice(&r.ies);
            }
            FrameBody::Disassoc { reason } | FrameBody::Deauth { reason } => {
                stream.put_u16_le(reason.0)
            }
            FrameBody::Action(action) => action.write_to(stream),
        }
    }
}

impl BeaconBody {
    fn read_from(stream: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            timestamp: read_u64(stream)?,
            beacon_interval: read_u16(stream)?,
            capability: read_u16(stream)?,
            ies: stream.split_off(0),
        })
    }
}

impl AssocRequestBody {
    fn read_from(stream: &mut Bytes, reassoc: bool) -> Result<Self, Error> {
        let capability = read_u16(stream)?;
        let listen_interval = read_u16(stream)?;
        let current_ap = match reassoc {
            true => Some(read_addr(stream)?),
            false => None,
        };
        Ok(Self {
            capability,
            listen_interval,
            current_ap,
            ies: stream.split_off(0),
        })
    }
}

impl AssocResponseBody {
    fn read_from(stream: &mut Bytes) -> Result<Self, Error> {
        Ok(Self {
            capability: read_u16(stream)?,
            status: StatusCode(read_u16(stream)?),
            aid: read_u16(stream)? & 0x3fff,
            ies: stream.split_off(0),
        })
    }
}

impl Action {
    fn read_from(stream: &mut Bytes) -> Result<Self, Error> {
        let category = read_u8(stream)?;
        let action = read_u8(stream)?;
        let parsed = match (category, action) {
            (CATEGORY_QOS, QOS_ACTION_ADDTS_REQUEST) => Action::AddTsRequest {
                dialog_token: read_u8(stream)?,
                tspec: stream.split_off(0),
            },
            (CATEGORY_QOS, QOS_ACTION_ADDTS_RESPONSE) => Action::AddTsResponse {
                dialog_token: read_u8(stream)?,
                status: StatusCode(read_u16(stream)?),
                tspec: stream.split_off(0),
            },
            (CATEGORY_PUBLIC, action) => Action::Public {
                action,
                body: stream.split_off(0),
            },
            (category, action) => Action::Other {
                category,
                action,
                body: stream.split_off(0),
            },
        };
        Ok(parsed)
    }

    fn write_to(&self, stream: &mut BytesMut) {
        match self {
            Action::AddTsRequest {
                dialog_token,
                tspec,
            } => {
                stream.put_u8(CATEGORY_QOS);
                stream.put_u8(QOS_ACTION_ADDTS_REQUEST);
                stream.put_u8(*dialog_token);
                stream.put_slice(tspec);
            }
            Action::AddTsResponse {
                dialog_token,
                status,
                tspec,
            } => {
                stream.put_u8(CATEGORY_QOS);
                stream.put_u8(QOS_ACTION_ADDTS_RESPONSE);
                stream.put_u8(*dialog_token);
                stream.put_u16_le(status.0);
                stream.put_slice(tspec);
            }
            Action::Public { action, body } => {
                stream.put_u8(CATEGORY_PUBLIC);
                stream.put_u8(*action);
                stream.put_slice(body);
            }
            Action::Other {
                category,
                action,
                body,
            } => {
                stream.put_u8(*category);
                stream.put_u8(*action);
                stream.put_slice(body);
            }
        }
    }
}

fn read_u8(stream: &mut Bytes) -> Result<u8, Error> {
    if stream.is_empty() {
        return Err(Error::InsufficientBytes(1));
    }
    Ok(stream.get_u8())
}

fn read_u16(stream: &mut Bytes) -> Result<u16, Error> {
    if stream.len() < 2 {
        return Err(Error::InsufficientBytes(2 - stream.len()));
    }
    Ok(stream.get_u16_le())
}

fn read_u64(stream: &mut Bytes) -> Result<u64, Error> {
    if stream.len() < 8 {
        return Err(Error::InsufficientBytes(8 - stream.len()));
    }
    Ok(stream.get_u64_le())
}

fn read_addr(stream: &mut Bytes) -> Result<MacAddr, Error> {
    if stream.len() < 6 {
        return Err(Error::InsufficientBytes(6 - stream.len()));
    }
    let mut addr = [0u8; 6];
    stream.copy_to_slice(&mut addr);
    Ok(MacAddr(addr))
}
