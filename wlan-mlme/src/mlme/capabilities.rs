use bytes::{Bytes, BytesMut};

use crate::frame::ie::{self, IeReader};

/// 没有 power constraint 元素时使用的发射功率上限
pub const DEFAULT_MAX_POWER_DBM: i8 = 20;

/// 协商得到的能力快照
/// join/reassoc 成功时冻结在会话上，之后只读
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// 速率，单位 500kbps，不含 basic 标志位
    pub rates: Vec<u8>,
    pub ht: bool,
    pub vht: bool,
    pub he: bool,
    pub qos: bool,
    pub max_power_dbm: i8,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            rates: Vec::new(),
            ht: false,
            vht: false,
            he: false,
            qos: false,
            max_power_dbm: DEFAULT_MAX_POWER_DBM,
        }
    }
}

impl Capabilities {
    /// 从对端帧携带的信息元素里提取能力
    pub fn from_ies(ies: &[u8]) -> Self {
        let mut caps = Capabilities::default();
        for (id, body) in IeReader::new(ies) {
            match id {
                ie::SUPPORTED_RATES | ie::EXT_SUPPORTED_RATES => {
                    caps.rates.extend(body.iter().map(|r| r & 0x7f))
                }
                ie::HT_CAPABILITIES => caps.ht = true,
                ie::VHT_CAPABILITIES => caps.vht = true,
                ie::EXTENSION if body.first() == Some(&ie::EXT_HE_CAPABILITIES) => caps.he = true,
                ie::VENDOR_SPECIFIC if body.starts_with(&ie::WMM_OUI_TYPE) => caps.qos = true,
                ie::POWER_CONSTRAINT => {
                    if let Some(constraint) = body.first() {
                        caps.max_power_dbm =
                            DEFAULT_MAX_POWER_DBM.saturating_sub(*constraint as i8);
                    }
                }
                _ => {}
            }
        }
        caps
    }

    /// 本端能力和对端能力取交集
    pub fn negotiate(&self, peer: &Capabilities) -> Capabilities {
        let rates = self
            .rates
            .iter()
            .map(|r| r & 0x7f)
            .filter(|r| peer.rates.iter().any(|p| p & 0x7f == *r))
            .collect();
        Capabilities {
            rates,
            ht: self.ht && peer.ht,
            vht: self.vht && peer.vht,
            he: self.he && peer.he,
            qos: self.qos && peer.qos,
            max_power_dbm: self.max_power_dbm.min(peer.max_power_dbm),
        }
    }

    /// 生成 (re)assoc request/response 携带的信息元素
    pub fn to_ies(&self) -> Bytes {
        let mut stream = BytesMut::new();
        let (basic, extended) = self.rates.split_at(self.rates.len().min(8));
        if !basic.is_empty() {
            ie::write_ie(&mut stream, ie::SUPPORTED_RATES, basic);
        }
        if !extended.is_empty() {
            ie::write_ie(&mut stream, ie::EXT_SUPPORTED_RATES, extended);
        }
        if self.ht {
            ie::write_ie(&mut stream, ie::HT_CAPABILITIES, &[0; 26]);
        }
        if self.vht {
            ie::write_ie(&mut stream, ie::VHT_CAPABILITIES, &[0; 12]);
        }
        if self.he {
            ie::write_ie(&mut stream, ie::EXTENSION, &[ie::EXT_HE_CAPABILITIES]);
        }
        if self.qos {
            let mut wmm = ie::WMM_OUI_TYPE.to_vec();
            // subtype = information element, version 1, qos info
            wmm.extend_from_slice(&[0x00, 0x01, 0x00]);
            ie::write_ie(&mut stream, ie::VENDOR_SPECIFIC, &wmm);
        }
        stream.freeze()
    }
}
