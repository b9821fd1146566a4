//! 信息元素读写
//! 只做 TLV 切分，具体元素的语义由调用方决定

use bytes::{BufMut, BytesMut};

pub const SSID: u8 = 0;
pub const SUPPORTED_RATES: u8 = 1;
pub const POWER_CONSTRAINT: u8 = 32;
pub const HT_CAPABILITIES: u8 = 45;
pub const EXT_SUPPORTED_RATES: u8 = 50;
pub const VHT_CAPABILITIES: u8 = 191;
pub const VENDOR_SPECIFIC: u8 = 221;
pub const EXTENSION: u8 = 255;

/// SSID 元素体最长 32 字节
pub const MAX_SSID_LEN: usize = 32;

/// extension 元素内的 id
pub const EXT_HE_CAPABILITIES: u8 = 35;

/// WMM 信息/参数元素的 OUI + type
pub const WMM_OUI_TYPE: [u8; 4] = [0x00, 0x50, 0xf2, 0x02];

/// 按顺序遍历 (id, body)，遇到长度越界的元素即停止
pub struct IeReader<'a> {
    buf: &'a [u8],
}

impl<'a> IeReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for IeReader<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.len() < 2 {
            return None;
        }
        let id = self.buf[0];
        let len = self.buf[1] as usize;
        if self.buf.len() < 2 + len {
            self.buf = &[];
            return None;
        }
        let body = &self.buf[2..2 + len];
        self.buf = &self.buf[2 + len..];
        Some((id, body))
    }
}

pub fn write_ie(stream: &mut BytesMut, id: u8, body: &[u8]) {
    stream.put_u8(id);
    stream.put_u8(body.len() as u8);
    stream.put_slice(body);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_stops_on_truncated_element() {
        let buf = [SSID, 2, b'h', b'i', SUPPORTED_RATES, 4, 0x82, 0x84];
        let ies: Vec<_> = IeReader::new(&buf).collect();
        assert_eq!(ies, vec![(SSID, &b"hi"[..])]);
    }

    #[test]
    fn write_then_read() {
        let mut stream = BytesMut::new();
        write_ie(&mut stream, HT_CAPABILITIES, &[0; 26]);
        write_ie(&mut stream, EXTENSION, &[EXT_HE_CAPABILITIES, 1, 2]);

        let mut reader = IeReader::new(&stream);
        assert_eq!(reader.next().map(|(id, b)| (id, b.len())), Some((HT_CAPABILITIES, 26)));
        assert_eq!(reader.next(), Some((EXTENSION, &[EXT_HE_CAPABILITIES, 1, 2][..])));
        assert_eq!(reader.next(), None);
    }
}
