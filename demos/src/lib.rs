use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use log::{info, warn};
use wlan_mlme::{
    config::Config,
    frame::{MacAddr, MgmtFrame},
    mlme::{
        BeaconControl, BssIndex, FirmwareCommand, FirmwareResponse, FwStatus, IfaceId,
        Indication, StaIndex,
    },
    Firmware, Hook,
};

/// 命令行参数
#[derive(Debug, clap::Parser)]
#[clap(author, version, about = "run an access point against simulated firmware")]
pub struct Args {
    /// 配置文件路径
    #[clap(short, long, default_value = "./demos/standalone.toml")]
    pub config: String,
    /// 广播的 SSID
    #[clap(short, long, default_value = "mlme-demo")]
    pub ssid: String,
    #[clap(long, default_value_t = 6)]
    pub channel: u8,
    /// 模拟接入的 station 个数
    #[clap(long, default_value_t = 2)]
    pub stations: u8,
}

/// 环境变量覆盖，前缀 MLME_
#[derive(Debug, Default, serde::Deserialize)]
pub struct EnvOverrides {
    pub config: Option<String>,
    pub ssid: Option<String>,
    pub channel: Option<u8>,
}

impl Args {
    pub fn apply_env(mut self) -> Self {
        let env = match envy::prefixed("MLME_").from_env::<EnvOverrides>() {
            Ok(env) => env,
            Err(e) => {
                warn!("ignore MLME_ environment: {}", e);
                return self;
            }
        };
        if let Some(config) = env.config {
            self.config = config;
        }
        if let Some(ssid) = env.ssid {
            self.ssid = ssid;
        }
        if let Some(channel) = env.channel {
            self.channel = channel;
        }
        self
    }

    pub async fn load_config(&self) -> Result<Config, wlan_mlme::Error> {
        match Config::from_path(&self.config).await {
            Ok(cfg) => Ok(cfg),
            Err(wlan_mlme::config::Error::Io(e)) => {
                warn!("config file {} unavailable ({}), use defaults", self.config, e);
                Ok(Config::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// 所有命令立即成功的模拟固件
#[derive(Default)]
pub struct SimFirmware {
    next_bss: AtomicU8,
}

#[async_trait]
impl Firmware for SimFirmware {
    async fn execute(&self, command: FirmwareCommand) -> Option<FirmwareResponse> {
        info!("firmware execute: {:?}", command);
        let status = FwStatus::Success;
        Some(match command {
            FirmwareCommand::AddBss { token, .. } => FirmwareResponse::AddBss {
                token,
                status,
                bss_index: BssIndex(self.next_bss.fetch_add(1, Ordering::Relaxed)),
            },
            FirmwareCommand::DeleteBss { token, .. } => {
                FirmwareResponse::DeleteBss { token, status }
            }
            FirmwareCommand::AddSta { token, params } => FirmwareResponse::AddSta {
                token,
                status,
                sta_index: StaIndex(params.aid),
                ucast_sig: 0,
                bcast_sig: 0,
            },
            FirmwareCommand::DeleteSta { token, .. } => {
                FirmwareResponse::DeleteSta { token, status }
            }
            FirmwareCommand::SetKey { token, .. } => FirmwareResponse::SetKey { token, status },
            FirmwareCommand::SwitchChannel { token, .. } => {
                FirmwareResponse::SwitchChannel { token, status }
            }
        })
    }

    async fn transmit(&self, frame: Bytes) {
        match MgmtFrame::read_from(frame) {
            Ok(frame) => info!("air <- {:?} to {}", frame.subtype(), frame.da),
            Err(e) => warn!("transmit undecodable frame: {}", e),
        }
    }

    async fn beacon(&self, control: BeaconControl) {
        info!("beacon: {:?}", control);
    }
}

/// 把所有事件打到日志
pub struct LogHook;

#[async_trait]
impl Hook for LogHook {
    async fn indication(&self, indication: Indication) {
        info!("indication: {:?}", indication);
    }

    async fn link_up(&self, iface_id: IfaceId, bssid: MacAddr) {
        info!("iface {} up on {}", iface_id, bssid);
    }

    async fn link_down(&self, iface_id: IfaceId, bssid: MacAddr) {
        info!("iface {} down from {}", iface_id, bssid);
    }
}
