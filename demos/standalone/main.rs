use std::{error::Error, sync::Arc, time::Duration};

use bytes::Bytes;
use clap::Parser;
use demos::{Args, LogHook, SimFirmware};
use log::info;
use wlan_mlme::{
    frame::{AuthAlgorithm, MacAddr, MgmtFrame, ReasonCode, StatusCode},
    mlme::{
        Capabilities, Channel, IfaceId, Role, SmeRequest, SmeState, StartBssRequest,
        StopBssRequest,
    },
    Mlme, MlmeHandle,
};

const IFACE: IfaceId = 0;
const AP: MacAddr = MacAddr([0x02, 0x00, 0x5e, 0x10, 0x00, 0x01]);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _logger = flexi_logger::Logger::try_with_env_or_str("info")?.start()?;
    let args = Args::parse().apply_env();

    // 获取配置
    let cfg = args.load_config().await?;
    info!("config: {:?}", cfg);

    // 启动 mlme
    let handle =
        Mlme::new(cfg).start_with_hook(Arc::new(LogHook), Arc::new(SimFirmware::default()));

    handle
        .request(SmeRequest::StartBss(StartBssRequest {
            iface_id: IFACE,
            bssid: AP,
            self_addr: AP,
            role: Role::AccessPoint,
            ssid: Bytes::from(args.ssid.clone()),
            channel: Channel::new(args.channel),
            beacon_period: 100,
            dtim_period: 1,
            capabilities: Capabilities::default(),
        }))
        .await?;
    wait_for(&handle, SmeState::LinkEstablished).await?;

    // 模拟 station 接入
    for n in 1..=args.stations {
        let sta = MacAddr([0x02, 0x00, 0x5e, 0x20, 0x00, n]);
        let auth = MgmtFrame::auth(sta, AP, AP, AuthAlgorithm::OpenSystem, 1, StatusCode::SUCCESS);
        handle.frame_received(auth.encode()).await?;
        let assoc = MgmtFrame::assoc_request(sta, AP, 0x0001, Bytes::new());
        handle.frame_received(assoc.encode()).await?;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    if let Some(info) = handle.find_by_bssid(AP).await? {
        info!("bss {} serving {} stations", info.bssid, info.peers);
    }
    info!("stats: {:?}", handle.stats().await?);

    handle
        .request(SmeRequest::StopBss(StopBssRequest {
            iface_id: IFACE,
            bssid: AP,
            reason: ReasonCode::LEAVING_BSS,
        }))
        .await?;
    for _ in 0..50 {
        if handle.find_by_bssid(AP).await?.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    info!("stats: {:?}", handle.stats().await?);
    Ok(())
}

/// 等待 AP 会话进入指定状态
async fn wait_for(handle: &MlmeHandle, state: SmeState) -> Result<(), Box<dyn Error>> {
    for _ in 0..50 {
        match handle.find_by_bssid(AP).await? {
            Some(info) if info.sme_state == state => return Ok(()),
            _ => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    Err(format!("bss {} never reached {:?}", AP, state).into())
}
