//! 把分发器、固件和上层回调连起来的后台任务

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::{
    config::Config,
    frame::{self, MacAddr, MgmtFrame},
    mlme::{
        ChannelScheduler, ControlEvent, Dispatcher, DispatcherStats, Emitter, FirmwareIndication,
        FirmwareResponse, IfaceId, Incoming, Indication, Lower, ResultCode, SessionInfo,
        SessionQuery, SmeRequest, StateMachine,
    },
    Firmware, Hook, HookNoop,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("mlme dispatcher stopped")]
    Stopped,
    #[error("decode frame error: {0}")]
    Decode(#[from] frame::Error),
}

impl<T> From<mpsc::error::SendError<T>> for Error {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Error::Stopped
    }
}

impl From<oneshot::error::RecvError> for Error {
    fn from(_: oneshot::error::RecvError) -> Self {
        Error::Stopped
    }
}

/// 一个 MLME 实例
pub struct Mlme {
    cfg: Config,
}

impl Mlme {
    pub fn new(cfg: Config) -> Self {
        Self { cfg }
    }

    pub fn start<F: Firmware>(&self, firmware: Arc<F>) -> MlmeHandle {
        self.start_with_hook(Arc::new(HookNoop), firmware)
    }

    /// 启动后台任务，必须在 tokio 运行时内调用
    pub fn start_with_hook<H: Hook, F: Firmware>(
        &self,
        hook: Arc<H>,
        firmware: Arc<F>,
    ) -> MlmeHandle {
        let (tx, rx) = mpsc::channel(self.cfg.dispatcher.channel_capacity.max(1));
        let (upper_tx, upper_rx) = mpsc::unbounded_channel();
        let (lower_tx, lower_rx) = mpsc::unbounded_channel();

        // 分发器后台协程
        let machine = StateMachine::new(
            self.cfg.session.clone(),
            self.cfg.timeouts.clone(),
            ChannelScheduler::new(tx.clone()),
            Emitter::new(upper_tx, lower_tx),
        );
        let dispatcher = Dispatcher::new(&self.cfg.dispatcher, machine);
        tokio::spawn(async move {
            debug!("start dispatcher loop");
            dispatcher.run(rx).await;
        });

        // 固件命令协程
        let firmware_tx = tx.clone();
        tokio::spawn(async move {
            debug!("start firmware loop");
            lower_loop(firmware, lower_rx, firmware_tx).await;
        });

        // 上层通知协程
        tokio::spawn(async move {
            debug!("start indication loop");
            upper_loop(hook, upper_rx).await;
        });

        MlmeHandle { tx }
    }
}

async fn lower_loop<F: Firmware>(
    firmware: Arc<F>,
    mut lower_rx: mpsc::UnboundedReceiver<Lower>,
    tx: mpsc::Sender<Incoming>,
) {
    while let Some(msg) = lower_rx.recv().await {
        match msg {
            // 命令并发执行，回复各自投递回分发器
            Lower::Command(command) => {
                let firmware = firmware.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let token = command.token();
                    match firmware.execute(command).await {
                        Some(response) => {
                            if tx.send(Incoming::Firmware(response)).await.is_err() {
                                debug!("dispatcher gone, drop firmware response");
                            }
                        }
                        None => warn!("firmware gave no response to request {}", token.epoch),
                    }
                });
            }
            Lower::Transmit(frame) => firmware.transmit(frame.encode()).await,
            Lower::Beacon(control) => firmware.beacon(control).await,
        }
    }
    debug!("firmware loop stopped");
}

async fn upper_loop<H: Hook>(hook: Arc<H>, mut upper_rx: mpsc::UnboundedReceiver<Indication>) {
    while let Some(indication) = upper_rx.recv().await {
        match link_change(&indication) {
            Some((true, iface_id, bssid)) => {
                info!("link up: iface {}, bssid {}", iface_id, bssid);
                hook.link_up(iface_id, bssid).await;
            }
            Some((false, iface_id, bssid)) => {
                info!("link down: iface {}, bssid {}", iface_id, bssid);
                hook.link_down(iface_id, bssid).await;
            }
            None => {}
        }
        hook.indication(indication).await;
    }
    debug!("indication loop stopped");
}

/// 通知是否代表本端链路的建立或断开；AP 上单个对端的离开不算
fn link_change(indication: &Indication) -> Option<(bool, IfaceId, MacAddr)> {
    match indication {
        Indication::Join(r) | Indication::Reassoc(r) if r.result.is_success() => {
            Some((true, r.iface_id, r.bssid))
        }
        Indication::StartBss(r) if r.result.is_success() => Some((true, r.iface_id, r.bssid)),
        Indication::StopBss(r) => Some((false, r.iface_id, r.bssid)),
        Indication::DisassocConfirm(r) | Indication::DeauthConfirm(r)
            if r.peer == r.bssid
                && matches!(r.result, ResultCode::Success | ResultCode::LowerLayerFailure) =>
        {
            Some((false, r.iface_id, r.bssid))
        }
        Indication::DisassocIndication(r) | Indication::DeauthIndication(r)
            if r.peer == r.bssid =>
        {
            Some((false, r.iface_id, r.bssid))
        }
        _ => None,
    }
}

/// 向 MLME 投递消息的句柄
#[derive(Clone)]
pub struct MlmeHandle {
    tx: mpsc::Sender<Incoming>,
}

impl MlmeHandle {
    async fn send(&self, msg: Incoming) -> Result<(), Error> {
        self.tx.send(msg).await?;
        Ok(())
    }

    pub async fn request(&self, request: SmeRequest) -> Result<(), Error> {
        self.send(Incoming::Sme(request)).await
    }

    /// 收到的原始管理帧（不含 FCS）
    pub async fn frame_received(&self, raw: Bytes) -> Result<(), Error> {
        let frame = MgmtFrame::read_from(raw).map_err(|e| {
            debug!("drop undecodable frame: {}", e);
            e
        })?;
        self.send(Incoming::Frame(frame)).await
    }

    pub async fn firmware_response(&self, response: FirmwareResponse) -> Result<(), Error> {
        self.send(Incoming::Firmware(response)).await
    }

    pub async fn firmware_indication(&self, indication: FirmwareIndication) -> Result<(), Error> {
        self.send(Incoming::FirmwareIndication(indication)).await
    }

    pub async fn scan_started(&self) -> Result<(), Error> {
        self.send(Incoming::Control(ControlEvent::ScanStarted)).await
    }

    pub async fn scan_completed(&self) -> Result<(), Error> {
        self.send(Incoming::Control(ControlEvent::ScanCompleted)).await
    }

    pub async fn radar_started(&self) -> Result<(), Error> {
        self.send(Incoming::Control(ControlEvent::RadarStarted)).await
    }

    pub async fn radar_completed(&self) -> Result<(), Error> {
        self.send(Incoming::Control(ControlEvent::RadarCompleted)).await
    }

    pub async fn set_offline(&self, offline: bool) -> Result<(), Error> {
        self.send(Incoming::Control(ControlEvent::SetOffline(offline)))
            .await
    }

    pub async fn find_by_bssid(&self, bssid: MacAddr) -> Result<Option<SessionInfo>, Error> {
        self.query(SessionQuery::ByBssid(bssid)).await
    }

    pub async fn find_by_iface(&self, iface_id: IfaceId) -> Result<Option<SessionInfo>, Error> {
        self.query(SessionQuery::ByIface(iface_id)).await
    }

    async fn query(&self, query: SessionQuery) -> Result<Option<SessionInfo>, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(Incoming::Query { query, reply }).await?;
        Ok(rx.await?)
    }

    pub async fn stats(&self) -> Result<DispatcherStats, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(Incoming::Stats { reply }).await?;
        rx.await.map_err(|e| {
            error!("stats reply lost: {}", e);
            e.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        frame::{AuthAlgorithm, FrameBody, StatusCode},
        mlme::{
            BeaconControl, BssIndex, Capabilities, Channel, FirmwareCommand, FwStatus, Role,
            StaIndex, StartBssRequest,
        },
    };

    const AP: MacAddr = MacAddr([0x02, 0x11, 0, 0, 0, 1]);
    const STA: MacAddr = MacAddr([0x02, 0x22, 0, 0, 0, 1]);

    /// 所有命令都成功的固件
    #[derive(Default)]
    struct AckFirmware {
        sent: Mutex<Vec<MgmtFrame>>,
        beacons: Mutex<Vec<BeaconControl>>,
    }

    #[async_trait]
    impl Firmware for AckFirmware {
        async fn execute(&self, command: FirmwareCommand) -> Option<FirmwareResponse> {
            let status = FwStatus::Success;
            Some(match command {
                FirmwareCommand::AddBss { token, .. } => FirmwareResponse::AddBss {
                    token,
                    status,
                    bss_index: BssIndex(3),
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
            let frame = MgmtFrame::read_from(frame).unwrap();
            self.sent.lock().unwrap().push(frame);
        }

        async fn beacon(&self, control: BeaconControl) {
            self.beacons.lock().unwrap().push(control);
        }
    }

    struct ChannelHook {
        tx: mpsc::UnboundedSender<Indication>,
        links: mpsc::UnboundedSender<(bool, MacAddr)>,
    }

    #[async_trait]
    impl Hook for ChannelHook {
        async fn indication(&self, indication: Indication) {
            let _ = self.tx.send(indication);
        }

        async fn link_up(&self, _iface_id: IfaceId, bssid: MacAddr) {
            let _ = self.links.send((true, bssid));
        }

        async fn link_down(&self, _iface_id: IfaceId, bssid: MacAddr) {
            let _ = self.links.send((false, bssid));
        }
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn access_point_end_to_end() {
        let (tx, mut indications) = mpsc::unbounded_channel();
        let (links_tx, mut links) = mpsc::unbounded_channel();
        let firmware = Arc::new(AckFirmware::default());
        let handle = Mlme::new(Config::default()).start_with_hook(
            Arc::new(ChannelHook {
                tx,
                links: links_tx,
            }),
            firmware.clone(),
        );

        handle
            .request(SmeRequest::StartBss(StartBssRequest {
                iface_id: 4,
                bssid: AP,
                self_addr: AP,
                role: Role::AccessPoint,
                ssid: Bytes::from_static(b"e2e"),
                channel: Channel::new(1),
                beacon_period: 100,
                dtim_period: 1,
                capabilities: Capabilities::default(),
            }))
            .await
            .unwrap();
        assert_eq!(next(&mut links).await, (true, AP));
        assert_eq!(next(&mut indications).await.result(), Some(ResultCode::Success));

        let auth = MgmtFrame::auth(STA, AP, AP, AuthAlgorithm::OpenSystem, 1, StatusCode::SUCCESS);
        handle.frame_received(auth.encode()).await.unwrap();
        let assoc = MgmtFrame::assoc_request(STA, AP, 0x0001, Bytes::new());
        handle.frame_received(assoc.encode()).await.unwrap();

        match next(&mut indications).await {
            Indication::AssocIndication(ind) => {
                assert_eq!(ind.peer, STA);
                assert_eq!(ind.aid, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        let info = handle.find_by_bssid(AP).await.unwrap().unwrap();
        assert_eq!(info.peers, 1);
        assert_eq!(handle.find_by_iface(4).await.unwrap(), Some(info));

        // 底层消息由另一个任务发送，等它处理完
        for _ in 0..100 {
            if firmware.sent.lock().unwrap().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(firmware.beacons.lock().unwrap().len(), 1);
        let sent = firmware.sent.lock().unwrap().clone();
        assert!(matches!(&sent[0].body, FrameBody::Auth(body) if body.seq == 2));
        assert!(matches!(&sent[1].body, FrameBody::AssocResponse(body) if body.aid == 1));

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.outstanding_requests, 0);
    }

    #[tokio::test]
    async fn undecodable_frame_is_reported() {
        let handle = Mlme::new(Config::default()).start(Arc::new(AckFirmware::default()));
        let err = handle
            .frame_received(Bytes::from_static(&[0xb0, 0x00]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(handle.stats().await.unwrap().processed, 1);
    }
}
