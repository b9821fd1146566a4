//! 消息分发
//! 每条消息先过几道闸：离线、扫描/雷达检测、ADDTS 暂停、会话忙，
//! 能处理的交给状态机，不能处理的进入延迟队列，条件变化后按到达顺序重放

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::config;

use super::{
    deferred::{DeferredQueue, Full},
    machine::{Flow, StateMachine},
    timer::Scheduler,
    ControlEvent, Incoming, Indication, ResultCode, SessionId, SessionQuery, SmeState,
};

/// 一条消息的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routed {
    /// 已处理或已丢弃
    Consumed,
    Deferred,
}

enum Admission {
    Process,
    Defer,
    /// 扫描期间的 beacon / probe 帧，交给扫描处理
    Scan,
    Drop(&'static str),
}

/// 分发器的全局状态，只由分发器修改
#[derive(Debug, Default)]
struct DispatcherState {
    offline: bool,
    scanning: bool,
    radar: bool,
    /// 发起 ADDTS 交互、暂停上层请求处理的会话
    suspended_by: Option<SessionId>,

    processed: u64,
    deferred: u64,
    dropped: u64,
    failed_back: u64,
}

impl DispatcherState {
    fn gated(&self) -> bool {
        self.scanning || self.radar
    }

    fn sme_state(&self) -> SmeState {
        if self.offline {
            SmeState::Offline
        } else {
            SmeState::Idle
        }
    }
}

/// 分发器状态和计数器的快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStats {
    pub sme_state: SmeState,
    pub scanning: bool,
    pub radar: bool,
    pub suspended: bool,
    pub sessions: usize,
    pub outstanding_requests: usize,
    /// 当前在延迟队列里的消息数
    pub queued: usize,
    pub processed: u64,
    pub deferred: u64,
    pub dropped: u64,
    /// 延迟队列满被退回的消息数
    pub failed_back: u64,
}

pub(crate) struct Dispatcher<S> {
    state: DispatcherState,
    deferred: DeferredQueue<Incoming>,
    machine: StateMachine<S>,
}

impl<S: Scheduler> Dispatcher<S> {
    pub(crate) fn new(cfg: &config::Dispatcher, machine: StateMachine<S>) -> Self {
        Self {
            state: DispatcherState::default(),
            deferred: DeferredQueue::new(cfg.deferred_capacity),
            machine,
        }
    }

    /// 分发循环，输入通道关闭后退出
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Incoming>) {
        while let Some(msg) = rx.recv().await {
            self.route(msg);
        }
        info!(
            "dispatcher stopped, {} deferred messages discarded",
            self.deferred.len()
        );
    }

    pub(crate) fn route(&mut self, msg: Incoming) -> Routed {
        let routed = match self.admit(&msg) {
            Admission::Defer => self.defer(msg),
            admission => {
                self.dispatch(admission, msg);
                Routed::Consumed
            }
        };
        self.drain();
        routed
    }

    pub(crate) fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            sme_state: self.state.sme_state(),
            scanning: self.state.scanning,
            radar: self.state.radar,
            suspended: self.state.suspended_by.is_some(),
            sessions: self.machine.session_count(),
            outstanding_requests: self.machine.outstanding_requests(),
            queued: self.deferred.len(),
            processed: self.state.processed,
            deferred: self.state.deferred,
            dropped: self.state.dropped,
            failed_back: self.state.failed_back,
        }
    }

    fn admit(&self, msg: &Incoming) -> Admission {
        if let Incoming::Control(_) | Incoming::Query { .. } | Incoming::Stats { .. } = msg {
            return Admission::Process;
        }
        // 离线时只接受拆除，在途交互照常完成
        if self.state.offline && !msg.is_teardown() && !msg.completes_in_flight() {
            return Admission::Drop("offline");
        }
        // 扫描/雷达检测期间只处理必须完成的固件回复和定时器
        if self.state.gated() {
            return match msg {
                Incoming::Firmware(_) | Incoming::Timeout(_) => Admission::Process,
                Incoming::Frame(frame) if frame.is_scan_frame() => {
                    if self.state.scanning {
                        Admission::Scan
                    } else {
                        Admission::Drop("radar detection")
                    }
                }
                _ => Admission::Defer,
            };
        }
        // 拆除请求不受 ADDTS 暂停影响，拆除会结束交互并恢复处理
        if self.state.suspended_by.is_some()
            && matches!(msg, Incoming::Sme(request) if !request.is_teardown())
        {
            return Admission::Defer;
        }
        if self.machine.is_busy(msg) {
            return Admission::Defer;
        }
        Admission::Process
    }

    fn dispatch(&mut self, admission: Admission, msg: Incoming) {
        match admission {
            Admission::Process => self.process(msg),
            Admission::Scan => {
                if let Incoming::Frame(frame) = msg {
                    self.machine.emitter.indicate(Indication::ScanFrame(frame));
                }
            }
            Admission::Drop(reason) => {
                debug!("drop {} message: {}", msg.name(), reason);
                self.state.dropped += 1;
            }
            Admission::Defer => {
                self.defer(msg);
            }
        }
    }

    fn defer(&mut self, msg: Incoming) -> Routed {
        let name = msg.name();
        match self.deferred.enqueue(msg) {
            Ok(()) => {
                self.state.deferred += 1;
                debug!("defer {} message, {} queued", name, self.deferred.len());
                Routed::Deferred
            }
            Err(Full(msg)) => {
                self.fail_back(msg);
                Routed::Consumed
            }
        }
    }

    /// 延迟队列已满：上层请求直接回复资源不足，其余消息丢弃
    fn fail_back(&mut self, msg: Incoming) {
        warn!(
            "deferred queue full ({}), fail back {} message",
            self.deferred.capacity(),
            msg.name()
        );
        self.state.failed_back += 1;
        if let Incoming::Sme(request) = msg {
            self.machine
                .emitter
                .answer(&request, ResultCode::ResourcesUnavailable);
        }
    }

    /// 按到达顺序重放，队头仍然不能处理时停止
    fn drain(&mut self) {
        while let Some(msg) = self.deferred.drain_next() {
            match self.admit(&msg) {
                Admission::Defer => {
                    self.deferred.requeue_front(msg);
                    break;
                }
                admission => {
                    debug!("replay deferred {} message", msg.name());
                    self.dispatch(admission, msg);
                }
            }
        }
    }

    fn process(&mut self, msg: Incoming) {
        self.state.processed += 1;
        let name = msg.name();
        let result = match msg {
            Incoming::Sme(request) => self.machine.handle_request(request),
            Incoming::Firmware(response) => self.machine.handle_response(response),
            Incoming::FirmwareIndication(indication) => {
                self.machine.handle_indication(indication)
            }
            Incoming::Frame(frame) => match self.machine.resolve_frame(&frame) {
                Some(id) => self.machine.handle_frame(id, frame),
                None => {
                    debug!("no session for {:?} from {}", frame.subtype(), frame.sa);
                    self.state.dropped += 1;
                    Ok(())
                }
            },
            Incoming::Timeout(token) => self.machine.handle_timeout(token),
            Incoming::Control(event) => {
                self.control(event);
                Ok(())
            }
            Incoming::Query { query, reply } => {
                let info = match query {
                    SessionQuery::ByBssid(bssid) => self.machine.find_by_bssid(bssid),
                    SessionQuery::ByIface(iface_id) => self.machine.find_by_iface(iface_id),
                };
                if reply.send(info).is_err() {
                    debug!("query requester gone");
                }
                Ok(())
            }
            Incoming::Stats { reply } => {
                if reply.send(self.stats()).is_err() {
                    debug!("stats requester gone");
                }
                Ok(())
            }
        };
        if let Err(e) = result {
            error!("handle {} message error: {}", name, e);
        }

        match self.machine.take_flow() {
            Some(Flow::Suspend(id)) => {
                debug!("session {} suspends request processing", id);
                self.state.suspended_by = Some(id);
            }
            Some(Flow::Resume(id)) if self.state.suspended_by == Some(id) => {
                debug!("session {} resumes request processing", id);
                self.state.suspended_by = None;
            }
            _ => {}
        }
    }

    fn control(&mut self, event: ControlEvent) {
        debug!("control event {:?}", event);
        match event {
            ControlEvent::ScanStarted => self.state.scanning = true,
            ControlEvent::ScanCompleted => self.state.scanning = false,
            ControlEvent::RadarStarted => self.state.radar = true,
            ControlEvent::RadarCompleted => self.state.radar = false,
            ControlEvent::SetOffline(offline) => {
                info!("mlme {}", if offline { "offline" } else { "online" });
                self.state.offline = offline;
            }
        }
    }
}
