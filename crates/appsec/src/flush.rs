//! 플러시 스케줄러 -- 백로그를 주기적으로 수집기로 보냅니다.
//!
//! 타이머 태스크는 틱마다 플러시를 별도 태스크로 spawn 하므로 느린 전송이
//! 타이머를 지연시키지 않습니다. 동시에 진행되는 플러시는 최대 하나이며,
//! `Idle -> Flushing` 전이는 compare-and-swap으로 수행합니다. 이미
//! `Flushing`인 틱은 아무것도 하지 않습니다. 놓친 틱은 쌓이지 않습니다.
//!
//! 드레인은 전송 전에 일어납니다. 전송 실패 시 배치는 버려지고
//! 재시도하지 않습니다.
//!
//! ```text
//! interval tick --spawn--> flush(): CAS Idle->Flushing -> drain_all -> send_batch -> Idle
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use warden_core::metrics as m;

use crate::backlog::Backlog;
use crate::transport::{EventBatch, Transport};

/// 플러시 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlushState {
    /// 대기 중
    Idle = 0,
    /// 배치 생성 또는 전송 중
    Flushing = 1,
}

impl FlushState {
    fn from_u8(value: u8) -> Self {
        if value == FlushState::Flushing as u8 {
            FlushState::Flushing
        } else {
            FlushState::Idle
        }
    }
}

/// 플러시 1회의 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// 다른 플러시가 진행 중이라 건너뜀
    InFlight,
    /// 보낼 이벤트가 없음
    Empty,
    /// 전송 성공
    Sent {
        /// 전송한 이벤트 수
        events: usize,
    },
    /// 전송 실패 (배치는 버려짐)
    Failed {
        /// 버려진 이벤트 수
        events: usize,
    },
}

/// 상태를 `Idle`로 되돌리는 가드
struct FlushGuard<'a>(&'a AtomicU8);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(FlushState::Idle as u8, Ordering::Release);
    }
}

/// 타이머와 플러시 태스크가 공유하는 상태
struct FlushShared<T: Transport> {
    backlog: Arc<Backlog>,
    transport: T,
    state: AtomicU8,
    batches_sent: AtomicU64,
    batches_failed: AtomicU64,
    events_sent: AtomicU64,
    events_dropped: AtomicU64,
}

impl<T: Transport> FlushShared<T> {
    async fn flush(&self) -> FlushOutcome {
        if self
            .state
            .compare_exchange(
                FlushState::Idle as u8,
                FlushState::Flushing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return FlushOutcome::InFlight;
        }
        let _guard = FlushGuard(&self.state);

        if self.backlog.is_full() {
            warn!(
                capacity = self.backlog.capacity(),
                dropped = self.backlog.dropped_count(),
                "backlog reached its bound, attack events were dropped"
            );
        }

        let events = self.backlog.drain_all();
        gauge!(m::APPSEC_BACKLOG_SIZE).set(self.backlog.len() as f64);
        if events.is_empty() {
            return FlushOutcome::Empty;
        }

        let count = events.len();
        let batch = EventBatch::new(events);
        match self.transport.send_batch(&batch).await {
            Ok(()) => {
                self.batches_sent.fetch_add(1, Ordering::Relaxed);
                self.events_sent.fetch_add(count as u64, Ordering::Relaxed);
                counter!(m::APPSEC_FLUSH_BATCHES_TOTAL, m::LABEL_RESULT => "success").increment(1);
                counter!(m::APPSEC_EVENTS_SENT_TOTAL).increment(count as u64);
                debug!(events = count, "flushed attack events");
                FlushOutcome::Sent { events: count }
            }
            Err(e) => {
                self.batches_failed.fetch_add(1, Ordering::Relaxed);
                self.events_dropped.fetch_add(count as u64, Ordering::Relaxed);
                counter!(m::APPSEC_FLUSH_BATCHES_TOTAL, m::LABEL_RESULT => "failure").increment(1);
                warn!(
                    error = %e,
                    events = count,
                    idempotency_key = %batch.idempotency_key,
                    "failed to send attack events, batch dropped"
                );
                FlushOutcome::Failed { events: count }
            }
        }
    }
}

/// 주기 플러시 스케줄러
pub struct FlushScheduler<T: Transport> {
    shared: Arc<FlushShared<T>>,
    timer: Option<JoinHandle<()>>,
}

impl<T: Transport> FlushScheduler<T> {
    /// 새 스케줄러를 생성합니다. 타이머는 [`start`](Self::start)로 시작합니다.
    pub fn new(backlog: Arc<Backlog>, transport: T) -> Self {
        Self {
            shared: Arc::new(FlushShared {
                backlog,
                transport,
                state: AtomicU8::new(FlushState::Idle as u8),
                batches_sent: AtomicU64::new(0),
                batches_failed: AtomicU64::new(0),
                events_sent: AtomicU64::new(0),
                events_dropped: AtomicU64::new(0),
            }),
            timer: None,
        }
    }

    /// 주기 타이머를 시작합니다. 이미 실행 중이면 `false`를 반환합니다.
    pub fn start(&mut self, interval: Duration) -> bool {
        if self.is_running() {
            return false;
        }

        let shared = Arc::clone(&self.shared);
        self.timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    shared.flush().await;
                });
            }
        }));

        info!(interval_ms = interval.as_millis() as u64, "flush scheduler started");
        true
    }

    /// 타이머를 중단합니다. 진행 중인 플러시는 취소되지 않습니다.
    pub fn stop(&mut self) -> bool {
        match self.timer.take() {
            Some(handle) => {
                handle.abort();
                info!("flush scheduler stopped");
                true
            }
            None => false,
        }
    }

    /// 타이머가 실행 중인지 확인합니다.
    pub fn is_running(&self) -> bool {
        self.timer.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 즉시 한 번 플러시합니다.
    pub async fn flush(&self) -> FlushOutcome {
        self.shared.flush().await
    }

    /// 현재 플러시 상태
    pub fn state(&self) -> FlushState {
        FlushState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// 전송 성공 배치 수
    pub fn batches_sent(&self) -> u64 {
        self.shared.batches_sent.load(Ordering::Relaxed)
    }

    /// 전송 실패 배치 수
    pub fn batches_failed(&self) -> u64 {
        self.shared.batches_failed.load(Ordering::Relaxed)
    }

    /// 전송된 이벤트 수
    pub fn events_sent(&self) -> u64 {
        self.shared.events_sent.load(Ordering::Relaxed)
    }

    /// 전송 실패로 버려진 이벤트 수
    pub fn events_dropped(&self) -> u64 {
        self.shared.events_dropped.load(Ordering::Relaxed)
    }
}

impl<T: Transport> Drop for FlushScheduler<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppSecError;
    use crate::event::{AttackEvent, EventContext, RuleInfo};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// 동시 전송을 감지하는 mock 전송
    #[derive(Default)]
    struct MockTransport {
        delay: Duration,
        fail: bool,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        batches: Mutex<Vec<usize>>,
    }

    impl MockTransport {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    impl Transport for MockTransport {
        async fn send_batch(&self, batch: &EventBatch) -> Result<(), AppSecError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.batches.lock().unwrap().push(batch.len());
            if self.fail {
                Err(AppSecError::Transport("collector unavailable".to_owned()))
            } else {
                Ok(())
            }
        }
    }

    fn event() -> AttackEvent {
        AttackEvent::new(
            RuleInfo {
                id: "r1".to_owned(),
                name: "Rule".to_owned(),
                tags: Default::default(),
            },
            Vec::new(),
            EventContext::default(),
        )
    }

    fn backlog_with(n: usize) -> Arc<Backlog> {
        let backlog = Arc::new(Backlog::new(100));
        for _ in 0..n {
            backlog.try_push(event());
        }
        backlog
    }

    #[tokio::test]
    async fn empty_backlog_sends_nothing() {
        let transport = Arc::new(MockTransport::default());
        let scheduler = FlushScheduler::new(backlog_with(0), Arc::clone(&transport));
        assert_eq!(scheduler.flush().await, FlushOutcome::Empty);
        assert!(transport.batches.lock().unwrap().is_empty());
        assert_eq!(scheduler.state(), FlushState::Idle);
    }

    #[tokio::test]
    async fn flush_drains_backlog() {
        let backlog = backlog_with(3);
        let transport = Arc::new(MockTransport::default());
        let scheduler = FlushScheduler::new(Arc::clone(&backlog), Arc::clone(&transport));

        assert_eq!(scheduler.flush().await, FlushOutcome::Sent { events: 3 });
        assert!(backlog.is_empty());
        assert_eq!(scheduler.batches_sent(), 1);
        assert_eq!(scheduler.events_sent(), 3);
        assert_eq!(*transport.batches.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn failed_batch_is_dropped() {
        let backlog = backlog_with(2);
        let transport = Arc::new(MockTransport {
            fail: true,
            ..Default::default()
        });
        let scheduler = FlushScheduler::new(Arc::clone(&backlog), transport);

        assert_eq!(scheduler.flush().await, FlushOutcome::Failed { events: 2 });
        assert!(backlog.is_empty());
        assert_eq!(scheduler.batches_failed(), 1);
        assert_eq!(scheduler.events_dropped(), 2);
        assert_eq!(scheduler.state(), FlushState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_flush_is_in_flight() {
        let transport = Arc::new(MockTransport::slow(Duration::from_secs(1)));
        let scheduler = FlushScheduler::new(backlog_with(1), transport);

        let (first, second) = tokio::join!(scheduler.flush(), scheduler.flush());
        assert_eq!(first, FlushOutcome::Sent { events: 1 });
        assert_eq!(second, FlushOutcome::InFlight);
        assert_eq!(scheduler.state(), FlushState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn events_enqueued_during_send_wait_for_next_flush() {
        let backlog = backlog_with(3);
        let transport = Arc::new(MockTransport::slow(Duration::from_secs(1)));
        let scheduler = FlushScheduler::new(Arc::clone(&backlog), Arc::clone(&transport));

        let enqueue = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(scheduler.state(), FlushState::Flushing);
            for _ in 0..5 {
                backlog.try_push(event());
            }
        };
        let (outcome, ()) = tokio::join!(scheduler.flush(), enqueue);

        assert_eq!(outcome, FlushOutcome::Sent { events: 3 });
        assert_eq!(*transport.batches.lock().unwrap(), vec![3]);
        assert_eq!(backlog.len(), 5);

        assert_eq!(scheduler.flush().await, FlushOutcome::Sent { events: 5 });
        assert!(backlog.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_never_overlaps_transmissions() {
        let backlog = Arc::new(Backlog::new(1_000));
        let transport = Arc::new(MockTransport::slow(Duration::from_millis(250)));
        let mut scheduler = FlushScheduler::new(Arc::clone(&backlog), Arc::clone(&transport));

        assert!(scheduler.start(Duration::from_millis(100)));
        assert!(!scheduler.start(Duration::from_millis(100)));

        for _ in 0..40 {
            backlog.try_push(event());
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        assert!(scheduler.stop());
        assert!(!scheduler.stop());

        // 진행 중인 전송이 끝나도록 대기
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
        let sent: usize = transport.batches.lock().unwrap().iter().sum();
        assert_eq!(sent + backlog.len(), 40);
        assert!(scheduler.batches_sent() >= 2);
    }
}
