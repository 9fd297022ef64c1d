//! 이벤트 백로그 -- 플러시 대기 중인 공격 이벤트의 상한 있는 저장소
//!
//! [`Backlog`]는 요청 태스크와 플러시 타이머가 공유하는 유일한 구조입니다.
//! 추가와 전체 드레인은 같은 잠금 아래에서 원자적으로 수행됩니다.
//!
//! # 오버플로우 정책
//! 백로그가 가득 차면 새 이벤트를 거부합니다. 기존 이벤트는 밀어내지 않습니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use warden_core::config::DEFAULT_MAX_BACKLOG;

use crate::event::AttackEvent;

/// 상한 있는 공격 이벤트 백로그
#[derive(Debug)]
pub struct Backlog {
    /// 내부 저장소 (순서 없음)
    events: Mutex<Vec<AttackEvent>>,
    /// 최대 용량
    capacity: usize,
    /// 거부된 이벤트 카운터
    dropped_count: AtomicU64,
    /// 총 유입 이벤트 카운터 (거부 포함)
    total_received: AtomicU64,
}

impl Backlog {
    /// 새 백로그를 생성합니다.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(Vec::with_capacity(capacity.min(10_000))),
            capacity,
            dropped_count: AtomicU64::new(0),
            total_received: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AttackEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 이벤트를 추가합니다.
    ///
    /// 가득 찬 경우 거부하고 `false`를 반환합니다.
    pub fn try_push(&self, event: AttackEvent) -> bool {
        self.total_received.fetch_add(1, Ordering::Relaxed);

        let mut events = self.lock();
        if events.len() >= self.capacity {
            drop(events);
            self.dropped_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        events.push(event);
        true
    }

    /// 이벤트를 만들기 전에 거부한 경우를 기록합니다.
    pub fn record_rejected(&self) {
        self.total_received.fetch_add(1, Ordering::Relaxed);
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
    }

    /// 모든 이벤트를 꺼냅니다. 백로그는 비워집니다.
    pub fn drain_all(&self) -> Vec<AttackEvent> {
        std::mem::take(&mut *self.lock())
    }

    /// 현재 이벤트 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// 백로그가 비어있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 용량에 도달했는지 확인합니다.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// 최대 용량을 반환합니다.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 지금까지 거부된 이벤트 수를 반환합니다.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// 총 유입 이벤트 수를 반환합니다.
    pub fn total_received(&self) -> u64 {
        self.total_received.load(Ordering::Relaxed)
    }

    /// 사용률을 0.0~1.0 범위로 반환합니다.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        f64::from(u32::try_from(self.len()).unwrap_or(u32::MAX))
            / f64::from(u32::try_from(self.capacity).unwrap_or(u32::MAX))
    }
}

impl Default for Backlog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BACKLOG)
    }
}
