//! 실행 컨텍스트 -- 요청 단위로 해석된 주소 값과 매처 상태를 보관합니다.
//!
//! 요청 처리 시작 시 생성되고, 신호가 준비될 때마다 값이 추가되며,
//! 요청이 끝나면 drop 됩니다. 한 번 설정된 주소 값은 덮어쓰지 않습니다.
//!
//! 탐지 엔진의 매처 상태는 컨텍스트 내부 arena에 보관되므로
//! 컨텍스트와 함께 해제됩니다. 별도의 정리 훅이 필요 없습니다.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::address::Address;
use crate::error::GatewayError;
use crate::tracer::TraceSpan;
use crate::waf::WafContext;

/// 주소 -> 해석된 값 맵 (주소 순서로 정렬)
pub type AddressMap = BTreeMap<Address, Value>;

/// 프로세스 전역 컨텍스트 키 발급기
static NEXT_CONTEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// 요청(또는 논리적 작업) 단위 실행 컨텍스트
pub struct ExecutionContext {
    /// 매처 상태 연관 키
    key: u64,
    /// 해석된 주소 값
    values: AddressMap,
    /// 계측 레이어가 연결한 활성 span
    span: Option<Arc<dyn TraceSpan>>,
    /// 어댑터 인스턴스 ID -> 매처 상태
    matcher_states: HashMap<u64, Box<dyn WafContext>>,
}

impl ExecutionContext {
    /// 새 실행 컨텍스트를 생성합니다.
    pub fn new() -> Self {
        Self {
            key: NEXT_CONTEXT_KEY.fetch_add(1, Ordering::Relaxed),
            values: AddressMap::new(),
            span: None,
            matcher_states: HashMap::new(),
        }
    }

    /// 활성 span을 연결한 컨텍스트를 생성합니다.
    pub fn with_span(span: Arc<dyn TraceSpan>) -> Self {
        let mut ctx = Self::new();
        ctx.span = Some(span);
        ctx
    }

    /// 컨텍스트 연관 키를 반환합니다.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// 주소 값을 조회합니다. 없으면 `None`.
    pub fn get(&self, address: Address) -> Option<&Value> {
        self.values.get(&address)
    }

    /// 주소 값이 설정되었는지 확인합니다.
    pub fn contains(&self, address: Address) -> bool {
        self.values.contains_key(&address)
    }

    /// 해석된 모든 주소 값을 반환합니다.
    pub fn values(&self) -> &AddressMap {
        &self.values
    }

    /// 해석된 주소 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 해석된 주소가 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 연결된 활성 span을 반환합니다.
    pub fn span(&self) -> Option<&Arc<dyn TraceSpan>> {
        self.span.as_ref()
    }

    /// 활성 span을 연결합니다. 이미 연결된 span은 교체됩니다.
    pub fn attach_span(&mut self, span: Arc<dyn TraceSpan>) {
        self.span = Some(span);
    }

    /// 주소 값을 한 번만 설정합니다.
    pub(crate) fn insert(&mut self, address: Address, value: Value) -> Result<(), GatewayError> {
        if self.values.contains_key(&address) {
            return Err(GatewayError::DuplicateAddress {
                address,
                context: self.key,
            });
        }
        self.values.insert(address, value);
        Ok(())
    }

    /// 어댑터의 매처 상태와 현재 값 맵을 함께 빌려줍니다.
    ///
    /// 상태가 없으면 `create`로 만들어 보관합니다.
    pub(crate) fn matcher_state(
        &mut self,
        owner: u64,
        create: impl FnOnce() -> Box<dyn WafContext>,
    ) -> (&mut Box<dyn WafContext>, &AddressMap) {
        let state = self.matcher_states.entry(owner).or_insert_with(create);
        (state, &self.values)
    }

    /// 보관 중인 매처 상태 수를 반환합니다.
    pub fn matcher_state_count(&self) -> usize {
        self.matcher_states.len()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("key", &self.key)
            .field("values", &self.values)
            .field("has_span", &self.span.is_some())
            .field("matcher_states", &self.matcher_states.len())
            .finish()
    }
}
