//! 구독 관리자 -- 주소 기반 publish/subscribe 디스패치
//!
//! [`Gateway`]는 주소 집합과 콜백의 쌍([`Subscriber`])을 등록받고,
//! 실행 컨텍스트에 값이 publish 될 때마다 해당 주소를 참조하는 구독 중
//! 모든 주소가 준비된 것을 호출자의 태스크에서 동기적으로 호출합니다.
//!
//! # 정확히 한 번 호출
//!
//! 컨텍스트의 주소 값은 한 번만 설정되므로, 구독은 자신의 주소 중
//! 마지막으로 publish 된 주소에서만 조건을 만족합니다. 따라서 컨텍스트당
//! 구독 호출은 정확히 한 번입니다.
//!
//! # 잠금
//!
//! 구독 목록은 `RwLock`으로 보호됩니다. 디스패치는 읽기 잠금 아래에서
//! 호출할 콜백만 복제하고, 잠금을 해제한 뒤 호출합니다. 콜백 내부에서
//! 게이트웨이를 다시 사용해도 교착 상태가 생기지 않습니다.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, trace};

use crate::address::Address;
use crate::context::ExecutionContext;
use crate::error::GatewayError;

/// 구독 콜백
pub trait Subscriber: Send + Sync {
    /// 구독한 주소가 모두 준비되었을 때 호출됩니다.
    fn invoke(&self, ctx: &mut ExecutionContext);
}

impl<F> Subscriber for F
where
    F: Fn(&mut ExecutionContext) + Send + Sync,
{
    fn invoke(&self, ctx: &mut ExecutionContext) {
        self(ctx)
    }
}

/// 등록된 구독 (불변)
struct Subscription {
    /// 정렬, 중복 제거된 주소 집합
    addresses: Vec<Address>,
    callback: Arc<dyn Subscriber>,
}

#[derive(Default)]
struct Registry {
    subscriptions: Vec<Subscription>,
    /// 지문 -> 구독 인덱스
    by_fingerprint: HashMap<String, usize>,
    /// 주소 -> 해당 주소를 참조하는 구독 인덱스
    by_address: HashMap<Address, Vec<usize>>,
}

/// 주소 기반 구독 관리자
#[derive(Default)]
pub struct Gateway {
    registry: RwLock<Registry>,
}

/// 주소 집합을 정렬, 중복 제거합니다.
pub fn normalize(addresses: &[Address]) -> Vec<Address> {
    let mut normalized = addresses.to_vec();
    normalized.sort_unstable();
    normalized.dedup();
    normalized
}

/// 주소 집합의 지문 (이름순으로 정렬한 주소 이름을 `,`로 연결)
pub fn fingerprint(addresses: &[Address]) -> String {
    let mut names: Vec<_> = normalize(addresses).iter().map(Address::as_str).collect();
    names.sort_unstable();
    names.join(",")
}

impl Gateway {
    /// 빈 게이트웨이를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 새 실행 컨텍스트를 생성합니다.
    pub fn new_context(&self) -> ExecutionContext {
        ExecutionContext::new()
    }

    /// 구독을 등록합니다.
    ///
    /// 같은 지문의 구독이 이미 있거나 주소 집합이 비어 있으면
    /// 아무것도 하지 않고 `false`를 반환합니다. 먼저 등록된 구독이 유지됩니다.
    pub fn add_subscription(&self, addresses: &[Address], callback: Arc<dyn Subscriber>) -> bool {
        let addresses = normalize(addresses);
        if addresses.is_empty() {
            return false;
        }
        let key = fingerprint(&addresses);

        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if registry.by_fingerprint.contains_key(&key) {
            debug!(fingerprint = %key, "duplicate subscription ignored");
            return false;
        }

        let index = registry.subscriptions.len();
        for address in &addresses {
            registry.by_address.entry(*address).or_default().push(index);
        }
        registry.subscriptions.push(Subscription {
            addresses,
            callback,
        });
        registry.by_fingerprint.insert(key.clone(), index);

        debug!(fingerprint = %key, "subscription registered");
        true
    }

    /// 모든 구독을 제거합니다. 기존 컨텍스트의 값은 유지됩니다.
    pub fn clear(&self) {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *registry = Registry::default();
    }

    /// 등록된 구독 수를 반환합니다.
    pub fn subscription_count(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscriptions
            .len()
    }

    /// 컨텍스트에서 주소 값을 조회합니다.
    pub fn resolve<'a>(
        &self,
        ctx: &'a ExecutionContext,
        address: Address,
    ) -> Result<&'a Value, GatewayError> {
        ctx.get(address).ok_or(GatewayError::NotResolved {
            address,
            context: ctx.key(),
        })
    }

    /// 주소 값을 설정하고 준비된 구독을 호출합니다.
    ///
    /// 이미 설정된 주소면 `DuplicateAddress`를 반환하며 구독은 호출되지 않습니다.
    pub fn publish(
        &self,
        ctx: &mut ExecutionContext,
        address: Address,
        value: Value,
    ) -> Result<(), GatewayError> {
        ctx.insert(address, value)?;

        let ready = self.ready_callbacks(ctx, address);
        trace!(
            address = %address,
            context = ctx.key(),
            ready = ready.len(),
            "address published"
        );
        for callback in ready {
            callback.invoke(ctx);
        }
        Ok(())
    }

    /// 여러 주소를 순서대로 publish 합니다. 첫 번째 에러에서 멈춥니다.
    pub fn publish_all<I>(&self, ctx: &mut ExecutionContext, values: I) -> Result<(), GatewayError>
    where
        I: IntoIterator<Item = (Address, Value)>,
    {
        for (address, value) in values {
            self.publish(ctx, address, value)?;
        }
        Ok(())
    }

    /// `address`를 참조하면서 모든 주소가 준비된 구독의 콜백을 복제합니다.
    fn ready_callbacks(&self, ctx: &ExecutionContext, address: Address) -> Vec<Arc<dyn Subscriber>> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let Some(indices) = registry.by_address.get(&address) else {
            return Vec::new();
        };

        indices
            .iter()
            .filter_map(|&i| registry.subscriptions.get(i))
            .filter(|sub| sub.addresses.iter().all(|a| ctx.contains(*a)))
            .map(|sub| Arc::clone(&sub.callback))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Arc<dyn Subscriber>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let callback: Arc<dyn Subscriber> = Arc::new(move |_: &mut ExecutionContext| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = fingerprint(&[Address::HttpUrl, Address::HttpMethod]);
        let b = fingerprint(&[Address::HttpMethod, Address::HttpUrl, Address::HttpUrl]);
        assert_eq!(a, b);
        assert_eq!(a, "http.method,http.url");
    }

    #[test]
    fn fires_once_when_all_addresses_present() {
        let gateway = Gateway::new();
        let (count, callback) = counter();
        assert!(gateway.add_subscription(&[Address::HttpUrl, Address::HttpMethod], callback));

        let mut ctx = gateway.new_context();
        gateway
            .publish(&mut ctx, Address::HttpUrl, json!("/a"))
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        gateway
            .publish(&mut ctx, Address::HttpMethod, json!("GET"))
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // 관련 없는 주소는 재호출을 일으키지 않음
        gateway
            .publish(&mut ctx, Address::HttpClientIp, json!("10.0.0.1"))
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_fingerprint_is_noop() {
        let gateway = Gateway::new();
        let (first, cb1) = counter();
        let (second, cb2) = counter();
        assert!(gateway.add_subscription(&[Address::HttpUrl], cb1));
        assert!(!gateway.add_subscription(&[Address::HttpUrl, Address::HttpUrl], cb2));
        assert_eq!(gateway.subscription_count(), 1);

        let mut ctx = gateway.new_context();
        gateway
            .publish(&mut ctx, Address::HttpUrl, json!("/"))
            .unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_address_set_rejected() {
        let gateway = Gateway::new();
        let (_, callback) = counter();
        assert!(!gateway.add_subscription(&[], callback));
        assert_eq!(gateway.subscription_count(), 0);
    }

    #[test]
    fn duplicate_publish_fails_without_dispatch() {
        let gateway = Gateway::new();
        let (count, callback) = counter();
        gateway.add_subscription(&[Address::HttpMethod], callback);

        let mut ctx = gateway.new_context();
        gateway
            .publish(&mut ctx, Address::HttpMethod, json!("GET"))
            .unwrap();
        let err = gateway
            .publish(&mut ctx, Address::HttpMethod, json!("GET"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateAddress { .. }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolve_before_publish_fails() {
        let gateway = Gateway::new();
        let ctx = gateway.new_context();
        let err = gateway.resolve(&ctx, Address::HttpUrl).unwrap_err();
        assert!(matches!(err, GatewayError::NotResolved { .. }));
    }

    #[test]
    fn clear_removes_subscriptions() {
        let gateway = Gateway::new();
        let (count, callback) = counter();
        gateway.add_subscription(&[Address::HttpUrl], callback);
        gateway.clear();
        assert_eq!(gateway.subscription_count(), 0);

        let mut ctx = gateway.new_context();
        gateway
            .publish(&mut ctx, Address::HttpUrl, json!("/"))
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callback_may_reenter_gateway() {
        let gateway = Arc::new(Gateway::new());
        let inner = Arc::clone(&gateway);
        let callback: Arc<dyn Subscriber> = Arc::new(move |_: &mut ExecutionContext| {
            // 디스패치 중 잠금이 해제되어 있어야 함
            assert_eq!(inner.subscription_count(), 1);
        });
        gateway.add_subscription(&[Address::HttpUrl], callback);

        let mut ctx = gateway.new_context();
        gateway
            .publish(&mut ctx, Address::HttpUrl, json!("/"))
            .unwrap();
    }

    #[test]
    fn publish_all_stops_at_first_error() {
        let gateway = Gateway::new();
        let mut ctx = gateway.new_context();
        let result = gateway.publish_all(
            &mut ctx,
            [
                (Address::HttpMethod, json!("GET")),
                (Address::HttpMethod, json!("POST")),
                (Address::HttpUrl, json!("/")),
            ],
        );
        assert!(result.is_err());
        assert!(!ctx.contains(Address::HttpUrl));
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;
        use proptest::sample::subsequence;

        proptest! {
            #[test]
            fn fires_exactly_once_for_any_publish_order(
                required in subsequence(Address::ALL.to_vec(), 1..=4),
                order in Just(Address::ALL.to_vec()).prop_shuffle(),
            ) {
                let gateway = Gateway::new();
                let (count, callback) = counter();
                prop_assert!(gateway.add_subscription(&required, callback));

                let mut ctx = gateway.new_context();
                let mut remaining = required.len();
                for address in order {
                    gateway.publish(&mut ctx, address, json!(address.as_str())).unwrap();
                    if required.contains(&address) {
                        remaining -= 1;
                    }
                    let expected = usize::from(remaining == 0);
                    prop_assert_eq!(count.load(Ordering::SeqCst), expected);
                }
            }
        }
    }
}
