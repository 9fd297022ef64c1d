//! 주소 레지스트리 -- publish/subscribe 가능한 신호 이름의 닫힌 집합
//!
//! 주소는 런타임에 생성되지 않는 상수입니다. 룰 로딩 시 입력 주소 검증과
//! 게이트웨이의 구독 키로 사용됩니다.
//!
//! 룰 입력은 `address:key:path` 형식이며, 첫 번째 콜론 앞부분만
//! 레지스트리 키입니다. 나머지는 값 내부를 가리키는 key path입니다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 주소 레지스트리 버전
pub const ADDRESS_REGISTRY_VERSION: &str = "1.0.0";

/// 레지스트리에 정의된 신호 주소
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Address {
    /// 요청 URL (쿼리 문자열 포함 원본)
    HttpUrl,
    /// 요청 헤더 (쿠키 제외, 소문자 이름 -> 값)
    HttpHeaders,
    /// 요청 메서드
    HttpMethod,
    /// 클라이언트 IP
    HttpClientIp,
    /// 클라이언트 포트
    HttpClientPort,
    /// User-Agent
    HttpUserAgent,
    /// 파싱된 쿼리 파라미터
    HttpQuery,
    /// 파싱된 쿠키
    HttpCookies,
    /// 응답 상태 코드
    HttpResponseStatus,
}

impl Address {
    /// 레지스트리의 모든 주소
    pub const ALL: [Address; 9] = [
        Address::HttpUrl,
        Address::HttpHeaders,
        Address::HttpMethod,
        Address::HttpClientIp,
        Address::HttpClientPort,
        Address::HttpUserAgent,
        Address::HttpQuery,
        Address::HttpCookies,
        Address::HttpResponseStatus,
    ];

    /// 주소 이름을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Address::HttpUrl => "http.url",
            Address::HttpHeaders => "http.headers",
            Address::HttpMethod => "http.method",
            Address::HttpClientIp => "http.client_ip",
            Address::HttpClientPort => "http.client_port",
            Address::HttpUserAgent => "http.user_agent",
            Address::HttpQuery => "http.query",
            Address::HttpCookies => "http.cookies",
            Address::HttpResponseStatus => "http.response.status",
        }
    }

    /// 이름으로 주소를 찾습니다. 레지스트리에 없으면 `None`.
    pub fn parse(name: &str) -> Option<Address> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }

    /// 이름이 레지스트리에 있는지 확인합니다.
    pub fn is_valid(name: &str) -> bool {
        Self::parse(name).is_some()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 레지스트리에 없는 주소 이름
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown address '{0}'")]
pub struct UnknownAddress(pub String);

impl FromStr for Address {
    type Err = UnknownAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UnknownAddress(s.to_owned()))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// 룰 입력 문자열(`address:key:path`)을 주소와 key path로 분리합니다.
///
/// 주소 부분이 레지스트리에 없으면 `Err`로 원래 주소 이름을 돌려줍니다.
pub fn parse_input(input: &str) -> Result<(Address, Vec<String>), UnknownAddress> {
    let mut parts = input.split(':');
    // split은 최소 한 개의 조각을 반환
    let name = parts.next().unwrap_or_default();
    let address = name.parse::<Address>()?;
    let key_path = parts
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .collect();
    Ok((address, key_path))
}
