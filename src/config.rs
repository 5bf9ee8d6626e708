//! 클라이언트 설정

use std::time::Duration;

use crate::codec::Encoding;
use crate::{
    Error, Result, DEFAULT_LOCAL_PORT, DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT, MAX_DATAGRAM_SIZE,
};

/// Flood protection 정책
///
/// 서버는 짧은 시간에 많은 패킷을 보내는 클라이언트를 차단한다.
/// 송신 카운터/드롭 카운터가 임계값을 넘으면 최소 송신 간격을 강제한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodPolicy {
    /// 누적 송신 수가 이 값을 넘으면 "Short Term" 간격 적용
    pub short_term_after: u64,

    /// "Short Term" 최소 송신 간격
    pub short_term_delay: Duration,

    /// 연속 타임아웃 수가 이 값을 넘으면 "Long Term" 간격 적용
    pub long_term_after: u32,

    /// "Long Term" 최소 송신 간격 (Short Term보다 우선)
    pub long_term_delay: Duration,
}

impl Default for FloodPolicy {
    fn default() -> Self {
        Self {
            short_term_after: 4,
            short_term_delay: Duration::from_secs(2),
            long_term_after: 4,
            long_term_delay: Duration::from_secs(4),
        }
    }
}

impl FloodPolicy {
    /// 구 프로토콜 세대의 임계값 (2패킷 이후부터 제한)
    pub fn strict() -> Self {
        Self {
            short_term_after: 2,
            long_term_after: 2,
            ..Self::default()
        }
    }

    /// 제한 없음 (로컬 mock 서버용)
    pub fn disabled() -> Self {
        Self {
            short_term_after: u64::MAX,
            short_term_delay: Duration::ZERO,
            long_term_after: u32::MAX,
            long_term_delay: Duration::ZERO,
        }
    }

    /// 현재 송신/드롭 카운터에 대해 요구되는 최소 송신 간격
    pub fn required_delay(&self, send_count: u64, drop_count: u32) -> Duration {
        let mut delay = Duration::ZERO;
        if send_count > self.short_term_after {
            delay = self.short_term_delay;
        }
        if drop_count > self.long_term_after {
            delay = self.long_term_delay;
        }
        delay
    }
}

/// yumemi 클라이언트 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// API 서버 호스트
    pub server_host: String,

    /// API 서버 포트
    pub server_port: u16,

    /// 로컬 바인드 포트 (서버는 이 포트로 응답)
    pub local_port: u16,

    /// 응답 대기 타임아웃
    pub recv_timeout: Duration,

    /// 송수신 데이터그램 최대 크기 (바이트)
    pub max_datagram_size: usize,

    /// 타임아웃 시 기본 재시도 횟수
    pub retries: u32,

    /// Flood protection 정책
    pub flood: FloodPolicy,

    /// AUTH에 보내는 클라이언트 이름
    pub client_name: String,

    /// AUTH에 보내는 클라이언트 버전
    pub client_version: u32,

    /// API 프로토콜 버전
    pub protocol_version: u32,

    /// 세션 시작/종료 시 사용하는 문자 인코딩
    pub default_encoding: Encoding,

    /// 서버 응답 압축 요청 (AUTH comp=1)
    pub compression: bool,

    /// 세션 keep-alive 주기
    pub keepalive_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: DEFAULT_SERVER_HOST.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            local_port: DEFAULT_LOCAL_PORT,
            recv_timeout: Duration::from_secs(4),
            max_datagram_size: MAX_DATAGRAM_SIZE,
            retries: 1,
            flood: FloodPolicy::default(),
            client_name: "yumemi".to_string(),
            client_version: 4,
            protocol_version: crate::PROTOCOL_VERSION,
            default_encoding: Encoding::Ascii,
            compression: true,
            keepalive_interval: Duration::from_secs(30 * 60),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 로컬 mock 서버용 설정
    pub fn local(server_port: u16, local_port: u16) -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port,
            local_port,
            flood: FloodPolicy::disabled(),
            ..Self::default()
        }
    }

    /// 환경 변수로 기본값 덮어쓰기
    ///
    /// - `YUMEMI_SERVER`: `host:port`
    /// - `YUMEMI_LOCAL_PORT`
    /// - `YUMEMI_RETRIES`
    pub fn from_env() -> Result<Self> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(server) = lookup("YUMEMI_SERVER") {
            let (host, port) = server.rsplit_once(':').ok_or_else(|| {
                Error::InvalidConfig(format!("YUMEMI_SERVER={server}: host:port 형식 필요"))
            })?;
            self.server_host = host.to_string();
            self.server_port = parse_var("YUMEMI_SERVER", port)?;
        }
        if let Some(port) = lookup("YUMEMI_LOCAL_PORT") {
            self.local_port = parse_var("YUMEMI_LOCAL_PORT", &port)?;
        }
        if let Some(retries) = lookup("YUMEMI_RETRIES") {
            self.retries = parse_var("YUMEMI_RETRIES", &retries)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.server_host.is_empty() {
            return Err(Error::InvalidConfig("server_host가 비어 있음".into()));
        }
        if self.recv_timeout.is_zero() {
            return Err(Error::InvalidConfig("recv_timeout은 0보다 커야 함".into()));
        }
        if self.max_datagram_size == 0 || self.max_datagram_size > 65_507 {
            return Err(Error::InvalidConfig(format!(
                "max_datagram_size 범위 초과: {}",
                self.max_datagram_size
            )));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{key}={value}: 숫자 필요")))
}
