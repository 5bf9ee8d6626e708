//! 전송 계층
//!
//! - UDP 소켓 하나, 원격 엔드포인트 하나
//! - Flood protection: 송신 이력/드롭 이력에 따라 최소 송신 간격 강제
//! - 송신 간격 계산, 대기, 송신, 응답 수신은 하나의 임계 구역에서 수행

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::FloodPolicy;
use crate::{Config, Error, Result};

/// 데이터그램 송수신 추상화
///
/// 실제 구현은 [`UdpLink`]; 테스트에서는 메모리 상의 가짜 소켓으로 교체한다.
pub trait Datagram: Send + Sync {
    /// 원격 엔드포인트로 데이터그램 하나 송신
    fn send(&self, data: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// 원격 엔드포인트에서 데이터그램 하나 수신
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

/// 로컬 포트에 바인딩된 UDP 소켓 + 고정 원격 주소
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl UdpLink {
    /// `local_port`에 바인딩 (원격 주소와 같은 주소 체계)
    pub async fn bind(local_port: u16, remote: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, local_port).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, local_port).into()
        };
        let socket = UdpSocket::bind(local).await?;
        info!("UDP bound to {} (remote {})", socket.local_addr()?, remote);
        Ok(Self { socket, remote })
    }

    /// 설정의 서버 주소를 한 번만 해석해서 바인딩
    pub async fn connect(config: &Config) -> Result<Self> {
        let remote = tokio::net::lookup_host((config.server_host.as_str(), config.server_port))
            .await?
            .next()
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("주소 해석 실패: {}", config.server_host),
                ))
            })?;
        Self::bind(config.local_port, remote).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

impl Datagram for UdpLink {
    async fn send(&self, data: &[u8]) -> io::Result<usize> {
        self.socket.send_to(data, self.remote).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let (n, from) = self.socket.recv_from(buf).await?;
            if from == self.remote {
                return Ok(n);
            }
            debug!("알 수 없는 발신자 {} 의 데이터그램 무시 ({} bytes)", from, n);
        }
    }
}

/// Flood protection 카운터
#[derive(Debug, Clone)]
pub struct FloodGate {
    policy: FloodPolicy,

    /// 마지막 송신 시각
    last_send: Option<Instant>,

    /// 누적 송신 수 (리셋하지 않음)
    send_count: u64,

    /// 연속 타임아웃 수 (성공 수신마다 1 감소, 최소 0)
    drop_count: u32,
}

impl FloodGate {
    pub fn new(policy: FloodPolicy) -> Self {
        Self {
            policy,
            last_send: None,
            send_count: 0,
            drop_count: 0,
        }
    }

    /// 현재 이력에 대한 최소 송신 간격
    pub fn required_delay(&self) -> Duration {
        self.policy.required_delay(self.send_count, self.drop_count)
    }

    /// `now`에 송신하려면 기다려야 하는 시간
    pub fn wait_time(&self, now: Instant) -> Duration {
        match self.last_send {
            Some(last) => (last + self.required_delay()).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    fn record_send(&mut self, at: Instant) {
        self.send_count += 1;
        self.last_send = Some(at);
    }

    fn record_drop(&mut self) {
        self.drop_count = self.drop_count.saturating_add(1);
    }

    fn record_reply(&mut self) {
        self.drop_count = self.drop_count.saturating_sub(1);
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            send_count: self.send_count,
            drop_count: self.drop_count,
            last_send: self.last_send,
            required_delay: self.required_delay(),
        }
    }
}

/// 전송 통계 스냅샷
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportStats {
    pub send_count: u64,
    pub drop_count: u32,
    pub last_send: Option<Instant>,
    pub required_delay: Duration,
}

/// Flood protection이 적용된 요청/응답 전송기
pub struct Transport<S = UdpLink> {
    socket: S,

    /// 송신 타이밍 결정 + 송신 + 수신을 직렬화하는 유일한 락
    gate: Mutex<FloodGate>,

    recv_timeout: Duration,

    max_datagram_size: usize,
}

impl Transport<UdpLink> {
    /// 설정대로 UDP 소켓 바인딩
    pub async fn connect(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(UdpLink::connect(config).await?, config))
    }
}

impl<S: Datagram> Transport<S> {
    pub fn new(socket: S, config: &Config) -> Self {
        Self {
            socket,
            gate: Mutex::new(FloodGate::new(config.flood)),
            recv_timeout: config.recv_timeout,
            max_datagram_size: config.max_datagram_size,
        }
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub async fn stats(&self) -> TransportStats {
        self.gate.lock().await.stats()
    }

    /// 데이터그램 송신 (flood protection 대기 포함)
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        self.check_size(data)?;
        let mut gate = self.gate.lock().await;
        self.dispatch(&mut gate, data).await
    }

    /// 응답 하나 수신 (최대 `recv_timeout` 대기)
    ///
    /// 대기 중에는 락을 잡지 않고 카운터 갱신 때만 잡는다.
    /// 동시에 진행 중인 `exchange`가 이 응답을 먼저 가져갈 수 있으므로
    /// 요청/응답 짝이 필요하면 `exchange`를 사용한다.
    pub async fn recv(&self) -> Result<Bytes> {
        let result = self.wait_reply().await;
        let mut gate = self.gate.lock().await;
        self.settle(&mut gate, result)
    }

    /// 송신 후 해당 응답 수신 (요청/응답 짝이 섞이지 않도록 락을 계속 유지)
    pub async fn exchange(&self, data: &[u8]) -> Result<Bytes> {
        self.check_size(data)?;
        let mut gate = self.gate.lock().await;
        self.dispatch(&mut gate, data).await?;
        let result = self.wait_reply().await;
        self.settle(&mut gate, result)
    }

    fn check_size(&self, data: &[u8]) -> Result<()> {
        if data.len() > self.max_datagram_size {
            return Err(Error::PayloadTooLarge {
                size: data.len(),
                max: self.max_datagram_size,
            });
        }
        Ok(())
    }

    async fn dispatch(&self, gate: &mut FloodGate, data: &[u8]) -> Result<()> {
        let wait = gate.wait_time(Instant::now());
        if !wait.is_zero() {
            debug!(
                "flood protection: {:?} 대기 (sent={}, dropped={})",
                wait, gate.send_count, gate.drop_count
            );
            sleep(wait).await;
        }

        let result = self.socket.send(data).await;
        // 송신 성공 여부와 관계없이 기록
        gate.record_send(Instant::now());
        result?;
        Ok(())
    }

    async fn wait_reply(&self) -> Option<io::Result<BytesMut>> {
        let mut buf = BytesMut::zeroed(self.max_datagram_size);
        match timeout(self.recv_timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                buf.truncate(n);
                Some(Ok(buf))
            }
            Ok(Err(e)) => Some(Err(e)),
            Err(_) => None,
        }
    }

    fn settle(&self, gate: &mut FloodGate, result: Option<io::Result<BytesMut>>) -> Result<Bytes> {
        match result {
            None => {
                gate.record_drop();
                warn!(
                    "응답 타임아웃 ({:?}), 연속 드롭 {}",
                    self.recv_timeout, gate.drop_count
                );
                Err(Error::Timeout(self.recv_timeout))
            }
            Some(Err(e)) => Err(e.into()),
            Some(Ok(buf)) => {
                gate.record_reply();
                if buf.is_empty() {
                    return Err(Error::NoData);
                }
                Ok(buf.freeze())
            }
        }
    }
}
