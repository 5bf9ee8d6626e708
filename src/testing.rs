//! 테스트용 가짜 데이터그램 소켓

use std::collections::VecDeque;
use std::io;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::transport::Datagram;

type Responder = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// 메모리 상의 데이터그램 소켓
///
/// 송신마다 (가상) 시각과 페이로드를 기록하고,
/// 응답기가 돌려준 응답을 수신 큐에 넣는다.
/// 응답이 없으면 `recv`는 영원히 대기하므로 타임아웃이 발생한다.
pub(crate) struct FakeSocket {
    sent: Mutex<Vec<(Instant, Vec<u8>)>>,
    inbox: Mutex<VecDeque<Vec<u8>>>,
    arrived: Notify,
    responder: Responder,
    /// 송신 시도를 기록한 뒤 항상 에러 반환
    fail_sends: bool,
}

impl FakeSocket {
    pub(crate) fn responding(
        responder: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            inbox: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
            responder: Box::new(responder),
            fail_sends: false,
        }
    }

    /// 응답하지 않는 소켓
    pub(crate) fn silent() -> Self {
        Self::responding(|_| None)
    }

    /// 네트워크 쓰기가 항상 실패하는 소켓
    pub(crate) fn failing() -> Self {
        Self {
            fail_sends: true,
            ..Self::silent()
        }
    }

    /// 송신 순서대로 응답 (`None`은 무응답, 목록이 끝나면 무응답)
    pub(crate) fn scripted(replies: Vec<Option<Vec<u8>>>) -> Self {
        let replies = Mutex::new(VecDeque::from(replies));
        Self::responding(move |_| replies.lock().pop_front().flatten())
    }

    pub(crate) fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub(crate) fn sent(&self) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .iter()
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub(crate) fn send_times(&self) -> Vec<Instant> {
        self.sent.lock().iter().map(|(at, _)| *at).collect()
    }
}

impl Datagram for FakeSocket {
    async fn send(&self, data: &[u8]) -> io::Result<usize> {
        self.sent.lock().push((Instant::now(), data.to_vec()));
        if self.fail_sends {
            return Err(io::Error::new(io::ErrorKind::Other, "network unreachable"));
        }
        if let Some(reply) = (self.responder)(data) {
            self.inbox.lock().push_back(reply);
            self.arrived.notify_one();
        }
        Ok(data.len())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let next = self.inbox.lock().pop_front();
            if let Some(reply) = next {
                let n = reply.len().min(buf.len());
                buf[..n].copy_from_slice(&reply[..n]);
                return Ok(n);
            }
            self.arrived.notified().await;
        }
    }
}
