//! 에러 타입 정의

use std::time::Duration;

use thiserror::Error;

use crate::message::Response;

/// yumemi 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("페이로드 크기 초과: {size} bytes (최대 {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("응답 타임아웃: {0:?} 동안 응답 없음")]
    Timeout(Duration),

    #[error("API에서 빈 데이터그램 수신")]
    NoData,

    #[error("인코딩 실패: {0}")]
    Encode(String),

    #[error("디코딩 실패: {0}")]
    Decode(String),

    #[error("암호화 에러: {0}")]
    Crypto(String),

    /// 5xx 응답 (로컬에서 만든 `501 LOGIN FIRST` 포함)
    #[error("클라이언트 에러: {} {}", .0.code, .0.message)]
    Client(Response),

    /// 6xx 응답
    #[error("서버 에러: {} {}", .0.code, .0.message)]
    Server(Response),

    #[error("암호화 세션 협상 실패: {} {}", .0.code, .0.message)]
    Encrypt(Response),

    #[error("인증 실패: {} {}", .0.code, .0.message)]
    AuthenticationFailed(Response),

    #[error("ed2k 링크 파싱 실패: {0}")]
    Parse(String),

    #[error("지원하지 않는 인코딩: {0}")]
    UnknownEncoding(String),

    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// 에러를 일으킨 응답 (상태 코드 에러인 경우)
    pub fn response(&self) -> Option<&Response> {
        match self {
            Error::Client(r)
            | Error::Server(r)
            | Error::Encrypt(r)
            | Error::AuthenticationFailed(r) => Some(r),
            _ => None,
        }
    }

    /// 응답 상태 코드
    pub fn code(&self) -> Option<u16> {
        self.response().map(|r| r.code)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
