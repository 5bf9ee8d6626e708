//! 세션 상태 머신
//!
//! ```text
//!  Anonymous ──Encrypted──▶ Encrypting
//!      │                        │
//!      └──Authenticated──▶ Authenticated ◀──Authenticated──┘
//!
//!  (any) ──LoggedOut / Expired──▶ Anonymous (기본 인코딩 평문 코덱)
//! ```
//!
//! 코덱은 상태와 함께 보관되므로 "인증됐는데 코덱은 핸드쉐이크 이전 상태" 같은
//! 조합은 표현할 수 없다.

use tracing::debug;

use crate::codec::{Codec, CryptCodec, Encoding, PlainCodec};
use crate::Result;

/// 외부에 노출하는 세션 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Anonymous,
    Encrypting,
    Authenticated,
}

/// 세션 상태 (활성 코덱 포함)
#[derive(Debug, Clone)]
pub enum SessionState {
    /// 세션 없음, 평문 코덱
    Anonymous { codec: PlainCodec },

    /// 암호화 협상 완료, 인증 전
    Encrypting { codec: CryptCodec },

    /// 세션 토큰 발급됨
    Authenticated { token: String, codec: Codec },
}

/// 상태 전이 이벤트
#[derive(Debug, Clone)]
pub enum Transition {
    /// ENCRYPT 209: 공유 키로 암호화 코덱 전환
    Encrypted { key: String },

    /// AUTH 200/201: 세션 토큰 설정
    Authenticated { token: String },

    /// AUTH 실패: 토큰만 버리고 코덱은 유지
    Unauthenticated,

    /// ENCODING 219: 문자 인코딩만 교체
    EncodingChanged(Encoding),

    /// LOGOUT 203
    LoggedOut,

    /// 서버가 세션을 무효로 판단 (501/506)
    Expired,
}

impl SessionState {
    pub fn new(encoding: Encoding) -> Self {
        SessionState::Anonymous {
            codec: PlainCodec::new(encoding),
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            SessionState::Anonymous { .. } => Phase::Anonymous,
            SessionState::Encrypting { .. } => Phase::Encrypting,
            SessionState::Authenticated { .. } => Phase::Authenticated,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            SessionState::Authenticated { token, .. } => Some(token),
            _ => None,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            SessionState::Anonymous { codec } => codec.encoding(),
            SessionState::Encrypting { codec } => codec.encoding(),
            SessionState::Authenticated { codec, .. } => codec.encoding(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        match self {
            SessionState::Anonymous { .. } => false,
            SessionState::Encrypting { .. } => true,
            SessionState::Authenticated { codec, .. } => codec.is_encrypted(),
        }
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        match self {
            SessionState::Anonymous { codec } => codec.encode(text),
            SessionState::Encrypting { codec } => codec.encode(text),
            SessionState::Authenticated { codec, .. } => codec.encode(text),
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<String> {
        match self {
            SessionState::Anonymous { codec } => codec.decode(data),
            SessionState::Encrypting { codec } => codec.decode(data),
            SessionState::Authenticated { codec, .. } => codec.decode(data),
        }
    }

    /// 전이 함수
    ///
    /// 코덱 생성이 실패하면 상태는 바뀌지 않는다.
    pub fn apply(&self, transition: Transition, default_encoding: Encoding) -> Result<Self> {
        use SessionState::*;

        let next = match (self, transition) {
            (_, Transition::LoggedOut) | (_, Transition::Expired) => Self::new(default_encoding),

            (Anonymous { codec }, Transition::Encrypted { key }) => Encrypting {
                codec: CryptCodec::new(codec.encoding(), &key)?,
            },
            (Encrypting { codec }, Transition::Encrypted { key }) => Encrypting {
                codec: CryptCodec::new(codec.encoding(), &key)?,
            },
            (Authenticated { token, codec }, Transition::Encrypted { key }) => Authenticated {
                token: token.clone(),
                codec: CryptCodec::new(codec.encoding(), &key)?.into(),
            },

            (Anonymous { codec }, Transition::Authenticated { token }) => Authenticated {
                token,
                codec: (*codec).into(),
            },
            (Encrypting { codec }, Transition::Authenticated { token }) => Authenticated {
                token,
                codec: codec.clone().into(),
            },
            (Authenticated { codec, .. }, Transition::Authenticated { token }) => Authenticated {
                token,
                codec: codec.clone(),
            },

            (Authenticated { codec, .. }, Transition::Unauthenticated) => match codec {
                Codec::Plain(plain) => Anonymous { codec: *plain },
                Codec::Crypt(crypt) => Encrypting {
                    codec: crypt.clone(),
                },
            },
            (state, Transition::Unauthenticated) => state.clone(),

            (Anonymous { .. }, Transition::EncodingChanged(encoding)) => Self::new(encoding),
            (Encrypting { codec }, Transition::EncodingChanged(encoding)) => Encrypting {
                codec: codec.with_encoding(encoding)?,
            },
            (Authenticated { token, codec }, Transition::EncodingChanged(encoding)) => {
                Authenticated {
                    token: token.clone(),
                    codec: codec.with_encoding(encoding)?,
                }
            }
        };

        if next.phase() != self.phase() {
            debug!("세션 전이: {:?} -> {:?}", self.phase(), next.phase());
        }
        Ok(next)
    }
}
