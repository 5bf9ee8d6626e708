//! # yumemi
//!
//! AniDB UDP API 클라이언트 코어
//!
//! ## 핵심 특징
//! - **Flood protection**: 송신 간격을 송신/유실 횟수에 따라 자동 조절
//! - **코덱**: 평문(ASCII/UTF-8/ISO-8859-1), zlib 압축 응답, AES-128-ECB 암호화
//! - **세션 상태 머신**: ENCRYPT -> AUTH -> LOGOUT, 세션 필요 명령 자동 검사
//! - **ed2k 해시**: 9,728,000 바이트 청크 단위 MD4, 스트리밍 + 병렬 파일 해싱

pub mod client;
pub mod codec;
pub mod config;
pub mod ed2k;
pub mod error;
pub mod message;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use codec::{Codec, CryptCodec, Encoding, PlainCodec};
pub use config::{Config, FloodPolicy};
pub use ed2k::{Ed2k, Ed2kLink};
pub use error::{Error, Result};
pub use message::{Params, Response, Value};
pub use session::{Phase, SessionState};
pub use transport::{Datagram, Transport, TransportStats, UdpLink};

/// API 프로토콜 버전 (AUTH `protover`)
pub const PROTOCOL_VERSION: u32 = 3;

/// 최대 데이터그램 크기 (바이트)
pub const MAX_DATAGRAM_SIZE: usize = 1400;

/// 기본 API 서버
pub const DEFAULT_SERVER_HOST: &str = "api.anidb.net";

pub const DEFAULT_SERVER_PORT: u16 = 9000;

pub const DEFAULT_LOCAL_PORT: u16 = 8888;
