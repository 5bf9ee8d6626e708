//! 코덱 모듈 - 프로토콜 텍스트 <-> 와이어 바이트 변환
//!
//! - `PlainCodec`: 문자 인코딩만 적용, 수신 시 `\0\0` 접두어가 있으면 zlib 해제
//! - `CryptCodec`: MD5(키) -> AES-128-ECB + PKCS#7 패딩, 내부적으로 `PlainCodec` 사용
//!
//! 세션당 활성 코덱은 하나이며, 세션 전환 시 통째로 교체된다.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use flate2::read::ZlibDecoder;
use md5::{Digest, Md5};

use crate::{Error, Result};

/// AES 블록 크기 (바이트)
pub const BLOCK_SIZE: usize = 16;

/// 압축 페이로드 표식
const COMPRESSED_MARKER: [u8; 2] = [0, 0];

/// 문자 인코딩
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Ascii,
    Utf8,
    Latin1,
}

impl Encoding {
    /// 프로토콜에서 쓰는 인코딩 이름
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Ascii => "ASCII",
            Encoding::Utf8 => "UTF-8",
            Encoding::Latin1 => "ISO-8859-1",
        }
    }

    pub fn encode(self, text: &str) -> Result<Vec<u8>> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Ascii => {
                if text.is_ascii() {
                    Ok(text.as_bytes().to_vec())
                } else {
                    Err(Error::Encode(format!("ASCII로 표현할 수 없는 문자: {text:?}")))
                }
            }
            Encoding::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        Error::Encode(format!("ISO-8859-1로 표현할 수 없는 문자: {c:?}"))
                    })
                })
                .collect(),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            Encoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| Error::Decode(format!("UTF-8 아님: {e}"))),
            Encoding::Ascii => {
                if bytes.is_ascii() {
                    Ok(bytes.iter().map(|&b| char::from(b)).collect())
                } else {
                    Err(Error::Decode("ASCII 범위 밖의 바이트".into()))
                }
            }
            Encoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASCII" | "US-ASCII" => Ok(Encoding::Ascii),
            "UTF-8" | "UTF8" => Ok(Encoding::Utf8),
            "ISO-8859-1" | "LATIN1" | "LATIN-1" => Ok(Encoding::Latin1),
            _ => Err(Error::UnknownEncoding(s.to_string())),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 평문 코덱
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlainCodec {
    encoding: Encoding,
}

impl PlainCodec {
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        self.encoding.encode(text)
    }

    pub fn decode(&self, data: &[u8]) -> Result<String> {
        match data.strip_prefix(&COMPRESSED_MARKER) {
            Some(compressed) => self.encoding.decode(&inflate(compressed)?),
            None => self.encoding.decode(data),
        }
    }
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4);
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| Error::Decode(format!("zlib 해제 실패: {e}")))?;
    Ok(out)
}

/// AES-128-ECB 암호화 코덱
#[derive(Clone)]
pub struct CryptCodec {
    plain: PlainCodec,
    cipher: Aes128,
    /// 인코딩 변경 시 키 재유도용 원본 키 문자열
    key: String,
}

impl CryptCodec {
    /// `key`를 인코딩한 바이트의 MD5를 AES-128 키로 사용
    pub fn new(encoding: Encoding, key: &str) -> Result<Self> {
        let key_hash = Md5::digest(encoding.encode(key)?);
        let cipher = Aes128::new_from_slice(&key_hash)
            .map_err(|_| Error::Crypto(format!("잘못된 AES 키 길이: {}", key_hash.len())))?;

        Ok(Self {
            plain: PlainCodec::new(encoding),
            cipher,
            key: key.to_string(),
        })
    }

    pub fn encoding(&self) -> Encoding {
        self.plain.encoding()
    }

    /// 같은 키, 다른 문자 인코딩
    pub fn with_encoding(&self, encoding: Encoding) -> Result<Self> {
        Self::new(encoding, &self.key)
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let mut data = pad(self.plain.encode(text)?);
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(data)
    }

    pub fn decode(&self, data: &[u8]) -> Result<String> {
        if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
            return Err(Error::Crypto(format!(
                "암호문 길이가 블록 크기의 배수가 아님: {} bytes",
                data.len()
            )));
        }

        let mut data = data.to_vec();
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }

        let unpadded = unpad(&data)?;
        self.plain.decode(unpadded)
    }
}

impl fmt::Debug for CryptCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptCodec")
            .field("encoding", &self.plain.encoding())
            .finish_non_exhaustive()
    }
}

/// PKCS#7 패딩 (항상 1..=16 바이트 추가)
fn pad(mut data: Vec<u8>) -> Vec<u8> {
    let n = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    data.resize(data.len() + n, n as u8);
    data
}

fn unpad(data: &[u8]) -> Result<&[u8]> {
    let n = data.last().copied().unwrap_or(0) as usize;
    if n == 0 || n > BLOCK_SIZE || n > data.len() {
        return Err(Error::Decode(format!("잘못된 PKCS#7 패딩 값: {n}")));
    }

    let (body, padding) = data.split_at(data.len() - n);
    if padding.iter().any(|&b| b as usize != n) {
        return Err(Error::Decode("PKCS#7 패딩 바이트 불일치".into()));
    }
    Ok(body)
}

/// 활성 코덱
#[derive(Debug, Clone)]
pub enum Codec {
    Plain(PlainCodec),
    Crypt(CryptCodec),
}

impl Codec {
    pub fn plain(encoding: Encoding) -> Self {
        Codec::Plain(PlainCodec::new(encoding))
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Codec::Plain(c) => c.encoding(),
            Codec::Crypt(c) => c.encoding(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Codec::Crypt(_))
    }

    /// 같은 종류의 코덱, 다른 문자 인코딩
    pub fn with_encoding(&self, encoding: Encoding) -> Result<Self> {
        Ok(match self {
            Codec::Plain(_) => Codec::plain(encoding),
            Codec::Crypt(c) => Codec::Crypt(c.with_encoding(encoding)?),
        })
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        match self {
            Codec::Plain(c) => c.encode(text),
            Codec::Crypt(c) => c.encode(text),
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<String> {
        match self {
            Codec::Plain(c) => c.decode(data),
            Codec::Crypt(c) => c.decode(data),
        }
    }
}

impl From<PlainCodec> for Codec {
    fn from(codec: PlainCodec) -> Self {
        Codec::Plain(codec)
    }
}

impl From<CryptCodec> for Codec {
    fn from(codec: CryptCodec) -> Self {
        Codec::Crypt(codec)
    }
}
