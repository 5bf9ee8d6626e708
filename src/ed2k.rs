//! ed2k 해시
//!
//! - Chunk: 9,728,000 바이트 고정 크기 윈도우
//! - 청크별 MD4 digest를 계산하고, 청크가 2개 이상이면 digest들을 다시 MD4로 접는다
//! - 청크 1개 이하 입력은 내부 MD4 digest가 그대로 결과

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use md4::{Digest, Md4};
use rayon::prelude::*;
use regex::Regex;

use crate::{Error, Result};

/// 해시 청크 크기 (바이트)
pub const CHUNK_SIZE: u64 = 9_728_000;

/// digest 크기 (바이트)
pub const DIGEST_SIZE: usize = 16;

/// 파일 읽기 블록 크기 (청크 크기와 무관)
const READ_BLOCK_SIZE: usize = 64 * 1024;

/// 스트리밍 ed2k 해셔
///
/// `Clone`은 진행 중인 상태의 독립적인 깊은 복사본을 만든다.
#[derive(Clone, Default)]
pub struct Ed2k {
    /// 현재 청크의 MD4
    partial: Md4,

    /// 완료된 청크 digest들을 접는 MD4
    folded: Md4,

    /// 지금까지 처리한 총 바이트 수
    size: u64,
}

impl Ed2k {
    pub fn new() -> Self {
        Self::default()
    }

    /// 지금까지 처리한 총 바이트 수
    pub fn size(&self) -> u64 {
        self.size
    }

    /// 데이터 추가
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            // 청크 경계를 넘어 새 데이터가 들어올 때만 이전 청크를 접는다
            if self.size > 0 && self.size % CHUNK_SIZE == 0 {
                let digest = std::mem::take(&mut self.partial).finalize();
                self.folded.update(digest);
            }

            let room = CHUNK_SIZE - self.size % CHUNK_SIZE;
            let take = data.len().min(usize::try_from(room).unwrap_or(usize::MAX));

            self.partial.update(&data[..take]);
            self.size += take as u64;
            data = &data[take..];
        }
    }

    /// digest 계산 (상태는 변하지 않음)
    pub fn digest(&self) -> [u8; DIGEST_SIZE] {
        let digest = if self.size > CHUNK_SIZE {
            let mut folded = self.folded.clone();
            folded.update(self.partial.clone().finalize());
            folded.finalize()
        } else {
            self.partial.clone().finalize()
        };

        let mut out = [0u8; DIGEST_SIZE];
        out.copy_from_slice(&digest);
        out
    }

    /// 16진수 digest
    pub fn hex_digest(&self) -> String {
        hex::encode(self.digest())
    }
}

impl fmt::Debug for Ed2k {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed2k")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// 파일의 ed2k 해시 (16진수)
pub fn file_hash(path: impl AsRef<Path>) -> Result<String> {
    Ok(hash_reader(File::open(path)?)?.hex_digest())
}

fn hash_reader(mut reader: impl Read) -> Result<Ed2k> {
    let mut ed2k = Ed2k::new();
    let mut buf = vec![0u8; READ_BLOCK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        ed2k.update(&buf[..n]);
    }
    Ok(ed2k)
}

/// ed2k 파일 링크: `ed2k://|file|<name>|<size>|<hash>|/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ed2kLink {
    pub name: String,
    pub size: u64,
    pub hash: String,
}

impl fmt::Display for Ed2kLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ed2k://|file|{}|{}|{}|/", self.name, self.size, self.hash)
    }
}

impl FromStr for Ed2kLink {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_link(s)
    }
}

fn link_regex() -> &'static Regex {
    static LINK: OnceLock<Regex> = OnceLock::new();
    LINK.get_or_init(|| {
        Regex::new(r"^ed2k://\|file\|(?P<name>[^|]+)\|(?P<size>[0-9]+)\|(?P<hash>[0-9A-Fa-f]{32})\|/?$")
            .unwrap_or_else(|e| unreachable!("ed2k 링크 정규식 오류: {e}"))
    })
}

/// ed2k 링크 파싱 (끝의 `/`는 선택)
pub fn parse_link(text: &str) -> Result<Ed2kLink> {
    let caps = link_regex()
        .captures(text.trim())
        .ok_or_else(|| Error::Parse(format!("유효하지 않은 ed2k 링크: {text}")))?;

    let size = caps["size"]
        .parse()
        .map_err(|_| Error::Parse(format!("파일 크기 범위 초과: {}", &caps["size"])))?;

    Ok(Ed2kLink {
        name: caps["name"].to_string(),
        size,
        hash: caps["hash"].to_string(),
    })
}

/// 파일로부터 ed2k 링크 생성
pub fn file_link(path: impl AsRef<Path>) -> Result<Ed2kLink> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Parse(format!("파일 이름 없음: {}", path.display())))?;

    let ed2k = hash_reader(File::open(path)?)?;

    Ok(Ed2kLink {
        name,
        size: ed2k.size(),
        hash: ed2k.hex_digest(),
    })
}

/// 여러 파일을 병렬로 해싱 (입력 순서 유지)
pub fn hash_files(paths: &[PathBuf]) -> Vec<Result<Ed2kLink>> {
    paths.par_iter().map(file_link).collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rand::Rng;

    use super::*;

    const CHUNK: usize = CHUNK_SIZE as usize;

    fn ed2k_of(data: &[u8]) -> String {
        let mut ed2k = Ed2k::new();
        ed2k.update(data);
        ed2k.hex_digest()
    }

    #[test]
    fn test_small_inputs() {
        assert_eq!(ed2k_of(b""), "31d6cfe0d16ae931b73c59d7e0c089c0");
        assert_eq!(ed2k_of(b"abc"), "a448017aaf21d8525fc10ae87aa6729d");
        assert_eq!(ed2k_of(b"\x00"), "47c61a0fa8738ba77308a8a600f88e4b");
    }

    #[test]
    fn test_chunk_boundaries() {
        let data = vec![b'a'; 2 * CHUNK + 1024];

        assert_eq!(ed2k_of(&data[..CHUNK]), "8ea8fbe060d8102e12a77e6a7595737c");
        assert_eq!(ed2k_of(&data[..CHUNK + 1]), "748c0171a2d42d28afb644ef3e17f4e7");
        assert_eq!(ed2k_of(&data[..2 * CHUNK]), "01fe9a70b2bd81aa1aad1da1df86c358");
        assert_eq!(ed2k_of(&data), "2919bd8611ea3d73f19ef37db5a2d94d");
    }

    #[test]
    fn test_split_updates_match_single_update() {
        let data: Vec<u8> = (0..CHUNK + 5000).map(|i| (i % 251) as u8).collect();
        let expected = ed2k_of(&data);

        let mut rng = rand::thread_rng();
        for _ in 0..4 {
            let mut ed2k = Ed2k::new();
            let mut rest = &data[..];
            while !rest.is_empty() {
                let take = rng.gen_range(1..=rest.len().min(3 * 1024 * 1024));
                ed2k.update(&rest[..take]);
                rest = &rest[take..];
            }
            assert_eq!(ed2k.hex_digest(), expected);
        }

        // 청크 경계에 정확히 걸친 분할
        let mut ed2k = Ed2k::new();
        ed2k.update(&data[..CHUNK]);
        ed2k.update(&data[CHUNK..]);
        assert_eq!(ed2k.hex_digest(), expected);
    }

    #[test]
    fn test_digest_does_not_mutate_and_copy_is_independent() {
        let data = vec![b'a'; CHUNK + 1];

        let mut ed2k = Ed2k::new();
        ed2k.update(&data[..CHUNK]);
        let snapshot = ed2k.clone();

        // 반복 읽기
        assert_eq!(ed2k.hex_digest(), ed2k.hex_digest());

        ed2k.update(&data[CHUNK..]);
        assert_eq!(ed2k.hex_digest(), "748c0171a2d42d28afb644ef3e17f4e7");
        assert_eq!(snapshot.hex_digest(), "8ea8fbe060d8102e12a77e6a7595737c");
        assert_eq!(snapshot.size(), CHUNK_SIZE);
    }

    #[test]
    fn test_file_hash_and_link() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\x00").unwrap();
        file.flush().unwrap();

        assert_eq!(file_hash(file.path()).unwrap(), "47c61a0fa8738ba77308a8a600f88e4b");

        let link = file_link(file.path()).unwrap();
        assert_eq!(link.size, 1);
        assert_eq!(link.hash, "47c61a0fa8738ba77308a8a600f88e4b");
        assert_eq!(parse_link(&link.to_string()).unwrap(), link);
    }

    #[test]
    fn test_hash_files_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for (i, content) in [&b"abc"[..], b"", b"\x00"].iter().enumerate() {
            let path = dir.path().join(format!("{i}.bin"));
            std::fs::write(&path, content).unwrap();
            paths.push(path);
        }
        paths.push(dir.path().join("missing.bin"));

        let results = hash_files(&paths);

        assert_eq!(results.len(), 4);
        assert_eq!(
            results[0].as_ref().unwrap().hash,
            "a448017aaf21d8525fc10ae87aa6729d"
        );
        assert_eq!(results[1].as_ref().unwrap().size, 0);
        assert_eq!(results[2].as_ref().unwrap().name, "2.bin");
        assert!(matches!(results[3], Err(Error::Io(_))));
    }

    #[test]
    fn test_parse_link() {
        let expected = Ed2kLink {
            name: "01 - Where You Belong - [HorribleSubs](cf74da2b).mkv".into(),
            size: 229550436,
            hash: "88c7b6e493e653b3e14fae43a8712327".into(),
        };

        let with_slash = parse_link(
            "ed2k://|file|01 - Where You Belong - [HorribleSubs](cf74da2b).mkv\
             |229550436|88c7b6e493e653b3e14fae43a8712327|/",
        )
        .unwrap();
        let without_slash: Ed2kLink = "ed2k://|file|01 - Where You Belong - [HorribleSubs](cf74da2b).mkv\
             |229550436|88c7b6e493e653b3e14fae43a8712327|"
            .parse()
            .unwrap();

        assert_eq!(with_slash, expected);
        assert_eq!(without_slash, expected);
    }

    #[test]
    fn test_parse_link_rejects_malformed() {
        let bad = [
            // 리터럴 세그먼트 불일치
            "ed2k://|files|a.mkv|1|88c7b6e493e653b3e14fae43a8712327|/",
            // 해시 길이
            "ed2k://|file|a.mkv|1|88c7b6e493e653b3e14fae43a871232|/",
            // 16진수가 아닌 해시
            "ed2k://|file|a.mkv|1|88c7b6e493e653b3e14fae43a871232z|/",
            // 숫자가 아닌 크기
            "ed2k://|file|a.mkv|12a|88c7b6e493e653b3e14fae43a8712327|/",
            "ed2k://|file|a.mkv|-1|88c7b6e493e653b3e14fae43a8712327|/",
            // 구조
            "ed2k://|file|a.mkv|1|88c7b6e493e653b3e14fae43a8712327",
            "http://|file|a.mkv|1|88c7b6e493e653b3e14fae43a8712327|/",
            "",
        ];

        for link in bad {
            let result = parse_link(link);
            assert!(matches!(result, Err(Error::Parse(_))), "accepted: {link}");
        }
    }
}
