//! 프로토콜 메시지 정의
//!
//! 요청: `<COMMAND> key1=val1&key2=val2...`
//! 응답: `<code> <message>` 상태 줄 + `|`로 구분된 레코드 줄들
//!
//! 값 이스케이프: `&` -> `&amp;`, 줄바꿈 -> `<br />` (응답 필드는 `<br />` -> 줄바꿈)

use std::fmt;

use crate::{Error, Result};

/// 세션 없이 보낼 수 있는 명령
pub const SESSIONLESS_COMMANDS: [&str; 5] = ["PING", "ENCODING", "ENCRYPT", "AUTH", "VERSION"];

/// 세션 토큰 파라미터 이름
pub const SESSION_PARAM: &str = "s";

const LINE_BREAK: &str = "<br />";

/// 명령 파라미터 값
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => f.write_str(if *b { "1" } else { "0" }),
            Value::Int(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Text(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(n: $t) -> Self {
                    Value::Int(n as i64)
                }
            }
        )*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        i64::try_from(n)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Text(n.to_string()))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::from(n as u64)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// 순서가 유지되는 명령 파라미터 목록
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, Value)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// 빌더 형태 추가
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// 같은 키가 있으면 값을 교체, 없으면 끝에 추가
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// 명령 이름 정규화 (대문자)
pub fn canonical_command(command: &str) -> String {
    command.trim().to_ascii_uppercase()
}

/// 세션 토큰이 필요한 명령인지
pub fn requires_session(command: &str) -> bool {
    !SESSIONLESS_COMMANDS.contains(&command)
}

pub fn escape(value: &str) -> String {
    value.replace('&', "&amp;").replace('\n', LINE_BREAK)
}

pub fn unescape(field: &str) -> String {
    field.replace(LINE_BREAK, "\n")
}

/// 요청 줄 생성 (파라미터가 없으면 명령 이름만)
pub fn encode_request(command: &str, params: &Params) -> String {
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, escape(&v.to_string())))
        .collect::<Vec<_>>()
        .join("&");

    format!("{command} {query}").trim().to_string()
}

/// 요청 줄 파싱 (`encode_request`의 역; mock 서버/테스트용)
///
/// `&amp;`로 이스케이프된 값은 `&` 분할 후 다시 이어 붙인다.
pub fn parse_request(line: &str) -> (String, Params) {
    let line = line.trim();
    let (command, query) = line.split_once(' ').unwrap_or((line, ""));

    let mut pairs: Vec<String> = Vec::new();
    for part in query.split('&').filter(|p| !p.is_empty()) {
        match (part.strip_prefix("amp;"), pairs.last_mut()) {
            (Some(rest), Some(last)) => {
                last.push('&');
                last.push_str(rest);
            }
            _ => pairs.push(part.to_string()),
        }
    }

    let params = pairs
        .iter()
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair.as_str(), ""));
            (k.trim().to_string(), Value::Text(unescape(v)))
        })
        .collect();

    (canonical_command(command), params)
}

/// 명령 응답
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// 응답을 만든 명령 (대문자)
    pub command: String,

    /// 상태 코드
    pub code: u16,

    /// 상태 메시지
    pub message: String,

    /// 레코드 목록 (각 레코드는 필드 목록)
    pub data: Vec<Vec<String>>,
}

impl Response {
    /// 디코딩된 응답 텍스트 파싱
    pub fn parse(command: &str, text: &str) -> Result<Self> {
        let mut lines: Vec<&str> = text.split('\n').collect();
        if lines.len() > 1 && lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }

        let status = lines[0].trim_end_matches('\r');
        let (code, message) = status.split_once(' ').unwrap_or((status, ""));
        let code = code
            .parse()
            .map_err(|_| Error::Decode(format!("잘못된 상태 줄: {status:?}")))?;

        let data = lines[1..]
            .iter()
            .map(|line| {
                line.trim_end_matches('\r')
                    .split('|')
                    .map(unescape)
                    .collect()
            })
            .collect();

        Ok(Self {
            command: command.to_string(),
            code,
            message: message.to_string(),
            data,
        })
    }

    /// 네트워크 없이 로컬에서 만든 응답
    pub(crate) fn local(command: &str, code: u16, message: &str) -> Self {
        Self {
            command: command.to_string(),
            code,
            message: message.to_string(),
            data: Vec::new(),
        }
    }

    pub fn is_client_error(&self) -> bool {
        (500..600).contains(&self.code)
    }

    pub fn is_server_error(&self) -> bool {
        (600..700).contains(&self.code)
    }

    /// 5xx는 `Error::Client`, 6xx는 `Error::Server`
    pub fn into_result(self) -> Result<Self> {
        if self.is_client_error() {
            Err(Error::Client(self))
        } else if self.is_server_error() {
            Err(Error::Server(self))
        } else {
            Ok(self)
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}
