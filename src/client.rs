//! 세션 클라이언트
//!
//! - 명령 요청 생성, 세션 필요 명령 검사, 응답 파싱
//! - 활성 코덱/세션 토큰 관리 (ENCRYPT, AUTH, LOGOUT, ENCODING)
//! - 같은 클라이언트에 대한 명령은 하나씩 직렬화된다

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::codec::Encoding;
use crate::message::{self, Params, Response, SESSION_PARAM};
use crate::session::{Phase, SessionState, Transition};
use crate::transport::{Datagram, Transport, UdpLink};
use crate::{Config, Error, Result};

/// PING 성공 상태
pub const STATUS_PONG: u16 = 300;
/// AUTH 성공
pub const STATUS_LOGIN_ACCEPTED: u16 = 200;
/// AUTH 성공, 새 클라이언트 버전 있음
pub const STATUS_LOGIN_ACCEPTED_NEW_VERSION: u16 = 201;
/// LOGOUT 성공
pub const STATUS_LOGGED_OUT: u16 = 203;
/// UPTIME 성공 (세션 살아 있음)
pub const STATUS_UPTIME: u16 = 208;
/// ENCRYPT 성공
pub const STATUS_ENCRYPTION_ENABLED: u16 = 209;
/// ENCODING 성공
pub const STATUS_ENCODING_CHANGED: u16 = 219;
/// API 키 미설정
pub const STATUS_API_PASSWORD_NOT_DEFINED: u16 = 309;
/// 암호화 대상 사용자 없음
pub const STATUS_NO_SUCH_ENCRYPTION_USER: u16 = 394;
/// 로그인 필요
pub const STATUS_LOGIN_FIRST: u16 = 501;
/// 세션 무효
pub const STATUS_INVALID_SESSION: u16 = 506;

/// 세션 클라이언트
pub struct Client<S = UdpLink> {
    transport: Transport<S>,
    state: Mutex<SessionState>,
    config: Config,
}

impl Client<UdpLink> {
    /// 설정대로 UDP 소켓을 열고 클라이언트 생성
    pub async fn connect(config: Config) -> Result<Self> {
        let transport = Transport::connect(&config).await?;
        Ok(Self::with_transport(transport, config))
    }
}

impl<S: Datagram> Client<S> {
    pub fn with_transport(transport: Transport<S>, config: Config) -> Self {
        Self {
            state: Mutex::new(SessionState::new(config.default_encoding)),
            transport,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &Transport<S> {
        &self.transport
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.state.lock().await.token().is_some()
    }

    pub async fn is_encrypted(&self) -> bool {
        self.state.lock().await.is_encrypted()
    }

    pub async fn encoding(&self) -> Encoding {
        self.state.lock().await.encoding()
    }

    pub async fn session_token(&self) -> Option<String> {
        self.state.lock().await.token().map(str::to_string)
    }

    /// 명령 전송 후 응답 반환 (기본 재시도 횟수)
    ///
    /// 5xx 응답은 `Error::Client`, 6xx 응답은 `Error::Server`.
    /// 그 외 상태 코드의 성공 여부는 호출자가 확인한다.
    pub async fn issue(&self, command: &str, params: Params) -> Result<Response> {
        self.issue_with_retries(command, params, self.config.retries).await
    }

    /// 명령 전송 후 응답 반환 (타임아웃 시 `retries`번 재시도)
    pub async fn issue_with_retries(
        &self,
        command: &str,
        params: Params,
        retries: u32,
    ) -> Result<Response> {
        let mut state = self.state.lock().await;
        self.issue_locked(&mut state, command, params, retries).await
    }

    async fn issue_locked(
        &self,
        state: &mut SessionState,
        command: &str,
        mut params: Params,
        retries: u32,
    ) -> Result<Response> {
        let command = message::canonical_command(command);

        if message::requires_session(&command) {
            match state.token() {
                Some(token) => params.insert(SESSION_PARAM, token),
                None => {
                    return Err(Error::Client(Response::local(
                        &command,
                        STATUS_LOGIN_FIRST,
                        "LOGIN FIRST",
                    )))
                }
            }
        }

        let request = state.encode(&message::encode_request(&command, &params))?;

        let mut attempt = 0;
        let reply = loop {
            match self.transport.exchange(&request).await {
                Ok(reply) => break reply,
                Err(Error::Timeout(_)) if attempt < retries => {
                    attempt += 1;
                    warn!("{} 타임아웃, 재시도 {}/{}", command, attempt, retries);
                }
                Err(e) => return Err(e),
            }
        };

        let response = Response::parse(&command, &state.decode(&reply)?)?;
        debug!("{} -> {} {}", command, response.code, response.message);

        if message::requires_session(&command)
            && matches!(response.code, STATUS_LOGIN_FIRST | STATUS_INVALID_SESSION)
        {
            warn!("서버가 세션을 거부함 ({}), 세션 초기화", response.code);
            self.transition(state, Transition::Expired)?;
        }

        response.into_result()
    }

    /// API 서버 응답 확인 (실패는 모두 `false`)
    pub async fn ping(&self) -> bool {
        match self.issue("PING", Params::new()).await {
            Ok(response) => response.code == STATUS_PONG,
            Err(e) => {
                debug!("PING 실패: {}", e);
                false
            }
        }
    }

    /// 암호화 세션 시작 (AUTH 이전에 호출)
    ///
    /// 209 응답 메시지의 첫 필드(salt)와 API 키로 공유 키를 만든다.
    pub async fn begin_encryption(&self, api_key: &str, username: &str) -> Result<Response> {
        let mut state = self.state.lock().await;

        let params = Params::new().with("user", username).with("type", 1);
        let response = self.issue_locked(&mut state, "ENCRYPT", params, 0).await?;

        match response.code {
            STATUS_ENCRYPTION_ENABLED => {
                let salt = response
                    .message
                    .split_whitespace()
                    .next()
                    .ok_or_else(|| Error::Encrypt(response.clone()))?;
                let key = format!("{api_key}{salt}");
                self.transition(&mut state, Transition::Encrypted { key })?;
                info!("암호화 세션 시작");
                Ok(response)
            }
            STATUS_API_PASSWORD_NOT_DEFINED | STATUS_NO_SUCH_ENCRYPTION_USER => {
                Err(Error::Encrypt(response))
            }
            _ => Ok(response),
        }
    }

    /// 로그인
    ///
    /// 성공(200/201) 시 응답 메시지의 첫 필드를 세션 토큰으로 저장하고,
    /// 반환되는 응답의 메시지에서는 토큰을 제거한다.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Response> {
        let mut state = self.state.lock().await;

        let mut params = Params::new()
            .with("user", username)
            .with("pass", password)
            .with("protover", self.config.protocol_version)
            .with("client", self.config.client_name.as_str())
            .with("clientver", self.config.client_version)
            .with("enc", state.encoding().name());
        if self.config.compression {
            params.insert("comp", 1);
        }

        let mut response = match self.issue_locked(&mut state, "AUTH", params, 0).await {
            Ok(response) => response,
            Err(e) => {
                if e.response().is_some() {
                    self.transition(&mut state, Transition::Unauthenticated)?;
                }
                return Err(e);
            }
        };

        match response.code {
            STATUS_LOGIN_ACCEPTED | STATUS_LOGIN_ACCEPTED_NEW_VERSION => {
                let (token, message) = split_token(&response.message);
                if token.is_empty() {
                    return Err(Error::AuthenticationFailed(response));
                }
                let token = token.to_string();
                response.message = message.to_string();

                self.transition(&mut state, Transition::Authenticated { token })?;

                if response.code == STATUS_LOGIN_ACCEPTED_NEW_VERSION {
                    warn!("새 클라이언트 버전이 있음");
                }
                info!("로그인 성공: {}", username);
                Ok(response)
            }
            _ => {
                self.transition(&mut state, Transition::Unauthenticated)?;
                Err(Error::AuthenticationFailed(response))
            }
        }
    }

    /// 로그아웃 (203이면 세션/코덱 초기화)
    pub async fn logout(&self) -> Result<Response> {
        let mut state = self.state.lock().await;

        let response = self
            .issue_locked(&mut state, "LOGOUT", Params::new(), self.config.retries)
            .await?;

        if response.code == STATUS_LOGGED_OUT {
            self.transition(&mut state, Transition::LoggedOut)?;
            info!("로그아웃");
        }
        Ok(response)
    }

    /// 세션 문자 인코딩 변경 (219이면 `true`)
    pub async fn set_encoding(&self, name: &str) -> Result<bool> {
        let encoding: Encoding = name.parse()?;
        let mut state = self.state.lock().await;

        let params = Params::new().with("name", encoding.name());
        let response = self
            .issue_locked(&mut state, "ENCODING", params, self.config.retries)
            .await?;

        if response.code != STATUS_ENCODING_CHANGED {
            return Ok(false);
        }
        self.transition(&mut state, Transition::EncodingChanged(encoding))?;
        Ok(true)
    }

    /// 세션이 서버에서 아직 살아 있는지 확인 (UPTIME)
    ///
    /// 토큰이 없으면 패킷을 보내지 않고 `false`.
    pub async fn check_session(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.token().is_none() {
            return Ok(false);
        }

        let response = self
            .issue_locked(&mut state, "UPTIME", Params::new(), self.config.retries)
            .await?;
        Ok(response.code == STATUS_UPTIME)
    }

    fn transition(&self, state: &mut SessionState, transition: Transition) -> Result<()> {
        *state = state.apply(transition, self.config.default_encoding)?;
        Ok(())
    }
}

impl<S: Datagram + 'static> Client<S> {
    /// `keepalive_interval`마다 세션 확인, 실패하면 종료
    pub fn spawn_keepalive(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.keepalive_interval;
            let mut interval = interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                match self.check_session().await {
                    Ok(true) => debug!("keep-alive OK"),
                    Ok(false) => {
                        info!("세션 없음, keep-alive 종료");
                        break;
                    }
                    Err(e) => {
                        warn!("keep-alive 실패: {}", e);
                        break;
                    }
                }
            }
        })
    }
}

/// `"<token> <message>"` 분리
fn split_token(message: &str) -> (&str, &str) {
    let message = message.trim_start();
    match message.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim_start()),
        None => (message, ""),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex as SyncMutex;

    use super::*;
    use crate::codec::{Codec, CryptCodec};
    use crate::message::Value;
    use crate::testing::FakeSocket;

    fn client(socket: FakeSocket) -> Client<FakeSocket> {
        let config = Config::new();
        Client::with_transport(Transport::new(socket, &config), config)
    }

    fn replies(replies: &[&str]) -> FakeSocket {
        let replies = replies.iter().map(|r| Some(r.as_bytes().to_vec()));
        FakeSocket::scripted(replies.collect())
    }

    fn text(data: &[u8]) -> String {
        String::from_utf8(data.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_login_first_without_sending() {
        let client = client(FakeSocket::silent());

        let err = client
            .issue("mylistadd", Params::new().with("fid", 1))
            .await
            .unwrap_err();

        let response = err.response().unwrap();
        assert!(matches!(err, Error::Client(_)));
        assert_eq!(response.code, 501);
        assert_eq!(response.message, "LOGIN FIRST");
        assert_eq!(response.command, "MYLISTADD");
        assert_eq!(client.transport().socket().sent_count(), 0);
    }

    #[tokio::test]
    async fn test_issue_attaches_session_and_parses() {
        let client = client(replies(&[
            "200 sess99 LOGIN ACCEPTED",
            "200 BAR\nfoo|bar\nabc|xyz",
        ]));
        client.authenticate("user", "pass").await.unwrap();

        let response = client
            .issue("foo", Params::new().with("foo", "bar&abc"))
            .await
            .unwrap();

        assert_eq!(response.command, "FOO");
        assert_eq!(response.code, 200);
        assert_eq!(response.message, "BAR");
        assert_eq!(response.data, vec![vec!["foo", "bar"], vec!["abc", "xyz"]]);

        let sent = client.transport().socket().sent();
        assert_eq!(text(&sent[1]), "FOO foo=bar&amp;abc&s=sess99");
    }

    #[tokio::test]
    async fn test_auth_then_logout() {
        let client = client(replies(&[
            "200 sess99 LOGIN ACCEPTED",
            "219 ENCODING CHANGED",
            "203 LOGGED OUT",
        ]));

        let response = client.authenticate("user", "pass").await.unwrap();
        assert_eq!(response.code, 200);
        assert_eq!(response.message, "LOGIN ACCEPTED");
        assert_eq!(client.session_token().await.as_deref(), Some("sess99"));
        assert_eq!(client.phase().await, Phase::Authenticated);

        let sent = client.transport().socket().sent();
        let (command, params) = message::parse_request(&text(&sent[0]));
        assert_eq!(command, "AUTH");
        assert_eq!(params.get("user"), Some(&Value::Text("user".into())));
        assert_eq!(params.get("protover"), Some(&Value::Text("3".into())));
        assert_eq!(params.get("enc"), Some(&Value::Text("ASCII".into())));
        assert_eq!(params.get("comp"), Some(&Value::Text("1".into())));
        assert_eq!(params.get("s"), None);

        assert!(client.set_encoding("UTF-8").await.unwrap());
        assert_eq!(client.encoding().await, Encoding::Utf8);

        let response = client.logout().await.unwrap();
        assert_eq!(response.code, 203);
        assert_eq!(client.session_token().await, None);
        assert_eq!(client.phase().await, Phase::Anonymous);
        assert_eq!(client.encoding().await, Encoding::Ascii);
        assert!(!client.is_encrypted().await);

        let sent = client.transport().socket().sent();
        assert_eq!(text(&sent[2]), "LOGOUT s=sess99");
    }

    #[tokio::test]
    async fn test_auth_rejected() {
        let client = client(replies(&["500 LOGIN FAILED"]));

        let err = client.authenticate("user", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::Client(_)));
        assert_eq!(err.code(), Some(500));
        assert!(!client.is_logged_in().await);

        let client = self::client(replies(&["300 PONG"]));
        let err = client.authenticate("user", "pass").await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed(_)));
        assert_eq!(err.code(), Some(300));
        assert!(!client.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_status_errors() {
        let client = client(replies(&[
            "600 INTERNAL SERVER ERROR",
            "555 BANNED\nflooding",
        ]));

        let err = client.issue("PING", Params::new()).await.unwrap_err();
        assert!(matches!(err, Error::Server(_)));

        let err = client.issue("PING", Params::new()).await.unwrap_err();
        assert!(matches!(err, Error::Client(_)));
        assert_eq!(err.response().unwrap().data, vec![vec!["flooding"]]);
    }

    #[tokio::test]
    async fn test_server_side_session_expiry() {
        let client = client(replies(&["200 tok LOGIN ACCEPTED", "506 INVALID SESSION"]));
        client.authenticate("user", "pass").await.unwrap();

        let err = client
            .issue("MYLIST", Params::new().with("lid", 1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(506));
        assert!(!client.is_logged_in().await);
        assert_eq!(client.phase().await, Phase::Anonymous);
    }

    #[tokio::test]
    async fn test_escaping_roundtrip_through_echo() {
        let socket = FakeSocket::responding(|request| {
            let (_, params) = message::parse_request(std::str::from_utf8(request).ok()?);
            let note = params.get("note")?.to_string();
            let field = message::escape(&note).replace("&amp;", "&");
            Some(format!("200 ECHO\n{field}|x").into_bytes())
        });
        let client = client(socket);

        let original = "tom & jerry\nsecond line & more";
        let response = client
            .issue("PING", Params::new().with("note", original))
            .await
            .unwrap();

        assert_eq!(response.data[0][0], original);
    }

    #[tokio::test]
    async fn test_ping() {
        assert!(client(replies(&["300 PONG\n"])).ping().await);
        assert!(!client(replies(&["598 UNKNOWN COMMAND"])).ping().await);
        assert!(!client(replies(&["200 WHATEVER"])).ping().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_swallows_timeout() {
        let client = client(FakeSocket::silent());

        assert!(!client.ping().await);
        // 최초 송신 + 기본 재시도
        let attempts = client.config().retries as usize + 1;
        assert_eq!(client.transport().socket().sent_count(), attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_on_timeout() {
        let socket = FakeSocket::scripted(vec![None, None, Some(b"300 PONG".to_vec())]);
        let client = client(socket);

        let response = client
            .issue_with_retries("PING", Params::new(), 2)
            .await
            .unwrap();
        assert_eq!(response.code, 300);
        assert_eq!(client.transport().socket().sent_count(), 3);

        let client = self::client(FakeSocket::silent());
        let err = client
            .issue_with_retries("PING", Params::new(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(d) if d == Duration::from_secs(4)));
        assert_eq!(client.transport().socket().sent_count(), 1);
    }

    /// ENCRYPT 이후 요청/응답을 모두 암호화하는 가짜 서버
    fn encrypting_server(api_key: &'static str) -> FakeSocket {
        let codec: SyncMutex<Option<Codec>> = SyncMutex::new(None);
        FakeSocket::responding(move |request| {
            let mut codec = codec.lock();
            let line = match codec.as_ref() {
                Some(c) => c.decode(request).ok()?,
                None => text(request),
            };
            let (command, params) = message::parse_request(&line);
            let reply = match command.as_str() {
                "ENCRYPT" => {
                    let key = format!("{api_key}salt123");
                    *codec = Some(CryptCodec::new(Encoding::Ascii, &key).ok()?.into());
                    return Some(b"209 salt123 ENCRYPTION ENABLED".to_vec());
                }
                "AUTH" => "200 enctok LOGIN ACCEPTED",
                "UPTIME" if params.get("s").is_some() => "208 UPTIME\n12345",
                "LOGOUT" => "203 LOGGED OUT",
                _ => "598 UNKNOWN COMMAND",
            };
            codec.as_ref()?.encode(reply).ok()
        })
    }

    #[tokio::test]
    async fn test_encrypted_session() {
        let client = client(encrypting_server("apikey"));

        let response = client.begin_encryption("apikey", "user").await.unwrap();
        assert_eq!(response.code, 209);
        assert!(client.is_encrypted().await);
        assert_eq!(client.phase().await, Phase::Encrypting);

        client.authenticate("user", "pass").await.unwrap();
        assert_eq!(client.session_token().await.as_deref(), Some("enctok"));
        assert!(client.is_encrypted().await);

        assert!(client.check_session().await.unwrap());

        let sent = client.transport().socket().sent();
        assert_eq!(text(&sent[0]), "ENCRYPT user=user&type=1");
        assert!(!sent[1].starts_with(b"AUTH"));

        // 로그아웃 후에는 평문으로 돌아간다
        assert_eq!(client.logout().await.unwrap().code, 203);
        assert!(!client.is_encrypted().await);
        assert_eq!(client.phase().await, Phase::Anonymous);
        assert_eq!(client.encoding().await, Encoding::Ascii);
    }

    #[tokio::test]
    async fn test_encryption_refused() {
        let client = client(replies(&["309 API PASSWORD NOT DEFINED"]));

        let err = client.begin_encryption("apikey", "user").await.unwrap_err();
        assert!(matches!(err, Error::Encrypt(_)));
        assert_eq!(err.code(), Some(309));
        assert!(!client.is_encrypted().await);

        let client = self::client(replies(&["210 SOMETHING ELSE"]));
        let response = client.begin_encryption("apikey", "user").await.unwrap();
        assert_eq!(response.code, 210);
        assert!(!client.is_encrypted().await);
    }

    #[tokio::test]
    async fn test_check_session() {
        let client = client(replies(&[
            "200 tok LOGIN ACCEPTED",
            "208 UPTIME\n1000",
            "598 UNKNOWN",
        ]));

        // 토큰 없음: 패킷 없이 false
        assert!(!client.check_session().await.unwrap());
        assert_eq!(client.transport().socket().sent_count(), 0);

        client.authenticate("user", "pass").await.unwrap();
        assert!(client.check_session().await.unwrap());
        assert!(client.check_session().await.is_err());
    }

    #[tokio::test]
    async fn test_set_encoding() {
        let client = client(replies(&[
            "219 ENCODING CHANGED",
            "519 ENCODING NOT SUPPORTED",
        ]));

        assert!(client.set_encoding("utf8").await.unwrap());
        assert_eq!(client.encoding().await, Encoding::Utf8);

        let sent = client.transport().socket().sent();
        assert_eq!(text(&sent[0]), "ENCODING name=UTF-8");

        assert!(client.set_encoding("latin1").await.is_err());
        assert_eq!(client.encoding().await, Encoding::Utf8);

        let err = client.set_encoding("klingon").await.unwrap_err();
        assert!(matches!(err, Error::UnknownEncoding(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_stops_when_session_dies() {
        let client = Arc::new(client(replies(&[
            "200 tok LOGIN ACCEPTED",
            "208 UPTIME\n1",
            "506 INVALID SESSION",
        ])));
        client.authenticate("user", "pass").await.unwrap();

        client.clone().spawn_keepalive().await.unwrap();

        assert_eq!(client.transport().socket().sent_count(), 3);
        assert!(!client.is_logged_in().await);
    }

    #[test]
    fn test_split_token() {
        assert_eq!(
            split_token("sess99 LOGIN ACCEPTED"),
            ("sess99", "LOGIN ACCEPTED")
        );
        assert_eq!(split_token("sess99"), ("sess99", ""));
        assert_eq!(split_token(""), ("", ""));
    }
}
