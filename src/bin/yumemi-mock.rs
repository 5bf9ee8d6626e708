//! yumemi-mock - 로컬 테스트용 AniDB UDP API 서버
//!
//! 평문 요청만 처리하며 세션 토큰은 항상 `sessid`.
//!
//! 사용법:
//!   cargo run --bin yumemi-mock -- [--port 9000]
//!
//! 클라이언트:
//!   YUMEMI_SERVER=127.0.0.1:9000 cargo run --bin yumemi -- -u user -p user FILES...

use std::net::SocketAddr;

use rand::Rng;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use yumemi::message::{self, Params};
use yumemi::MAX_DATAGRAM_SIZE;

const SESSION_ID: &str = "sessid";

/// 서버 설정
struct MockConfig {
    bind_addr: SocketAddr,
    verbose: bool,
}

fn parse_args() -> Result<MockConfig, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = MockConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], yumemi::DEFAULT_SERVER_PORT)),
        verbose: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                let port = args.get(i + 1).ok_or("--port 옵션에 값이 필요함")?;
                config.bind_addr.set_port(port.parse().map_err(|_| "유효한 포트 필요")?);
                i += 1;
            }
            "--bind" | "-b" => {
                let addr = args.get(i + 1).ok_or("--bind 옵션에 값이 필요함")?;
                config.bind_addr = addr.parse().map_err(|_| "유효한 주소 필요")?;
                i += 1;
            }
            "--verbose" | "-v" => config.verbose = true,
            "--help" | "-h" => {
                println!(
                    r#"yumemi-mock - 로컬 테스트용 AniDB UDP API 서버

옵션:
  -p, --port <PORT>   포트 (기본: 9000)
  -b, --bind <ADDR>   바인드 주소 (기본: 127.0.0.1:9000)
  -v, --verbose       디버그 로그
  -h, --help          이 도움말 출력

응답:
  PING      300 PONG
  AUTH      user == pass 이면 200 sessid LOGIN ACCEPTED, 아니면 500
  LOGOUT    203 LOGGED OUT
  UPTIME    208 UPTIME
  ENCODING  219 ENCODING CHANGED
  MYLISTADD 210 MYLIST ENTRY ADDED (+lid), 파라미터 부족 시 505
  VOTE      260 VOTED
"#
                );
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {other}")),
        }
        i += 1;
    }

    Ok(config)
}

/// 요청 한 줄에 대한 응답
fn respond(line: &str) -> String {
    let (command, params) = message::parse_request(line);
    let text = |key: &str| params.get(key).map(|v| v.to_string()).unwrap_or_default();

    if message::requires_session(&command) {
        match params.get(message::SESSION_PARAM) {
            None => return "506 INVALID SESSION\n".to_string(),
            Some(s) if s.to_string() != SESSION_ID => return "502 ACCESS DENIED\n".to_string(),
            Some(_) => {}
        }
    }

    match command.as_str() {
        "PING" => "300 PONG\n".to_string(),
        "AUTH" => {
            if params.get("user").is_some() && text("user") == text("pass") {
                format!("200 {SESSION_ID} LOGIN ACCEPTED\nlocalhost")
            } else {
                "500 LOGIN FAILED\n".to_string()
            }
        }
        "LOGOUT" => "203 LOGGED OUT\n".to_string(),
        "UPTIME" => "208 UPTIME\n0".to_string(),
        "ENCODING" => "219 ENCODING CHANGED\n".to_string(),
        "MYLISTADD" => mylist_add(&params),
        "VOTE" => format!(
            "260 VOTED\nAnime|{}|{}|{}",
            text("value"),
            text("type"),
            text("id")
        ),
        _ => "598 UNKNOWN COMMAND\n".to_string(),
    }
}

fn mylist_add(params: &Params) -> String {
    let has = |key: &str| params.get(key).is_some_and(|v| !v.to_string().is_empty());
    let edit = params.get("edit").is_some_and(|v| v.to_string() == "1");

    if !(has("fid") || (has("size") && has("ed2k")) || (has("lid") && edit)) {
        return "505 ILLEGAL INPUT OR ACCESS DENIED\n".to_string();
    }
    let lid: u32 = rand::thread_rng().gen_range(1..=1_000_000_000);
    format!("210 MYLIST ENTRY ADDED\n{lid}")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_args()?;

    // 로깅 설정
    let level = match config.verbose {
        true => Level::DEBUG,
        false => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let socket = UdpSocket::bind(config.bind_addr).await?;
    info!("Mock server listening on {}", socket.local_addr()?);

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (n, peer) = tokio::select! {
            result = socket.recv_from(&mut buf) => result?,
            _ = tokio::signal::ctrl_c() => {
                info!("bye");
                return Ok(());
            }
        };

        let line = match std::str::from_utf8(&buf[..n]) {
            Ok(line) => line,
            Err(e) => {
                warn!("{}: UTF-8 아님 ({})", peer, e);
                continue;
            }
        };

        let reply = respond(line);
        debug!("{} {:?} -> {:?}", peer, line, reply);

        if let Err(e) = socket.send_to(reply.as_bytes(), peer).await {
            warn!("{}: 송신 실패 ({})", peer, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth() {
        assert_eq!(
            respond("AUTH user=a&pass=a&protover=3"),
            "200 sessid LOGIN ACCEPTED\nlocalhost"
        );
        assert_eq!(respond("AUTH user=a&pass=b"), "500 LOGIN FAILED\n");
    }

    #[test]
    fn test_session_required() {
        assert_eq!(respond("LOGOUT"), "506 INVALID SESSION\n");
        assert_eq!(respond("LOGOUT s=other"), "502 ACCESS DENIED\n");
        assert_eq!(respond("LOGOUT s=sessid"), "203 LOGGED OUT\n");
        assert_eq!(respond("PING"), "300 PONG\n");
        assert_eq!(respond("FOO s=sessid"), "598 UNKNOWN COMMAND\n");
    }

    #[test]
    fn test_mylist_add() {
        let added = respond("MYLISTADD ed2k=31d6cfe0d16ae931b73c59d7e0c089c0&size=0&s=sessid");
        let mut lines = added.lines();
        assert_eq!(lines.next(), Some("210 MYLIST ENTRY ADDED"));
        assert!(lines.next().is_some_and(|lid| lid.parse::<u32>().is_ok()));

        assert!(respond("MYLISTADD size=1&s=sessid").starts_with("505"));
        assert!(respond("MYLISTADD lid=5&edit=1&s=sessid").starts_with("210"));
    }

    #[test]
    fn test_vote_echo() {
        assert_eq!(
            respond("VOTE id=1&type=2&value=800&s=sessid"),
            "260 VOTED\nAnime|800|2|1"
        );
    }
}
