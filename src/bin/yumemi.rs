//! yumemi - AniDB mylist 추가 클라이언트
//!
//! 파일의 ed2k 해시를 계산해 MYLISTADD로 등록한다.
//!
//! 사용법:
//!   cargo run --release --bin yumemi -- [OPTIONS] FILES...
//!
//! 예시:
//!   # 서버 확인
//!   cargo run --release --bin yumemi -- --ping
//!
//!   # ed2k 링크만 출력
//!   cargo run --release --bin yumemi -- --link a.mkv b.mkv
//!
//!   # 시청 표시 + 암호화
//!   cargo run --release --bin yumemi -- -u user -p pass --encrypt APIKEY -w a.mkv

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tokio::task::JoinError;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

use yumemi::ed2k::{self, Ed2kLink};
use yumemi::{Client, Config, Params};

/// MYLISTADD 성공 코드 (추가됨, 이미 있음, 여러 개)
const MYLIST_OK: [u16; 3] = [210, 310, 311];

/// 명령행 설정
struct CliConfig {
    ping: bool,
    link: bool,
    username: Option<String>,
    password: Option<String>,
    api_key: Option<String>,
    watched: bool,
    view_date: u64,
    deleted: bool,
    edit: bool,
    verbose: bool,
    files: Vec<PathBuf>,
    config: Config,
}

impl CliConfig {
    fn new(config: Config) -> Self {
        Self {
            ping: false,
            link: false,
            username: std::env::var("YUMEMI_USERNAME").ok(),
            password: std::env::var("YUMEMI_PASSWORD").ok(),
            api_key: std::env::var("YUMEMI_ENCRYPT").ok(),
            watched: false,
            view_date: 0,
            deleted: false,
            edit: false,
            verbose: false,
            files: Vec::new(),
            config,
        }
    }
}

const HELP: &str = r#"yumemi - AniDB mylist 추가 클라이언트

사용법:
  yumemi [OPTIONS] FILES...

옵션:
  --ping                  API 서버 응답 확인
  --link                  ed2k 링크만 출력 (로그인 없음)
  -u, --username <NAME>   사용자 이름 (환경변수 YUMEMI_USERNAME)
  -p, --password <PASS>   비밀번호 (환경변수 YUMEMI_PASSWORD)
  --encrypt <API_KEY>     메시지 암호화 (환경변수 YUMEMI_ENCRYPT)
  -w, --watched           시청 표시
  -W, --view-date <TS>    시청 날짜 (유닉스 시간), -w 포함
  -d, --deleted           파일 상태를 삭제됨으로
  -e, --edit              기존 항목 수정
  -s, --server <HOST:PORT> API 서버 (기본: api.anidb.net:9000)
  -l, --local-port <PORT> 로컬 UDP 포트 (기본: 8888)
  -v, --verbose           디버그 로그
  -h, --help              이 도움말 출력

환경변수 YUMEMI_SERVER, YUMEMI_LOCAL_PORT, YUMEMI_RETRIES 도 적용된다.
"#;

fn parse_args(args: &[String], config: Config) -> Result<CliConfig, String> {
    let mut cli = CliConfig::new(config);

    let value = |i: usize| -> Result<&String, String> {
        args.get(i + 1).ok_or_else(|| format!("{} 옵션에 값이 필요함", args[i]))
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--ping" => cli.ping = true,
            "--link" => cli.link = true,
            "--username" | "-u" => {
                cli.username = Some(value(i)?.clone());
                i += 1;
            }
            "--password" | "-p" => {
                cli.password = Some(value(i)?.clone());
                i += 1;
            }
            "--encrypt" => {
                cli.api_key = Some(value(i)?.clone());
                i += 1;
            }
            "--watched" | "-w" => cli.watched = true,
            "--view-date" | "-W" => {
                cli.view_date = value(i)?
                    .parse()
                    .map_err(|_| "유효한 유닉스 시간 필요".to_string())?;
                i += 1;
            }
            "--deleted" | "-d" => cli.deleted = true,
            "--edit" | "-e" => cli.edit = true,
            "--server" | "-s" => {
                let server = value(i)?;
                match server.rsplit_once(':') {
                    Some((host, port)) => {
                        cli.config.server_host = host.to_string();
                        cli.config.server_port = parse_port(port)?;
                    }
                    None => cli.config.server_host = server.clone(),
                }
                i += 1;
            }
            "--local-port" | "-l" => {
                cli.config.local_port = parse_port(value(i)?)?;
                i += 1;
            }
            "--verbose" | "-v" => cli.verbose = true,
            "--help" | "-h" => {
                println!("{HELP}");
                std::process::exit(0);
            }
            arg if arg.starts_with('-') && arg.len() > 1 => {
                return Err(format!("알 수 없는 옵션: {arg}"));
            }
            file => cli.files.push(PathBuf::from(file)),
        }
        i += 1;
    }

    if cli.view_date != 0 {
        cli.watched = true;
    }
    Ok(cli)
}

fn parse_port(text: &str) -> Result<u16, String> {
    text.parse().map_err(|_| format!("유효한 포트 필요: {text}"))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let cli = match parse_args(&args, Config::from_env()?) {
        Ok(cli) => cli,
        Err(msg) => {
            eprintln!("ERROR: {msg}\n\n{HELP}");
            return Ok(ExitCode::from(2));
        }
    };

    // 로깅 설정
    let level = match cli.verbose {
        true => Level::DEBUG,
        false => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if cli.ping {
        return ping(cli.config).await;
    }

    if cli.files.is_empty() {
        eprintln!("ERROR: 파일이 필요함\n\n{HELP}");
        return Ok(ExitCode::from(2));
    }

    if cli.link {
        for (path, link) in cli.files.iter().zip(hash(cli.files.clone()).await?) {
            match link {
                Ok(link) => println!("{link}"),
                Err(e) => error!("{}: {}", path.display(), e),
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    mylist_add(cli).await
}

/// 응답 시간 측정
async fn ping(config: Config) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let client = Client::connect(config).await?;

    let start = Instant::now();
    let pong = client.ping().await;

    if pong {
        eprintln!("OK, {} ms", start.elapsed().as_millis());
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("AniDB API server is unavailable");
        Ok(ExitCode::FAILURE)
    }
}

/// 파일 해싱 (rayon 풀, 입력 순서 유지)
async fn hash(files: Vec<PathBuf>) -> Result<Vec<yumemi::Result<Ed2kLink>>, JoinError> {
    tokio::task::spawn_blocking(move || ed2k::hash_files(&files)).await
}

async fn mylist_add(cli: CliConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let credentials = (cli.username.as_deref(), cli.password.as_deref());
    let (Some(username), Some(password)) = credentials else {
        eprintln!("ERROR: 사용자 이름과 비밀번호가 필요함 (-u/-p)");
        return Ok(ExitCode::from(2));
    };

    info!(
        "Server: {}:{}",
        cli.config.server_host, cli.config.server_port
    );
    let client = Client::connect(cli.config.clone()).await?;

    // 해싱은 로그인과 동시에 진행
    let hashing = tokio::spawn(hash(cli.files.clone()));

    let login = async {
        if let Some(api_key) = &cli.api_key {
            client.begin_encryption(api_key, username).await?;
        }
        client.authenticate(username, password).await
    };
    let response = match login.await {
        Ok(response) => response,
        Err(e) => {
            eprintln!("ERROR: {e}");
            hashing.abort();
            return Ok(ExitCode::FAILURE);
        }
    };
    if response.code == 201 {
        eprintln!("New version available");
    }

    let view_date = match (cli.watched, cli.view_date) {
        (true, 0) => unix_now(),
        (_, date) => date,
    };

    let mut failed = false;
    for (path, link) in cli.files.iter().zip(hashing.await??) {
        let link = match link {
            Ok(link) => link,
            Err(e) => {
                error!("{}: {}", path.display(), e);
                failed = true;
                continue;
            }
        };
        debug!("{}", link);

        let params = Params::new()
            .with("ed2k", link.hash.as_str())
            .with("size", link.size)
            .with("state", if cli.deleted { 3 } else { 1 })
            .with("viewed", cli.watched)
            .with("viewdate", view_date)
            .with("edit", cli.edit);

        match client.issue("MYLISTADD", params).await {
            Ok(result) => {
                let status = match MYLIST_OK.contains(&result.code) {
                    true => " OK ",
                    false => "FAIL",
                };
                println!("[{}] {}: {}", status, result.message, path.display());
            }
            Err(e) => {
                eprintln!("ERROR: {e}");
                failed = true;
                break;
            }
        }
    }

    if let Err(e) = client.logout().await {
        debug!("로그아웃 실패: {}", e);
    }

    match failed {
        true => Ok(ExitCode::FAILURE),
        false => Ok(ExitCode::SUCCESS),
    }
}
