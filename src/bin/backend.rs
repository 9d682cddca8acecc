#![forbid(unsafe_code)]

//! Axum backend exposing the media-grab API.
//!
//! Three JSON endpoints drive the whole flow: `/api/info` classifies what the
//! extractor can see at a URL, `/api/download` materializes one chosen format,
//! and `/api/download_audio` produces a standalone mp3. Produced files are
//! then served back as attachments from the download root. All heavy lifting
//! happens inside yt-dlp; the backend only decides what to ask it for.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, State},
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use mediagrab_tools::config::{RuntimeOverrides, resolve_runtime_settings};
use mediagrab_tools::formats::{
    DownloadDirective, FormatEntry, FormatKind, audio_extract_directive, build_directive, classify,
};
use mediagrab_tools::security::{ensure_engine_available, ensure_not_root};
use mediagrab_tools::ytdlp::{DownloadRoot, Engine};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;

#[derive(Debug, Clone)]
struct BackendArgs {
    download_root: PathBuf,
    www_root: PathBuf,
    port: u16,
    listen_host: IpAddr,
    ytdlp_bin: PathBuf,
    timeout_secs: u64,
    cookies: Option<PathBuf>,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut download_root_override: Option<PathBuf> = None;
        let mut www_root_override: Option<PathBuf> = None;
        let mut port_override: Option<u16> = None;
        let mut host_override: Option<IpAddr> = None;
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--download-root=") {
                download_root_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--www-root=") {
                www_root_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                port_override = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--host=") {
                host_override = Some(parse_host_arg(value)?);
                continue;
            }

            match arg.as_str() {
                "--download-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--download-root requires a value"))?;
                    download_root_override = Some(PathBuf::from(value));
                }
                "--www-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--www-root requires a value"))?;
                    www_root_override = Some(PathBuf::from(value));
                }
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    port_override = Some(parse_port_arg(&value)?);
                }
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    host_override = Some(parse_host_arg(&value)?);
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let settings = resolve_runtime_settings(RuntimeOverrides {
            download_root: download_root_override,
            www_root: www_root_override,
            port: port_override,
            host: host_override.map(|host| host.to_string()),
            ..RuntimeOverrides::default()
        })?;
        let listen_host = parse_host_arg(&settings.host)?;

        Ok(Self {
            download_root: settings.download_root,
            www_root: settings.www_root,
            port: settings.port,
            listen_host,
            ytdlp_bin: settings.ytdlp_bin,
            timeout_secs: settings.timeout_secs,
            cookies: settings.cookies,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/MEDIAGRAB_HOST")
}

/// Shared state injected into every handler. Nothing here mutates after
/// startup; each request works entirely from its own data.
#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    downloads: Arc<DownloadRoot>,
    www_root: Arc<PathBuf>,
    /// Boundary budget for one engine call. Elapsing it fails the request but
    /// cannot corrupt anything: the orphaned run keeps writing into its own
    /// uuid-scoped stem.
    engine_budget: Duration,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn timed_out(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::GATEWAY_TIMEOUT,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct InfoRequest {
    url: Option<String>,
}

#[derive(Deserialize)]
struct DownloadRequest {
    url: Option<String>,
    format_id: Option<String>,
    format_kind: Option<String>,
}

#[derive(Deserialize)]
struct AudioDownloadRequest {
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct FormatGroups {
    combined: Vec<FormatEntry>,
    video_only: Vec<FormatEntry>,
    audio_only: Vec<FormatEntry>,
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    title: String,
    uploader: Option<String>,
    duration: Option<f64>,
    thumbnail: String,
    site: String,
    limited_formats: bool,
    formats: FormatGroups,
}

#[derive(Debug, Serialize)]
struct DownloadResponse {
    message: String,
    file: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = BackendArgs::parse()?;

    ensure_not_root("backend")?;
    ensure_engine_available(&args.ytdlp_bin)?;

    let downloads = DownloadRoot::create(&args.download_root)?;
    let engine = Engine::new(args.ytdlp_bin, args.cookies);

    let state = AppState {
        engine: Arc::new(engine),
        downloads: Arc::new(downloads),
        www_root: Arc::new(args.www_root),
        engine_budget: Duration::from_secs(args.timeout_secs),
    };

    let app = router(state);

    let addr = SocketAddr::new(args.listen_host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    println!("mediagrab backend listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/info", post(api_info))
        .route("/api/download", post(api_download))
        .route("/api/download_audio", post(api_download_audio))
        .route("/download_file/{name}", get(download_file))
        .fallback(static_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    // Failing to install the handler only affects graceful shutdown; the
    // process still terminates when Ctrl+C fires.
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}

/// Runs one blocking engine call on the blocking pool under the boundary
/// budget. Engine errors become 500s carrying the engine's message; an
/// elapsed budget becomes a 504.
async fn run_engine_call<T, F>(budget: Duration, call: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(call);
    match tokio::time::timeout(budget, task).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(err))) => Err(ApiError::internal(err.to_string())),
        Ok(Err(err)) => Err(ApiError::internal(format!("engine task failed: {err}"))),
        Err(_) => Err(ApiError::timed_out("the extractor did not respond in time")),
    }
}

fn cleaned(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

async fn api_info(
    State(state): State<AppState>,
    Json(payload): Json<InfoRequest>,
) -> ApiResult<Json<InfoResponse>> {
    let url = cleaned(payload.url).ok_or_else(|| ApiError::bad_request("No URL provided"))?;

    let engine = state.engine.clone();
    let fetch_url = url.clone();
    let info =
        run_engine_call(state.engine_budget, move || engine.fetch_metadata(&fetch_url)).await?;

    let classified = classify(&info.formats, &info.thumbnails, info.thumbnail.as_deref());

    Ok(Json(InfoResponse {
        title: info.title.clone().unwrap_or_else(|| "No Title".to_string()),
        uploader: info.uploader.clone(),
        duration: info.duration,
        site: info.site().to_string(),
        thumbnail: classified.thumbnail,
        limited_formats: classified.limited_formats,
        formats: FormatGroups {
            combined: classified.combined,
            video_only: classified.video_only,
            audio_only: classified.audio_only,
        },
    }))
}

async fn api_download(
    State(state): State<AppState>,
    Json(payload): Json<DownloadRequest>,
) -> ApiResult<Json<DownloadResponse>> {
    let (url, format_id) = match (cleaned(payload.url), cleaned(payload.format_id)) {
        (Some(url), Some(format_id)) => (url, format_id),
        _ => return Err(ApiError::bad_request("Missing url or format_id")),
    };
    let kind = FormatKind::parse(payload.format_kind.as_deref());

    let directive = build_directive(&format_id, kind, &state.downloads.unique_stem());
    let produced = run_download(&state, url, directive).await?;

    Ok(Json(DownloadResponse {
        message: "Download completed".to_string(),
        file: serve_url_for(&produced)?,
    }))
}

async fn api_download_audio(
    State(state): State<AppState>,
    Json(payload): Json<AudioDownloadRequest>,
) -> ApiResult<Json<DownloadResponse>> {
    let url = cleaned(payload.url).ok_or_else(|| ApiError::bad_request("Missing url"))?;

    let directive = audio_extract_directive(&state.downloads.unique_stem());
    let produced = run_download(&state, url, directive).await?;

    Ok(Json(DownloadResponse {
        message: "Audio download completed".to_string(),
        file: serve_url_for(&produced)?,
    }))
}

async fn run_download(
    state: &AppState,
    url: String,
    directive: DownloadDirective,
) -> ApiResult<PathBuf> {
    let engine = state.engine.clone();
    let produced =
        run_engine_call(state.engine_budget, move || engine.download(&url, &directive)).await?;
    println!("Produced {}", produced.display());
    Ok(produced)
}

/// Turns the engine-reported path into the public download URL. The produced
/// file always sits directly inside the download root, so its bare name is
/// the whole address.
fn serve_url_for(produced: &Path) -> ApiResult<String> {
    let name = produced
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ApiError::internal("produced file has no usable name"))?;
    Ok(format!("/download_file/{name}"))
}

async fn download_file(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> ApiResult<Response> {
    ensure_safe_path_segment(&name)?;
    let path = state.downloads.resolve(&name);
    serve_attachment(path, &name).await
}

/// Validates that a single dynamic path segment never escapes its base folder.
fn ensure_safe_path_segment(value: &str) -> ApiResult<()> {
    if value.is_empty()
        || Path::new(value)
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("File not found"));
    }

    Ok(())
}

/// Streams a produced file back as an attachment with a guessed content type.
async fn serve_attachment(path: PathBuf, name: &str) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("File not found"))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("File not found"))?;
    let size = metadata.len();

    let stream = ReaderStream::new(file);
    let mut response = Body::from_stream(stream).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, size.to_string().parse().unwrap());

    let disposition = format!("attachment; filename=\"{name}\"");
    if let Ok(value) = disposition.parse() {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = mime.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    match serve_www_path(&state.www_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    let metadata = tokio::fs::metadata(&target).await;

    match metadata {
        Ok(meta) if meta.is_dir() => serve_static_file(root.join("index.html")).await,
        Ok(_) => serve_static_file(target).await,
        Err(_) => {
            if should_fallback_to_index(request_path) {
                serve_static_file(root.join("index.html")).await
            } else {
                Err(ApiError::not_found("file not found"))
            }
        }
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return true;
    }
    Path::new(trimmed).extension().is_none()
}

async fn serve_static_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let stream = ReaderStream::new(file);
    let mut response = Body::from_stream(stream).into_response();

    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = mime.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::extract::State as AxumState;
    use serde_json::Value;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env_file(vars: &[(&str, &str)], f: impl FnOnce()) {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let mut contents = String::new();
        for (key, value) in vars {
            contents.push_str(&format!("{key}=\"{value}\"\n"));
        }
        fs::write(dir.path().join(".env"), contents).unwrap();
        let cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        f();
        std::env::set_current_dir(cwd).unwrap();
    }

    fn parse_backend_args(env_values: &[(&str, &str)], extra: &[&str]) -> BackendArgs {
        let argv = extra
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>();
        let mut parsed = None;
        with_env_file(env_values, || {
            parsed = Some(BackendArgs::from_iter(argv.clone()).expect("parsed args"));
        });
        parsed.expect("args set")
    }

    fn install_stub(dir: &Path, body: &str) -> PathBuf {
        let script_path = dir.join("yt-dlp");
        let script = format!("#!/usr/bin/env bash\nset -eu\n{body}\n");
        fs::write(&script_path, script).unwrap();
        let mut perms = fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms).unwrap();
        script_path
    }

    fn test_state(dir: &Path, stub_body: &str) -> AppState {
        let stub = install_stub(dir, stub_body);
        let www_root = dir.join("www");
        fs::create_dir_all(&www_root).unwrap();

        AppState {
            engine: Arc::new(Engine::new(stub, None)),
            downloads: Arc::new(DownloadRoot::create(dir.join("downloads")).unwrap()),
            www_root: Arc::new(www_root),
            engine_budget: Duration::from_secs(10),
        }
    }

    const METADATA_STUB: &str = r#"cat <<'JSON'
{
  "title": "Sample Clip",
  "uploader": "someone",
  "duration": 321,
  "thumbnails": [
    {"url": "https://example.test/small.jpg", "width": 120, "height": 90},
    {"url": "https://example.test/big.jpg", "width": 640, "height": 360}
  ],
  "extractor_key": "Example",
  "formats": [
    {"format_id": "sb0", "ext": "mhtml", "vcodec": "none", "acodec": "none"},
    {"format_id": "251", "ext": "webm", "acodec": "opus", "abr": 140},
    {"format_id": "137", "ext": "mp4", "height": 1080, "vcodec": "avc1", "acodec": "none"},
    {"format_id": "18", "ext": "mp4", "height": 360, "vcodec": "avc1", "acodec": "mp4a"}
  ]
}
JSON"#;

    const DOWNLOAD_STUB: &str = r#"output=""
while [[ $# -gt 0 ]]; do
  if [[ "$1" == "--output" ]]; then shift; output="$1"; fi
  shift
done
target="${output//%(ext)s/mp4}"
echo "payload" > "$target"
printf '%s\n' "$target""#;

    #[tokio::test]
    async fn api_info_rejects_missing_url() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), "exit 1");

        let err = api_info(AxumState(state), Json(InfoRequest { url: None }))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "No URL provided");
    }

    #[tokio::test]
    async fn api_info_classifies_engine_metadata() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), METADATA_STUB);

        let Json(payload) = api_info(
            AxumState(state),
            Json(InfoRequest {
                url: Some("https://example.test/v".into()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(payload.title, "Sample Clip");
        assert_eq!(payload.site, "Example");
        assert_eq!(payload.thumbnail, "https://example.test/big.jpg");
        assert!(!payload.limited_formats);
        assert_eq!(payload.formats.combined.len(), 1);
        assert_eq!(payload.formats.video_only.len(), 1);
        assert_eq!(payload.formats.audio_only.len(), 1);
        assert_eq!(
            payload.formats.video_only[0].resolution.as_deref(),
            Some("1080p")
        );
    }

    #[tokio::test]
    async fn api_info_surfaces_extraction_failure() {
        let dir = tempdir().unwrap();
        let state = test_state(
            dir.path(),
            r#"echo "ERROR: Unsupported URL" >&2
exit 1"#,
        );

        let err = api_info(
            AxumState(state),
            Json(InfoRequest {
                url: Some("https://nope.test".into()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.message.contains("Unsupported URL"));
    }

    #[tokio::test]
    async fn api_download_rejects_missing_fields() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), "exit 1");

        let err = api_download(
            AxumState(state.clone()),
            Json(DownloadRequest {
                url: Some("https://example.test/v".into()),
                format_id: None,
                format_kind: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Missing url or format_id");

        let err = api_download(
            AxumState(state),
            Json(DownloadRequest {
                url: None,
                format_id: Some("137".into()),
                format_kind: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn api_download_reports_the_served_name() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), DOWNLOAD_STUB);

        let Json(payload) = api_download(
            AxumState(state.clone()),
            Json(DownloadRequest {
                url: Some("https://example.test/v".into()),
                format_id: Some("137".into()),
                format_kind: Some("video_only".into()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(payload.message, "Download completed");
        let name = payload.file.strip_prefix("/download_file/").unwrap();
        assert!(name.ends_with(".mp4"));
        assert!(state.downloads.resolve(name).is_file());
    }

    #[tokio::test]
    async fn api_download_audio_produces_an_mp3_name() {
        let dir = tempdir().unwrap();
        let state = test_state(
            dir.path(),
            r#"output=""
while [[ $# -gt 0 ]]; do
  if [[ "$1" == "--output" ]]; then shift; output="$1"; fi
  shift
done
echo "payload" > "$output"
printf '%s\n' "$output""#,
        );

        let Json(payload) = api_download_audio(
            AxumState(state.clone()),
            Json(AudioDownloadRequest {
                url: Some("https://example.test/v".into()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(payload.message, "Audio download completed");
        let name = payload.file.strip_prefix("/download_file/").unwrap();
        assert!(name.ends_with(".mp3"));
        assert!(state.downloads.resolve(name).is_file());
    }

    #[tokio::test]
    async fn api_download_audio_requires_a_url() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), "exit 1");

        let err = api_download_audio(AxumState(state), Json(AudioDownloadRequest { url: None }))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Missing url");
    }

    #[tokio::test]
    async fn engine_calls_time_out_at_the_boundary() {
        let dir = tempdir().unwrap();
        let mut state = test_state(dir.path(), "sleep 5\nexit 0");
        state.engine_budget = Duration::from_millis(100);

        let err = api_info(
            AxumState(state),
            Json(InfoRequest {
                url: Some("https://example.test/v".into()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn download_file_serves_an_attachment() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), "exit 0");
        fs::write(state.downloads.resolve("clip.mp4"), b"bytes").unwrap();

        let response = download_file(AxumState(state), AxumPath("clip.mp4".into()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/mp4"
        );
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(disposition.starts_with("attachment"));
        assert!(disposition.contains("clip.mp4"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"bytes");
    }

    #[tokio::test]
    async fn download_file_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), "exit 0");
        fs::write(dir.path().join("secret.txt"), b"hidden").unwrap();

        let err = download_file(AxumState(state), AxumPath("../secret.txt".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_file_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), "exit 0");

        let err = download_file(AxumState(state), AxumPath("ghost.mp4".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "File not found");
    }

    #[tokio::test]
    async fn static_serving_prefers_real_files_then_index() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), "exit 0");
        fs::write(state.www_root.join("index.html"), "<html>home</html>").unwrap();
        fs::write(state.www_root.join("app.js"), "console.log(1)").unwrap();

        let response = serve_www_path(&state.www_root, "/app.js").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = serve_www_path(&state.www_root, "/").await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"<html>home</html>");

        let err = serve_www_path(&state.www_root, "/missing.css")
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn api_error_serializes_json() {
        let response = ApiError::not_found("missing").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], "missing");
    }

    #[test]
    fn backend_args_read_env_defaults() {
        let args = parse_backend_args(
            &[
                ("DOWNLOAD_ROOT", "/srv/grabs"),
                ("WWW_ROOT", "/srv/www"),
                ("MEDIAGRAB_PORT", "4242"),
                ("MEDIAGRAB_HOST", "127.0.0.1"),
            ],
            &[],
        );
        assert_eq!(args.download_root, PathBuf::from("/srv/grabs"));
        assert_eq!(args.www_root, PathBuf::from("/srv/www"));
        assert_eq!(args.port, 4242);
        assert_eq!(args.listen_host, "127.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn backend_args_flags_override_env() {
        let args = parse_backend_args(
            &[
                ("DOWNLOAD_ROOT", "/srv/grabs"),
                ("MEDIAGRAB_PORT", "4242"),
                ("MEDIAGRAB_HOST", "127.0.0.1"),
            ],
            &[
                "--download-root",
                "/custom",
                "--port=9000",
                "--host",
                "0.0.0.0",
            ],
        );
        assert_eq!(args.download_root, PathBuf::from("/custom"));
        assert_eq!(args.port, 9000);
        assert_eq!(args.listen_host, "0.0.0.0".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn backend_args_reject_unknown_flags() {
        let mut result = None;
        with_env_file(&[], || {
            result = Some(BackendArgs::from_iter(["--bogus".to_string()]));
        });
        assert!(result.unwrap().is_err());
    }
}
