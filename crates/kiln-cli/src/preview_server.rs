use anyhow::{Context, Result, anyhow};
use kiln_sandbox::{RuntimeError, Sandbox, SandboxProject};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

const ERROR_INTAKE_PATH: &str = "/__kiln/error";

const EMPTY_STATE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Kiln Preview</title></head>
<body><p style="color:#71717a;font-style:italic">No code to preview yet...</p></body>
</html>
"#;

pub(crate) type SharedErrorSlot = Arc<Mutex<Option<RuntimeError>>>;

#[derive(Debug, Clone)]
pub(crate) struct PreviewServerConfig {
    pub host: String,
    pub port: u16,
    pub root_dir: PathBuf,
}

#[derive(Debug)]
pub(crate) struct PreviewServerHandle {
    pub url: String,
    stop_tx: mpsc::Sender<()>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl PreviewServerHandle {
    fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

pub(crate) fn guess_content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" | "cjs" => "application/javascript; charset=utf-8",
        "json" => "application/json; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "ico" => "image/x-icon",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn write_http_response(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &[u8],
    head_only: bool,
) -> Result<()> {
    let mut payload = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    if !head_only {
        payload.extend_from_slice(body);
    }
    stream.write_all(&payload)?;
    Ok(())
}

pub(crate) fn resolve_request_path(root: &Path, raw_path: &str) -> Option<PathBuf> {
    let without_query = raw_path.split('?').next().unwrap_or("/");
    let mut candidate = root.to_path_buf();
    for segment in without_query.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." {
            return None;
        }
        candidate.push(segment);
    }
    Some(candidate)
}

pub(crate) fn parse_error_report(body: &str) -> Option<String> {
    let parsed: JsonValue = serde_json::from_str(body).ok()?;
    parsed
        .get("message")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
}

fn handle_connection(mut stream: TcpStream, root: &Path, errors: &SharedErrorSlot) -> Result<()> {
    let mut buffer = [0_u8; 16_384];
    let read = stream.read(&mut buffer)?;
    if read == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..read]).into_owned();
    let first_line = request.lines().next().unwrap_or_default();
    let mut parts = first_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let raw_path = parts.next().unwrap_or("/");
    let head_only = method.eq_ignore_ascii_case("HEAD");

    if method.eq_ignore_ascii_case("POST") {
        let path_without_query = raw_path.split('?').next().unwrap_or("/");
        if path_without_query != ERROR_INTAKE_PATH {
            return write_http_response(
                &mut stream,
                "404 Not Found",
                "text/plain; charset=utf-8",
                b"Not Found",
                false,
            );
        }

        let body = request
            .split_once("\r\n\r\n")
            .map(|(_, body)| body)
            .unwrap_or_default();
        match parse_error_report(body) {
            Some(message) => {
                if let Ok(mut slot) = errors.lock() {
                    *slot = Some(RuntimeError { message });
                }
                return write_http_response(
                    &mut stream,
                    "204 No Content",
                    "text/plain; charset=utf-8",
                    b"",
                    false,
                );
            }
            None => {
                return write_http_response(
                    &mut stream,
                    "400 Bad Request",
                    "text/plain; charset=utf-8",
                    b"Bad Request",
                    false,
                );
            }
        }
    }

    if !method.eq_ignore_ascii_case("GET") && !head_only {
        return write_http_response(
            &mut stream,
            "405 Method Not Allowed",
            "text/plain; charset=utf-8",
            b"Method Not Allowed",
            head_only,
        );
    }

    let mut target = match resolve_request_path(root, raw_path) {
        Some(path) => path,
        None => {
            return write_http_response(
                &mut stream,
                "400 Bad Request",
                "text/plain; charset=utf-8",
                b"Bad Request",
                head_only,
            );
        }
    };

    if target.is_dir() {
        target.push("index.html");
    }

    let mut file = match File::open(&target) {
        Ok(file) => file,
        Err(_) => {
            return write_http_response(
                &mut stream,
                "404 Not Found",
                "text/plain; charset=utf-8",
                b"Not Found",
                head_only,
            );
        }
    };

    let mut body = Vec::new();
    file.read_to_end(&mut body)?;
    write_http_response(
        &mut stream,
        "200 OK",
        guess_content_type(&target),
        &body,
        head_only,
    )
}

pub(crate) fn start_preview_server(
    config: &PreviewServerConfig,
    errors: SharedErrorSlot,
) -> Result<PreviewServerHandle> {
    if !config.root_dir.is_dir() {
        return Err(anyhow!(
            "preview root '{}' is not a directory",
            config.root_dir.display()
        ));
    }

    let listener = TcpListener::bind((config.host.as_str(), config.port)).with_context(|| {
        format!(
            "failed binding preview server on {}:{}",
            config.host, config.port
        )
    })?;
    listener
        .set_nonblocking(true)
        .context("failed setting listener nonblocking mode")?;

    let actual_port = listener
        .local_addr()
        .context("failed reading listener local address")?
        .port();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let root_for_thread = config.root_dir.clone();

    let join_handle = thread::spawn(move || {
        loop {
            if stop_rx.try_recv().is_ok() {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    if let Err(err) = handle_connection(stream, &root_for_thread, &errors) {
                        eprintln!("error: preview request failed: {err:#}");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(40));
                }
                Err(err) => {
                    eprintln!("error: preview listener failed: {err}");
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }
    });

    Ok(PreviewServerHandle {
        url: format!("http://{}:{}/", config.host, actual_port),
        stop_tx,
        join_handle: Some(join_handle),
    })
}

pub(crate) fn open_url_in_default_browser(url: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    let status = Command::new("open").arg(url).status();
    #[cfg(target_os = "linux")]
    let status = Command::new("xdg-open").arg(url).status();
    #[cfg(target_os = "windows")]
    let status = Command::new("cmd").args(["/C", "start", "", url]).status();

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    let status: io::Result<std::process::ExitStatus> = Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "unsupported platform for browser launch",
    ));

    let status = status.with_context(|| format!("failed launching browser for {url}"))?;
    if !status.success() {
        return Err(anyhow!("browser command exited with status {}", status));
    }
    Ok(())
}

/// Sandbox whose runtime is the user's browser: each load rewrites the
/// served project, and the page's error bridge POSTs failures back into the
/// shared slot.
pub(crate) struct BrowserSandbox {
    dir: PathBuf,
    errors: SharedErrorSlot,
    server: Option<PreviewServerHandle>,
}

impl BrowserSandbox {
    pub(crate) fn start(host: &str, port: u16) -> Result<Self> {
        let dir = std::env::temp_dir().join(format!("kiln-preview-{}", std::process::id()));
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed creating preview dir {}", dir.display()))?;
        fs::write(dir.join("index.html"), EMPTY_STATE_HTML)
            .context("failed writing preview placeholder")?;

        let errors: SharedErrorSlot = Arc::new(Mutex::new(None));
        let server = start_preview_server(
            &PreviewServerConfig {
                host: host.to_string(),
                port,
                root_dir: dir.clone(),
            },
            Arc::clone(&errors),
        )?;

        Ok(Self {
            dir,
            errors,
            server: Some(server),
        })
    }
}

impl Sandbox for BrowserSandbox {
    fn load(&mut self, source_code: &str, dependencies: &BTreeMap<String, String>) -> Result<()> {
        let project = SandboxProject::compose(source_code, dependencies)?;
        project.write_to(&self.dir)?;
        if let Ok(mut slot) = self.errors.lock() {
            *slot = None;
        }
        Ok(())
    }

    fn current_error(&self) -> Option<RuntimeError> {
        self.errors.lock().ok().and_then(|slot| slot.clone())
    }

    fn preview_url(&self) -> Option<String> {
        self.server.as_ref().map(|server| server.url.clone())
    }
}

impl Drop for BrowserSandbox {
    fn drop(&mut self) {
        if let Some(mut server) = self.server.take() {
            server.stop();
        }
    }
}
