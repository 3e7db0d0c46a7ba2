//! 节点连通性与延迟探测
//!
//! 固定大小的 worker 池共享一个 FIFO 队列，结果进线程安全收集器，
//! 输出顺序不做保证（每个输入节点恰好一条结果）。
//!
//! 分协议探测：
//! - http/https 经代理向 testUrl 发 CONNECT，2xx/3xx 算通
//! - socks5 完整握手（可选用户名密码）
//! - trojan 只做 TLS 握手（SNI=server，不验证书）
//! - ss/ssr 裸 TCP，超时加倍
//! - vmess/vless/hysteria2 及未知协议裸 TCP
//!
//! 成功但耗时 ≥ high_latency_floor 的降级为 down（"latency too high"）。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use futures_util::future::join_all;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::classify;
use crate::common::tls::build_tls_config;
use crate::locate::IpLocator;
use crate::node::{GeoInfo, Node, ProbeStatus, Protocol, ProxySettings};

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub concurrency: usize,
    pub timeout: Duration,
    pub test_url: String,
    pub high_latency_floor_ms: u64,
    pub verify_location: bool,
    /// trojan 探测是否验证书（默认不验证）
    pub verify_tls: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            timeout: Duration::from_secs(5),
            test_url: "http://www.gstatic.com/generate_204".to_string(),
            high_latency_floor_ms: 1000,
            verify_location: false,
            verify_tls: false,
        }
    }
}

/// 单节点探测结果，index 对应输入位置
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub index: usize,
    pub status: ProbeStatus,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub location_mismatch: bool,
    pub actual_geo: Option<GeoInfo>,
}

pub struct Prober {
    config: ProbeConfig,
    locator: Option<Arc<IpLocator>>,
}

impl Prober {
    pub fn new(config: ProbeConfig, locator: Option<Arc<IpLocator>>) -> Self {
        Self { config, locator }
    }

    /// 探测全部节点，返回每个输入一条的结果（无序）
    pub async fn probe_all(&self, nodes: &[Node]) -> Vec<ProbeOutcome> {
        let queue: Arc<Mutex<VecDeque<(usize, Node)>>> =
            Arc::new(Mutex::new(nodes.iter().cloned().enumerate().collect()));
        let results: Arc<Mutex<Vec<ProbeOutcome>>> =
            Arc::new(Mutex::new(Vec::with_capacity(nodes.len())));

        let workers = self.config.concurrency.max(1).min(nodes.len().max(1));
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            let config = self.config.clone();
            let locator = self.locator.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job = match queue.lock() {
                        Ok(mut queue) => queue.pop_front(),
                        Err(_) => break,
                    };
                    let Some((index, node)) = job else { break };
                    let outcome = probe_one(&config, locator.as_ref(), index, &node).await;
                    if let Ok(mut results) = results.lock() {
                        results.push(outcome);
                    }
                }
            }));
        }
        join_all(handles).await;

        Arc::try_unwrap(results)
            .map(|m| m.into_inner().unwrap_or_default())
            .unwrap_or_default()
    }
}

async fn probe_one(
    config: &ProbeConfig,
    locator: Option<&Arc<IpLocator>>,
    index: usize,
    node: &Node,
) -> ProbeOutcome {
    let start = Instant::now();
    let result = dispatch_probe(config, node).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let (status, latency_ms, error) = match result {
        Ok(()) if elapsed_ms >= config.high_latency_floor_ms => (
            ProbeStatus::Down,
            Some(elapsed_ms),
            Some("latency too high".to_string()),
        ),
        Ok(()) => (ProbeStatus::Up, Some(elapsed_ms), None),
        Err(e) => (ProbeStatus::Down, None, Some(e.to_string())),
    };

    debug!(
        node = %node.display_name,
        protocol = %node.protocol,
        status = ?status,
        latency = ?latency_ms,
        "probe finished"
    );

    let mut outcome = ProbeOutcome {
        index,
        status,
        latency_ms,
        error,
        location_mismatch: false,
        actual_geo: None,
    };

    // 名字里的国家暗示 vs 实测出口国家
    if config.verify_location && status == ProbeStatus::Up {
        if let Some(locator) = locator {
            if let Ok(entry) = locator.locate(&node.server).await {
                let hint = classify::country_hint(&node.display_name);
                if let (Some(hint), Some(actual)) =
                    (hint, entry.geo.country_code.as_deref())
                {
                    if hint != actual {
                        outcome.location_mismatch = true;
                    }
                }
                outcome.actual_geo = Some(entry.geo);
            }
        }
    }

    outcome
}

async fn dispatch_probe(config: &ProbeConfig, node: &Node) -> Result<()> {
    match node.protocol {
        Protocol::Http | Protocol::Https => http_connect_probe(config, node).await,
        Protocol::Socks5 => socks5_probe(config, node).await,
        Protocol::Trojan => trojan_probe(config, node).await,
        Protocol::Shadowsocks | Protocol::Shadowsocksr => {
            // 加密前置协议没有明文握手可验，TCP 通即算通，超时放宽一倍
            tcp_probe(node, config.timeout * 2).await
        }
        Protocol::Vmess | Protocol::Vless | Protocol::Hysteria2 => {
            tcp_probe(node, config.timeout).await
        }
    }
}

// ─── 基础探测 ───

async fn dial(node: &Node, timeout: Duration) -> Result<TcpStream> {
    let addr = if node.server.contains(':') {
        format!("[{}]:{}", node.server, node.port)
    } else {
        format!("{}:{}", node.server, node.port)
    };
    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => bail!("connect {}: {}", addr, e),
        Err(_) => bail!("connect {}: timeout", addr),
    }
}

async fn tcp_probe(node: &Node, timeout: Duration) -> Result<()> {
    dial(node, timeout).await.map(|_| ())
}

// ─── HTTP CONNECT ───

async fn http_connect_probe(config: &ProbeConfig, node: &Node) -> Result<()> {
    let (host, port) = test_target(&config.test_url)?;
    let stream = dial(node, config.timeout).await?;

    let (username, password, tls) = match &node.settings {
        ProxySettings::Http {
            username,
            password,
            tls,
        } => (username.clone(), password.clone(), *tls),
        _ => (None, None, node.protocol == Protocol::Https),
    };

    if tls {
        let tls_config = build_tls_config(!config.verify_tls)?;
        let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
        let server_name = rustls::pki_types::ServerName::try_from(node.server.clone())
            .map_err(|_| anyhow::anyhow!("bad SNI host: {}", node.server))?;
        let stream = tokio::time::timeout(config.timeout, connector.connect(server_name, stream))
            .await
            .map_err(|_| anyhow::anyhow!("TLS handshake timeout"))??;
        send_connect(stream, &host, port, &username, &password, config.timeout).await
    } else {
        send_connect(stream, &host, port, &username, &password, config.timeout).await
    }
}

async fn send_connect<S>(
    mut stream: S,
    host: &str,
    port: u16,
    username: &Option<String>,
    password: &Option<String>,
    timeout: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n"
    );
    if let (Some(user), Some(pass)) = (username, password) {
        let cred = crate::common::encode_base64(&format!("{}:{}", user, pass));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", cred));
    }
    request.push_str("\r\n");

    tokio::time::timeout(timeout, stream.write_all(request.as_bytes()))
        .await
        .map_err(|_| anyhow::anyhow!("CONNECT write timeout"))??;

    let mut buf = [0u8; 256];
    let n = tokio::time::timeout(timeout, stream.read(&mut buf))
        .await
        .map_err(|_| anyhow::anyhow!("CONNECT read timeout"))??;
    if n == 0 {
        bail!("proxy closed connection");
    }

    let line = String::from_utf8_lossy(&buf[..n]);
    let status: u16 = line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("malformed CONNECT response"))?;
    if (200..400).contains(&status) {
        Ok(())
    } else {
        bail!("CONNECT rejected with {}", status)
    }
}

// ─── SOCKS5 ───

async fn socks5_probe(config: &ProbeConfig, node: &Node) -> Result<()> {
    let (host, port) = test_target(&config.test_url)?;
    let mut stream = dial(node, config.timeout).await?;

    let (username, password) = match &node.settings {
        ProxySettings::Socks5 { username, password } => (username.clone(), password.clone()),
        _ => (None, None),
    };
    let has_auth = username.is_some() && password.is_some();

    let run = async {
        // 方法协商
        if has_auth {
            stream.write_all(&[0x05, 0x02, 0x00, 0x02]).await?;
        } else {
            stream.write_all(&[0x05, 0x01, 0x00]).await?;
        }
        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await?;
        if reply[0] != 0x05 {
            bail!("not a SOCKS5 server");
        }
        match reply[1] {
            0x00 => {}
            0x02 => {
                // RFC 1929 用户名密码子协商
                let (Some(user), Some(pass)) = (&username, &password) else {
                    bail!("server requires auth but none configured");
                };
                let mut msg = vec![0x01, user.len() as u8];
                msg.extend_from_slice(user.as_bytes());
                msg.push(pass.len() as u8);
                msg.extend_from_slice(pass.as_bytes());
                stream.write_all(&msg).await?;
                let mut auth_reply = [0u8; 2];
                stream.read_exact(&mut auth_reply).await?;
                if auth_reply[1] != 0x00 {
                    bail!("SOCKS5 auth rejected");
                }
            }
            other => bail!("unsupported SOCKS5 method: {:#x}", other),
        }

        // CONNECT 域名形式
        let mut req = vec![0x05, 0x01, 0x00, 0x03, host.len() as u8];
        req.extend_from_slice(host.as_bytes());
        req.extend_from_slice(&port.to_be_bytes());
        stream.write_all(&req).await?;

        let mut head = [0u8; 4];
        stream.read_exact(&mut head).await?;
        if head[1] != 0x00 {
            bail!("SOCKS5 CONNECT failed: rep={:#x}", head[1]);
        }
        Ok(())
    };

    tokio::time::timeout(config.timeout, run)
        .await
        .map_err(|_| anyhow::anyhow!("SOCKS5 handshake timeout"))?
}

// ─── Trojan ───

async fn trojan_probe(config: &ProbeConfig, node: &Node) -> Result<()> {
    let stream = dial(node, config.timeout).await?;

    let sni = node
        .settings
        .sni()
        .unwrap_or(node.server.as_str())
        .to_string();
    let tls_config = build_tls_config(!config.verify_tls)?;
    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
    let server_name = rustls::pki_types::ServerName::try_from(sni.clone())
        .map_err(|_| anyhow::anyhow!("bad SNI host: {}", sni))?;

    // 握手完成即认为可达，不发 trojan 载荷
    tokio::time::timeout(config.timeout, connector.connect(server_name, stream))
        .await
        .map_err(|_| anyhow::anyhow!("TLS handshake timeout"))??;
    Ok(())
}

// ─── 辅助 ───

fn test_target(test_url: &str) -> Result<(String, u16)> {
    let parsed = url::Url::parse(test_url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("test url missing host"))?
        .to_string();
    let port = parsed
        .port()
        .unwrap_or(if parsed.scheme() == "https" { 443 } else { 80 });
    Ok((host, port))
}
