//! 单条代理 URI 解码器
//!
//! 支持的 scheme：
//! - `vmess://` Base64(JSON)
//! - `vless://` URL 形
//! - `ss://` SIP002 优先，legacy 兜底
//! - `ssr://` 整体 Base64
//! - `trojan://` 密码段允许裸特殊字符
//! - `hysteria2://` / `hy2://`
//! - `http(s)://`、`socks5://` 标准 URL
//!
//! 每个解码器保留原始 URI 到 `raw`，没有备注时名字默认
//! `"{PROTOCOL} {server}:{port}"`。

use crate::common::{
    decode_base64_str, parse_host_port, parse_query_params, url_decode, Error,
};
use crate::node::{Node, Protocol, ProxySettings};

/// 按 scheme 分发到具体解码器
pub fn decode_uri(uri: &str) -> Result<Node, Error> {
    let uri = uri.trim();
    if let Some(rest) = uri.strip_prefix("vmess://") {
        decode_vmess(uri, rest)
    } else if let Some(rest) = uri.strip_prefix("vless://") {
        decode_vless(uri, rest)
    } else if let Some(rest) = uri.strip_prefix("ss://") {
        decode_ss(uri, rest)
    } else if let Some(rest) = uri.strip_prefix("ssr://") {
        decode_ssr(uri, rest)
    } else if let Some(rest) = uri.strip_prefix("trojan://") {
        decode_trojan(uri, rest)
    } else if let Some(rest) = uri
        .strip_prefix("hysteria2://")
        .or_else(|| uri.strip_prefix("hy2://"))
    {
        decode_hysteria2(uri, rest)
    } else if uri.starts_with("http://") || uri.starts_with("https://") {
        decode_http(uri)
    } else if uri.starts_with("socks5://") || uri.starts_with("socks://") {
        decode_socks5(uri)
    } else {
        Err(Error::parse(uri, "unsupported proxy URI scheme"))
    }
}

// ─── vmess ───

fn decode_vmess(raw: &str, encoded: &str) -> Result<Node, Error> {
    let json_str =
        decode_base64_str(encoded).map_err(|e| Error::parse(raw, format!("vmess body: {}", e)))?;
    let v: serde_json::Value = serde_json::from_str(&json_str)
        .map_err(|e| Error::parse(raw, format!("vmess JSON: {}", e)))?;

    let server = v["add"].as_str().unwrap_or("").to_string();
    let port = json_port(&v["port"]).ok_or_else(|| Error::parse(raw, "vmess: bad port"))?;
    let uuid = v["id"].as_str().unwrap_or("").to_string();
    let alter_id = v["aid"]
        .as_u64()
        .or_else(|| v["aid"].as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0) as u16;
    let transport = v["net"].as_str().map(String::from);
    let ws_path = v["path"].as_str().map(String::from);
    let ws_host = v["host"].as_str().map(String::from);
    let tls = v["tls"].as_str() == Some("tls");
    let sni = v["sni"].as_str().map(String::from);
    let name = v["ps"].as_str().unwrap_or("").to_string();

    Ok(Node::new(
        Protocol::Vmess,
        name,
        server,
        port,
        ProxySettings::Vmess {
            uuid,
            alter_id,
            transport,
            ws_path,
            ws_host,
            tls,
            sni,
        },
    )
    .with_raw(raw))
}

/// vmess JSON 的 port 字段可能是数字也可能是字符串
fn json_port(v: &serde_json::Value) -> Option<u16> {
    v.as_u64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        .and_then(|p| u16::try_from(p).ok())
        .filter(|p| *p > 0)
}

// ─── vless ───

fn decode_vless(raw: &str, rest: &str) -> Result<Node, Error> {
    let (main, name) = split_fragment(rest);
    let (uuid, host_params) = main
        .split_once('@')
        .ok_or_else(|| Error::parse(raw, "vless: missing @"))?;

    let (host_port, params_str) = main_and_query(host_params);
    let (server, port) =
        parse_host_port(host_port).map_err(|e| Error::parse(raw, e.to_string()))?;
    let params = parse_query_params(params_str);

    Ok(Node::new(
        Protocol::Vless,
        name,
        server,
        port,
        ProxySettings::Vless {
            uuid: uuid.to_string(),
            transport: Some(params.get("type").cloned().unwrap_or_else(|| "tcp".into())),
            security: Some(
                params
                    .get("security")
                    .cloned()
                    .unwrap_or_else(|| "none".into()),
            ),
            encryption: Some(
                params
                    .get("encryption")
                    .cloned()
                    .unwrap_or_else(|| "none".into()),
            ),
            sni: params.get("sni").cloned(),
            fingerprint: params.get("fp").cloned(),
            alpn: params.get("alpn").cloned(),
            ws_path: params.get("path").cloned(),
            ws_host: params.get("host").cloned(),
            flow: params.get("flow").cloned(),
        },
    )
    .with_raw(raw))
}

// ─── ss ───

fn decode_ss(raw: &str, rest: &str) -> Result<Node, Error> {
    let (main, name) = split_fragment(rest);

    // SIP002: base64(method:password)@host:port
    if let Some((userinfo, host_part)) = main.rsplit_once('@') {
        if let Some(node) = decode_ss_sip002(raw, userinfo, host_part, &name) {
            return Ok(node);
        }
    }

    // legacy: base64(method:password@host:port)
    let decoded =
        decode_base64_str(main).map_err(|e| Error::parse(raw, format!("ss body: {}", e)))?;
    let (method_pass, host_port) = decoded
        .rsplit_once('@')
        .ok_or_else(|| Error::parse(raw, "ss: missing @ after decode"))?;
    let (method, password) = method_pass
        .split_once(':')
        .ok_or_else(|| Error::parse(raw, "ss: invalid method:password"))?;
    let (server, port) = parse_host_port(host_port).map_err(|e| Error::parse(raw, e.to_string()))?;

    Ok(Node::new(
        Protocol::Shadowsocks,
        name,
        server,
        port,
        ProxySettings::Shadowsocks {
            method: method.to_string(),
            password: password.to_string(),
            plugin: None,
        },
    )
    .with_raw(raw))
}

fn decode_ss_sip002(raw: &str, userinfo: &str, host_part: &str, name: &str) -> Option<Node> {
    // userinfo 可能是 base64，也可能是百分号编码后的明文 method:password
    let decoded = decode_base64_str(userinfo)
        .ok()
        .filter(|d| d.contains(':'))
        .unwrap_or_else(|| url_decode(userinfo).to_string());
    let (method, password) = decoded.split_once(':')?;
    let (host_port, _query) = main_and_query(host_part);
    let (server, port) = parse_host_port(host_port).ok()?;

    Some(
        Node::new(
            Protocol::Shadowsocks,
            name,
            server,
            port,
            ProxySettings::Shadowsocks {
                method: method.to_string(),
                password: password.to_string(),
                plugin: None,
            },
        )
        .with_raw(raw),
    )
}

// ─── ssr ───

fn decode_ssr(raw: &str, encoded: &str) -> Result<Node, Error> {
    let decoded =
        decode_base64_str(encoded).map_err(|e| Error::parse(raw, format!("ssr body: {}", e)))?;

    // host:port:proto:method:obfs:BASE64(pass)/?k=BASE64(v)&…
    let (main, query) = decoded
        .split_once("/?")
        .map(|(m, q)| (m, Some(q)))
        .unwrap_or((decoded.as_str(), None));

    let fields: Vec<&str> = main.rsplitn(6, ':').collect();
    if fields.len() != 6 {
        return Err(Error::parse(raw, "ssr: expected 6 colon-separated fields"));
    }
    // rsplitn 是倒序的
    let (pass_b64, obfs, method, protocol, port_str, server) =
        (fields[0], fields[1], fields[2], fields[3], fields[4], fields[5]);
    let password = decode_base64_str(pass_b64).unwrap_or_else(|_| pass_b64.to_string());
    let port: u16 = port_str
        .parse()
        .map_err(|_| Error::parse(raw, "ssr: bad port"))?;

    let mut name = String::new();
    let mut obfs_param = None;
    let mut proto_param = None;
    if let Some(query) = query {
        for (k, v) in parse_query_params(query) {
            let decoded = decode_base64_str(&v).unwrap_or(v);
            match k.as_str() {
                "remarks" => name = decoded,
                "obfsparam" => obfs_param = Some(decoded),
                "protoparam" => proto_param = Some(decoded),
                _ => {}
            }
        }
    }

    Ok(Node::new(
        Protocol::Shadowsocksr,
        name,
        server,
        port,
        ProxySettings::Shadowsocksr {
            method: method.to_string(),
            password,
            protocol: protocol.to_string(),
            proto_param,
            obfs: obfs.to_string(),
            obfs_param,
        },
    )
    .with_raw(raw))
}

// ─── trojan ───

fn decode_trojan(raw: &str, rest: &str) -> Result<Node, Error> {
    let (main, name) = split_fragment(rest);

    // 密码里可能有裸 '@'，从右侧拆保证 host:port 完整
    let (password_part, host_params) = main
        .rsplit_once('@')
        .ok_or_else(|| Error::parse(raw, "trojan: missing @"))?;
    let password = url_decode(password_part).to_string();

    let (host_port, params_str) = main_and_query(host_params);
    let (server, port) =
        parse_host_port(host_port).map_err(|e| Error::parse(raw, e.to_string()))?;
    let params = parse_query_params(params_str);

    Ok(Node::new(
        Protocol::Trojan,
        name,
        server,
        port,
        ProxySettings::Trojan {
            password,
            sni: params.get("sni").cloned(),
            allow_insecure: truthy(params.get("allowInsecure")),
        },
    )
    .with_raw(raw))
}

// ─── hysteria2 ───

fn decode_hysteria2(raw: &str, rest: &str) -> Result<Node, Error> {
    let (main, name) = split_fragment(rest);
    let (auth_part, host_params) = main
        .rsplit_once('@')
        .ok_or_else(|| Error::parse(raw, "hysteria2: missing @"))?;
    let auth = url_decode(auth_part).to_string();

    let (host_port, params_str) = main_and_query(host_params);
    let (server, port) =
        parse_host_port(host_port).map_err(|e| Error::parse(raw, e.to_string()))?;
    let params = parse_query_params(params_str);

    Ok(Node::new(
        Protocol::Hysteria2,
        name,
        server,
        port,
        ProxySettings::Hysteria2 {
            auth,
            sni: params.get("sni").cloned(),
            insecure: truthy(params.get("insecure")),
            obfs: params.get("obfs").cloned(),
            obfs_password: params.get("obfs-password").cloned(),
            up_mbps: params.get("up").and_then(|s| leading_u64(s)),
            down_mbps: params.get("down").and_then(|s| leading_u64(s)),
        },
    )
    .with_raw(raw))
}

// ─── http / socks ───

fn decode_http(raw: &str) -> Result<Node, Error> {
    let parsed = url::Url::parse(raw).map_err(|e| Error::parse(raw, e.to_string()))?;
    let tls = parsed.scheme() == "https";
    let protocol = if tls { Protocol::Https } else { Protocol::Http };
    let server = parsed
        .host_str()
        .ok_or_else(|| Error::parse(raw, "http: missing host"))?
        .to_string();
    let port = parsed
        .port()
        .unwrap_or(if tls { 443 } else { 80 });
    let username = (!parsed.username().is_empty()).then(|| url_decode(parsed.username()).to_string());
    let password = parsed.password().map(|p| url_decode(p).to_string());
    let name = parsed.fragment().map(|f| url_decode(f).to_string()).unwrap_or_default();

    Ok(Node::new(
        protocol,
        name,
        server,
        port,
        ProxySettings::Http {
            username,
            password,
            tls,
        },
    )
    .with_raw(raw))
}

fn decode_socks5(raw: &str) -> Result<Node, Error> {
    let parsed = url::Url::parse(raw).map_err(|e| Error::parse(raw, e.to_string()))?;
    let server = parsed
        .host_str()
        .ok_or_else(|| Error::parse(raw, "socks5: missing host"))?
        .to_string();
    let port = parsed.port().unwrap_or(1080);
    let username = (!parsed.username().is_empty()).then(|| url_decode(parsed.username()).to_string());
    let password = parsed.password().map(|p| url_decode(p).to_string());
    let name = parsed.fragment().map(|f| url_decode(f).to_string()).unwrap_or_default();

    Ok(Node::new(
        Protocol::Socks5,
        name,
        server,
        port,
        ProxySettings::Socks5 { username, password },
    )
    .with_raw(raw))
}

// ─── 辅助 ───

/// 拆 `#fragment`，fragment 做百分号解码作为显示名
fn split_fragment(rest: &str) -> (&str, String) {
    match rest.rsplit_once('#') {
        Some((main, frag)) => (main, url_decode(frag).to_string()),
        None => (rest, String::new()),
    }
}

fn main_and_query(s: &str) -> (&str, &str) {
    s.split_once('?').unwrap_or((s, ""))
}

fn truthy(v: Option<&String>) -> bool {
    matches!(v.map(|s| s.as_str()), Some("1") | Some("true") | Some("yes"))
}

/// "100" 或 "100 Mbps" 都取前导数字
fn leading_u64(s: &str) -> Option<u64> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::encode_base64;

    #[test]
    fn vmess_basic() {
        let body = serde_json::json!({
            "v": "2", "ps": "TestVMess", "add": "server.com",
            "port": "443", "id": "test-uuid", "aid": "0",
            "net": "ws", "path": "/ws", "host": "cdn.example",
            "tls": "tls", "sni": "server.com"
        });
        let uri = format!("vmess://{}", encode_base64(&body.to_string()));
        let node = decode_uri(&uri).unwrap();
        assert_eq!(node.protocol, Protocol::Vmess);
        assert_eq!(node.display_name, "TestVMess");
        assert_eq!(node.server, "server.com");
        assert_eq!(node.port, 443);
        match &node.settings {
            ProxySettings::Vmess {
                uuid,
                transport,
                ws_path,
                ws_host,
                tls,
                ..
            } => {
                assert_eq!(uuid, "test-uuid");
                assert_eq!(transport.as_deref(), Some("ws"));
                assert_eq!(ws_path.as_deref(), Some("/ws"));
                assert_eq!(ws_host.as_deref(), Some("cdn.example"));
                assert!(tls);
            }
            other => panic!("wrong settings: {:?}", other),
        }
        assert_eq!(node.raw.as_deref(), Some(uri.as_str()));
    }

    #[test]
    fn vmess_tolerates_missing_padding() {
        let body = r#"{"ps":"A","add":"1.1.1.1","port":443,"id":"abc","aid":0,"net":"tcp","tls":"tls"}"#;
        let uri = format!("vmess://{}", encode_base64(body).trim_end_matches('='));
        let node = decode_uri(&uri).unwrap();
        assert_eq!(node.server, "1.1.1.1");
    }

    #[test]
    fn vless_defaults() {
        let node = decode_uri("vless://uuid-1@h.example:443#n").unwrap();
        match &node.settings {
            ProxySettings::Vless {
                transport,
                security,
                encryption,
                ..
            } => {
                assert_eq!(transport.as_deref(), Some("tcp"));
                assert_eq!(security.as_deref(), Some("none"));
                assert_eq!(encryption.as_deref(), Some("none"));
            }
            other => panic!("wrong settings: {:?}", other),
        }
    }

    #[test]
    fn vless_full_query() {
        let uri = "vless://u@h.example:8443?type=ws&security=tls&sni=s.example&fp=chrome&alpn=h2&path=%2Fws&host=cdn.example&flow=xtls-rprx-vision#Node";
        let node = decode_uri(uri).unwrap();
        match &node.settings {
            ProxySettings::Vless {
                sni,
                fingerprint,
                ws_path,
                flow,
                ..
            } => {
                assert_eq!(sni.as_deref(), Some("s.example"));
                assert_eq!(fingerprint.as_deref(), Some("chrome"));
                assert_eq!(ws_path.as_deref(), Some("/ws"));
                assert_eq!(flow.as_deref(), Some("xtls-rprx-vision"));
            }
            other => panic!("wrong settings: {:?}", other),
        }
    }

    #[test]
    fn ss_sip002() {
        let uri = format!(
            "ss://{}@1.1.1.1:443#A",
            encode_base64("aes-256-gcm:pass")
        );
        let node = decode_uri(&uri).unwrap();
        assert_eq!(node.protocol, Protocol::Shadowsocks);
        match &node.settings {
            ProxySettings::Shadowsocks {
                method, password, ..
            } => {
                assert_eq!(method, "aes-256-gcm");
                assert_eq!(password, "pass");
            }
            other => panic!("wrong settings: {:?}", other),
        }
    }

    #[test]
    fn ss_legacy() {
        let uri = format!(
            "ss://{}#Legacy",
            encode_base64("rc4-md5:secret@9.9.9.9:8388")
        );
        let node = decode_uri(&uri).unwrap();
        assert_eq!(node.server, "9.9.9.9");
        assert_eq!(node.port, 8388);
        assert_eq!(node.display_name, "Legacy");
    }

    #[test]
    fn ss_sip002_unpadded_userinfo() {
        let userinfo = encode_base64("chacha20-ietf-poly1305:pw");
        let uri = format!("ss://{}@h.example:8388#n", userinfo.trim_end_matches('='));
        let node = decode_uri(&uri).unwrap();
        match &node.settings {
            ProxySettings::Shadowsocks { method, .. } => {
                assert_eq!(method, "chacha20-ietf-poly1305")
            }
            other => panic!("wrong settings: {:?}", other),
        }
    }

    #[test]
    fn ssr_full() {
        let pass = encode_base64("mypass");
        let remarks = encode_base64("SSR 节点");
        let obfsparam = encode_base64("obfs.example");
        let body = format!(
            "h.example:8443:auth_aes128_md5:aes-256-cfb:tls1.2_ticket_auth:{}/?remarks={}&obfsparam={}",
            pass, remarks, obfsparam
        );
        let uri = format!("ssr://{}", encode_base64(&body));
        let node = decode_uri(&uri).unwrap();
        assert_eq!(node.protocol, Protocol::Shadowsocksr);
        assert_eq!(node.server, "h.example");
        assert_eq!(node.port, 8443);
        assert_eq!(node.display_name, "SSR 节点");
        match &node.settings {
            ProxySettings::Shadowsocksr {
                method,
                password,
                protocol,
                obfs,
                obfs_param,
                ..
            } => {
                assert_eq!(method, "aes-256-cfb");
                assert_eq!(password, "mypass");
                assert_eq!(protocol, "auth_aes128_md5");
                assert_eq!(obfs, "tls1.2_ticket_auth");
                assert_eq!(obfs_param.as_deref(), Some("obfs.example"));
            }
            other => panic!("wrong settings: {:?}", other),
        }
    }

    #[test]
    fn trojan_special_chars_in_password() {
        // 密码段 "p@ss!"：裸 '@'，'!' 已百分号编码
        let uri = "trojan://p@ss%21@host.example:443?sni=h.example#My%20Node";
        let node = decode_uri(uri).unwrap();
        assert_eq!(node.server, "host.example");
        assert_eq!(node.port, 443);
        assert_eq!(node.display_name, "My Node");
        match &node.settings {
            ProxySettings::Trojan { password, sni, .. } => {
                assert_eq!(password, "p@ss!");
                assert_eq!(sni.as_deref(), Some("h.example"));
            }
            other => panic!("wrong settings: {:?}", other),
        }
    }

    #[test]
    fn hysteria2_query() {
        let uri = "hysteria2://auth@h.example:443?sni=s.example&insecure=1&obfs=salamander&obfs-password=op&up=100&down=500#H2";
        let node = decode_uri(uri).unwrap();
        match &node.settings {
            ProxySettings::Hysteria2 {
                auth,
                insecure,
                obfs,
                obfs_password,
                up_mbps,
                down_mbps,
                ..
            } => {
                assert_eq!(auth, "auth");
                assert!(insecure);
                assert_eq!(obfs.as_deref(), Some("salamander"));
                assert_eq!(obfs_password.as_deref(), Some("op"));
                assert_eq!(*up_mbps, Some(100));
                assert_eq!(*down_mbps, Some(500));
            }
            other => panic!("wrong settings: {:?}", other),
        }
    }

    #[test]
    fn hy2_alias() {
        let node = decode_uri("hy2://a@h.example:443#n").unwrap();
        assert_eq!(node.protocol, Protocol::Hysteria2);
    }

    #[test]
    fn http_with_auth() {
        let node = decode_uri("http://user:pw@proxy.example:8080#HttpNode").unwrap();
        assert_eq!(node.protocol, Protocol::Http);
        assert_eq!(node.port, 8080);
        match &node.settings {
            ProxySettings::Http {
                username, password, ..
            } => {
                assert_eq!(username.as_deref(), Some("user"));
                assert_eq!(password.as_deref(), Some("pw"));
            }
            other => panic!("wrong settings: {:?}", other),
        }
    }

    #[test]
    fn https_default_port() {
        let node = decode_uri("https://proxy.example#n").unwrap();
        assert_eq!(node.protocol, Protocol::Https);
        assert_eq!(node.port, 443);
    }

    #[test]
    fn socks5_basic() {
        let node = decode_uri("socks5://u:p@5.6.7.8:1080#S").unwrap();
        assert_eq!(node.protocol, Protocol::Socks5);
        assert_eq!(node.server, "5.6.7.8");
    }

    #[test]
    fn unknown_scheme_rejected() {
        let err = decode_uri("wireguard://x@y:51820").unwrap_err();
        assert!(err.to_string().contains("wireguard"));
    }
}
