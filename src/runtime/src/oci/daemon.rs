//! Build daemon connection and host discovery.
//!
//! The build engine only needs a [`BuildDaemon`]; this module supplies one
//! that speaks the Docker Engine HTTP API, plus the usual ways of finding
//! the daemon: `DOCKER_*` environment variables, `docker-machine env`, or
//! the `daemon` section of the config file.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;

use boxcall_core::config::DaemonConfig;
use boxcall_core::error::{BoxcallError, Result};

use super::build::engine::{BuildDaemon, BuildOptions, ProgressStream};

/// Default daemon address when nothing else is configured.
pub const DEFAULT_DAEMON_URL: &str = "unix:///var/run/docker.sock";

/// TLS material for a remote daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct TlsSettings {
    /// CA bundle used to verify the daemon
    pub ca_cert: PathBuf,
    /// Client certificate and key (PEM; RSA, PKCS#8 or SEC1 keys)
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    /// Verify the daemon certificate at all
    pub verify: bool,
    /// Check that the certificate matches the host name
    pub assert_hostname: bool,
}

impl TlsSettings {
    /// Standard file layout of a docker cert directory.
    pub fn from_cert_dir(dir: PathBuf, verify: bool, assert_hostname: bool) -> Self {
        Self {
            ca_cert: dir.join("ca.pem"),
            client_cert: dir.join("cert.pem"),
            client_key: dir.join("key.pem"),
            verify,
            assert_hostname,
        }
    }
}

/// Where and how to reach a build daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonEndpoint {
    pub base_url: String,
    pub tls: Option<TlsSettings>,
}

impl DaemonEndpoint {
    /// The local daemon socket.
    pub fn local() -> Self {
        Self {
            base_url: DEFAULT_DAEMON_URL.to_string(),
            tls: None,
        }
    }

    /// Resolve an endpoint from `DOCKER_HOST`, `DOCKER_TLS_VERIFY` and
    /// `DOCKER_CERT_PATH`.
    ///
    /// TLS is enabled when verification is requested or a cert path is
    /// given; the cert path defaults to `~/.docker`.
    pub fn from_env_map(env: &HashMap<String, String>, assert_hostname: bool) -> Result<Self> {
        let base_url = env
            .get("DOCKER_HOST")
            .filter(|h| !h.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_DAEMON_URL.to_string());

        let tls_verify = env.get("DOCKER_TLS_VERIFY").is_some_and(|v| !v.is_empty());
        let cert_path = env
            .get("DOCKER_CERT_PATH")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        let tls = if tls_verify || cert_path.is_some() {
            let dir = match cert_path {
                Some(dir) => dir,
                None => default_cert_dir()?,
            };
            Some(TlsSettings::from_cert_dir(dir, tls_verify, assert_hostname))
        } else {
            None
        };

        Ok(Self { base_url, tls })
    }

    /// Resolve an endpoint from the process environment.
    pub fn from_env(assert_hostname: bool) -> Result<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_env_map(&env, assert_hostname)
    }

    /// Resolve an endpoint from configuration, falling back to the
    /// environment when no host is configured.
    pub fn from_config(config: &DaemonConfig) -> Result<Self> {
        let Some(host) = &config.host else {
            return Self::from_env(config.assert_hostname);
        };

        let tls = if config.tls_verify || config.cert_path.is_some() {
            let dir = match &config.cert_path {
                Some(dir) => dir.clone(),
                None => default_cert_dir()?,
            };
            Some(TlsSettings::from_cert_dir(
                dir,
                config.tls_verify,
                config.assert_hostname,
            ))
        } else {
            None
        };

        Ok(Self {
            base_url: host.clone(),
            tls,
        })
    }

    /// HTTP(S) URL for the daemon API.
    pub fn http_url(&self) -> Result<String> {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        let url = if let Some(addr) = self.base_url.strip_prefix("tcp://") {
            format!("{}://{}", scheme, addr)
        } else if self.base_url.starts_with("http://") || self.base_url.starts_with("https://") {
            self.base_url.clone()
        } else if self.base_url.starts_with("unix://") {
            return Err(BoxcallError::ConfigError(format!(
                "Local socket daemon '{}' is not supported; set DOCKER_HOST or daemon.host \
                 to a tcp:// address",
                self.base_url
            )));
        } else {
            return Err(BoxcallError::ConfigError(format!(
                "Unsupported daemon address '{}' (expected tcp://, http:// or https://)",
                self.base_url
            )));
        };
        Ok(url.trim_end_matches('/').to_string())
    }
}

fn default_cert_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| {
        BoxcallError::ConfigError("Cannot determine home directory for certificates".to_string())
    })?;
    Ok(home.join(".docker"))
}

/// Parse the output of `docker-machine env <name>`.
///
/// Only `export KEY="VALUE"` lines are kept.
pub fn parse_machine_env(stdout: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in stdout.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("export") {
            continue;
        }
        let Some((key, value)) = fields.next().and_then(|kv| kv.split_once('=')) else {
            continue;
        };
        vars.insert(key.to_string(), value.trim_matches('"').to_string());
    }
    vars
}

/// Environment for a docker-machine host, as reported by `docker-machine env`.
pub fn docker_machine_env(machine: &str) -> Result<HashMap<String, String>> {
    let output = std::process::Command::new("docker-machine")
        .args(["env", machine])
        .output()
        .map_err(|e| BoxcallError::ConfigError(format!("Failed to run docker-machine: {}", e)))?;

    if !output.status.success() {
        return Err(BoxcallError::ConfigError(format!(
            "docker-machine env {} failed: {}",
            machine,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(parse_machine_env(&String::from_utf8_lossy(&output.stdout)))
}

/// Build daemon reached over the Docker Engine HTTP API.
pub struct DockerDaemon {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl DockerDaemon {
    /// Connect to a daemon endpoint.
    pub fn connect(endpoint: &DaemonEndpoint) -> Result<Self> {
        let base_url = endpoint.http_url()?;

        // Builds may run for a long time; no client-side deadline.
        let mut builder = reqwest::blocking::Client::builder().timeout(None::<std::time::Duration>);

        if let Some(tls) = &endpoint.tls {
            let ca = read_pem(&tls.ca_cert)?;
            let cert = read_pem(&tls.client_cert)?;
            let key = read_pem(&tls.client_key)?;

            let ca = reqwest::Certificate::from_pem(&ca).map_err(|e| {
                BoxcallError::ConfigError(format!("Invalid CA certificate: {}", e))
            })?;
            let identity = client_identity(cert, &key)?;

            builder = builder
                .add_root_certificate(ca)
                .identity(identity)
                .danger_accept_invalid_certs(!tls.verify)
                .danger_accept_invalid_hostnames(!tls.assert_hostname);
        }

        let client = builder
            .build()
            .map_err(|e| BoxcallError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        tracing::debug!(url = %base_url, tls = endpoint.tls.is_some(), "Connected to build daemon");
        Ok(Self { client, base_url })
    }

    fn build_url(&self, options: &BuildOptions) -> String {
        let mut url = format!("{}/build?rm={}", self.base_url, options.remove_intermediate as u8);
        if options.pull {
            url.push_str("&pull=1");
        }
        url
    }
}

/// Client identity from a cert and a key in any PEM form, including the
/// traditional RSA `key.pem` docker-machine writes.
fn client_identity(mut cert: Vec<u8>, key: &[u8]) -> Result<reqwest::Identity> {
    if !cert.ends_with(b"\n") {
        cert.push(b'\n');
    }
    cert.extend_from_slice(key);
    reqwest::Identity::from_pem(&cert)
        .map_err(|e| BoxcallError::ConfigError(format!("Invalid client certificate: {}", e)))
}

fn read_pem(path: &std::path::Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        BoxcallError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
    })
}

impl BuildDaemon for DockerDaemon {
    fn build(&self, context: Vec<u8>, options: &BuildOptions) -> Result<ProgressStream<'_>> {
        let url = self.build_url(options);
        tracing::debug!(url = %url, bytes = context.len(), "Submitting build context");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-tar")
            .body(context)
            .send()
            .map_err(|e| BoxcallError::DaemonError(format!("Build request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BoxcallError::DaemonError(format!(
                "{}: {}",
                status,
                body.trim()
            )));
        }

        Ok(Box::new(std::io::BufReader::new(response).lines()))
    }
}
