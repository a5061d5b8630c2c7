use reqwest::{Client, Proxy};
use std::time::Duration;
use switchboard_core::config::NetworkConfig;
use tracing::{debug, info, warn};

/// Outcome of proxy selection for one upstream base URL.
#[derive(Debug, PartialEq)]
enum ProxyChoice {
    Use(String),
    /// Bypass every proxy, including `HTTPS_PROXY` from the environment.
    Direct,
    /// Leave reqwest's environment handling alone.
    Inherit,
}

/// Matches a host against `noProxy` entries.
///
/// `*.example.com` matches subdomains only; `.example.com` matches the bare
/// domain as well; anything else must match exactly.
fn host_bypasses_proxy(host: &str, rules: &[String]) -> bool {
    let host = host.to_lowercase();
    rules.iter().any(|rule| {
        let rule = rule.trim().to_lowercase();
        if rule.is_empty() {
            return false;
        }
        if let Some(suffix) = rule.strip_prefix("*.") {
            host.ends_with(&format!(".{suffix}"))
        } else if let Some(suffix) = rule.strip_prefix('.') {
            host == suffix || host.ends_with(&format!(".{suffix}"))
        } else {
            host == rule
        }
    })
}

fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split('/').next()?;
    let authority = authority.rsplit('@').next()?;
    if let Some(v6) = authority.strip_prefix('[') {
        return v6.split(']').next().map(str::to_string);
    }
    authority.split(':').next().map(str::to_string)
}

fn choose_proxy(
    provider_proxy: Option<&str>,
    global_proxy: Option<&str>,
    no_proxy: &[String],
    target: &str,
) -> ProxyChoice {
    match provider_proxy {
        Some("") => return ProxyChoice::Direct,
        Some(p) => return ProxyChoice::Use(p.to_string()),
        None => {}
    }

    match global_proxy {
        Some(global) if !global.is_empty() => {
            let bypass = host_of(target)
                .map(|h| host_bypasses_proxy(&h, no_proxy))
                .unwrap_or(false);
            if bypass {
                ProxyChoice::Direct
            } else {
                ProxyChoice::Use(global.to_string())
            }
        }
        _ => ProxyChoice::Inherit,
    }
}

/// Builds a client for `target` honoring a per-provider proxy override,
/// then the global `network.proxy` filtered by `network.noProxy`.
///
/// `provider_proxy` of `Some("")` forces a direct connection.
pub fn build_http_client(
    provider_proxy: Option<&str>,
    network: &NetworkConfig,
    target: &str,
    timeout: Duration,
) -> Client {
    let mut builder = Client::builder().timeout(timeout);

    match choose_proxy(provider_proxy, network.proxy.as_deref(), &network.no_proxy, target) {
        ProxyChoice::Use(url) => match Proxy::all(&url) {
            Ok(proxy) => {
                info!(proxy = %url, target = %target, "Using proxy");
                builder = builder.proxy(proxy);
            }
            Err(e) => {
                warn!(error = %e, proxy = %url, "Invalid proxy URL, connecting directly");
            }
        },
        ProxyChoice::Direct => {
            debug!(target = %target, "Proxy disabled for target");
            builder = builder.no_proxy();
        }
        ProxyChoice::Inherit => {}
    }

    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to build HTTP client, using default");
        Client::new()
    })
}
