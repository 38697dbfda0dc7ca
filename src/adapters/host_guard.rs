//! Outbound host enforcement shared by all adapters.
//!
//! Every adapter that makes network calls validates its target before the
//! request leaves the process:
//! - the host must appear verbatim in the manifest's domain allowlist
//! - only ports 80 and 443 are permitted
//! - private, loopback, and link-local addresses are rejected, both as
//!   URL literals and (post-DNS) as resolved addresses
//! - redirect targets go through the same validation
//!
//! Violations map to `DOMAIN_NOT_ALLOWLISTED` in the receipt taxonomy.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

/// Host guard rejection, with the offending detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HostGuardError(pub String);

/// Whether an IPv4 address lies in a range outbound calls must never reach.
fn is_blocked_v4(addr: Ipv4Addr) -> bool {
    addr.is_private()
        || addr.is_loopback()
        || addr.is_link_local()
        || addr.is_unspecified()
        || addr.is_broadcast()
}

/// IPv6 equivalents: loopback, unique-local (fc00::/7), link-local
/// (fe80::/10), unspecified, and v4-mapped forms of blocked v4 ranges.
fn is_blocked_v6(addr: Ipv6Addr) -> bool {
    if let Some(v4) = addr.to_ipv4_mapped() {
        return is_blocked_v4(v4);
    }
    let segments = addr.segments();
    addr.is_loopback()
        || addr.is_unspecified()
        || (segments[0] & 0xfe00) == 0xfc00
        || (segments[0] & 0xffc0) == 0xfe80
}

/// Whether an address is in a blocked (non-public) range.
pub fn is_blocked_addr(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

/// Whether a hostname is an IP literal in a blocked range, or a well-known
/// internal name. Non-literal hostnames still go through
/// [`ensure_public_addrs`] after DNS resolution.
pub fn is_private_host(hostname: &str) -> bool {
    let trimmed = hostname.trim_start_matches('[').trim_end_matches(']');
    if let Ok(addr) = trimmed.parse::<IpAddr>() {
        return is_blocked_addr(addr);
    }
    let lower = hostname.to_lowercase();
    lower == "localhost" || lower.ends_with(".local") || lower.ends_with(".internal")
}

/// Parsed outbound target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundTarget {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

/// Minimal URL authority parser; enough for `scheme://host[:port]/path`.
fn parse_target(url: &str) -> Result<OutboundTarget, HostGuardError> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| HostGuardError(format!("URL has no scheme: {url:?}")))?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    if authority.is_empty() {
        return Err(HostGuardError(format!("URL has no hostname: {url:?}")));
    }
    if authority.contains('@') {
        return Err(HostGuardError("userinfo in URLs is not allowed".to_string()));
    }

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        // IPv6 literal: [::1]:443
        let (host, rest) = bracketed
            .split_once(']')
            .ok_or_else(|| HostGuardError(format!("malformed IPv6 literal: {authority:?}")))?;
        let port = match rest.strip_prefix(':') {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| HostGuardError(format!("invalid port: {p:?}")))?,
            None => default_port(scheme)?,
        };
        (format!("[{host}]"), port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, p)) => {
                let port = p
                    .parse::<u16>()
                    .map_err(|_| HostGuardError(format!("invalid port: {p:?}")))?;
                (host.to_string(), port)
            }
            None => (authority.to_string(), default_port(scheme)?),
        }
    };

    Ok(OutboundTarget {
        scheme: scheme.to_lowercase(),
        host: host.to_lowercase(),
        port,
    })
}

fn default_port(scheme: &str) -> Result<u16, HostGuardError> {
    match scheme {
        "http" => Ok(80),
        "https" => Ok(443),
        other => Err(HostGuardError(format!("unsupported scheme: {other:?}"))),
    }
}

/// Validate an outbound URL against a manifest's domain allowlist.
pub fn validate_outbound_url(url: &str, allowlist: &[String]) -> Result<OutboundTarget, HostGuardError> {
    let target = parse_target(url)?;

    if target.scheme != "http" && target.scheme != "https" {
        return Err(HostGuardError(format!(
            "unsupported scheme: {:?}",
            target.scheme
        )));
    }
    if target.port != 80 && target.port != 443 {
        return Err(HostGuardError(format!(
            "port {} is not permitted; only 80 and 443 are allowed",
            target.port
        )));
    }
    if is_private_host(&target.host) {
        return Err(HostGuardError(format!(
            "requests to private or internal addresses are blocked: {}",
            target.host
        )));
    }
    if !allowlist.iter().any(|d| d.eq_ignore_ascii_case(&target.host)) {
        return Err(HostGuardError(format!(
            "host {:?} is not in the domain allowlist",
            target.host
        )));
    }

    Ok(target)
}

/// Validate a redirect target. Redirects are not followed unless the new
/// location also passes the full outbound validation.
pub fn validate_redirect(location: &str, allowlist: &[String]) -> Result<OutboundTarget, HostGuardError> {
    validate_outbound_url(location, allowlist)
}

/// Post-DNS check: every resolved address must be public.
pub fn ensure_public_addrs(host: &str, addrs: &[IpAddr]) -> Result<(), HostGuardError> {
    match addrs.iter().find(|addr| is_blocked_addr(**addr)) {
        Some(blocked) => Err(HostGuardError(format!(
            "host {host:?} resolves to blocked address {blocked}"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowlist() -> Vec<String> {
        vec!["api.slack.com".to_string()]
    }

    #[test]
    fn test_allowlisted_https_url_passes() {
        let target =
            validate_outbound_url("https://api.slack.com/api/chat.postMessage", &allowlist())
                .unwrap();
        assert_eq!(target.host, "api.slack.com");
        assert_eq!(target.port, 443);
    }

    #[test]
    fn test_host_not_in_allowlist_rejected() {
        let err = validate_outbound_url("https://evil.example.com/x", &allowlist()).unwrap_err();
        assert!(err.0.contains("not in the domain allowlist"));
    }

    #[test]
    fn test_non_standard_port_rejected() {
        assert!(validate_outbound_url("https://api.slack.com:8443/x", &allowlist()).is_err());
        assert!(validate_outbound_url("https://api.slack.com:443/x", &allowlist()).is_ok());
        assert!(validate_outbound_url("http://api.slack.com:80/x", &allowlist()).is_ok());
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        assert!(validate_outbound_url("ftp://api.slack.com/x", &allowlist()).is_err());
        assert!(validate_outbound_url("api.slack.com/x", &allowlist()).is_err());
    }

    #[test]
    fn test_private_hosts_rejected() {
        for host in [
            "http://10.0.0.8/x",
            "http://172.16.2.3/x",
            "http://192.168.1.1/x",
            "http://127.0.0.1/x",
            "http://169.254.169.254/x",
            "http://localhost/x",
            "http://vault.internal/x",
            "http://printer.local/x",
            "http://[::1]/x",
            "http://[fc00::1]/x",
            "http://[fe80::1]/x",
        ] {
            assert!(
                validate_outbound_url(host, &allowlist()).is_err(),
                "{host} should be rejected"
            );
        }
    }

    #[test]
    fn test_userinfo_rejected() {
        assert!(validate_outbound_url("https://user:pw@api.slack.com/x", &allowlist()).is_err());
    }

    #[test]
    fn test_post_dns_check_rejects_private_resolution() {
        // DNS rebinding: the name resolves into RFC 1918 space.
        let addrs = vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))];
        assert!(ensure_public_addrs("api.slack.com", &addrs).is_err());

        let addrs = vec![IpAddr::V4(Ipv4Addr::new(44, 21, 9, 8))];
        assert!(ensure_public_addrs("api.slack.com", &addrs).is_ok());
    }

    #[test]
    fn test_v4_mapped_v6_rejected() {
        let addr: IpAddr = "::ffff:192.168.0.1".parse().unwrap();
        assert!(is_blocked_addr(addr));
    }

    #[test]
    fn test_redirect_validation_uses_same_rules() {
        assert!(validate_redirect("https://api.slack.com/next", &allowlist()).is_ok());
        assert!(validate_redirect("https://elsewhere.com/next", &allowlist()).is_err());
    }
}
