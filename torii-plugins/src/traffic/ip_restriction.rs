use async_trait::async_trait;
use ipnet::IpNet;
use serde::Deserialize;
use serde_json::Value;
use std::net::IpAddr;
use std::str::FromStr;
use torii_core::http::GatewayResponse;
use torii_plugin::plugin::{Phase, Plugin, PluginContext, PluginError, PluginInstance};

/// IP restriction plugin — allowlist/denylist access control.
///
/// The effective client address honors `X-Forwarded-For` (first hop)
/// and `X-Real-IP` before falling back to the socket address.
pub struct IpRestrictionPlugin;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct IpRestrictionConfig {
    /// If non-empty, only these CIDRs/IPs are allowed.
    allow: Vec<String>,
    /// If non-empty, these CIDRs/IPs are blocked. Deny wins.
    deny: Vec<String>,
    status: u16,
    message: String,
}

impl Default for IpRestrictionConfig {
    fn default() -> Self {
        Self {
            allow: vec![],
            deny: vec![],
            status: 403,
            message: "Your IP address is not allowed".to_string(),
        }
    }
}

struct IpRestrictionInstance {
    allow: Vec<IpNet>,
    deny: Vec<IpNet>,
    status: u16,
    message: String,
}

impl Plugin for IpRestrictionPlugin {
    fn name(&self) -> &'static str {
        "ip-restriction"
    }

    fn priority(&self) -> i32 {
        950
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Access]
    }

    fn configure(&self, config: &Value) -> anyhow::Result<Box<dyn PluginInstance>> {
        let config: IpRestrictionConfig = serde_json::from_value(config.clone())?;
        Ok(Box::new(IpRestrictionInstance {
            allow: parse_networks(&config.allow),
            deny: parse_networks(&config.deny),
            status: config.status,
            message: config.message,
        }))
    }
}

/// Unparseable entries are skipped; a plain IP becomes a host network.
fn parse_networks(list: &[String]) -> Vec<IpNet> {
    list.iter()
        .filter_map(|entry| {
            IpNet::from_str(entry).ok().or_else(|| {
                IpAddr::from_str(entry).ok().map(|ip| match ip {
                    IpAddr::V4(a) => IpNet::from(ipnet::Ipv4Net::from(a)),
                    IpAddr::V6(a) => IpNet::from(ipnet::Ipv6Net::from(a)),
                })
            })
        })
        .collect()
}

impl IpRestrictionInstance {
    fn client_ip(&self, ctx: &PluginContext) -> String {
        let mut ip = ctx.request.client_ip.clone();

        if let Some(forwarded) = ctx.request.header("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').next() {
                ip = first.trim().to_string();
            }
        }

        if let Some(real_ip) = ctx.request.header("x-real-ip") {
            ip = real_ip.trim().to_string();
        }

        ip
    }

    fn deny_response(&self) -> GatewayResponse {
        GatewayResponse::error(self.status, &self.message)
    }
}

fn matches_any(ip: &IpAddr, list: &[IpNet]) -> bool {
    list.iter().any(|net| net.contains(ip))
}

#[async_trait]
impl PluginInstance for IpRestrictionInstance {
    fn name(&self) -> &'static str {
        "ip-restriction"
    }

    fn priority(&self) -> i32 {
        950
    }

    fn phases(&self) -> &'static [Phase] {
        &[Phase::Access]
    }

    async fn access(&self, ctx: &mut PluginContext) -> Result<Option<GatewayResponse>, PluginError> {
        let Ok(ip) = IpAddr::from_str(&self.client_ip(ctx)) else {
            return Ok(Some(self.deny_response()));
        };

        if !self.deny.is_empty() && matches_any(&ip, &self.deny) {
            return Ok(Some(self.deny_response()));
        }

        if !self.allow.is_empty() && !matches_any(&ip, &self.allow) {
            return Ok(Some(self.deny_response()));
        }

        Ok(None)
    }
}
