use bitflags::bitflags;
use tracing::warn;

bitflags! {
    /// IP families a bearer may negotiate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BearerIpFamily: u32 {
        /// IPv4 addressing.
        const IPV4 = 1;
        /// IPv6 addressing.
        const IPV6 = 1 << 1;
    }
}

impl Default for BearerIpFamily {
    fn default() -> Self {
        BearerIpFamily::IPV4
    }
}

/// Connection state of a bearer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BearerState {
    /// No data session and none being set up.
    #[default]
    Idle,

    /// A dial is in flight, awaiting network confirmation.
    Connecting,

    /// The data session is up.
    Connected,

    /// A teardown command is in flight.
    Disconnecting,
}

/// How the address configuration of a connected bearer is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpMethod {
    /// Not known yet.
    #[default]
    Unknown,

    /// Addressing is negotiated by PPP after the data call is up.
    Ppp,

    /// Addressing was provided explicitly by the network.
    Static,

    /// Addressing is obtained over DHCP on the data interface.
    Dhcp,
}

/// Maximum DNS servers carried per address family.
pub const MAX_DNS_SERVERS: usize = 3;

/// Address configuration for one IP family.
///
/// Populated only once the bearer is connected; cleared again on
/// disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IpConfig {
    /// How the configuration is obtained.
    pub method: IpMethod,

    /// Interface address, when known.
    pub address: Option<String>,

    /// Network prefix length, when known.
    pub prefix: Option<u32>,

    /// DNS servers, at most [`MAX_DNS_SERVERS`].
    pub dns: Vec<String>,

    /// Gateway address, when known.
    pub gateway: Option<String>,
}

impl IpConfig {
    /// Configuration for a link whose addressing PPP will negotiate.
    pub fn ppp() -> Self {
        Self {
            method: IpMethod::Ppp,
            ..Self::default()
        }
    }

    /// Replace the DNS server list, truncating to [`MAX_DNS_SERVERS`].
    pub fn set_dns(&mut self, servers: Vec<String>) {
        if servers.len() > MAX_DNS_SERVERS {
            warn!(
                count = servers.len(),
                "Truncating DNS server list to {MAX_DNS_SERVERS}"
            );
        }
        self.dns = servers;
        self.dns.truncate(MAX_DNS_SERVERS);
    }
}

/// Immutable connection properties a bearer is created with.
#[derive(Debug, Clone)]
pub struct BearerProperties {
    /// Access point name.
    pub apn: String,

    /// IP families to request.
    pub ip_family: BearerIpFamily,

    /// Authentication user name. Only honored together with `password`.
    pub user: Option<String>,

    /// Authentication password. Only honored together with `user`.
    pub password: Option<String>,

    /// Whether a roaming registration may carry this bearer.
    pub allow_roaming: bool,

    /// Dial string for modems that use a data call instead of context
    /// activation.
    pub number: Option<String>,

    /// PDP context identifier on the device.
    pub context_id: u32,
}

impl Default for BearerProperties {
    fn default() -> Self {
        Self {
            apn: String::new(),
            ip_family: BearerIpFamily::default(),
            user: None,
            password: None,
            allow_roaming: false,
            number: None,
            context_id: 1,
        }
    }
}

impl BearerProperties {
    /// PDP context definition for this bearer.
    pub(crate) fn context_definition_command(&self) -> String {
        format!(
            "AT+CGDCONT={},\"{}\",\"{}\"",
            self.context_id,
            self.pdp_type(),
            self.apn
        )
    }

    /// Credentials configuration for this bearer.
    ///
    /// User and password are required together; anything less configures
    /// the context explicitly for no authentication rather than leaving
    /// stale device-side credentials in place.
    pub(crate) fn authentication_command(&self) -> String {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => {
                format!("AT+CGAUTH={},1,\"{user}\",\"{password}\"", self.context_id)
            }
            _ => format!("AT+CGAUTH={},0", self.context_id),
        }
    }

    /// Activation command: a data call when a dial string is configured,
    /// context activation otherwise.
    pub(crate) fn activation_command(&self) -> String {
        match &self.number {
            Some(number) => format!("ATD{number}"),
            None => format!("AT+CGACT=1,{}", self.context_id),
        }
    }

    /// Context deactivation command.
    pub(crate) fn deactivation_command(&self) -> String {
        format!("AT+CGACT=0,{}", self.context_id)
    }

    fn pdp_type(&self) -> &'static str {
        if self.ip_family.contains(BearerIpFamily::IPV4 | BearerIpFamily::IPV6) {
            "IPV4V6"
        } else if self.ip_family.contains(BearerIpFamily::IPV6) {
            "IPV6"
        } else {
            "IP"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_definition_reflects_family() {
        let mut properties = BearerProperties {
            apn: "internet".into(),
            ..BearerProperties::default()
        };
        assert_eq!(
            properties.context_definition_command(),
            "AT+CGDCONT=1,\"IP\",\"internet\""
        );

        properties.ip_family = BearerIpFamily::IPV4 | BearerIpFamily::IPV6;
        assert_eq!(
            properties.context_definition_command(),
            "AT+CGDCONT=1,\"IPV4V6\",\"internet\""
        );
    }

    #[test]
    fn credentials_require_user_and_password_together() {
        let mut properties = BearerProperties::default();
        assert_eq!(properties.authentication_command(), "AT+CGAUTH=1,0");

        properties.user = Some("alice".into());
        assert_eq!(properties.authentication_command(), "AT+CGAUTH=1,0");

        properties.password = Some("secret".into());
        assert_eq!(
            properties.authentication_command(),
            "AT+CGAUTH=1,1,\"alice\",\"secret\""
        );
    }

    #[test]
    fn dial_number_overrides_context_activation() {
        let mut properties = BearerProperties::default();
        assert_eq!(properties.activation_command(), "AT+CGACT=1,1");

        properties.number = Some("*99#".into());
        assert_eq!(properties.activation_command(), "ATD*99#");
    }

    #[test]
    fn dns_list_is_capped() {
        let mut config = IpConfig::ppp();
        config.set_dns(vec![
            "10.0.0.1".into(),
            "10.0.0.2".into(),
            "10.0.0.3".into(),
            "10.0.0.4".into(),
        ]);
        assert_eq!(config.dns.len(), MAX_DNS_SERVERS);
    }
}
