//! Gateway discovery.
//!
//! Active search sends SEARCHGW to a multicast group and collects GWINFO
//! answers until the [`GatewaySelector`] picks one. Only one search runs at a
//! time; starting another replaces it. Passive discovery records every
//! ADVERTISE heard.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use tracing::debug;

use super::completion::Responder;
use crate::core::{FirstResponder, GatewayInfo, GatewaySelector, RequestError};

/// A gateway heard through ADVERTISE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advertisement {
    /// The advertising gateway.
    pub gateway: GatewayInfo,
    /// Interval until its next advertisement.
    pub duration: Duration,
    /// When it was last heard.
    pub last_seen: Instant,
}

impl Advertisement {
    /// True if the next advertisement is overdue at `now`.
    pub fn is_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > self.duration
    }
}

#[derive(Debug)]
struct Search {
    target: SocketAddr,
    responder: Responder<GatewayInfo>,
}

/// Search and advertisement state.
pub struct Discovery {
    search: Option<Search>,
    candidates: Vec<GatewayInfo>,
    advertised: BTreeMap<u8, Advertisement>,
    selector: Box<dyn GatewaySelector + Send>,
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("searching", &self.search.is_some())
            .field("candidates", &self.candidates)
            .field("advertised", &self.advertised)
            .finish_non_exhaustive()
    }
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Discovery {
    /// Create discovery state with the [`FirstResponder`] selector.
    pub fn new() -> Self {
        Self {
            search: None,
            candidates: Vec::new(),
            advertised: BTreeMap::new(),
            selector: Box::new(FirstResponder),
        }
    }

    /// Replace the gateway selector.
    pub fn set_selector(&mut self, selector: impl GatewaySelector + Send + 'static) {
        self.selector = Box::new(selector);
    }

    /// Begin a search towards `target`.
    ///
    /// Returns the responder of a search that was still running. The caller
    /// drops it, so that search never resolves.
    pub(crate) fn start(
        &mut self,
        target: SocketAddr,
        responder: Responder<GatewayInfo>,
    ) -> Option<Responder<GatewayInfo>> {
        self.candidates.clear();
        self.search
            .replace(Search { target, responder })
            .map(|old| old.responder)
    }

    /// True while a search runs.
    pub fn is_searching(&self) -> bool {
        self.search.is_some()
    }

    /// End the running search with `error`.
    pub(crate) fn cancel(&mut self, error: RequestError) -> bool {
        match self.search.take() {
            Some(search) => {
                search.responder.fail(error);
                true
            }
            None => false,
        }
    }

    /// Handle GWINFO. Returns the gateway if it ended the running search.
    pub(crate) fn on_gwinfo(
        &mut self,
        gw_id: u8,
        gw_addr: &[u8],
        from: SocketAddr,
    ) -> Option<GatewayInfo> {
        let target = self.search.as_ref()?.target;
        let Some(address) = resolve_address(gw_addr, from, target.port()) else {
            debug!(gw_id, len = gw_addr.len(), "ignoring GWINFO with unusable address");
            return None;
        };
        let candidate = GatewayInfo {
            gateway_id: gw_id,
            address,
        };
        let chosen = self.selector.select(&candidate, &self.candidates);
        self.candidates.push(candidate);
        if !chosen {
            return None;
        }
        let search = self.search.take()?;
        search.responder.succeed(candidate);
        Some(candidate)
    }

    /// Record an ADVERTISE heard from `from`.
    pub(crate) fn on_advertise(
        &mut self,
        gw_id: u8,
        duration: u16,
        from: SocketAddr,
        now: Instant,
    ) -> Advertisement {
        let advertisement = Advertisement {
            gateway: GatewayInfo {
                gateway_id: gw_id,
                address: from,
            },
            duration: Duration::from_secs(u64::from(duration)),
            last_seen: now,
        };
        self.advertised.insert(gw_id, advertisement);
        advertisement
    }

    /// Every GWINFO seen during the current or last search.
    pub fn candidates(&self) -> &[GatewayInfo] {
        &self.candidates
    }

    /// Gateways heard through ADVERTISE, by gateway id.
    pub fn advertised(&self) -> impl Iterator<Item = &Advertisement> {
        self.advertised.values()
    }

    /// Last advertisement of `gw_id`.
    pub fn advertisement(&self, gw_id: u8) -> Option<&Advertisement> {
        self.advertised.get(&gw_id)
    }
}

/// Where a GWINFO says the gateway lives.
///
/// An empty address field means the gateway answered itself. Otherwise the
/// field holds a raw IPv4 or IPv6 address, reached on the search port.
fn resolve_address(gw_addr: &[u8], from: SocketAddr, port: u16) -> Option<SocketAddr> {
    let ip = match gw_addr.len() {
        0 => return Some(from),
        4 => {
            let octets: [u8; 4] = gw_addr.try_into().ok()?;
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = gw_addr.try_into().ok()?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}
