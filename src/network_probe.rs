//! Local address resolution and connectivity probes

use crate::{
    config::PortalEndpoints, http_client::blocking_client, observer::SharedObserver,
    process::output_with_timeout,
};
use anyhow::{Context, Result, bail, ensure};
use log::debug;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use reqwest::{StatusCode, blocking::Client};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket},
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::Duration,
};

/// Returned when no local address could be determined
///
/// This is not a real address and must be treated as "unknown".
pub const UNKNOWN_LOCAL_IP: &str = "10.0.0.1";

pub fn is_unknown_ip(ip: &str) -> bool {
    ip == UNKNOWN_LOCAL_IP
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivityState {
    /// the internet answers, the device is already logged in
    CampusAuthenticated,
    /// only the campus gateway answers
    CampusReachableUnauthenticated,
    NoCampusNoInternet,
}

impl ConnectivityState {
    /// Derive the state from fresh probes, internet first
    pub fn probe(probe: &dyn NetworkProbe) -> Self {
        if probe.is_internet_reachable() {
            ConnectivityState::CampusAuthenticated
        } else if probe.is_campus_reachable() {
            ConnectivityState::CampusReachableUnauthenticated
        } else {
            ConnectivityState::NoCampusNoInternet
        }
    }
}

#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait NetworkProbe: Send + Sync {
    fn resolve_local_ip(&self) -> String;
    fn is_campus_reachable(&self) -> bool;
    fn is_internet_reachable(&self) -> bool;
}

/// Probes the real network
pub struct SystemNetworkProbe {
    client: Client,
    campus_check_url: String,
    internet_check_url: String,
    observer: SharedObserver,
}

impl SystemNetworkProbe {
    const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
    const STEP_TIMEOUT: Duration = Duration::from_secs(1);
    const UDP_TARGET: &str = "8.8.8.8:80";

    pub fn new(endpoints: &PortalEndpoints, observer: SharedObserver) -> Result<Self> {
        Ok(SystemNetworkProbe {
            client: blocking_client(Self::PROBE_TIMEOUT, None)
                .context("failed to create probe client")?,
            campus_check_url: endpoints.campus_check_url.clone(),
            internet_check_url: endpoints.internet_check_url.clone(),
            observer,
        })
    }

    fn is_ok(&self, url: &str) -> bool {
        match self.client.get(url).send() {
            Ok(res) => {
                debug!("GET {url} answered {}", res.status());
                res.status() == StatusCode::OK
            }
            Err(e) => {
                debug!("GET {url} failed: {e}");
                false
            }
        }
    }

    fn interface_ip() -> Result<IpAddr> {
        let out = if cfg!(target_os = "linux") {
            output_with_timeout("ip", &["-4", "-o", "addr", "show", "up"], Self::STEP_TIMEOUT)?
        } else {
            output_with_timeout("ifconfig", &[], Self::STEP_TIMEOUT)?
        };

        parse_inet_addresses(&out)
            .into_iter()
            .next()
            .context("failed to find a non-loopback interface address")
    }

    fn udp_route_ip() -> Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind udp socket")?;
        socket
            .set_read_timeout(Some(Self::STEP_TIMEOUT))
            .context("failed to set udp socket timeout")?;
        // connect() on UDP only selects a route, nothing is sent
        socket
            .connect(Self::UDP_TARGET)
            .context("failed to connect udp socket")?;
        let ip = socket
            .local_addr()
            .context("failed to read udp socket address")?
            .ip();

        ensure!(
            !ip.is_unspecified() && !ip.is_loopback(),
            "udp socket bound to unusable address {ip}"
        );
        Ok(ip)
    }

    fn hostname_ip() -> Result<IpAddr> {
        let hostname = output_with_timeout("hostname", &[], Self::STEP_TIMEOUT)?;
        let hostname = hostname.trim().to_string();
        ensure!(!hostname.is_empty(), "hostname is empty");

        resolve_hostname(hostname, lookup_host_ip, Self::STEP_TIMEOUT)
    }
}

impl NetworkProbe for SystemNetworkProbe {
    fn resolve_local_ip(&self) -> String {
        let steps: [(&str, fn() -> Result<IpAddr>); 3] = [
            ("interface query", Self::interface_ip),
            ("udp route", Self::udp_route_ip),
            ("hostname", Self::hostname_ip),
        ];

        for (name, step) in steps {
            match step() {
                Ok(ip) => {
                    let ip = ip.to_string();
                    self.observer.local_ip_resolved(name, &ip);
                    return ip;
                }
                Err(e) => self.observer.local_ip_step_failed(name, &format!("{e:#}")),
            }
        }

        self.observer.local_ip_unavailable(UNKNOWN_LOCAL_IP);
        UNKNOWN_LOCAL_IP.to_string()
    }

    fn is_campus_reachable(&self) -> bool {
        self.is_ok(&self.campus_check_url)
    }

    fn is_internet_reachable(&self) -> bool {
        self.is_ok(&self.internet_check_url)
    }
}

/// Resolve `hostname` with `lookup` on a worker thread, giving up after `timeout`
///
/// getaddrinfo cannot be cancelled; a lookup that outlives the timeout finishes
/// detached and its result is dropped.
pub fn resolve_hostname<F>(hostname: String, lookup: F, timeout: Duration) -> Result<IpAddr>
where
    F: FnOnce(&str) -> Result<IpAddr> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let name = hostname.clone();
    thread::spawn(move || {
        let _ = tx.send(lookup(&name));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            bail!("resolving {hostname} did not finish within {timeout:?}")
        }
        Err(RecvTimeoutError::Disconnected) => bail!("resolver for {hostname} stopped"),
    }
}

fn lookup_host_ip(hostname: &str) -> Result<IpAddr> {
    (hostname, 0)
        .to_socket_addrs()
        .context(format!("failed to resolve hostname {hostname}"))?
        .map(|addr: SocketAddr| addr.ip())
        .find(|ip| ip.is_ipv4() && !ip.is_loopback())
        .context(format!("hostname {hostname} has no usable address"))
}

/// Collect IPv4 addresses from `ifconfig` or `ip -o addr` output
///
/// Loopback and link-local addresses are skipped; order is preserved.
pub fn parse_inet_addresses(output: &str) -> Vec<IpAddr> {
    output
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            words.find(|w| *w == "inet")?;
            let addr = words.next()?;
            let addr = addr.split('/').next()?;
            // older ifconfig prints "inet addr:1.2.3.4"
            let addr = addr.strip_prefix("addr:").unwrap_or(addr);
            addr.parse::<Ipv4Addr>().ok()
        })
        .filter(|ip| !ip.is_loopback() && !ip.is_link_local() && !ip.is_unspecified())
        .map(IpAddr::V4)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{NullObserver, RecordingObserver};
    use std::{sync::Arc, time::Instant};

    #[test]
    fn test_parse_ifconfig_output() {
        let out = "\
lo0: flags=8049<UP,LOOPBACK,RUNNING,MULTICAST> mtu 16384
\tinet 127.0.0.1 netmask 0xff000000
\tinet6 ::1 prefixlen 128
en0: flags=8863<UP,BROADCAST,SMART,RUNNING,SIMPLEX,MULTICAST> mtu 1500
\tinet 169.254.10.2 netmask 0xffff0000
\tinet 172.20.31.7 netmask 0xffff0000 broadcast 172.20.255.255
";
        assert_eq!(
            parse_inet_addresses(out),
            vec![IpAddr::V4(Ipv4Addr::new(172, 20, 31, 7))]
        );
    }

    #[test]
    fn test_parse_ip_addr_output() {
        let out = "\
1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever
2: wlan0    inet 10.21.4.99/16 brd 10.21.255.255 scope global dynamic wlan0\\       valid_lft 3600sec
";
        assert_eq!(
            parse_inet_addresses(out),
            vec![IpAddr::V4(Ipv4Addr::new(10, 21, 4, 99))]
        );
    }

    #[test]
    fn test_parse_legacy_ifconfig_output() {
        let out = "eth0  Link encap:Ethernet\n      inet addr:192.168.1.20  Bcast:192.168.1.255\n";
        assert_eq!(
            parse_inet_addresses(out),
            vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))]
        );
    }

    #[test]
    fn test_parse_without_addresses() {
        assert!(parse_inet_addresses("").is_empty());
        assert!(parse_inet_addresses("lo0: inet 127.0.0.1 netmask 0xff000000").is_empty());
    }

    #[test]
    fn test_connectivity_state_prefers_internet() {
        let mut probe = MockNetworkProbe::new();
        probe.expect_is_internet_reachable().return_const(true);
        probe.expect_is_campus_reachable().never();
        assert_eq!(
            ConnectivityState::probe(&probe),
            ConnectivityState::CampusAuthenticated
        );
    }

    #[test]
    fn test_connectivity_state_campus_only() {
        let mut probe = MockNetworkProbe::new();
        probe.expect_is_internet_reachable().return_const(false);
        probe.expect_is_campus_reachable().return_const(true);
        assert_eq!(
            ConnectivityState::probe(&probe),
            ConnectivityState::CampusReachableUnauthenticated
        );
    }

    #[test]
    fn test_connectivity_state_offline() {
        let mut probe = MockNetworkProbe::new();
        probe.expect_is_internet_reachable().return_const(false);
        probe.expect_is_campus_reachable().return_const(false);
        assert_eq!(
            ConnectivityState::probe(&probe),
            ConnectivityState::NoCampusNoInternet
        );
    }

    #[test]
    fn test_unknown_ip_placeholder() {
        assert!(is_unknown_ip(UNKNOWN_LOCAL_IP));
        assert!(!is_unknown_ip("172.20.31.7"));
    }

    #[test]
    fn test_probe_against_closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoints = PortalEndpoints {
            campus_check_url: format!("http://127.0.0.1:{port}/a79.htm"),
            internet_check_url: format!("http://127.0.0.1:{port}/"),
            ..Default::default()
        };
        let probe = SystemNetworkProbe::new(&endpoints, Arc::new(NullObserver)).unwrap();
        assert!(!probe.is_campus_reachable());
        assert!(!probe.is_internet_reachable());
    }

    #[test]
    fn test_resolve_hostname_gives_up_on_slow_resolver() {
        let started = Instant::now();
        let result = resolve_hostname(
            "slow-host".to_string(),
            |_| {
                thread::sleep(Duration::from_secs(5));
                Ok(IpAddr::V4(Ipv4Addr::new(172, 20, 31, 7)))
            },
            SystemNetworkProbe::STEP_TIMEOUT,
        );

        assert!(result.unwrap_err().to_string().contains("did not finish"));
        assert!(started.elapsed() >= SystemNetworkProbe::STEP_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_resolve_hostname_returns_lookup_result() {
        let ip = resolve_hostname(
            "campus-pc".to_string(),
            |name| {
                assert_eq!(name, "campus-pc");
                Ok(IpAddr::V4(Ipv4Addr::new(172, 20, 31, 7)))
            },
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::new(172, 20, 31, 7)));

        let err = resolve_hostname(
            "campus-pc".to_string(),
            |_| bail!("no such host"),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no such host"));
    }

    #[test]
    fn test_resolve_local_ip_reports_to_observer() {
        let endpoints = PortalEndpoints::default();
        let observer = Arc::new(RecordingObserver::default());
        let probe = SystemNetworkProbe::new(&endpoints, observer.clone()).unwrap();

        let ip = probe.resolve_local_ip();

        let events = observer.events();
        let last = events.last().expect("no local ip event");
        if is_unknown_ip(&ip) {
            assert_eq!(last, &format!("local_ip_unavailable {UNKNOWN_LOCAL_IP}"));
        } else {
            assert!(last.starts_with("local_ip_resolved "));
            assert!(last.ends_with(&ip));
        }
    }
}
