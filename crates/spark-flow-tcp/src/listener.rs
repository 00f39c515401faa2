//! 从能力位图推导监听地址，并以 `socket2` 创建监听套接字。
//!
//! # 教案式说明
//! - **意图（Why）**：`AcceptEndpoint` 的通配主机需要根据允许的地址族落到具体地址，
//!   且 IPv6 监听是否兼收 IPv4 取决于 `IPV4_BANNED`；这类选项只能在 `bind` 之前设置，
//!   因此绕过 `TcpListener::bind`，先用 `socket2` 配置再转换。
//! - **逻辑（How）**：`plan_bind` 只做纯计算，`bind` 负责系统调用；双栈监听失败时
//!   回退到 IPv4 通配地址。
//! - **契约（What）**：要求安全层时返回 `Security`；候选协议不含 TCP 或地址族为空时
//!   返回 `Unable`；非字面 IP 的主机返回 `Dns`。

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use spark_flow::{
    AcceptEndpoint, AddressFamily, Capability, CapabilityMask, ErrorCode, FlowError,
    TransportProtocol, error::ACCEPT,
};
use tracing::{debug, warn};

use crate::error::{BIND, map_io_error};

/// 一次监听的地址规划。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BindPlan {
    pub addr: SocketAddr,
    pub only_v6: bool,
    pub fallback: Option<SocketAddr>,
}

pub(crate) fn plan_bind(
    endpoint: &AcceptEndpoint,
    requirements: CapabilityMask,
) -> Result<BindPlan, FlowError> {
    if requirements.contains(Capability::REQUIRED_SECURITY) {
        return Err(FlowError::new(
            ErrorCode::Security,
            ACCEPT,
            "security layer is not available on the tcp backend",
        ));
    }
    let protocols = requirements.candidate_protocols();
    if !protocols.contains(&TransportProtocol::Tcp) {
        return Err(FlowError::new(
            ErrorCode::Unable,
            ACCEPT,
            format!("requirements {requirements} exclude TCP (candidates: {protocols:?})"),
        ));
    }
    let families = requirements.address_families();
    let v4 = families.contains(&AddressFamily::Ipv4);
    let v6 = families.contains(&AddressFamily::Ipv6);
    let port = endpoint.port();

    if endpoint.is_wildcard() {
        let any_v4 = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let any_v6 = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);
        return match (v4, v6) {
            (true, true) => Ok(BindPlan {
                addr: any_v6,
                only_v6: false,
                fallback: Some(any_v4),
            }),
            (true, false) => Ok(BindPlan {
                addr: any_v4,
                only_v6: false,
                fallback: None,
            }),
            (false, true) => Ok(BindPlan {
                addr: any_v6,
                only_v6: true,
                fallback: None,
            }),
            (false, false) => Err(no_family(requirements)),
        };
    }

    let ip: IpAddr = endpoint.host().parse().map_err(|_| {
        FlowError::new(
            ErrorCode::Dns,
            ACCEPT,
            format!("`{}` is not a literal IP address", endpoint.host()),
        )
    })?;
    let addr = SocketAddr::new(ip, port);
    if !families.contains(&AddressFamily::of(&addr)) {
        return Err(no_family(requirements));
    }
    Ok(BindPlan {
        addr,
        only_v6: addr.is_ipv6() && !v4,
        fallback: None,
    })
}

fn no_family(requirements: CapabilityMask) -> FlowError {
    FlowError::new(
        ErrorCode::Unable,
        ACCEPT,
        format!("requirements {requirements} leave no usable address family"),
    )
}

/// 按规划创建非阻塞监听套接字。
pub(crate) fn bind(plan: &BindPlan, backlog: i32) -> Result<std::net::TcpListener, FlowError> {
    match bind_addr(plan.addr, plan.only_v6, backlog) {
        Ok(listener) => Ok(listener),
        Err(error) => match plan.fallback {
            Some(fallback) => {
                warn!(addr = %plan.addr, %error, %fallback, "dual-stack bind failed, falling back");
                bind_addr(fallback, false, backlog).map_err(|error| map_io_error(BIND, error))
            }
            None => Err(map_io_error(BIND, error)),
        },
    }
}

fn bind_addr(
    addr: SocketAddr,
    only_v6: bool,
    backlog: i32,
) -> std::io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(only_v6)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    debug!(%addr, only_v6, backlog, "listening socket ready");
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(capabilities: &[Capability]) -> CapabilityMask {
        capabilities.iter().copied().collect()
    }

    #[test]
    fn default_request_binds_ipv4_wildcard() {
        let plan = plan_bind(
            &AcceptEndpoint::wildcard(8080),
            mask(&[Capability::TCP_REQUIRED, Capability::IPV4_REQUIRED]),
        )
        .unwrap();
        assert_eq!(plan.addr, "0.0.0.0:8080".parse().unwrap());
        assert!(plan.fallback.is_none());
    }

    #[test]
    fn unconstrained_wildcard_is_dual_stack() {
        let plan = plan_bind(&AcceptEndpoint::wildcard(9), CapabilityMask::empty()).unwrap();
        assert_eq!(plan.addr, "[::]:9".parse().unwrap());
        assert!(!plan.only_v6);
        assert_eq!(plan.fallback, Some("0.0.0.0:9".parse().unwrap()));
    }

    #[test]
    fn banning_ipv4_sets_only_v6() {
        let plan = plan_bind(
            &AcceptEndpoint::wildcard(9),
            mask(&[Capability::IPV4_BANNED]),
        )
        .unwrap();
        assert!(plan.only_v6);
    }

    #[test]
    fn required_security_is_refused() {
        let error = plan_bind(
            &AcceptEndpoint::wildcard(9),
            mask(&[Capability::REQUIRED_SECURITY]),
        )
        .unwrap_err();
        assert_eq!(error.code(), ErrorCode::Security);
    }

    #[test]
    fn non_tcp_transport_is_unable() {
        let error = plan_bind(
            &AcceptEndpoint::wildcard(9),
            mask(&[Capability::UDP_REQUIRED]),
        )
        .unwrap_err();
        assert_eq!(error.code(), ErrorCode::Unable);
    }

    #[test]
    fn literal_host_must_match_allowed_family() {
        let error = plan_bind(
            &AcceptEndpoint::new("::1", 9),
            mask(&[Capability::IPV4_REQUIRED]),
        )
        .unwrap_err();
        assert_eq!(error.code(), ErrorCode::Unable);

        let error = plan_bind(&AcceptEndpoint::new("localhost", 9), CapabilityMask::empty())
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::Dns);
    }
}
