//! Flow 标识与协商结果元数据。

use std::{borrow::Cow, fmt, net::SocketAddr};

/// 事件循环分配的 Flow 标识。
///
/// # 契约（What）
/// - 由上下文单调分配，释放后不会复用；
/// - 释放后的标识仍可传给上下文，但所有操作都会被视为“已释放”。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId(u64);

impl FlowId {
    /// 由原始数值构造标识，主要供后端实现使用。
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 返回原始数值。
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow#{}", self.0)
    }
}

/// 协商后使用的地址族。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4。
    Ipv4,
    /// IPv6。
    Ipv6,
}

impl AddressFamily {
    /// 根据套接字地址推断地址族。
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Self::Ipv4,
            SocketAddr::V6(_) => Self::Ipv6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ipv4 => "IPv4",
            Self::Ipv6 => "IPv6",
        })
    }
}

/// 协商后使用的传输协议。
///
/// # 契约（What）
/// - `is_reliable`/`is_message_oriented`/`has_congestion_control` 描述协议的固有特性，
///   供能力位图计算候选；
/// - [`Self::PREFERENCE`] 为候选的默认偏好顺序。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    /// SCTP。
    Sctp,
    /// TCP。
    Tcp,
    /// UDP。
    Udp,
    /// UDP-Lite。
    UdpLite,
}

impl TransportProtocol {
    /// 候选偏好顺序：可靠传输优先，其次为数据报。
    pub const PREFERENCE: [Self; 4] = [Self::Sctp, Self::Tcp, Self::UdpLite, Self::Udp];

    /// 是否提供重传。
    pub const fn is_reliable(self) -> bool {
        matches!(self, Self::Sctp | Self::Tcp)
    }

    /// 是否保留消息边界。
    pub const fn is_message_oriented(self) -> bool {
        !matches!(self, Self::Tcp)
    }

    /// 是否内建拥塞控制。
    pub const fn has_congestion_control(self) -> bool {
        matches!(self, Self::Sctp | Self::Tcp)
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sctp => "SCTP",
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::UdpLite => "UDPLite",
        })
    }
}

/// 已建立 Flow 的只读协商结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowInfo {
    family: AddressFamily,
    protocol: TransportProtocol,
    local: SocketAddr,
    peer: SocketAddr,
}

impl FlowInfo {
    /// 构造协商结果，地址族取自本地地址。
    ///
    /// 双栈监听器上的 IPv4 连接以 IPv4 映射地址（`::ffff:a.b.c.d`）出现，这里统一还原为
    /// IPv4 地址，地址族随之为 [`AddressFamily::Ipv4`]。
    pub fn new(protocol: TransportProtocol, local: SocketAddr, peer: SocketAddr) -> Self {
        let local = canonical(local);
        let peer = canonical(peer);
        Self {
            family: AddressFamily::of(&local),
            protocol,
            local,
            peer,
        }
    }

    /// 协商后的地址族。
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// 协商后的传输协议。
    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    /// 本端地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// 对端地址。
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

fn canonical(addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(addr.ip().to_canonical(), addr.port())
}

/// 被动接受连接的监听端点。
///
/// # 契约（What）
/// - `host` 为 [`AcceptEndpoint::WILDCARD`]（`"*"`）时由后端按地址族选择通配地址；
/// - 其他取值必须是字面 IP 地址，后端不做名称解析。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptEndpoint {
    host: Cow<'static, str>,
    port: u16,
}

impl AcceptEndpoint {
    /// 通配主机名。
    pub const WILDCARD: &'static str = "*";

    /// 构造监听端点。
    pub fn new(host: impl Into<Cow<'static, str>>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// 在所有地址上监听指定端口。
    pub fn wildcard(port: u16) -> Self {
        Self::new(Self::WILDCARD, port)
    }

    /// 主机部分。
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 端口部分。
    pub fn port(&self) -> u16 {
        self.port
    }

    /// 是否为通配主机。
    pub fn is_wildcard(&self) -> bool {
        self.host == Self::WILDCARD
    }
}

impl fmt::Display for AcceptEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
