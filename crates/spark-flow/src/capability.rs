//! Flow 能力需求位图。
//!
//! # 模块定位（Why）
//! - 传输协商库以“需求/禁用”位的形式接收调用方约束，例如“必须使用 TCP”“禁止 IPv6”；
//! - 采用定长位图后，合并（OR）天然满足交换律与幂等性，便于命令行多次声明同一能力。
//!
//! # 核心组成（What）
//! - [`Capability`]：单个能力位，内建常量覆盖库公开的全部 19 个属性；
//! - [`CapabilityMask`]：`u64` 位图，提供集合运算、冲突检测与传输协议/地址族候选计算。
//!
//! # 风险提示（Trade-offs）
//! - 位索引与库的数值定义保持一致，调整常量会改变与其他实现互通时的语义；
//! - 候选计算只表达“约束是否可满足”，不包含具体实现的可用性，后端需再做一次过滤。

use core::fmt;

use crate::flow::{AddressFamily, TransportProtocol};

/// 能力位图中的单个能力位。
///
/// # 契约（What）
/// - 每个常量对应库公开的一个属性，位索引 `< 64`，越界在编译期报错。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Capability {
    index: u8,
}

impl Capability {
    /// 可选的安全层（有则用之）。
    pub const OPTIONAL_SECURITY: Self = Self::from_raw(0);
    /// 必须建立安全层。
    pub const REQUIRED_SECURITY: Self = Self::from_raw(1);
    /// 需要面向消息的投递语义。
    pub const MESSAGE: Self = Self::from_raw(2);
    /// 必须使用 IPv4。
    pub const IPV4_REQUIRED: Self = Self::from_raw(3);
    /// 禁止使用 IPv4。
    pub const IPV4_BANNED: Self = Self::from_raw(4);
    /// 必须使用 IPv6。
    pub const IPV6_REQUIRED: Self = Self::from_raw(5);
    /// 禁止使用 IPv6。
    pub const IPV6_BANNED: Self = Self::from_raw(6);
    /// 必须使用 SCTP。
    pub const SCTP_REQUIRED: Self = Self::from_raw(7);
    /// 禁止使用 SCTP。
    pub const SCTP_BANNED: Self = Self::from_raw(8);
    /// 必须使用 TCP。
    pub const TCP_REQUIRED: Self = Self::from_raw(9);
    /// 禁止使用 TCP。
    pub const TCP_BANNED: Self = Self::from_raw(10);
    /// 必须使用 UDP。
    pub const UDP_REQUIRED: Self = Self::from_raw(11);
    /// 禁止使用 UDP。
    pub const UDP_BANNED: Self = Self::from_raw(12);
    /// 必须使用 UDP-Lite。
    pub const UDPLITE_REQUIRED: Self = Self::from_raw(13);
    /// 禁止使用 UDP-Lite。
    pub const UDPLITE_BANNED: Self = Self::from_raw(14);
    /// 必须具备拥塞控制。
    pub const CONGESTION_CONTROL_REQUIRED: Self = Self::from_raw(15);
    /// 禁止拥塞控制。
    pub const CONGESTION_CONTROL_BANNED: Self = Self::from_raw(16);
    /// 必须具备重传。
    pub const RETRANSMISSIONS_REQUIRED: Self = Self::from_raw(17);
    /// 禁止重传。
    pub const RETRANSMISSIONS_BANNED: Self = Self::from_raw(18);

    /// 全部内建能力，按位索引升序排列。
    pub const ALL: [Self; 19] = [
        Self::OPTIONAL_SECURITY,
        Self::REQUIRED_SECURITY,
        Self::MESSAGE,
        Self::IPV4_REQUIRED,
        Self::IPV4_BANNED,
        Self::IPV6_REQUIRED,
        Self::IPV6_BANNED,
        Self::SCTP_REQUIRED,
        Self::SCTP_BANNED,
        Self::TCP_REQUIRED,
        Self::TCP_BANNED,
        Self::UDP_REQUIRED,
        Self::UDP_BANNED,
        Self::UDPLITE_REQUIRED,
        Self::UDPLITE_BANNED,
        Self::CONGESTION_CONTROL_REQUIRED,
        Self::CONGESTION_CONTROL_BANNED,
        Self::RETRANSMISSIONS_REQUIRED,
        Self::RETRANSMISSIONS_BANNED,
    ];

    /// 互斥的“需求/禁用”组合：同一位图内不得同时出现。
    pub const EXCLUSIVE_PAIRS: [(Self, Self); 8] = [
        (Self::IPV4_REQUIRED, Self::IPV4_BANNED),
        (Self::IPV6_REQUIRED, Self::IPV6_BANNED),
        (Self::SCTP_REQUIRED, Self::SCTP_BANNED),
        (Self::TCP_REQUIRED, Self::TCP_BANNED),
        (Self::UDP_REQUIRED, Self::UDP_BANNED),
        (Self::UDPLITE_REQUIRED, Self::UDPLITE_BANNED),
        (Self::CONGESTION_CONTROL_REQUIRED, Self::CONGESTION_CONTROL_BANNED),
        (Self::RETRANSMISSIONS_REQUIRED, Self::RETRANSMISSIONS_BANNED),
    ];

    const fn from_raw(index: u8) -> Self {
        assert!(index < 64, "capability index must be < 64");
        Self { index }
    }

    /// 返回位索引。
    pub const fn index(self) -> u8 {
        self.index
    }

    /// 返回该能力对应的单位掩码。
    pub const fn mask(self) -> u64 {
        1u64 << (self.index as u32)
    }

    /// 传输协议对应的“必须使用”位。
    pub const fn required_transport(protocol: TransportProtocol) -> Self {
        match protocol {
            TransportProtocol::Sctp => Self::SCTP_REQUIRED,
            TransportProtocol::Tcp => Self::TCP_REQUIRED,
            TransportProtocol::Udp => Self::UDP_REQUIRED,
            TransportProtocol::UdpLite => Self::UDPLITE_REQUIRED,
        }
    }

    /// 传输协议对应的“禁止使用”位。
    pub const fn banned_transport(protocol: TransportProtocol) -> Self {
        match protocol {
            TransportProtocol::Sctp => Self::SCTP_BANNED,
            TransportProtocol::Tcp => Self::TCP_BANNED,
            TransportProtocol::Udp => Self::UDP_BANNED,
            TransportProtocol::UdpLite => Self::UDPLITE_BANNED,
        }
    }
}

/// 能力位图，位 `1` 表示该需求/禁用生效。
///
/// # 背景（Why）
/// - Flow 的需求在启动阶段构造一次、应用一次，之后不再修改；位图的按位或天然
///   满足“重复声明幂等、声明顺序无关”。
///
/// # 契约（What）
/// - `insert`/`union` 只会置位，不会清位；
/// - [`Self::conflict`] 报告首个同时“需求 + 禁用”的组合；
/// - [`Self::candidate_protocols`] 与 [`Self::address_families`] 给出满足约束的候选，
///   顺序即偏好顺序。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CapabilityMask {
    bits: u64,
}

impl CapabilityMask {
    /// 创建空位图。
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// 根据原始位值构造位图。
    pub const fn from_bits(bits: u64) -> Self {
        Self { bits }
    }

    /// 返回底层位值。
    pub const fn bits(&self) -> u64 {
        self.bits
    }

    /// 写入一个能力位。
    pub fn insert(&mut self, capability: Capability) {
        self.bits |= capability.mask();
    }

    /// 以构建器风格写入能力位。
    pub const fn with(self, capability: Capability) -> Self {
        Self {
            bits: self.bits | capability.mask(),
        }
    }

    /// 判断是否包含某个能力位。
    pub const fn contains(&self, capability: Capability) -> bool {
        self.bits & capability.mask() != 0
    }

    /// 计算位图并集。
    pub const fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }

    /// 判断是否为空位图。
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// 按位索引升序列出已置位的内建能力。
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL
            .into_iter()
            .filter(move |capability| self.contains(*capability))
    }

    /// 返回首个同时被“需求”与“禁用”的组合。
    pub fn conflict(&self) -> Option<(Capability, Capability)> {
        Capability::EXCLUSIVE_PAIRS
            .into_iter()
            .find(|(required, banned)| self.contains(*required) && self.contains(*banned))
    }

    /// 计算满足约束的传输协议候选，按偏好顺序返回。
    ///
    /// # 逻辑（How）
    /// 1. 若声明了多个不同的“必须使用”传输，约束不可满足，直接返回空；
    /// 2. 去掉被禁用或未被“必须使用”选中的协议；
    /// 3. 根据消息语义、重传与拥塞控制的需求/禁用继续过滤。
    pub fn candidate_protocols(&self) -> Vec<TransportProtocol> {
        let required: Vec<TransportProtocol> = TransportProtocol::PREFERENCE
            .into_iter()
            .filter(|protocol| self.contains(Capability::required_transport(*protocol)))
            .collect();
        if required.len() > 1 {
            return Vec::new();
        }

        TransportProtocol::PREFERENCE
            .into_iter()
            .filter(|protocol| required.is_empty() || required.contains(protocol))
            .filter(|protocol| !self.contains(Capability::banned_transport(*protocol)))
            .filter(|protocol| !self.contains(Capability::MESSAGE) || protocol.is_message_oriented())
            .filter(|protocol| {
                Self::honours(
                    protocol.is_reliable(),
                    self.contains(Capability::RETRANSMISSIONS_REQUIRED),
                    self.contains(Capability::RETRANSMISSIONS_BANNED),
                )
            })
            .filter(|protocol| {
                Self::honours(
                    protocol.has_congestion_control(),
                    self.contains(Capability::CONGESTION_CONTROL_REQUIRED),
                    self.contains(Capability::CONGESTION_CONTROL_BANNED),
                )
            })
            .collect()
    }

    /// 计算允许的地址族，按偏好顺序返回（IPv4 优先）。
    ///
    /// 只声明了一侧“必须使用”时，另一侧视为不可用。
    pub fn address_families(&self) -> Vec<AddressFamily> {
        let v4_required = self.contains(Capability::IPV4_REQUIRED);
        let v6_required = self.contains(Capability::IPV6_REQUIRED);
        let mut families = Vec::with_capacity(2);
        if !self.contains(Capability::IPV4_BANNED) && (v4_required || !v6_required) {
            families.push(AddressFamily::Ipv4);
        }
        if !self.contains(Capability::IPV6_BANNED) && (v6_required || !v4_required) {
            families.push(AddressFamily::Ipv6);
        }
        families
    }

    fn honours(feature: bool, required: bool, banned: bool) -> bool {
        (!required || feature) && (!banned || !feature)
    }
}

impl From<Capability> for CapabilityMask {
    fn from(capability: Capability) -> Self {
        Self::empty().with(capability)
    }
}

impl FromIterator<Capability> for CapabilityMask {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl fmt::Display for CapabilityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.bits)
    }
}
