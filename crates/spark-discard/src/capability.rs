//! 人类可读的能力请求串解析。
//!
//! # 教案式说明
//! - **意图（Why）**：命令行以 `NEAT_PROPERTY_*` 名称描述传输约束，解析结果需要与库为
//!   新 Flow 报告的默认需求合并后一次性写回；
//! - **逻辑（How）**：按 `,` 与 `;` 切分、跳过空片段，逐个在唯一的静态名称表中查找并
//!   按位或进累加器；任何未知名称都会使整次解析失败，不产出任何位；
//! - **契约（What）**：解析结果与片段顺序无关，重复片段幂等；`apply` 只置位不清位。

use std::{fmt, str::FromStr};

use spark_flow::{Capability, CapabilityMask};
use thiserror::Error;
use tracing::info;

/// 未指定 `-P` 时使用的请求串。
pub const DEFAULT_CAPABILITIES: &str = "NEAT_PROPERTY_TCP_REQUIRED,NEAT_PROPERTY_IPV4_REQUIRED";

/// 请求串的分隔符。
pub const DELIMITERS: [char; 2] = [',', ';'];

/// 名称到能力位的唯一映射。
static VOCABULARY: [(&str, Capability); 19] = [
    ("NEAT_PROPERTY_OPTIONAL_SECURITY", Capability::OPTIONAL_SECURITY),
    ("NEAT_PROPERTY_REQUIRED_SECURITY", Capability::REQUIRED_SECURITY),
    ("NEAT_PROPERTY_MESSAGE", Capability::MESSAGE),
    ("NEAT_PROPERTY_IPV4_REQUIRED", Capability::IPV4_REQUIRED),
    ("NEAT_PROPERTY_IPV4_BANNED", Capability::IPV4_BANNED),
    ("NEAT_PROPERTY_IPV6_REQUIRED", Capability::IPV6_REQUIRED),
    ("NEAT_PROPERTY_IPV6_BANNED", Capability::IPV6_BANNED),
    ("NEAT_PROPERTY_SCTP_REQUIRED", Capability::SCTP_REQUIRED),
    ("NEAT_PROPERTY_SCTP_BANNED", Capability::SCTP_BANNED),
    ("NEAT_PROPERTY_TCP_REQUIRED", Capability::TCP_REQUIRED),
    ("NEAT_PROPERTY_TCP_BANNED", Capability::TCP_BANNED),
    ("NEAT_PROPERTY_UDP_REQUIRED", Capability::UDP_REQUIRED),
    ("NEAT_PROPERTY_UDP_BANNED", Capability::UDP_BANNED),
    ("NEAT_PROPERTY_UDPLITE_REQUIRED", Capability::UDPLITE_REQUIRED),
    ("NEAT_PROPERTY_UDPLITE_BANNED", Capability::UDPLITE_BANNED),
    (
        "NEAT_PROPERTY_CONGESTION_CONTROL_REQUIRED",
        Capability::CONGESTION_CONTROL_REQUIRED,
    ),
    (
        "NEAT_PROPERTY_CONGESTION_CONTROL_BANNED",
        Capability::CONGESTION_CONTROL_BANNED,
    ),
    (
        "NEAT_PROPERTY_RETRANSMISSIONS_REQUIRED",
        Capability::RETRANSMISSIONS_REQUIRED,
    ),
    (
        "NEAT_PROPERTY_RETRANSMISSIONS_BANNED",
        Capability::RETRANSMISSIONS_BANNED,
    ),
];

/// 按名称查找能力位，名称区分大小写。
pub fn lookup(name: &str) -> Option<Capability> {
    VOCABULARY
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, capability)| *capability)
}

/// 能力位的规范名称。
pub fn name_of(capability: Capability) -> Option<&'static str> {
    VOCABULARY
        .iter()
        .find(|(_, candidate)| *candidate == capability)
        .map(|(name, _)| *name)
}

/// 全部可识别的名称，按位索引升序。
pub fn vocabulary() -> impl Iterator<Item = &'static str> {
    VOCABULARY.iter().map(|(name, _)| *name)
}

/// 请求串解析失败。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CapabilityParseError {
    /// 出现了名称表中不存在的片段。
    #[error("unknown property: {token} (token #{position})")]
    UnknownToken {
        /// 原样保留的片段。
        token: String,
        /// 片段在非空片段序列中的下标，从 0 开始。
        position: usize,
    },
}

/// 解析后的能力请求。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapabilityRequest {
    mask: CapabilityMask,
    tokens: Vec<&'static str>,
}

impl CapabilityRequest {
    /// 解析请求串；空串得到空请求。
    pub fn parse(input: &str) -> Result<Self, CapabilityParseError> {
        let mut mask = CapabilityMask::empty();
        let mut tokens = Vec::new();
        for (position, token) in input
            .split(DELIMITERS)
            .filter(|token| !token.is_empty())
            .enumerate()
        {
            let Some(capability) = lookup(token) else {
                return Err(CapabilityParseError::UnknownToken {
                    token: token.to_owned(),
                    position,
                });
            };
            mask.insert(capability);
            if let Some(name) = name_of(capability) {
                tokens.push(name);
            }
        }
        Ok(Self { mask, tokens })
    }

    /// 请求本身的位图。
    pub fn mask(&self) -> CapabilityMask {
        self.mask
    }

    /// 已接受的片段，保留输入顺序与重复。
    pub fn tokens(&self) -> &[&'static str] {
        &self.tokens
    }

    /// 把请求合并到库报告的默认需求上，每个片段记录一行日志。
    pub fn apply(&self, baseline: CapabilityMask) -> CapabilityMask {
        for token in &self.tokens {
            info!("setting property: {token}");
        }
        baseline.union(self.mask)
    }
}

impl Default for CapabilityRequest {
    fn default() -> Self {
        Self {
            mask: CapabilityMask::empty()
                .with(Capability::TCP_REQUIRED)
                .with(Capability::IPV4_REQUIRED),
            tokens: vec!["NEAT_PROPERTY_TCP_REQUIRED", "NEAT_PROPERTY_IPV4_REQUIRED"],
        }
    }
}

impl FromStr for CapabilityRequest {
    type Err = CapabilityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CapabilityRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(","))
    }
}
